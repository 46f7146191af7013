use super::SessionStore;
use async_trait::async_trait;
use dashmap::DashMap;
use gt_gateway_error::StorageResult;
use gt_gateway_models::DeviceSession;

/// In-process session store.
///
/// Used by tests and as the fallback when Redis is unreachable at
/// startup. Records never expire here; the registry's sweeper is the
/// only eviction path.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, DeviceSession>,
    imei_index: DashMap<String, String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, session: &DeviceSession) -> StorageResult<()> {
        self.sessions
            .insert(session.id.clone(), session.clone());
        self.imei_index
            .insert(session.imei.clone(), session.id.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> StorageResult<Option<DeviceSession>> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn id_by_imei(&self, imei: &str) -> StorageResult<Option<String>> {
        Ok(self.imei_index.get(imei).map(|id| id.clone()))
    }

    async fn delete(&self, session_id: &str, imei: &str) -> StorageResult<()> {
        self.sessions.remove(session_id);
        self.imei_index.remove(imei);
        Ok(())
    }
}
