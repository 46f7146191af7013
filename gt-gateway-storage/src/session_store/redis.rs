use super::{SessionStore, IMEI_INDEX_PREFIX, SESSION_PREFIX};
use async_trait::async_trait;
use gt_gateway_error::StorageResult;
use gt_gateway_models::DeviceSession;
use redis::{aio::ConnectionManager, AsyncCommands};
use tracing::debug;

/// Redis-backed session store.
///
/// Uses a multiplexed `ConnectionManager`, which re-establishes the
/// underlying connection on its own; a dead Redis surfaces as per-call
/// errors that the registry treats as degradation.
pub struct RedisSessionStore {
    conn: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisSessionStore {
    /// Connect to `url` and return a store whose writes expire after
    /// `ttl_seconds`.
    pub async fn connect(url: &str, ttl_seconds: u64) -> StorageResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(RedisSessionStore { conn, ttl_seconds })
    }

    fn session_key(session_id: &str) -> String {
        format!("{SESSION_PREFIX}{session_id}")
    }

    fn imei_key(imei: &str) -> String {
        format!("{IMEI_INDEX_PREFIX}{imei}")
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, session: &DeviceSession) -> StorageResult<()> {
        let mut conn = self.conn.clone();
        let record = serde_json::to_string(session)?;
        let _: () = conn
            .set_ex(Self::session_key(&session.id), record, self.ttl_seconds)
            .await?;
        let _: () = conn
            .set_ex(
                Self::imei_key(&session.imei),
                session.id.clone(),
                self.ttl_seconds,
            )
            .await?;
        debug!(session_id = %session.id, imei = %session.imei, "session persisted");
        Ok(())
    }

    async fn get(&self, session_id: &str) -> StorageResult<Option<DeviceSession>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::session_key(session_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn id_by_imei(&self, imei: &str) -> StorageResult<Option<String>> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn.get(Self::imei_key(imei)).await?;
        Ok(id)
    }

    async fn delete(&self, session_id: &str, imei: &str) -> StorageResult<()> {
        let mut conn = self.conn.clone();
        let _: usize = conn.del(Self::session_key(session_id)).await?;
        let _: usize = conn.del(Self::imei_key(imei)).await?;
        Ok(())
    }
}
