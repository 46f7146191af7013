use dashmap::DashMap;
use gt_gateway_models::{DeviceSession, DeviceVariant};
use gt_gateway_storage::SessionStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Process-wide session registry with three indices.
///
/// `by_id` and `by_imei` are mirrored to the external store with a TTL;
/// `by_connection` is process-local because connection ids are
/// meaningless across restarts. Mutations for one IMEI run inside that
/// IMEI's critical section, so another worker reading the same
/// IMEI/connection observes either the prior or the fully-applied
/// state, never a partial update.
///
/// Store failures degrade: reads fall back to the in-process indices
/// and writes log a warning, leaving the record in memory until the
/// store recovers or the sweeper evicts it.
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    by_id: DashMap<String, DeviceSession>,
    by_imei: DashMap<String, String>,
    by_connection: DashMap<String, String>,
    imei_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        SessionRegistry {
            store,
            by_id: DashMap::new(),
            by_imei: DashMap::new(),
            by_connection: DashMap::new(),
            imei_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, imei: &str) -> Arc<Mutex<()>> {
        self.imei_locks
            .entry(imei.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Login path. Rebinds the existing session for `imei` if one is
    /// still alive (stable session id across reconnects), otherwise
    /// creates a fresh one. Returns the session and whether it was a
    /// rebind.
    ///
    /// The variant parameter is only applied on creation: classification
    /// happens once, at first login, and is never recomputed.
    pub async fn create_or_rebind(
        &self,
        imei: &str,
        variant: DeviceVariant,
        channel_id: &str,
        remote_address: &str,
    ) -> (DeviceSession, bool) {
        let lock = self.lock_for(imei);
        let _guard = lock.lock().await;

        match self.lookup_by_imei(imei).await {
            Some(mut session) => {
                if let Some(old_channel) = session.channel_id.take() {
                    self.by_connection.remove(&old_channel);
                }
                session.bind(channel_id, remote_address);
                session.authenticate();
                self.index(&session);
                self.bind_connection(channel_id, &session.id);
                self.persist(&session).await;
                info!(
                    session_id = %session.id,
                    imei,
                    channel_id,
                    "session rebound to new connection"
                );
                (session, true)
            }
            None => {
                let mut session = DeviceSession::new(imei);
                session.device_variant = variant;
                session.bind(channel_id, remote_address);
                session.authenticate();
                self.index(&session);
                self.bind_connection(channel_id, &session.id);
                self.persist(&session).await;
                info!(
                    session_id = %session.id,
                    imei,
                    channel_id,
                    variant = %session.device_variant,
                    "session created"
                );
                (session, false)
            }
        }
    }

    /// Replace the stored record and refresh the store TTL, inside the
    /// record's per-IMEI critical section. The connection binding is not
    /// touched; only the login and close paths move it.
    pub async fn save(&self, session: &DeviceSession) {
        let lock = self.lock_for(&session.imei);
        let _guard = lock.lock().await;
        self.index(session);
        self.persist(session).await;
    }

    /// Mutate the session bound to `channel_id` in place, inside its
    /// per-IMEI critical section, and refresh the store TTL. Returns the
    /// updated record, or None when the connection has no authenticated
    /// session (or the binding moved to another connection meanwhile).
    ///
    /// This is the frame-handler write path: mutating through the index
    /// instead of saving a handler-held clone means a login racing in on
    /// another connection can never be overwritten with stale state.
    pub async fn update_by_connection<F>(&self, channel_id: &str, mutate: F) -> Option<DeviceSession>
    where
        F: FnOnce(&mut DeviceSession),
    {
        let session_id = self.by_connection.get(channel_id).map(|id| id.clone())?;
        let imei = self.by_id.get(&session_id).map(|s| s.imei.clone())?;
        let lock = self.lock_for(&imei);
        let _guard = lock.lock().await;

        // Re-check under the lock; a rebind may have moved the binding.
        if self.by_connection.get(channel_id).map(|id| id.clone()) != Some(session_id.clone()) {
            return None;
        }
        let updated = {
            let mut entry = self.by_id.get_mut(&session_id)?;
            if !entry.authenticated {
                return None;
            }
            mutate(&mut entry);
            entry.clone()
        };
        self.persist(&updated).await;
        Some(updated)
    }

    /// Mutate the session for `imei` in place, inside its critical
    /// section, hydrating from the store if the in-process indices lost
    /// it. Used by command delivery for the outbound serial counter.
    pub async fn update_by_imei<F>(&self, imei: &str, mutate: F) -> Option<DeviceSession>
    where
        F: FnOnce(&mut DeviceSession),
    {
        let lock = self.lock_for(imei);
        let _guard = lock.lock().await;

        let session = self.lookup_by_imei(imei).await?;
        let updated = {
            let mut entry = self.by_id.get_mut(&session.id)?;
            mutate(&mut entry);
            entry.clone()
        };
        self.persist(&updated).await;
        Some(updated)
    }

    pub fn get_by_connection(&self, channel_id: &str) -> Option<DeviceSession> {
        let session_id = self.by_connection.get(channel_id)?.clone();
        self.by_id.get(&session_id).map(|s| s.clone())
    }

    pub fn get_by_id(&self, session_id: &str) -> Option<DeviceSession> {
        self.by_id.get(session_id).map(|s| s.clone())
    }

    /// Lookup by IMEI, falling back to the store so a session persisted
    /// by a previous process incarnation can still be rebound.
    pub async fn get_by_imei(&self, imei: &str) -> Option<DeviceSession> {
        let lock = self.lock_for(imei);
        let _guard = lock.lock().await;
        self.lookup_by_imei(imei).await
    }

    /// Callers hold the IMEI's critical section.
    async fn lookup_by_imei(&self, imei: &str) -> Option<DeviceSession> {
        if let Some(session_id) = self.by_imei.get(imei).map(|id| id.clone()) {
            if let Some(session) = self.by_id.get(&session_id) {
                return Some(session.clone());
            }
        }

        let session_id = match self.store.id_by_imei(imei).await {
            Ok(found) => found?,
            Err(e) => {
                warn!(imei, error = %e, "imei index read failed, degrading to in-memory state");
                return None;
            }
        };
        match self.store.get(&session_id).await {
            Ok(Some(mut session)) => {
                debug!(session_id = %session.id, imei, "session hydrated from store");
                // The persisted connection binding belongs to a previous
                // process; channel ids are not meaningful across
                // restarts, and a stale id could collide with a freshly
                // assigned one. Hydration never seeds `by_connection`.
                session.channel_id = None;
                session.remote_address = None;
                self.index(&session);
                Some(session)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(imei, error = %e, "session read failed, degrading to in-memory state");
                None
            }
        }
    }

    /// Drop the connection binding but keep the session record alive;
    /// the TTL (or the sweeper) owns record destruction. This is the
    /// worker's cleanup path, and what makes the session id stable
    /// across a reconnect inside the TTL window.
    pub async fn release_connection(&self, channel_id: &str) -> Option<DeviceSession> {
        let session_id = self.by_connection.get(channel_id).map(|id| id.clone())?;
        let session = self.get_by_id(&session_id)?;
        let lock = self.lock_for(&session.imei);
        let _guard = lock.lock().await;

        // Re-check under the lock: a rebind may already have re-pointed
        // the session at a newer connection.
        self.by_connection
            .remove_if(channel_id, |_, id| *id == session_id)?;
        let mut entry = self.by_id.get_mut(&session_id)?;
        if entry.channel_id.as_deref() == Some(channel_id) {
            entry.channel_id = None;
            entry.remote_address = None;
        }
        Some(entry.clone())
    }

    /// Remove the session bound to `channel_id` from all three indices
    /// and the store.
    pub async fn remove_by_connection(&self, channel_id: &str) -> Option<DeviceSession> {
        let session_id = self.by_connection.get(channel_id).map(|id| id.clone())?;
        let session = self.get_by_id(&session_id)?;
        self.remove_session(&session).await;
        Some(session)
    }

    /// Remove a session from all indices and the store.
    pub async fn remove_session(&self, session: &DeviceSession) {
        let lock = self.lock_for(&session.imei);
        let _guard = lock.lock().await;

        self.by_id.remove(&session.id);
        self.by_imei.remove(&session.imei);
        if let Some(channel_id) = &session.channel_id {
            self.by_connection.remove(channel_id);
        }
        if let Err(e) = self.store.delete(&session.id, &session.imei).await {
            warn!(session_id = %session.id, error = %e, "session delete failed, record will expire by TTL");
        }
        info!(session_id = %session.id, imei = %session.imei, "session removed");
    }

    /// Sessions whose last activity is older than `max_idle_seconds`.
    /// Safe to call with no sessions present.
    pub fn find_idle(&self, max_idle_seconds: u64) -> Vec<DeviceSession> {
        self.by_id
            .iter()
            .filter(|entry| entry.is_idle(max_idle_seconds))
            .map(|entry| entry.clone())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.by_id.len()
    }

    /// Update `by_id` and `by_imei` only. The connection binding is
    /// managed exclusively by the login and close paths, so a stale
    /// record can never resurrect a dead binding.
    fn index(&self, session: &DeviceSession) {
        self.by_id.insert(session.id.clone(), session.clone());
        self.by_imei.insert(session.imei.clone(), session.id.clone());
    }

    fn bind_connection(&self, channel_id: &str, session_id: &str) {
        self.by_connection
            .insert(channel_id.to_string(), session_id.to_string());
    }

    async fn persist(&self, session: &DeviceSession) {
        if let Err(e) = self.store.put(session).await {
            warn!(
                session_id = %session.id,
                error = %e,
                "session persist failed, keeping in-memory record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use gt_gateway_storage::MemorySessionStore;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(MemorySessionStore::new()))
    }

    const IMEI: &str = "123456789012345";

    #[tokio::test]
    async fn create_then_lookup_by_all_indices() {
        let registry = registry();
        let (session, rebound) = registry
            .create_or_rebind(IMEI, DeviceVariant::Gt06Standard, "conn-a", "10.0.0.1:1")
            .await;
        assert!(!rebound);
        assert!(session.authenticated);

        assert_eq!(registry.get_by_id(&session.id).unwrap().imei, IMEI);
        assert_eq!(registry.get_by_imei(IMEI).await.unwrap().id, session.id);
        assert_eq!(registry.get_by_connection("conn-a").unwrap().id, session.id);
    }

    #[tokio::test]
    async fn rebind_keeps_session_id_and_variant() {
        let registry = registry();
        let (first, _) = registry
            .create_or_rebind(IMEI, DeviceVariant::V5, "conn-a", "10.0.0.1:1")
            .await;

        registry.release_connection("conn-a").await;
        assert!(registry.get_by_connection("conn-a").is_none());

        let (second, rebound) = registry
            .create_or_rebind(IMEI, DeviceVariant::Gt06Standard, "conn-b", "10.0.0.2:2")
            .await;
        assert!(rebound);
        assert_eq!(second.id, first.id);
        // Classification from the first login sticks.
        assert_eq!(second.device_variant, DeviceVariant::V5);
        assert_eq!(second.channel_id.as_deref(), Some("conn-b"));
        assert_eq!(registry.get_by_connection("conn-b").unwrap().id, first.id);
    }

    #[tokio::test]
    async fn at_most_one_session_per_imei() {
        let registry = registry();
        let (a, _) = registry
            .create_or_rebind(IMEI, DeviceVariant::Sk05, "conn-a", "10.0.0.1:1")
            .await;
        let (b, _) = registry
            .create_or_rebind(IMEI, DeviceVariant::Sk05, "conn-b", "10.0.0.2:2")
            .await;
        assert_eq!(a.id, b.id);
        assert_eq!(registry.session_count(), 1);
        // The stale connection binding is gone.
        assert!(registry.get_by_connection("conn-a").is_none());
    }

    #[tokio::test]
    async fn release_keeps_record_for_ttl_window() {
        let registry = registry();
        let (session, _) = registry
            .create_or_rebind(IMEI, DeviceVariant::Sk05, "conn-a", "10.0.0.1:1")
            .await;
        let released = registry.release_connection("conn-a").await.unwrap();
        assert_eq!(released.id, session.id);
        assert!(registry.get_by_id(&session.id).is_some());
        assert!(registry.get_by_imei(IMEI).await.is_some());
    }

    #[tokio::test]
    async fn remove_by_connection_clears_every_index() {
        let registry = registry();
        let (session, _) = registry
            .create_or_rebind(IMEI, DeviceVariant::Sk05, "conn-a", "10.0.0.1:1")
            .await;
        let removed = registry.remove_by_connection("conn-a").await.unwrap();
        assert_eq!(removed.id, session.id);
        assert!(registry.get_by_id(&session.id).is_none());
        assert!(registry.get_by_imei(IMEI).await.is_none());
        assert!(registry.get_by_connection("conn-a").is_none());
    }

    #[tokio::test]
    async fn update_by_connection_mutates_in_place() {
        let registry = registry();
        registry
            .create_or_rebind(IMEI, DeviceVariant::V5, "conn-a", "10.0.0.1:1")
            .await;

        let updated = registry
            .update_by_connection("conn-a", |s| s.has_received_location = true)
            .await
            .unwrap();
        assert!(updated.has_received_location);
        assert!(registry.get_by_connection("conn-a").unwrap().has_received_location);
    }

    #[tokio::test]
    async fn update_via_stale_connection_cannot_clobber_a_rebind() {
        let registry = registry();
        registry
            .create_or_rebind(IMEI, DeviceVariant::Sk05, "conn-a", "10.0.0.1:1")
            .await;
        // The device reconnects before the old worker finishes draining.
        registry
            .create_or_rebind(IMEI, DeviceVariant::Sk05, "conn-b", "10.0.0.2:2")
            .await;

        // A write through the dead binding is a no-op, not a revert.
        assert!(registry
            .update_by_connection("conn-a", |s| s.touch())
            .await
            .is_none());

        let session = registry.get_by_imei(IMEI).await.unwrap();
        assert_eq!(session.channel_id.as_deref(), Some("conn-b"));
        assert!(registry.get_by_connection("conn-a").is_none());
        assert_eq!(registry.get_by_connection("conn-b").unwrap().id, session.id);
    }

    #[tokio::test]
    async fn find_idle_on_empty_registry_returns_nothing() {
        let registry = registry();
        assert!(registry.find_idle(600).is_empty());
    }

    #[tokio::test]
    async fn find_idle_honors_threshold() {
        let registry = registry();
        let (mut session, _) = registry
            .create_or_rebind(IMEI, DeviceVariant::Sk05, "conn-a", "10.0.0.1:1")
            .await;
        assert!(registry.find_idle(600).is_empty());

        session.last_activity_at = Utc::now() - Duration::seconds(601);
        registry.save(&session).await;
        let idle = registry.find_idle(600);
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].id, session.id);
    }

    #[tokio::test]
    async fn hydrates_from_store_after_index_loss() {
        // Simulates a reconnect after a process restart: the store still
        // holds the record, the in-memory indices do not.
        let store = Arc::new(MemorySessionStore::new());
        let registry_a = SessionRegistry::new(store.clone());
        let (session, _) = registry_a
            .create_or_rebind(IMEI, DeviceVariant::V5, "conn-a", "10.0.0.1:1")
            .await;

        let registry_b = SessionRegistry::new(store);
        let hydrated = registry_b.get_by_imei(IMEI).await.unwrap();
        assert_eq!(hydrated.id, session.id);
        // The persisted binding belonged to the dead process: it must
        // not reappear in the connection index.
        assert_eq!(hydrated.channel_id, None);
        assert!(registry_b.get_by_connection("conn-a").is_none());

        let (rebound, was_rebind) = registry_b
            .create_or_rebind(IMEI, DeviceVariant::Gt06Standard, "conn-b", "10.0.0.2:2")
            .await;
        assert!(was_rebind);
        assert_eq!(rebound.id, session.id);
        assert_eq!(rebound.device_variant, DeviceVariant::V5);
    }
}
