pub mod memory;
pub mod redis;

use async_trait::async_trait;
use gt_gateway_error::StorageResult;
use gt_gateway_models::DeviceSession;

pub const SESSION_PREFIX: &str = "session:";
pub const IMEI_INDEX_PREFIX: &str = "imei-index:";

/// Persistence behind the session registry.
///
/// Every write refreshes the TTL on both keys. Implementations are
/// allowed to lose records at any time (that is what the TTL is for);
/// the registry degrades gracefully when a store call fails.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Write the record and its IMEI index, refreshing both TTLs.
    async fn put(&self, session: &DeviceSession) -> StorageResult<()>;

    async fn get(&self, session_id: &str) -> StorageResult<Option<DeviceSession>>;

    async fn id_by_imei(&self, imei: &str) -> StorageResult<Option<String>>;

    /// Remove the record and its IMEI index.
    async fn delete(&self, session_id: &str, imei: &str) -> StorageResult<()>;
}
