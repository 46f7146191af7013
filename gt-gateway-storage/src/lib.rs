//! Session persistence: the TTL'd key-value layout behind the session
//! registry.
//!
//! Two keys per session, both expiring after the idle timeout:
//! `session:<uuid>` holds the JSON record, `imei-index:<imei>` maps the
//! IMEI to its session id. Connection bindings are process-local and
//! never persisted.

pub mod session_store;

pub use session_store::memory::MemorySessionStore;
pub use session_store::redis::RedisSessionStore;
pub use session_store::SessionStore;
