use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a live device connection.
///
/// Sessions never hold one of these; they hold the short id and resolve
/// it here, which keeps session lifetime independent of connection
/// lifetime.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: String,
    pub remote_address: String,
    /// Pre-serialized frames queued for the connection's write half.
    pub outbound: mpsc::Sender<Bytes>,
    /// Cancelling tears the connection worker down.
    pub cancel: CancellationToken,
}

/// Process-wide index of live connections by short id.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: DashMap<String, ConnectionHandle>,
    next_id: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_channel_id(&self) -> String {
        format!("{:08x}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register(&self, handle: ConnectionHandle) {
        debug!(channel_id = %handle.id, remote = %handle.remote_address, "connection registered");
        self.channels.insert(handle.id.clone(), handle);
    }

    pub fn unregister(&self, channel_id: &str) -> Option<ConnectionHandle> {
        let removed = self.channels.remove(channel_id).map(|(_, h)| h);
        if removed.is_some() {
            debug!(channel_id, "connection unregistered");
        }
        removed
    }

    pub fn get(&self, channel_id: &str) -> Option<ConnectionHandle> {
        self.channels.get(channel_id).map(|h| h.clone())
    }

    pub fn is_live(&self, channel_id: &str) -> bool {
        self.channels.contains_key(channel_id)
    }

    /// Ask the owning worker to shut the connection down. Returns false
    /// when the connection is already gone.
    pub fn close(&self, channel_id: &str) -> bool {
        match self.channels.get(channel_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
