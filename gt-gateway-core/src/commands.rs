use crate::channels::ChannelRegistry;
use crate::registry::SessionRegistry;
use gt_gateway_protocol::frame::builder::{build_command, DeviceCommand};
use std::sync::Arc;
use tracing::{info, warn};

/// Delivers outbound commands to the connection currently bound to the
/// target IMEI. The frame builder is pure; all lookup and transport
/// concerns live here. No retry queue: a command with no live target is
/// dropped with a warning and retry is the caller's concern.
pub struct CommandDelivery {
    registry: Arc<SessionRegistry>,
    channels: Arc<ChannelRegistry>,
}

impl CommandDelivery {
    pub fn new(registry: Arc<SessionRegistry>, channels: Arc<ChannelRegistry>) -> Self {
        CommandDelivery { registry, channels }
    }

    /// Queue the command on the device's connection. Returns whether it
    /// was handed to the connection's write half.
    pub async fn deliver(&self, command: &DeviceCommand) -> bool {
        let Some(session) = self.registry.get_by_imei(&command.imei).await else {
            warn!(imei = %command.imei, kind = ?command.kind, "no session for command target, dropping");
            return false;
        };

        let Some(channel_id) = session.channel_id.clone() else {
            warn!(imei = %command.imei, kind = ?command.kind, "session not bound to a connection, dropping command");
            return false;
        };
        let Some(handle) = self.channels.get(&channel_id) else {
            warn!(imei = %command.imei, channel_id = %channel_id, "connection no longer live, dropping command");
            return false;
        };

        // Take the serial through the registry so the counter moves
        // inside the record's critical section.
        let mut serial = 0u16;
        if self
            .registry
            .update_by_imei(&command.imei, |s| serial = s.next_command_serial())
            .await
            .is_none()
        {
            warn!(imei = %command.imei, kind = ?command.kind, "session vanished before serial assignment, dropping command");
            return false;
        }

        let frame = match build_command(&command.kind, serial) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(imei = %command.imei, error = %e, "command frame build failed");
                return false;
            }
        };

        match handle.outbound.try_send(frame) {
            Ok(()) => {
                info!(imei = %command.imei, serial, kind = ?command.kind, "command queued for delivery");
                true
            }
            Err(e) => {
                warn!(imei = %command.imei, error = %e, "connection outbound queue rejected command");
                false
            }
        }
    }
}
