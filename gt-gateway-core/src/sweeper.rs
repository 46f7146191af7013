use crate::channels::ChannelRegistry;
use crate::registry::SessionRegistry;
use crate::telemetry::{SessionEventKind, TelemetryEmitter};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Periodic TTL sweeper: evicts sessions idle beyond the threshold and
/// force-closes their connections if still live. Runs concurrently with
/// normal traffic; eviction goes through the registry's per-IMEI
/// critical sections.
pub fn spawn(
    registry: Arc<SessionRegistry>,
    channels: Arc<ChannelRegistry>,
    telemetry: Arc<TelemetryEmitter>,
    period: Duration,
    max_idle_seconds: u64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    sweep(&registry, &channels, &telemetry, max_idle_seconds).await;
                }
            }
        }
    })
}

async fn sweep(
    registry: &SessionRegistry,
    channels: &ChannelRegistry,
    telemetry: &TelemetryEmitter,
    max_idle_seconds: u64,
) {
    let idle = registry.find_idle(max_idle_seconds);
    if idle.is_empty() {
        return;
    }

    let count = idle.len();
    for session in idle {
        info!(
            session_id = %session.id,
            imei = %session.imei,
            idle_seconds = session.idle_seconds(),
            "evicting idle session"
        );
        if let Some(channel_id) = &session.channel_id {
            channels.close(channel_id);
        }
        registry.remove_session(&session).await;
        telemetry.emit_session_event(SessionEventKind::Disconnected, &session);
    }
    info!(count, "idle session sweep finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::NoopSink;
    use chrono::{Duration as ChronoDuration, Utc};
    use gt_gateway_models::settings::Kafka;
    use gt_gateway_models::DeviceVariant;
    use gt_gateway_storage::MemorySessionStore;

    fn fixtures() -> (Arc<SessionRegistry>, Arc<ChannelRegistry>, Arc<TelemetryEmitter>) {
        (
            Arc::new(SessionRegistry::new(Arc::new(MemorySessionStore::new()))),
            Arc::new(ChannelRegistry::new()),
            Arc::new(TelemetryEmitter::new(Arc::new(NoopSink), Kafka::default())),
        )
    }

    #[tokio::test]
    async fn sweep_with_no_sessions_is_a_noop() {
        let (registry, channels, telemetry) = fixtures();
        sweep(&registry, &channels, &telemetry, 600).await;
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn sweep_evicts_only_idle_sessions() {
        let (registry, channels, telemetry) = fixtures();
        let (mut stale, _) = registry
            .create_or_rebind("123456789012345", DeviceVariant::Sk05, "conn-a", "10.0.0.1:1")
            .await;
        let (fresh, _) = registry
            .create_or_rebind("543210987654321", DeviceVariant::Sk05, "conn-b", "10.0.0.2:2")
            .await;

        stale.last_activity_at = Utc::now() - ChronoDuration::seconds(601);
        registry.save(&stale).await;

        sweep(&registry, &channels, &telemetry, 600).await;

        assert!(registry.get_by_id(&stale.id).is_none());
        assert!(registry.get_by_id(&fresh.id).is_some());
        assert!(registry.get_by_connection("conn-a").is_none());
        assert!(registry.get_by_connection("conn-b").is_some());
    }
}
