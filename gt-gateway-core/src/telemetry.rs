use chrono::Utc;
use gt_gateway_error::GtResult;
use gt_gateway_models::{settings::Kafka, DeviceSession};
use gt_gateway_protocol::payload::{LbsPayload, LocationPayload, StatusPayload};
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One message bound for the bus.
#[derive(Debug, Clone)]
pub struct OutboundPublish {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Delivery abstraction over the bus. Publishing is fire-and-forget
/// with at-least-once semantics; a `false` return means the message was
/// dropped and the caller carries on regardless.
pub trait TelemetrySink: Send + Sync {
    fn try_publish(&self, msg: OutboundPublish) -> bool;
}

/// Sink that discards everything. Used in tests and when the bus is
/// not configured.
#[derive(Debug, Default)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn try_publish(&self, _msg: OutboundPublish) -> bool {
        true
    }
}

/// Kafka sink: a bounded queue drained by a dedicated publisher task so
/// the per-connection workers never block on bus I/O.
pub struct KafkaSink {
    tx: mpsc::Sender<OutboundPublish>,
}

impl KafkaSink {
    /// Create the producer and start the publisher task.
    pub fn spawn(brokers: &str, queue_capacity: usize, cancel: CancellationToken) -> GtResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| gt_gateway_error::GtError::Initialization(e.to_string()))?;

        let (tx, rx) = mpsc::channel(queue_capacity);
        spawn_publisher_task(producer, rx, cancel);
        info!(brokers, "kafka telemetry sink started");
        Ok(KafkaSink { tx })
    }
}

impl TelemetrySink for KafkaSink {
    fn try_publish(&self, msg: OutboundPublish) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "telemetry queue rejected message");
                false
            }
        }
    }
}

/// Publisher task owns all Kafka I/O. Deliveries are awaited in a
/// bounded task set to keep memory flat under broker slowdowns.
fn spawn_publisher_task(
    producer: FutureProducer,
    mut rx: mpsc::Receiver<OutboundPublish>,
    cancel: CancellationToken,
) {
    const MAX_INFLIGHT_DELIVERIES: usize = 256;

    tokio::spawn(async move {
        let mut inflight = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = rx.recv() => {
                    let Some(msg) = maybe else { break };

                    while inflight.len() >= MAX_INFLIGHT_DELIVERIES {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = inflight.join_next() => {}
                        }
                    }

                    let record = FutureRecord::to(msg.topic.as_str())
                        .key(msg.key.as_str())
                        .payload(&msg.payload);
                    match producer.send_result(record) {
                        Ok(delivery) => {
                            let topic = msg.topic.clone();
                            inflight.spawn(async move {
                                match delivery.await {
                                    Ok(Ok(_)) => {
                                        debug!(topic = %topic, "telemetry delivery ok");
                                    }
                                    Ok(Err((e, _msg))) => {
                                        warn!(topic = %topic, error = %e, "telemetry delivery failed");
                                    }
                                    Err(e) => {
                                        warn!(topic = %topic, error = %e, "telemetry delivery cancelled");
                                    }
                                }
                            });
                        }
                        Err((e, _record)) => {
                            warn!(topic = %msg.topic, error = %e, "telemetry send failed");
                        }
                    }
                }
            }
        }

        // Best-effort drain on shutdown.
        while inflight.join_next().await.is_some() {}
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEventKind {
    Connected,
    Rebound,
    Disconnected,
}

/// Translates decoded records into bus messages. Location and status
/// telemetry is keyed by IMEI; session lifecycle events by session id.
/// Bus failures are logged by the sink and never abort the connection.
pub struct TelemetryEmitter {
    sink: Arc<dyn TelemetrySink>,
    topics: Kafka,
}

impl TelemetryEmitter {
    pub fn new(sink: Arc<dyn TelemetrySink>, topics: Kafka) -> Self {
        TelemetryEmitter { sink, topics }
    }

    pub fn emit_session_event(&self, kind: SessionEventKind, session: &DeviceSession) {
        let payload = json!({
            "kind": kind,
            "session_id": session.id,
            "imei": session.imei,
            "channel_id": session.channel_id,
            "remote_address": session.remote_address,
            "device_variant": session.device_variant,
            "at": Utc::now(),
        });
        self.publish(&self.topics.session_topic, session.id.clone(), payload);
    }

    pub fn emit_location(&self, imei: &str, protocol: u8, location: &LocationPayload) {
        let payload = json!({
            "imei": imei,
            "protocol": protocol,
            "kind": "location",
            "received_at": Utc::now(),
            "data": location,
        });
        self.publish(&self.topics.location_topic, imei.to_string(), payload);
    }

    pub fn emit_lbs(&self, imei: &str, protocol: u8, lbs: &LbsPayload) {
        let payload = json!({
            "imei": imei,
            "protocol": protocol,
            "kind": "lbs",
            "received_at": Utc::now(),
            "data": lbs,
        });
        self.publish(&self.topics.location_topic, imei.to_string(), payload);
    }

    pub fn emit_status(&self, imei: &str, status: &StatusPayload) {
        let payload = json!({
            "imei": imei,
            "kind": "status",
            "received_at": Utc::now(),
            "data": status,
        });
        self.publish(&self.topics.status_topic, imei.to_string(), payload);
    }

    /// Best-effort marker for a structurally valid frame whose body did
    /// not decode.
    pub fn emit_unparsable(&self, key: &str, protocol: u8, reason: &str) {
        let payload = json!({
            "imei": key,
            "protocol": protocol,
            "kind": "unparsable",
            "received_at": Utc::now(),
            "error": reason,
        });
        self.publish(&self.topics.status_topic, key.to_string(), payload);
    }

    fn publish(&self, topic: &str, key: String, payload: serde_json::Value) {
        let msg = OutboundPublish {
            topic: topic.to_string(),
            key,
            payload: payload.to_string().into_bytes(),
        };
        self.sink.try_publish(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records published messages for assertions.
    #[derive(Default)]
    pub struct CapturingSink {
        pub messages: Mutex<Vec<OutboundPublish>>,
    }

    impl TelemetrySink for CapturingSink {
        fn try_publish(&self, msg: OutboundPublish) -> bool {
            self.messages.lock().unwrap().push(msg);
            true
        }
    }

    fn emitter() -> (Arc<CapturingSink>, TelemetryEmitter) {
        let sink = Arc::new(CapturingSink::default());
        let emitter = TelemetryEmitter::new(sink.clone(), Kafka::default());
        (sink, emitter)
    }

    #[test]
    fn session_events_are_keyed_by_session_id() {
        let (sink, emitter) = emitter();
        let session = DeviceSession::new("123456789012345");
        emitter.emit_session_event(SessionEventKind::Connected, &session);

        let messages = sink.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "device.sessions");
        assert_eq!(messages[0].key, session.id);
        let value: serde_json::Value = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(value["kind"], "connected");
        assert_eq!(value["imei"], "123456789012345");
    }

    #[test]
    fn location_is_keyed_by_imei() {
        let (sink, emitter) = emitter();
        let location = LocationPayload {
            device_time: None,
            satellites: 8,
            latitude: 10.702,
            longitude: 76.513,
            speed: 60,
            course: 88,
            valid: true,
            altitude: None,
        };
        emitter.emit_location("123456789012345", 0x12, &location);

        let messages = sink.messages.lock().unwrap();
        assert_eq!(messages[0].topic, "device.location");
        assert_eq!(messages[0].key, "123456789012345");
        let value: serde_json::Value = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(value["data"]["speed"], 60);
        assert_eq!(value["protocol"], 0x12);
    }

    #[test]
    fn unparsable_marker_carries_reason() {
        let (sink, emitter) = emitter();
        emitter.emit_unparsable("123456789012345", 0x94, "no plausible coordinate pair");
        let messages = sink.messages.lock().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(value["kind"], "unparsable");
        assert!(value["error"].as_str().unwrap().contains("coordinate"));
    }
}
