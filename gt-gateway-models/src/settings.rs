use config::{Config, File};
use gt_gateway_error::GtResult;
use serde::Deserialize;
use std::{ops::Deref, sync::Arc, time::Duration};

/// Cheaply clonable view over the loaded configuration.
#[derive(Debug, Clone)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    /// Load configuration from an optional TOML file plus `GT__`-prefixed
    /// environment overrides (`GT__SERVER__BIND_ADDR=...`).
    pub fn new(config_path: &str) -> GtResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("GT")
                    .separator("__")
                    .try_parsing(true),
            );
        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }

    /// Settings with every field at its default, for tests.
    pub fn defaults() -> Self {
        Self(Arc::new(Inner::default()))
    }

    /// Wrap an already-built `Inner`; used by tests that need to tweak
    /// individual fields.
    pub fn from_inner(inner: Inner) -> Self {
        Self(Arc::new(inner))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub redis: Redis,
    #[serde(default)]
    pub kafka: Kafka,
    #[serde(default)]
    pub log: Log,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    /// Address the device listener binds to.
    #[serde(default = "Server::bind_addr_default")]
    pub bind_addr: String,
    /// All-idle window after which a connection is closed. Doubles as the
    /// persisted session TTL.
    #[serde(default = "Server::idle_timeout_default")]
    pub idle_timeout_seconds: u64,
    /// Per-write deadline for ACK and command flushes.
    #[serde(default = "Server::write_timeout_default")]
    pub write_timeout_seconds: u64,
}

impl Default for Server {
    fn default() -> Self {
        Server {
            bind_addr: Server::bind_addr_default(),
            idle_timeout_seconds: Server::idle_timeout_default(),
            write_timeout_seconds: Server::write_timeout_default(),
        }
    }
}

impl Server {
    fn bind_addr_default() -> String {
        "0.0.0.0:5023".into()
    }

    fn idle_timeout_default() -> u64 {
        600
    }

    fn write_timeout_default() -> u64 {
        5
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    /// Period of the idle-session sweeper.
    #[serde(default = "Session::cleanup_interval_default")]
    pub cleanup_interval_seconds: u64,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            cleanup_interval_seconds: Session::cleanup_interval_default(),
        }
    }
}

impl Session {
    fn cleanup_interval_default() -> u64 {
        60
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Protocol {
    /// Hard cap on a single frame's total wire size.
    #[serde(default = "Protocol::max_frame_length_default")]
    pub max_frame_length: usize,
    /// Reject frames whose CRC mismatches instead of logging.
    #[serde(default)]
    pub strict_crc: bool,
    /// Reject frames whose stop bits are outside the accepted set.
    #[serde(default)]
    pub strict_stop_bits: bool,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol {
            max_frame_length: Protocol::max_frame_length_default(),
            strict_crc: false,
            strict_stop_bits: false,
        }
    }
}

impl Protocol {
    fn max_frame_length_default() -> usize {
        1024
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Redis {
    #[serde(default = "Redis::url_default")]
    pub url: String,
}

impl Default for Redis {
    fn default() -> Self {
        Redis {
            url: Redis::url_default(),
        }
    }
}

impl Redis {
    fn url_default() -> String {
        "redis://127.0.0.1:6379".into()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Kafka {
    #[serde(default = "Kafka::brokers_default")]
    pub brokers: String,
    /// Session connect/rebind/disconnect events.
    #[serde(default = "Kafka::session_topic_default")]
    pub session_topic: String,
    /// Decoded GPS and LBS telemetry.
    #[serde(default = "Kafka::location_topic_default")]
    pub location_topic: String,
    /// Decoded status telemetry.
    #[serde(default = "Kafka::status_topic_default")]
    pub status_topic: String,
    /// Bounded outbound publish queue; overflow drops with a warning.
    #[serde(default = "Kafka::queue_capacity_default")]
    pub queue_capacity: usize,
}

impl Default for Kafka {
    fn default() -> Self {
        Kafka {
            brokers: Kafka::brokers_default(),
            session_topic: Kafka::session_topic_default(),
            location_topic: Kafka::location_topic_default(),
            status_topic: Kafka::status_topic_default(),
            queue_capacity: Kafka::queue_capacity_default(),
        }
    }
}

impl Kafka {
    fn brokers_default() -> String {
        "127.0.0.1:9092".into()
    }

    fn session_topic_default() -> String {
        "device.sessions".into()
    }

    fn location_topic_default() -> String {
        "device.location".into()
    }

    fn status_topic_default() -> String {
        "device.status".into()
    }

    fn queue_capacity_default() -> usize {
        1024
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    #[serde(default = "Log::level_default")]
    pub level: String,
    #[serde(default = "Log::dir_default")]
    pub dir: String,
    #[serde(default = "Log::file_default")]
    pub file: String,
}

impl Default for Log {
    fn default() -> Self {
        Log {
            level: Log::level_default(),
            dir: Log::dir_default(),
            file: Log::file_default(),
        }
    }
}

impl Log {
    fn level_default() -> String {
        "info".into()
    }

    fn dir_default() -> String {
        "logs".into()
    }

    fn file_default() -> String {
        "gateway.log".into()
    }
}
