//! Gateway core: session registry, per-connection protocol state
//! machine, TCP listener, idle sweeper, command delivery and telemetry
//! emission.

pub mod channels;
pub mod commands;
pub mod connection;
pub mod registry;
pub mod server;
pub mod sweeper;
pub mod telemetry;

pub use channels::{ChannelRegistry, ConnectionHandle};
pub use commands::CommandDelivery;
pub use connection::ConnectionContext;
pub use registry::SessionRegistry;
pub use server::GatewayServer;
pub use telemetry::{KafkaSink, NoopSink, SessionEventKind, TelemetryEmitter, TelemetrySink};
