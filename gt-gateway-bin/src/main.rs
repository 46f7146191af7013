use clap::Parser;
use gt_gateway_common::Logger;
use gt_gateway_core::{
    sweeper, ChannelRegistry, ConnectionContext, GatewayServer, KafkaSink, NoopSink,
    SessionRegistry, TelemetryEmitter, TelemetrySink,
};
use gt_gateway_error::{GtError, GtResult};
use gt_gateway_models::{constants::DEFAULT_CONFIG_FILE_NAME, Settings};
use gt_gateway_storage::{MemorySessionStore, RedisSessionStore, SessionStore};
use std::{env::current_dir, path::PathBuf, str::FromStr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

/// GT06 device gateway.
///
/// Terminates long-lived TCP sessions from GT06-family vehicle trackers
/// (GT06, GT02, GT05, SK05, V5), maintains one logical session per IMEI
/// across reconnects and publishes decoded telemetry to Kafka.
#[derive(Parser)]
#[command(name = "gt-gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "GT06 device gateway", long_about = None)]
struct Cli {
    /// Sets a custom config file with full path.
    ///
    /// If not specified, the gateway looks for 'gateway.toml' in the
    /// current working directory.
    #[arg(short, long, env = "GT_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> GtResult<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(p) => p,
        None => {
            let dir = current_dir()
                .map_err(|e| GtError::from(format!("failed to get current directory: {e}")))?;
            dir.join(DEFAULT_CONFIG_FILE_NAME)
        }
    };
    let settings = Settings::new(&config_path.to_string_lossy())?;

    let level = Level::from_str(&settings.log.level).unwrap_or(Level::INFO);
    let mut logger = Logger::new(Some(level));
    logger.initialize(&settings.log.dir, &settings.log.file)?;

    let cancel = CancellationToken::new();

    // Session store: Redis, degrading to in-memory when unreachable so
    // the gateway still terminates device traffic.
    let store: Arc<dyn SessionStore> = match RedisSessionStore::connect(
        &settings.redis.url,
        settings.server.idle_timeout_seconds,
    )
    .await
    {
        Ok(store) => {
            info!(url = %settings.redis.url, "redis session store connected");
            Arc::new(store)
        }
        Err(e) => {
            warn!(
                url = %settings.redis.url,
                error = %e,
                "redis unreachable, falling back to in-memory session store"
            );
            Arc::new(MemorySessionStore::new())
        }
    };

    let sink: Arc<dyn TelemetrySink> = match KafkaSink::spawn(
        &settings.kafka.brokers,
        settings.kafka.queue_capacity,
        cancel.child_token(),
    ) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!(error = %e, "kafka producer unavailable, telemetry disabled");
            Arc::new(NoopSink)
        }
    };

    let registry = Arc::new(SessionRegistry::new(store));
    let channels = Arc::new(ChannelRegistry::new());
    let telemetry = Arc::new(TelemetryEmitter::new(sink, settings.kafka.clone()));

    let sweeper_handle = sweeper::spawn(
        registry.clone(),
        channels.clone(),
        telemetry.clone(),
        settings.session.cleanup_interval(),
        settings.server.idle_timeout_seconds,
        cancel.child_token(),
    );

    let ctx = ConnectionContext {
        settings: settings.clone(),
        registry,
        channels,
        telemetry,
    };
    let server = GatewayServer::bind(ctx, cancel.child_token()).await?;
    let server_handle = tokio::spawn(server.run());

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    // Reverse startup order: stop accepting, tear down connections and
    // the sweeper, let in-flight publishes drain.
    cancel.cancel();
    if let Err(e) = server_handle.await {
        warn!(error = %e, "server task join failed");
    }
    if let Err(e) = sweeper_handle.await {
        warn!(error = %e, "sweeper task join failed");
    }
    info!("gateway stopped");
    Ok(())
}
