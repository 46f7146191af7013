use crate::connection::{handle_connection, ConnectionContext};
use gt_gateway_error::GtResult;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// TCP listener for device connections. Each accepted connection gets
/// its own worker task driving the per-connection state machine.
pub struct GatewayServer {
    listener: TcpListener,
    ctx: ConnectionContext,
    cancel: CancellationToken,
}

impl GatewayServer {
    pub async fn bind(ctx: ConnectionContext, cancel: CancellationToken) -> GtResult<Self> {
        let listener = TcpListener::bind(&ctx.settings.server.bind_addr).await?;
        info!(addr = %listener.local_addr()?, "device listener started");
        Ok(GatewayServer {
            listener,
            ctx,
            cancel,
        })
    }

    pub fn local_addr(&self) -> GtResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until cancelled. Worker tasks get a child token so a
    /// server shutdown tears down every connection.
    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("device listener stopping");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, remote)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!(error = %e, "failed to set TCP_NODELAY");
                            }
                            let ctx = self.ctx.clone();
                            let token = self.cancel.child_token();
                            tokio::spawn(async move {
                                handle_connection(ctx, stream, remote, token).await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }
    }
}
