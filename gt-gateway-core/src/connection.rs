use crate::channels::{ChannelRegistry, ConnectionHandle};
use crate::registry::SessionRegistry;
use crate::telemetry::{SessionEventKind, TelemetryEmitter};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use gt_gateway_models::{DeviceVariant, Settings};
use gt_gateway_protocol::frame::{build_ack, hex_string, opcode};
use gt_gateway_protocol::payload::{LoginPayload, Payload};
use gt_gateway_protocol::{CodecConfig, Frame, Gt06Codec, ProtocolError};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared dependencies handed to every connection worker. No ambient
/// singletons: the host wires these at startup.
#[derive(Clone)]
pub struct ConnectionContext {
    pub settings: Settings,
    pub registry: Arc<SessionRegistry>,
    pub channels: Arc<ChannelRegistry>,
    pub telemetry: Arc<TelemetryEmitter>,
}

impl ConnectionContext {
    fn codec_config(&self) -> CodecConfig {
        CodecConfig {
            max_frame_length: self.settings.protocol.max_frame_length,
            strict_crc: self.settings.protocol.strict_crc,
            strict_stop_bits: self.settings.protocol.strict_stop_bits,
        }
    }
}

enum Flow {
    Continue,
    Close(&'static str),
}

/// Per-connection worker: OPEN on accept, AUTHENTICATED after a valid
/// login, closed on peer disconnect, idle timeout, cancellation or
/// fatal I/O error.
///
/// Frame processing is strictly sequential; the ACK for frame N is
/// flushed before frame N+1 is read, which is what the GT06 serial
/// discipline assumes.
pub async fn handle_connection(
    ctx: ConnectionContext,
    stream: TcpStream,
    remote: SocketAddr,
    cancel: CancellationToken,
) {
    let channel_id = ctx.channels.next_channel_id();
    let remote_address = remote.to_string();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Bytes>(32);
    ctx.channels.register(ConnectionHandle {
        id: channel_id.clone(),
        remote_address: remote_address.clone(),
        outbound: outbound_tx,
        cancel: cancel.clone(),
    });
    info!(channel_id = %channel_id, remote = %remote_address, "device connection established");

    let idle_timeout = ctx.settings.server.idle_timeout();
    let write_timeout = ctx.settings.server.write_timeout();
    let mut framed = Framed::new(stream, Gt06Codec::new(ctx.codec_config()));

    let close_reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break "cancelled",

            queued = outbound_rx.recv() => {
                let Some(frame_bytes) = queued else { break "outbound channel closed" };
                if let Err(e) = send_frame(&mut framed, frame_bytes, write_timeout).await {
                    warn!(channel_id = %channel_id, error = %e, "outbound write failed");
                    break "write failed";
                }
            }

            read = timeout(idle_timeout, framed.next()) => {
                match read {
                    Err(_) => {
                        warn!(channel_id = %channel_id, remote = %remote_address, "connection idle timeout");
                        break "idle timeout";
                    }
                    Ok(None) => break "peer closed",
                    Ok(Some(Err(e))) => {
                        warn!(channel_id = %channel_id, error = %e, "transport read error");
                        break "read failed";
                    }
                    Ok(Some(Ok(frame))) => {
                        match dispatch(&ctx, &mut framed, &channel_id, &remote_address, &frame, write_timeout).await {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Close(reason)) => break reason,
                            Err(e) => {
                                warn!(channel_id = %channel_id, error = %e, "response write failed");
                                break "write failed";
                            }
                        }
                    }
                }
            }
        }
    };

    // CLOSING: drop the connection binding but leave the session record
    // for the TTL window so a reconnect rebinds with a stable id.
    ctx.channels.unregister(&channel_id);
    if let Some(session) = ctx.registry.release_connection(&channel_id).await {
        debug!(
            channel_id = %channel_id,
            session_id = %session.id,
            imei = %session.imei,
            "connection binding released, session kept until TTL"
        );
    }
    info!(channel_id = %channel_id, remote = %remote_address, reason = close_reason, "connection closed");
}

async fn send_frame(
    framed: &mut Framed<TcpStream, Gt06Codec>,
    bytes: Bytes,
    write_timeout: Duration,
) -> io::Result<()> {
    match timeout(write_timeout, framed.send(bytes)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
    }
}

/// One opcode table for the whole gateway: `Payload::decode` classifies
/// the frame, and this match only routes the outcome.
async fn dispatch(
    ctx: &ConnectionContext,
    framed: &mut Framed<TcpStream, Gt06Codec>,
    channel_id: &str,
    remote_address: &str,
    frame: &Frame,
    write_timeout: Duration,
) -> io::Result<Flow> {
    match Payload::decode(frame) {
        Ok(Payload::Login(login)) => {
            handle_login(ctx, framed, channel_id, remote_address, frame, login, write_timeout)
                .await
        }
        Ok(payload) => {
            handle_session_traffic(ctx, framed, channel_id, frame, payload, write_timeout).await
        }
        Err(e) if frame.protocol == opcode::LOGIN => {
            warn!(channel_id = %channel_id, error = %e, "login frame with undecodable IMEI");
            Ok(Flow::Close("invalid login"))
        }
        Err(ProtocolError::UnsupportedOpcode(_)) => {
            handle_unparsable(ctx, framed, channel_id, frame, "unsupported opcode", write_timeout)
                .await
        }
        Err(e) => {
            handle_unparsable(ctx, framed, channel_id, frame, &e.to_string(), write_timeout).await
        }
    }
}

/// Opcode 0x01. Classify the variant once, create or rebind the session
/// and ACK with the same serial.
async fn handle_login(
    ctx: &ConnectionContext,
    framed: &mut Framed<TcpStream, Gt06Codec>,
    channel_id: &str,
    remote_address: &str,
    frame: &Frame,
    login: LoginPayload,
    write_timeout: Duration,
) -> io::Result<Flow> {
    let variant = DeviceVariant::classify(login.body_len);
    let (session, rebound) = ctx
        .registry
        .create_or_rebind(&login.imei, variant, channel_id, remote_address)
        .await;

    let event = if rebound {
        SessionEventKind::Rebound
    } else {
        SessionEventKind::Connected
    };
    ctx.telemetry.emit_session_event(event, &session);

    send_frame(framed, build_ack(opcode::LOGIN, frame.serial), write_timeout).await?;
    info!(
        imei = %login.imei,
        session_id = %session.id,
        variant = %session.device_variant,
        rebound,
        "login accepted"
    );

    if !rebound {
        log_configuration_advice(session.device_variant, &login.imei);
    }
    Ok(Flow::Continue)
}

/// One advisory block per fresh session, keyed to the classified
/// variant. Mirrors what field support expects to see in the logs when
/// a device behaves oddly after install.
fn log_configuration_advice(variant: DeviceVariant, imei: &str) {
    match variant {
        DeviceVariant::V5 => {
            info!(imei, "V5 device: expect status packets as primary traffic; location arrives on movement or SMS trigger");
        }
        DeviceVariant::Sk05 => {
            info!(imei, "SK05 device: location packets should follow login immediately; if absent, check upload interval via SMS");
        }
        DeviceVariant::Gt06Standard | DeviceVariant::Gt06Unknown => {
            info!(imei, "GT06 device: configure upload interval via SMS if no location packets arrive");
        }
    }
}

/// Everything after login: heartbeat, status, location, LBS and command
/// responses. The session is mutated in place through the registry so a
/// login racing in on another connection can never be overwritten with
/// this handler's state; an unauthenticated connection gets no ACK.
async fn handle_session_traffic(
    ctx: &ConnectionContext,
    framed: &mut Framed<TcpStream, Gt06Codec>,
    channel_id: &str,
    frame: &Frame,
    payload: Payload,
    write_timeout: Duration,
) -> io::Result<Flow> {
    let mut first_status_advice = false;
    let updated = ctx
        .registry
        .update_by_connection(channel_id, |session| {
            session.touch();
            match &payload {
                Payload::Location(_) => session.has_received_location = true,
                Payload::Status(_) => {
                    if session.device_variant == DeviceVariant::V5
                        && !session.has_received_status_advice
                    {
                        session.has_received_status_advice = true;
                        first_status_advice = true;
                    }
                }
                _ => {}
            }
        })
        .await;
    let Some(session) = updated else {
        debug!(
            channel_id = %channel_id,
            protocol = format_args!("0x{:02X}", frame.protocol),
            "frame before login, dropping without ACK"
        );
        return Ok(Flow::Continue);
    };

    match &payload {
        Payload::Heartbeat => {
            debug!(imei = %session.imei, variant = %session.device_variant, "heartbeat");
        }
        Payload::Status(status) => {
            if status.alarm.is_alarm() {
                warn!(
                    imei = %session.imei,
                    alarm = ?status.alarm,
                    "device alarm reported"
                );
            }
            if session.device_variant == DeviceVariant::V5 {
                // V5 devices report status as primary telemetry; advise
                // exactly once per session, then stay quiet.
                if first_status_advice {
                    info!(
                        imei = %session.imei,
                        "V5 device on status-primary telemetry; this is expected behavior"
                    );
                }
            } else {
                warn!(
                    imei = %session.imei,
                    variant = %session.device_variant,
                    "status packet from a location-capable device, check upload configuration"
                );
            }
            ctx.telemetry.emit_status(&session.imei, status);
        }
        Payload::Location(loc) => {
            info!(
                imei = %session.imei,
                protocol = format_args!("0x{:02X}", frame.protocol),
                latitude = loc.latitude,
                longitude = loc.longitude,
                speed = loc.speed,
                satellites = loc.satellites,
                valid = loc.valid,
                "location received"
            );
            ctx.telemetry.emit_location(&session.imei, frame.protocol, loc);
        }
        Payload::Lbs(lbs) => {
            debug!(
                imei = %session.imei,
                mcc = lbs.mcc,
                cells = lbs.cells.len(),
                "cell-tower report received"
            );
            ctx.telemetry.emit_lbs(&session.imei, frame.protocol, lbs);
        }
        Payload::CommandResponse { content } => {
            info!(
                imei = %session.imei,
                serial = frame.serial,
                content = %content,
                "command response received"
            );
        }
        // Login is routed to handle_login by dispatch.
        Payload::Login(_) => {}
    }

    send_frame(framed, build_ack(frame.protocol, frame.serial), write_timeout).await?;
    Ok(Flow::Continue)
}

/// A structurally valid frame whose body did not decode (or whose
/// opcode is unknown) still gets an ACK so flaky devices do not fall
/// into re-login loops, plus a best-effort telemetry marker.
async fn handle_unparsable(
    ctx: &ConnectionContext,
    framed: &mut Framed<TcpStream, Gt06Codec>,
    channel_id: &str,
    frame: &Frame,
    reason: &str,
    write_timeout: Duration,
) -> io::Result<Flow> {
    let Some(session) = ctx
        .registry
        .update_by_connection(channel_id, |session| session.touch())
        .await
    else {
        debug!(
            channel_id = %channel_id,
            protocol = format_args!("0x{:02X}", frame.protocol),
            "unparsable frame before login, dropping without ACK"
        );
        return Ok(Flow::Continue);
    };

    warn!(
        imei = %session.imei,
        protocol = format_args!("0x{:02X}", frame.protocol),
        body_hex = %hex_string(&frame.body),
        reason,
        "frame body did not decode, ACKing anyway"
    );
    ctx.telemetry
        .emit_unparsable(&session.imei, frame.protocol, reason);

    send_frame(framed, build_ack(frame.protocol, frame.serial), write_timeout).await?;
    Ok(Flow::Continue)
}
