pub mod lbs;
pub mod location;
pub mod login;
pub mod status;

pub use lbs::{CellTower, LbsPayload};
pub use location::{scan_coordinate_pair, LocationPayload};
pub use login::{decode_imei, LoginPayload};
pub use status::{AlarmCode, StatusPayload};

use crate::error::{ProtocolError, Result};
use crate::frame::{opcode, Frame};

/// Decoded frame body, keyed by the frame's protocol opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Login(LoginPayload),
    Location(LocationPayload),
    Status(StatusPayload),
    Lbs(LbsPayload),
    Heartbeat,
    /// Echo of a server-sent command; correlated by frame serial.
    CommandResponse { content: String },
}

impl Payload {
    /// Decode a frame body by opcode.
    ///
    /// Failure is never fatal: callers ACK the frame regardless and emit
    /// best-effort telemetry with an unparsable marker.
    pub fn decode(frame: &Frame) -> Result<Payload> {
        match frame.protocol {
            opcode::LOGIN => login::decode(&frame.body).map(Payload::Login),
            opcode::STATUS => status::decode(&frame.body).map(Payload::Status),
            opcode::HEARTBEAT => Ok(Payload::Heartbeat),
            opcode::COMMAND_RESPONSE => Ok(Payload::CommandResponse {
                content: String::from_utf8_lossy(&frame.body).into_owned(),
            }),
            op if opcode::is_location(op) => {
                location::decode(op, &frame.body).map(Payload::Location)
            }
            op if opcode::is_lbs(op) => lbs::decode(op, &frame.body).map(Payload::Lbs),
            op => Err(ProtocolError::UnsupportedOpcode(op)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(protocol: u8, body: &[u8]) -> Frame {
        Frame {
            start_bits: 0x7878,
            length: (body.len() + 5) as u16,
            protocol,
            body: Bytes::copy_from_slice(body),
            serial: 1,
            crc: 0,
            stop_bits: 0x0D0A,
        }
    }

    #[test]
    fn dispatches_login() {
        let f = frame(
            opcode::LOGIN,
            &[0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x23, 0x45],
        );
        match Payload::decode(&f).unwrap() {
            Payload::Login(login) => assert_eq!(login.imei, "123456789012345"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn dispatches_heartbeat() {
        assert_eq!(
            Payload::decode(&frame(opcode::HEARTBEAT, &[])).unwrap(),
            Payload::Heartbeat
        );
    }

    #[test]
    fn dispatches_command_response() {
        let f = frame(opcode::COMMAND_RESPONSE, b"DYD=Success!");
        match Payload::decode(&f).unwrap() {
            Payload::CommandResponse { content } => assert_eq!(content, "DYD=Success!"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        assert_eq!(
            Payload::decode(&frame(0x7E, &[])),
            Err(ProtocolError::UnsupportedOpcode(0x7E))
        );
    }
}
