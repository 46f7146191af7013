pub mod builder;
pub mod crc;

use bytes::{BufMut, Bytes, BytesMut};
use crc::crc_itu;

pub const HEADER_STANDARD: u16 = 0x7878;
pub const HEADER_EXTENDED: u16 = 0x7979;
pub const STOP_BITS: u16 = 0x0D0A;

pub const MIN_FRAME_LENGTH: usize = 5;
pub const MAX_FRAME_LENGTH: usize = 1024;

/// Stop patterns observed from real devices besides the nominal 0x0D0A.
/// Dropping frames outside this set loses data from otherwise healthy
/// trackers, so the lenient codec accepts any pattern and only the
/// strict mode enforces membership.
pub const ACCEPTED_STOP_BITS: [u16; 4] = [0x0D0A, 0x0A0D, 0x0000, 0xFFFF];

/// Protocol opcodes of the GT06 family.
pub mod opcode {
    pub const LOGIN: u8 = 0x01;
    pub const GPS_LBS_1: u8 = 0x12;
    pub const STATUS: u8 = 0x13;
    pub const GPS_OFFLINE: u8 = 0x15;
    pub const GPS_LBS_STATUS_1: u8 = 0x16;
    pub const LBS_PHONE: u8 = 0x17;
    pub const LBS_EXTEND: u8 = 0x18;
    pub const GPS_PHONE: u8 = 0x1A;
    pub const GPS_LBS_2: u8 = 0x22;
    pub const HEARTBEAT: u8 = 0x23;
    pub const LBS_MULTIPLE: u8 = 0x24;
    pub const GPS_LBS_STATUS_2: u8 = 0x26;
    pub const GPS_DOG: u8 = 0x32;
    pub const COMMAND: u8 = 0x80;
    pub const COMMAND_RESPONSE: u8 = 0x8A;
    pub const LOCATION_EXTENDED: u8 = 0x94;

    /// Opcodes whose body carries a GPS fix in some layout.
    pub fn is_location(op: u8) -> bool {
        matches!(
            op,
            GPS_LBS_1
                | GPS_LBS_2
                | GPS_LBS_STATUS_1
                | GPS_LBS_STATUS_2
                | GPS_OFFLINE
                | GPS_PHONE
                | GPS_DOG
                | LOCATION_EXTENDED
        )
    }

    /// Opcodes carrying cell-tower information only.
    pub fn is_lbs(op: u8) -> bool {
        matches!(op, LBS_PHONE | LBS_EXTEND | LBS_MULTIPLE)
    }
}

/// An immutable decoded GT06 message.
///
/// `length` is the declared content length: protocol byte + body +
/// serial + CRC. The stop bits sit outside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub start_bits: u16,
    pub length: u16,
    pub protocol: u8,
    pub body: Bytes,
    pub serial: u16,
    pub crc: u16,
    pub stop_bits: u16,
}

impl Frame {
    /// Serialize with the standard header and a freshly computed CRC.
    /// `decode(frame.to_bytes())` yields the frame back.
    pub fn to_bytes(&self) -> Bytes {
        encode(self.protocol, &self.body, self.serial)
    }
}

/// Serialize an outbound frame: `header ∥ len ∥ protocol ∥ body ∥ serial
/// ∥ crc ∥ 0x0D0A`, CRC over the length byte through the serial.
///
/// Callers keep bodies short (ACKs are empty, commands are ASCII
/// strings); the builder rejects anything that would overflow the
/// one-byte length field before reaching here.
pub fn encode(protocol: u8, body: &[u8], serial: u16) -> Bytes {
    let length = 1 + body.len() + 2 + 2;
    debug_assert!(length <= u8::MAX as usize);

    let mut buf = BytesMut::with_capacity(2 + 1 + length + 2);
    buf.put_u16(HEADER_STANDARD);
    buf.put_u8(length as u8);
    buf.put_u8(protocol);
    buf.put_slice(body);
    buf.put_u16(serial);
    let crc = crc_itu(&buf[2..]);
    buf.put_u16(crc);
    buf.put_u16(STOP_BITS);
    buf.freeze()
}

/// Short acknowledgment echoing the inbound opcode and serial.
///
/// Sent for every structurally recognized frame; devices that miss an
/// ACK retransmit or re-login in a loop.
pub fn build_ack(protocol: u8, serial: u16) -> Bytes {
    encode(protocol, &[], serial)
}

/// Uppercase hex rendering of a byte slice for diagnostics.
pub fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X} ")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_ack_bytes() {
        let ack = build_ack(opcode::LOGIN, 0x0001);
        assert_eq!(
            ack.as_ref(),
            &[0x78, 0x78, 0x05, 0x01, 0x00, 0x01, 0xD9, 0xDC, 0x0D, 0x0A]
        );
    }

    #[test]
    fn generic_ack_echoes_opcode_and_serial() {
        let ack = build_ack(opcode::GPS_LBS_1, 0x0042);
        assert_eq!(ack[3], opcode::GPS_LBS_1);
        assert_eq!(u16::from_be_bytes([ack[4], ack[5]]), 0x0042);
        assert_eq!(&ack[ack.len() - 2..], &[0x0D, 0x0A]);
    }

    #[test]
    fn opcode_classification() {
        assert!(opcode::is_location(opcode::GPS_LBS_1));
        assert!(opcode::is_location(opcode::LOCATION_EXTENDED));
        assert!(!opcode::is_location(opcode::STATUS));
        assert!(opcode::is_lbs(opcode::LBS_MULTIPLE));
        assert!(!opcode::is_lbs(opcode::GPS_LBS_1));
    }
}
