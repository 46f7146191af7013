use super::{encode, opcode};
use crate::error::{ProtocolError, Result};
use bytes::Bytes;

/// Outbound command kinds understood by GT06 devices.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    /// Engine immobilizer relay: `DYD#` cuts oil/electricity, `HFYD#`
    /// restores it.
    Immobilize { enable: bool },
    /// Siren control: `DXDY#` on, `QXDY#` off.
    Siren { enable: bool },
    /// Single location request; opcode 0x8A with an empty body.
    Locate,
    /// Arbitrary ASCII command, `#`-terminated on the wire.
    Generic(String),
}

impl CommandKind {
    fn command_string(&self) -> Option<String> {
        match self {
            CommandKind::Immobilize { enable: true } => Some("DYD#".to_string()),
            CommandKind::Immobilize { enable: false } => Some("HFYD#".to_string()),
            CommandKind::Siren { enable: true } => Some("DXDY#".to_string()),
            CommandKind::Siren { enable: false } => Some("QXDY#".to_string()),
            CommandKind::Locate => None,
            CommandKind::Generic(cmd) => Some(format!("{cmd}#")),
        }
    }
}

/// Command descriptor targeted at a device IMEI. Delivery resolves the
/// IMEI to its bound connection through the session registry; the
/// builder itself never touches the network.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCommand {
    pub imei: String,
    pub kind: CommandKind,
}

/// Build the wire frame for a command with the given server-side serial.
pub fn build_command(kind: &CommandKind, serial: u16) -> Result<Bytes> {
    match kind.command_string() {
        None => Ok(encode(opcode::COMMAND_RESPONSE, &[], serial)),
        Some(cmd) => {
            // One-byte length field: protocol + body + serial + crc.
            let length = 1 + cmd.len() + 2 + 2;
            if length > u8::MAX as usize {
                return Err(ProtocolError::FrameTooLarge(length));
            }
            Ok(encode(opcode::COMMAND, cmd.as_bytes(), serial))
        }
    }
}
