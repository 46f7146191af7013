use crate::error::{ProtocolError, Result};
use serde::Serialize;

/// Alarm condition carried in the terminal-info bits of a 0x13 body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmCode {
    Normal,
    Sos,
    PowerCut,
    Vibration,
    EnterFence,
    ExitFence,
    Unknown(u8),
}

impl AlarmCode {
    /// Decode bits 5..3 of the terminal-info byte.
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0b000 => AlarmCode::Normal,
            0b100 => AlarmCode::Sos,
            0b011 => AlarmCode::PowerCut,
            0b010 => AlarmCode::Vibration,
            0b001 => AlarmCode::EnterFence,
            0b101 => AlarmCode::ExitFence,
            other => AlarmCode::Unknown(other),
        }
    }

    pub fn is_alarm(&self) -> bool {
        !matches!(self, AlarmCode::Normal)
    }
}

/// Decoded 0x13 status body.
///
/// Terminal-info bit layout: bit 7 oil/electricity disconnected, bit 6
/// GPS tracking on, bits 5..3 alarm code, bit 2 charging, bit 1 ACC
/// high, bit 0 defense armed. Voltage level runs 0..=6, GSM signal
/// 0..=4. The trailing alarm/language pair is absent on some variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPayload {
    pub oil_disconnected: bool,
    pub gps_tracking: bool,
    pub alarm: AlarmCode,
    pub charging: bool,
    pub ignition: bool,
    pub armed: bool,
    pub voltage_level: u8,
    pub gsm_signal: u8,
    pub alarm_extension: Option<u8>,
    pub language: Option<u8>,
}

pub fn decode(body: &[u8]) -> Result<StatusPayload> {
    if body.len() < 3 {
        return Err(ProtocolError::Truncated {
            needed: 3,
            have: body.len(),
        });
    }
    let info = body[0];
    Ok(StatusPayload {
        oil_disconnected: info & 0x80 != 0,
        gps_tracking: info & 0x40 != 0,
        alarm: AlarmCode::from_bits((info >> 3) & 0x07),
        charging: info & 0x04 != 0,
        ignition: info & 0x02 != 0,
        armed: info & 0x01 != 0,
        voltage_level: body[1],
        gsm_signal: body[2],
        alarm_extension: body.get(3).copied(),
        language: body.get(4).copied(),
    })
}
