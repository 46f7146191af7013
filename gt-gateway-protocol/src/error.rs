use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Body-decode and frame-build failures.
///
/// None of these is connection-fatal: the state machine still ACKs the
/// frame and emits best-effort telemetry with an unparsable marker.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("body truncated: needed {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("invalid BCD digit 0x{0:X} in IMEI")]
    InvalidBcdDigit(u8),
    #[error("invalid IMEI {0:?}")]
    InvalidImei(String),
    #[error("invalid device timestamp {0}")]
    InvalidTimestamp(String),
    #[error("coordinates out of range: lat={lat} lon={lon}")]
    CoordinatesOutOfRange { lat: f64, lon: f64 },
    #[error("location body carries no GPS fix")]
    NoGpsData,
    #[error("no plausible coordinate pair in extended location body")]
    NoCoordinatePair,
    #[error("no cell records in LBS body")]
    NoCellRecords,
    #[error("unsupported protocol opcode 0x{0:02X}")]
    UnsupportedOpcode(u8),
    #[error("frame content too large: {0} bytes")]
    FrameTooLarge(usize),
}
