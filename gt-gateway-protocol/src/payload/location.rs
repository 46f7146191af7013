use crate::error::{ProtocolError, Result};
use crate::frame::opcode;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

/// Raw coordinate unit: degrees * 1,800,000.
const COORDINATE_SCALE: f64 = 1_800_000.0;

/// A decoded GPS fix in WGS84 degrees.
///
/// `device_time` is absent only for the 0x94 extended layout, whose
/// scanning decode recovers coordinates but no timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationPayload {
    pub device_time: Option<DateTime<Utc>>,
    pub satellites: u8,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: u8,
    pub course: u16,
    pub valid: bool,
    pub altitude: Option<i16>,
}

pub fn decode(op: u8, body: &[u8]) -> Result<LocationPayload> {
    match op {
        opcode::LOCATION_EXTENDED => decode_extended(body),
        // 0x1A prefixes the standard layout with four phone-number bytes.
        opcode::GPS_PHONE => {
            if body.len() < 4 {
                return Err(ProtocolError::Truncated {
                    needed: 4,
                    have: body.len(),
                });
            }
            decode_standard(&body[4..])
        }
        _ => decode_standard(body),
    }
}

/// Parse a 6-byte device timestamp: year offset, month, day, hour,
/// minute, second. Two-digit years above 50 land in the 1900s.
pub(crate) fn parse_device_time(b: &[u8]) -> Result<DateTime<Utc>> {
    let (year, month, day, hour, minute, second) = (b[0], b[1], b[2], b[3], b[4], b[5]);
    if !(1..=12).contains(&month)
        || !(1..=31).contains(&day)
        || hour > 23
        || minute > 59
        || second > 59
    {
        return Err(ProtocolError::InvalidTimestamp(format!(
            "{year:02}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
        )));
    }
    let full_year = if year > 50 {
        1900 + year as i32
    } else {
        2000 + year as i32
    };
    Utc.with_ymd_and_hms(
        full_year,
        month as u32,
        day as u32,
        hour as u32,
        minute as u32,
        second as u32,
    )
    .single()
    .ok_or_else(|| {
        ProtocolError::InvalidTimestamp(format!("{full_year}-{month:02}-{day:02}"))
    })
}

/// Standard location layout shared by 0x12/0x22/0x16/0x26/0x15/0x32:
/// date-time, GPS-info length, satellite count, raw latitude/longitude,
/// speed, course-and-status word, optional signed altitude.
fn decode_standard(body: &[u8]) -> Result<LocationPayload> {
    if body.len() < 19 {
        return Err(ProtocolError::Truncated {
            needed: 19,
            have: body.len(),
        });
    }

    let device_time = parse_device_time(&body[..6])?;

    let gps_info_len = body[6];
    if gps_info_len == 0 {
        return Err(ProtocolError::NoGpsData);
    }
    let satellites = body[7];

    let lat_raw = u32::from_be_bytes([body[8], body[9], body[10], body[11]]);
    let lon_raw = u32::from_be_bytes([body[12], body[13], body[14], body[15]]);
    let speed = body[16];
    let course_status = u16::from_be_bytes([body[17], body[18]]);

    // Low 10 bits carry the course; bit 10 flags south, bit 11 west,
    // bit 12 a valid GPS fix.
    let course = course_status & 0x03FF;
    let valid = course_status & (1 << 12) != 0;
    let mut latitude = lat_raw as f64 / COORDINATE_SCALE;
    let mut longitude = lon_raw as f64 / COORDINATE_SCALE;
    if course_status & (1 << 10) != 0 {
        latitude = -latitude;
    }
    if course_status & (1 << 11) != 0 {
        longitude = -longitude;
    }

    if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
        return Err(ProtocolError::CoordinatesOutOfRange {
            lat: latitude,
            lon: longitude,
        });
    }

    let altitude = if body.len() >= 21 {
        Some(i16::from_be_bytes([body[19], body[20]]))
    } else {
        None
    };

    Ok(LocationPayload {
        device_time: Some(device_time),
        satellites,
        latitude,
        longitude,
        speed,
        course,
        valid,
        altitude,
    })
}

/// 0x94 extended location. Vendors ship incompatible encodings for this
/// opcode, so after skipping an optional 8-byte IMEI echo the decoder
/// scans for the first plausible coordinate pair.
fn decode_extended(body: &[u8]) -> Result<LocationPayload> {
    let data = if body.len() > 20 { &body[8..] } else { body };
    let (offset, latitude, longitude) =
        scan_coordinate_pair(data).ok_or(ProtocolError::NoCoordinatePair)?;
    debug!(offset, latitude, longitude, "extended location matched by scan");

    Ok(LocationPayload {
        device_time: None,
        satellites: 0,
        latitude,
        longitude,
        speed: 0,
        course: 0,
        valid: true,
        altitude: None,
    })
}

/// Scan for the first byte offset whose next eight bytes read as two
/// unsigned big-endian coordinates within range and not both zero.
/// Returns the matched offset so the first-match decision point can be
/// trialed against real devices.
pub fn scan_coordinate_pair(data: &[u8]) -> Option<(usize, f64, f64)> {
    if data.len() < 8 {
        return None;
    }
    for offset in 0..=data.len() - 8 {
        let lat_raw = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        let lon_raw = u32::from_be_bytes([
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ]);
        if lat_raw == 0 && lon_raw == 0 {
            continue;
        }
        let lat = lat_raw as f64 / COORDINATE_SCALE;
        let lon = lon_raw as f64 / COORDINATE_SCALE;
        if lat <= 90.0 && lon <= 180.0 {
            return Some((offset, lat, lon));
        }
    }
    None
}
