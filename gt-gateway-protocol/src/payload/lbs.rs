use super::location::parse_device_time;
use crate::error::{ProtocolError, Result};
use crate::frame::opcode;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One observed cell tower. `rssi` is only present in the multi-cell
/// layout (0x24).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellTower {
    pub lac: u16,
    pub cell_id: u32,
    pub rssi: Option<u8>,
}

/// Cell-tower location report: MCC/MNC plus one or more towers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LbsPayload {
    pub device_time: Option<DateTime<Utc>>,
    pub mcc: u16,
    pub mnc: u8,
    pub cells: Vec<CellTower>,
}

/// 0x24 carries up to seven (LAC, cell id, RSSI) records after the
/// MCC/MNC header; 0x17/0x18 carry a single tower and no RSSI.
const MAX_CELL_RECORDS: usize = 7;

pub fn decode(op: u8, body: &[u8]) -> Result<LbsPayload> {
    if body.len() < 14 {
        return Err(ProtocolError::Truncated {
            needed: 14,
            have: body.len(),
        });
    }

    // Same 6-byte timestamp as the location layout; tolerate garbage
    // here since cell data is still usable without it.
    let device_time = parse_device_time(&body[..6]).ok();
    let mcc = u16::from_be_bytes([body[6], body[7]]);
    let mnc = body[8];

    let mut cells = Vec::new();
    match op {
        opcode::LBS_MULTIPLE => {
            let mut at = 9;
            while at + 6 <= body.len() && cells.len() < MAX_CELL_RECORDS {
                let lac = u16::from_be_bytes([body[at], body[at + 1]]);
                let cell_id =
                    u32::from_be_bytes([0, body[at + 2], body[at + 3], body[at + 4]]);
                cells.push(CellTower {
                    lac,
                    cell_id,
                    rssi: Some(body[at + 5]),
                });
                at += 6;
            }
        }
        _ => {
            let lac = u16::from_be_bytes([body[9], body[10]]);
            let cell_id = u32::from_be_bytes([0, body[11], body[12], body[13]]);
            cells.push(CellTower {
                lac,
                cell_id,
                rssi: None,
            });
        }
    }

    if cells.is_empty() {
        return Err(ProtocolError::NoCellRecords);
    }

    Ok(LbsPayload {
        device_time,
        mcc,
        mnc,
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        // 2024-03-15 12:34:56, MCC 404 (India), MNC 45.
        let mut b = vec![0x18, 0x03, 0x0F, 0x0C, 0x22, 0x38];
        b.extend_from_slice(&404u16.to_be_bytes());
        b.push(45);
        b
    }

    #[test]
    fn decodes_single_cell_phone_layout() {
        let mut body = header();
        body.extend_from_slice(&0x1A2Bu16.to_be_bytes());
        body.extend_from_slice(&[0x00, 0xBE, 0xEF]);
        let lbs = decode(opcode::LBS_PHONE, &body).unwrap();
        assert_eq!(lbs.mcc, 404);
        assert_eq!(lbs.mnc, 45);
        assert_eq!(lbs.cells.len(), 1);
        assert_eq!(lbs.cells[0].lac, 0x1A2B);
        assert_eq!(lbs.cells[0].cell_id, 0x00BEEF);
        assert_eq!(lbs.cells[0].rssi, None);
        assert!(lbs.device_time.is_some());
    }

    #[test]
    fn decodes_multiple_cells() {
        let mut body = header();
        for i in 0..3u8 {
            body.extend_from_slice(&(0x1000u16 + i as u16).to_be_bytes());
            body.extend_from_slice(&[0x00, 0x10, i]);
            body.push(0x30 + i);
        }
        let lbs = decode(opcode::LBS_MULTIPLE, &body).unwrap();
        assert_eq!(lbs.cells.len(), 3);
        assert_eq!(lbs.cells[1].lac, 0x1001);
        assert_eq!(lbs.cells[2].rssi, Some(0x32));
    }

    #[test]
    fn cell_record_cap_holds() {
        let mut body = header();
        for _ in 0..10 {
            body.extend_from_slice(&[0x10, 0x00, 0x00, 0x10, 0x01, 0x30]);
        }
        let lbs = decode(opcode::LBS_MULTIPLE, &body).unwrap();
        assert_eq!(lbs.cells.len(), MAX_CELL_RECORDS);
    }

    #[test]
    fn bad_timestamp_is_tolerated() {
        let mut body = header();
        body[1] = 0xFF; // month out of range
        body.extend_from_slice(&[0x1A, 0x2B, 0x00, 0xBE, 0xEF]);
        let lbs = decode(opcode::LBS_EXTEND, &body).unwrap();
        assert!(lbs.device_time.is_none());
        assert_eq!(lbs.cells.len(), 1);
    }

    #[test]
    fn truncated_body_fails() {
        assert!(matches!(
            decode(opcode::LBS_PHONE, &header()),
            Err(ProtocolError::Truncated { .. })
        ));
    }
}
