use crate::constants::ATTR_COMMAND_SERIAL;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Device sub-family, classified once from the login frame body length
/// and never recomputed afterwards. Status-frame handling depends on the
/// variant decided at login time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceVariant {
    V5,
    Sk05,
    Gt06Standard,
    Gt06Unknown,
}

impl DeviceVariant {
    /// Classify from the login body length. Short frames are V5, the
    /// 13..=16 band is SK05 and anything else carrying at least a full
    /// BCD IMEI is standard GT06.
    pub fn classify(login_body_len: usize) -> Self {
        if login_body_len <= 12 {
            DeviceVariant::V5
        } else if (13..=16).contains(&login_body_len) {
            DeviceVariant::Sk05
        } else {
            // >= 17 still carries a full BCD IMEI, so it is a standard
            // GT06 login with vendor extension bytes appended.
            DeviceVariant::Gt06Standard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceVariant::V5 => "V5",
            DeviceVariant::Sk05 => "SK05",
            DeviceVariant::Gt06Standard => "GT06_STANDARD",
            DeviceVariant::Gt06Unknown => "GT06_UNKNOWN",
        }
    }
}

impl std::fmt::Display for DeviceVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single logical record per device IMEI.
///
/// A session survives TCP reconnects: it is created at first successful
/// login, re-bound to the new connection on reconnect and destroyed on
/// explicit removal or by the TTL sweeper. The session never holds a
/// connection handle, only the opaque short id of the currently bound
/// connection; both directions of the lookup go through the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSession {
    pub id: String,
    pub imei: String,
    pub channel_id: Option<String>,
    pub remote_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub authenticated: bool,
    pub device_variant: DeviceVariant,
    #[serde(default)]
    pub has_received_status_advice: bool,
    #[serde(default)]
    pub has_received_location: bool,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl DeviceSession {
    pub fn new(imei: impl Into<String>) -> Self {
        let now = Utc::now();
        DeviceSession {
            id: Uuid::new_v4().to_string(),
            imei: imei.into(),
            channel_id: None,
            remote_address: None,
            created_at: now,
            last_activity_at: now,
            authenticated: false,
            device_variant: DeviceVariant::Gt06Unknown,
            has_received_status_advice: false,
            has_received_location: false,
            attributes: HashMap::new(),
        }
    }

    /// Refresh the activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    pub fn authenticate(&mut self) {
        self.authenticated = true;
        self.touch();
    }

    /// Re-point the session at a new connection, e.g. after a reconnect.
    pub fn bind(&mut self, channel_id: impl Into<String>, remote_address: impl Into<String>) {
        self.channel_id = Some(channel_id.into());
        self.remote_address = Some(remote_address.into());
        self.touch();
    }

    pub fn is_idle(&self, max_idle_seconds: u64) -> bool {
        self.idle_seconds() > max_idle_seconds as i64
    }

    pub fn idle_seconds(&self) -> i64 {
        (Utc::now() - self.last_activity_at).num_seconds()
    }

    /// Next server-side outbound command serial for this session.
    /// Monotonic, starting at 1, kept in the open attribute map so it
    /// survives persistence round trips.
    pub fn next_command_serial(&mut self) -> u16 {
        let next = self
            .attributes
            .get(ATTR_COMMAND_SERIAL)
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            .wrapping_add(1);
        self.attributes
            .insert(ATTR_COMMAND_SERIAL.to_string(), serde_json::json!(next));
        (next & 0xFFFF) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn classify_variant_from_login_length() {
        assert_eq!(DeviceVariant::classify(8), DeviceVariant::V5);
        assert_eq!(DeviceVariant::classify(10), DeviceVariant::V5);
        assert_eq!(DeviceVariant::classify(12), DeviceVariant::V5);
        assert_eq!(DeviceVariant::classify(13), DeviceVariant::Sk05);
        assert_eq!(DeviceVariant::classify(16), DeviceVariant::Sk05);
        assert_eq!(DeviceVariant::classify(17), DeviceVariant::Gt06Standard);
    }

    #[test]
    fn command_serial_starts_at_one_and_increments() {
        let mut session = DeviceSession::new("123456789012345");
        assert_eq!(session.next_command_serial(), 1);
        assert_eq!(session.next_command_serial(), 2);
        assert_eq!(session.next_command_serial(), 3);
    }

    #[test]
    fn idle_detection_uses_last_activity() {
        let mut session = DeviceSession::new("123456789012345");
        assert!(!session.is_idle(600));
        session.last_activity_at = Utc::now() - Duration::seconds(601);
        assert!(session.is_idle(600));
        session.touch();
        assert!(!session.is_idle(600));
    }

    #[test]
    fn session_record_round_trips_through_json() {
        let mut session = DeviceSession::new("123456789012345");
        session.bind("abcd1234", "10.0.0.1:40212");
        session.device_variant = DeviceVariant::Sk05;
        session.authenticate();

        let json = serde_json::to_string(&session).unwrap();
        let back: DeviceSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, session.id);
        assert_eq!(back.imei, session.imei);
        assert_eq!(back.channel_id.as_deref(), Some("abcd1234"));
        assert_eq!(back.device_variant, DeviceVariant::Sk05);
        assert!(back.authenticated);
    }
}
