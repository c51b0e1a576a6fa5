//! Persisted records produced by the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One attendance event pushed by a device.
///
/// The device-supplied timestamp stays an opaque string: the dedup key
/// (serial, enrollment id, timestamp, verification mode) compares it
/// verbatim, so normalizing it would silently change identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub serial: String,
    pub enroll_id: String,
    pub log_time: String,
    pub verify_mode: i64,
    pub in_out: i64,
    pub event_code: i64,
    pub temperature: Option<f64>,
    pub image_file: Option<String>,
    /// Raw record payload as received, for forensics.
    pub raw: String,
}

/// Device-info sub-record, updated opportunistically when a device
/// volunteers it on registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfoRecord {
    pub model: Option<String>,
    pub user_capacity: Option<i64>,
    pub log_capacity: Option<i64>,
    pub face_capacity: Option<i64>,
    pub firmware: Option<String>,
    pub device_clock: Option<String>,
    pub mac: Option<String>,
}

/// Persisted liveness/status projection for one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusRecord {
    pub serial: String,
    pub last_seen: DateTime<Utc>,
    pub online: bool,
    pub addr: String,
    pub info: DeviceInfoRecord,
}

/// One audit row: every decoded or undecodable inbound payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub serial: Option<String>,
    pub addr: String,
    pub payload: String,
    pub valid: bool,
    pub received_at: DateTime<Utc>,
}
