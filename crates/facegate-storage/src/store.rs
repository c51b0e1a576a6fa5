//! Persistence contract consumed by the gateway.
//!
//! The protocol path never blocks on storage: handlers compute their reply
//! first and hand persistence off as fire-and-forget work, so every method
//! here must be idempotent where re-delivery is possible. The contract is
//! object-safe (`Arc<dyn GatewayStore>`) because the store is chosen at
//! runtime and persistence tasks are spawned.

use crate::error::StorageResult;
use crate::models::{AttendanceEvent, DeviceInfoRecord, DeviceStatusRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait GatewayStore: Send + Sync {
    /// Record that a device was seen now: updates last-seen, source address
    /// and the online flag. Creates the status row if absent.
    async fn upsert_device_status(
        &self,
        serial: &str,
        addr: &str,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Merge a device-info sub-record into an existing status row.
    async fn update_device_info(&self, serial: &str, info: &DeviceInfoRecord)
    -> StorageResult<()>;

    /// Insert an attendance event. Inserts colliding on the dedup key
    /// (serial, enroll id, timestamp, verification mode) are no-ops, not
    /// errors. Returns whether a new row was stored.
    async fn insert_attendance(&self, event: &AttendanceEvent) -> StorageResult<bool>;

    /// Append one audit row for an inbound payload.
    async fn insert_audit(
        &self,
        serial: Option<&str>,
        addr: &str,
        payload: &str,
        valid: bool,
    ) -> StorageResult<()>;

    /// Project devices unseen since `cutoff` as offline. Returns how many
    /// rows flipped. Never touches sockets; this is the watchdog's state
    /// projection only.
    async fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> StorageResult<u64>;

    /// Persist a validated event photo under an already-sanitized name.
    async fn save_event_image(&self, file_name: &str, bytes: &[u8]) -> StorageResult<()>;

    /// Fetch one device's status projection.
    async fn device_status(&self, serial: &str) -> StorageResult<Option<DeviceStatusRecord>>;
}
