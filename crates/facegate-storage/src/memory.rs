//! In-process [`GatewayStore`] with the same semantics as the SQLite
//! store. Gateway tests use it to observe what the protocol path persisted
//! without a database on disk.

use crate::error::StorageResult;
use crate::models::{AttendanceEvent, AuditRecord, DeviceInfoRecord, DeviceStatusRecord};
use crate::store::GatewayStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    statuses: HashMap<String, DeviceStatusRecord>,
    events: Vec<AttendanceEvent>,
    dedup: HashSet<(String, String, String, i64)>,
    audit: Vec<AuditRecord>,
    images: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored attendance events, in insertion order.
    pub fn events(&self) -> Vec<AttendanceEvent> {
        self.inner.lock().unwrap().events.clone()
    }

    /// Audit rows, in insertion order.
    pub fn audit_rows(&self) -> Vec<AuditRecord> {
        self.inner.lock().unwrap().audit.clone()
    }

    /// Bytes written for a photo file name, if any.
    pub fn image(&self, file_name: &str) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().images.get(file_name).cloned()
    }
}

#[async_trait]
impl GatewayStore for MemoryStore {
    async fn upsert_device_status(
        &self,
        serial: &str,
        addr: &str,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .statuses
            .entry(serial.to_string())
            .and_modify(|status| {
                status.last_seen = seen_at;
                status.online = true;
                status.addr = addr.to_string();
            })
            .or_insert_with(|| DeviceStatusRecord {
                serial: serial.to_string(),
                last_seen: seen_at,
                online: true,
                addr: addr.to_string(),
                info: DeviceInfoRecord::default(),
            });
        Ok(())
    }

    async fn update_device_info(
        &self,
        serial: &str,
        info: &DeviceInfoRecord,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(status) = inner.statuses.get_mut(serial) {
            let merged = &mut status.info;
            // COALESCE semantics: only fields the device volunteered move.
            macro_rules! merge {
                ($field:ident) => {
                    if info.$field.is_some() {
                        merged.$field = info.$field.clone();
                    }
                };
            }
            merge!(model);
            merge!(user_capacity);
            merge!(log_capacity);
            merge!(face_capacity);
            merge!(firmware);
            merge!(device_clock);
            merge!(mac);
        }
        Ok(())
    }

    async fn insert_attendance(&self, event: &AttendanceEvent) -> StorageResult<bool> {
        let key = (
            event.serial.clone(),
            event.enroll_id.clone(),
            event.log_time.clone(),
            event.verify_mode,
        );
        let mut inner = self.inner.lock().unwrap();
        if !inner.dedup.insert(key) {
            return Ok(false);
        }
        inner.events.push(event.clone());
        Ok(true)
    }

    async fn insert_audit(
        &self,
        serial: Option<&str>,
        addr: &str,
        payload: &str,
        valid: bool,
    ) -> StorageResult<()> {
        self.inner.lock().unwrap().audit.push(AuditRecord {
            serial: serial.map(str::to_string),
            addr: addr.to_string(),
            payload: payload.to_string(),
            valid,
            received_at: Utc::now(),
        });
        Ok(())
    }

    async fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let mut flipped = 0;
        for status in self.inner.lock().unwrap().statuses.values_mut() {
            if status.online && status.last_seen < cutoff {
                status.online = false;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn save_event_image(&self, file_name: &str, bytes: &[u8]) -> StorageResult<()> {
        self.inner
            .lock()
            .unwrap()
            .images
            .insert(file_name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn device_status(&self, serial: &str) -> StorageResult<Option<DeviceStatusRecord>> {
        Ok(self.inner.lock().unwrap().statuses.get(serial).cloned())
    }
}
