//! SQLite-backed [`GatewayStore`] implementation.
//!
//! Schema is created on connect with `CREATE TABLE IF NOT EXISTS`; event
//! dedup is enforced by a unique index and `INSERT OR IGNORE`, so
//! re-delivered log batches are no-ops at the database level rather than
//! application-level bookkeeping.

use crate::error::{StorageError, StorageResult};
use crate::models::{AttendanceEvent, DeviceInfoRecord, DeviceStatusRecord};
use crate::store::GatewayStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS device_status (
    serial        TEXT PRIMARY KEY,
    last_seen     TEXT NOT NULL,
    online        INTEGER NOT NULL DEFAULT 0,
    addr          TEXT NOT NULL DEFAULT '',
    model         TEXT,
    user_capacity INTEGER,
    log_capacity  INTEGER,
    face_capacity INTEGER,
    firmware      TEXT,
    device_clock  TEXT,
    mac           TEXT
);

CREATE TABLE IF NOT EXISTS attendance_events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    serial      TEXT NOT NULL,
    enroll_id   TEXT NOT NULL,
    log_time    TEXT NOT NULL,
    verify_mode INTEGER NOT NULL,
    in_out      INTEGER NOT NULL DEFAULT 0,
    event_code  INTEGER NOT NULL DEFAULT 0,
    temperature REAL,
    image_file  TEXT,
    raw         TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_dedup
    ON attendance_events (serial, enroll_id, log_time, verify_mode);

CREATE TABLE IF NOT EXISTS audit_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    serial      TEXT,
    addr        TEXT NOT NULL,
    payload     TEXT NOT NULL,
    valid       INTEGER NOT NULL,
    received_at TEXT NOT NULL
);
"#;

/// SQLite store with an optional directory for event photos.
pub struct SqliteStore {
    pool: SqlitePool,
    images_dir: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (creating if missing) a database file and initialize schema.
    pub async fn connect(path: impl AsRef<Path>) -> StorageResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// In-memory database, primarily for tests.
    pub async fn in_memory() -> StorageResult<Self> {
        // A single connection keeps the shared in-memory database alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> StorageResult<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
            images_dir: None,
        })
    }

    /// Set the directory event photos are written under. Without one,
    /// validated images are dropped (validation still ran).
    #[must_use]
    pub fn with_images_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.images_dir = Some(dir.into());
        self
    }

    /// Access the underlying pool (tests, maintenance jobs).
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl GatewayStore for SqliteStore {
    async fn upsert_device_status(
        &self,
        serial: &str,
        addr: &str,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO device_status (serial, last_seen, online, addr)
            VALUES (?, ?, 1, ?)
            ON CONFLICT (serial) DO UPDATE SET
                last_seen = excluded.last_seen,
                online = 1,
                addr = excluded.addr
            "#,
        )
        .bind(serial)
        .bind(seen_at.to_rfc3339())
        .bind(addr)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_device_info(
        &self,
        serial: &str,
        info: &DeviceInfoRecord,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE device_status SET
                model = COALESCE(?, model),
                user_capacity = COALESCE(?, user_capacity),
                log_capacity = COALESCE(?, log_capacity),
                face_capacity = COALESCE(?, face_capacity),
                firmware = COALESCE(?, firmware),
                device_clock = COALESCE(?, device_clock),
                mac = COALESCE(?, mac)
            WHERE serial = ?
            "#,
        )
        .bind(&info.model)
        .bind(info.user_capacity)
        .bind(info.log_capacity)
        .bind(info.face_capacity)
        .bind(&info.firmware)
        .bind(&info.device_clock)
        .bind(&info.mac)
        .bind(serial)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_attendance(&self, event: &AttendanceEvent) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO attendance_events
                (serial, enroll_id, log_time, verify_mode, in_out,
                 event_code, temperature, image_file, raw, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.serial)
        .bind(&event.enroll_id)
        .bind(&event.log_time)
        .bind(event.verify_mode)
        .bind(event.in_out)
        .bind(event.event_code)
        .bind(event.temperature)
        .bind(&event.image_file)
        .bind(&event.raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_audit(
        &self,
        serial: Option<&str>,
        addr: &str,
        payload: &str,
        valid: bool,
    ) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO audit_log (serial, addr, payload, valid, received_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(serial)
        .bind(addr)
        .bind(payload)
        .bind(valid)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        // RFC 3339 UTC strings compare lexicographically in time order.
        let result = sqlx::query("UPDATE device_status SET online = 0 WHERE online = 1 AND last_seen < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn save_event_image(&self, file_name: &str, bytes: &[u8]) -> StorageResult<()> {
        let Some(dir) = &self.images_dir else {
            debug!(file_name, "no images directory configured, dropping photo");
            return Ok(());
        };
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join(file_name), bytes).await?;
        Ok(())
    }

    async fn device_status(&self, serial: &str) -> StorageResult<Option<DeviceStatusRecord>> {
        let Some(row) = sqlx::query("SELECT * FROM device_status WHERE serial = ?")
            .bind(serial)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let last_seen: String = row.try_get("last_seen")?;
        let last_seen = DateTime::parse_from_rfc3339(&last_seen)
            .map_err(|e| StorageError::Config(format!("bad last_seen timestamp: {e}")))?
            .with_timezone(&Utc);

        Ok(Some(DeviceStatusRecord {
            serial: row.try_get("serial")?,
            last_seen,
            online: row.try_get::<i64, _>("online")? != 0,
            addr: row.try_get("addr")?,
            info: DeviceInfoRecord {
                model: row.try_get("model")?,
                user_capacity: row.try_get("user_capacity")?,
                log_capacity: row.try_get("log_capacity")?,
                face_capacity: row.try_get("face_capacity")?,
                firmware: row.try_get("firmware")?,
                device_clock: row.try_get("device_clock")?,
                mac: row.try_get("mac")?,
            },
        }))
    }
}
