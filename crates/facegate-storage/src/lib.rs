//! Persistence layer for the facegate gateway.
//!
//! The gateway's protocol path talks to storage only through the
//! [`GatewayStore`] trait: idempotent device-status upserts, dedup-keyed
//! attendance inserts, an append-only audit trail, the watchdog's
//! stale-offline projection, and event photo files.
//!
//! Two implementations:
//!
//! - [`SqliteStore`] — sqlx/SQLite, schema created on connect, dedup
//!   enforced by a unique index with `INSERT OR IGNORE`.
//! - [`MemoryStore`] — in-process maps with identical semantics, used by
//!   gateway tests and standalone runs.

pub mod error;
pub mod memory;
pub mod models;
pub mod sqlite;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use models::{AttendanceEvent, AuditRecord, DeviceInfoRecord, DeviceStatusRecord};
pub use sqlite::SqliteStore;
pub use store::GatewayStore;
