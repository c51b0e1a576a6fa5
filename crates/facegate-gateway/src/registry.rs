//! Live device session registry.
//!
//! Maps a device serial to its single live session. Registration is
//! last-writer-wins: a reconnecting device replaces its stale entry, which
//! matters because terminals routinely drop TCP without FIN and reconnect
//! before the old socket times out. Unregistration is conditional on the
//! connection id so a late-dying old task never evicts the new session.
//!
//! All maps use `std::sync::Mutex` sharded by serial hash; no lock is held
//! across an await point.

use chrono::{DateTime, Utc};
use facegate_core::SerialNumber;
use facegate_protocol::Outbound;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

const SHARD_COUNT: usize = 16;

struct SessionEntry {
    conn_id: u64,
    addr: SocketAddr,
    outbound: mpsc::Sender<Outbound>,
    connected_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Cheap handle to a live session, for sending it a document.
#[derive(Clone)]
pub struct SessionHandle {
    pub conn_id: u64,
    pub outbound: mpsc::Sender<Outbound>,
}

/// Read-only session snapshot for monitoring.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub serial: String,
    pub addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

pub struct DeviceRegistry {
    shards: Vec<Mutex<HashMap<String, SessionEntry>>>,
    next_conn_id: AtomicU64,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    fn shard(&self, serial: &str) -> &Mutex<HashMap<String, SessionEntry>> {
        let mut hasher = DefaultHasher::new();
        serial.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Register a session for `serial`, replacing any existing one.
    /// Returns the new connection id.
    pub fn register(
        &self,
        serial: &SerialNumber,
        addr: SocketAddr,
        outbound: mpsc::Sender<Outbound>,
    ) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let previous = self.shard(serial.as_str()).lock().unwrap().insert(
            serial.as_str().to_string(),
            SessionEntry {
                conn_id,
                addr,
                outbound,
                connected_at: now,
                last_seen: now,
            },
        );
        match previous {
            Some(old) => info!(
                serial = %serial, %addr, old_addr = %old.addr,
                "session replaced by reconnect"
            ),
            None => info!(serial = %serial, %addr, "session registered"),
        }
        conn_id
    }

    /// Refresh a session's last-seen time. No-op for unknown serials.
    pub fn touch(&self, serial: &str) {
        if let Some(entry) = self.shard(serial).lock().unwrap().get_mut(serial) {
            entry.last_seen = Utc::now();
        }
    }

    /// Remove the session for `serial` only if `conn_id` still owns it.
    /// Returns whether an entry was removed.
    pub fn unregister_if_current(&self, serial: &str, conn_id: u64) -> bool {
        let mut shard = self.shard(serial).lock().unwrap();
        match shard.get(serial) {
            Some(entry) if entry.conn_id == conn_id => {
                shard.remove(serial);
                debug!(serial, conn_id, "session unregistered");
                true
            }
            _ => false,
        }
    }

    /// Look up the live session for `serial`.
    #[must_use]
    pub fn lookup(&self, serial: &str) -> Option<SessionHandle> {
        self.shard(serial).lock().unwrap().get(serial).map(|entry| SessionHandle {
            conn_id: entry.conn_id,
            outbound: entry.outbound.clone(),
        })
    }

    /// Whether `serial` has a live session.
    #[must_use]
    pub fn is_online(&self, serial: &str) -> bool {
        self.shard(serial).lock().unwrap().contains_key(serial)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all live sessions.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions = Vec::new();
        for shard in &self.shards {
            for (serial, entry) in shard.lock().unwrap().iter() {
                sessions.push(SessionInfo {
                    serial: serial.clone(),
                    addr: entry.addr,
                    connected_at: entry.connected_at,
                    last_seen: entry.last_seen,
                });
            }
        }
        sessions
    }
}
