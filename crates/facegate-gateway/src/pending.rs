//! Correlation table for server-initiated commands awaiting device replies.
//!
//! Each outstanding command is keyed by (serial, reply tag, request id) and
//! holds a oneshot sender. Completion removes the entry before sending, so
//! a reply resolves a waiter at most once; duplicate or late replies find
//! no entry and are reported unclaimed.
//!
//! Older firmware does not echo `request_id`. A reply without one falls
//! back to the oldest outstanding entry with the same serial and reply
//! tag, which is correct as long as the operator does not race identical
//! commands against one device.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PendingKey {
    serial: String,
    ret: String,
    request_id: String,
}

struct PendingEntry {
    tx: oneshot::Sender<Value>,
    deadline: Instant,
}

#[derive(Default)]
pub struct PendingCommands {
    entries: Mutex<HashMap<PendingKey, PendingEntry>>,
}

impl PendingCommands {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outstanding command and return the receiver its reply
    /// will resolve.
    pub fn register(
        &self,
        serial: &str,
        ret: &str,
        request_id: &str,
        deadline: Instant,
    ) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().unwrap().insert(
            PendingKey {
                serial: serial.to_string(),
                ret: ret.to_string(),
                request_id: request_id.to_string(),
            },
            PendingEntry { tx, deadline },
        );
        rx
    }

    /// Offer a device reply to the table. Returns whether a waiter claimed
    /// it.
    pub fn complete(
        &self,
        serial: &str,
        ret: &str,
        request_id: Option<&str>,
        body: Value,
    ) -> bool {
        let entry = {
            let mut entries = self.entries.lock().unwrap();
            match request_id {
                Some(id) => entries.remove(&PendingKey {
                    serial: serial.to_string(),
                    ret: ret.to_string(),
                    request_id: id.to_string(),
                }),
                // No id echoed: oldest outstanding command with this tag.
                None => entries
                    .iter()
                    .filter(|(key, _)| key.serial == serial && key.ret == ret)
                    .min_by_key(|(_, entry)| entry.deadline)
                    .map(|(key, _)| key.clone())
                    .and_then(|key| entries.remove(&key)),
            }
        };
        match entry {
            // A send error means the waiter already gave up; the reply is
            // unclaimed either way.
            Some(entry) => entry.tx.send(body).is_ok(),
            None => false,
        }
    }

    /// Drop the entry for an abandoned command, if still present.
    pub fn remove(&self, serial: &str, ret: &str, request_id: &str) {
        self.entries.lock().unwrap().remove(&PendingKey {
            serial: serial.to_string(),
            ret: ret.to_string(),
            request_id: request_id.to_string(),
        });
    }

    /// Drop entries whose deadline has passed. Returns how many were
    /// evicted; their waiters observe a closed channel.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.deadline > now);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "expired pending commands evicted");
        }
        evicted
    }

    /// Number of outstanding commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn deadline(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_complete_resolves_exact_key() {
        let pending = PendingCommands::new();
        let rx = pending.register("SN1", "opendoor", "req-1", deadline(10));

        assert!(pending.complete("SN1", "opendoor", Some("req-1"), json!({"result": true})));
        assert_eq!(rx.await.unwrap()["result"], true);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_reply_is_unclaimed() {
        let pending = PendingCommands::new();
        let _rx = pending.register("SN1", "reboot", "req-1", deadline(10));

        assert!(pending.complete("SN1", "reboot", Some("req-1"), json!({})));
        assert!(!pending.complete("SN1", "reboot", Some("req-1"), json!({})));
    }

    #[tokio::test]
    async fn test_reply_without_id_claims_oldest() {
        let pending = PendingCommands::new();
        let rx_old = pending.register("SN1", "opendoor", "req-1", deadline(5));
        let rx_new = pending.register("SN1", "opendoor", "req-2", deadline(10));

        assert!(pending.complete("SN1", "opendoor", None, json!({"n": 1})));
        assert_eq!(rx_old.await.unwrap()["n"], 1);

        assert!(pending.complete("SN1", "opendoor", None, json!({"n": 2})));
        assert_eq!(rx_new.await.unwrap()["n"], 2);
    }

    #[tokio::test]
    async fn test_wrong_serial_or_tag_never_matches() {
        let pending = PendingCommands::new();
        let _rx = pending.register("SN1", "opendoor", "req-1", deadline(10));

        assert!(!pending.complete("SN2", "opendoor", Some("req-1"), json!({})));
        assert!(!pending.complete("SN1", "reboot", Some("req-1"), json!({})));
        assert!(!pending.complete("SN1", "reboot", None, json!({})));
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_evict_expired_closes_waiters() {
        let pending = PendingCommands::new();
        let rx = pending.register("SN1", "cleanlog", "req-1", Instant::now());
        let _live = pending.register("SN1", "cleanlog", "req-2", deadline(60));

        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(pending.evict_expired(Instant::now()), 1);
        assert_eq!(pending.len(), 1);
        assert!(rx.await.is_err());
    }
}
