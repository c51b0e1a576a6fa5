//! Outbound command bridge.
//!
//! Lets callers (CLI, HTTP layer, tests) issue a server-initiated command
//! to a connected device and await its correlated reply. The bridge never
//! touches sockets directly: it looks the session up in the registry,
//! queues the document on the session's outbound channel, and parks on the
//! pending table until the reply or the deadline arrives.

use crate::pending::PendingCommands;
use crate::registry::DeviceRegistry;
use facegate_core::{Error, Result};
use facegate_protocol::{Command, command_payload};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of one bridged command.
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    /// The device's `result` flag.
    pub ok: bool,
    /// Human-readable detail from the reply (`message` or `reason`), if
    /// the device sent one.
    pub message: String,
    /// Full reply document.
    pub data: Value,
}

#[derive(Clone)]
pub struct CommandBridge {
    registry: Arc<DeviceRegistry>,
    pending: Arc<PendingCommands>,
}

impl CommandBridge {
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry>, pending: Arc<PendingCommands>) -> Self {
        Self { registry, pending }
    }

    /// Issue `command` to the device identified by `serial` and await its
    /// reply.
    ///
    /// `params` must be a JSON object (or `Value::Null`); its entries ride
    /// beside the routing keys in the outgoing document.
    ///
    /// # Errors
    /// - `Error::InvalidCommand` for device-initiated commands
    /// - `Error::DeviceOffline` when no live session exists or the session
    ///   dies before the command is queued
    /// - `Error::CommandTimeout` when the deadline passes unanswered
    pub async fn invoke(
        &self,
        serial: &str,
        command: Command,
        params: Value,
        timeout: Duration,
    ) -> Result<InvokeOutcome> {
        if command.is_device_initiated() {
            return Err(Error::InvalidCommand(format!(
                "{command} is device-initiated"
            )));
        }

        let Some(session) = self.registry.lookup(serial) else {
            return Err(Error::DeviceOffline(serial.to_string()));
        };

        let request_id = Uuid::new_v4().simple().to_string();
        let ret = command.reply_tag();
        let rx = self
            .pending
            .register(serial, ret, &request_id, Instant::now() + timeout);

        let payload = command_payload(command.as_wire(), serial, &request_id, &params);
        debug!(serial, %command, request_id, "issuing command");
        if session.outbound.send(payload).await.is_err() {
            // Connection task is gone; the registry entry is stale.
            self.pending.remove(serial, ret, &request_id);
            return Err(Error::DeviceOffline(serial.to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(data)) => {
                let ok = data.get("result").and_then(Value::as_bool).unwrap_or(false);
                let message = data
                    .get("message")
                    .or_else(|| data.get("reason"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(InvokeOutcome { ok, message, data })
            }
            // Entry evicted while we waited; treat as timed out.
            Ok(Err(_)) => Err(Error::CommandTimeout(format!("{serial}/{command}"))),
            Err(_) => {
                warn!(serial, %command, request_id, "command timed out");
                self.pending.remove(serial, ret, &request_id);
                Err(Error::CommandTimeout(format!("{serial}/{command}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::SerialNumber;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn bridge_parts() -> (Arc<DeviceRegistry>, Arc<PendingCommands>, CommandBridge) {
        let registry = Arc::new(DeviceRegistry::new());
        let pending = Arc::new(PendingCommands::new());
        let bridge = CommandBridge::new(registry.clone(), pending.clone());
        (registry, pending, bridge)
    }

    #[tokio::test]
    async fn test_invoke_offline_fails_fast() {
        let (_, _, bridge) = bridge_parts();
        let err = bridge
            .invoke("SN1", Command::OpenDoor, Value::Null, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceOffline(_)));
    }

    #[tokio::test]
    async fn test_invoke_rejects_device_initiated() {
        let (_, _, bridge) = bridge_parts();
        let err = bridge
            .invoke("SN1", Command::SendLog, Value::Null, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCommand(_)));
    }

    #[tokio::test]
    async fn test_invoke_resolves_on_correlated_reply() {
        let (registry, pending, bridge) = bridge_parts();
        let (tx, mut rx) = mpsc::channel(4);
        registry.register(
            &SerialNumber::new("SN1").unwrap(),
            "127.0.0.1:9".parse().unwrap(),
            tx,
        );

        // Echo task standing in for the device connection.
        let pending_clone = pending.clone();
        tokio::spawn(async move {
            let out = rx.recv().await.unwrap();
            let request_id = out.0["request_id"].as_str().unwrap().to_string();
            pending_clone.complete(
                "SN1",
                "opendoor",
                Some(&request_id),
                json!({"ret": "opendoor", "result": true, "request_id": request_id}),
            );
        });

        let outcome = bridge
            .invoke("SN1", Command::OpenDoor, json!({"doorindex": 1}), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.data["ret"], "opendoor");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_invoke_timeout_clears_entry() {
        let (registry, pending, bridge) = bridge_parts();
        let (tx, _rx_keepalive) = mpsc::channel(4);
        registry.register(
            &SerialNumber::new("SN1").unwrap(),
            "127.0.0.1:9".parse().unwrap(),
            tx,
        );

        let err = bridge
            .invoke("SN1", Command::Reboot, Value::Null, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimeout(_)));
        assert!(pending.is_empty());
    }
}
