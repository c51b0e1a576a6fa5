//! Per-connection message dispatch.
//!
//! One [`ConnState`] lives inside each connection task. The dispatcher is
//! shared; it owns the registry, the pending-command table and the store,
//! and maps every decoded [`FrameEvent`] to at most one immediate reply.
//!
//! # Persistence is fire-and-forget
//!
//! Handlers compute their reply from in-memory state and validation alone,
//! then hand writes to spawned tasks. A slow or failing database degrades
//! durability, never protocol latency; failures are logged and audited,
//! not surfaced to the device.
//!
//! # Session binding
//!
//! `reg` binds a connection to a serial. Heartbeats and log pushes from a
//! device that skipped `reg` (common after gateway restarts, the device
//! still believes it is registered) bind implicitly. Other pushes
//! (`senduser`, `sendqrcode`) are acknowledged and audited only; they
//! never touch session or status state.

use crate::registry::DeviceRegistry;
use crate::pending::PendingCommands;
use chrono::Utc;
use facegate_core::constants::MAX_PLACEHOLDER_ENROLL_LEN;
use facegate_core::{CloudTime, SerialNumber};
use facegate_protocol::{
    Command, CommandName, FrameEvent, Inbound, Outbound, RegRequest, SendLogRequest, clamp_field,
    clamp_field_to, image_file_name, validate_image, validate_serial,
};
use facegate_storage::{AttendanceEvent, DeviceInfoRecord, GatewayStore, StorageResult};
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Reason code devices understand in a `sendlog` rejection: bad or
/// incomplete record data. The device will retry the batch.
const REJECT_BAD_RECORD: u8 = 1;

/// Mutable per-connection state.
pub struct ConnState {
    pub(crate) addr: SocketAddr,
    pub(crate) outbound: mpsc::Sender<Outbound>,
    authenticated: bool,
    serial: Option<SerialNumber>,
    conn_id: Option<u64>,
}

impl ConnState {
    #[must_use]
    pub fn new(addr: SocketAddr, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            addr,
            outbound,
            authenticated: false,
            serial: None,
            conn_id: None,
        }
    }

    /// Serial this connection is bound to, once registered.
    #[must_use]
    pub fn serial(&self) -> Option<&SerialNumber> {
        self.serial.as_ref()
    }
}

pub struct Dispatcher {
    store: Arc<dyn GatewayStore>,
    registry: Arc<DeviceRegistry>,
    pending: Arc<PendingCommands>,
    auth_token: Option<String>,
    grant_access: bool,
    access_message: String,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        store: Arc<dyn GatewayStore>,
        registry: Arc<DeviceRegistry>,
        pending: Arc<PendingCommands>,
        auth_token: Option<String>,
        grant_access: bool,
        access_message: String,
    ) -> Self {
        Self {
            store,
            registry,
            pending,
            auth_token,
            grant_access,
            access_message,
        }
    }

    /// Handle one decoded frame; returns the immediate reply, if any.
    pub async fn dispatch(&self, state: &mut ConnState, event: FrameEvent) -> Option<Outbound> {
        match event {
            FrameEvent::Invalid { reason, raw } => {
                debug!(addr = %state.addr, reason, "undecodable frame");
                self.spawn_audit(state, raw, false);
                Some(Outbound::bad_request(&reason))
            }
            FrameEvent::Message(inbound) => {
                self.spawn_audit(state, inbound.body().to_string(), true);
                match inbound {
                    Inbound::Request { cmd, sn, body } => {
                        self.dispatch_request(state, cmd, sn, body).await
                    }
                    Inbound::Reply {
                        ret,
                        request_id,
                        body,
                        ..
                    } => {
                        self.dispatch_reply(state, &ret, request_id.as_deref(), body);
                        None
                    }
                }
            }
        }
    }

    /// Release this connection's session binding, if it still owns it.
    pub fn finish(&self, state: &ConnState) {
        if let (Some(serial), Some(conn_id)) = (&state.serial, state.conn_id) {
            self.registry.unregister_if_current(serial.as_str(), conn_id);
        }
    }

    async fn dispatch_request(
        &self,
        state: &mut ConnState,
        cmd: CommandName,
        sn: Option<String>,
        body: Value,
    ) -> Option<Outbound> {
        if !self.check_auth(state, &body) {
            warn!(addr = %state.addr, %cmd, "request on unauthenticated connection");
            return Some(Outbound::auth_required());
        }

        match cmd {
            CommandName::Known(Command::Reg) => Some(self.handle_reg(state, body)),
            CommandName::Known(Command::Heartbeat) => Some(self.handle_heartbeat(state, sn)),
            CommandName::Known(Command::SendLog) => Some(self.handle_sendlog(state, body)),
            CommandName::Known(cmd @ (Command::SendUser | Command::SendQrCode)) => {
                Some(Outbound::info_ack(cmd.as_wire()))
            }
            // Server-initiated names arriving as requests, and anything
            // outside the vocabulary, get an explicit echo rejection.
            CommandName::Known(cmd) => {
                debug!(addr = %state.addr, %cmd, "server-initiated command from device");
                Some(Outbound::not_implemented(cmd.as_wire()))
            }
            CommandName::Unknown(name) => {
                debug!(addr = %state.addr, cmd = %name, "unknown command");
                Some(Outbound::not_implemented(&name))
            }
        }
    }

    fn dispatch_reply(
        &self,
        state: &ConnState,
        ret: &str,
        request_id: Option<&str>,
        body: Value,
    ) {
        // Replies are only claimable on a connection bound to a device.
        let serial = match state.serial.as_ref().map(SerialNumber::as_str) {
            Some(serial) => serial,
            None => {
                warn!(addr = %state.addr, ret, "reply from unbound connection dropped");
                return;
            }
        };
        if !self.pending.complete(serial, ret, request_id, body) {
            // Unclaimed replies are already in the audit trail; drop.
            warn!(serial, ret, ?request_id, "unclaimed reply dropped");
        }
    }

    fn handle_reg(&self, state: &mut ConnState, body: Value) -> Outbound {
        let req: RegRequest = match serde_json::from_value(body) {
            Ok(req) => req,
            Err(e) => return Outbound::bad_request(&format!("malformed reg: {e}")),
        };
        let serial = match validate_serial(&req.sn) {
            Ok(serial) => serial,
            Err(e) => return Outbound::bad_request(&e.to_string()),
        };

        self.bind_session(state, &serial);

        // The info merge only lands on an existing status row, so both
        // writes ride one task: upsert first, then merge.
        let record = req.devinfo.map(|devinfo| DeviceInfoRecord {
            model: devinfo.modelname.as_deref().map(clamp_field),
            user_capacity: devinfo.usersize,
            log_capacity: devinfo.logsize,
            face_capacity: devinfo.facesize,
            firmware: devinfo.firmware.as_deref().map(clamp_field),
            device_clock: devinfo.time.as_deref().map(clamp_field),
            mac: devinfo.mac.as_deref().map(clamp_field),
        });
        let store = self.store.clone();
        let serial_owned = serial.as_str().to_string();
        let addr = state.addr.to_string();
        spawn_persist(async move {
            store
                .upsert_device_status(&serial_owned, &addr, Utc::now())
                .await?;
            if let Some(record) = record {
                store.update_device_info(&serial_owned, &record).await?;
            }
            Ok(())
        });

        info!(serial = %serial, addr = %state.addr, "device registered");
        Outbound::reg_ack(serial.as_str(), &CloudTime::now())
    }

    fn handle_heartbeat(&self, state: &mut ConnState, sn: Option<String>) -> Outbound {
        let Some(sn) = sn else {
            return Outbound::bad_request("heartbeat missing sn");
        };
        let serial = match validate_serial(&sn) {
            Ok(serial) => serial,
            Err(e) => return Outbound::bad_request(&e.to_string()),
        };

        self.bind_session(state, &serial);
        self.spawn_status_upsert(&serial, state.addr);
        Outbound::heartbeat_ack(serial.as_str(), &CloudTime::now())
    }

    fn handle_sendlog(&self, state: &mut ConnState, body: Value) -> Outbound {
        let req: SendLogRequest = match serde_json::from_value(body.clone()) {
            Ok(req) => req,
            Err(e) => return Outbound::bad_request(&format!("malformed sendlog: {e}")),
        };
        let serial = match validate_serial(&req.sn) {
            Ok(serial) => serial,
            Err(e) => return Outbound::bad_request(&e.to_string()),
        };

        self.bind_session(state, &serial);
        self.spawn_status_upsert(&serial, state.addr);

        // A record without a timestamp has no event identity; the whole
        // batch is rejected so the device resends it intact.
        if req.record.iter().any(|record| record.time().is_none()) {
            warn!(serial = %serial, "sendlog batch rejected: record missing time");
            return Outbound::sendlog_reject(REJECT_BAD_RECORD);
        }

        let raw_records = body.get("record").and_then(Value::as_array);
        for (index, record) in req.record.iter().enumerate() {
            let time = record.time().unwrap_or_default().to_string();
            let enroll_id = record.enroll_id().unwrap_or_else(|| {
                clamp_field_to(&format!("anon-{time}"), MAX_PLACEHOLDER_ENROLL_LEN)
            });

            let image_file = record.image.as_deref().and_then(|encoded| {
                match validate_image(encoded) {
                    Ok(bytes) => {
                        let file_name = image_file_name(&serial, &enroll_id, &time);
                        let store = self.store.clone();
                        let name = file_name.clone();
                        spawn_persist(async move { store.save_event_image(&name, &bytes).await });
                        Some(file_name)
                    }
                    Err(e) => {
                        warn!(serial = %serial, error = %e, "event photo rejected");
                        None
                    }
                }
            });

            let event = AttendanceEvent {
                serial: serial.as_str().to_string(),
                enroll_id,
                log_time: time,
                verify_mode: record.mode.unwrap_or(0),
                in_out: record.inout.unwrap_or(0),
                event_code: record.event.unwrap_or(0),
                temperature: record.temp,
                image_file,
                raw: raw_records
                    .and_then(|records| records.get(index))
                    .map(Value::to_string)
                    .unwrap_or_default(),
            };
            let store = self.store.clone();
            spawn_persist(async move {
                let stored = store.insert_attendance(&event).await?;
                if !stored {
                    debug!(
                        serial = %event.serial, enroll_id = %event.enroll_id,
                        "duplicate attendance event ignored"
                    );
                }
                Ok(())
            });
        }

        let count = if req.count != 0 {
            req.count
        } else {
            req.record.len() as u64
        };
        Outbound::sendlog_ack(
            count,
            req.logindex,
            &CloudTime::now(),
            self.grant_access,
            &self.access_message,
        )
    }

    /// Bind this connection to `serial`, registering or refreshing the
    /// session as needed.
    fn bind_session(&self, state: &mut ConnState, serial: &SerialNumber) {
        let still_current = state.serial.as_ref() == Some(serial)
            && state.conn_id.is_some_and(|id| {
                self.registry
                    .lookup(serial.as_str())
                    .is_some_and(|session| session.conn_id == id)
            });
        if still_current {
            self.registry.touch(serial.as_str());
            return;
        }

        // A connection announcing a new serial releases its old binding.
        if let (Some(old), Some(id)) = (&state.serial, state.conn_id)
            && old != serial
        {
            self.registry.unregister_if_current(old.as_str(), id);
        }

        let conn_id = self
            .registry
            .register(serial, state.addr, state.outbound.clone());
        state.serial = Some(serial.clone());
        state.conn_id = Some(conn_id);
    }

    /// Token check on unauthenticated connections. A correct token flips
    /// the connection authenticated; with auth disabled everything passes.
    fn check_auth(&self, state: &mut ConnState, body: &Value) -> bool {
        let Some(expected) = &self.auth_token else {
            return true;
        };
        if state.authenticated {
            return true;
        }
        let presented = body.get("token").and_then(Value::as_str);
        if presented == Some(expected.as_str()) {
            state.authenticated = true;
            true
        } else {
            false
        }
    }

    fn spawn_status_upsert(&self, serial: &SerialNumber, addr: SocketAddr) {
        let store = self.store.clone();
        let serial = serial.as_str().to_string();
        let addr = addr.to_string();
        spawn_persist(async move { store.upsert_device_status(&serial, &addr, Utc::now()).await });
    }

    fn spawn_audit(&self, state: &ConnState, payload: String, valid: bool) {
        let store = self.store.clone();
        let serial = state.serial.as_ref().map(|s| s.as_str().to_string());
        let addr = state.addr.to_string();
        spawn_persist(async move {
            store
                .insert_audit(serial.as_deref(), &addr, &payload, valid)
                .await
        });
    }
}

fn spawn_persist<F>(task: F)
where
    F: Future<Output = StorageResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = task.await {
            warn!(error = %e, "persistence task failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_storage::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<DeviceRegistry>,
        pending: Arc<PendingCommands>,
        dispatcher: Dispatcher,
    }

    fn fixture(auth_token: Option<&str>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(DeviceRegistry::new());
        let pending = Arc::new(PendingCommands::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            registry.clone(),
            pending.clone(),
            auth_token.map(str::to_string),
            true,
            "ok".to_string(),
        );
        Fixture {
            store,
            registry,
            pending,
            dispatcher,
        }
    }

    fn conn_state() -> ConnState {
        ConnState::new("127.0.0.1:40001".parse().unwrap(), mpsc::channel(8).0)
    }

    fn message(doc: Value) -> FrameEvent {
        FrameEvent::Message(Inbound::classify(doc).unwrap())
    }

    /// Persistence is spawned; poll until the store catches up.
    async fn settle<F: Fn() -> bool>(check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("store never settled");
    }

    #[tokio::test]
    async fn test_reg_binds_session_and_acks() {
        let fx = fixture(None);
        let mut state = conn_state();

        let reply = fx
            .dispatcher
            .dispatch(
                &mut state,
                message(json!({
                    "cmd": "reg",
                    "sn": "FACE-1",
                    "devinfo": {"modelname": "FG-8", "firmware": "v2.1"},
                })),
            )
            .await
            .unwrap();

        assert_eq!(reply.0["ret"], "reg");
        assert_eq!(reply.0["result"], true);
        assert_eq!(reply.0["nosenduser"], true);
        assert!(fx.registry.is_online("FACE-1"));
        assert_eq!(state.serial().unwrap().as_str(), "FACE-1");

        let store = fx.store.clone();
        settle(|| {
            // Upsert and info merge both landed.
            futures::executor::block_on(store.device_status("FACE-1"))
                .unwrap()
                .is_some_and(|s| s.online && s.info.model.as_deref() == Some("FG-8"))
        })
        .await;
    }

    #[tokio::test]
    async fn test_heartbeat_implicitly_registers() {
        let fx = fixture(None);
        let mut state = conn_state();

        let reply = fx
            .dispatcher
            .dispatch(&mut state, message(json!({"cmd": "heartbeat", "sn": "HB-1"})))
            .await
            .unwrap();
        assert_eq!(reply.0["ret"], "heartbeat");
        assert!(reply.0["cloudtime"].is_string());
        assert!(fx.registry.is_online("HB-1"));
    }

    #[tokio::test]
    async fn test_heartbeat_without_sn_is_bad_request() {
        let fx = fixture(None);
        let mut state = conn_state();
        let reply = fx
            .dispatcher
            .dispatch(&mut state, message(json!({"cmd": "heartbeat"})))
            .await
            .unwrap();
        assert_eq!(reply.0["ret"], "error");
        assert_eq!(reply.0["result"], false);
    }

    #[tokio::test]
    async fn test_senduser_acked_without_session_binding() {
        let fx = fixture(None);
        let mut state = conn_state();
        let reply = fx
            .dispatcher
            .dispatch(
                &mut state,
                message(json!({"cmd": "senduser", "sn": "SU-1", "enrollid": 5})),
            )
            .await
            .unwrap();
        assert_eq!(reply.0["ret"], "senduser");
        assert_eq!(reply.0["result"], true);

        // Acknowledged and audited only; no session, no status row.
        assert!(!fx.registry.is_online("SU-1"));
        assert!(state.serial().is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fx.store.device_status("SU-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_reg_persists_devinfo() {
        let fx = fixture(None);
        let mut state = conn_state();
        fx.dispatcher
            .dispatch(
                &mut state,
                message(json!({
                    "cmd": "reg",
                    "sn": "NEW-1",
                    "devinfo": {"firmware": "v3.0", "usersize": 3000},
                })),
            )
            .await
            .unwrap();

        // The status upsert and the info merge ride one task, so the very
        // first registration must land its devinfo.
        let store = fx.store.clone();
        settle(|| {
            futures::executor::block_on(store.device_status("NEW-1"))
                .unwrap()
                .is_some_and(|s| {
                    s.info.firmware.as_deref() == Some("v3.0") && s.info.user_capacity == Some(3000)
                })
        })
        .await;
    }

    #[tokio::test]
    async fn test_sendlog_stores_and_dedups() {
        let fx = fixture(None);
        let mut state = conn_state();
        let batch = json!({
            "cmd": "sendlog",
            "sn": "LOG-1",
            "count": 2,
            "logindex": 7,
            "record": [
                {"enrollid": 3, "time": "2026-08-30 09:00:00", "mode": 4, "inout": 0, "event": 0, "temp": 36.4},
                {"enrollid": "9", "time": "2026-08-30 09:00:05", "mode": 1, "inout": 1, "event": 0},
            ],
        });

        let reply = fx
            .dispatcher
            .dispatch(&mut state, message(batch.clone()))
            .await
            .unwrap();
        assert_eq!(reply.0["ret"], "sendlog");
        assert_eq!(reply.0["result"], true);
        assert_eq!(reply.0["count"], 2);
        assert_eq!(reply.0["logindex"], 7);
        assert_eq!(reply.0["access"], 1);

        let store = fx.store.clone();
        settle(move || store.events().len() == 2).await;

        // Redelivered batch still acks but stores nothing new.
        let reply = fx.dispatcher.dispatch(&mut state, message(batch)).await.unwrap();
        assert_eq!(reply.0["result"], true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.store.events().len(), 2);

        let events = fx.store.events();
        assert_eq!(events[0].enroll_id, "3");
        assert_eq!(events[0].temperature, Some(36.4));
        assert!(events[0].raw.contains("2026-08-30 09:00:00"));
    }

    #[tokio::test]
    async fn test_sendlog_missing_time_rejects_batch() {
        let fx = fixture(None);
        let mut state = conn_state();
        let reply = fx
            .dispatcher
            .dispatch(
                &mut state,
                message(json!({
                    "cmd": "sendlog",
                    "sn": "LOG-1",
                    "record": [
                        {"enrollid": 1, "time": "2026-08-30 09:00:00"},
                        {"enrollid": 2},
                    ],
                })),
            )
            .await
            .unwrap();

        assert_eq!(reply.0["ret"], "sendlog");
        assert_eq!(reply.0["result"], false);
        assert_eq!(reply.0["reason"], 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fx.store.events().is_empty());
    }

    #[tokio::test]
    async fn test_sendlog_missing_enrollid_gets_placeholder() {
        let fx = fixture(None);
        let mut state = conn_state();
        fx.dispatcher
            .dispatch(
                &mut state,
                message(json!({
                    "cmd": "sendlog",
                    "sn": "LOG-1",
                    "record": [{"time": "2026-08-30 09:00:00"}],
                })),
            )
            .await
            .unwrap();

        let store = fx.store.clone();
        settle(move || store.events().len() == 1).await;
        let enroll = fx.store.events()[0].enroll_id.clone();
        assert!(enroll.starts_with("anon-"));
        assert!(enroll.chars().count() <= MAX_PLACEHOLDER_ENROLL_LEN);
    }

    #[tokio::test]
    async fn test_auth_gates_first_request() {
        let fx = fixture(Some("secret"));
        let mut state = conn_state();

        let reply = fx
            .dispatcher
            .dispatch(&mut state, message(json!({"cmd": "reg", "sn": "A-1"})))
            .await
            .unwrap();
        assert_eq!(reply.0["reason"], "authentication required");
        assert!(!fx.registry.is_online("A-1"));

        let reply = fx
            .dispatcher
            .dispatch(
                &mut state,
                message(json!({"cmd": "reg", "sn": "A-1", "token": "secret"})),
            )
            .await
            .unwrap();
        assert_eq!(reply.0["ret"], "reg");
        assert!(fx.registry.is_online("A-1"));

        // Subsequent requests on the connection need no token.
        let reply = fx
            .dispatcher
            .dispatch(&mut state, message(json!({"cmd": "heartbeat", "sn": "A-1"})))
            .await
            .unwrap();
        assert_eq!(reply.0["ret"], "heartbeat");
    }

    #[tokio::test]
    async fn test_unknown_command_echoed_not_implemented() {
        let fx = fixture(None);
        let mut state = conn_state();
        let reply = fx
            .dispatcher
            .dispatch(&mut state, message(json!({"cmd": "formatdisk", "sn": "X-1"})))
            .await
            .unwrap();
        assert_eq!(reply.0["ret"], "formatdisk");
        assert_eq!(reply.0["result"], false);
    }

    #[tokio::test]
    async fn test_reply_claims_pending_entry() {
        let fx = fixture(None);
        let mut state = conn_state();
        fx.dispatcher
            .dispatch(&mut state, message(json!({"cmd": "reg", "sn": "DEV-1"})))
            .await;

        let rx = fx.pending.register(
            "DEV-1",
            "opendoor",
            "req-1",
            std::time::Instant::now() + Duration::from_secs(5),
        );
        let reply = fx
            .dispatcher
            .dispatch(
                &mut state,
                message(json!({"ret": "opendoor", "result": true, "request_id": "req-1"})),
            )
            .await;
        assert!(reply.is_none());
        assert_eq!(rx.await.unwrap()["result"], true);
    }

    #[tokio::test]
    async fn test_invalid_frame_audited_and_answered() {
        let fx = fixture(None);
        let mut state = conn_state();
        let reply = fx
            .dispatcher
            .dispatch(
                &mut state,
                FrameEvent::Invalid {
                    reason: "invalid JSON".to_string(),
                    raw: "{broken".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(reply.0["ret"], "error");

        let store = fx.store.clone();
        settle(move || {
            store
                .audit_rows()
                .iter()
                .any(|row| !row.valid && row.payload == "{broken")
        })
        .await;
    }

    #[tokio::test]
    async fn test_finish_releases_only_current_binding() {
        let fx = fixture(None);
        let mut state = conn_state();
        fx.dispatcher
            .dispatch(&mut state, message(json!({"cmd": "reg", "sn": "R-1"})))
            .await;

        // A reconnect takes over the serial before the old task finishes.
        let mut state2 = conn_state();
        fx.dispatcher
            .dispatch(&mut state2, message(json!({"cmd": "reg", "sn": "R-1"})))
            .await;

        fx.dispatcher.finish(&state);
        assert!(fx.registry.is_online("R-1"));

        fx.dispatcher.finish(&state2);
        assert!(!fx.registry.is_online("R-1"));
    }
}
