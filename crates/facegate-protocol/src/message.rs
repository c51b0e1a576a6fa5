//! Message model: classification of inbound JSON and reply builders.
//!
//! Every inbound document is either a *request* (carries `"cmd"`) or a
//! *reply* to a server-initiated command (carries `"ret"`). Classification
//! keeps the raw [`serde_json::Value`] alongside the extracted routing
//! fields so handlers can deserialize typed payloads on demand and the
//! audit trail can record the payload verbatim.
//!
//! Reply builders produce the exact wire shapes the protocol expects:
//!
//! ```text
//! {"cmd":"reg",...}       -> {"ret":"reg","result":true,"sn":..,"cloudtime":..,"nosenduser":true}
//! {"cmd":"heartbeat",...} -> {"ret":"heartbeat","result":true,"sn":..,"cloudtime":..}
//! {"cmd":"sendlog",...}   -> {"ret":"sendlog","result":true,"count":..,"logindex":..,
//!                             "cloudtime":..,"access":..,"message":..}
//! ```

use crate::commands::CommandName;
use facegate_core::{CloudTime, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A classified inbound message.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Device-initiated request (`"cmd"`-bearing).
    Request {
        cmd: CommandName,
        sn: Option<String>,
        body: Value,
    },
    /// Reply to a server-initiated command (`"ret"`-bearing).
    Reply {
        ret: String,
        result: bool,
        request_id: Option<String>,
        body: Value,
    },
}

impl Inbound {
    /// Classify a decoded JSON document.
    ///
    /// # Errors
    /// Returns `Error::InvalidMessageFormat` if the document is not an
    /// object or carries neither `"cmd"` nor `"ret"`.
    pub fn classify(body: Value) -> Result<Self> {
        let obj = body
            .as_object()
            .ok_or_else(|| Error::InvalidMessageFormat("not a JSON object".to_string()))?;

        if let Some(ret) = obj.get("ret").and_then(Value::as_str) {
            let ret = ret.to_string();
            let result = obj.get("result").and_then(Value::as_bool).unwrap_or(false);
            let request_id = obj
                .get("request_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(Inbound::Reply {
                ret,
                result,
                request_id,
                body,
            });
        }

        if let Some(cmd) = obj.get("cmd").and_then(Value::as_str) {
            let cmd = CommandName::parse(cmd);
            let sn = obj.get("sn").and_then(Value::as_str).map(str::to_string);
            return Ok(Inbound::Request { cmd, sn, body });
        }

        Err(Error::InvalidMessageFormat(
            "missing cmd and ret keys".to_string(),
        ))
    }

    /// The raw JSON document this message was classified from.
    #[must_use]
    pub fn body(&self) -> &Value {
        match self {
            Inbound::Request { body, .. } | Inbound::Reply { body, .. } => body,
        }
    }
}

/// Device-info sub-record supplied opportunistically on `reg`.
///
/// Every field is optional; devices of different firmware generations send
/// different subsets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub modelname: Option<String>,
    #[serde(default)]
    pub usersize: Option<i64>,
    #[serde(default)]
    pub logsize: Option<i64>,
    #[serde(default)]
    pub facesize: Option<i64>,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
}

/// Typed `reg` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RegRequest {
    pub sn: String,
    #[serde(default)]
    pub devinfo: Option<DeviceInfo>,
    #[serde(default)]
    pub token: Option<String>,
}

/// Typed `sendlog` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SendLogRequest {
    pub sn: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub logindex: i64,
    #[serde(default)]
    pub record: Vec<LogRecord>,
}

/// One attendance record inside a `sendlog` batch.
#[derive(Debug, Clone, Deserialize)]
pub struct LogRecord {
    /// Enrollment id; devices send numbers or strings interchangeably.
    #[serde(default)]
    pub enrollid: Option<Value>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub mode: Option<i64>,
    #[serde(default)]
    pub inout: Option<i64>,
    #[serde(default)]
    pub event: Option<i64>,
    #[serde(default)]
    pub temp: Option<f64>,
    /// Base64 JPEG event photo.
    #[serde(default)]
    pub image: Option<String>,
}

impl LogRecord {
    /// Enrollment id normalized to a string, if present and non-empty.
    #[must_use]
    pub fn enroll_id(&self) -> Option<String> {
        match &self.enrollid {
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Device-supplied timestamp, if present and non-empty.
    #[must_use]
    pub fn time(&self) -> Option<&str> {
        self.time.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// An outbound JSON document, ready for a transport encoder.
#[derive(Debug, Clone)]
pub struct Outbound(pub Value);

impl Outbound {
    /// Wire text of the document.
    #[must_use]
    pub fn to_wire(&self) -> String {
        self.0.to_string()
    }

    /// Registration acknowledgment. `nosenduser` tells the device not to
    /// push its full user list after registering.
    #[must_use]
    pub fn reg_ack(sn: &str, cloudtime: &CloudTime) -> Self {
        Outbound(json!({
            "ret": "reg",
            "result": true,
            "sn": sn,
            "cloudtime": cloudtime.format(),
            "nosenduser": true,
        }))
    }

    /// Heartbeat acknowledgment carrying server time.
    #[must_use]
    pub fn heartbeat_ack(sn: &str, cloudtime: &CloudTime) -> Self {
        Outbound(json!({
            "ret": "heartbeat",
            "result": true,
            "sn": sn,
            "cloudtime": cloudtime.format(),
        }))
    }

    /// Single acknowledgment for a whole `sendlog` batch.
    #[must_use]
    pub fn sendlog_ack(
        count: u64,
        logindex: i64,
        cloudtime: &CloudTime,
        access: bool,
        message: &str,
    ) -> Self {
        Outbound(json!({
            "ret": "sendlog",
            "result": true,
            "count": count,
            "logindex": logindex,
            "cloudtime": cloudtime.format(),
            "access": if access { 1 } else { 0 },
            "message": message,
        }))
    }

    /// Structured rejection of a whole `sendlog` batch. The device will
    /// resend the batch.
    #[must_use]
    pub fn sendlog_reject(reason: u8) -> Self {
        Outbound(json!({
            "ret": "sendlog",
            "result": false,
            "reason": reason,
        }))
    }

    /// Informational acknowledgment (`senduser`, `sendqrcode`).
    #[must_use]
    pub fn info_ack(ret: &str) -> Self {
        Outbound(json!({ "ret": ret, "result": true }))
    }

    /// Reply for structurally-valid but unimplemented commands.
    #[must_use]
    pub fn not_implemented(cmd: &str) -> Self {
        Outbound(json!({
            "ret": cmd,
            "result": false,
            "reason": "not implemented",
        }))
    }

    /// Reply for tokens missing or wrong on an unauthenticated connection.
    #[must_use]
    pub fn auth_required() -> Self {
        Outbound(json!({
            "ret": "error",
            "result": false,
            "reason": "authentication required",
        }))
    }

    /// Reply for a request over the per-address rate ceiling.
    #[must_use]
    pub fn rate_limited() -> Self {
        Outbound(json!({
            "ret": "error",
            "result": false,
            "reason": "rate limit exceeded",
        }))
    }

    /// Protocol-level rejection of an undecodable or malformed frame.
    #[must_use]
    pub fn bad_request(reason: &str) -> Self {
        Outbound(json!({
            "ret": "error",
            "result": false,
            "reason": reason,
        }))
    }
}

/// Build a server-initiated command payload tagged with a request id.
///
/// `params` must be a JSON object (or `Value::Null` for none); its entries
/// are merged beside the routing keys.
#[must_use]
pub fn command_payload(cmd: &str, sn: &str, request_id: &str, params: &Value) -> Outbound {
    let mut doc = json!({
        "cmd": cmd,
        "sn": sn,
        "request_id": request_id,
    });
    if let (Some(obj), Some(extra)) = (doc.as_object_mut(), params.as_object()) {
        for (k, v) in extra {
            obj.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    Outbound(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;

    #[test]
    fn test_classify_request() {
        let doc = json!({"cmd": "reg", "sn": "FACE-1", "devinfo": {"mac": "aa:bb"}});
        match Inbound::classify(doc).unwrap() {
            Inbound::Request { cmd, sn, .. } => {
                assert_eq!(cmd, CommandName::Known(Command::Reg));
                assert_eq!(sn.as_deref(), Some("FACE-1"));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_reply_takes_precedence() {
        // A reply-shaped document is a reply even if a cmd key sneaks in.
        let doc = json!({"ret": "opendoor", "cmd": "reg", "result": true, "request_id": "r1"});
        match Inbound::classify(doc).unwrap() {
            Inbound::Reply {
                ret,
                result,
                request_id,
                ..
            } => {
                assert_eq!(ret, "opendoor");
                assert!(result);
                assert_eq!(request_id.as_deref(), Some("r1"));
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_rejects_shapeless() {
        assert!(Inbound::classify(json!({"hello": 1})).is_err());
        assert!(Inbound::classify(json!([1, 2, 3])).is_err());
        assert!(Inbound::classify(json!("reg")).is_err());
    }

    #[test]
    fn test_log_record_enroll_id_number_or_string() {
        let rec: LogRecord = serde_json::from_value(json!({"enrollid": 42})).unwrap();
        assert_eq!(rec.enroll_id().as_deref(), Some("42"));

        let rec: LogRecord = serde_json::from_value(json!({"enrollid": " 7 "})).unwrap();
        assert_eq!(rec.enroll_id().as_deref(), Some("7"));

        let rec: LogRecord = serde_json::from_value(json!({"enrollid": ""})).unwrap();
        assert_eq!(rec.enroll_id(), None);

        let rec: LogRecord = serde_json::from_value(json!({})).unwrap();
        assert_eq!(rec.enroll_id(), None);
    }

    #[test]
    fn test_sendlog_ack_shape() {
        let ack = Outbound::sendlog_ack(2, 5, &CloudTime::now(), true, "ok");
        let doc = &ack.0;
        assert_eq!(doc["ret"], "sendlog");
        assert_eq!(doc["result"], true);
        assert_eq!(doc["count"], 2);
        assert_eq!(doc["logindex"], 5);
        assert_eq!(doc["access"], 1);
        assert!(doc["cloudtime"].is_string());
    }

    #[test]
    fn test_command_payload_merges_params() {
        let out = command_payload("deleteuser", "SN1", "req-9", &json!({"enrollid": 3}));
        assert_eq!(out.0["cmd"], "deleteuser");
        assert_eq!(out.0["sn"], "SN1");
        assert_eq!(out.0["request_id"], "req-9");
        assert_eq!(out.0["enrollid"], 3);
    }

    #[test]
    fn test_command_payload_params_cannot_override_routing() {
        let out = command_payload("reboot", "SN1", "req-1", &json!({"sn": "EVIL"}));
        assert_eq!(out.0["sn"], "SN1");
    }
}
