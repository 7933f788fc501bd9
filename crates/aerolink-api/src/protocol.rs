//! Wire envelopes for the device's WebSocket protocol.
//!
//! Every outbound message is `{ "command": ..., "id": ..., "params": ... }`;
//! login additionally carries `user`, `password`, and `long_life` at the
//! top level. Inbound messages either echo the request `id` (solicited
//! response) or carry a bare `command` tag (unsolicited push).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Command names understood by the device.
pub mod command {
    pub const LOGIN: &str = "login";
    pub const KEEP_ALIVE: &str = "keepAlive";
    pub const GET_DEVICE: &str = "getDevice";
    pub const GET_DEVICE_PARAMS: &str = "getDeviceParams";
    pub const GET_DEVICE_STATE: &str = "getDeviceState";
    pub const SET_DEVICE_PARAMS: &str = "setDeviceParams";
}

/// Command tag on unsolicited parameter-update pushes.
pub const PUSH_DEVICE_PARAMS: &str = "deviceParams";

/// Status string the device uses for a successful request.
pub const STATUS_OK: &str = "ok";

/// Highest fan level the AEROPAC accepts (0 means off).
pub const MAX_FAN_LEVEL: u8 = 7;

// ── Outbound ─────────────────────────────────────────────────────────

/// One outbound request frame.
///
/// `extra` is flattened into the top-level object -- the login command
/// uses it for its credential fields.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    pub command: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RequestEnvelope {
    pub fn new(command: impl Into<String>, id: u64, params: Option<Value>) -> Self {
        Self {
            command: command.into(),
            id,
            params,
            extra: Map::new(),
        }
    }

    /// Login request. `long_life` is pinned to `false` -- the session is
    /// kept alive by the keepalive loop instead.
    pub(crate) fn login(id: u64, user: &str, password: &str) -> Self {
        let mut envelope = Self::new(command::LOGIN, id, None);
        envelope.extra.insert("user".into(), json!(user));
        envelope.extra.insert("password".into(), json!(password));
        envelope.extra.insert("long_life".into(), json!(false));
        envelope
    }
}

// ── Inbound ──────────────────────────────────────────────────────────

/// One inbound frame, either a correlated response or a push.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub command: Option<String>,
}

impl ResponseEnvelope {
    /// `true` when the device reported success.
    pub fn is_ok(&self) -> bool {
        self.status.as_deref() == Some(STATUS_OK)
    }

    /// The `data` payload as an owned object, or an empty map when the
    /// payload is absent, non-object, or the status is not `"ok"`.
    pub fn data_object(&self) -> Map<String, Value> {
        if !self.is_ok() {
            return Map::new();
        }
        match &self.data {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    /// Tagged as an unsolicited parameter update. The router only treats
    /// it as one after the id (if any) failed to match a pending request.
    pub(crate) fn is_push(&self) -> bool {
        self.command.as_deref() == Some(PUSH_DEVICE_PARAMS)
    }
}

// ── Device identity ──────────────────────────────────────────────────

/// Product name for the numeric `type` field in `getDevice` responses.
pub fn device_type_name(type_code: u64) -> &'static str {
    match type_code {
        1 => "AEROPAC",
        2 => "AEROMAT VT",
        3 => "DRIVE axxent Family",
        4 => "SENSOAIR",
        5 => "AEROVITAL",
        6 => "MHS Family",
        7 => "reserved",
        8 => "AEROTUBE",
        9 => "GENIUS B",
        10 => "Universal Module",
        _ => "Unknown",
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_envelope_wire_shape() {
        let envelope = RequestEnvelope::new(
            command::SET_DEVICE_PARAMS,
            42,
            Some(json!({ "fanlevel": 3 })),
        );

        let wire: Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            wire,
            json!({
                "command": "setDeviceParams",
                "id": 42,
                "params": { "fanlevel": 3 }
            })
        );
    }

    #[test]
    fn request_without_params_omits_the_field() {
        let envelope = RequestEnvelope::new(command::GET_DEVICE_STATE, 7, None);
        let wire = serde_json::to_string(&envelope).unwrap();
        assert!(!wire.contains("params"), "unexpected params in: {wire}");
    }

    #[test]
    fn login_request_carries_credential_fields() {
        let envelope = RequestEnvelope::login(1, "admin", "0000");
        let wire: Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            wire,
            json!({
                "command": "login",
                "id": 1,
                "user": "admin",
                "password": "0000",
                "long_life": false
            })
        );
    }

    #[test]
    fn response_with_id_is_not_a_push() {
        let envelope: ResponseEnvelope = serde_json::from_str(
            r#"{"id": 3, "status": "ok", "data": {"fanlevel": 2}}"#,
        )
        .unwrap();

        assert!(!envelope.is_push());
        assert!(envelope.is_ok());
        assert_eq!(envelope.data_object()["fanlevel"], 2);
    }

    #[test]
    fn bare_device_params_command_is_a_push() {
        let envelope: ResponseEnvelope = serde_json::from_str(
            r#"{"command": "deviceParams", "data": {"fanlevel": 5}}"#,
        )
        .unwrap();

        assert!(envelope.is_push());
    }

    #[test]
    fn data_object_is_empty_on_error_status() {
        let envelope: ResponseEnvelope = serde_json::from_str(
            r#"{"id": 9, "status": "access denied", "data": {"partial": true}}"#,
        )
        .unwrap();

        assert!(!envelope.is_ok());
        assert!(envelope.data_object().is_empty());
    }

    #[test]
    fn device_type_names() {
        assert_eq!(device_type_name(1), "AEROPAC");
        assert_eq!(device_type_name(5), "AEROVITAL");
        assert_eq!(device_type_name(7), "reserved");
        assert_eq!(device_type_name(99), "Unknown");
    }
}
