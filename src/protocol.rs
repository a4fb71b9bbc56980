use crate::clock::Stamp;
use crate::types::{Credentials, SwitchParams};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Heartbeat period used when the handshake reply carries no `hbInterval`
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(90);

/// Seconds added to the server's `hbInterval`
const HEARTBEAT_MARGIN: u64 = 7;

/// Literal heartbeat frame
pub const PING: &str = "ping";

const PROTOCOL_VERSION: u8 = 8;
const USER_AGENT: &str = "app";

/// Error code reported when the target device is offline
pub const ERROR_DEVICE_OFFLINE: i64 = 503;

/// Authentication frame sent right after the socket opens
#[derive(Debug, Clone, Serialize)]
pub struct UserOnline {
    action: &'static str,
    version: u8,
    ts: i64,
    at: String,
    #[serde(rename = "userAgent")]
    user_agent: &'static str,
    apikey: String,
    appid: String,
    nonce: String,
    sequence: String,
}

impl UserOnline {
    pub fn new(credentials: &Credentials, app_id: impl Into<String>, stamp: Stamp) -> Self {
        Self {
            action: "userOnline",
            version: PROTOCOL_VERSION,
            ts: stamp.ts,
            at: credentials.access_token.expose_secret().to_string(),
            user_agent: USER_AGENT,
            apikey: credentials.api_key.clone(),
            appid: app_id.into(),
            nonce: stamp.nonce,
            sequence: stamp.sequence,
        }
    }
}

/// Command categories, each with its own reply queue
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Update,
    Query,
}

/// Device command frame
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub action: Action,
    pub deviceid: String,
    pub apikey: String,
    #[serde(rename = "userAgent")]
    user_agent: &'static str,
    pub sequence: String,
    pub params: Value,
}

impl Request {
    /// Create a new request for `device_id`
    pub fn new(
        action: Action,
        device_id: impl Into<String>,
        api_key: impl Into<String>,
        params: Value,
        stamp: &Stamp,
    ) -> Self {
        Self {
            action,
            deviceid: device_id.into(),
            apikey: api_key.into(),
            user_agent: USER_AGENT,
            sequence: stamp.sequence.clone(),
            params,
        }
    }

    /// Set parameters on a device
    pub fn update(device_id: &str, api_key: &str, params: Value, stamp: &Stamp) -> Self {
        Self::new(Action::Update, device_id, api_key, params, stamp)
    }

    /// Read the named parameter fields of a device
    pub fn query(device_id: &str, api_key: &str, fields: &[&str], stamp: &Stamp) -> Self {
        let fields = fields.iter().map(|f| Value::String((*f).to_string())).collect();
        Self::new(Action::Query, device_id, api_key, Value::Array(fields), stamp)
    }
}

/// Reply to the authentication frame
#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeReply {
    #[serde(default)]
    pub error: i64,
    #[serde(default)]
    pub config: Option<HandshakeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeConfig {
    #[serde(rename = "hbInterval", default)]
    pub hb_interval: Option<Value>,
}

impl HandshakeReply {
    /// Heartbeat period announced by the server, plus the safety margin
    pub fn heartbeat_interval(&self) -> Duration {
        self.config
            .as_ref()
            .and_then(|c| c.hb_interval.as_ref())
            .and_then(Value::as_u64)
            .map_or(DEFAULT_HEARTBEAT, |secs| {
                Duration::from_secs(secs.saturating_add(HEARTBEAT_MARGIN))
            })
    }
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Online/offline notification for a device
    SysMsg { device_id: String, online: bool },
    /// Reply to the oldest pending update
    UpdateReply { error: i64, frame: Value },
    /// Successful reply to the oldest pending query
    QueryReply { frame: Value },
    /// Device-originated state change
    StateEcho {
        device_id: String,
        params: SwitchParams,
    },
    /// Anything else
    Ignored,
}

impl Inbound {
    /// Classify a text frame
    ///
    /// Frames that are not JSON objects or have an unknown shape are
    /// [`Inbound::Ignored`].
    pub fn classify(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(frame) => Self::from_frame(frame),
            Err(_) => Self::Ignored,
        }
    }

    fn from_frame(frame: Value) -> Self {
        let Some(obj) = frame.as_object() else {
            return Self::Ignored;
        };
        let action = obj.get("action").and_then(Value::as_str);
        let device_id = obj.get("deviceid").and_then(Value::as_str);
        let params = obj.get("params");

        if action == Some("sysmsg") {
            let online = params
                .and_then(|p| p.get("online"))
                .and_then(Value::as_bool);
            return match (device_id, online) {
                (Some(id), Some(online)) => Self::SysMsg {
                    device_id: id.to_string(),
                    online,
                },
                _ => Self::Ignored,
            };
        }

        if let Some(error) = obj.get("error") {
            let error = error.as_i64().unwrap_or(-1);
            return match (params.is_some(), error) {
                (false, _) => Self::UpdateReply { error, frame },
                (true, 0) => Self::QueryReply { frame },
                (true, _) => Self::Ignored,
            };
        }

        if action == Some("update") {
            let echo = params
                .and_then(Value::as_object)
                .and_then(SwitchParams::from_params);
            if let (Some(id), Some(params)) = (device_id, echo) {
                return Self::StateEcho {
                    device_id: id.to_string(),
                    params,
                };
            }
        }

        Self::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SwitchState;
    use serde_json::json;

    fn stamp() -> Stamp {
        Stamp {
            ts: 1_234_567_890,
            sequence: "1234567890000".to_string(),
            nonce: "nonce123".to_string(),
        }
    }

    #[test]
    fn user_online_shape() {
        let frame = UserOnline::new(&Credentials::new("token", "api", "us"), "appid123", stamp());
        assert_eq!(
            serde_json::to_value(frame).unwrap(),
            json!({
                "action": "userOnline",
                "version": 8,
                "ts": 1_234_567_890,
                "at": "token",
                "userAgent": "app",
                "apikey": "api",
                "appid": "appid123",
                "nonce": "nonce123",
                "sequence": "1234567890000"
            })
        );
    }

    #[test]
    fn update_and_query_shapes() {
        let update = Request::update("dev", "api", json!({"switch": "on"}), &stamp());
        assert_eq!(
            serde_json::to_value(update).unwrap(),
            json!({
                "action": "update",
                "deviceid": "dev",
                "apikey": "api",
                "userAgent": "app",
                "sequence": "1234567890000",
                "params": {"switch": "on"}
            })
        );

        let query = Request::query("dev", "api", &["switch", "switches"], &stamp());
        let value = serde_json::to_value(query).unwrap();
        assert_eq!(value["action"], "query");
        assert_eq!(value["params"], json!(["switch", "switches"]));
    }

    #[test]
    fn heartbeat_interval_from_handshake() {
        let reply: HandshakeReply = serde_json::from_value(json!({"error": 0})).unwrap();
        assert_eq!(reply.heartbeat_interval(), Duration::from_secs(90));

        let reply: HandshakeReply =
            serde_json::from_value(json!({"error": 0, "config": {"hbInterval": 83}})).unwrap();
        assert_eq!(reply.heartbeat_interval(), Duration::from_secs(90));

        let reply: HandshakeReply =
            serde_json::from_value(json!({"config": {"hbInterval": "soon"}})).unwrap();
        assert_eq!(reply.heartbeat_interval(), DEFAULT_HEARTBEAT);
    }

    #[test]
    fn huge_heartbeat_interval_saturates() {
        let reply: HandshakeReply =
            serde_json::from_value(json!({"config": {"hbInterval": u64::MAX}})).unwrap();
        assert_eq!(reply.heartbeat_interval(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn classifies_sysmsg() {
        let frame = r#"{"action":"sysmsg","deviceid":"d1","params":{"online":false}}"#;
        assert_eq!(
            Inbound::classify(frame),
            Inbound::SysMsg {
                device_id: "d1".to_string(),
                online: false
            }
        );
    }

    #[test]
    fn classifies_replies() {
        assert!(matches!(
            Inbound::classify(r#"{"error":0,"deviceid":"d1","sequence":"1"}"#),
            Inbound::UpdateReply { error: 0, .. }
        ));
        assert!(matches!(
            Inbound::classify(r#"{"error":503,"deviceid":"d1"}"#),
            Inbound::UpdateReply { error: 503, .. }
        ));
        assert!(matches!(
            Inbound::classify(r#"{"error":0,"deviceid":"d1","params":{"switch":"on"}}"#),
            Inbound::QueryReply { .. }
        ));
        assert_eq!(
            Inbound::classify(r#"{"error":504,"params":{}}"#),
            Inbound::Ignored
        );
    }

    #[test]
    fn classifies_state_echo() {
        let frame = r#"{"action":"update","deviceid":"d1","params":{"switch":"off"}}"#;
        assert_eq!(
            Inbound::classify(frame),
            Inbound::StateEcho {
                device_id: "d1".to_string(),
                params: SwitchParams::Single {
                    switch: SwitchState::Off
                }
            }
        );
    }

    #[test]
    fn ignores_unknown_frames() {
        assert_eq!(Inbound::classify("pong"), Inbound::Ignored);
        assert_eq!(Inbound::classify("[1,2]"), Inbound::Ignored);
        assert_eq!(
            Inbound::classify(r#"{"action":"reboot","deviceid":"d1"}"#),
            Inbound::Ignored
        );
        assert_eq!(
            Inbound::classify(r#"{"action":"update","deviceid":"d1","params":{"rssi":-40}}"#),
            Inbound::Ignored
        );
    }
}
