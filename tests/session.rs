//! Integration tests for the WebSocket session against an in-process server.

use chrono::{TimeZone, Utc};
use ewelink::{
    Connection, Credentials, Device, DeviceEvent, DeviceExtra, EwelinkError, FixedClock, Outlet,
    Sensors, SessionConfig, SessionState, SwitchParams, SwitchState,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

/// Server side of one session
struct Server {
    ws: WebSocketStream<TcpStream>,
    /// Authentication frame sent by the client
    hello: Value,
}

impl Server {
    async fn recv(&mut self) -> Value {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) if text == "ping" => continue,
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("expected a text frame, got {:?}", other),
            }
        }
    }

    async fn send(&mut self, frame: Value) {
        self.ws.send(Message::Text(frame.to_string())).await.unwrap();
    }
}

fn config() -> SessionConfig {
    let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
    let clock = FixedClock::new(now, "n0nce123");
    SessionConfig::new()
        .with_app_id("test-app")
        .with_request_timeout(Duration::from_secs(5))
        .with_clock(Arc::new(clock))
}

async fn open_with(
    handshake: Value,
    config: SessionConfig,
) -> (ewelink::Result<Connection>, Server) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let mut server = Server { ws, hello: Value::Null };
        server.hello = server.recv().await;
        server.send(handshake).await;
        server
    });

    let credentials = Credentials::new("token", "user-key", "us");
    let session = Connection::connect(url, &credentials, config).await;
    (session, server.await.unwrap())
}

async fn open() -> (Connection, Server) {
    let handshake = json!({ "error": 0, "config": { "hbInterval": 83 } });
    let (session, server) = open_with(handshake, config()).await;
    match session {
        Ok(session) => (session, server),
        Err(e) => panic!("handshake failed: {}", e),
    }
}

fn strip(id: &str) -> Device {
    Device {
        id: id.to_string(),
        name: "Strip".to_string(),
        api_key: "owner-key".to_string(),
        online: true,
        params: Some(SwitchParams::Multi {
            channels: vec![
                Outlet { outlet: 0, switch: SwitchState::Off },
                Outlet { outlet: 1, switch: SwitchState::Off },
            ],
        }),
        extra: DeviceExtra::default(),
        sensors: Sensors::default(),
    }
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn handshake_authenticates_and_sets_heartbeat() {
    let (session, server) = open().await;

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.heartbeat_interval(), Duration::from_secs(90));

    let hello = server.hello;
    assert_eq!(hello["action"], "userOnline");
    assert_eq!(hello["at"], "token");
    assert_eq!(hello["apikey"], "user-key");
    assert_eq!(hello["appid"], "test-app");
    assert_eq!(hello["userAgent"], "app");
    assert_eq!(hello["version"], 8);
    assert_eq!(hello["nonce"], "n0nce123");
    assert_eq!(hello["ts"], 1_710_504_000);
    assert_eq!(hello["sequence"], "1710504000000");

    session.close().await;
}

#[tokio::test]
async fn missing_interval_uses_default_heartbeat() {
    let (session, _server) = open_with(json!({ "error": 0 }), config()).await;
    assert_eq!(session.unwrap().heartbeat_interval(), Duration::from_secs(90));
}

#[tokio::test]
async fn rejected_handshake_is_authentication_error() {
    let handshake = json!({ "error": 406, "reason": "Authentication Failed" });
    let (session, _server) = open_with(handshake, config()).await;
    assert!(matches!(session, Err(EwelinkError::Authentication(_))));
}

#[tokio::test]
async fn heartbeat_sends_literal_ping() {
    let handshake = json!({ "error": 0, "config": { "hbInterval": 3 } });
    let (session, mut server) = open_with(handshake, config()).await;
    let session = session.unwrap();
    assert_eq!(session.heartbeat_interval(), Duration::from_secs(10));

    let started = Instant::now();
    let frame = tokio::time::timeout(Duration::from_secs(15), server.ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame, Message::Text("ping".to_string()));
    assert!(started.elapsed() >= Duration::from_secs(9));

    session.close().await;
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn replies_resolve_in_send_order() {
    let (session, mut server) = open().await;

    let first = session.update("dev-a", json!({ "switch": "on" }));
    let second = session.update("dev-b", json!({ "switch": "off" }));
    let script = async {
        let a = server.recv().await;
        let b = server.recv().await;
        server.send(json!({ "error": 0, "sequence": a["sequence"], "marker": a["deviceid"] })).await;
        server.send(json!({ "error": 0, "sequence": b["sequence"], "marker": b["deviceid"] })).await;
    };

    let (first, second, ()) = tokio::join!(first, second, script);
    assert_eq!(first.unwrap()["marker"], "dev-a");
    assert_eq!(second.unwrap()["marker"], "dev-b");
    assert_eq!(session.pending_count(), 0);

    session.close().await;
}

#[tokio::test]
async fn fifo_order_survives_interleaved_traffic() {
    let (session, mut server) = open().await;
    session.track(strip("dev-a"));

    let first = session.update("dev-a", json!({ "switch": "on" }));
    let query = session.query("dev-q", &["switch"]);
    let second = session.update("dev-b", json!({ "switch": "off" }));
    let script = async {
        let mut updates = Vec::new();
        for _ in 0..3 {
            let frame = server.recv().await;
            if frame["action"] != "query" {
                updates.push(frame);
            }
        }
        server.send(json!({ "error": 0, "marker": updates[0]["deviceid"] })).await;
        server
            .send(json!({ "action": "sysmsg", "deviceid": "dev-a", "params": { "online": false } }))
            .await;
        server
            .send(json!({ "error": 0, "deviceid": "dev-q", "params": { "switch": "on" } }))
            .await;
        server.send(json!({ "error": 0, "marker": updates[1]["deviceid"] })).await;
    };

    let (first, query, second, ()) = tokio::join!(first, query, second, script);
    assert_eq!(first.unwrap()["marker"], "dev-a");
    assert_eq!(second.unwrap()["marker"], "dev-b");
    assert_eq!(query.unwrap()["params"]["switch"], "on");
    assert!(!session.device("dev-a").unwrap().online);
    assert_eq!(session.pending_count(), 0);

    session.close().await;
}

#[tokio::test]
async fn update_frame_shape() {
    let (session, mut server) = open().await;
    session.track(strip("dev-1"));

    let update = session.update("dev-1", json!({ "switch": "on" }));
    let script = async {
        let frame = server.recv().await;
        server.send(json!({ "error": 0, "deviceid": "dev-1" })).await;
        frame
    };
    let (result, frame) = tokio::join!(update, script);
    result.unwrap();

    assert_eq!(frame["action"], "update");
    assert_eq!(frame["deviceid"], "dev-1");
    assert_eq!(frame["apikey"], "owner-key");
    assert_eq!(frame["userAgent"], "app");
    assert_eq!(frame["sequence"], "1710504000000");
    assert_eq!(frame["params"], json!({ "switch": "on" }));

    session.close().await;
}

#[tokio::test]
async fn offline_device_does_not_break_the_session() {
    let (session, mut server) = open().await;

    let update = session.update("dev-1", json!({ "switch": "on" }));
    let script = async {
        server.recv().await;
        server.send(json!({ "error": 503, "deviceid": "dev-1", "reason": "Device Offline" })).await;
    };
    let (result, ()) = tokio::join!(update, script);
    assert!(matches!(result, Err(EwelinkError::DeviceOffline(ref id)) if id == "dev-1"));
    assert_eq!(session.state(), SessionState::Ready);

    let update = session.update("dev-1", json!({ "switch": "on" }));
    let script = async {
        server.recv().await;
        server.send(json!({ "error": 0, "deviceid": "dev-1" })).await;
    };
    let (result, ()) = tokio::join!(update, script);
    assert!(result.is_ok());

    session.close().await;
}

#[tokio::test]
async fn other_error_codes_are_api_errors() {
    let (session, mut server) = open().await;

    let update = session.update("dev-1", json!({ "hundredDaysKwh": "get" }));
    let script = async {
        server.recv().await;
        server.send(json!({ "error": 403, "deviceid": "dev-1" })).await;
    };
    let (result, ()) = tokio::join!(update, script);
    assert!(matches!(result, Err(EwelinkError::Api { code: 403, .. })));

    session.close().await;
}

#[tokio::test]
async fn query_round_trip_refreshes_tracked_device() {
    let (session, mut server) = open().await;
    session.track(strip("dev-1"));

    let query = session.query("dev-1", &["switch", "switches"]);
    let script = async {
        let frame = server.recv().await;
        server
            .send(json!({
                "error": 0,
                "deviceid": "dev-1",
                "params": { "switches": [
                    { "outlet": 0, "switch": "on" },
                    { "outlet": 1, "switch": "off" }
                ]}
            }))
            .await;
        frame
    };
    let (result, frame) = tokio::join!(query, script);

    assert_eq!(frame["action"], "query");
    assert_eq!(frame["params"], json!(["switch", "switches"]));
    assert_eq!(result.unwrap()["params"]["switches"][0]["switch"], "on");

    let device = session.device("dev-1").unwrap();
    assert_eq!(ewelink::switch::state_of(&device, 1).unwrap(), SwitchState::On);

    session.close().await;
}

#[tokio::test]
async fn timed_out_request_leaves_session_usable() {
    let (session, mut server) = open_with(
        json!({ "error": 0 }),
        config().with_request_timeout(Duration::from_millis(200)),
    )
    .await;
    let session = session.unwrap();

    let update = session.update("dev-1", json!({ "switch": "on" }));
    let script = async {
        server.recv().await;
    };
    let (result, ()) = tokio::join!(update, script);
    assert!(matches!(result, Err(EwelinkError::Timeout)));
    assert_eq!(session.pending_count(), 0);
    assert_eq!(session.state(), SessionState::Ready);

    let update = session.update("dev-1", json!({ "switch": "off" }));
    let script = async {
        let frame = server.recv().await;
        server.send(json!({ "error": 0, "deviceid": "dev-1" })).await;
        frame
    };
    let (result, frame) = tokio::join!(update, script);
    assert!(result.is_ok());
    assert_eq!(frame["params"]["switch"], "off");

    session.close().await;
}

#[tokio::test]
async fn power_usage_reply_carries_history() {
    let (session, mut server) = open().await;
    let history = "000102".repeat(100);

    let update = session.update("dev-1", json!({ "hundredDaysKwh": "get" }));
    let script = async {
        let frame = server.recv().await;
        server
            .send(json!({
                "error": 0,
                "deviceid": "dev-1",
                "config": { "hundredDaysKwhData": history }
            }))
            .await;
        frame
    };
    let (result, frame) = tokio::join!(update, script);
    assert_eq!(frame["params"], json!({ "hundredDaysKwh": "get" }));

    let raw = result.unwrap()["config"]["hundredDaysKwhData"]
        .as_str()
        .unwrap()
        .to_string();
    let usage = ewelink::power::decode(&raw, 15).unwrap();
    assert_eq!(usage.daily.len(), 15);
    assert!((usage.monthly - 0.12 * 15.0).abs() < 1e-9);

    session.close().await;
}

// ============================================================================
// Push events
// ============================================================================

#[tokio::test]
async fn sysmsg_updates_online_flag() {
    let (session, mut server) = open().await;
    session.track(strip("dev-1"));
    let mut events = session.subscribe();

    server
        .send(json!({ "action": "sysmsg", "deviceid": "dev-1", "params": { "online": false } }))
        .await;

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        DeviceEvent::Online {
            device_id: "dev-1".to_string(),
            online: false
        }
    );
    assert!(!session.device("dev-1").unwrap().online);

    session.close().await;
}

#[tokio::test]
async fn state_echo_merges_channels() {
    let (session, mut server) = open().await;
    session.track(strip("dev-1"));
    let mut events = session.subscribe();

    server
        .send(json!({
            "action": "update",
            "deviceid": "dev-1",
            "apikey": "owner-key",
            "params": { "switches": [{ "outlet": 1, "switch": "on" }] }
        }))
        .await;

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    let DeviceEvent::StateChanged { device_id, params } = event else {
        panic!("expected a state change, got {:?}", event);
    };
    assert_eq!(device_id, "dev-1");
    assert_eq!(
        ewelink::switch::all_states(&params),
        vec![(1, SwitchState::Off), (2, SwitchState::On)]
    );

    session.close().await;
}

#[tokio::test]
async fn garbage_frames_are_ignored() {
    let (session, mut server) = open().await;

    server.ws.send(Message::Text("not json".to_string())).await.unwrap();
    server.send(json!([1, 2, 3])).await;

    let update = session.update("dev-1", json!({ "switch": "on" }));
    let script = async {
        server.recv().await;
        server.send(json!({ "error": 0 })).await;
    };
    let (result, ()) = tokio::join!(update, script);
    assert!(result.is_ok());

    session.close().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn close_cancels_outstanding_commands() {
    let (session, mut server) = open().await;
    let mut states = session.state_changes();

    let first = session.update("dev-1", json!({ "switch": "on" }));
    let second = session.query("dev-2", &["switch"]);
    let script = async {
        server.recv().await;
        server.recv().await;
        session.close().await;
    };
    let (first, second, ()) = tokio::join!(first, second, script);

    assert!(matches!(first, Err(EwelinkError::Cancelled)));
    assert!(matches!(second, Err(EwelinkError::Cancelled)));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(*states.borrow_and_update(), SessionState::Closed);

    assert!(matches!(
        session.update("dev-1", json!({ "switch": "on" })).await,
        Err(EwelinkError::ConnectionClosed)
    ));

    // Closing twice is harmless
    session.close().await;
}

#[tokio::test]
async fn server_disconnect_cancels_outstanding_commands() {
    let (session, mut server) = open().await;

    let update = session.update("dev-1", json!({ "switch": "on" }));
    let script = async move {
        server.recv().await;
        server.ws.close(None).await.unwrap();
    };
    let (result, ()) = tokio::join!(update, script);
    assert!(matches!(result, Err(EwelinkError::Cancelled)));

    let mut states = session.state_changes();
    tokio::time::timeout(Duration::from_secs(2), states.wait_for(|s| *s == SessionState::Closed))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn dropping_session_publishes_closed() {
    let (session, _server) = open().await;
    let states = session.state_changes();
    assert_eq!(*states.borrow(), SessionState::Ready);

    drop(session);
    assert_eq!(*states.borrow(), SessionState::Closed);
}
