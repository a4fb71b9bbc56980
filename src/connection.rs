use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, DEFAULT_APP_ID};
use crate::error::{EwelinkError, Result};
use crate::protocol::{
    Action, HandshakeReply, Inbound, Request, UserOnline, ERROR_DEVICE_OFFLINE, PING,
};
use crate::subscription::{DeviceEvent, EventReceiver};
use crate::switch;
use crate::types::{Credentials, Device, DeviceId, SwitchParams};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Lifecycle of a WebSocket session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    /// Authenticated; the only state that accepts commands
    Ready,
    Closing,
    Closed,
}

/// Options for opening a session
#[derive(Clone)]
pub struct SessionConfig {
    app_id: String,
    request_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionConfig {
    /// Session options with the default app id, timeout and system clock
    pub fn new() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            request_timeout: ClientConfig::DEFAULT_REQUEST_TIMEOUT,
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the application id sent in the handshake.
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    /// Sets the per-command timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the source of timestamps and nonces.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&ClientConfig> for SessionConfig {
    fn from(config: &ClientConfig) -> Self {
        Self::new()
            .with_app_id(config.app_id())
            .with_request_timeout(config.request_timeout())
    }
}

/// Command awaiting its reply
struct PendingRequest {
    key: u64,
    created_at: Instant,
    slot: oneshot::Sender<Result<Value>>,
}

/// FIFO reply queues, one per command category
#[derive(Default)]
struct PendingQueues {
    next_key: u64,
    closed: bool,
    queues: HashMap<Action, VecDeque<PendingRequest>>,
}

impl PendingQueues {
    fn push(&mut self, action: Action) -> Result<(u64, oneshot::Receiver<Result<Value>>)> {
        if self.closed {
            return Err(EwelinkError::ConnectionClosed);
        }
        let (slot, rx) = oneshot::channel();
        let key = self.next_key;
        self.next_key += 1;
        self.queues.entry(action).or_default().push_back(PendingRequest {
            key,
            created_at: Instant::now(),
            slot,
        });
        Ok((key, rx))
    }

    fn pop_head(&mut self, action: Action) -> Option<PendingRequest> {
        self.queues.get_mut(&action)?.pop_front()
    }

    fn remove(&mut self, action: Action, key: u64) -> bool {
        let Some(queue) = self.queues.get_mut(&action) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|p| p.key != key);
        queue.len() != before
    }

    /// Fail every pending request and refuse new ones
    fn cancel_all(&mut self) -> usize {
        self.closed = true;
        let mut cancelled = 0;
        for (action, queue) in &mut self.queues {
            for pending in queue.drain(..) {
                tracing::debug!(
                    "Cancelling {:?} request after {:?}",
                    action,
                    pending.created_at.elapsed()
                );
                let _ = pending.slot.send(Err(EwelinkError::Cancelled));
                cancelled += 1;
            }
        }
        cancelled
    }

    fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

/// State shared between the caller and the background tasks
struct Shared {
    pending: Mutex<PendingQueues>,
    devices: RwLock<HashMap<DeviceId, Device>>,
    events: broadcast::Sender<DeviceEvent>,
    state: watch::Sender<SessionState>,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        tracing::debug!("Session state -> {:?}", state);
        self.state.send_replace(state);
    }

    /// Handle an incoming text frame
    fn dispatch(&self, text: &str) {
        tracing::debug!("Received: {}", text);

        match Inbound::classify(text) {
            Inbound::SysMsg { device_id, online } => {
                let mut devices = self.devices.write();
                let Some(device) = devices.get_mut(&device_id) else {
                    tracing::debug!("sysmsg for untracked device {}", device_id);
                    return;
                };
                device.online = online;
                drop(devices);
                let status = if online { "online" } else { "offline" };
                tracing::info!("Device {} is now {}", device_id, status);
                let _ = self.events.send(DeviceEvent::Online { device_id, online });
            }
            Inbound::UpdateReply { error, frame } => {
                let Some(pending) = self.pending.lock().pop_head(Action::Update) else {
                    tracing::debug!("Update reply with no pending request");
                    return;
                };
                let result = match error {
                    0 => Ok(frame),
                    ERROR_DEVICE_OFFLINE => {
                        let device_id = frame
                            .get("deviceid")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        Err(EwelinkError::DeviceOffline(device_id))
                    }
                    code => Err(EwelinkError::api(code, frame)),
                };
                let _ = pending.slot.send(result);
            }
            Inbound::QueryReply { frame } => {
                match self.pending.lock().pop_head(Action::Query) {
                    Some(pending) => {
                        let _ = pending.slot.send(Ok(frame));
                    }
                    None => tracing::debug!("Query reply with no pending request"),
                }
            }
            Inbound::StateEcho { device_id, params } => {
                if let Some(merged) = self.merge_params(&device_id, &params) {
                    let _ = self.events.send(DeviceEvent::StateChanged {
                        device_id,
                        params: merged,
                    });
                }
            }
            Inbound::Ignored => {}
        }
    }

    /// Merge switch parameters into a tracked device, returning the new value
    fn merge_params(&self, device_id: &str, update: &SwitchParams) -> Option<SwitchParams> {
        let mut devices = self.devices.write();
        let device = devices.get_mut(device_id)?;
        let merged = match &device.params {
            Some(current) => switch::apply(current, update),
            None => Some(update.clone()),
        };
        match merged {
            Some(params) => {
                device.params = Some(params.clone());
                Some(params)
            }
            None => {
                tracing::warn!("Ignoring switch update of a different shape for {}", device_id);
                None
            }
        }
    }
}

/// WebSocket session with the eWeLink dispatch server
///
/// Owns the socket, the heartbeat task and the receive task. Commands are
/// matched to replies in send order, one queue per [`Action`]; the server
/// does not echo any request id.
pub struct Connection {
    shared: Arc<Shared>,
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    api_key: String,
    heartbeat: Duration,
    request_timeout: Duration,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Connect to a WebSocket URL and authenticate with `credentials`
    pub async fn connect(
        url: impl Into<String>,
        credentials: &Credentials,
        config: SessionConfig,
    ) -> Result<Self> {
        let url = url.into();
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingQueues::default()),
            devices: RwLock::new(HashMap::new()),
            events,
            state,
        });

        shared.set_state(SessionState::Connecting);
        tracing::info!("Connecting to {}", url);
        let (ws_stream, _) = match connect_async(&url).await {
            Ok(stream) => stream,
            Err(e) => {
                shared.set_state(SessionState::Closed);
                return Err(e.into());
            }
        };
        let (mut write, mut read) = ws_stream.split();

        shared.set_state(SessionState::Handshaking);
        let reply = match Self::handshake(&mut write, &mut read, credentials, &config).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Handshake failed: {}", e);
                let _ = write.close().await;
                shared.set_state(SessionState::Closed);
                return Err(e);
            }
        };

        let heartbeat = reply.heartbeat_interval();
        tracing::info!("Session ready, heartbeat every {:?}", heartbeat);

        let sink = Arc::new(tokio::sync::Mutex::new(write));
        let cancel = CancellationToken::new();

        let heartbeat_handle =
            tokio::spawn(heartbeat_loop(sink.clone(), heartbeat, cancel.clone()));
        let receive_handle = tokio::spawn(receive_loop(read, shared.clone(), cancel.clone()));

        shared.set_state(SessionState::Ready);

        Ok(Self {
            shared,
            sink,
            api_key: credentials.api_key.clone(),
            heartbeat,
            request_timeout: config.request_timeout,
            clock: config.clock,
            cancel,
            tasks: Mutex::new(vec![heartbeat_handle, receive_handle]),
        })
    }

    async fn handshake(
        write: &mut WsSink,
        read: &mut WsSource,
        credentials: &Credentials,
        config: &SessionConfig,
    ) -> Result<HandshakeReply> {
        let frame = UserOnline::new(credentials, &config.app_id, config.clock.stamp());
        write.send(Message::Text(serde_json::to_string(&frame)?)).await?;

        let text = timeout(config.request_timeout, next_text(read))
            .await
            .map_err(|_| EwelinkError::Timeout)??;

        let reply: HandshakeReply = serde_json::from_str(&text).map_err(|e| {
            EwelinkError::Authentication(format!("malformed handshake reply: {}", e))
        })?;
        if reply.error != 0 {
            return Err(EwelinkError::Authentication(format!(
                "handshake rejected with error {}",
                reply.error
            )));
        }
        Ok(reply)
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Watch session state transitions
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Heartbeat period negotiated during the handshake
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat
    }

    /// Number of commands still waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Track a device so that push events update its record
    pub fn track(&self, device: Device) {
        self.shared.devices.write().insert(device.id.clone(), device);
    }

    /// Track several devices
    pub fn track_all(&self, devices: impl IntoIterator<Item = Device>) {
        let mut tracked = self.shared.devices.write();
        for device in devices {
            tracked.insert(device.id.clone(), device);
        }
    }

    /// Latest view of a tracked device
    pub fn device(&self, device_id: &str) -> Option<Device> {
        self.shared.devices.read().get(device_id).cloned()
    }

    /// Latest view of every tracked device
    pub fn devices(&self) -> Vec<Device> {
        self.shared.devices.read().values().cloned().collect()
    }

    /// Subscribe to push events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.shared.events.subscribe())
    }

    /// Set parameters on a device and wait for the acknowledgement
    ///
    /// Fails with [`EwelinkError::DeviceOffline`] when the server reports
    /// error 503; the session stays open.
    pub async fn update(&self, device_id: &str, params: Value) -> Result<Value> {
        let switch_params = params.as_object().and_then(SwitchParams::from_params);
        let api_key = self.api_key_for(device_id);
        let request = Request::update(device_id, &api_key, params, &self.clock.stamp());
        let reply = self.send_request(request).await?;

        if let Some(update) = switch_params {
            let _ = self.shared.merge_params(device_id, &update);
        }
        Ok(reply)
    }

    /// Read the named parameter fields of a device
    pub async fn query(&self, device_id: &str, fields: &[&str]) -> Result<Value> {
        let api_key = self.api_key_for(device_id);
        let request = Request::query(device_id, &api_key, fields, &self.clock.stamp());
        let reply = self.send_request(request).await?;

        let switch_params = reply
            .get("params")
            .and_then(Value::as_object)
            .and_then(SwitchParams::from_params);
        if let Some(params) = switch_params {
            let _ = self.shared.merge_params(device_id, &params);
        }
        Ok(reply)
    }

    /// Shared devices must be addressed with their owner's API key
    fn api_key_for(&self, device_id: &str) -> String {
        self.shared
            .devices
            .read()
            .get(device_id)
            .map(|d| d.api_key.clone())
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| self.api_key.clone())
    }

    /// Send a request and wait for the reply at the head of its queue
    async fn send_request(&self, request: Request) -> Result<Value> {
        if self.state() != SessionState::Ready {
            return Err(EwelinkError::ConnectionClosed);
        }

        let action = request.action;
        let json = serde_json::to_string(&request)?;

        // Enqueue while holding the sink so queue order matches send order
        let (key, rx) = {
            let mut sink = self.sink.lock().await;
            let (key, rx) = self.shared.pending.lock().push(action)?;
            tracing::debug!("Sending: {}", json);
            if let Err(e) = sink.send(Message::Text(json)).await {
                self.shared.pending.lock().remove(action, key);
                return Err(e.into());
            }
            (key, rx)
        };

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EwelinkError::Cancelled),
            Err(_) => {
                self.shared.pending.lock().remove(action, key);
                tracing::warn!("{:?} request to {} timed out", action, request.deviceid);
                Err(EwelinkError::Timeout)
            }
        }
    }

    /// Close the session
    ///
    /// Stops both background tasks, fails every pending command with
    /// [`EwelinkError::Cancelled`] and closes the socket. Calling it again is
    /// a no-op.
    pub async fn close(&self) {
        if self.state() != SessionState::Closed {
            self.shared.set_state(SessionState::Closing);
        }
        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("Session task ended abnormally: {}", e);
            }
        }

        let cancelled = self.shared.pending.lock().cancel_all();
        if cancelled > 0 {
            tracing::debug!("Cancelled {} pending requests", cancelled);
        }

        if let Err(e) = self.sink.lock().await.close().await {
            tracing::debug!("Error closing socket: {}", e);
        }
        self.shared.set_state(SessionState::Closed);
        tracing::info!("Session closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        self.shared.pending.lock().cancel_all();
        if *self.shared.state.borrow() != SessionState::Closed {
            self.shared.set_state(SessionState::Closed);
        }
    }
}

/// Wait for the next text frame, skipping control frames
async fn next_text(read: &mut WsSource) -> Result<String> {
    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => return Ok(text),
            Message::Close(_) => {
                return Err(EwelinkError::Authentication(
                    "connection closed during handshake".to_string(),
                ))
            }
            _ => {}
        }
    }
    Err(EwelinkError::ConnectionClosed)
}

async fn heartbeat_loop(
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {
                let mut sink = sink.lock().await;
                if let Err(e) = sink.send(Message::Text(PING.to_string())).await {
                    tracing::warn!("Failed to send heartbeat: {}", e);
                    break;
                }
                tracing::trace!("Heartbeat sent");
            }
        }
    }
}

async fn receive_loop(mut read: WsSource, shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => shared.dispatch(&text),
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("WebSocket connection closed");
                    break;
                }
                Some(Err(e)) => {
                    tracing::error!("WebSocket error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    // Connection closed, cancel all pending requests
    let cancelled = shared.pending.lock().cancel_all();
    if cancelled > 0 {
        tracing::debug!("Cancelled {} pending requests", cancelled);
    }

    // Stop the heartbeat when the server went away
    cancel.cancel();
    if *shared.state.borrow() != SessionState::Closing {
        shared.set_state(SessionState::Closed);
    }
}
