use crate::auth::CredentialResolver;
use crate::cache;
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::connection::{Connection, SessionConfig, SessionState};
use crate::error::{EwelinkError, Result};
use crate::http::HttpTransport;
use crate::power::{self, PowerUsage};
use crate::subscription::EventReceiver;
use crate::switch;
use crate::types::{
    Account, Credentials, Device, FirmwareStatus, PowerAction, Sensors, SwitchParams, SwitchState,
};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

const SWITCH_FIELDS: [&str; 2] = ["switch", "switches"];

/// Client for the eWeLink cloud
///
/// Composes the credential resolver, the REST transport and, once opened,
/// the WebSocket session.
///
/// # Example
///
/// ```no_run
/// use ewelink::{Account, Client, ClientConfig, PowerAction};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut client = Client::new(ClientConfig::from_env())?;
///     client.login(&Account::email("me@example.com", "password")).await?;
///
///     let devices = client.devices().await?;
///     let session = client.open_session().await?;
///     println!("Heartbeat every {:?}", session.heartbeat_interval());
///
///     if let Some(device) = devices.first() {
///         client.set_ws_power_state(&device.id, PowerAction::Toggle, 1).await?;
///     }
///
///     client.close().await;
///     Ok(())
/// }
/// ```
pub struct Client {
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    rest: Arc<HttpTransport>,
    resolver: CredentialResolver,
    devices: RwLock<Option<Vec<Device>>>,
    session: Option<Arc<Connection>>,
}

impl Client {
    /// Create a client using the system clock
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a client with a custom time and nonce source
    pub fn with_clock(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let rest = Arc::new(HttpTransport::new(config.clone(), clock.clone())?);
        let resolver = CredentialResolver::new(rest.clone(), clock.clone());
        Ok(Self {
            config,
            clock,
            rest,
            resolver,
            devices: RwLock::new(None),
            session: None,
        })
    }

    /// REST transport used by this client
    pub fn rest(&self) -> &HttpTransport {
        &self.rest
    }

    /// Log in with an email or phone account
    pub async fn login(&self, account: &Account) -> Result<Credentials> {
        self.resolver.resolve(account, None).await
    }

    /// Use an existing access token and API key instead of logging in
    pub fn use_credentials(&self, credentials: Credentials) {
        self.rest.set_credentials(credentials);
    }

    /// Current credentials, if logged in
    pub fn credentials(&self) -> Option<Credentials> {
        self.rest.credentials()
    }

    /// Device list, served from the local copy when one is loaded
    pub async fn devices(&self) -> Result<Vec<Device>> {
        if let Some(devices) = self.devices.read().clone() {
            return Ok(devices);
        }
        self.refresh_devices().await
    }

    /// Fetch the device list from the cloud and replace the local copy
    pub async fn refresh_devices(&self) -> Result<Vec<Device>> {
        let devices = self.rest.devices().await?;
        *self.devices.write() = Some(devices.clone());
        Ok(devices)
    }

    /// Look up one device
    ///
    /// The session's live view wins over the local copy, which wins over a
    /// REST lookup.
    pub async fn device(&self, device_id: &str) -> Result<Device> {
        if let Some(device) = self.session.as_ref().and_then(|s| s.device(device_id)) {
            return Ok(device);
        }
        if let Some(devices) = self.devices.read().as_ref() {
            return devices
                .iter()
                .find(|d| d.id == device_id)
                .cloned()
                .ok_or_else(|| EwelinkError::DeviceNotFound(device_id.to_string()));
        }
        self.rest.device(device_id).await
    }

    /// Open the WebSocket session and track every known device
    pub async fn open_session(&mut self) -> Result<Arc<Connection>> {
        if let Some(session) = self.session.as_ref().filter(|s| s.state() == SessionState::Ready) {
            return Ok(session.clone());
        }
        let credentials = self.rest.credentials().ok_or_else(|| {
            EwelinkError::Configuration("login is required before opening a session".to_string())
        })?;

        let url = self.rest.dispatch().await?;
        let devices = self.devices().await?;
        let config = SessionConfig::from(&self.config).with_clock(self.clock.clone());
        let session = Arc::new(Connection::connect(url, &credentials, config).await?);
        session.track_all(devices);

        self.session = Some(session.clone());
        Ok(session)
    }

    /// Close the WebSocket session, if open
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }

    /// Subscribe to push events of the open session
    pub fn subscribe(&self) -> Result<EventReceiver> {
        Ok(self.session()?.subscribe())
    }

    fn session(&self) -> Result<&Arc<Connection>> {
        self.session
            .as_ref()
            .filter(|s| s.state() == SessionState::Ready)
            .ok_or(EwelinkError::ConnectionClosed)
    }

    async fn ws_switch_params(&self, device_id: &str) -> Result<SwitchParams> {
        let reply = self.session()?.query(device_id, &SWITCH_FIELDS).await?;
        reply
            .get("params")
            .and_then(Value::as_object)
            .and_then(SwitchParams::from_params)
            .ok_or_else(|| EwelinkError::InvalidResponse(format!("device {} has no switch", device_id)))
    }

    /// Read a channel's power state over the WebSocket session
    pub async fn ws_power_state(&self, device_id: &str, channel: usize) -> Result<SwitchState> {
        let params = self.ws_switch_params(device_id).await?;
        switch::params_state_of(&params, channel)
    }

    /// Read every channel's power state over the WebSocket session
    pub async fn ws_power_states(&self, device_id: &str) -> Result<Vec<(usize, SwitchState)>> {
        Ok(switch::all_states(&self.ws_switch_params(device_id).await?))
    }

    /// Change a channel's power state over the WebSocket session
    ///
    /// Returns the state that was sent.
    pub async fn set_ws_power_state(
        &self,
        device_id: &str,
        action: PowerAction,
        channel: usize,
    ) -> Result<SwitchState> {
        let current = self.ws_switch_params(device_id).await?;
        let target = switch::resolve_action(switch::params_state_of(&current, channel)?, action);
        let params = switch::with_state(&current, channel, target)?;

        self.session()?
            .update(device_id, serde_json::to_value(&params)?)
            .await?;
        tracing::info!("Set {} channel {} to {}", device_id, channel, target);
        Ok(target)
    }

    /// Read a channel's power state over REST
    pub async fn power_state(&self, device_id: &str, channel: usize) -> Result<SwitchState> {
        let params = self
            .rest
            .device_status(device_id)
            .await?
            .ok_or(EwelinkError::OutOfRange { channel, count: 0 })?;
        switch::params_state_of(&params, channel)
    }

    /// Change a channel's power state over REST
    ///
    /// Offline devices are refused with [`EwelinkError::DeviceOffline`].
    pub async fn set_power_state(
        &self,
        device_id: &str,
        action: PowerAction,
        channel: usize,
    ) -> Result<SwitchState> {
        let device = self.device(device_id).await?;
        if !device.online {
            return Err(EwelinkError::DeviceOffline(device_id.to_string()));
        }
        let current = device
            .params
            .ok_or(EwelinkError::OutOfRange { channel, count: 0 })?;
        let target = switch::resolve_action(switch::params_state_of(&current, channel)?, action);
        let params = switch::with_state(&current, channel, target)?;

        self.rest.set_device_status(device_id, &params).await?;

        if let Some(devices) = self.devices.write().as_mut() {
            if let Some(cached) = devices.iter_mut().find(|d| d.id == device_id) {
                cached.params = Some(params);
            }
        }
        Ok(target)
    }

    /// Toggle a channel, over the session when one is open
    pub async fn toggle(&self, device_id: &str, channel: usize) -> Result<SwitchState> {
        if self.session().is_ok() {
            self.set_ws_power_state(device_id, PowerAction::Toggle, channel).await
        } else {
            self.set_power_state(device_id, PowerAction::Toggle, channel).await
        }
    }

    /// Raw `hundredDaysKwhData` energy log of a device
    pub async fn power_usage_raw(&self, device_id: &str) -> Result<String> {
        let reply = self
            .session()?
            .update(device_id, json!({ "hundredDaysKwh": "get" }))
            .await?;
        reply
            .pointer("/config/hundredDaysKwhData")
            .and_then(Value::as_str)
            .filter(|hex| !hex.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                EwelinkError::InvalidResponse(format!("no power usage data for {}", device_id))
            })
    }

    /// Energy usage of the current month
    pub async fn power_usage(&self, device_id: &str) -> Result<PowerUsage> {
        let raw = self.power_usage_raw(device_id).await?;
        power::decode(&raw, self.clock.day_of_month())
    }

    /// Current temperature reported by a sensor device, in degrees Celsius
    pub async fn temperature(&self, device_id: &str) -> Result<f64> {
        self.sensor(device_id, "temperature", |s| s.temperature).await
    }

    /// Current relative humidity reported by a sensor device, in percent
    pub async fn humidity(&self, device_id: &str) -> Result<f64> {
        self.sensor(device_id, "humidity", |s| s.humidity).await
    }

    /// Instantaneous power draw of a metering device, in watts
    pub async fn current_power(&self, device_id: &str) -> Result<f64> {
        self.sensor(device_id, "power", |s| s.power).await
    }

    /// Read one sensor value from a freshly fetched device record
    async fn sensor(
        &self,
        device_id: &str,
        reading: &'static str,
        pick: impl FnOnce(&Sensors) -> Option<f64>,
    ) -> Result<f64> {
        let device = self.rest.device(device_id).await?;
        pick(&device.sensors).ok_or_else(|| EwelinkError::NoSensor {
            device_id: device_id.to_string(),
            reading,
        })
    }

    /// Firmware update availability for every device
    pub async fn firmware_updates(&self) -> Result<Vec<FirmwareStatus>> {
        let devices = self.devices().await?;
        self.rest.firmware_updates(&devices).await
    }

    /// Firmware update availability for one device
    pub async fn firmware_update(&self, device_id: &str) -> Result<FirmwareStatus> {
        let device = self.device(device_id).await?;
        self.rest
            .firmware_updates(std::slice::from_ref(&device))
            .await?
            .into_iter()
            .find(|status| status.device_id == device_id)
            .ok_or_else(|| EwelinkError::InvalidResponse("no firmware information returned".to_string()))
    }

    /// Refresh the device list and write it to a snapshot file
    pub async fn save_devices_cache(&self, path: impl AsRef<Path>) -> Result<Vec<Device>> {
        let devices = self.refresh_devices().await?;
        cache::save_devices(path, &devices)?;
        Ok(devices)
    }

    /// Use a snapshot file as the local device list
    pub fn load_devices_cache(&self, path: impl AsRef<Path>) -> Result<Vec<Device>> {
        let devices = cache::load_devices(path)?;
        *self.devices.write() = Some(devices.clone());
        Ok(devices)
    }
}
