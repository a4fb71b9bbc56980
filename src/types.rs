use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Device identifier
pub type DeviceId = String;

/// Account region code (e.g. `us`, `eu`, `as`, `cn`)
pub type Region = String;

/// Session credentials returned by login
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Bearer access token (`at`)
    pub access_token: SecretString,
    /// User API key
    pub api_key: String,
    /// Region the account lives in
    pub region: Region,
}

impl Credentials {
    /// Build credentials from an already known token and API key
    pub fn new(
        access_token: impl Into<String>,
        api_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            api_key: api_key.into(),
            region: region.into(),
        }
    }
}

/// Login identity and secret supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct Account {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub password: Option<SecretString>,
}

impl Account {
    /// Account identified by email address
    pub fn email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            phone_number: None,
            password: Some(SecretString::from(password.into())),
        }
    }

    /// Account identified by phone number
    pub fn phone(phone_number: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: None,
            phone_number: Some(phone_number.into()),
            password: Some(SecretString::from(password.into())),
        }
    }
}

/// Power state of one switch channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
}

impl std::fmt::Display for SwitchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::On => f.write_str("on"),
            Self::Off => f.write_str("off"),
        }
    }
}

/// Requested power change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    On,
    Off,
    Toggle,
}

impl From<SwitchState> for PowerAction {
    fn from(state: SwitchState) -> Self {
        match state {
            SwitchState::On => Self::On,
            SwitchState::Off => Self::Off,
        }
    }
}

/// One channel of a multi-channel switch as it appears on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Outlet {
    /// 0-based outlet index
    pub outlet: u32,
    pub switch: SwitchState,
}

/// Switch parameters of a device
///
/// Serializes to the wire shape: `{"switch": "on"}` or
/// `{"switches": [{"outlet": 0, "switch": "on"}, ...]}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SwitchParams {
    Multi {
        #[serde(rename = "switches")]
        channels: Vec<Outlet>,
    },
    Single {
        switch: SwitchState,
    },
}

impl SwitchParams {
    /// Extract switch parameters from a raw `params` object
    ///
    /// Returns `None` when the object carries neither `switch` nor `switches`.
    pub fn from_params(params: &Map<String, Value>) -> Option<Self> {
        if let Some(switches) = params.get("switches") {
            let channels = serde_json::from_value(switches.clone()).ok()?;
            return Some(Self::Multi { channels });
        }
        let switch = serde_json::from_value(params.get("switch")?.clone()).ok()?;
        Some(Self::Single { switch })
    }
}

/// Model and firmware metadata of a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceExtra {
    pub model: Option<String>,
    pub firmware_version: Option<String>,
}

/// Sensor readings reported in the device parameters
///
/// Values arrive as numbers or numeric strings; anything else (for example
/// `"unavailable"`) reads as `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sensors {
    /// Degrees Celsius
    pub temperature: Option<f64>,
    /// Relative humidity in percent
    pub humidity: Option<f64>,
    /// Instantaneous power draw in watts
    pub power: Option<f64>,
}

const TEMPERATURE_KEYS: [&str; 3] = ["currentTemperature", "temperature", "temp"];
const HUMIDITY_KEYS: [&str; 2] = ["currentHumidity", "humidity"];
const POWER_KEYS: [&str; 3] = ["power", "currentPower", "fwPower"];

impl Sensors {
    pub(crate) fn from_params(params: &Map<String, Value>) -> Self {
        Self {
            temperature: reading(params, &TEMPERATURE_KEYS),
            humidity: reading(params, &HUMIDITY_KEYS),
            power: reading(params, &POWER_KEYS),
        }
    }

    fn write_params(&self, params: &mut Map<String, Value>) {
        let fields = [
            (TEMPERATURE_KEYS[0], self.temperature),
            (HUMIDITY_KEYS[0], self.humidity),
            (POWER_KEYS[0], self.power),
        ];
        for (key, value) in fields {
            if let Some(number) = value.and_then(serde_json::Number::from_f64) {
                params.insert(key.to_string(), Value::Number(number));
            }
        }
    }
}

/// First present key decides; an unparsable value is no reading
fn reading(params: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    let value = keys.iter().find_map(|key| params.get(*key).filter(|v| !v.is_null()))?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// Device record as listed by the account
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// API key of the device owner (differs from the user key for shared devices)
    pub api_key: String,
    pub online: bool,
    pub params: Option<SwitchParams>,
    pub extra: DeviceExtra,
    pub sensors: Sensors,
}

/// Wire shape of a device in `/user/device` and in the devices cache file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireDevice {
    deviceid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    apikey: String,
    #[serde(default)]
    online: bool,
    #[serde(default)]
    params: Map<String, Value>,
    #[serde(default)]
    extra: WireExtra,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireExtra {
    #[serde(default)]
    extra: WireExtraInner,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireExtraInner {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
}

impl From<WireDevice> for Device {
    fn from(wire: WireDevice) -> Self {
        let params = SwitchParams::from_params(&wire.params);
        let sensors = Sensors::from_params(&wire.params);
        let firmware_version = wire
            .params
            .get("fwVersion")
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            id: wire.deviceid,
            name: wire.name,
            api_key: wire.apikey,
            online: wire.online,
            params,
            extra: DeviceExtra {
                model: wire.extra.extra.model,
                firmware_version,
            },
            sensors,
        }
    }
}

impl From<&Device> for WireDevice {
    fn from(device: &Device) -> Self {
        let mut params = match device.params.as_ref().map(serde_json::to_value) {
            Some(Ok(Value::Object(map))) => map,
            _ => Map::new(),
        };
        if let Some(version) = &device.extra.firmware_version {
            params.insert("fwVersion".to_string(), Value::String(version.clone()));
        }
        device.sensors.write_params(&mut params);

        Self {
            deviceid: device.id.clone(),
            name: device.name.clone(),
            apikey: device.api_key.clone(),
            online: device.online,
            params,
            extra: WireExtra {
                extra: WireExtraInner {
                    model: device.extra.model.clone(),
                },
            },
        }
    }
}

/// Firmware check result for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareStatus {
    pub device_id: DeviceId,
    /// Version available for upgrade, `None` when up to date
    pub update: Option<String>,
}
