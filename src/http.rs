//! REST transport for the eWeLink cloud API.
//!
//! Every endpoint response is parsed once into a typed structure here; a
//! non-zero `error` field in the body becomes [`EwelinkError::Api`].

use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::{EwelinkError, Result};
use crate::types::{Credentials, Device, DeviceId, FirmwareStatus, SwitchParams, WireDevice};

const APP_ID_HEADER: &str = "X-CK-Appid";
const API_VERSION: u8 = 8;

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(default)]
    devicelist: Vec<WireDevice>,
}

#[derive(Debug, Deserialize)]
struct DeviceStatus {
    #[serde(default)]
    params: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct DispatchReply {
    domain: String,
    port: u16,
}

#[derive(Debug, Serialize)]
struct DeviceInfo<'a> {
    model: &'a str,
    version: &'a str,
    deviceid: &'a str,
}

#[derive(Debug, Deserialize)]
struct UpgradeList {
    #[serde(rename = "upgradeInfoList", default)]
    upgrade_info_list: Vec<UpgradeInfo>,
}

#[derive(Debug, Deserialize)]
struct UpgradeInfo {
    deviceid: DeviceId,
    #[serde(default)]
    version: Option<String>,
}

/// Authenticated HTTP client for the regional eWeLink API
pub struct HttpTransport {
    client: Client,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    credentials: RwLock<Option<Credentials>>,
}

impl HttpTransport {
    /// Create a transport from a configuration
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = Client::builder().timeout(config.http_timeout()).build()?;
        Ok(Self {
            client,
            config,
            clock,
            credentials: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Credentials used for authenticated calls
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }

    /// Replace the credentials used for authenticated calls
    pub fn set_credentials(&self, credentials: Credentials) {
        *self.credentials.write() = Some(credentials);
    }

    /// Region of the current credentials, or the configured one
    pub fn region(&self) -> String {
        self.credentials
            .read()
            .as_ref()
            .map_or_else(|| self.config.region().to_string(), |c| c.region.clone())
    }

    fn api_url(&self) -> String {
        self.config.api_url(&self.region())
    }

    /// Post a pre-serialized login body, returning the raw reply
    ///
    /// Login replies are returned even when they carry an error code, so
    /// the caller can follow region redirects.
    pub(crate) async fn login(&self, region: &str, body: String, signature: Option<String>) -> Result<Value> {
        let url = format!("{}/user/login", self.config.api_url(region));
        tracing::debug!("POST {}", url);

        let mut request = self
            .client
            .post(url)
            .header(APP_ID_HEADER, self.config.app_id())
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(signature) = signature {
            request = request.header(AUTHORIZATION, format!("Sign {signature}"));
        }

        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// List every device on the account
    pub async fn devices(&self) -> Result<Vec<Device>> {
        let stamp = self.clock.stamp();
        let request = self
            .authorized(self.client.get(format!("{}/user/device", self.api_url())))?
            .query(&[
                ("lang", "en".to_string()),
                ("appid", self.config.app_id().to_string()),
                ("ts", stamp.ts.to_string()),
                ("version", API_VERSION.to_string()),
                ("getTags", "1".to_string()),
            ]);

        let list: DeviceList = self.send(request).await?;
        tracing::debug!("Listed {} devices", list.devicelist.len());
        Ok(list.devicelist.into_iter().map(Device::from).collect())
    }

    /// Fetch a single device
    pub async fn device(&self, device_id: &str) -> Result<Device> {
        let stamp = self.clock.stamp();
        let url = format!("{}/user/device/{}", self.api_url(), device_id);
        let request = self.authorized(self.client.get(url))?.query(&[
            ("deviceid", device_id.to_string()),
            ("appid", self.config.app_id().to_string()),
            ("nonce", stamp.nonce),
            ("ts", stamp.ts.to_string()),
            ("version", API_VERSION.to_string()),
        ]);

        match self.send::<WireDevice>(request).await {
            Ok(device) => Ok(device.into()),
            Err(EwelinkError::Api { code: 400 | 404, .. }) => {
                Err(EwelinkError::DeviceNotFound(device_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Read the switch parameters of a device
    pub async fn device_status(&self, device_id: &str) -> Result<Option<SwitchParams>> {
        let stamp = self.clock.stamp();
        let request = self
            .authorized(self.client.get(format!("{}/user/device/status", self.api_url())))?
            .query(&[
                ("deviceid", device_id.to_string()),
                ("appid", self.config.app_id().to_string()),
                ("nonce", stamp.nonce),
                ("ts", stamp.ts.to_string()),
                ("version", API_VERSION.to_string()),
                ("params", "switch|switches".to_string()),
            ]);

        match self.send::<DeviceStatus>(request).await {
            Ok(status) => Ok(SwitchParams::from_params(&status.params)),
            Err(EwelinkError::Api { code: 400 | 404, .. }) => {
                Err(EwelinkError::DeviceNotFound(device_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Set the switch parameters of a device
    pub async fn set_device_status(&self, device_id: &str, params: &SwitchParams) -> Result<()> {
        let stamp = self.clock.stamp();
        let body = json!({
            "deviceid": device_id,
            "params": params,
            "appid": self.config.app_id(),
            "nonce": stamp.nonce,
            "ts": stamp.ts,
            "version": API_VERSION,
        });
        let request = self
            .authorized(self.client.post(format!("{}/user/device/status", self.api_url())))?
            .json(&body);

        let _: Value = self.send(request).await?;
        Ok(())
    }

    /// Ask the dispatch service which WebSocket server to use
    pub async fn dispatch(&self) -> Result<String> {
        let stamp = self.clock.stamp();
        let api_url = self.api_url();
        let base = api_url.strip_suffix("/api").unwrap_or(&api_url);
        let body = json!({
            "accept": "ws",
            "appid": self.config.app_id(),
            "nonce": stamp.nonce,
            "ts": stamp.ts,
            "version": API_VERSION,
        });
        let request = self
            .authorized(self.client.post(format!("{base}/dispatch/app")))?
            .json(&body);

        let reply: DispatchReply = self.send(request).await?;
        Ok(format!("wss://{}:{}/api/ws", reply.domain, reply.port))
    }

    /// Check the firmware update server for each device
    pub async fn firmware_updates(&self, devices: &[Device]) -> Result<Vec<FirmwareStatus>> {
        let infos = devices
            .iter()
            .map(|device| match (&device.extra.model, &device.extra.firmware_version) {
                (Some(model), Some(version)) => Ok(DeviceInfo {
                    model,
                    version,
                    deviceid: &device.id,
                }),
                _ => Err(EwelinkError::InvalidResponse(format!(
                    "no firmware information for device {}",
                    device.id
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        let url = format!("{}/app", self.config.ota_url(&self.region()));
        let request = self
            .authorized(self.client.post(url))?
            .json(&json!({ "deviceInfoList": infos }));

        let list: UpgradeList = self.send(request).await?;
        Ok(list
            .upgrade_info_list
            .into_iter()
            .map(|info| FirmwareStatus {
                device_id: info.deviceid,
                update: info.version.filter(|v| !v.is_empty()),
            })
            .collect())
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let credentials = self.credentials.read();
        let credentials = credentials.as_ref().ok_or_else(|| {
            EwelinkError::Configuration("not logged in: credentials are required".to_string())
        })?;
        Ok(request
            .header(APP_ID_HEADER, self.config.app_id())
            .bearer_auth(credentials.access_token.expose_secret()))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?.error_for_status()?;
        let body: Value = response.json().await?;
        tracing::trace!("Response: {}", body);

        if let Some(code) = body.get("error").and_then(Value::as_i64).filter(|c| *c != 0) {
            return Err(EwelinkError::api(code, body));
        }
        serde_json::from_value(body)
            .map_err(|e| EwelinkError::InvalidResponse(format!("unexpected response shape: {}", e)))
    }
}
