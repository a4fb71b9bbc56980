use std::time::Duration;

use crate::types::Region;

/// Application id of the official eWeLink app
pub const DEFAULT_APP_ID: &str = "oeVkj2lYFGnJu5XUtWisfW4utiN4u9Mq";

/// Region used until login reports the account's own region
pub const DEFAULT_REGION: &str = "us";

/// Client configuration
///
/// # Example
///
/// ```
/// use ewelink::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new()
///     .with_region("eu")
///     .with_app_secret("secret")
///     .with_request_timeout(Duration::from_secs(5));
/// assert_eq!(config.api_url("eu"), "https://eu-api.coolkit.cc:8080/api");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    region: Region,
    app_id: String,
    app_secret: Option<String>,
    http_timeout: Duration,
    request_timeout: Duration,
    api_url_override: Option<String>,
    ota_url_override: Option<String>,
}

impl ClientConfig {
    /// Default timeout for REST calls.
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);
    /// Default timeout for WebSocket commands.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Configuration with the default app id and region
    pub fn new() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            app_id: DEFAULT_APP_ID.to_string(),
            app_secret: None,
            http_timeout: Self::DEFAULT_HTTP_TIMEOUT,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            api_url_override: None,
            ota_url_override: None,
        }
    }

    /// Configuration read from `EWELINK_REGION`, `EWELINK_APP_ID` and
    /// `EWELINK_APP_SECRET`, falling back to defaults for unset variables
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(region) = std::env::var("EWELINK_REGION") {
            config.region = region;
        }
        if let Ok(app_id) = std::env::var("EWELINK_APP_ID") {
            config.app_id = app_id;
        }
        if let Ok(secret) = std::env::var("EWELINK_APP_SECRET") {
            config.app_secret = Some(secret).filter(|s| !s.is_empty());
        }
        config
    }

    /// Sets the initial region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Sets the application id.
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    /// Sets the application secret used to sign login requests.
    pub fn with_app_secret(mut self, secret: impl Into<String>) -> Self {
        self.app_secret = Some(secret.into());
        self
    }

    /// Sets the REST timeout.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Sets the WebSocket command timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sends every REST call to `url` instead of the regional API host.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url_override = Some(url.into());
        self
    }

    /// Sends firmware checks to `url` instead of the regional OTA host.
    pub fn with_ota_url(mut self, url: impl Into<String>) -> Self {
        self.ota_url_override = Some(url.into());
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn app_secret(&self) -> Option<&str> {
        self.app_secret.as_deref()
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// REST base URL for `region`
    pub fn api_url(&self, region: &str) -> String {
        match &self.api_url_override {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{region}-api.coolkit.cc:8080/api"),
        }
    }

    /// Firmware update base URL for `region`
    pub fn ota_url(&self, region: &str) -> String {
        match &self.ota_url_override {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{region}-ota.coolkit.cc:8080/otaother"),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
