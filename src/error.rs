use thiserror::Error;

/// Result type for eWeLink operations
pub type Result<T> = std::result::Result<T, EwelinkError>;

/// Errors that can occur when talking to the eWeLink cloud
#[derive(Error, Debug)]
pub enum EwelinkError {
    /// Invalid or ambiguous caller input, never retried
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Bad credentials or a malformed login/handshake response
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The account region was redirected twice during login
    #[error("Region redirect to `{region}` did not resolve the account region")]
    RegionRedirect {
        /// Region suggested by the second redirect
        region: String,
    },

    /// Requested device does not exist on the account
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Device is offline and cannot accept commands
    #[error("Device is offline: {0}")]
    DeviceOffline(String),

    /// Device does not report the requested sensor reading
    #[error("Device {device_id} has no {reading} reading")]
    NoSensor {
        device_id: String,
        /// Name of the missing reading
        reading: &'static str,
    },

    /// Channel number outside of the device's channel range
    #[error("Channel {channel} is out of range (device has {count} channels)")]
    OutOfRange {
        /// Requested 1-based channel
        channel: usize,
        /// Number of channels on the device
        count: usize,
    },

    /// Request timed out waiting for response
    #[error("Request timeout")]
    Timeout,

    /// The session was closed while the request was still pending
    #[error("Request cancelled")]
    Cancelled,

    /// Connection is not open or was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Decoder input does not match the expected layout
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// API returned a non-zero error code
    #[error("API error {code}")]
    Api {
        /// Numeric error code reported by the server
        code: i64,
        /// Raw payload of the failing response
        payload: serde_json::Value,
    },

    /// Invalid or unexpected response from API
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EwelinkError {
    /// Build an API error from a response body carrying a non-zero `error` field
    pub(crate) fn api(code: i64, payload: serde_json::Value) -> Self {
        Self::Api { code, payload }
    }
}
