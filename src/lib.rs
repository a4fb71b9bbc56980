//! Rust library for controlling eWeLink (Sonoff) smart switches
//!
//! This library provides an async API for the eWeLink cloud. It supports:
//!
//! - Login by email or phone number, with automatic region resolution
//! - Device listing and single/multi-channel switch control over REST
//! - A persistent WebSocket session with heartbeat and push events
//! - Power usage reports for energy-monitoring plugs
//! - Firmware update checks
//! - A local device list snapshot
//!
//! # Quick Start
//!
//! ```no_run
//! use ewelink::{Account, Client, ClientConfig, DeviceEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new(ClientConfig::new().with_region("eu"))?;
//!     client.login(&Account::email("me@example.com", "password")).await?;
//!
//!     for device in client.devices().await? {
//!         println!("{} ({}): online={}", device.name, device.id, device.online);
//!     }
//!
//!     client.open_session().await?;
//!     let mut events = client.subscribe()?;
//!     while let Ok(event) = events.recv().await {
//!         if let DeviceEvent::StateChanged { device_id, params } = event {
//!             println!("{} changed: {:?}", device_id, params);
//!             break;
//!         }
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Session Only
//!
//! If you already hold an access token and the WebSocket URL, the session can
//! be used on its own:
//!
//! ```no_run
//! use ewelink::{Connection, Credentials, SessionConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Credentials::new("token", "apikey", "eu");
//!     let session = Connection::connect(
//!         "wss://eu-pconnect3.coolkit.cc:8080/api/ws",
//!         &credentials,
//!         SessionConfig::new(),
//!     )
//!     .await?;
//!     session.update("1000abcdef", json!({ "switch": "on" })).await?;
//!     session.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Client**: Facade composing login, REST and the session
//! - **Auth**: Password login and region redirects
//! - **Http**: Regional REST API
//! - **Connection**: WebSocket session, heartbeat and reply correlation
//! - **Protocol**: JSON frame structures
//! - **Switch / Power**: Switch state model and power usage decoding
//! - **Types**: Domain types and data structures

mod auth;
pub mod cache;
mod client;
mod clock;
mod config;
mod connection;
mod error;
mod http;
pub mod power;
mod protocol;
mod subscription;
pub mod switch;
mod types;

// Public exports
pub use auth::{password_digest, sign, CredentialResolver, Identity};
pub use client::Client;
pub use clock::{Clock, FixedClock, Stamp, SystemClock};
pub use config::{ClientConfig, DEFAULT_APP_ID, DEFAULT_REGION};
pub use connection::{Connection, SessionConfig, SessionState};
pub use error::{EwelinkError, Result};
pub use http::HttpTransport;
pub use power::{DailyUsage, PowerUsage};
pub use subscription::{DeviceEvent, EventReceiver};
pub use types::{
    Account, Credentials, Device, DeviceExtra, DeviceId, FirmwareStatus, Outlet, PowerAction,
    Region, Sensors, SwitchParams, SwitchState,
};
