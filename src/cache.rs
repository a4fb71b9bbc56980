//! Local snapshot of the device list (`{"devices": [...]}`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Device, WireDevice};

/// Default snapshot file name
pub const DEFAULT_CACHE_FILE: &str = "devices-cache.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    devices: Vec<WireDevice>,
}

/// Write `devices` to `path`, creating parent directories as needed
pub fn save_devices(path: impl AsRef<Path>, devices: &[Device]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = CacheFile {
        devices: devices.iter().map(WireDevice::from).collect(),
    };
    std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
    tracing::debug!("Saved {} devices to {}", devices.len(), path.display());
    Ok(())
}

/// Read devices from `path`
///
/// A missing file yields an empty list.
pub fn load_devices(path: impl AsRef<Path>) -> Result<Vec<Device>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file: CacheFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    Ok(file.devices.into_iter().map(Device::from).collect())
}
