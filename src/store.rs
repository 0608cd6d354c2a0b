//! Durable "last non-off mode" storage.
//!
//! The only durable state this layer owns: the last non-off hvac mode seen
//! per device, consulted when the user hits a bare power-on toggle with no
//! explicit mode. Storage may be unavailable (quota, permissions); callers
//! swallow failures and fall back to the device's first supported non-off
//! mode, so nothing here is ever user-visible.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{ApiError, ApiResult};

pub trait ModeStore: Send + Sync {
    fn save(&self, device_id: &str, mode: &str) -> ApiResult<()>;
    fn load(&self, device_id: &str) -> ApiResult<Option<String>>;
}

/// In-memory store; state lasts for the process lifetime only.
#[derive(Default)]
pub struct MemoryModeStore {
    modes: Mutex<BTreeMap<String, String>>,
}

impl ModeStore for MemoryModeStore {
    fn save(&self, device_id: &str, mode: &str) -> ApiResult<()> {
        self.modes
            .lock()
            .map_err(|_| ApiError::mode_store("mode map lock poisoned"))?
            .insert(device_id.to_string(), mode.to_string());
        Ok(())
    }

    fn load(&self, device_id: &str) -> ApiResult<Option<String>> {
        Ok(self
            .modes
            .lock()
            .map_err(|_| ApiError::mode_store("mode map lock poisoned"))?
            .get(device_id)
            .cloned())
    }
}

/// One small JSON map on disk, rewritten whole on every save.
pub struct JsonFileModeStore {
    path: PathBuf,
}

impl JsonFileModeStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_map(&self) -> ApiResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl ModeStore for JsonFileModeStore {
    fn save(&self, device_id: &str, mode: &str) -> ApiResult<()> {
        let mut map = self.read_map().unwrap_or_default();
        if map.get(device_id).map(String::as_str) == Some(mode) {
            return Ok(());
        }
        map.insert(device_id.to_string(), mode.to_string());
        fs::write(&self.path, serde_json::to_string_pretty(&map)?)?;
        Ok(())
    }

    fn load(&self, device_id: &str) -> ApiResult<Option<String>> {
        Ok(self.read_map()?.get(device_id).cloned())
    }
}
