//! Lookup and caching of the per-device aggregate settings sensor.
//!
//! The integration publishes one "settings" sensor per managed device,
//! carrying the option map (timer minutes, language, notification windows)
//! as attributes and naming the owning climate entity in a
//! `climate_entity` attribute. Finding it means a linear scan over the
//! namespace, so reads go through an [`ExpiringCache`] sized to the UI
//! refresh rate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::cache::ExpiringCache;
use crate::config::PanelConfig;
use crate::model::state::{EntityState, StateView};

/// Per-device settings sensors in both naming conventions.
const SETTINGS_PREFIXES: &[&str] = &[
    "sensor.climate_manager_settings_",
    "sensor.climate_manager_impostazioni_",
];

/// Installation-wide fallback sensors, used when no per-device one exists.
const GLOBAL_SETTINGS_IDS: &[&str] = &[
    "sensor.climate_manager_settings",
    "sensor.climate_manager_impostazioni",
];

/// Snapshot of the aggregate settings sensor at fetch time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SettingsSnapshot {
    pub entity_id: String,
    pub state: String,
    /// Owning climate entity as declared by the sensor, when present.
    pub climate_entity: Option<String>,
    /// The raw option map published as sensor attributes.
    pub options: Map<String, Value>,
    pub fetched_at: DateTime<Utc>,
}

impl SettingsSnapshot {
    fn from_entity(entity: &EntityState) -> Self {
        Self {
            entity_id: entity.entity_id.clone(),
            state: entity.state.clone(),
            climate_entity: entity.attr_str("climate_entity").map(str::to_string),
            options: entity.attributes.clone(),
            fetched_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(Value::as_u64)
    }

    /// Timer default in minutes, as published by the integration
    /// (`timer_on_minutes` / `timer_off_minutes`).
    #[must_use]
    pub fn timer_minutes(&self, key: &str, default: u64) -> u64 {
        self.option_u64(key).unwrap_or(default)
    }
}

fn scan(view: &StateView, device_id: &str) -> Option<SettingsSnapshot> {
    let per_device = view.iter().find(|e| {
        e.is_live()
            && SETTINGS_PREFIXES
                .iter()
                .any(|p| e.entity_id.starts_with(p))
            && e.attr_str("climate_entity") == Some(device_id)
    });

    let found = per_device.or_else(|| {
        GLOBAL_SETTINGS_IDS
            .iter()
            .filter_map(|id| view.get(id))
            .find(|e| e.is_live())
    });

    found.map(SettingsSnapshot::from_entity)
}

/// Cached settings lookups, one entry per device id.
#[derive(Clone)]
pub struct SettingsCache {
    cache: ExpiringCache<String, SettingsSnapshot>,
}

impl SettingsCache {
    #[must_use]
    pub fn new(config: &PanelConfig) -> Self {
        Self {
            cache: ExpiringCache::new(config.settings_fresh(), config.settings_evict()),
        }
    }

    /// The settings snapshot for `device_id`, re-serving a cached one
    /// within the freshness window. `None` means "no settings configured";
    /// callers degrade visibly instead of failing.
    #[must_use]
    pub fn get(&self, view: &StateView, device_id: &str) -> Option<SettingsSnapshot> {
        if let Some(snapshot) = self.cache.get_fresh(&device_id.to_string()) {
            return Some(snapshot);
        }

        let snapshot = scan(view, device_id)?;
        self.cache.insert(device_id.to_string(), snapshot.clone());
        Some(snapshot)
    }

    /// Callers that just issued a command expected to change this device's
    /// settings must invalidate before the next trusted read.
    pub fn invalidate(&self, device_id: &str) {
        self.cache.invalidate(&device_id.to_string());
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

/// Gate for the persistent "no settings configured" warning.
///
/// The namespace is populated asynchronously at startup, so a missing
/// settings sensor is only worth surfacing once it has stayed missing for
/// the display delay. Until then the warning stays suppressed to avoid a
/// flash on transient races.
pub struct SettingsWarning {
    delay: Duration,
    armed: Mutex<HashMap<String, Instant>>,
}

impl SettingsWarning {
    #[must_use]
    pub fn new(config: &PanelConfig) -> Self {
        Self {
            delay: config.warning_delay(),
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the persistent warning should be shown for `device_id`.
    pub fn check(&self, device_id: &str, has_settings: bool) -> bool {
        let mut armed = self.armed.lock().expect("warning lock poisoned");
        if has_settings {
            armed.remove(device_id);
            return false;
        }
        match armed.get(device_id) {
            Some(since) => since.elapsed() >= self.delay,
            None => {
                armed.insert(device_id.to_string(), Instant::now());
                false
            }
        }
    }

    pub fn clear(&self, device_id: &str) {
        self.armed
            .lock()
            .expect("warning lock poisoned")
            .remove(device_id);
    }
}
