//! Outbound command interface.
//!
//! Commands are fire-and-forget: nothing here awaits a response, and
//! success is only ever inferred by a later authoritative update matching
//! the requested value. That is the external collaborator's contract, not
//! a gap to fix.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One remote service invocation, in the store's domain/service shape.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub entity_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ServiceCall {
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            entity_id: entity_id.into(),
            data: Map::new(),
        }
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn set_temperature(entity_id: &str, temperature: f64) -> Self {
        Self::new("climate", "set_temperature", entity_id)
            .with_data("temperature", Value::from(temperature))
    }

    #[must_use]
    pub fn set_hvac_mode(entity_id: &str, mode: &str) -> Self {
        Self::new("climate", "set_hvac_mode", entity_id).with_data("hvac_mode", Value::from(mode))
    }

    #[must_use]
    pub fn set_fan_mode(entity_id: &str, mode: &str) -> Self {
        Self::new("climate", "set_fan_mode", entity_id).with_data("fan_mode", Value::from(mode))
    }

    #[must_use]
    pub fn set_preset_mode(entity_id: &str, mode: &str) -> Self {
        Self::new("climate", "set_preset_mode", entity_id)
            .with_data("preset_mode", Value::from(mode))
    }

    #[must_use]
    pub fn set_swing_mode(entity_id: &str, mode: &str) -> Self {
        Self::new("climate", "set_swing_mode", entity_id)
            .with_data("swing_mode", Value::from(mode))
    }

    #[must_use]
    pub fn set_season(entity_id: &str, season: &str) -> Self {
        Self::new("climate_manager", "set_season", entity_id)
            .with_data("season", Value::from(season))
    }

    #[must_use]
    pub fn set_timer(entity_id: &str, timer: &str, minutes: u64) -> Self {
        Self::new("climate_manager", "set_timer", entity_id)
            .with_data("timer", Value::from(timer))
            .with_data("minutes", Value::from(minutes))
    }

    #[must_use]
    pub fn set_number_value(entity_id: &str, value: f64) -> Self {
        Self::new("number", "set_value", entity_id).with_data("value", Value::from(value))
    }

    #[must_use]
    pub fn select_option(entity_id: &str, option: &str) -> Self {
        Self::new("select", "select_option", entity_id).with_data("option", Value::from(option))
    }

    #[must_use]
    pub fn turn_on(entity_id: &str) -> Self {
        let domain = entity_id.split('.').next().unwrap_or("switch");
        Self::new(domain, "turn_on", entity_id)
    }

    #[must_use]
    pub fn turn_off(entity_id: &str) -> Self {
        let domain = entity_id.split('.').next().unwrap_or("switch");
        Self::new(domain, "turn_off", entity_id)
    }
}

/// Where coalesced commands go. Implementations hand the call to the real
/// command mechanism (and may spawn their own I/O); no return value is
/// consumed here.
pub trait CommandSink: Send + Sync {
    fn invoke(&self, call: ServiceCall);
}
