use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::PanelConfig;

/// One entity as reported by the remote store: a state string plus an
/// untyped attribute bag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    #[must_use]
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
        }
    }

    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// The store reports "unavailable"/"unknown" for entities it has lost
    /// contact with; those count as absent for every consumer here.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !matches!(self.state.as_str(), "unavailable" | "unknown")
    }

    #[must_use]
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn attr_str_list(&self, key: &str) -> Vec<String> {
        self.attributes
            .get(key)
            .and_then(Value::as_array)
            .map(|xs| {
                xs.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Flat snapshot of the remote store's namespace: every known entity id
/// and its current state.
///
/// Owned by the external store and read-only from this layer; push updates
/// carry no diff, so consumers rebuild or patch the view and re-derive what
/// changed by comparison. A `BTreeMap` keeps scans reproducible.
#[derive(Clone, Debug, Default)]
pub struct StateView {
    entities: BTreeMap<String, EntityState>,
}

impl StateView {
    #[must_use]
    pub fn new(entities: impl IntoIterator<Item = EntityState>) -> Self {
        Self {
            entities: entities
                .into_iter()
                .map(|e| (e.entity_id.clone(), e))
                .collect(),
        }
    }

    pub fn upsert(&mut self, entity: EntityState) {
        self.entities.insert(entity.entity_id.clone(), entity);
    }

    pub fn remove(&mut self, entity_id: &str) {
        self.entities.remove(entity_id);
    }

    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<&EntityState> {
        self.entities.get(entity_id)
    }

    #[must_use]
    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityState> {
        self.entities.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl<'a> IntoIterator for &'a StateView {
    type Item = &'a EntityState;
    type IntoIter = std::collections::btree_map::Values<'a, String, EntityState>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.values()
    }
}

/// A user-facing control of the primary device. Each field carries its own
/// optimistic hold window, and debounce timers are keyed per field.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Temperature,
    HvacMode,
    FanMode,
    PresetMode,
    SwingMode,
    Season,
    TimerOnMinutes,
    TimerOffMinutes,
}

impl Field {
    /// How long an unconfirmed optimistic value stays on screen.
    #[must_use]
    pub const fn hold(self, config: &PanelConfig) -> Duration {
        match self {
            Self::Temperature => Duration::from_millis(config.temperature_hold_ms),
            Self::HvacMode | Self::FanMode | Self::PresetMode | Self::SwingMode | Self::Season => {
                Duration::from_millis(config.mode_hold_ms)
            }
            Self::TimerOnMinutes | Self::TimerOffMinutes => {
                Duration::from_millis(config.timer_minutes_hold_ms)
            }
        }
    }

    /// Quiescence window before the coalesced command is sent.
    #[must_use]
    pub const fn debounce(self, config: &PanelConfig) -> Duration {
        match self {
            Self::Temperature | Self::TimerOnMinutes | Self::TimerOffMinutes => config.debounce(),
            _ => config.mode_debounce(),
        }
    }
}

/// Typed view over a climate entity's authoritative state.
///
/// Only present when the store currently reports the device; the UI never
/// mutates this, it only overlays it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub entity_id: String,
    pub hvac_mode: Option<String>,
    pub target_temperature: Option<f64>,
    pub current_temperature: Option<f64>,
    pub fan_mode: Option<String>,
    pub preset_mode: Option<String>,
    pub swing_mode: Option<String>,
    pub hvac_modes: Vec<String>,
    pub fan_modes: Vec<String>,
    pub preset_modes: Vec<String>,
    pub swing_modes: Vec<String>,
}

impl DeviceSnapshot {
    #[must_use]
    pub fn from_view(view: &StateView, entity_id: &str) -> Option<Self> {
        let entity = view.get(entity_id).filter(|e| e.is_live())?;
        Some(Self {
            entity_id: entity.entity_id.clone(),
            hvac_mode: Some(entity.state.clone()),
            target_temperature: entity.attr_f64("temperature"),
            current_temperature: entity.attr_f64("current_temperature"),
            fan_mode: entity.attr_str("fan_mode").map(str::to_string),
            preset_mode: entity.attr_str("preset_mode").map(str::to_string),
            swing_mode: entity.attr_str("swing_mode").map(str::to_string),
            hvac_modes: entity.attr_str_list("hvac_modes"),
            fan_modes: entity.attr_str_list("fan_modes"),
            preset_modes: entity.attr_str_list("preset_modes"),
            swing_modes: entity.attr_str_list("swing_modes"),
        })
    }

    #[must_use]
    pub fn is_off(&self) -> bool {
        self.hvac_mode.as_deref() == Some("off")
    }

    /// First supported mode that is not "off"; the safe default when no
    /// remembered mode applies.
    #[must_use]
    pub fn first_non_off_mode(&self) -> Option<&str> {
        self.hvac_modes
            .iter()
            .map(String::as_str)
            .find(|m| *m != "off")
    }

    #[must_use]
    pub fn supports_hvac_mode(&self, mode: &str) -> bool {
        self.hvac_modes.iter().any(|m| m == mode)
    }

    /// Authoritative value for a field, in the overlay's value space.
    #[must_use]
    pub fn field_value(&self, field: Field) -> Option<Value> {
        match field {
            Field::Temperature => self.target_temperature.map(Value::from),
            Field::HvacMode => self.hvac_mode.clone().map(Value::from),
            Field::FanMode => self.fan_mode.clone().map(Value::from),
            Field::PresetMode => self.preset_mode.clone().map(Value::from),
            Field::SwingMode => self.swing_mode.clone().map(Value::from),
            // Season and timer minutes live on auxiliary entities, not on
            // the climate entity itself; the overlay reconciles those from
            // the auxiliary snapshots the panel feeds it.
            Field::Season | Field::TimerOnMinutes | Field::TimerOffMinutes => None,
        }
    }
}
