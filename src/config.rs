use std::time::Duration;

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Timing knobs for the panel state layer.
///
/// All windows are in milliseconds. The defaults reproduce the observed
/// backend latencies: a short debounce before sending, an 8 s optimistic
/// hold for temperature, 15 s for the slower mode round-trips, and a 2 s
/// hold on timer-minute fields so optimism never fights in-progress typing.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct PanelConfig {
    #[serde(default = "PanelConfig::default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub mode_debounce_ms: u64,
    #[serde(default = "PanelConfig::default_temperature_hold_ms")]
    pub temperature_hold_ms: u64,
    #[serde(default = "PanelConfig::default_mode_hold_ms")]
    pub mode_hold_ms: u64,
    #[serde(default = "PanelConfig::default_timer_minutes_hold_ms")]
    pub timer_minutes_hold_ms: u64,
    #[serde(default = "PanelConfig::default_settings_fresh_ms")]
    pub settings_fresh_ms: u64,
    #[serde(default = "PanelConfig::default_settings_evict_ms")]
    pub settings_evict_ms: u64,
    #[serde(default = "PanelConfig::default_warning_delay_ms")]
    pub warning_delay_ms: u64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
            mode_debounce_ms: 0,
            temperature_hold_ms: Self::default_temperature_hold_ms(),
            mode_hold_ms: Self::default_mode_hold_ms(),
            timer_minutes_hold_ms: Self::default_timer_minutes_hold_ms(),
            settings_fresh_ms: Self::default_settings_fresh_ms(),
            settings_evict_ms: Self::default_settings_evict_ms(),
            warning_delay_ms: Self::default_warning_delay_ms(),
        }
    }
}

impl PanelConfig {
    const fn default_debounce_ms() -> u64 {
        1000
    }

    const fn default_temperature_hold_ms() -> u64 {
        8000
    }

    const fn default_mode_hold_ms() -> u64 {
        15_000
    }

    const fn default_timer_minutes_hold_ms() -> u64 {
        2000
    }

    const fn default_settings_fresh_ms() -> u64 {
        1000
    }

    const fn default_settings_evict_ms() -> u64 {
        2000
    }

    const fn default_warning_delay_ms() -> u64 {
        5000
    }

    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub const fn mode_debounce(&self) -> Duration {
        Duration::from_millis(self.mode_debounce_ms)
    }

    #[must_use]
    pub const fn settings_fresh(&self) -> Duration {
        Duration::from_millis(self.settings_fresh_ms)
    }

    #[must_use]
    pub const fn settings_evict(&self) -> Duration {
        Duration::from_millis(self.settings_evict_ms)
    }

    #[must_use]
    pub const fn warning_delay(&self) -> Duration {
        Duration::from_millis(self.warning_delay_ms)
    }
}

pub fn parse(filename: &str) -> Result<PanelConfig, ConfigError> {
    let settings = Config::builder()
        .add_source(config::File::with_name(filename))
        .build()?;

    settings.try_deserialize()
}
