//! Panel façade: the control flow of the state layer.
//!
//! User interaction → overlay records the intended value (render picks it
//! up immediately) → dispatcher coalesces and eventually issues exactly
//! one remote command → the store's authoritative state eventually changes
//! → the next reconciliation pass clears the overlay entry. The resolver
//! and settings cache are queried on demand to find where commands go.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::Notify;

use crate::config::PanelConfig;
use crate::dispatch::{DispatchKey, Dispatcher};
use crate::model::state::{DeviceSnapshot, Field, StateView};
use crate::overlay::Overlay;
use crate::resolve::{self, AuxRole};
use crate::service::{CommandSink, ServiceCall};
use crate::settings::{SettingsCache, SettingsSnapshot, SettingsWarning};
use crate::store::ModeStore;

pub struct Panel {
    config: PanelConfig,
    overlay: Overlay,
    dispatcher: Dispatcher,
    settings: SettingsCache,
    warning: SettingsWarning,
    store: Arc<dyn ModeStore>,
    active_device: Mutex<Option<String>>,
}

impl Panel {
    #[must_use]
    pub fn new(config: PanelConfig, sink: Arc<dyn CommandSink>, store: Arc<dyn ModeStore>) -> Self {
        let settings = SettingsCache::new(&config);
        Self {
            overlay: Overlay::new(config.clone()),
            dispatcher: Dispatcher::new(sink, settings.clone()),
            warning: SettingsWarning::new(&config),
            settings,
            store,
            active_device: Mutex::new(None),
            config,
        }
    }

    /// Wakes whenever an effective value may have changed.
    #[must_use]
    pub fn changed(&self) -> Arc<Notify> {
        self.overlay.changed()
    }

    fn apply(&self, device_id: &str, field: Field, value: Value, call: ServiceCall) {
        self.overlay.set(device_id, field, value);
        self.dispatcher.schedule(
            DispatchKey::field(device_id, field),
            call,
            field.debounce(&self.config),
        );
    }

    pub fn set_temperature(&self, device_id: &str, temperature: f64) {
        self.apply(
            device_id,
            Field::Temperature,
            Value::from(temperature),
            ServiceCall::set_temperature(device_id, temperature),
        );
    }

    pub fn set_hvac_mode(&self, device_id: &str, mode: &str) {
        self.apply(
            device_id,
            Field::HvacMode,
            Value::from(mode),
            ServiceCall::set_hvac_mode(device_id, mode),
        );
    }

    pub fn set_fan_mode(&self, device_id: &str, mode: &str) {
        self.apply(
            device_id,
            Field::FanMode,
            Value::from(mode),
            ServiceCall::set_fan_mode(device_id, mode),
        );
    }

    pub fn set_preset_mode(&self, device_id: &str, mode: &str) {
        self.apply(
            device_id,
            Field::PresetMode,
            Value::from(mode),
            ServiceCall::set_preset_mode(device_id, mode),
        );
    }

    pub fn set_swing_mode(&self, device_id: &str, mode: &str) {
        self.apply(
            device_id,
            Field::SwingMode,
            Value::from(mode),
            ServiceCall::set_swing_mode(device_id, mode),
        );
    }

    pub fn set_season(&self, device_id: &str, season: &str) {
        self.apply(
            device_id,
            Field::Season,
            Value::from(season),
            ServiceCall::set_season(device_id, season),
        );
    }

    pub fn set_timer_on_minutes(&self, device_id: &str, minutes: u64) {
        self.apply(
            device_id,
            Field::TimerOnMinutes,
            Value::from(minutes),
            ServiceCall::set_timer(device_id, "on", minutes),
        );
    }

    pub fn set_timer_off_minutes(&self, device_id: &str, minutes: u64) {
        self.apply(
            device_id,
            Field::TimerOffMinutes,
            Value::from(minutes),
            ServiceCall::set_timer(device_id, "off", minutes),
        );
    }

    /// Toggle a discovered auxiliary switch. Returns false on a resolution
    /// miss; the caller renders the control disabled instead of failing.
    pub fn toggle_auxiliary(
        &self,
        view: &StateView,
        device_id: &str,
        role: AuxRole,
        on: bool,
    ) -> bool {
        let Some(entity_id) = resolve::resolve(view, device_id, role) else {
            log::debug!("No {role:?} companion for {device_id}; control disabled");
            return false;
        };
        let call = if on {
            ServiceCall::turn_on(&entity_id)
        } else {
            ServiceCall::turn_off(&entity_id)
        };
        // The aux slot keeps the toggle from superseding a pending command
        // aimed at the device itself, while the key still names the device
        // whose settings snapshot the write mutates.
        self.dispatcher
            .schedule(DispatchKey::aux(device_id, role), call, self.config.mode_debounce());
        true
    }

    /// Pick an option on the discovered timer-off hvac-mode selector.
    pub fn set_timer_off_hvac_mode(&self, view: &StateView, device_id: &str, mode: &str) -> bool {
        self.select_aux_option(view, device_id, AuxRole::TimerOffHvacModeSelect, mode)
    }

    /// Pick an option on the discovered timer-off fan-mode selector.
    pub fn set_timer_off_fan_mode(&self, view: &StateView, device_id: &str, mode: &str) -> bool {
        self.select_aux_option(view, device_id, AuxRole::TimerOffFanModeSelect, mode)
    }

    fn select_aux_option(
        &self,
        view: &StateView,
        device_id: &str,
        role: AuxRole,
        option: &str,
    ) -> bool {
        let Some(entity_id) = resolve::resolve(view, device_id, role) else {
            log::debug!("No {role:?} companion for {device_id}; control disabled");
            return false;
        };
        self.dispatcher.schedule(
            DispatchKey::aux(device_id, role),
            ServiceCall::select_option(&entity_id, option),
            self.config.mode_debounce(),
        );
        true
    }

    /// Set the discovered turn-on notification threshold (minutes).
    pub fn set_notification_threshold(
        &self,
        view: &StateView,
        device_id: &str,
        minutes: f64,
    ) -> bool {
        let Some(entity_id) =
            resolve::resolve(view, device_id, AuxRole::TimerOnNotificationThreshold)
        else {
            log::debug!("No notification threshold companion for {device_id}; control disabled");
            return false;
        };
        self.dispatcher.schedule(
            DispatchKey::aux(device_id, AuxRole::TimerOnNotificationThreshold),
            ServiceCall::set_number_value(&entity_id, minutes),
            self.config.debounce(),
        );
        true
    }

    /// Bare power toggle: off when running, otherwise back to the last
    /// remembered non-off mode, falling back to the device's first
    /// supported non-off mode when the remembered one is missing, invalid
    /// or unsupported. Returns false when the device is absent or supports
    /// no non-off mode at all.
    pub fn toggle_power(&self, view: &StateView, device_id: &str) -> bool {
        let Some(snapshot) = DeviceSnapshot::from_view(view, device_id) else {
            return false;
        };

        if !snapshot.is_off() {
            self.set_hvac_mode(device_id, "off");
            return true;
        }

        let remembered = match self.store.load(device_id) {
            Ok(mode) => mode,
            Err(err) => {
                // Storage being unavailable must never surface; use the
                // safe default selection instead.
                log::debug!("Mode store read failed for {device_id}: {err}");
                None
            }
        };

        let mode = remembered
            .filter(|m| m != "off" && snapshot.supports_hvac_mode(m))
            .or_else(|| snapshot.first_non_off_mode().map(str::to_string));

        let Some(mode) = mode else {
            log::warn!("{device_id} has no supported non-off mode; power-on ignored");
            return false;
        };

        self.set_hvac_mode(device_id, &mode);
        true
    }

    /// Feed a fresh authoritative snapshot through the reconciliation
    /// pass. Call on every push notification for a device of interest.
    pub fn handle_state_changed(&self, view: &StateView, device_id: &str) {
        let Some(snapshot) = DeviceSnapshot::from_view(view, device_id) else {
            return;
        };

        if let Some(mode) = snapshot.hvac_mode.as_deref() {
            if mode != "off" {
                if let Err(err) = self.store.save(device_id, mode) {
                    log::debug!("Mode store write failed for {device_id}: {err}");
                }
            }
        }

        self.overlay.reconcile(&snapshot);

        // Season and timer minutes confirm through the settings sensor,
        // not the climate entity.
        if let Some(settings) = self.settings.get(view, device_id) {
            if let Some(season) = settings.option_str("season") {
                self.overlay
                    .reconcile_value(device_id, Field::Season, &Value::from(season));
            }
            if let Some(minutes) = settings.option_u64("timer_on_minutes") {
                self.overlay
                    .reconcile_value(device_id, Field::TimerOnMinutes, &Value::from(minutes));
            }
            if let Some(minutes) = settings.option_u64("timer_off_minutes") {
                self.overlay
                    .reconcile_value(device_id, Field::TimerOffMinutes, &Value::from(minutes));
            }
        }
    }

    /// The value to render for a field: optimistic while pending, else
    /// authoritative.
    #[must_use]
    pub fn effective(&self, view: &StateView, device_id: &str, field: Field) -> Option<Value> {
        let authoritative = match field {
            Field::Season => self
                .settings
                .get(view, device_id)
                .and_then(|s| s.option_str("season").map(Value::from)),
            Field::TimerOnMinutes => self
                .settings
                .get(view, device_id)
                .and_then(|s| s.option_u64("timer_on_minutes").map(Value::from)),
            Field::TimerOffMinutes => self
                .settings
                .get(view, device_id)
                .and_then(|s| s.option_u64("timer_off_minutes").map(Value::from)),
            _ => DeviceSnapshot::from_view(view, device_id).and_then(|s| s.field_value(field)),
        };
        self.overlay.effective(device_id, field, authoritative)
    }

    #[must_use]
    pub fn settings(&self, view: &StateView, device_id: &str) -> Option<SettingsSnapshot> {
        self.settings.get(view, device_id)
    }

    /// Whether the persistent "no settings configured" warning should show.
    pub fn settings_warning(&self, view: &StateView, device_id: &str) -> bool {
        let has_settings = self.settings.get(view, device_id).is_some();
        self.warning.check(device_id, has_settings)
    }

    #[must_use]
    pub fn resolve(&self, view: &StateView, device_id: &str, role: AuxRole) -> Option<String> {
        resolve::resolve(view, device_id, role)
    }

    /// Make `device_id` the active device, clearing the outgoing device's
    /// pending mutations, scheduled commands and warning timer.
    pub fn switch_device(&self, device_id: &str) {
        let previous = {
            let mut active = self.active_device.lock().expect("panel lock poisoned");
            active.replace(device_id.to_string())
        };
        if let Some(previous) = previous {
            if previous != device_id {
                self.overlay.clear_device(&previous);
                self.dispatcher.cancel_device(&previous);
                self.warning.clear(&previous);
            }
        }
    }

    #[must_use]
    pub fn active_device(&self) -> Option<String> {
        self.active_device
            .lock()
            .expect("panel lock poisoned")
            .clone()
    }
}
