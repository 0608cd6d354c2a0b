//! Debounced, last-write-wins command dispatch.
//!
//! Stepper clicks and numeric typing arrive far faster than the remote
//! system wants commands. Each key holds at most one scheduled command;
//! scheduling again before it fires discards the old timer and value and
//! restarts the quiescence window with the new one. On fire the owning
//! device's settings cache entry is invalidated first, since the write is
//! about to change backend-derived attributes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::model::state::Field;
use crate::resolve::AuxRole;
use crate::service::{CommandSink, ServiceCall};
use crate::settings::SettingsCache;

/// What a scheduled command is keyed by: one slot per device field, plus
/// a separate slot per discovered auxiliary companion so an aux write
/// never supersedes a pending command aimed at the device itself. Every
/// key names the owning device, which is also the settings cache entry to
/// invalidate when the command fires.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum DispatchKey {
    Field { device_id: String, field: Field },
    Aux { device_id: String, role: AuxRole },
}

impl DispatchKey {
    #[must_use]
    pub fn field(device_id: impl Into<String>, field: Field) -> Self {
        Self::Field {
            device_id: device_id.into(),
            field,
        }
    }

    #[must_use]
    pub fn aux(device_id: impl Into<String>, role: AuxRole) -> Self {
        Self::Aux {
            device_id: device_id.into(),
            role,
        }
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        match self {
            Self::Field { device_id, .. } | Self::Aux { device_id, .. } => device_id,
        }
    }
}

struct Timer {
    seq: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    timers: HashMap<DispatchKey, Timer>,
    next_seq: u64,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Mutex<Inner>>,
    sink: Arc<dyn CommandSink>,
    settings: SettingsCache,
}

impl Dispatcher {
    #[must_use]
    pub fn new(sink: Arc<dyn CommandSink>, settings: SettingsCache) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                timers: HashMap::new(),
                next_seq: 0,
            })),
            sink,
            settings,
        }
    }

    /// Schedule `call` to fire after `delay` of quiescence on `key`,
    /// cancelling any previously scheduled command on the same key.
    pub fn schedule(&self, key: DispatchKey, call: ServiceCall, delay: Duration) {
        // The quiescence window starts now, not at the task's first poll.
        let deadline = Instant::now() + delay;

        let mut inner = self.inner.lock().expect("dispatch lock poisoned");
        inner.next_seq += 1;
        let seq = inner.next_seq;

        if let Some(old) = inner.timers.remove(&key) {
            old.handle.abort();
        }

        let shared = self.inner.clone();
        let sink = self.sink.clone();
        let settings = self.settings.clone();
        let device = key.device_id().to_string();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut inner = shared.lock().expect("dispatch lock poisoned");
                // A replacement may have raced in between wakeup and lock.
                if !inner.timers.get(&task_key).is_some_and(|t| t.seq == seq) {
                    return;
                }
                inner.timers.remove(&task_key);
            }
            settings.invalidate(&device);
            log::debug!(
                "Dispatching {}.{} for {device}",
                call.domain,
                call.service
            );
            sink.invoke(call);
        });

        inner.timers.insert(key, Timer { seq, handle });
    }

    /// Cancel one pending command without sending it.
    pub fn cancel(&self, key: &DispatchKey) {
        let mut inner = self.inner.lock().expect("dispatch lock poisoned");
        if let Some(old) = inner.timers.remove(key) {
            old.handle.abort();
        }
    }

    /// Cancel every pending command owned by a device, auxiliary slots
    /// included (device switch).
    pub fn cancel_device(&self, device_id: &str) {
        let mut inner = self.inner.lock().expect("dispatch lock poisoned");
        let keys: Vec<DispatchKey> = inner
            .timers
            .keys()
            .filter(|k| k.device_id() == device_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(old) = inner.timers.remove(&key) {
                old.handle.abort();
            }
        }
    }

    #[must_use]
    pub fn is_scheduled(&self, key: &DispatchKey) -> bool {
        self.inner
            .lock()
            .expect("dispatch lock poisoned")
            .timers
            .contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::task::yield_now;
    use tokio::time::advance;

    use crate::config::PanelConfig;
    use crate::model::state::{EntityState, Field, StateView};
    use crate::resolve::AuxRole;
    use crate::service::ServiceCall;
    use crate::service::testing::RecordingSink;
    use crate::settings::SettingsCache;

    use super::{DispatchKey, Dispatcher};

    fn dispatcher() -> (Dispatcher, RecordingSink, SettingsCache) {
        let sink = RecordingSink::default();
        let settings = SettingsCache::new(&PanelConfig::default());
        let dispatcher = Dispatcher::new(Arc::new(sink.clone()), settings.clone());
        (dispatcher, sink, settings)
    }

    fn temp_key() -> DispatchKey {
        DispatchKey::field("climate.camera", Field::Temperature)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_quiescence() {
        let (d, sink, _) = dispatcher();
        d.schedule(
            temp_key(),
            ServiceCall::set_temperature("climate.camera", 22.0),
            Duration::from_millis(1000),
        );

        advance(Duration::from_millis(999)).await;
        yield_now().await;
        assert!(sink.calls().is_empty());

        advance(Duration::from_millis(2)).await;
        yield_now().await;
        let calls = sink.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].data.get("temperature"), Some(&json!(22.0)));
        assert!(!d.is_scheduled(&temp_key()));
    }

    #[tokio::test(start_paused = true)]
    async fn window_starts_at_schedule_time_not_first_poll() {
        let (d, sink, _) = dispatcher();
        d.schedule(
            temp_key(),
            ServiceCall::set_temperature("climate.camera", 22.0),
            Duration::from_millis(1000),
        );

        // The clock moves before the spawned timer is ever polled; the
        // deadline must not drift with it.
        advance(Duration::from_millis(1001)).await;
        yield_now().await;
        assert_eq!(sink.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_coalesces_to_last_value() {
        let (d, sink, _) = dispatcher();
        let delay = Duration::from_millis(1000);
        d.schedule(
            temp_key(),
            ServiceCall::set_temperature("climate.camera", 21.0),
            delay,
        );
        advance(Duration::from_millis(600)).await;
        d.schedule(
            temp_key(),
            ServiceCall::set_temperature("climate.camera", 25.5),
            delay,
        );

        // Past the first deadline: nothing may fire yet.
        advance(Duration::from_millis(600)).await;
        yield_now().await;
        assert!(sink.calls().is_empty());

        advance(Duration::from_millis(500)).await;
        yield_now().await;
        let calls = sink.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].data.get("temperature"), Some(&json!(25.5)));
    }

    #[tokio::test(start_paused = true)]
    async fn different_fields_do_not_interfere() {
        let (d, sink, _) = dispatcher();
        let delay = Duration::from_millis(1000);
        d.schedule(
            temp_key(),
            ServiceCall::set_temperature("climate.camera", 21.0),
            delay,
        );
        d.schedule(
            DispatchKey::field("climate.camera", Field::FanMode),
            ServiceCall::set_fan_mode("climate.camera", "high"),
            delay,
        );

        advance(Duration::from_millis(1100)).await;
        yield_now().await;
        assert_eq!(sink.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn aux_slot_does_not_supersede_device_command() {
        let (d, sink, _) = dispatcher();
        let delay = Duration::from_millis(1000);
        d.schedule(
            DispatchKey::field("climate.camera", Field::HvacMode),
            ServiceCall::set_hvac_mode("climate.camera", "heat"),
            delay,
        );
        d.schedule(
            DispatchKey::aux("climate.camera", AuxRole::TimerOnSwitch),
            ServiceCall::turn_on("switch.climate_manager_timer_on_camera"),
            delay,
        );

        advance(Duration::from_millis(1100)).await;
        yield_now().await;
        let calls = sink.calls();
        assert_eq!(calls.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn firing_invalidates_settings_cache() {
        let (d, _sink, settings) = dispatcher();

        let view = StateView::new([EntityState::new(
            "sensor.climate_manager_settings_camera",
            "on",
        )
        .with_attr("climate_entity", json!("climate.camera"))
        .with_attr("timer_on_minutes", json!(10))]);
        assert!(settings.get(&view, "climate.camera").is_some());

        d.schedule(
            temp_key(),
            ServiceCall::set_temperature("climate.camera", 22.0),
            Duration::from_millis(100),
        );
        advance(Duration::from_millis(150)).await;
        yield_now().await;

        // The cached entry is gone: the next read rescans the (mutated)
        // namespace instead of re-serving pre-write data.
        let mutated = StateView::new([EntityState::new(
            "sensor.climate_manager_settings_camera",
            "on",
        )
        .with_attr("climate_entity", json!("climate.camera"))
        .with_attr("timer_on_minutes", json!(55))]);
        let snap = settings.get(&mutated, "climate.camera").unwrap();
        assert_eq!(snap.timer_minutes("timer_on_minutes", 0), 55);
    }

    #[tokio::test(start_paused = true)]
    async fn aux_firing_invalidates_owning_device_settings() {
        let (d, _sink, settings) = dispatcher();

        let view = StateView::new([EntityState::new(
            "sensor.climate_manager_settings_camera",
            "on",
        )
        .with_attr("climate_entity", json!("climate.camera"))
        .with_attr("timer_off_hvac_mode_selector", json!("off"))]);
        assert!(settings.get(&view, "climate.camera").is_some());

        // The command targets the discovered selector, but the snapshot it
        // mutates belongs to the owning device.
        d.schedule(
            DispatchKey::aux("climate.camera", AuxRole::TimerOffHvacModeSelect),
            ServiceCall::select_option(
                "select.climate_manager_timer_off_hvac_mode_camera",
                "cool",
            ),
            Duration::from_millis(100),
        );
        advance(Duration::from_millis(150)).await;
        yield_now().await;

        let mutated = StateView::new([EntityState::new(
            "sensor.climate_manager_settings_camera",
            "on",
        )
        .with_attr("climate_entity", json!("climate.camera"))
        .with_attr("timer_off_hvac_mode_selector", json!("cool"))]);
        let snap = settings.get(&mutated, "climate.camera").unwrap();
        assert_eq!(snap.option_str("timer_off_hvac_mode_selector"), Some("cool"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_device_discards_pending_commands() {
        let (d, sink, _) = dispatcher();
        let delay = Duration::from_millis(1000);
        d.schedule(
            temp_key(),
            ServiceCall::set_temperature("climate.camera", 21.0),
            delay,
        );
        d.schedule(
            DispatchKey::aux("climate.camera", AuxRole::TimerOnSwitch),
            ServiceCall::turn_on("switch.climate_manager_timer_on_camera"),
            delay,
        );
        d.schedule(
            DispatchKey::field("climate.soggiorno", Field::Temperature),
            ServiceCall::set_temperature("climate.soggiorno", 19.0),
            delay,
        );

        d.cancel_device("climate.camera");
        advance(Duration::from_millis(1100)).await;
        yield_now().await;

        let calls = sink.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].entity_id, "climate.soggiorno");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_fires_on_next_tick() {
        let (d, sink, _) = dispatcher();
        d.schedule(
            DispatchKey::field("climate.camera", Field::HvacMode),
            ServiceCall::set_hvac_mode("climate.camera", "heat"),
            Duration::ZERO,
        );
        advance(Duration::from_millis(1)).await;
        yield_now().await;
        assert_eq!(sink.calls().len(), 1);
    }
}
