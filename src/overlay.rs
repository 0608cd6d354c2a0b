//! Optimistic mutation overlay.
//!
//! Every user action records the intended value here, keyed by
//! (device, field), and the UI renders the overlay value in place of the
//! authoritative one until the remote store confirms it or the field's
//! hold window runs out. One keyed store and one reconciliation pass cover
//! every field class; there are no per-field special cases.
//!
//! State machine per key:
//! Idle → set → Pending{value, expiry}
//! Pending → authoritative == value → Idle (confirmed)
//! Pending → expiry reached → Idle (revert, no retry: the user re-attempts)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::PanelConfig;
use crate::model::state::{DeviceSnapshot, Field};

type MutationKey = (String, Field);

struct Pending {
    value: Value,
    expires_at: Instant,
    seq: u64,
    expiry_guard: Option<JoinHandle<()>>,
}

struct Inner {
    entries: HashMap<MutationKey, Pending>,
    next_seq: u64,
}

/// Compare an authoritative value against a pending one. Numbers compare
/// numerically so `22` confirms `22.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < 1e-6,
        _ => a == b,
    }
}

/// Cheaply clonable; clones share the keyed store.
#[derive(Clone)]
pub struct Overlay {
    inner: Arc<Mutex<Inner>>,
    changed: Arc<Notify>,
    config: PanelConfig,
}

impl Overlay {
    #[must_use]
    pub fn new(config: PanelConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                next_seq: 0,
            })),
            changed: Arc::new(Notify::new()),
            config,
        }
    }

    /// Wakes whenever an overlay entry is set, confirmed or expired, so a
    /// render loop can re-read effective values.
    #[must_use]
    pub fn changed(&self) -> Arc<Notify> {
        self.changed.clone()
    }

    /// Record the user's intended value with the field's hold window.
    pub fn set(&self, device_id: &str, field: Field, value: Value) {
        self.set_with_ttl(device_id, field, value, field.hold(&self.config));
    }

    /// Record the user's intended value with an explicit hold window. A new
    /// mutation on the same key replaces the previous one and its timer.
    pub fn set_with_ttl(&self, device_id: &str, field: Field, value: Value, ttl: Duration) {
        let key = (device_id.to_string(), field);
        let expires_at = Instant::now() + ttl;

        let mut inner = self.inner.lock().expect("overlay lock poisoned");
        inner.next_seq += 1;
        let seq = inner.next_seq;

        // The guard is the scheduled re-check: if no authoritative update
        // confirms the value first, it reverts the entry at expiry and
        // wakes the renderer.
        let shared = self.inner.clone();
        let changed = self.changed.clone();
        let guard_key = key.clone();
        let expiry_guard = tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            let removed = {
                let mut inner = shared.lock().expect("overlay lock poisoned");
                if inner.entries.get(&guard_key).is_some_and(|p| p.seq == seq) {
                    inner.entries.remove(&guard_key)
                } else {
                    None
                }
            };
            if let Some(stale) = removed {
                log::debug!(
                    "Optimistic value for {:?}/{:?} expired unconfirmed: {}",
                    guard_key.0,
                    guard_key.1,
                    stale.value
                );
                changed.notify_one();
            }
        });

        if let Some(old) = inner.entries.insert(
            key,
            Pending {
                value,
                expires_at,
                seq,
                expiry_guard: Some(expiry_guard),
            },
        ) {
            if let Some(guard) = old.expiry_guard {
                guard.abort();
            }
        }
        drop(inner);

        self.changed.notify_one();
    }

    /// The value to render: the pending one while Pending and unexpired,
    /// else the authoritative one.
    #[must_use]
    pub fn effective(
        &self,
        device_id: &str,
        field: Field,
        authoritative: Option<Value>,
    ) -> Option<Value> {
        let key = (device_id.to_string(), field);
        let inner = self.inner.lock().expect("overlay lock poisoned");
        match inner.entries.get(&key) {
            Some(pending) if Instant::now() < pending.expires_at => Some(pending.value.clone()),
            _ => authoritative,
        }
    }

    #[must_use]
    pub fn is_pending(&self, device_id: &str, field: Field) -> bool {
        let key = (device_id.to_string(), field);
        let inner = self.inner.lock().expect("overlay lock poisoned");
        inner
            .entries
            .get(&key)
            .is_some_and(|p| Instant::now() < p.expires_at)
    }

    /// Reconciliation pass for one device against a fresh authoritative
    /// snapshot. Confirmed and expired entries transition to Idle; the rest
    /// stay Pending until their expiry guard fires.
    pub fn reconcile(&self, snapshot: &DeviceSnapshot) {
        let device_id = snapshot.entity_id.clone();
        let mut woke = false;
        {
            let mut inner = self.inner.lock().expect("overlay lock poisoned");
            let now = Instant::now();
            let keys: Vec<MutationKey> = inner
                .entries
                .keys()
                .filter(|(d, _)| *d == device_id)
                .cloned()
                .collect();

            for key in keys {
                let Some(pending) = inner.entries.get(&key) else {
                    continue;
                };
                let confirmed = snapshot
                    .field_value(key.1)
                    .is_some_and(|auth| values_equal(&auth, &pending.value));

                if confirmed || now >= pending.expires_at {
                    if confirmed {
                        log::debug!("Confirmed {:?} for {}", key.1, key.0);
                    }
                    if let Some(removed) = inner.entries.remove(&key) {
                        if let Some(guard) = removed.expiry_guard {
                            guard.abort();
                        }
                    }
                    woke = true;
                }
            }
        }
        if woke {
            self.changed.notify_one();
        }
    }

    /// Reconcile a single field whose authoritative value lives on an
    /// auxiliary entity rather than the device snapshot (season, timer
    /// minutes).
    pub fn reconcile_value(&self, device_id: &str, field: Field, authoritative: &Value) {
        let key = (device_id.to_string(), field);
        let removed = {
            let mut inner = self.inner.lock().expect("overlay lock poisoned");
            let now = Instant::now();
            match inner.entries.get(&key) {
                Some(p) if values_equal(authoritative, &p.value) || now >= p.expires_at => {
                    inner.entries.remove(&key)
                }
                _ => None,
            }
        };
        if let Some(removed) = removed {
            if let Some(guard) = removed.expiry_guard {
                guard.abort();
            }
            self.changed.notify_one();
        }
    }

    /// Drop every pending mutation for a device (device switch).
    pub fn clear_device(&self, device_id: &str) {
        let removed: Vec<Pending> = {
            let mut inner = self.inner.lock().expect("overlay lock poisoned");
            let keys: Vec<MutationKey> = inner
                .entries
                .keys()
                .filter(|(d, _)| d == device_id)
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|k| inner.entries.remove(k))
                .collect()
        };
        if removed.is_empty() {
            return;
        }
        for pending in removed {
            if let Some(guard) = pending.expiry_guard {
                guard.abort();
            }
        }
        self.changed.notify_one();
    }

    #[must_use]
    pub fn pending_fields(&self, device_id: &str) -> Vec<Field> {
        let inner = self.inner.lock().expect("overlay lock poisoned");
        let now = Instant::now();
        inner
            .entries
            .iter()
            .filter(|((d, _), p)| d == device_id && now < p.expires_at)
            .map(|((_, f), _)| *f)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::advance;

    use crate::config::PanelConfig;
    use crate::model::state::{DeviceSnapshot, Field};

    use super::Overlay;

    fn overlay() -> Overlay {
        Overlay::new(PanelConfig::default())
    }

    fn snapshot(hvac_mode: &str, temperature: f64) -> DeviceSnapshot {
        DeviceSnapshot {
            entity_id: "climate.camera".to_string(),
            hvac_mode: Some(hvac_mode.to_string()),
            target_temperature: Some(temperature),
            ..DeviceSnapshot::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn effective_returns_pending_value_until_confirmation() {
        let o = overlay();
        o.set("climate.camera", Field::Temperature, json!(23.0));

        // Authoritative still reports the old value.
        let got = o.effective("climate.camera", Field::Temperature, Some(json!(21.0)));
        assert_eq!(got, Some(json!(23.0)));

        // Still pending just before the 8 s hold runs out.
        advance(Duration::from_millis(7900)).await;
        let got = o.effective("climate.camera", Field::Temperature, Some(json!(21.0)));
        assert_eq!(got, Some(json!(23.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_returns_to_idle_and_tracks_authoritative() {
        let o = overlay();
        o.set("climate.camera", Field::Temperature, json!(23.0));
        o.reconcile(&snapshot("cool", 23.0));

        assert!(!o.is_pending("climate.camera", Field::Temperature));

        // Subsequent authoritative updates pass straight through.
        let got = o.effective("climate.camera", Field::Temperature, Some(json!(24.5)));
        assert_eq!(got, Some(json!(24.5)));
    }

    #[tokio::test(start_paused = true)]
    async fn integer_authoritative_confirms_float_pending() {
        let o = overlay();
        o.set("climate.camera", Field::Temperature, json!(23.0));
        let mut snap = snapshot("cool", 0.0);
        snap.target_temperature = Some(23.0);
        o.reconcile(&snap);
        assert!(!o.is_pending("climate.camera", Field::Temperature));
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_mutation_reverts_at_expiry() {
        let o = overlay();
        o.set("climate.camera", Field::HvacMode, json!("heat"));

        // Reconcile passes with a different authoritative value keep the
        // entry pending inside the window.
        advance(Duration::from_secs(5)).await;
        o.reconcile(&snapshot("cool", 21.0));
        assert!(o.is_pending("climate.camera", Field::HvacMode));

        // The 15 s hold elapses without confirmation: revert to truth.
        advance(Duration::from_secs(11)).await;
        let got = o.effective("climate.camera", Field::HvacMode, Some(json!("cool")));
        assert_eq!(got, Some(json!("cool")));
        assert!(o.pending_fields("climate.camera").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn replacement_supersedes_previous_mutation_and_timer() {
        let o = overlay();
        o.set("climate.camera", Field::Temperature, json!(22.0));
        advance(Duration::from_secs(6)).await;
        o.set("climate.camera", Field::Temperature, json!(25.0));

        // The first mutation's expiry passes; the replacement must survive
        // with its own full hold window.
        advance(Duration::from_secs(4)).await;
        let got = o.effective("climate.camera", Field::Temperature, Some(json!(21.0)));
        assert_eq!(got, Some(json!(25.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_guard_removes_entry_and_notifies() {
        let o = overlay();
        let changed = o.changed();
        o.set("climate.camera", Field::TimerOnMinutes, json!(45));
        // Consume the set() wakeup.
        let waiter = changed.notified();
        waiter.await;

        let waiter = changed.notified();
        advance(Duration::from_millis(2100)).await;
        waiter.await;
        assert!(o.pending_fields("climate.camera").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn aux_field_reconciles_by_value() {
        let o = overlay();
        o.set("climate.camera", Field::Season, json!("summer"));
        o.reconcile_value("climate.camera", Field::Season, &json!("winter"));
        assert!(o.is_pending("climate.camera", Field::Season));

        o.reconcile_value("climate.camera", Field::Season, &json!("summer"));
        assert!(!o.is_pending("climate.camera", Field::Season));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_device_is_scoped() {
        let o = overlay();
        o.set("climate.camera", Field::Temperature, json!(22.0));
        o.set("climate.soggiorno", Field::Temperature, json!(20.0));

        o.clear_device("climate.camera");
        assert!(o.pending_fields("climate.camera").is_empty());
        assert!(o.is_pending("climate.soggiorno", Field::Temperature));
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_ignores_other_devices() {
        let o = overlay();
        o.set("climate.soggiorno", Field::Temperature, json!(20.0));
        o.reconcile(&snapshot("cool", 20.0));
        assert!(o.is_pending("climate.soggiorno", Field::Temperature));
    }
}
