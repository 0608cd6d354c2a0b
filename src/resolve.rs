//! Convention-based discovery of auxiliary entities.
//!
//! The integration that creates timers, countdown sensors and mode
//! selectors never records an explicit binding to its climate entity, and
//! real deployments rename or localize the companions. Discovery therefore
//! runs in two stages: a handful of direct candidate probes built from the
//! known naming conventions (one per language), then a scored substring
//! search over the namespace as a fallback.

use serde::{Deserialize, Serialize};

use crate::model::state::StateView;

/// Functional category of auxiliary resource to discover for a device.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuxRole {
    TimerOnSwitch,
    TimerOffSwitch,
    TimerOnCountdown,
    TimerOffCountdown,
    AutoTimerSwitch,
    TimerOnNotification,
    TimerOnNotificationThreshold,
    TimerOffHvacModeSelect,
    TimerOffFanModeSelect,
}

impl AuxRole {
    /// Entity domain the role's companions are registered under.
    #[must_use]
    pub const fn domain(self) -> &'static str {
        match self {
            Self::TimerOnSwitch | Self::TimerOffSwitch | Self::AutoTimerSwitch => "switch",
            Self::TimerOnCountdown | Self::TimerOffCountdown | Self::TimerOnNotification => {
                "sensor"
            }
            Self::TimerOnNotificationThreshold => "number",
            Self::TimerOffHvacModeSelect | Self::TimerOffFanModeSelect => "select",
        }
    }

    /// Coarse category filter for the fallback search: a candidate must
    /// contain at least one keyword from every group.
    const fn keyword_groups(self) -> &'static [&'static [&'static str]] {
        match self {
            Self::TimerOnSwitch => &[&["timer"], &["on", "accensione"]],
            Self::TimerOffSwitch => &[&["timer"], &["off", "spegnimento"]],
            Self::TimerOnCountdown => &[&["timer"], &["on", "accensione"], &["countdown"]],
            Self::TimerOffCountdown => &[&["timer"], &["off", "spegnimento"], &["countdown"]],
            Self::AutoTimerSwitch => &[&["timer"], &["auto", "automatico"]],
            Self::TimerOnNotification | Self::TimerOnNotificationThreshold => {
                &[&["timer"], &["on", "accensione"], &["notification", "notifica"]]
            }
            Self::TimerOffHvacModeSelect => {
                &[&["timer"], &["off", "spegnimento"], &["hvac"]]
            }
            Self::TimerOffFanModeSelect => {
                &[&["timer"], &["off", "spegnimento"], &["fan", "ventola"]]
            }
        }
    }
}

/// A linguistic naming convention: a pure function from (role, slug) to the
/// entity id the integration would have created. New languages are added by
/// appending a convention, not by branching inside the resolver.
#[derive(Clone, Copy)]
pub struct NamingConvention {
    pub name: &'static str,
    pub candidate: fn(AuxRole, &str) -> String,
}

fn english_candidate(role: AuxRole, slug: &str) -> String {
    match role {
        AuxRole::TimerOnSwitch => format!("switch.climate_manager_timer_on_{slug}"),
        AuxRole::TimerOffSwitch => format!("switch.climate_manager_timer_off_{slug}"),
        AuxRole::TimerOnCountdown => {
            format!("sensor.climate_manager_turn_on_timer_countdown_{slug}")
        }
        AuxRole::TimerOffCountdown => {
            format!("sensor.climate_manager_turn_off_timer_countdown_{slug}")
        }
        AuxRole::AutoTimerSwitch => format!("switch.climate_manager_auto_timer_{slug}"),
        AuxRole::TimerOnNotification => {
            format!("sensor.climate_manager_turn_on_timer_notification_{slug}")
        }
        AuxRole::TimerOnNotificationThreshold => {
            format!("number.climate_manager_timer_on_notification_{slug}")
        }
        AuxRole::TimerOffHvacModeSelect => {
            format!("select.climate_manager_timer_off_hvac_mode_{slug}")
        }
        AuxRole::TimerOffFanModeSelect => {
            format!("select.climate_manager_timer_off_fan_mode_{slug}")
        }
    }
}

fn italian_candidate(role: AuxRole, slug: &str) -> String {
    match role {
        AuxRole::TimerOnSwitch => format!("switch.climate_manager_timer_accensione_{slug}"),
        AuxRole::TimerOffSwitch => format!("switch.climate_manager_timer_spegnimento_{slug}"),
        AuxRole::TimerOnCountdown => {
            format!("sensor.climate_manager_timer_accensione_countdown_{slug}")
        }
        AuxRole::TimerOffCountdown => {
            format!("sensor.climate_manager_timer_spegnimento_countdown_{slug}")
        }
        AuxRole::AutoTimerSwitch => format!("switch.climate_manager_timer_automatico_{slug}"),
        AuxRole::TimerOnNotification => {
            format!("sensor.climate_manager_timer_accensione_notifica_{slug}")
        }
        AuxRole::TimerOnNotificationThreshold => {
            format!("number.climate_manager_notifica_accensione_{slug}")
        }
        AuxRole::TimerOffHvacModeSelect => {
            format!("select.climate_manager_timer_spegnimento_modalita_hvac_{slug}")
        }
        AuxRole::TimerOffFanModeSelect => {
            format!("select.climate_manager_timer_spegnimento_modalita_ventola_{slug}")
        }
    }
}

/// Probe order: the integration's canonical (English) ids first, then the
/// localized variants produced when entity ids were slugged from Italian
/// friendly names.
pub const CONVENTIONS: &[NamingConvention] = &[
    NamingConvention {
        name: "english",
        candidate: english_candidate,
    },
    NamingConvention {
        name: "italian",
        candidate: italian_candidate,
    },
];

/// Normalized slug for a device id: domain prefix stripped, lowercased,
/// separator runs collapsed to a single `_`.
#[must_use]
pub fn device_slug(device_id: &str) -> String {
    let name = device_id
        .split_once('.')
        .map_or(device_id, |(_, rest)| rest);

    let mut out = String::new();
    let mut last_sep = false;
    for ch in name.chars() {
        let low = ch.to_ascii_lowercase();
        if low.is_ascii_alphanumeric() {
            out.push(low);
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// A (device, role) → entity binding. Never persisted; recomputed per query
/// against the current namespace snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedBinding {
    pub device_id: String,
    pub role: AuxRole,
    pub entity_id: String,
}

/// Minimum number of slug tokens a fallback candidate must contain: one for
/// short slugs, a third (rounded up) otherwise. Keeps a single accidental
/// token overlap from binding the wrong resource.
fn match_threshold(token_count: usize) -> usize {
    if token_count <= 2 {
        1
    } else {
        token_count.div_ceil(3).max(1)
    }
}

struct FallbackScore {
    score: u32,
    matched: usize,
}

fn score_candidate(entity_id: &str, tokens: &[&str]) -> FallbackScore {
    let mut matched = 0;
    let mut matched_long = 0;
    let mut matched_numeric = 0;

    for token in tokens {
        if !entity_id.contains(token) {
            continue;
        }
        matched += 1;
        if token.len() > 2 {
            matched_long += 1;
        }
        if token.chars().all(|c| c.is_ascii_digit()) {
            matched_numeric += 1;
        }
    }

    let mut score = 2 * matched_long + 3 * matched_numeric;
    if matched == tokens.len() {
        score += 5;
    }

    FallbackScore { score, matched }
}

fn in_category(entity_id: &str, role: AuxRole) -> bool {
    let Some((domain, _)) = entity_id.split_once('.') else {
        return false;
    };
    if domain != role.domain() {
        return false;
    }
    role.keyword_groups()
        .iter()
        .all(|group| group.iter().any(|kw| entity_id.contains(kw)))
}

/// Find the best-matching auxiliary entity for `role` of `device_id`.
///
/// Deterministic for a fixed snapshot and never blocks. A miss is a valid
/// result, not an error: callers render a disabled control. When two
/// fallback candidates score identically the first one in namespace
/// iteration order wins; that tie-break is accepted nondeterminism across
/// snapshots, not something the resolver papers over.
#[must_use]
pub fn resolve(view: &StateView, device_id: &str, role: AuxRole) -> Option<String> {
    let slug = device_slug(device_id);
    if slug.is_empty() {
        return None;
    }

    for convention in CONVENTIONS {
        let candidate = (convention.candidate)(role, &slug);
        if view.contains(&candidate) {
            log::debug!(
                "Resolved {role:?} for {device_id} via {} convention: {candidate}",
                convention.name
            );
            return Some(candidate);
        }
    }

    let tokens: Vec<&str> = slug.split('_').filter(|t| !t.is_empty()).collect();
    if tokens.is_empty() {
        return None;
    }

    let mut best: Option<(&str, FallbackScore)> = None;
    for entity in view {
        if !in_category(&entity.entity_id, role) {
            continue;
        }
        let scored = score_candidate(&entity.entity_id, &tokens);
        if scored.matched == 0 {
            continue;
        }
        // Strict comparison keeps the first-seen candidate on ties.
        if best.as_ref().is_none_or(|(_, b)| scored.score > b.score) {
            best = Some((&entity.entity_id, scored));
        }
    }

    let (entity_id, scored) = best?;
    if scored.matched < match_threshold(tokens.len()) {
        log::debug!(
            "Rejecting fallback {entity_id} for {device_id} {role:?}: {} of {} tokens matched",
            scored.matched,
            tokens.len()
        );
        return None;
    }

    log::debug!("Resolved {role:?} for {device_id} via fallback scan: {entity_id}");
    Some(entity_id.to_string())
}

/// Convenience wrapper producing the full binding record.
#[must_use]
pub fn resolve_binding(view: &StateView, device_id: &str, role: AuxRole) -> Option<ResolvedBinding> {
    resolve(view, device_id, role).map(|entity_id| ResolvedBinding {
        device_id: device_id.to_string(),
        role,
        entity_id,
    })
}
