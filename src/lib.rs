//! scirocco — reactive optimistic state layer for multi-device climate
//! control panels.
//!
//! The remote state store confirms changes only after an unspecified and
//! variable delay, so the panel keeps its controls responsive with a
//! per-field optimistic overlay, coalesces bursts of input into single
//! commands, and discovers loosely-named companion entities (timers,
//! countdown sensors, mode selectors) with a convention-then-score search.
//!
//! The store and command mechanism are external collaborators behind
//! [`model::state::StateView`] and [`service::CommandSink`]; everything in
//! here is single-logical-thread, timer-driven and non-blocking.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod overlay;
pub mod panel;
pub mod resolve;
pub mod service;
pub mod settings;
pub mod store;

pub use config::PanelConfig;
pub use error::{ApiError, ApiResult};
pub use model::state::{DeviceSnapshot, EntityState, Field, StateView};
pub use panel::Panel;
pub use resolve::AuxRole;
pub use service::{CommandSink, ServiceCall};
