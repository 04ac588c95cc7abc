//! brewdash - live dashboard client for networked fermentation controllers.
//!
//! one reducer task per rig keeps a merged state store and a windowed
//! time series in sync with the controller: a REST snapshot on mount, a
//! windowed history backfill, then live patches over a reconnecting
//! websocket. commands go out over the same socket; system commands use a
//! separate channel.

pub mod api;
pub mod channel;
pub mod command;
pub mod config;
pub mod dashboard;
pub mod directory;
pub mod domain;
pub mod error;
pub mod history;
pub mod live;
pub mod series;
pub mod store;
pub mod timefmt;
pub mod view;

pub use config::DashConfig;
pub use dashboard::{Dashboard, DashboardState};
pub use error::{DashError, Result};
