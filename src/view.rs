//! ==============================================================================
//! view.rs - controller view (single-writer reducer)
//! ==============================================================================
//!
//! purpose:
//!     owns one rig's ControllerStateStore and WindowedSeriesCache and is the
//!     only code that mutates them. every input (snapshot, history result,
//!     live event, user intent, clock tick) is reduced here one at a time,
//!     so no mutation is ever interleaved mid-message.
//!
//! ordering:
//!     - the first REST snapshot seeds the store; live patches may arrive
//!       before history is seeded and simply apply to what is there.
//!     - each history request takes a new generation. a result whose
//!       generation is no longer current is dropped, so a slow fetch for an
//!       old window cannot overwrite a newer selection.
//!     - live samples are stamped with receipt time, backfill keeps the
//!       controller's timestamps.
//!
//! relationships:
//!     - driven by: dashboard.rs (one task per rig)
//!     - publishes: RigView for api.rs
//!
//! ==============================================================================

use chrono::TimeZone;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;
use tracing::{debug, info, warn};

use crate::channel::ChannelState;
use crate::domain::{
    CommandMessage, ControlField, ControllerKind, FieldValue, Metric, RetentionWindow, TimePoint,
};
use crate::error::{DashError, Result};
use crate::history::HistorySnapshot;
use crate::live::{LiveChannel, LiveEvent};
use crate::series::{AxisScale, WindowedSeriesCache};
use crate::store::ControllerStateStore;
use crate::timefmt;

/// reconnect indicator
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub state: ChannelState,
    /// reconnects since the last settled connection, as counted by the channel
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ChannelState::Connecting,
            attempts: 0,
            last_error: None,
        }
    }
}

pub struct ControllerView {
    name: String,
    store: ControllerStateStore,
    cache: WindowedSeriesCache,
    window: RetentionWindow,
    generation: u64,
    history_loaded: bool,
    original_gravity: Option<f64>,
    connection: ConnectionStatus,
    clock: String,
    live: Option<LiveChannel>,
    show_readings: bool,
}

impl ControllerView {
    pub fn new(name: impl Into<String>, window: RetentionWindow) -> Self {
        Self {
            name: name.into(),
            store: ControllerStateStore::new(),
            cache: WindowedSeriesCache::new(),
            window,
            generation: 0,
            history_loaded: false,
            original_gravity: None,
            connection: ConnectionStatus::default(),
            clock: String::new(),
            live: None,
            show_readings: false,
        }
    }

    pub fn with_reading_logs(mut self, enabled: bool) -> Self {
        self.show_readings = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &ControllerStateStore {
        &self.store
    }

    pub fn cache(&self) -> &WindowedSeriesCache {
        &self.cache
    }

    pub fn window(&self) -> RetentionWindow {
        self.window
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn history_loaded(&self) -> bool {
        self.history_loaded
    }

    pub fn connection(&self) -> &ConnectionStatus {
        &self.connection
    }

    pub fn attach_live(&mut self, live: LiveChannel) {
        self.live = Some(live);
    }

    // --------------------------------------------------------------------------
    // inputs
    // --------------------------------------------------------------------------

    /// first full snapshot from `GET {controllerUrl}`
    pub fn apply_snapshot(&mut self, snapshot: &Value) -> Result<usize> {
        let applied = self.store.apply_json(snapshot)?;
        info!(rig = %self.name, fields = applied, "snapshot applied");
        Ok(applied)
    }

    /// start a history cycle for `window`; returns the generation to tag the fetch with
    pub fn begin_history(&mut self, window: RetentionWindow) -> u64 {
        self.window = window;
        self.generation += 1;
        self.history_loaded = false;
        debug!(rig = %self.name, window = window.minutes(), generation = self.generation, "history requested");
        self.generation
    }

    /// apply a finished fetch; false when it was stale or failed
    pub fn apply_history(&mut self, generation: u64, result: Result<HistorySnapshot>) -> bool {
        if generation != self.generation {
            debug!(
                rig = %self.name,
                generation,
                current = self.generation,
                "dropping stale history result"
            );
            return false;
        }
        match result {
            Ok(history) => {
                self.cache.seed(&history);
                self.original_gravity = history.original_gravity;
                self.history_loaded = true;
                info!(rig = %self.name, points = history.len(), "series seeded");
                true
            }
            Err(e) => {
                self.cache.reset();
                warn!(rig = %self.name, error = %e, "history unavailable, chart stays empty");
                false
            }
        }
    }

    pub fn apply_live(&mut self, event: LiveEvent, received_ms: i64) {
        match event {
            LiveEvent::Connecting { attempt } => {
                self.connection.state = ChannelState::Connecting;
                self.connection.attempts = attempt;
            }
            LiveEvent::Opened => {
                self.connection.state = ChannelState::Open;
            }
            LiveEvent::Patch(patch) => {
                self.store.apply_patch(&patch);
                self.cache.append_live_sample(&self.store, received_ms, self.window);
                if self.show_readings {
                    self.log_readings();
                }
            }
            LiveEvent::Closed { reason } => {
                self.connection.state = ChannelState::Closed;
                self.connection.last_error = Some(reason);
            }
            LiveEvent::Errored(cause) => {
                self.connection.state = ChannelState::Closed;
                self.connection.last_error = Some(cause);
            }
        }
    }

    pub fn tick_clock<Tz>(&mut self, now_ms: i64, tz: &Tz)
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        self.clock = timefmt::format_clock(now_ms, tz);
    }

    // --------------------------------------------------------------------------
    // control intents
    // --------------------------------------------------------------------------

    fn send(&self, command: CommandMessage) -> Result<()> {
        match &self.live {
            Some(live) => live.send(&command),
            None => Err(DashError::ChannelSendRejected {
                channel: "live".to_string(),
                state: self.connection.state.to_string(),
            }),
        }
    }

    /// flip between 0 and 100 locally, then tell the controller
    pub fn toggle_power(&mut self, kind: ControllerKind) -> Result<()> {
        let key = kind.store_key(ControlField::Power);
        let next = if self.store.power_on(kind) { 0.0 } else { 100.0 };
        self.store.set_local(key, next);
        self.send(CommandMessage::new(kind, ControlField::Power, next))
    }

    pub fn toggle_enabled(&mut self, kind: ControllerKind) -> Result<()> {
        let next = !self.store.is_enabled(kind);
        self.send(CommandMessage::new(kind, ControlField::Enabled, next))
    }

    pub fn toggle_automatic(&mut self, kind: ControllerKind) -> Result<()> {
        let next = !self.store.is_automatic(kind);
        self.send(CommandMessage::new(kind, ControlField::Automatic, next))
    }

    pub fn update_setpoint(&mut self, kind: ControllerKind, value: f64) -> Result<()> {
        self.store.set_local(kind.store_key(ControlField::Setpoint), value);
        self.send(CommandMessage::new(kind, ControlField::Setpoint, value))
    }

    fn log_readings(&self) {
        info!(
            rig = %self.name,
            beer = self.store.formatted_temperature().as_deref().unwrap_or("-"),
            fridge = self.store.formatted_w1_temperature().as_deref().unwrap_or("-"),
            gravity = self.store.formatted_gravity().as_deref().unwrap_or("-"),
            abv = self.store.formatted_abv().as_deref().unwrap_or("-"),
            "reading"
        );
    }

    // --------------------------------------------------------------------------
    // published view
    // --------------------------------------------------------------------------

    pub fn published(&self, now_ms: i64) -> RigView {
        let series = Metric::ALL
            .iter()
            .map(|m| {
                let points = self.cache.visible(*m, self.window, now_ms).copied().collect();
                (m.key(), points)
            })
            .collect();

        RigView {
            name: self.name.clone(),
            window_minutes: self.window.minutes(),
            axis: AxisScale::for_window(self.window),
            clock: self.clock.clone(),
            history_loaded: self.history_loaded,
            original_gravity: self.original_gravity.map(|og| format!("{:.4}", og)),
            connection: self.connection.clone(),
            readings: Readings::from_store(&self.store),
            fields: self.store.fields().clone(),
            series,
        }
    }
}

// ==============================================================================
// published shapes
// ==============================================================================

#[derive(Clone, Debug, Serialize)]
pub struct RigView {
    pub name: String,
    pub window_minutes: u32,
    pub axis: AxisScale,
    pub clock: String,
    pub history_loaded: bool,
    pub original_gravity: Option<String>,
    pub connection: ConnectionStatus,
    pub readings: Readings,
    pub fields: BTreeMap<String, FieldValue>,
    pub series: BTreeMap<&'static str, Vec<TimePoint>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Readings {
    pub temperature: Option<String>,
    pub w1temperature: Option<String>,
    pub gravity: Option<String>,
    pub abv: Option<String>,
    pub atten: Option<String>,
    pub fridge: Panel,
    pub heater: Panel,
}

#[derive(Clone, Debug, Serialize)]
pub struct Panel {
    pub power_on: bool,
    pub enabled: &'static str,
    pub automatic: &'static str,
    pub setpoint: Option<f64>,
}

impl Readings {
    fn from_store(store: &ControllerStateStore) -> Self {
        let panel = |kind: ControllerKind| Panel {
            power_on: store.power_on(kind),
            enabled: store.enabled_label(kind),
            automatic: store.automatic_label(kind),
            setpoint: store.get_f64(kind.store_key(ControlField::Setpoint)),
        };
        Self {
            temperature: store.formatted_temperature(),
            w1temperature: store.formatted_w1_temperature(),
            gravity: store.formatted_gravity(),
            abv: store.formatted_abv(),
            atten: store.formatted_atten(),
            fridge: panel(ControllerKind::Fridge),
            heater: panel(ControllerKind::Heater),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::window_history;
    use chrono::Utc;
    use serde_json::json;

    fn window(minutes: u32) -> RetentionWindow {
        RetentionWindow::try_from(minutes).unwrap()
    }

    fn patch(v: Value) -> LiveEvent {
        LiveEvent::Patch(v.as_object().cloned().unwrap())
    }

    fn history(labels: &[i64], gravity: &[f64]) -> HistorySnapshot {
        window_history(
            json!({"label": labels, "gravity": gravity, "ograv": [1.060]}),
            window(10080),
            labels.last().copied().unwrap_or(0) * 1000,
        )
        .unwrap()
    }

    #[test]
    fn test_stale_history_is_dropped() {
        let mut view = ControllerView::new("Fermenter", window(240));
        let old = view.begin_history(window(60));
        let new = view.begin_history(window(1440));

        assert!(view.apply_history(new, Ok(history(&[100, 200], &[1.05, 1.04]))));
        assert!(!view.apply_history(old, Ok(history(&[1], &[9.99]))));

        assert_eq!(view.window().minutes(), 1440);
        assert_eq!(view.cache().len(Metric::Gravity), 2);
        assert_eq!(view.published(200_000).original_gravity.as_deref(), Some("1.0600"));
    }

    #[test]
    fn test_history_reseed_replaces_previous_window() {
        let mut view = ControllerView::new("Fermenter", window(240));
        let g = view.begin_history(window(240));
        view.apply_history(g, Ok(history(&[1, 2, 3], &[1.0, 1.0, 1.0])));
        view.apply_live(patch(json!({"gravity": 1.02})), 5_000);
        assert_eq!(view.cache().len(Metric::Gravity), 4);

        let g = view.begin_history(window(30));
        view.apply_history(g, Ok(history(&[7], &[1.01])));
        assert_eq!(
            view.cache().as_series(Metric::Gravity),
            &[TimePoint::new(7_000, Some(1.01))]
        );
    }

    #[test]
    fn test_failed_history_leaves_empty_chart() {
        let mut view = ControllerView::new("Fermenter", window(240));
        let g = view.begin_history(window(240));
        let applied = view.apply_history(g, Err(DashError::HistoryUnavailable("refused".into())));
        assert!(!applied);
        assert!(!view.history_loaded());
        assert!(view.cache().is_empty());
    }

    #[test]
    fn test_live_patch_uses_receipt_time() {
        let mut view = ControllerView::new("Fermenter", window(60));
        view.apply_live(patch(json!({"temperature": 66.0})), 1_234);
        view.apply_live(patch(json!({"setpoint": 65.0})), 2_345);

        assert_eq!(view.store().get_f64("temperature"), Some(66.0));
        assert_eq!(view.store().get_f64("setpoint"), Some(65.0));
        let temps = view.cache().as_series(Metric::Temperature);
        assert_eq!(temps, &[TimePoint::new(1_234, Some(66.0)), TimePoint::new(2_345, Some(66.0))]);
    }

    #[test]
    fn test_optimistic_power_then_patch_wins() {
        let mut view = ControllerView::new("Fermenter", window(60));
        view.apply_live(patch(json!({"power": 0})), 1);

        // no live channel attached: the send is rejected but the local write stays
        let err = view.toggle_power(ControllerKind::Fridge).unwrap_err();
        assert!(matches!(err, DashError::ChannelSendRejected { .. }));
        assert_eq!(view.store().get_f64("power"), Some(100.0));

        view.apply_live(patch(json!({"power": 0})), 2);
        assert_eq!(view.store().get_f64("power"), Some(0.0));
        assert!(!view.published(2).readings.fridge.power_on);
    }

    #[test]
    fn test_heater_setpoint_is_written_locally() {
        let mut view = ControllerView::new("Fermenter", window(60));
        let _ = view.update_setpoint(ControllerKind::Heater, 68.0);
        assert_eq!(view.store().get_f64("heater_setpoint"), Some(68.0));
        assert_eq!(view.published(0).readings.heater.setpoint, Some(68.0));
    }

    #[test]
    fn test_connection_indicator() {
        let mut view = ControllerView::new("Fermenter", window(60));
        view.apply_live(LiveEvent::Connecting { attempt: 0 }, 0);
        view.apply_live(LiveEvent::Errored("connect failed".into()), 0);
        view.apply_live(LiveEvent::Connecting { attempt: 1 }, 0);
        view.apply_live(LiveEvent::Opened, 0);
        view.apply_live(LiveEvent::Closed { reason: "reset".into() }, 0);
        assert_eq!(view.connection().state, ChannelState::Closed);
        assert_eq!(view.connection().last_error.as_deref(), Some("reset"));

        // a short-lived connection does not reset the count
        view.apply_live(LiveEvent::Connecting { attempt: 2 }, 0);
        assert_eq!(view.connection().attempts, 2);
        view.apply_live(LiveEvent::Opened, 0);
        assert_eq!(view.connection().state, ChannelState::Open);
        assert_eq!(view.connection().attempts, 2);
    }

    #[test]
    fn test_live_samples_outside_window_are_dropped() {
        let mut view = ControllerView::new("Fermenter", window(30));
        let now = 100 * 60_000;
        view.apply_live(patch(json!({"abv": 1.0})), now - 31 * 60_000);
        view.apply_live(patch(json!({"abv": 2.0})), now);
        view.tick_clock(0, &Utc);

        let published = view.published(now);
        assert_eq!(published.series["abv"], vec![TimePoint::new(now, Some(2.0))]);
        assert_eq!(published.clock, "01-Jan-70 12:00am");
        assert_eq!(view.cache().len(Metric::Abv), 1);
    }

    #[test]
    fn test_null_reading_charts_as_gap() {
        let mut view = ControllerView::new("Fermenter", window(60));
        view.apply_live(patch(json!({"gravity": 1.05})), 1);
        view.apply_live(patch(json!({"gravity": null})), 2);

        assert_eq!(view.store().get("gravity"), None);
        assert_eq!(
            view.cache().as_series(Metric::Gravity),
            &[TimePoint::new(1, Some(1.05)), TimePoint::new(2, None)]
        );
        assert_eq!(view.published(2).readings.gravity, None);
    }
}
