//! ==============================================================================
//! series.rs - windowed series cache
//! ==============================================================================
//!
//! purpose:
//!     per-metric, append-only sequences of (timestamp, value) fed by the
//!     history backfill and by live patches. each live sample prunes points
//!     older than the active window, so a long session stays bounded;
//!     `visible` clips for display between samples.
//!
//! two clocks:
//!     backfilled points carry the controller's timestamps; live points carry
//!     the local receipt time. both land in the same series unmodified.
//!
//! relationships:
//!     - fed by: history.rs (seed), view.rs (live samples)
//!     - read by: api.rs (chart series, axis scale)
//!
//! ==============================================================================

use chrono::TimeZone;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::domain::{Metric, RetentionWindow, TimePoint};
use crate::history::HistorySnapshot;
use crate::store::ControllerStateStore;
use crate::timefmt;

#[derive(Clone, Debug, Default)]
pub struct WindowedSeriesCache {
    series: BTreeMap<Metric, Vec<TimePoint>>,
}

impl WindowedSeriesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// drop every metric's points
    pub fn reset(&mut self) {
        self.series.clear();
    }

    /// push to the tail; no sorting, no dedup
    pub fn append(&mut self, metric: Metric, timestamp_ms: i64, value: Option<f64>) {
        self.series
            .entry(metric)
            .or_default()
            .push(TimePoint::new(timestamp_ms, value));
    }

    pub fn as_series(&self, metric: Metric) -> &[TimePoint] {
        self.series.get(&metric).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self, metric: Metric) -> usize {
        self.as_series(metric).len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(Vec::is_empty)
    }

    /// reset, then load every metric the history carries
    pub fn seed(&mut self, history: &HistorySnapshot) {
        self.reset();
        for metric in Metric::ALL {
            let Some(values) = history.fields.get(metric.key()) else {
                continue;
            };
            for (ts, value) in history.timestamps.iter().zip(values) {
                self.append(metric, *ts, *value);
            }
        }
    }

    /// one sample per metric from the store's current values, stamped at
    /// receipt, then drop whatever has fallen out of `window`
    pub fn append_live_sample(
        &mut self,
        store: &ControllerStateStore,
        received_ms: i64,
        window: RetentionWindow,
    ) {
        for metric in Metric::ALL {
            self.append(metric, received_ms, store.metric(metric));
        }
        self.prune(window.cutoff(received_ms));
    }

    /// remove points older than `cutoff_ms`; points at the cutoff stay
    pub fn prune(&mut self, cutoff_ms: i64) {
        for points in self.series.values_mut() {
            points.retain(|p| p.timestamp_ms >= cutoff_ms);
        }
    }

    /// points inside the active window; the resident series is left as is
    pub fn visible(
        &self,
        metric: Metric,
        window: RetentionWindow,
        now_ms: i64,
    ) -> impl Iterator<Item = &TimePoint> + '_ {
        let cutoff = window.cutoff(now_ms);
        self.as_series(metric)
            .iter()
            .filter(move |p| p.timestamp_ms >= cutoff)
    }
}

// ==============================================================================
// axis bucketing
// ==============================================================================
// display only: the stored resolution is never touched.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisUnit {
    Minute,
    Hour,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AxisScale {
    pub unit: AxisUnit,
    pub step: u32,
    /// strftime pattern for tick labels
    pub label_format: &'static str,
}

impl AxisScale {
    pub fn for_window(window: RetentionWindow) -> Self {
        match window.minutes() {
            m if m <= 60 => Self {
                unit: AxisUnit::Minute,
                step: 5,
                label_format: "%-I:%M %p",
            },
            m if m <= 240 => Self {
                unit: AxisUnit::Minute,
                step: 15,
                label_format: "%-I:%M %p",
            },
            m if m <= 1440 => Self {
                unit: AxisUnit::Hour,
                step: 1,
                label_format: "%-I %p",
            },
            _ => Self {
                unit: AxisUnit::Hour,
                step: 6,
                label_format: "%b %-d, %-I:%M %p",
            },
        }
    }

    pub fn step_millis(&self) -> i64 {
        let unit_ms = match self.unit {
            AxisUnit::Minute => 60_000,
            AxisUnit::Hour => 3_600_000,
        };
        unit_ms * i64::from(self.step)
    }

    /// tick instants aligned to the step, covering [start_ms, end_ms]
    pub fn ticks(&self, start_ms: i64, end_ms: i64) -> Vec<i64> {
        let step = self.step_millis();
        let mut tick = start_ms.div_euclid(step) * step;
        if tick < start_ms {
            tick += step;
        }
        let mut out = Vec::new();
        while tick <= end_ms {
            out.push(tick);
            tick += step;
        }
        out
    }

    pub fn tick_label<Tz>(&self, ms: i64, tz: &Tz) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        timefmt::format_with(ms, tz, self.label_format)
    }
}
