//! ==============================================================================
//! history.rs - history loader (backfill)
//! ==============================================================================
//!
//! purpose:
//!     pulls the controller's `/datahistory` document once per retention
//!     window selection and turns it into windowed, millisecond-stamped
//!     columns ready to seed the series cache.
//!
//! document shape:
//!     {"label": [unix seconds...], "gravity": [...], "abv": [...], ...}
//!     every array is parallel to `label`. short arrays read as missing
//!     values, extra non-array keys are ignored.
//!
//! relationships:
//!     - used by: view.rs (spawned per window change)
//!     - feeds: series.rs (WindowedSeriesCache::seed)
//!
//! ==============================================================================

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::domain::{Metric, RetentionWindow};
use crate::error::{DashError, Result};
use crate::timefmt;

/// windowed columns from one history fetch
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistorySnapshot {
    /// epoch milliseconds, in document order
    pub timestamps: Vec<i64>,
    /// one column per field, parallel to `timestamps`
    pub fields: BTreeMap<String, Vec<Option<f64>>>,
    /// first `ograv` entry of the unfiltered document
    pub original_gravity: Option<f64>,
}

impl HistorySnapshot {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn column(&self, field: &str) -> Option<&[Option<f64>]> {
        self.fields.get(field).map(Vec::as_slice)
    }
}

#[derive(Deserialize)]
struct RawHistory {
    label: Vec<f64>,
    #[serde(flatten)]
    columns: HashMap<String, Value>,
}

/// convert a raw history document, keeping points with timestamp >= now - window
pub fn window_history(doc: Value, window: RetentionWindow, now_ms: i64) -> Result<HistorySnapshot> {
    let raw: RawHistory = serde_json::from_value(doc)
        .map_err(|e| DashError::MalformedPayload(format!("history document: {}", e)))?;

    let cutoff = window.cutoff(now_ms);
    let keep: Vec<usize> = raw
        .label
        .iter()
        .enumerate()
        .filter(|(_, secs)| seconds_to_ms(**secs) >= cutoff)
        .map(|(i, _)| i)
        .collect();

    let timestamps = keep.iter().map(|&i| seconds_to_ms(raw.label[i])).collect();

    let mut original_gravity = None;
    let mut fields = BTreeMap::new();
    for (name, column) in raw.columns {
        let Value::Array(values) = column else {
            debug!(field = %name, "ignoring non-array history field");
            continue;
        };
        if values.len() < raw.label.len() {
            warn!(
                field = %name,
                len = values.len(),
                expected = raw.label.len(),
                "history column shorter than label"
            );
        }
        if name == Metric::Ograv.key() {
            original_gravity = values.first().and_then(Value::as_f64);
        }
        let windowed = keep
            .iter()
            .map(|&i| values.get(i).and_then(Value::as_f64))
            .collect();
        fields.insert(name, windowed);
    }

    Ok(HistorySnapshot {
        timestamps,
        fields,
        original_gravity,
    })
}

fn seconds_to_ms(secs: f64) -> i64 {
    (secs * 1000.0).round() as i64
}

// ==============================================================================
// loader
// ==============================================================================

#[derive(Clone)]
pub struct HistoryLoader {
    client: Client,
    path: String,
}

impl HistoryLoader {
    pub fn new(client: Client, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }

    pub fn history_url(&self, endpoint: &str) -> String {
        format!("{}{}", endpoint.trim_end_matches('/'), self.path)
    }

    /// fetch the raw document; no filtering
    pub async fn fetch_document(&self, endpoint: &str) -> Result<Value> {
        let url = self.history_url(endpoint);
        debug!(url = %url, "fetching data history");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DashError::HistoryUnavailable(e.to_string()))?;
        response
            .json::<Value>()
            .await
            .map_err(|e| DashError::HistoryUnavailable(e.to_string()))
    }

    /// full reload for `window`; the cutoff is taken once the fetch resolves
    pub async fn load_history(&self, endpoint: &str, window: RetentionWindow) -> Result<HistorySnapshot> {
        let doc = self.fetch_document(endpoint).await?;
        let snapshot = window_history(doc, window, timefmt::now_ms())
            .map_err(|e| DashError::HistoryUnavailable(e.to_string()))?;
        info!(
            endpoint = %endpoint,
            window_minutes = window.minutes(),
            points = snapshot.len(),
            "history loaded"
        );
        Ok(snapshot)
    }
}
