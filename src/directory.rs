//! ==============================================================================
//! directory.rs - rig directory
//! ==============================================================================
//!
//! purpose:
//! ```text
//!     resolves rig names to their endpoints with one fetch at startup.
//!     `GET /rigs` answers `{"Fermenter": {"url": "http://.../rigs/Fermenter"}}`;
//!     the live channel address defaults to `{url}/ws` until the controller
//!     snapshot names its own `wsUrl`.
//!
//!     a failed fetch yields an empty directory (logged, no retry). the
//!     directory is read-only once loaded.
//! ```
//!
//! ==============================================================================

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{error, info};

use crate::channel::resolve_ws_url;
use crate::error::{DashError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RigEndpoint {
    /// REST base for this rig (snapshot at the root, `/datahistory` below it)
    pub display_url: String,
    /// default live channel address
    pub ws_url: String,
}

#[derive(Deserialize)]
struct RigListing {
    url: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RigDirectory {
    rigs: BTreeMap<String, RigEndpoint>,
}

impl RigDirectory {
    /// build from a `/rigs` response; relative urls resolve against `base_url`
    pub fn from_listing(listing: serde_json::Value, base_url: &str, sockjs_raw: bool) -> Result<Self> {
        let listing: HashMap<String, RigListing> = serde_json::from_value(listing)
            .map_err(|e| DashError::DirectoryUnavailable(format!("unexpected /rigs shape: {}", e)))?;
        let base = Url::parse(base_url)
            .map_err(|e| DashError::Config(format!("bad base url '{}': {}", base_url, e)))?;

        let mut rigs = BTreeMap::new();
        for (name, entry) in listing {
            let display_url = base
                .join(&entry.url)
                .map_err(|e| DashError::DirectoryUnavailable(format!("bad url for {}: {}", name, e)))?
                .to_string();
            let display_url = display_url.trim_end_matches('/').to_string();
            let ws_url = resolve_ws_url(&display_url, &format!("{}/ws", display_url), sockjs_raw)?;
            rigs.insert(name, RigEndpoint { display_url, ws_url });
        }
        Ok(Self { rigs })
    }

    pub async fn fetch(client: &Client, base_url: &str, rigs_path: &str, sockjs_raw: bool) -> Result<Self> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), rigs_path);
        let listing = client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DashError::DirectoryUnavailable(e.to_string()))?
            .json::<serde_json::Value>()
            .await
            .map_err(|e| DashError::DirectoryUnavailable(e.to_string()))?;
        Self::from_listing(listing, base_url, sockjs_raw)
    }

    /// one-shot resolve; failures leave the directory empty
    pub async fn resolve(client: &Client, base_url: &str, rigs_path: &str, sockjs_raw: bool) -> Self {
        match Self::fetch(client, base_url, rigs_path, sockjs_raw).await {
            Ok(directory) => {
                info!(rigs = directory.len(), "rig directory loaded");
                directory
            }
            Err(e) => {
                error!(error = %e, "rig directory unavailable, no rigs will be shown");
                Self::default()
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&RigEndpoint> {
        self.rigs.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RigEndpoint)> {
        self.rigs.iter()
    }

    pub fn len(&self) -> usize {
        self.rigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rigs.is_empty()
    }
}
