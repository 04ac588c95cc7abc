//! ==============================================================================
//! dashboard.rs - rig tasks and shared state
//! ==============================================================================
//!
//! purpose:
//! ```text
//!     wires the directory, one reducer task per rig and the system command
//!     channel together, and publishes every rig's view into shared state
//!     for the api to read.
//! ```
//!
//! per-rig task:
//!
//! ```text
//!     ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌──────────┐
//!     │ live events  │  │ history done │  │ api intents  │  │ 1s clock │
//!     └──────┬───────┘  └──────┬───────┘  └──────┬───────┘  └────┬─────┘
//!            └─────────────────┴────────┬────────┴───────────────┘
//!                                       ▼
//!                              ControllerView (owner)
//!                                       │ publish
//!                                       ▼
//!                           Arc<RwLock<DashboardState>>
//!
//!     the task is the only writer of its rig's store and cache. history
//!     fetches run in spawned tasks and report back through a channel, so a
//!     slow request never blocks patches.
//! ```
//!
//! ==============================================================================

use anyhow::Context;
use chrono::Local;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};

use crate::channel::{resolve_ws_url, ChannelState, ReconnectPolicy};
use crate::command::{self, CommandChannel};
use crate::config::DashConfig;
use crate::directory::{RigDirectory, RigEndpoint};
use crate::domain::{ControllerKind, RetentionWindow, SystemCommand};
use crate::error::{DashError, Result};
use crate::history::{HistoryLoader, HistorySnapshot};
use crate::live::LiveChannel;
use crate::timefmt;
use crate::view::{ControllerView, RigView};

// ==============================================================================
// shared state
// ==============================================================================

#[derive(Clone, Debug, Default, Serialize)]
pub struct DashboardState {
    pub rigs: BTreeMap<String, RigView>,
    pub system: Option<ChannelState>,
}

pub type SharedState = Arc<RwLock<DashboardState>>;

// ==============================================================================
// intents
// ==============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    TogglePower,
    ToggleEnabled,
    ToggleAutomatic,
    Setpoint,
}

/// body of `POST /api/rigs/{name}/control`
#[derive(Clone, Debug, Deserialize)]
pub struct ControlRequest {
    pub action: ControlAction,
    pub controller: ControllerKind,
    #[serde(default)]
    pub value: Option<f64>,
}

impl ControlRequest {
    pub fn apply(&self, view: &mut ControllerView) -> Result<()> {
        match self.action {
            ControlAction::TogglePower => view.toggle_power(self.controller),
            ControlAction::ToggleEnabled => view.toggle_enabled(self.controller),
            ControlAction::ToggleAutomatic => view.toggle_automatic(self.controller),
            ControlAction::Setpoint => match self.value {
                Some(value) => view.update_setpoint(self.controller, value),
                None => Err(DashError::MalformedPayload(
                    "setpoint requires a value".to_string(),
                )),
            },
        }
    }
}

pub enum RigIntent {
    Control {
        request: ControlRequest,
        reply: oneshot::Sender<Result<()>>,
    },
    SetWindow(RetentionWindow),
}

// ==============================================================================
// rig task
// ==============================================================================

pub struct RigTask {
    pub name: String,
    pub endpoint: RigEndpoint,
    pub client: Client,
    pub history: HistoryLoader,
    pub policy: ReconnectPolicy,
    pub sockjs_raw: bool,
    pub window: RetentionWindow,
    pub show_readings: bool,
    pub state: SharedState,
}

impl RigTask {
    async fn fetch_snapshot(&self) -> Result<Value> {
        self.client
            .get(&self.endpoint.display_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DashError::SnapshotUnavailable(e.to_string()))?
            .json::<Value>()
            .await
            .map_err(|e| DashError::MalformedPayload(e.to_string()))
    }

    /// the snapshot's `wsUrl` wins over the directory default
    fn live_url(&self, view: &ControllerView) -> String {
        match view.store().ws_url() {
            Some(ws_url) => resolve_ws_url(&self.endpoint.display_url, ws_url, self.sockjs_raw)
                .unwrap_or_else(|e| {
                    warn!(rig = %self.name, error = %e, "bad wsUrl in snapshot, using directory default");
                    self.endpoint.ws_url.clone()
                }),
            None => self.endpoint.ws_url.clone(),
        }
    }

    fn request_history(
        &self,
        view: &mut ControllerView,
        window: RetentionWindow,
        done: &mpsc::UnboundedSender<(u64, Result<HistorySnapshot>)>,
    ) {
        let generation = view.begin_history(window);
        let loader = self.history.clone();
        let endpoint = self.endpoint.display_url.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let result = loader.load_history(&endpoint, window).await;
            let _ = done.send((generation, result));
        });
    }

    async fn publish(&self, view: &ControllerView) {
        let published = view.published(timefmt::now_ms());
        self.state.write().await.rigs.insert(self.name.clone(), published);
    }

    pub async fn run(self, mut intents: mpsc::Receiver<RigIntent>) {
        let mut view = ControllerView::new(self.name.clone(), self.window)
            .with_reading_logs(self.show_readings);
        view.tick_clock(timefmt::now_ms(), &Local);
        self.publish(&view).await;

        // mount: a missing snapshot leaves the panel loading, live still opens
        match self.fetch_snapshot().await {
            Ok(snapshot) => {
                if let Err(e) = view.apply_snapshot(&snapshot) {
                    warn!(rig = %self.name, error = %e, "snapshot rejected");
                }
            }
            Err(e) => warn!(rig = %self.name, error = %e, "snapshot unavailable"),
        }

        let (history_tx, mut history_rx) = mpsc::unbounded_channel();
        self.request_history(&mut view, self.window, &history_tx);

        let url = self.live_url(&view);
        info!(rig = %self.name, url = %url, "opening live channel");
        let (live, events) = LiveChannel::open(url, self.policy.clone());
        view.attach_live(live);
        futures::pin_mut!(events);
        let mut live_done = false;

        let mut clock = tokio::time::interval(Duration::from_secs(1));
        self.publish(&view).await;

        loop {
            tokio::select! {
                event = events.next(), if !live_done => match event {
                    Some(event) => view.apply_live(event, timefmt::now_ms()),
                    None => {
                        warn!(rig = %self.name, "live channel gave up");
                        live_done = true;
                    }
                },
                Some((generation, result)) = history_rx.recv() => {
                    view.apply_history(generation, result);
                }
                intent = intents.recv() => match intent {
                    Some(RigIntent::Control { request, reply }) => {
                        let _ = reply.send(request.apply(&mut view));
                    }
                    Some(RigIntent::SetWindow(window)) => {
                        self.request_history(&mut view, window, &history_tx);
                    }
                    None => break,
                },
                _ = clock.tick() => {
                    view.tick_clock(timefmt::now_ms(), &Local);
                }
            }
            self.publish(&view).await;
        }

        info!(rig = %self.name, "rig task stopped");
    }
}

// ==============================================================================
// dashboard handle
// ==============================================================================

#[derive(Clone)]
pub struct Dashboard {
    state: SharedState,
    rigs: Arc<HashMap<String, mpsc::Sender<RigIntent>>>,
    system: CommandChannel,
}

impl Dashboard {
    pub async fn start(config: &DashConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.server.request_timeout_secs))
            .build()
            .context("Failed to build http client")?;

        let directory = RigDirectory::resolve(
            &client,
            &config.server.base_url,
            &config.server.rigs_path,
            config.channels.sockjs_raw,
        )
        .await;

        let state: SharedState = Arc::new(RwLock::new(DashboardState::default()));
        let policy = config.channels.reconnect_policy();
        let history = HistoryLoader::new(client.clone(), config.history.path.clone());

        let mut rigs = HashMap::new();
        for (name, endpoint) in directory.iter() {
            let (tx, rx) = mpsc::channel(32);
            let task = RigTask {
                name: name.clone(),
                endpoint: endpoint.clone(),
                client: client.clone(),
                history: history.clone(),
                policy: policy.clone(),
                sockjs_raw: config.channels.sockjs_raw,
                window: config.history.default_window_minutes,
                show_readings: config.logging.show_readings,
                state: state.clone(),
            };
            tokio::spawn(task.run(rx));
            rigs.insert(name.clone(), tx);
        }

        let system_url = config.system_ws_url()?;
        info!(url = %system_url, "opening system channel");
        let (system, events) = CommandChannel::open(system_url, policy);
        tokio::spawn(command::observe(events));

        Ok(Self {
            state,
            rigs: Arc::new(rigs),
            system,
        })
    }

    pub async fn snapshot(&self) -> DashboardState {
        let mut state = self.state.read().await.clone();
        state.system = Some(self.system.state());
        state
    }

    pub async fn rig(&self, name: &str) -> Result<RigView> {
        self.state
            .read()
            .await
            .rigs
            .get(name)
            .cloned()
            .ok_or_else(|| DashError::UnknownRig(name.to_string()))
    }

    fn sender(&self, name: &str) -> Result<&mpsc::Sender<RigIntent>> {
        self.rigs
            .get(name)
            .ok_or_else(|| DashError::UnknownRig(name.to_string()))
    }

    pub async fn control(&self, name: &str, request: ControlRequest) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.sender(name)?
            .send(RigIntent::Control { request, reply })
            .await
            .map_err(|_| DashError::ChannelClosed(format!("rig task {} stopped", name)))?;
        response
            .await
            .map_err(|_| DashError::ChannelClosed(format!("rig task {} stopped", name)))?
    }

    pub async fn set_window(&self, name: &str, window: RetentionWindow) -> Result<()> {
        self.sender(name)?
            .send(RigIntent::SetWindow(window))
            .await
            .map_err(|_| DashError::ChannelClosed(format!("rig task {} stopped", name)))
    }

    pub fn system(&self, command: SystemCommand) -> Result<()> {
        self.system.send(command)
    }
}
