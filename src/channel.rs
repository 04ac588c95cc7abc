//! ==============================================================================
//! channel.rs - reconnecting duplex transport
//! ==============================================================================
//!
//! purpose:
//! ```text
//!     the websocket plumbing shared by the live channel and the command
//!     channel. a channel is a lazy stream of typed events: nothing connects
//!     until the stream is polled, and the stream keeps exactly one connection
//!     alive at a time, re-entering Connecting after every close or error.
//! ```
//!
//! state machine:
//!
//! ```text
//!     Connecting ──ok──▶ Open ──close/error──▶ Closed ──policy──▶ Connecting
//!         │                                                ▲
//!         └──────────────connect failed────────────────────┘
//! ```
//!
//! outbound frames:
//! ```text
//!     each connection gets its own queue. the sender is installed when the
//!     socket opens and removed before Closed is reported, so send() outside
//!     Open is rejected and nothing is carried over to the next connection.
//! ```
//!
//! relationships:
//! ```text
//!     - used by: live.rs, command.rs
//! ```
//!
//! ==============================================================================

use futures::{SinkExt, Stream, StreamExt};
use reqwest::Url;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::{DashError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "Connecting",
            Self::Open => "Open",
            Self::Closed => "Closed",
        };
        f.write_str(s)
    }
}

// ==============================================================================
// reconnect policy
// ==============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum Backoff {
    /// reconnect straight away (LAN default)
    Immediate,
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

/// attempts count consecutive reconnects since the last settled connection.
/// a connection that closes before `stable_after` does not reset the count,
/// so a peer that accepts and drops straight away still hits `max_attempts`
/// and still walks up the backoff curve.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub backoff: Backoff,
    /// None = retry forever
    pub max_attempts: Option<u32>,
    /// how long a connection must stay open before the attempt count resets
    pub stable_after: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::Immediate,
            max_attempts: None,
            stable_after: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// true once a connection open for `open_for` counts as settled
    pub fn settled(&self, open_for: Duration) -> bool {
        open_for >= self.stable_after
    }

    /// delay before reconnect attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { base, max } => {
                let shift = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min(*max)
            }
        }
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempt >= max)
    }
}

// ==============================================================================
// events and handles
// ==============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// a connection attempt is starting; 0 for the first one
    Connecting { attempt: u32 },
    Opened,
    /// inbound text frame
    Message(String),
    /// peer closed or the stream ended
    Closed { reason: String },
    /// transport failure, or the reconnect limit was hit
    Errored(String),
}

struct Shared {
    state: watch::Sender<ChannelState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Shared {
    fn install(&self, tx: mpsc::UnboundedSender<String>) {
        if let Ok(mut slot) = self.outbound.lock() {
            *slot = Some(tx);
        }
        self.state.send_replace(ChannelState::Open);
    }

    fn uninstall(&self, next: ChannelState) {
        if let Ok(mut slot) = self.outbound.lock() {
            *slot = None;
        }
        self.state.send_replace(next);
    }
}

/// cheap, cloneable send side of a channel
#[derive(Clone)]
pub struct ChannelHandle {
    name: Arc<str>,
    shared: Arc<Shared>,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// queue a text frame on the open connection; rejected in any other state
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let sent = match self.shared.outbound.lock() {
            Ok(slot) => slot
                .as_ref()
                .map(|tx| tx.send(text.into()).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        };
        if sent {
            Ok(())
        } else {
            let state = self.state();
            error!(channel = %self.name, state = %state, "send rejected, channel is not open");
            Err(DashError::ChannelSendRejected {
                channel: self.name.to_string(),
                state: state.to_string(),
            })
        }
    }
}

pub struct Channel {
    url: String,
    policy: ReconnectPolicy,
    handle: ChannelHandle,
}

enum Step {
    Inbound(Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Outbound(String),
}

impl Channel {
    pub fn new(name: &str, url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        Self {
            url: url.into(),
            policy,
            handle: ChannelHandle {
                name: Arc::from(name),
                shared: Arc::new(Shared {
                    state,
                    outbound: Mutex::new(None),
                }),
            },
        }
    }

    pub fn handle(&self) -> ChannelHandle {
        self.handle.clone()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// run the connection loop as a stream of events
    pub fn events(self) -> impl Stream<Item = ChannelEvent> + Send + 'static {
        let Channel { url, policy, handle } = self;
        async_stream::stream! {
            let name = handle.name.clone();
            let shared = handle.shared.clone();
            let mut attempt: u32 = 0;

            loop {
                shared.uninstall(ChannelState::Connecting);
                yield ChannelEvent::Connecting { attempt };
                info!(channel = %name, url = %url, attempt, "connecting");

                match connect_async(url.as_str()).await {
                    Ok((ws_stream, _)) => {
                        let (mut write, mut read) = ws_stream.split();
                        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                        shared.install(tx);
                        let opened_at = tokio::time::Instant::now();
                        info!(channel = %name, "open");
                        yield ChannelEvent::Opened;

                        let outcome = loop {
                            let step = tokio::select! {
                                inbound = read.next() => Step::Inbound(inbound),
                                Some(text) = rx.recv() => Step::Outbound(text),
                            };
                            match step {
                                Step::Inbound(Some(Ok(Message::Text(text)))) => {
                                    yield ChannelEvent::Message(text);
                                }
                                Step::Inbound(Some(Ok(Message::Close(frame)))) => {
                                    let reason = frame
                                        .map(|f| f.reason.to_string())
                                        .unwrap_or_else(|| "closed by peer".to_string());
                                    break ChannelEvent::Closed { reason };
                                }
                                Step::Inbound(Some(Ok(_))) => {
                                    debug!(channel = %name, "ignoring control/binary frame");
                                }
                                Step::Inbound(Some(Err(e))) => {
                                    break ChannelEvent::Errored(e.to_string());
                                }
                                Step::Inbound(None) => {
                                    break ChannelEvent::Closed {
                                        reason: "stream ended".to_string(),
                                    };
                                }
                                Step::Outbound(text) => {
                                    if let Err(e) = write.send(Message::Text(text)).await {
                                        break ChannelEvent::Errored(e.to_string());
                                    }
                                }
                            }
                        };

                        shared.uninstall(ChannelState::Closed);
                        if matches!(outcome, ChannelEvent::Closed { .. }) {
                            // finish the close handshake before the next attempt
                            let _ = tokio::time::timeout(Duration::from_secs(1), write.close()).await;
                        }
                        drop(read);
                        drop(write);
                        if policy.settled(opened_at.elapsed()) {
                            attempt = 0;
                        }
                        warn!(channel = %name, event = ?outcome, "connection lost");
                        yield outcome;
                    }
                    Err(e) => {
                        shared.uninstall(ChannelState::Closed);
                        warn!(channel = %name, error = %e, "connect failed");
                        yield ChannelEvent::Errored(format!("connect failed: {}", e));
                    }
                }

                attempt += 1;
                if policy.exhausted(attempt) {
                    error!(channel = %name, attempt, "giving up");
                    yield ChannelEvent::Errored(format!(
                        "max reconnect attempts ({}) reached",
                        attempt
                    ));
                    break;
                }

                let delay = policy.delay_for(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

// ==============================================================================
// url helpers
// ==============================================================================

/// resolve a (possibly relative) websocket address against the controller url
///
/// `/rigs/Fermenter/ws` + `http://pi:8080/rigs/Fermenter`
///     -> `ws://pi:8080/rigs/Fermenter/ws`
/// with `sockjs_raw` the raw endpoint `.../ws/websocket` is used instead.
pub fn resolve_ws_url(base: &str, ws_url: &str, sockjs_raw: bool) -> Result<String> {
    let base = Url::parse(base).map_err(|e| DashError::Config(format!("bad url '{}': {}", base, e)))?;
    let mut url = base
        .join(ws_url)
        .map_err(|e| DashError::Config(format!("bad ws url '{}': {}", ws_url, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(DashError::Config(format!("unsupported scheme '{}'", other))),
    };
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(DashError::Config(format!("cannot rewrite scheme of '{}'", url)));
    }

    if sockjs_raw {
        let path = format!("{}/websocket", url.path().trim_end_matches('/'));
        url.set_path(&path);
    }
    Ok(url.to_string())
}
