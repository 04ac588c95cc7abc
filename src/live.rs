//! ==============================================================================
//! live.rs - live channel
//! ==============================================================================
//!
//! purpose:
//!     the per-rig duplex connection. inbound frames are partial state
//!     patches; outbound frames are fire-and-forget CommandMessages with no
//!     request/response correlation.
//!
//! relationships:
//!     - uses: channel.rs (transport, reconnect policy)
//!     - consumed by: view.rs (one reducer applies every event)
//!
//! ==============================================================================

use futures::{future, Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelEvent, ChannelHandle, ChannelState, ReconnectPolicy};
use crate::domain::CommandMessage;
use crate::error::{DashError, Result};

pub type Patch = Map<String, Value>;

#[derive(Clone, Debug, PartialEq)]
pub enum LiveEvent {
    Connecting { attempt: u32 },
    Opened,
    Patch(Patch),
    Closed { reason: String },
    Errored(String),
}

impl LiveEvent {
    /// malformed frames are dropped here, the stream carries on
    fn from_channel(event: ChannelEvent) -> Option<Self> {
        match event {
            ChannelEvent::Connecting { attempt } => Some(Self::Connecting { attempt }),
            ChannelEvent::Opened => Some(Self::Opened),
            ChannelEvent::Message(text) => match parse_patch(&text) {
                Ok(patch) => Some(Self::Patch(patch)),
                Err(e) => {
                    warn!(error = %e, "dropping live frame");
                    None
                }
            },
            ChannelEvent::Closed { reason } => Some(Self::Closed { reason }),
            ChannelEvent::Errored(cause) => Some(Self::Errored(cause)),
        }
    }
}

pub fn parse_patch(text: &str) -> Result<Patch> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DashError::MalformedPayload(
            "live frame is not a json object".to_string(),
        )),
        Err(e) => Err(DashError::MalformedPayload(e.to_string())),
    }
}

#[derive(Clone)]
pub struct LiveChannel {
    handle: ChannelHandle,
}

impl LiveChannel {
    /// build the channel; it connects once the returned stream is polled
    pub fn open(
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> (Self, impl Stream<Item = LiveEvent> + Send + 'static) {
        let channel = Channel::new("live", url, policy);
        let handle = channel.handle();
        let events = channel
            .events()
            .filter_map(|event| future::ready(LiveEvent::from_channel(event)));
        (Self { handle }, events)
    }

    pub fn state(&self) -> ChannelState {
        self.handle.state()
    }

    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }

    pub fn send(&self, command: &CommandMessage) -> Result<()> {
        let text = serde_json::to_string(command)
            .map_err(|e| DashError::MalformedPayload(e.to_string()))?;
        debug!(frame = %text, "sending command");
        self.handle.send_text(text)
    }
}
