//! ==============================================================================
//! command.rs - command channel
//! ==============================================================================
//!
//! purpose:
//!     narrow control-plane connection to the controller's System endpoint.
//!     it only carries bare operational strings (reboot, poweroff, keyboard
//!     show/hide). inbound traffic is logged, never merged into any state.
//!     a send outside Open is dropped with an error report; nothing is queued
//!     for a later connection.
//!
//! ==============================================================================

use futures::{Stream, StreamExt};
use tracing::{info, warn};

use crate::channel::{Channel, ChannelEvent, ChannelHandle, ChannelState, ReconnectPolicy};
use crate::domain::SystemCommand;
use crate::error::Result;

#[derive(Clone)]
pub struct CommandChannel {
    handle: ChannelHandle,
}

impl CommandChannel {
    pub fn open(
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> (Self, impl Stream<Item = ChannelEvent> + Send + 'static) {
        let channel = Channel::new("system", url, policy);
        let handle = channel.handle();
        (Self { handle }, channel.events())
    }

    pub fn state(&self) -> ChannelState {
        self.handle.state()
    }

    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }

    pub fn send(&self, command: SystemCommand) -> Result<()> {
        self.handle.send_text(command.as_str())?;
        info!(command = %command, "system command sent");
        Ok(())
    }
}

/// drain the command channel's events into the log
pub async fn observe<S>(events: S)
where
    S: Stream<Item = ChannelEvent>,
{
    futures::pin_mut!(events);
    while let Some(event) = events.next().await {
        match event {
            ChannelEvent::Message(text) => info!(message = %text, "system channel message"),
            ChannelEvent::Errored(cause) => warn!(cause = %cause, "system channel error"),
            ChannelEvent::Closed { reason } => info!(reason = %reason, "system channel closed"),
            ChannelEvent::Opened | ChannelEvent::Connecting { .. } => {}
        }
    }
}
