//! ==============================================================================
//! error.rs - error taxonomy for the sync core
//! ==============================================================================
//!
//! purpose:
//!     one error enum for everything the library can report. the binary wraps
//!     these in anyhow at the edge; inside the crate they travel as-is.
//!
//! propagation:
//!     - DirectoryUnavailable / SnapshotUnavailable / HistoryUnavailable:
//!       logged, the panel stays in its empty "loading" state
//!     - ChannelClosed: recoverable, the channel reconnects
//!     - ChannelSendRejected: the command is dropped and logged, never queued
//!     - MalformedPayload: the payload (or the offending key) is skipped
//!
//! ==============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashError {
    /// Rig directory could not be fetched or parsed
    #[error("rig directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Controller snapshot fetch failed
    #[error("snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    /// Data history fetch failed
    #[error("history unavailable: {0}")]
    HistoryUnavailable(String),

    /// Channel connection dropped or could not be established
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Send attempted while the channel was not open
    #[error("{channel} channel is not open (state: {state})")]
    ChannelSendRejected { channel: String, state: String },

    /// Payload did not have the expected JSON shape
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Retention window outside the supported set
    #[error("unsupported retention window: {0} minutes")]
    InvalidWindow(u32),

    /// No rig of that name in the directory
    #[error("unknown rig: {0}")]
    UnknownRig(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DashError>;
