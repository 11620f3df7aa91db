//! Error types for the hub.

use screenrelay_capture::FrameKind;
use thiserror::Error;

/// Errors returned by [`crate::BroadcastHub`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The identity already has an active session on this hub.
    #[error("Multiple streams not allowed for {0}")]
    DuplicateSession(String),

    /// The hub is not accepting sessions.
    #[error("{0} stream is not running")]
    NotRunning(FrameKind),
}

/// A transport sink failed to accept a frame.
#[derive(Debug, Error)]
#[error("Sink write failed: {0}")]
pub struct SinkError(pub String);

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}
