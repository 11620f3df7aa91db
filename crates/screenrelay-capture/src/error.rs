//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur while running a capture process.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture process could not be spawned.
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The capture process exited while it was expected to be running.
    #[error("Capture process {program} exited unexpectedly ({status})")]
    StreamFailure { program: String, status: String },

    /// A pipe of the capture process was not available.
    #[error("Capture process {0} has no {1} pipe")]
    MissingPipe(String, &'static str),

    /// Capture already started.
    #[error("Capture already started")]
    AlreadyStarted,

    /// Terminating the capture process failed.
    #[error("Failed to terminate {program}: {source}")]
    Terminate {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
