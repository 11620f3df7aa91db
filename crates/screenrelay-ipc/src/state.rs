//! Stream lifecycle: engine states, startup and shutdown phases.

use serde::{Deserialize, Serialize};

use crate::types::{StreamConfig, StreamMetrics};

/// The current state of the relay engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum StreamState {
    /// No capture stream is running.
    #[default]
    Idle,

    /// The capture stream is starting up.
    Starting {
        /// Current startup phase.
        phase: StartupPhase,
    },

    /// Frames are being captured and relayed.
    Live {
        /// Active stream configuration.
        config: StreamConfig,

        /// Current stream metrics.
        metrics: StreamMetrics,
    },

    /// The capture stream is stopping.
    Stopping {
        /// Reason for stopping.
        reason: StopReason,

        /// Current shutdown phase.
        phase: ShutdownPhase,
    },

    /// The stream failed to start or died while running.
    Error {
        /// Error message.
        message: String,

        /// Whether an explicit restart may succeed.
        recoverable: bool,
    },
}

impl StreamState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the stream is currently live.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }

    /// Configuration of the running stream, if live.
    pub fn live_config(&self) -> Option<&StreamConfig> {
        match self {
            Self::Live { config, .. } => Some(config),
            _ => None,
        }
    }

    /// Returns true if the stream is starting.
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Starting { .. })
    }

    /// Returns true if the stream is stopping.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping { .. })
    }

    /// Capture failed or could not start; see `recoverable`.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// State name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting { .. } => "Starting",
            Self::Live { .. } => "Live",
            Self::Stopping { .. } => "Stopping",
            Self::Error { .. } => "Error",
        }
    }
}

/// Startup phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPhase {
    /// Opening the broadcast hubs for registrations.
    OpenHubs,

    /// Launching the video capture process.
    LaunchVideo,

    /// Launching the audio capture process (skipped when audio is off).
    LaunchAudio,

    /// Starting the demux/publish threads.
    StartPumps,
}

impl StartupPhase {
    /// Phase that follows this one.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::OpenHubs => Some(Self::LaunchVideo),
            Self::LaunchVideo => Some(Self::LaunchAudio),
            Self::LaunchAudio => Some(Self::StartPumps),
            Self::StartPumps => None,
        }
    }

    /// Phase to unwind after this one during rollback.
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::OpenHubs => None,
            Self::LaunchVideo => Some(Self::OpenHubs),
            Self::LaunchAudio => Some(Self::LaunchVideo),
            Self::StartPumps => Some(Self::LaunchAudio),
        }
    }

    /// Phase name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenHubs => "Opening hubs",
            Self::LaunchVideo => "Launching video capture",
            Self::LaunchAudio => "Launching audio capture",
            Self::StartPumps => "Starting frame pumps",
        }
    }
}

/// Shutdown phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownPhase {
    /// Signalling the demuxers to end their sequences.
    StopPumps,

    /// Terminating the external capture processes.
    TerminateCapture,

    /// Closing every session queue.
    CloseHubs,
}

impl ShutdownPhase {
    /// Phase that follows this one.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::StopPumps => Some(Self::TerminateCapture),
            Self::TerminateCapture => Some(Self::CloseHubs),
            Self::CloseHubs => None,
        }
    }

    /// Phase name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::StopPumps => "Stopping frame pumps",
            Self::TerminateCapture => "Terminating capture",
            Self::CloseHubs => "Closing sessions",
        }
    }
}

/// Reason for stopping the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StopReason {
    /// Stop was requested explicitly.
    UserRequested,

    /// Stopping in order to start again.
    Restart,

    /// A capture process exited or its pipe failed.
    CaptureFailed { message: String },

    /// Fatal error occurred.
    FatalError { message: String },
}

impl StopReason {
    /// Human-readable reason, as carried in logs and error states.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Stream stopped by request".to_string(),
            Self::Restart => "Stream restarting".to_string(),
            Self::CaptureFailed { message } => format!("Capture failed: {message}"),
            Self::FatalError { message } => format!("Fatal error: {message}"),
        }
    }
}
