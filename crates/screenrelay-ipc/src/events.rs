//! Events sent from the engine.

use serde::{Deserialize, Serialize};

use crate::state::StreamState;
use crate::types::StreamMetrics;

/// Events that the engine can emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Engine state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<StreamState>,

        /// Current state.
        current: Box<StreamState>,
    },

    /// Updated stream metrics.
    Metrics(StreamMetrics),

    /// A capture process exited while it was expected to be running.
    StreamFailed {
        /// Which capture track failed ("video" or "audio").
        track: String,

        /// Failure description.
        message: String,
    },

    /// Engine is ready.
    Ready,

    /// Engine has shut down.
    Shutdown,
}
