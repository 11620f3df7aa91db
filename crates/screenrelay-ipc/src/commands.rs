//! Commands sent to the engine.

use serde::{Deserialize, Serialize};

use crate::types::StreamConfig;

/// Commands that the front-end (or a transport) can send to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Start capturing with the given configuration.
    Start { config: StreamConfig },

    /// Stop the current capture stream.
    Stop,

    /// Start again with the most recent configuration unless already live.
    ///
    /// Used after a `StreamFailure`; the engine never restarts on its own.
    Restart,

    /// Request current engine state.
    GetState,

    /// Shutdown the engine completely.
    Shutdown,
}
