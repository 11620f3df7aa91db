//! Core orchestrator for screenrelay.
//!
//! This crate ties the capture supervisors, frame demuxers and broadcast
//! hubs together behind a command/event interface.

mod metrics;
mod orchestrator;
mod pump;
mod state;

pub use metrics::MetricsCollector;
pub use orchestrator::Engine;
pub use pump::FramePump;
pub use state::{InitializedResources, ResourceManager, StreamHubs};

use crossbeam_channel::{Receiver, Sender};
use screenrelay_ipc::{EngineCommand, EngineEvent};

/// Create an engine instance with IPC channels.
pub fn create_engine(
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
) -> Engine {
    Engine::new(command_rx, event_tx)
}
