//! Typed engine messages for screenrelay.
//!
//! This crate defines the message types exchanged between the server
//! front-end and the engine core, the stream and input configuration, and the
//! JSON messages spoken with viewers over the WebSocket transport.

mod commands;
mod events;
mod state;
mod types;
mod wire;

pub use commands::EngineCommand;
pub use events::EngineEvent;
pub use state::{ShutdownPhase, StartupPhase, StopReason, StreamState};
pub use types::{
    CaptureMode, CaptureSource, ConfigError, FrameFormat, InputConfig, StreamConfig,
    StreamMetrics, TrackMetrics,
};
pub use wire::{ClientMessage, Reply, ServerMessage};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (front-end → Engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (Engine → front-end).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
