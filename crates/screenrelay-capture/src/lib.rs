//! Capture process supervision and frame demuxing.
//!
//! An external encoder (ffmpeg by default) writes an unbounded byte stream
//! to its stdout. This crate launches and watches that process and cuts its
//! output into discrete [`Frame`]s.

mod command;
mod demux;
mod error;
mod frame;
mod supervisor;

pub use command::{audio_command, video_command, CaptureCommand};
pub use demux::{FrameDemuxer, Framing, JPEG_EOI, JPEG_SOI};
pub use error::CaptureError;
pub use frame::{CaptureTimestamp, Frame, FrameKind};
pub use supervisor::{CaptureState, CaptureSupervisor, SupervisorEvent};

pub use screenrelay_ipc::FrameFormat;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Pause before retrying a failed pipe read.
pub const READ_RETRY_DELAY_MS: u64 = 50;
