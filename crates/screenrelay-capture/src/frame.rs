//! Frame types.

use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use screenrelay_ipc::FrameFormat;

/// Timestamp for a demuxed frame.
#[derive(Debug, Clone, Copy)]
pub struct CaptureTimestamp {
    /// Monotonic timestamp when the frame was cut from the stream.
    pub capture_time: Instant,

    /// Time since stream start in 100ns units.
    pub pts_100ns: u64,
}

impl CaptureTimestamp {
    /// Create a new capture timestamp.
    pub fn now(start_time: Instant) -> Self {
        let capture_time = Instant::now();
        let elapsed = capture_time.duration_since(start_time);
        let pts_100ns = elapsed.as_nanos() as u64 / 100;

        Self {
            capture_time,
            pts_100ns,
        }
    }

    /// Get the presentation timestamp in milliseconds.
    pub fn pts_ms(&self) -> u64 {
        self.pts_100ns / 10_000
    }
}

/// Which capture track a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// One complete encoded image (or raw pixel frame).
    Video,

    /// One audio chunk.
    Audio,
}

impl FrameKind {
    /// Payload format a track carries unless told otherwise.
    pub fn default_format(self) -> FrameFormat {
        match self {
            Self::Video => FrameFormat::Jpeg,
            Self::Audio => FrameFormat::Mp3,
        }
    }

    /// Lowercase track name used in logs and wire messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One complete unit of captured media.
///
/// Frames are never mutated after creation; cloning only bumps the
/// reference count of the payload.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded payload.
    pub data: Bytes,

    /// Track this frame belongs to.
    pub kind: FrameKind,

    /// Payload encoding.
    pub format: FrameFormat,

    /// Monotonically increasing sequence number.
    pub sequence: u64,

    /// Capture timestamp.
    pub timestamp: CaptureTimestamp,
}

impl Frame {
    /// Create a new frame in the track's default format.
    pub fn new(data: Bytes, kind: FrameKind, sequence: u64, timestamp: CaptureTimestamp) -> Self {
        Self {
            data,
            kind,
            format: kind.default_format(),
            sequence,
            timestamp,
        }
    }

    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
