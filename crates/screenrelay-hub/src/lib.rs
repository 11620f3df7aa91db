//! Fan-out of captured frames to viewer sessions.
//!
//! A [`BroadcastHub`] holds one bounded drop-oldest [`FrameQueue`] per
//! registered viewer. Publishing never waits on a viewer: when a queue is
//! full its oldest frame is evicted. Each [`ClientSession`] drains its own
//! queue at its own pace.

mod cache;
mod error;
mod hub;
mod queue;
mod session;

pub use cache::LastFrameCache;
pub use error::{HubError, SinkError};
pub use hub::{BroadcastHub, SessionTicket};
pub use queue::{FrameQueue, PushOutcome, QueueRecvError};
pub use session::{ClientSession, FrameSink, SessionEnd};

/// Result type for hub operations.
pub type HubResult<T> = Result<T, HubError>;

/// Default per-session queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 30;

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Instant;

    use bytes::Bytes;
    use screenrelay_capture::{CaptureTimestamp, Frame, FrameKind};

    pub fn frame(sequence: u64) -> Frame {
        Frame::new(
            Bytes::from(sequence.to_be_bytes().to_vec()),
            FrameKind::Video,
            sequence,
            CaptureTimestamp::now(Instant::now()),
        )
    }
}
