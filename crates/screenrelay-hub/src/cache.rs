//! Last-frame cache used to prime late joiners.

use screenrelay_capture::Frame;

/// The most recently published frame of one track.
#[derive(Debug, Default)]
pub struct LastFrameCache {
    frame: Option<Frame>,
}

impl LastFrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached frame.
    pub fn replace(&mut self, frame: Frame) {
        self.frame = Some(frame);
    }

    /// A shared handle to the cached frame.
    pub fn get(&self) -> Option<Frame> {
        self.frame.clone()
    }

    pub fn clear(&mut self) {
        self.frame = None;
    }
}
