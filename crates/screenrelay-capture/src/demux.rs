//! Re-segmentation of a capture byte stream into frames.
//!
//! Two framing disciplines are supported:
//! - **Markers**: concatenated JPEG images. A frame starts at an SOI marker
//!   (`FF D8`) and ends at the next EOI marker (`FF D9`), both inclusive.
//!   Bytes before the first SOI are garbage; only a trailing window of them
//!   is retained so that a marker split across two reads is not lost.
//! - **Fixed size**: raw frames (or audio chunks) of exactly N bytes. A short
//!   read at end-of-stream is dropped.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, info, trace, warn};

use screenrelay_ipc::{CaptureMode, FrameFormat, StreamConfig};

use crate::error::CaptureError;
use crate::frame::{CaptureTimestamp, Frame, FrameKind};
use crate::{CaptureResult, READ_RETRY_DELAY_MS};

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker.
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Default number of bytes requested per read.
const DEFAULT_READ_CHUNK: usize = 16384;

/// How frames are delimited in the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// SOI/EOI delimited images; `window` garbage bytes are retained while
    /// no start marker is present.
    Markers { window: usize },

    /// Frames of exactly this many bytes.
    FixedSize(usize),
}

impl Framing {
    /// Framing of the video track for the given configuration.
    pub fn for_video(config: &StreamConfig) -> Self {
        match config.mode {
            CaptureMode::Mjpeg => Self::Markers {
                window: config.read_chunk_size,
            },
            CaptureMode::Raw => Self::FixedSize(config.raw_frame_len()),
        }
    }

    /// Framing of the audio track for the given configuration.
    pub fn for_audio(config: &StreamConfig) -> Self {
        Self::FixedSize(config.audio_chunk_size)
    }
}

/// Lazily cuts frames out of a readable byte source.
///
/// Iteration ends cleanly on a zero-length read or when the stop flag is
/// raised. Read errors are retried after a short pause while the producing
/// process is alive and become [`CaptureError::StreamFailure`] once it is not.
pub struct FrameDemuxer<R> {
    reader: R,
    framing: Framing,
    kind: FrameKind,
    format: FrameFormat,
    buffer: BytesMut,
    read_chunk: usize,
    /// Where the EOI search resumes; only meaningful while the buffer starts
    /// with an SOI marker.
    eoi_scan_from: usize,
    sequence: Arc<AtomicU64>,
    should_stop: Arc<AtomicBool>,
    liveness: Option<(String, Arc<AtomicBool>)>,
    start_time: Instant,
    finished: bool,
    fps_log_interval: u64,
    fps_frames: u64,
    fps_since: Instant,
}

impl<R: Read> FrameDemuxer<R> {
    /// Create a demuxer with its own sequence counter and no stop flag.
    pub fn new(reader: R, framing: Framing, kind: FrameKind) -> Self {
        let now = Instant::now();
        Self {
            reader,
            framing,
            kind,
            format: kind.default_format(),
            buffer: BytesMut::new(),
            read_chunk: DEFAULT_READ_CHUNK,
            eoi_scan_from: 0,
            sequence: Arc::new(AtomicU64::new(0)),
            should_stop: Arc::new(AtomicBool::new(false)),
            liveness: None,
            start_time: now,
            finished: false,
            fps_log_interval: 0,
            fps_frames: 0,
            fps_since: now,
        }
    }

    /// Share a sequence counter (it outlives restarts of the stream).
    pub fn with_sequence(mut self, sequence: Arc<AtomicU64>) -> Self {
        self.sequence = sequence;
        self
    }

    /// End the sequence once this flag is raised.
    pub fn with_stop_flag(mut self, should_stop: Arc<AtomicBool>) -> Self {
        self.should_stop = should_stop;
        self
    }

    /// Escalate read errors once `alive` is cleared by the supervisor.
    pub fn with_liveness(mut self, program: impl Into<String>, alive: Arc<AtomicBool>) -> Self {
        self.liveness = Some((program.into(), alive));
        self
    }

    /// Payload format stamped on emitted frames.
    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }

    /// Upper bound on bytes requested per read.
    pub fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk.max(1);
        self
    }

    /// Log an effective frame rate every `interval` frames (0 disables).
    pub fn with_fps_log_interval(mut self, interval: u64) -> Self {
        self.fps_log_interval = interval;
        self
    }

    /// Bytes currently buffered and not yet emitted.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn extract(&mut self) -> Option<Bytes> {
        match self.framing {
            Framing::Markers { window } => self.extract_marked(window.max(1)),
            Framing::FixedSize(len) => {
                if len > 0 && self.buffer.len() >= len {
                    Some(self.buffer.split_to(len).freeze())
                } else {
                    None
                }
            }
        }
    }

    fn extract_marked(&mut self, window: usize) -> Option<Bytes> {
        let Some(start) = find_marker(&self.buffer, &JPEG_SOI, 0) else {
            if self.buffer.len() > window {
                let excess = self.buffer.len() - window;
                self.buffer.advance(excess);
            }
            self.eoi_scan_from = 0;
            return None;
        };

        if start > 0 {
            self.buffer.advance(start);
            self.eoi_scan_from = 0;
        }

        let from = self.eoi_scan_from.max(JPEG_SOI.len());
        match find_marker(&self.buffer, &JPEG_EOI, from) {
            Some(end) => {
                self.eoi_scan_from = 0;
                Some(self.buffer.split_to(end + JPEG_EOI.len()).freeze())
            }
            None => {
                // Keep the last byte in range: it may be the first half of EOI.
                self.eoi_scan_from = self.buffer.len().saturating_sub(1);
                None
            }
        }
    }

    /// Read once from the source into the buffer.
    fn fill(&mut self) -> std::io::Result<usize> {
        let want = match self.framing {
            Framing::Markers { .. } => self.read_chunk,
            Framing::FixedSize(len) => len
                .saturating_sub(self.buffer.len())
                .clamp(1, self.read_chunk),
        };

        let filled = self.buffer.len();
        self.buffer.resize(filled + want, 0);
        let result = self.reader.read(&mut self.buffer[filled..]);
        let read = *result.as_ref().unwrap_or(&0);
        self.buffer.truncate(filled + read);
        result
    }

    fn stamp(&mut self, data: Bytes) -> Frame {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let timestamp = CaptureTimestamp::now(self.start_time);
        trace!(sequence, len = data.len(), track = %self.kind, "Frame extracted");

        if self.fps_log_interval > 0 {
            self.fps_frames += 1;
            if self.fps_frames >= self.fps_log_interval {
                let elapsed = self.fps_since.elapsed().as_secs_f32();
                if elapsed > 0.0 {
                    info!(
                        track = %self.kind,
                        "Current FPS: {:.2}",
                        self.fps_frames as f32 / elapsed
                    );
                }
                self.fps_frames = 0;
                self.fps_since = Instant::now();
            }
        }

        Frame::new(data, self.kind, sequence, timestamp).with_format(self.format)
    }
}

impl<R: Read> Iterator for FrameDemuxer<R> {
    type Item = CaptureResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(data) = self.extract() {
                return Some(Ok(self.stamp(data)));
            }

            if self.finished {
                return None;
            }

            if self.should_stop.load(Ordering::SeqCst) {
                debug!(track = %self.kind, "Demuxer stopped");
                self.finished = true;
                return None;
            }

            match self.fill() {
                Ok(0) => {
                    debug!(
                        track = %self.kind,
                        discarded = self.buffer.len(),
                        "Capture stream ended"
                    );
                    self.buffer.clear();
                    self.finished = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    if let Some((program, alive)) = &self.liveness {
                        if !alive.load(Ordering::SeqCst) {
                            self.finished = true;
                            return Some(Err(CaptureError::StreamFailure {
                                program: program.clone(),
                                status: format!("read failed after exit: {e}"),
                            }));
                        }
                    }
                    warn!(track = %self.kind, "Capture pipe read error: {}", e);
                    thread::sleep(Duration::from_millis(READ_RETRY_DELAY_MS));
                }
            }
        }
    }
}

/// Position of the first occurrence of a two-byte marker at or after `from`.
fn find_marker(haystack: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(marker.len())
        .position(|w| w == marker)
        .map(|pos| pos + from)
}
