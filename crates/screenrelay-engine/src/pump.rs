//! Producer thread: capture pipe → demuxer → hub.

use std::process::ChildStdout;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use screenrelay_capture::{FrameDemuxer, FrameFormat, FrameKind, Framing};
use screenrelay_hub::BroadcastHub;

use crate::metrics::MetricsCollector;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Everything a pump thread needs.
pub(crate) struct PumpSpec {
    pub kind: FrameKind,
    pub format: FrameFormat,
    pub framing: Framing,
    pub read_chunk: usize,
    pub fps_log_interval: u64,
    pub program: String,
    pub alive: Arc<AtomicBool>,
    pub sequence: Arc<AtomicU64>,
    pub should_stop: Arc<AtomicBool>,
    pub hub: Arc<BroadcastHub>,
    pub metrics: Arc<MetricsCollector>,
}

/// One running producer thread.
pub struct FramePump {
    kind: FrameKind,
    handle: Option<JoinHandle<()>>,
}

impl FramePump {
    pub(crate) fn spawn(stdout: ChildStdout, spec: PumpSpec) -> Self {
        let kind = spec.kind;
        let handle = thread::spawn(move || pump_loop(stdout, spec));
        Self {
            kind,
            handle: Some(handle),
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Wait up to `timeout` for the thread to finish, detaching it after.
    pub fn join(&mut self, timeout: Duration) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        if handle.is_finished() {
            if handle.join().is_err() {
                error!(track = %self.kind, "Frame pump panicked");
            }
        } else {
            warn!(track = %self.kind, "Frame pump still blocked on the capture pipe, detaching");
        }
    }
}

fn pump_loop(stdout: ChildStdout, spec: PumpSpec) {
    debug!(track = %spec.kind, "Frame pump starting");

    let demuxer = FrameDemuxer::new(stdout, spec.framing, spec.kind)
        .with_format(spec.format)
        .with_sequence(spec.sequence)
        .with_stop_flag(spec.should_stop)
        .with_liveness(spec.program, spec.alive)
        .with_read_chunk(spec.read_chunk)
        .with_fps_log_interval(spec.fps_log_interval);

    let mut published: u64 = 0;
    for item in demuxer {
        match item {
            Ok(frame) => {
                match spec.kind {
                    FrameKind::Video => spec.metrics.record_video_frame(),
                    FrameKind::Audio => spec.metrics.record_audio_chunk(),
                }
                spec.hub.publish(frame);
                published += 1;
            }
            Err(e) => {
                // The supervisor reports the exit; this only ends the pump.
                error!(track = %spec.kind, "{}", e);
                break;
            }
        }
    }

    info!(track = %spec.kind, published, "Frame pump stopped");
}
