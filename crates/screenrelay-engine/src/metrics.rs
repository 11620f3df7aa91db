//! Metrics collection and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use screenrelay_ipc::StreamMetrics;

use crate::state::StreamHubs;

/// Collects stream metrics.
///
/// Frame rate is measured from the video frames recorded since the last
/// report; per-track counters come from the hubs.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    video_frames: AtomicU64,
    audio_chunks: AtomicU64,
    last_report_time: RwLock<Instant>,
    last_frame_count: AtomicU64,
    target_fps: f32,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new(target_fps: f32) -> Self {
        Self {
            start_time: RwLock::new(None),
            video_frames: AtomicU64::new(0),
            audio_chunks: AtomicU64::new(0),
            last_report_time: RwLock::new(Instant::now()),
            last_frame_count: AtomicU64::new(0),
            target_fps,
        }
    }

    /// Start metrics collection.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
        *self.last_report_time.write() = Instant::now();
    }

    /// Stop metrics collection.
    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    /// Record a demuxed video frame.
    pub fn record_video_frame(&self) {
        self.video_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a demuxed audio chunk.
    pub fn record_audio_chunk(&self) {
        self.audio_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn video_frames(&self) -> u64 {
        self.video_frames.load(Ordering::Relaxed)
    }

    pub fn audio_chunks(&self) -> u64 {
        self.audio_chunks.load(Ordering::Relaxed)
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self, hubs: &StreamHubs) -> StreamMetrics {
        let now = Instant::now();

        let elapsed = now.duration_since(*self.last_report_time.read());
        let current_frames = self.video_frames.load(Ordering::Relaxed);
        let last_frames = self.last_frame_count.load(Ordering::Relaxed);

        let fps = if elapsed.as_secs_f32() > 0.0 {
            current_frames.saturating_sub(last_frames) as f32 / elapsed.as_secs_f32()
        } else {
            0.0
        };

        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| now.duration_since(s).as_secs())
            .unwrap_or(0);

        StreamMetrics {
            fps,
            target_fps: self.target_fps,
            video: hubs.video.metrics(),
            audio: hubs.audio.metrics(),
            uptime_seconds,
        }
    }

    /// Update last report time for FPS calculation.
    pub fn mark_reported(&self) {
        *self.last_report_time.write() = Instant::now();
        self.last_frame_count
            .store(self.video_frames.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(30.0)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_fps_counts_frames_since_last_report() {
        let metrics = MetricsCollector::new(30.0);
        let hubs = StreamHubs::new();
        metrics.start();

        for _ in 0..10 {
            metrics.record_video_frame();
        }
        thread::sleep(Duration::from_millis(50));
        let snapshot = metrics.snapshot(&hubs);
        assert!(snapshot.fps > 0.0);
        assert_eq!(snapshot.target_fps, 30.0);

        metrics.mark_reported();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(metrics.snapshot(&hubs).fps, 0.0);
        assert_eq!(metrics.video_frames(), 10);
    }

    #[test]
    fn test_uptime_is_zero_when_stopped() {
        let metrics = MetricsCollector::default();
        metrics.start();
        metrics.stop();
        assert_eq!(metrics.snapshot(&StreamHubs::new()).uptime_seconds, 0);
    }
}
