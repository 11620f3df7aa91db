//! Common configuration and metrics types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes per pixel of the raw capture format (rgb24).
const RAW_BYTES_PER_PIXEL: usize = 3;

/// Configuration rejected before a stream is started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Width or height is zero.
    #[error("Invalid capture size: {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    /// Frame rate is zero.
    #[error("Frame rate must be at least 1")]
    InvalidFramerate,

    /// A queue or chunk size is zero.
    #[error("{0} must be at least 1")]
    ZeroSize(&'static str),

    /// An argv override was given but is empty.
    #[error("{0} command override is empty")]
    EmptyCommand(&'static str),

    /// Webcam capture selected without a device path.
    #[error("Webcam capture needs a device path")]
    MissingWebcamDevice,
}

/// Where video frames are captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSource {
    /// The X display (x11grab).
    #[default]
    Display,

    /// A V4L2 camera device (`webcam_device`).
    Webcam,
}

/// Encoding of a relayed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    Jpeg,
    Rgb24,
    Mp3,
}

impl FrameFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Rgb24 => "application/octet-stream",
            Self::Mp3 => "audio/mpeg",
        }
    }
}

/// How the capture process frames its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Concatenated JPEG images, delimited by SOI/EOI markers.
    #[default]
    Mjpeg,

    /// Raw rgb24 frames of exactly `width * height * 3` bytes.
    Raw,
}

/// Configuration for starting a capture stream.
///
/// Immutable for the lifetime of the stream it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Capture program (e.g. "ffmpeg").
    pub capture_program: String,

    /// X display to capture (e.g. ":99").
    pub display: String,

    /// Capture width in pixels.
    pub width: u32,

    /// Capture height in pixels.
    pub height: u32,

    /// Capture frame rate.
    pub framerate: u32,

    /// Encoder quality (MJPEG `-q:v`, lower is better).
    pub quality: u32,

    /// Encoder thread count.
    pub threads: u32,

    /// Whether the pointer is drawn into the capture.
    pub draw_mouse: bool,

    /// Output framing of the video capture process.
    pub mode: CaptureMode,

    /// Video input: the X display or a webcam.
    pub source: CaptureSource,

    /// V4L2 device used when `source` is `webcam`.
    pub webcam_device: String,

    /// Full argv replacing the generated video capture command.
    pub video_command: Option<Vec<String>>,

    /// Whether an audio track is captured.
    pub audio_enabled: bool,

    /// PulseAudio source to capture.
    pub audio_source: String,

    /// Audio encoder bitrate (e.g. "128k").
    pub audio_bitrate: String,

    /// Audio sample rate in Hz.
    pub audio_sample_rate: u32,

    /// Audio channel count.
    pub audio_channels: u32,

    /// Size of one relayed audio chunk in bytes.
    pub audio_chunk_size: usize,

    /// Full argv replacing the generated audio capture command.
    pub audio_command: Option<Vec<String>>,

    /// Bytes requested per pipe read; also the garbage window retained
    /// while searching for a start marker.
    pub read_chunk_size: usize,

    /// Per-viewer queue capacity.
    pub queue_capacity: usize,

    /// Log an effective frame rate every this many frames (0 disables).
    pub fps_log_interval: u64,

    /// Grace period for the capture process to exit after a stop request.
    pub stop_grace_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capture_program: "ffmpeg".to_string(),
            display: ":99".to_string(),
            width: 1280,
            height: 720,
            framerate: 30,
            quality: 5,
            threads: 8,
            draw_mouse: true,
            mode: CaptureMode::Mjpeg,
            source: CaptureSource::Display,
            webcam_device: "/dev/video0".to_string(),
            video_command: None,
            audio_enabled: false,
            audio_source: "virtual_sink.monitor".to_string(),
            audio_bitrate: "128k".to_string(),
            audio_sample_rate: 44100,
            audio_channels: 2,
            audio_chunk_size: 8192,
            audio_command: None,
            read_chunk_size: 16384,
            queue_capacity: 30,
            fps_log_interval: 60,
            stop_grace_ms: 5000,
        }
    }
}

impl StreamConfig {
    /// Size in bytes of one raw frame.
    pub fn raw_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * RAW_BYTES_PER_PIXEL
    }

    /// Capture size as the `WIDTHxHEIGHT` string used on command lines.
    pub fn video_size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Payload format of the video track.
    pub fn video_format(&self) -> FrameFormat {
        match self.mode {
            CaptureMode::Mjpeg => FrameFormat::Jpeg,
            CaptureMode::Raw => FrameFormat::Rgb24,
        }
    }

    /// Grace period before a capture process is killed.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Check the configuration before starting a stream.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidSize {
                width: self.width,
                height: self.height,
            });
        }
        if self.framerate == 0 {
            return Err(ConfigError::InvalidFramerate);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroSize("queue_capacity"));
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigError::ZeroSize("read_chunk_size"));
        }
        if self.audio_enabled && self.audio_chunk_size == 0 {
            return Err(ConfigError::ZeroSize("audio_chunk_size"));
        }
        if self.source == CaptureSource::Webcam && self.webcam_device.is_empty() {
            return Err(ConfigError::MissingWebcamDevice);
        }
        if matches!(self.video_command, Some(ref argv) if argv.is_empty()) {
            return Err(ConfigError::EmptyCommand("video"));
        }
        if matches!(self.audio_command, Some(ref argv) if argv.is_empty()) {
            return Err(ConfigError::EmptyCommand("audio"));
        }
        Ok(())
    }
}

/// Configuration for the input-injection path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Injection utility (e.g. "xdotool").
    pub program: String,

    /// `DISPLAY` passed to the injection utility.
    pub display: Option<String>,

    /// Minimum time between two dispatched pointer moves, in microseconds.
    pub min_move_interval_us: u64,

    /// Whether pointer commands are accepted.
    pub enable_mouse: bool,

    /// Whether keyboard commands are accepted.
    pub enable_keyboard: bool,

    /// Screen size used to clamp pointer coordinates.
    pub screen_bounds: Option<(u32, u32)>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            program: "xdotool".to_string(),
            display: Some(":99".to_string()),
            min_move_interval_us: 1_000_000 / 60,
            enable_mouse: true,
            enable_keyboard: true,
            screen_bounds: None,
        }
    }
}

impl InputConfig {
    /// Minimum time between two dispatched pointer moves.
    pub fn min_move_interval(&self) -> Duration {
        Duration::from_micros(self.min_move_interval_us)
    }
}

/// Per-track counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackMetrics {
    /// Frames published since stream start.
    pub frames_published: u64,

    /// Payload bytes published since stream start.
    pub bytes_published: u64,

    /// Frames evicted from full viewer queues.
    pub frames_evicted: u64,

    /// Currently registered viewer sessions.
    pub active_sessions: usize,
}

/// Real-time stream metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Video frames published per second since the last report.
    pub fps: f32,

    /// Configured capture frame rate.
    pub target_fps: f32,

    /// Video track counters.
    pub video: TrackMetrics,

    /// Audio track counters.
    pub audio: TrackMetrics,

    /// Stream uptime in seconds.
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StreamConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.video_size(), "1280x720");
        assert_eq!(config.raw_frame_len(), 1280 * 720 * 3);
    }

    #[test]
    fn test_validate_rejects_zero_size() {
        let config = StreamConfig {
            width: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidSize {
                width: 0,
                height: 720
            })
        );
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = StreamConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroSize("queue_capacity"))
        );
    }

    #[test]
    fn test_validate_rejects_empty_override() {
        let config = StreamConfig {
            video_command: Some(Vec::new()),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyCommand("video")));
    }

    #[test]
    fn test_webcam_needs_device() {
        let config = StreamConfig {
            source: CaptureSource::Webcam,
            webcam_device: String::new(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::MissingWebcamDevice));
    }

    #[test]
    fn test_video_format_follows_mode() {
        let mut config = StreamConfig::default();
        assert_eq!(config.video_format(), FrameFormat::Jpeg);
        config.mode = CaptureMode::Raw;
        assert_eq!(config.video_format(), FrameFormat::Rgb24);
        assert_eq!(FrameFormat::Rgb24.mime_type(), "application/octet-stream");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: StreamConfig =
            toml::from_str("width = 1920\nmode = \"raw\"\nsource = \"webcam\"\n").unwrap();
        assert_eq!(config.width, 1920);
        assert_eq!(config.height, 720);
        assert_eq!(config.mode, CaptureMode::Raw);
        assert_eq!(config.source, CaptureSource::Webcam);
        assert_eq!(config.webcam_device, "/dev/video0");
        assert_eq!(config.queue_capacity, 30);
    }

    #[test]
    fn test_input_defaults() {
        let config = InputConfig::default();
        assert_eq!(config.min_move_interval(), Duration::from_micros(16_666));
        assert!(config.enable_mouse && config.enable_keyboard);
    }
}
