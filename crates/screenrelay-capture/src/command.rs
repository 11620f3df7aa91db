//! Capture process command lines.

use std::fmt;

use screenrelay_ipc::{CaptureMode, CaptureSource, StreamConfig};

/// Program and arguments of one capture process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl CaptureCommand {
    /// Build a command from a full argv; `None` when argv is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn ffmpeg(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl fmt::Display for CaptureCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Video capture command for the configured source and mode.
pub fn video_command(config: &StreamConfig) -> CaptureCommand {
    if let Some(command) = config.video_command.as_deref().and_then(CaptureCommand::from_argv) {
        return command;
    }

    let mut args = video_input_args(config);
    args.extend(video_output_args(config));
    CaptureCommand {
        program: config.capture_program.clone(),
        args,
    }
}

#[rustfmt::skip]
fn video_input_args(config: &StreamConfig) -> Vec<String> {
    let framerate = config.framerate.to_string();
    let size = config.video_size();

    let args: Vec<&str> = match config.source {
        CaptureSource::Display => vec![
            "-f", "x11grab",
            "-framerate", framerate.as_str(),
            "-video_size", size.as_str(),
            "-draw_mouse", if config.draw_mouse { "1" } else { "0" },
            "-i", config.display.as_str(),
        ],
        CaptureSource::Webcam => vec![
            "-f", "v4l2",
            "-framerate", framerate.as_str(),
            "-video_size", size.as_str(),
            "-i", config.webcam_device.as_str(),
        ],
    };
    args.into_iter().map(String::from).collect()
}

#[rustfmt::skip]
fn video_output_args(config: &StreamConfig) -> Vec<String> {
    let quality = config.quality.to_string();
    let threads = config.threads.to_string();

    let args: Vec<&str> = match config.mode {
        CaptureMode::Mjpeg => vec![
            "-c:v", "mjpeg",
            "-q:v", quality.as_str(),
            "-pix_fmt", "yuvj444p",
            "-threads", threads.as_str(),
            "-f", "image2pipe",
            "-",
        ],
        CaptureMode::Raw => vec![
            "-f", "rawvideo",
            "-pix_fmt", "rgb24",
            "-",
        ],
    };
    args.into_iter().map(String::from).collect()
}

/// Audio capture command (PulseAudio source encoded as constant-rate MP3).
#[rustfmt::skip]
pub fn audio_command(config: &StreamConfig) -> CaptureCommand {
    if let Some(command) = config.audio_command.as_deref().and_then(CaptureCommand::from_argv) {
        return command;
    }

    let rate = config.audio_sample_rate.to_string();
    let channels = config.audio_channels.to_string();
    let bitrate = config.audio_bitrate.as_str();

    CaptureCommand::ffmpeg(
        &config.capture_program,
        &[
            "-f", "pulse",
            "-i", &config.audio_source,
            "-acodec", "libmp3lame",
            "-ar", &rate,
            "-ac", &channels,
            "-b:a", bitrate,
            "-bufsize", bitrate,
            "-maxrate", bitrate,
            "-minrate", bitrate,
            "-f", "mp3",
            "-",
        ],
    )
}
