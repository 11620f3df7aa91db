//! `screenrelay`: relays an X11 display (or a webcam) to browser viewers.
//!
//! Starts the capture engine, then serves viewers on two listeners: a
//! WebSocket endpoint (JSON commands, base64 frames, remote input) and an
//! MJPEG endpoint at `GET /stream`. Runs until Ctrl+C.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use screenrelay_engine::create_engine;
use screenrelay_input::{InputEventThrottler, InputInjector, XdotoolInjector};
use screenrelay_ipc::{command_channel, event_channel, CaptureSource, EngineCommand, EngineEvent};
use screenrelay_transport::ViewerServer;

use crate::config::AppConfig;

const DEFAULT_LOG_FILTER: &str = concat!(
    "screenrelay=debug,",
    "screenrelay_engine=debug,",
    "screenrelay_capture=info,",
    "screenrelay_hub=info,",
    "screenrelay_input=info,",
    "screenrelay_transport=debug",
);

/// Relay an X11 display over WebSocket and MJPEG.
#[derive(Debug, Parser)]
#[command(name = "screenrelay", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "SCREENRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket listen address.
    #[arg(long, env = "SCREENRELAY_WS_ADDR")]
    ws_addr: Option<SocketAddr>,

    /// MJPEG HTTP listen address.
    #[arg(long, env = "SCREENRELAY_HTTP_ADDR")]
    http_addr: Option<SocketAddr>,

    /// X display to capture and inject into.
    #[arg(long, env = "DISPLAY")]
    display: Option<String>,

    #[arg(long, env = "SCREENRELAY_WIDTH")]
    width: Option<u32>,

    #[arg(long, env = "SCREENRELAY_HEIGHT")]
    height: Option<u32>,

    #[arg(long, env = "SCREENRELAY_FRAMERATE")]
    framerate: Option<u32>,

    /// Capture from this V4L2 device instead of the X display.
    #[arg(long, env = "SCREENRELAY_WEBCAM", value_name = "DEVICE")]
    webcam: Option<String>,

    /// Also capture and relay audio.
    #[arg(long, env = "SCREENRELAY_AUDIO")]
    audio: bool,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, env = "SCREENRELAY_LOG")]
    log_level: Option<String>,
}

impl Cli {
    /// Load the config file, then layer the command-line overrides on top.
    fn into_config(self) -> anyhow::Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref())?;

        if let Some(addr) = self.ws_addr {
            config.server.ws_addr = addr;
        }
        if let Some(addr) = self.http_addr {
            config.server.http_addr = addr;
        }
        if let Some(display) = self.display {
            config.input.display = Some(display.clone());
            config.stream.display = display;
        }
        if let Some(width) = self.width {
            config.stream.width = width;
        }
        if let Some(height) = self.height {
            config.stream.height = height;
        }
        if let Some(framerate) = self.framerate {
            config.stream.framerate = framerate;
        }
        if let Some(device) = self.webcam {
            config.stream.source = CaptureSource::Webcam;
            config.stream.webcam_device = device;
        }
        if self.audio {
            config.stream.audio_enabled = true;
        }
        if self.log_level.is_some() {
            config.log_level = self.log_level;
        }

        Ok(config)
    }
}

fn init_logging(level: Option<&str>) {
    let fallback = level.unwrap_or(DEFAULT_LOG_FILTER).to_string();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Log engine events until the engine hangs up.
fn drain_events(event_rx: Receiver<EngineEvent>) {
    for event in event_rx {
        match event {
            EngineEvent::StateChanged { previous, current } => {
                info!(from = previous.name(), to = current.name(), "Stream state changed")
            }
            EngineEvent::Metrics(metrics) => debug!(
                fps = metrics.fps,
                viewers = metrics.video.active_sessions,
                frames = metrics.video.frames_published,
                evicted = metrics.video.frames_evicted,
                uptime = metrics.uptime_seconds,
                "Stream metrics"
            ),
            EngineEvent::StreamFailed { track, message } => {
                error!(%track, "Capture failed: {message}")
            }
            EngineEvent::Ready => info!("Engine ready"),
            EngineEvent::Shutdown => {
                info!("Engine shut down");
                break;
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;
    init_logging(config.log_level.as_deref());
    info!("screenrelay starting");

    config
        .stream
        .validate()
        .context("invalid stream configuration")?;

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let mut engine = create_engine(command_rx, event_tx);
    let hubs = engine.hubs();
    let state = engine.state_handle();
    let engine_thread = thread::Builder::new()
        .name("engine".to_string())
        .spawn(move || engine.run())
        .context("failed to spawn engine thread")?;
    let events_thread = thread::Builder::new()
        .name("engine-events".to_string())
        .spawn(move || drain_events(event_rx))
        .context("failed to spawn event thread")?;

    command_tx
        .send(EngineCommand::Start {
            config: config.stream.clone(),
        })
        .context("engine stopped before the stream could start")?;

    let injector: Box<dyn InputInjector> = Box::new(XdotoolInjector::from_config(&config.input));
    let input = InputEventThrottler::new(injector, &config.input);

    let mut server =
        ViewerServer::new(config.server.clone(), hubs, state, command_tx.clone(), input);
    server.start().context("failed to start viewer server")?;

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?
        .block_on(tokio::signal::ctrl_c())
        .context("failed to listen for Ctrl+C")?;

    info!("Shutting down");
    server.stop();

    if command_tx.send(EngineCommand::Shutdown).is_err() {
        warn!("Engine already stopped");
    }
    if engine_thread.join().is_err() {
        error!("Engine thread panicked");
    }
    if events_thread.join().is_err() {
        error!("Event thread panicked");
    }

    info!("screenrelay stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_without_flags() {
        let cli = Cli::try_parse_from(["screenrelay"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.audio);
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[stream]\nwidth = 800\nheight = 600\nframerate = 10").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::try_parse_from([
            "screenrelay",
            "--config",
            path.as_str(),
            "--height",
            "768",
            "--display",
            ":1",
            "--ws-addr",
            "127.0.0.1:7000",
            "--audio",
        ])
        .unwrap();
        let config = cli.into_config().unwrap();

        assert_eq!(config.stream.width, 800);
        assert_eq!(config.stream.height, 768);
        assert_eq!(config.stream.framerate, 10);
        assert_eq!(config.stream.display, ":1");
        assert_eq!(config.input.display.as_deref(), Some(":1"));
        assert_eq!(config.server.ws_addr, "127.0.0.1:7000".parse().unwrap());
        assert!(config.stream.audio_enabled);
        assert_eq!(config.stream.source, CaptureSource::Display);
    }

    #[test]
    fn test_webcam_flag_selects_device() {
        let cli = Cli::try_parse_from(["screenrelay", "--webcam", "/dev/video2"]).unwrap();
        let config = cli.into_config().unwrap();

        assert_eq!(config.stream.source, CaptureSource::Webcam);
        assert_eq!(config.stream.webcam_device, "/dev/video2");
        assert!(config.stream.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_address() {
        assert!(Cli::try_parse_from(["screenrelay", "--http-addr", "nowhere"]).is_err());
    }
}
