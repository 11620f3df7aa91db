//! Resource management and initialization tracking.

use std::process::ChildStdout;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use screenrelay_capture::{
    audio_command, video_command, CaptureSupervisor, FrameFormat, FrameKind, Framing,
    SupervisorEvent,
};
use screenrelay_hub::BroadcastHub;
use screenrelay_ipc::{ShutdownPhase, StartupPhase, StreamConfig};

use crate::metrics::MetricsCollector;
use crate::pump::{FramePump, PumpSpec};

/// Upper bound on waiting for a pump after its process is gone.
const PUMP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The video and audio hubs. They outlive individual streams so that
/// transports can hold them from the start.
#[derive(Debug, Clone)]
pub struct StreamHubs {
    pub video: Arc<BroadcastHub>,
    pub audio: Arc<BroadcastHub>,
}

impl StreamHubs {
    pub fn new() -> Self {
        Self {
            video: Arc::new(BroadcastHub::new(FrameKind::Video)),
            audio: Arc::new(BroadcastHub::new(FrameKind::Audio)),
        }
    }

    pub fn get(&self, kind: FrameKind) -> &Arc<BroadcastHub> {
        match kind {
            FrameKind::Video => &self.video,
            FrameKind::Audio => &self.audio,
        }
    }
}

impl Default for StreamHubs {
    fn default() -> Self {
        Self::new()
    }
}

/// Resources that have been initialized during startup.
#[derive(Default)]
pub struct InitializedResources {
    /// Video capture process.
    pub video_capture: Option<CaptureSupervisor>,

    /// Audio capture process.
    pub audio_capture: Option<CaptureSupervisor>,

    /// Video pipe, until a pump takes it.
    pub video_stdout: Option<ChildStdout>,

    /// Audio pipe, until a pump takes it.
    pub audio_stdout: Option<ChildStdout>,

    /// Running producer threads.
    pub pumps: Vec<FramePump>,

    /// Raised to end the demuxers.
    pub should_stop: Arc<AtomicBool>,
}

impl InitializedResources {
    /// Create empty resources.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Manages resource initialization and cleanup.
pub struct ResourceManager {
    hubs: StreamHubs,
    failure_tx: Sender<SupervisorEvent>,
    video_sequence: Arc<AtomicU64>,
    audio_sequence: Arc<AtomicU64>,
    resources: Mutex<InitializedResources>,
    current_phase: Mutex<Option<StartupPhase>>,
}

impl ResourceManager {
    /// Create a resource manager publishing into `hubs`; capture exits are
    /// reported on `failure_tx`.
    pub fn new(hubs: StreamHubs, failure_tx: Sender<SupervisorEvent>) -> Self {
        Self {
            hubs,
            failure_tx,
            video_sequence: Arc::new(AtomicU64::new(0)),
            audio_sequence: Arc::new(AtomicU64::new(0)),
            resources: Mutex::new(InitializedResources::new()),
            current_phase: Mutex::new(None),
        }
    }

    /// Initialize every startup phase in order, reporting each one to
    /// `on_phase` before it runs.
    #[instrument(name = "init_resources", skip_all)]
    pub fn initialize(
        &self,
        config: &StreamConfig,
        metrics: &Arc<MetricsCollector>,
        mut on_phase: impl FnMut(StartupPhase),
    ) -> Result<(), String> {
        let mut phase = StartupPhase::OpenHubs;

        loop {
            *self.current_phase.lock() = Some(phase);
            on_phase(phase);
            self.init_phase(config, metrics, phase)?;

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        Ok(())
    }

    /// Initialize a single phase.
    fn init_phase(
        &self,
        config: &StreamConfig,
        metrics: &Arc<MetricsCollector>,
        phase: StartupPhase,
    ) -> Result<(), String> {
        info!("Initializing phase: {:?}", phase);

        match phase {
            StartupPhase::OpenHubs => self.open_hubs(config),
            StartupPhase::LaunchVideo => self.launch_video(config),
            StartupPhase::LaunchAudio => self.launch_audio(config),
            StartupPhase::StartPumps => self.start_pumps(config, metrics),
        }
    }

    fn open_hubs(&self, config: &StreamConfig) -> Result<(), String> {
        self.hubs.video.open(config.queue_capacity);
        if config.audio_enabled {
            self.hubs.audio.open(config.queue_capacity);
        }
        Ok(())
    }

    fn launch_video(&self, config: &StreamConfig) -> Result<(), String> {
        let mut supervisor = CaptureSupervisor::new(
            FrameKind::Video.name(),
            video_command(config),
            self.failure_tx.clone(),
        )
        .with_grace(config.stop_grace());

        let stdout = supervisor
            .start()
            .map_err(|e| format!("Video capture start failed: {}", e))?;

        let mut resources = self.resources.lock();
        resources.video_capture = Some(supervisor);
        resources.video_stdout = Some(stdout);

        debug!("Video capture launched");
        Ok(())
    }

    fn launch_audio(&self, config: &StreamConfig) -> Result<(), String> {
        if !config.audio_enabled {
            debug!("Audio disabled, skipping");
            return Ok(());
        }

        let mut supervisor = CaptureSupervisor::new(
            FrameKind::Audio.name(),
            audio_command(config),
            self.failure_tx.clone(),
        )
        .with_grace(config.stop_grace());

        let stdout = supervisor
            .start()
            .map_err(|e| format!("Audio capture start failed: {}", e))?;

        let mut resources = self.resources.lock();
        resources.audio_capture = Some(supervisor);
        resources.audio_stdout = Some(stdout);

        debug!("Audio capture launched");
        Ok(())
    }

    fn start_pumps(
        &self,
        config: &StreamConfig,
        metrics: &Arc<MetricsCollector>,
    ) -> Result<(), String> {
        let mut resources = self.resources.lock();
        let should_stop = Arc::new(AtomicBool::new(false));
        resources.should_stop = Arc::clone(&should_stop);

        let video = resources
            .video_stdout
            .take()
            .zip(resources.video_capture.as_ref());
        let Some((stdout, supervisor)) = video else {
            return Err("Video capture is not running".to_string());
        };
        let spec = PumpSpec {
            kind: FrameKind::Video,
            format: config.video_format(),
            framing: Framing::for_video(config),
            read_chunk: config.read_chunk_size,
            fps_log_interval: config.fps_log_interval,
            program: supervisor.command().program.clone(),
            alive: supervisor.liveness(),
            sequence: Arc::clone(&self.video_sequence),
            should_stop: Arc::clone(&should_stop),
            hub: Arc::clone(&self.hubs.video),
            metrics: Arc::clone(metrics),
        };
        let video_pump = FramePump::spawn(stdout, spec);
        resources.pumps.push(video_pump);

        let audio = resources
            .audio_stdout
            .take()
            .zip(resources.audio_capture.as_ref());
        if let Some((stdout, supervisor)) = audio {
            let spec = PumpSpec {
                kind: FrameKind::Audio,
                format: FrameFormat::Mp3,
                framing: Framing::for_audio(config),
                read_chunk: config.audio_chunk_size,
                fps_log_interval: 0,
                program: supervisor.command().program.clone(),
                alive: supervisor.liveness(),
                sequence: Arc::clone(&self.audio_sequence),
                should_stop,
                hub: Arc::clone(&self.hubs.audio),
                metrics: Arc::clone(metrics),
            };
            let audio_pump = FramePump::spawn(stdout, spec);
            resources.pumps.push(audio_pump);
        }

        debug!(pumps = resources.pumps.len(), "Frame pumps started");
        Ok(())
    }

    /// Rollback resources from the current phase backwards.
    #[instrument(name = "rollback_resources", skip(self))]
    pub fn rollback(&self) {
        let current = *self.current_phase.lock();

        if let Some(mut phase) = current {
            loop {
                info!("Rolling back phase: {:?}", phase);
                self.rollback_phase(phase);

                match phase.previous() {
                    Some(prev) => phase = prev,
                    None => break,
                }
            }
        }

        *self.current_phase.lock() = None;
    }

    fn rollback_phase(&self, phase: StartupPhase) {
        match phase {
            StartupPhase::StartPumps => self.signal_pumps(),
            StartupPhase::LaunchAudio => {
                let mut resources = self.resources.lock();
                resources.audio_stdout = None;
                if let Some(mut capture) = resources.audio_capture.take() {
                    let _ = capture.stop();
                }
            }
            StartupPhase::LaunchVideo => {
                {
                    let mut resources = self.resources.lock();
                    resources.video_stdout = None;
                    if let Some(mut capture) = resources.video_capture.take() {
                        let _ = capture.stop();
                    }
                }
                self.join_pumps();
            }
            StartupPhase::OpenHubs => self.close_hubs(),
        }
    }

    /// Shut everything down, reporting each phase to `on_phase` before it
    /// runs.
    #[instrument(name = "shutdown_resources", skip_all)]
    pub fn shutdown(&self, mut on_phase: impl FnMut(ShutdownPhase)) {
        info!("Shutting down all resources");

        let mut phase = ShutdownPhase::StopPumps;
        loop {
            on_phase(phase);
            match phase {
                ShutdownPhase::StopPumps => self.signal_pumps(),
                ShutdownPhase::TerminateCapture => {
                    self.stop_captures();
                    self.join_pumps();
                }
                ShutdownPhase::CloseHubs => self.close_hubs(),
            }

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        *self.current_phase.lock() = None;
    }

    fn signal_pumps(&self) {
        self.resources.lock().should_stop.store(true, Ordering::SeqCst);
    }

    fn stop_captures(&self) {
        let mut resources = self.resources.lock();
        // Unread pipes would keep a blocked encoder from seeing the quit request.
        resources.audio_stdout = None;
        resources.video_stdout = None;

        let captures = [
            resources.audio_capture.take(),
            resources.video_capture.take(),
        ];
        for mut capture in captures.into_iter().flatten() {
            if let Err(e) = capture.stop() {
                debug!(track = capture.label(), "Capture stop failed: {}", e);
            }
        }
    }

    fn join_pumps(&self) {
        let mut pumps = std::mem::take(&mut self.resources.lock().pumps);
        for pump in &mut pumps {
            pump.join(PUMP_JOIN_TIMEOUT);
        }
    }

    fn close_hubs(&self) {
        self.hubs.video.stop();
        self.hubs.audio.stop();
    }

    /// The hubs frames are published into.
    pub fn hubs(&self) -> &StreamHubs {
        &self.hubs
    }

    /// Whether a capture process of `kind` is running.
    pub fn is_capturing(&self, kind: FrameKind) -> bool {
        let resources = self.resources.lock();
        let capture = match kind {
            FrameKind::Video => resources.video_capture.as_ref(),
            FrameKind::Audio => resources.audio_capture.as_ref(),
        };
        capture.is_some_and(CaptureSupervisor::is_running)
    }

    /// Get a reference to the resources.
    pub fn resources(&self) -> &Mutex<InitializedResources> {
        &self.resources
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.shutdown(|_| {});
    }
}
