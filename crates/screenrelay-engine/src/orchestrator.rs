//! Main engine orchestrator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use screenrelay_capture::SupervisorEvent;
use screenrelay_ipc::{
    EngineCommand, EngineEvent, ShutdownPhase, StopReason, StreamConfig,
    StreamMetrics, StreamState,
};

use crate::metrics::MetricsCollector;
use crate::state::{ResourceManager, StreamHubs};

/// How long the command loop waits before housekeeping.
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between metrics events while live.
const METRICS_INTERVAL: Duration = Duration::from_secs(1);

/// The relay engine.
///
/// Runs a blocking command loop; capture exits are picked up between
/// commands and turn the stream into a recoverable error state. The engine
/// never restarts a failed stream by itself.
pub struct Engine {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    failure_rx: Receiver<SupervisorEvent>,
    state: Arc<RwLock<StreamState>>,
    hubs: StreamHubs,
    resource_manager: ResourceManager,
    metrics: Arc<MetricsCollector>,
    last_config: Option<StreamConfig>,
    last_metrics_report: Instant,
}

impl Engine {
    /// Create a new engine.
    pub fn new(command_rx: Receiver<EngineCommand>, event_tx: Sender<EngineEvent>) -> Self {
        let (failure_tx, failure_rx) = crossbeam_channel::unbounded();
        let hubs = StreamHubs::new();

        Self {
            command_rx,
            event_tx,
            failure_rx,
            state: Arc::new(RwLock::new(StreamState::Idle)),
            resource_manager: ResourceManager::new(hubs.clone(), failure_tx),
            hubs,
            metrics: Arc::new(MetricsCollector::default()),
            last_config: None,
            last_metrics_report: Instant::now(),
        }
    }

    /// Hubs that viewers register with.
    pub fn hubs(&self) -> StreamHubs {
        self.hubs.clone()
    }

    /// Shared view of the current state.
    pub fn state_handle(&self) -> Arc<RwLock<StreamState>> {
        Arc::clone(&self.state)
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(EngineEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(COMMAND_POLL_INTERVAL) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.stop_stream(StopReason::UserRequested);
                    break;
                }
            }

            self.check_failures();

            let report_due = self.last_metrics_report.elapsed() >= METRICS_INTERVAL;
            if report_due && self.state.read().is_live() {
                self.emit_metrics();
            }
        }

        info!("Engine stopped");
    }

    /// Handle a command. Returns false if engine should stop.
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::Start { config } => self.start_stream(config),
            EngineCommand::Stop => self.stop_stream(StopReason::UserRequested),
            EngineCommand::Restart => self.restart_stream(),
            EngineCommand::GetState => self.send_state(),
            EngineCommand::Shutdown => {
                self.stop_stream(StopReason::UserRequested);
                self.send_event(EngineEvent::Shutdown);
                return false;
            }
        }

        true
    }

    /// Start streaming.
    #[instrument(name = "start_stream", skip(self, config))]
    fn start_stream(&mut self, config: StreamConfig) {
        // Idempotent: ignore if already starting or live
        {
            let state = self.state.read();
            if state.is_starting() || state.is_live() {
                debug!("Already starting or live, ignoring start command");
                return;
            }
        }

        if let Err(e) = config.validate() {
            error!("Invalid stream configuration: {}", e);
            self.transition_to(StreamState::Error {
                message: e.to_string(),
                recoverable: false,
            });
            return;
        }

        info!(
            size = %config.video_size(),
            framerate = config.framerate,
            mode = ?config.mode,
            source = ?config.source,
            "Starting stream"
        );
        self.last_config = Some(config.clone());
        self.discard_stale_failures();

        self.metrics = Arc::new(MetricsCollector::new(config.framerate as f32));
        let result = self.resource_manager.initialize(&config, &self.metrics, |phase| {
            self.transition_to(StreamState::Starting { phase })
        });

        match result {
            Ok(()) => {
                self.metrics.start();
                self.last_metrics_report = Instant::now();

                self.transition_to(StreamState::Live {
                    config,
                    metrics: StreamMetrics::default(),
                });

                info!("Stream started successfully");
            }
            Err(e) => {
                error!("Stream start failed: {}", e);

                self.resource_manager.rollback();
                self.discard_stale_failures();

                self.transition_to(StreamState::Error {
                    message: e,
                    recoverable: true,
                });
            }
        }
    }

    /// Stop streaming.
    #[instrument(name = "stop_stream", skip(self))]
    fn stop_stream(&mut self, reason: StopReason) {
        {
            let state = self.state.read();
            if state.is_idle() || state.is_stopping() {
                debug!("Already idle or stopping, ignoring stop command");
                return;
            }
        }

        if self.state.read().is_error() {
            // Resources were released when the error was entered.
            self.transition_to(StreamState::Idle);
            return;
        }

        info!(?reason, "Stopping stream");
        self.teardown(&reason);
        self.transition_to(StreamState::Idle);
        info!("Stream stopped");
    }

    /// Start again with the last configuration; no-op while live.
    fn restart_stream(&mut self) {
        {
            let state = self.state.read();
            if state.is_starting() || state.is_live() {
                debug!("Already starting or live, ignoring restart command");
                return;
            }
        }

        let Some(config) = self.last_config.clone() else {
            warn!("Restart requested before any stream was started");
            return;
        };

        info!("Restarting stream");
        self.stop_stream(StopReason::Restart);
        self.start_stream(config);
    }

    fn teardown(&self, reason: &StopReason) {
        self.metrics.stop();
        self.resource_manager.shutdown(|phase: ShutdownPhase| {
            self.transition_to(StreamState::Stopping {
                reason: reason.clone(),
                phase,
            })
        });
    }

    /// Turn capture exits into a failed stream.
    fn check_failures(&mut self) {
        while let Ok(event) = self.failure_rx.try_recv() {
            let SupervisorEvent::Exited {
                label,
                program,
                status,
            } = event;

            let active = {
                let state = self.state.read();
                state.is_live() || state.is_starting()
            };
            if !active {
                debug!(track = %label, "Ignoring exit of inactive capture");
                continue;
            }

            let message = format!("{label} capture ({program}) exited unexpectedly: {status}");
            self.fail_stream(label, message);
        }
    }

    fn fail_stream(&mut self, track: String, message: String) {
        error!(%track, "{}", message);
        self.send_event(EngineEvent::StreamFailed {
            track,
            message: message.clone(),
        });

        self.teardown(&StopReason::CaptureFailed {
            message: message.clone(),
        });
        self.discard_stale_failures();

        self.transition_to(StreamState::Error {
            message,
            recoverable: true,
        });
    }

    fn discard_stale_failures(&self) {
        while let Ok(event) = self.failure_rx.try_recv() {
            debug!(?event, "Discarding capture event from a previous stream");
        }
    }

    fn send_state(&self) {
        let state = self.state.read().clone();
        self.send_event(EngineEvent::StateChanged {
            previous: Box::new(state.clone()),
            current: Box::new(state),
        });
    }

    fn emit_metrics(&mut self) {
        let snapshot = self.metrics.snapshot(&self.hubs);

        if let StreamState::Live { ref mut metrics, .. } = *self.state.write() {
            *metrics = snapshot.clone();
        }

        debug!(
            fps = snapshot.fps,
            video_sessions = snapshot.video.active_sessions,
            audio_sessions = snapshot.audio.active_sessions,
            "Stream metrics"
        );
        self.send_event(EngineEvent::Metrics(snapshot));

        self.metrics.mark_reported();
        self.last_metrics_report = Instant::now();
    }

    fn transition_to(&self, new_state: StreamState) {
        let previous = {
            let mut state = self.state.write();
            let prev = state.clone();
            *state = new_state.clone();
            prev
        };

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        if let StreamState::Starting { phase } = new_state {
            debug!(phase = phase.name(), "Startup phase");
        }

        self.send_event(EngineEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
    }

    fn send_event(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.metrics.stop();
        self.resource_manager.shutdown(|_| {});
    }
}
