//! Lifecycle of one external capture process.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::command::CaptureCommand;
use crate::error::CaptureError;
use crate::CaptureResult;

/// How often exit status is polled.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long `stop` waits for the watcher after the process is gone.
const WATCHER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default grace period between the quit request and a forced kill.
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Stderr keywords that mark a diagnostic line as an error.
const ERROR_KEYWORDS: [&str; 2] = ["Error", "Failed"];

/// State of the supervised capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    /// No process is running.
    Stopped,

    /// The process is running.
    Running { started_at: Instant, pid: u32 },

    /// A stop has been requested.
    Stopping,

    /// The process exited on its own while running.
    Failed { status: String },
}

/// Notifications sent upward by the watcher.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// The capture process exited while it was marked running.
    Exited {
        label: String,
        program: String,
        status: String,
    },
}

/// Owns one external capture process and its pipes.
///
/// The process is never restarted here: an unexpected exit marks the stream
/// failed and is reported through the event channel.
pub struct CaptureSupervisor {
    label: String,
    command: CaptureCommand,
    grace: Duration,
    quit_input: Option<Vec<u8>>,
    child: Arc<Mutex<Option<Child>>>,
    state: Arc<RwLock<CaptureState>>,
    alive: Arc<AtomicBool>,
    event_tx: Sender<SupervisorEvent>,
    watcher: Option<JoinHandle<()>>,
}

impl CaptureSupervisor {
    /// Create a supervisor for `command`; nothing is spawned yet.
    pub fn new(
        label: impl Into<String>,
        command: CaptureCommand,
        event_tx: Sender<SupervisorEvent>,
    ) -> Self {
        Self {
            label: label.into(),
            command,
            grace: DEFAULT_STOP_GRACE,
            quit_input: Some(b"q".to_vec()),
            child: Arc::new(Mutex::new(None)),
            state: Arc::new(RwLock::new(CaptureState::Stopped)),
            alive: Arc::new(AtomicBool::new(false)),
            event_tx,
            watcher: None,
        }
    }

    /// Grace period between the quit request and a forced kill.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Bytes written to the process's stdin to request a graceful exit
    /// (ffmpeg quits on `q`). Stdin is closed afterwards in any case.
    pub fn with_quit_input(mut self, quit_input: Option<Vec<u8>>) -> Self {
        self.quit_input = quit_input;
        self
    }

    /// Launch the process and hand back its stdout.
    #[instrument(name = "capture_start", skip(self), fields(label = %self.label))]
    pub fn start(&mut self) -> CaptureResult<ChildStdout> {
        if matches!(*self.state.read(), CaptureState::Running { .. }) {
            return Err(CaptureError::AlreadyStarted);
        }

        // A watcher left over from a failed run has already finished.
        self.join_watcher();

        info!(command = %self.command, "Launching capture process");

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CaptureError::Launch {
                program: self.command.program.clone(),
                source,
            })?;

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            (stdout, _) => {
                let _ = child.kill();
                let _ = child.wait();
                let missing = if stdout.is_none() { "stdout" } else { "stderr" };
                return Err(CaptureError::MissingPipe(
                    self.command.program.clone(),
                    missing,
                ));
            }
        };

        let pid = child.id();
        *self.child.lock() = Some(child);
        self.alive.store(true, Ordering::SeqCst);
        *self.state.write() = CaptureState::Running {
            started_at: Instant::now(),
            pid,
        };

        let watch = Watch {
            label: self.label.clone(),
            program: self.command.program.clone(),
            child: Arc::clone(&self.child),
            state: Arc::clone(&self.state),
            alive: Arc::clone(&self.alive),
            event_tx: self.event_tx.clone(),
        };
        self.watcher = Some(thread::spawn(move || watch.run(stderr)));

        info!(pid, "Capture process started");
        Ok(stdout)
    }

    /// Terminate the process: quit request, grace period, then kill.
    ///
    /// Idempotent; stopping a stopped supervisor is a no-op.
    #[instrument(name = "capture_stop", skip(self), fields(label = %self.label))]
    pub fn stop(&mut self) -> CaptureResult<()> {
        {
            let mut state = self.state.write();
            if *state == CaptureState::Stopped {
                drop(state);
                self.join_watcher();
                return Ok(());
            }
            *state = CaptureState::Stopping;
        }

        let child = self.child.lock().take();
        let result = match child {
            Some(mut child) => self.terminate(&mut child),
            None => Ok(()),
        };

        self.alive.store(false, Ordering::SeqCst);
        self.join_watcher();
        *self.state.write() = CaptureState::Stopped;

        info!("Capture process stopped");
        result
    }

    fn terminate(&self, child: &mut Child) -> CaptureResult<()> {
        if let Some(mut stdin) = child.stdin.take() {
            if let Some(ref quit) = self.quit_input {
                let _ = stdin.write_all(quit).and_then(|()| stdin.flush());
            }
        }

        let deadline = Instant::now() + self.grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(%status, "Capture process exited after quit request");
                    return Ok(());
                }
                Ok(None) => {}
                Err(source) => {
                    return Err(CaptureError::Terminate {
                        program: self.command.program.clone(),
                        source,
                    })
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        warn!(grace = ?self.grace, "Capture process ignored quit request, killing");
        child
            .kill()
            .and_then(|()| child.wait().map(|_| ()))
            .map_err(|source| CaptureError::Terminate {
                program: self.command.program.clone(),
                source,
            })
    }

    fn join_watcher(&mut self) {
        let Some(handle) = self.watcher.take() else {
            return;
        };

        let deadline = Instant::now() + WATCHER_JOIN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        if handle.is_finished() {
            let _ = handle.join();
        } else {
            // Stderr is still held open by a descendant of the process.
            warn!(label = %self.label, "Capture watcher still draining stderr, detaching");
        }
    }

    /// Current state.
    pub fn state(&self) -> CaptureState {
        self.state.read().clone()
    }

    /// Whether the process is marked running.
    pub fn is_running(&self) -> bool {
        matches!(*self.state.read(), CaptureState::Running { .. })
    }

    /// Flag cleared as soon as the process is known to have exited.
    pub fn liveness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    /// The command this supervisor launches.
    pub fn command(&self) -> &CaptureCommand {
        &self.command
    }

    /// Track label ("video" or "audio").
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for CaptureSupervisor {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Background watch over one running process.
struct Watch {
    label: String,
    program: String,
    child: Arc<Mutex<Option<Child>>>,
    state: Arc<RwLock<CaptureState>>,
    alive: Arc<AtomicBool>,
    event_tx: Sender<SupervisorEvent>,
}

impl Watch {
    fn run(self, stderr: ChildStderr) {
        self.drain(stderr);

        let status = loop {
            {
                let mut child = self.child.lock();
                let Some(child) = child.as_mut() else {
                    return;
                };
                match child.try_wait() {
                    Ok(Some(status)) => break status.to_string(),
                    Ok(None) => {}
                    Err(e) => break format!("wait failed: {e}"),
                }
            }
            if !matches!(*self.state.read(), CaptureState::Running { .. }) {
                return;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        };

        self.alive.store(false, Ordering::SeqCst);

        let was_running = {
            let mut state = self.state.write();
            if matches!(*state, CaptureState::Running { .. }) {
                *state = CaptureState::Failed {
                    status: status.clone(),
                };
                true
            } else {
                false
            }
        };

        if was_running {
            error!(label = %self.label, %status, "Capture process terminated unexpectedly");
            let event = SupervisorEvent::Exited {
                label: self.label.clone(),
                program: self.program.clone(),
                status,
            };
            if let Err(e) = self.event_tx.try_send(event) {
                warn!("Failed to report capture exit: {}", e);
            }
        } else {
            debug!(label = %self.label, %status, "Capture process exited during stop");
        }
    }

    /// Log every stderr line until the pipe closes.
    fn drain(&self, stderr: ChildStderr) {
        let reader = BufReader::new(stderr);
        for line in reader.split(b'\n') {
            let Ok(line) = line else {
                break;
            };
            let text = String::from_utf8_lossy(&line);
            // Progress lines are separated by carriage returns.
            for part in text.split('\r').map(str::trim).filter(|p| !p.is_empty()) {
                if is_error_line(part) {
                    error!(label = %self.label, "{}: {}", self.program, part);
                } else {
                    debug!(label = %self.label, "{}: {}", self.program, part);
                }
            }
        }
    }
}

fn is_error_line(line: &str) -> bool {
    ERROR_KEYWORDS.iter().any(|keyword| line.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_line_classification() {
        assert!(is_error_line("Error opening input"));
        assert!(is_error_line("x11grab: Failed to open display :99"));
        assert!(!is_error_line("frame=  120 fps= 30 q=5.0"));
        assert!(!is_error_line("error in lowercase is informational"));
    }

    #[cfg(unix)]
    mod process {
        use std::io::Read;

        use crossbeam_channel::Receiver;

        use super::super::*;

        fn sh(script: &str) -> (CaptureSupervisor, Receiver<SupervisorEvent>) {
            let (tx, rx) = crossbeam_channel::bounded(4);
            let command = CaptureCommand {
                program: "sh".into(),
                args: vec!["-c".into(), script.into()],
            };
            (CaptureSupervisor::new("video", command, tx), rx)
        }

        #[test]
        fn test_missing_binary_is_launch_error() {
            let (tx, _rx) = crossbeam_channel::bounded(1);
            let command = CaptureCommand {
                program: "/nonexistent/screenrelay-capture".into(),
                args: Vec::new(),
            };
            let mut supervisor = CaptureSupervisor::new("video", command, tx);

            match supervisor.start() {
                Err(CaptureError::Launch { program, .. }) => {
                    assert_eq!(program, "/nonexistent/screenrelay-capture")
                }
                other => panic!("expected launch error, got {:?}", other.map(|_| ())),
            }
            assert_eq!(supervisor.state(), CaptureState::Stopped);
        }

        #[test]
        fn test_unexpected_exit_is_reported() {
            let (mut supervisor, events) = sh("printf abc; echo 'Error: display gone' >&2");

            let mut stdout = supervisor.start().unwrap();
            let mut output = String::new();
            stdout.read_to_string(&mut output).unwrap();
            assert_eq!(output, "abc");

            let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
            let SupervisorEvent::Exited { label, program, .. } = event;
            assert_eq!(label, "video");
            assert_eq!(program, "sh");
            assert!(matches!(supervisor.state(), CaptureState::Failed { .. }));
            assert!(!supervisor.liveness().load(Ordering::SeqCst));

            supervisor.stop().unwrap();
            assert_eq!(supervisor.state(), CaptureState::Stopped);
        }

        #[test]
        fn test_stop_kills_after_grace_and_is_idempotent() {
            let (supervisor, events) = sh("trap '' TERM; exec sleep 30");
            let mut supervisor = supervisor
                .with_grace(Duration::from_millis(100))
                .with_quit_input(None);

            let _stdout = supervisor.start().unwrap();
            assert!(supervisor.is_running());

            let started = Instant::now();
            supervisor.stop().unwrap();
            assert!(started.elapsed() < Duration::from_secs(5));
            assert_eq!(supervisor.state(), CaptureState::Stopped);

            supervisor.stop().unwrap();
            assert!(events.try_recv().is_err());
        }

        #[test]
        fn test_graceful_stop_via_stdin() {
            let (mut supervisor, events) = sh("read quit; exit 0");

            let _stdout = supervisor.start().unwrap();
            let started = Instant::now();
            supervisor.stop().unwrap();

            assert!(started.elapsed() < Duration::from_secs(4));
            assert!(events.try_recv().is_err());
        }

        #[test]
        fn test_second_start_is_rejected() {
            let (supervisor, _events) = sh("exec sleep 30");
            let mut supervisor = supervisor.with_grace(Duration::from_millis(50));

            let _stdout = supervisor.start().unwrap();
            assert!(matches!(
                supervisor.start(),
                Err(CaptureError::AlreadyStarted)
            ));
            supervisor.stop().unwrap();
        }
    }
}
