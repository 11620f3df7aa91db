//! One viewer's subscription to a hub.

use std::sync::Arc;
use std::time::{Duration, Instant};

use screenrelay_capture::Frame;
use tracing::{debug, warn};

use crate::error::SinkError;
use crate::hub::{BroadcastHub, SessionTicket};
use crate::queue::QueueRecvError;

/// Destination of a session's frames (a socket, an HTTP response, ...).
pub trait FrameSink {
    /// Write one frame to the viewer.
    fn deliver(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// Whether the viewer is still reachable. Checked on every idle poll.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Why a consumption loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The hub was stopped.
    HubStopped,

    /// The session was unregistered while the hub kept running.
    Unregistered,

    /// The sink reported the viewer gone.
    Disconnected,

    /// Writing a frame to the sink failed.
    WriteFailed,
}

/// A registered viewer: identity, bounded queue and delivery progress.
///
/// Dropping the session releases its registration.
#[derive(Debug)]
pub struct ClientSession {
    hub: Arc<BroadcastHub>,
    ticket: SessionTicket,
    joined_at: Instant,
    last_delivered: Option<u64>,
}

impl ClientSession {
    pub(crate) fn new(hub: Arc<BroadcastHub>, ticket: SessionTicket) -> Self {
        Self {
            hub,
            ticket,
            joined_at: Instant::now(),
            last_delivered: None,
        }
    }

    pub fn identity(&self) -> &str {
        self.ticket.identity()
    }

    /// Handle for checking or releasing this registration elsewhere.
    pub fn ticket(&self) -> SessionTicket {
        self.ticket.clone()
    }

    pub fn joined_at(&self) -> Instant {
        self.joined_at
    }

    /// Sequence number of the last frame handed to a sink.
    pub fn last_delivered(&self) -> Option<u64> {
        self.last_delivered
    }

    /// Wait up to `timeout` for the next queued frame.
    pub fn next_frame(&self, timeout: Duration) -> Result<Frame, QueueRecvError> {
        self.ticket.queue().recv_timeout(timeout)
    }

    /// Take the next queued frame without waiting.
    pub fn try_next_frame(&self) -> Option<Frame> {
        self.ticket.queue().try_recv()
    }

    /// Forward frames to `sink` until the hub stops, the session is
    /// unregistered, or the viewer goes away. `poll` bounds how long a
    /// single wait lasts before liveness is re-checked.
    pub fn run<S: FrameSink + ?Sized>(mut self, sink: &mut S, poll: Duration) -> SessionEnd {
        let end = loop {
            match self.next_frame(poll) {
                Ok(frame) => {
                    if let Err(e) = sink.deliver(&frame) {
                        debug!(identity = %self.identity(), sequence = frame.sequence, "{}", e);
                        break SessionEnd::WriteFailed;
                    }
                    self.last_delivered = Some(frame.sequence);
                }
                Err(QueueRecvError::Timeout) => {
                    if !sink.is_connected() {
                        break SessionEnd::Disconnected;
                    }
                    if !self.hub.is_active(&self.ticket) {
                        break self.closed_reason();
                    }
                }
                Err(QueueRecvError::Closed) => break self.closed_reason(),
            }
        };

        if end == SessionEnd::WriteFailed {
            warn!(
                identity = %self.identity(),
                track = %self.hub.kind(),
                "Viewer write failed, dropping session"
            );
        } else {
            debug!(identity = %self.identity(), track = %self.hub.kind(), ?end, "Session ended");
        }
        end
    }

    fn closed_reason(&self) -> SessionEnd {
        if self.hub.is_running() {
            SessionEnd::Unregistered
        } else {
            SessionEnd::HubStopped
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.hub.release(&self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use screenrelay_capture::FrameKind;

    use super::*;
    use crate::test_support::frame;

    #[derive(Default)]
    struct VecSink {
        delivered: Vec<u64>,
        fail_after: Option<usize>,
        connected: Option<Arc<AtomicBool>>,
    }

    impl FrameSink for VecSink {
        fn deliver(&mut self, frame: &Frame) -> Result<(), SinkError> {
            if self.fail_after == Some(self.delivered.len()) {
                return Err(SinkError("broken pipe".into()));
            }
            self.delivered.push(frame.sequence);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
                .as_ref()
                .map_or(true, |flag| flag.load(Ordering::SeqCst))
        }
    }

    fn open_hub() -> Arc<BroadcastHub> {
        let hub = Arc::new(BroadcastHub::new(FrameKind::Video));
        hub.open(8);
        hub
    }

    #[test]
    fn test_run_delivers_until_hub_stops() {
        let hub = open_hub();
        let session = hub.register("a").unwrap();
        for seq in 1..=3 {
            hub.publish(frame(seq));
        }

        let consumer = thread::spawn(move || {
            let mut sink = VecSink::default();
            let end = session.run(&mut sink, Duration::from_millis(10));
            (end, sink.delivered)
        });
        thread::sleep(Duration::from_millis(50));
        hub.stop();

        let (end, delivered) = consumer.join().unwrap();
        assert_eq!(end, SessionEnd::HubStopped);
        assert_eq!(delivered, vec![1, 2, 3]);
    }

    #[test]
    fn test_write_failure_unregisters_only_that_session() {
        let hub = open_hub();
        let failing = hub.register("a").unwrap();
        let healthy = hub.register("b").unwrap();
        hub.publish(frame(1));
        hub.publish(frame(2));

        let mut sink = VecSink {
            fail_after: Some(1),
            ..Default::default()
        };
        let end = failing.run(&mut sink, Duration::from_millis(10));

        assert_eq!(end, SessionEnd::WriteFailed);
        assert_eq!(sink.delivered, vec![1]);
        assert!(!hub.contains("a"));
        assert!(hub.is_active(&healthy.ticket()));
    }

    #[test]
    fn test_disconnect_is_noticed_on_idle_poll() {
        let hub = open_hub();
        let session = hub.register("a").unwrap();
        let connected = Arc::new(AtomicBool::new(true));

        let consumer = {
            let connected = Arc::clone(&connected);
            thread::spawn(move || {
                let mut sink = VecSink {
                    connected: Some(connected),
                    ..Default::default()
                };
                session.run(&mut sink, Duration::from_millis(10))
            })
        };
        thread::sleep(Duration::from_millis(30));
        connected.store(false, Ordering::SeqCst);

        assert_eq!(consumer.join().unwrap(), SessionEnd::Disconnected);
        assert_eq!(hub.session_count(), 0);
    }

    #[test]
    fn test_unregister_ends_loop() {
        let hub = open_hub();
        let session = hub.register("a").unwrap();

        let consumer =
            thread::spawn(move || session.run(&mut VecSink::default(), Duration::from_millis(10)));
        thread::sleep(Duration::from_millis(30));
        hub.unregister("a");

        assert_eq!(consumer.join().unwrap(), SessionEnd::Unregistered);
    }

    #[test]
    fn test_last_delivered_tracks_progress() {
        let hub = open_hub();
        let session = hub.register("a").unwrap();
        hub.publish(frame(4));

        let frame = session.try_next_frame().unwrap();
        assert_eq!(frame.sequence, 4);
        assert_eq!(session.last_delivered(), None);
        assert!(session.joined_at() <= Instant::now());
    }
}
