//! Per-track broadcast hub.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use screenrelay_capture::{Frame, FrameKind};
use screenrelay_ipc::TrackMetrics;
use tracing::{debug, info, instrument, trace};

use crate::cache::LastFrameCache;
use crate::error::HubError;
use crate::queue::{FrameQueue, PushOutcome};
use crate::session::ClientSession;
use crate::{HubResult, DEFAULT_QUEUE_CAPACITY};

/// Handle naming one registration of an identity.
///
/// Two registrations of the same identity (one after the other) have
/// distinct tickets, so a stale holder cannot tear down its successor.
#[derive(Debug, Clone)]
pub struct SessionTicket {
    identity: String,
    queue: Arc<FrameQueue>,
}

impl SessionTicket {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub(crate) fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }
}

#[derive(Debug)]
struct HubInner {
    running: bool,
    capacity: usize,
    sessions: HashMap<String, Arc<FrameQueue>>,
    cache: LastFrameCache,
    frames_published: u64,
    bytes_published: u64,
    /// Evictions from queues that have since been removed.
    retired_evictions: u64,
}

/// Distributes the frames of one track to every registered session.
///
/// The session set and the last-frame cache live under a single mutex, so
/// `publish`, `register` and `unregister` may be called from any thread.
#[derive(Debug)]
pub struct BroadcastHub {
    kind: FrameKind,
    inner: Mutex<HubInner>,
}

impl BroadcastHub {
    /// Create a stopped hub.
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            inner: Mutex::new(HubInner {
                running: false,
                capacity: DEFAULT_QUEUE_CAPACITY,
                sessions: HashMap::new(),
                cache: LastFrameCache::new(),
                frames_published: 0,
                bytes_published: 0,
                retired_evictions: 0,
            }),
        }
    }

    /// Start accepting sessions; new queues hold up to `capacity` frames.
    /// Counters restart from zero.
    #[instrument(skip(self), fields(track = %self.kind))]
    pub fn open(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.running = true;
        inner.capacity = capacity.max(1);
        inner.frames_published = 0;
        inner.bytes_published = 0;
        inner.retired_evictions = 0;
        info!(capacity = inner.capacity, "Hub opened");
    }

    /// Stop the hub: close every queue so consumers unblock, then forget all
    /// sessions and the cached frame.
    #[instrument(skip(self), fields(track = %self.kind))]
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if !inner.running && inner.sessions.is_empty() {
            return;
        }

        inner.running = false;
        let sessions: Vec<_> = inner.sessions.drain().collect();
        for (identity, queue) in &sessions {
            queue.close();
            debug!(%identity, "Session closed by hub stop");
        }
        inner.retired_evictions += sessions.iter().map(|(_, q)| q.evicted()).sum::<u64>();
        inner.cache.clear();

        info!(closed = sessions.len(), "Hub stopped");
    }

    /// Hand a frame to every session and cache it. Never blocks on a
    /// consumer; full queues evict their oldest frame.
    pub fn publish(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        if !inner.running {
            trace!(sequence = frame.sequence, "Dropping frame for stopped hub");
            return;
        }

        inner.frames_published += 1;
        inner.bytes_published += frame.len() as u64;

        for (identity, queue) in &inner.sessions {
            if queue.push(frame.clone()) == PushOutcome::Evicted {
                trace!(%identity, sequence = frame.sequence, "Evicted oldest frame");
            }
        }
        inner.cache.replace(frame);
    }

    /// Admit `identity`, seeding its queue with the cached frame.
    ///
    /// Rejects a second concurrent registration of the same identity.
    pub fn register(self: &Arc<Self>, identity: impl Into<String>) -> HubResult<ClientSession> {
        let identity = identity.into();
        let mut inner = self.inner.lock();

        if !inner.running {
            return Err(HubError::NotRunning(self.kind));
        }
        if inner.sessions.contains_key(&identity) {
            debug!(%identity, track = %self.kind, "Rejecting duplicate session");
            return Err(HubError::DuplicateSession(identity));
        }

        let queue = Arc::new(FrameQueue::new(inner.capacity));
        if let Some(frame) = inner.cache.get() {
            queue.push(frame);
        }
        inner.sessions.insert(identity.clone(), Arc::clone(&queue));

        info!(%identity, track = %self.kind, sessions = inner.sessions.len(), "Session registered");

        let ticket = SessionTicket { identity, queue };
        Ok(ClientSession::new(Arc::clone(self), ticket))
    }

    /// Remove the session of `identity`, if any. Idempotent.
    pub fn unregister(&self, identity: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.remove(identity) {
            Some(queue) => {
                queue.close();
                inner.retired_evictions += queue.evicted();
                info!(%identity, track = %self.kind, "Session unregistered");
                true
            }
            None => false,
        }
    }

    /// Remove the session only if it is still the one `ticket` names.
    pub fn release(&self, ticket: &SessionTicket) -> bool {
        let mut inner = self.inner.lock();
        let current = inner
            .sessions
            .get(&ticket.identity)
            .is_some_and(|queue| Arc::ptr_eq(queue, &ticket.queue));
        if !current {
            return false;
        }

        inner.sessions.remove(&ticket.identity);
        ticket.queue.close();
        inner.retired_evictions += ticket.queue.evicted();
        info!(identity = %ticket.identity, track = %self.kind, "Session released");
        true
    }

    /// Whether `ticket` still names a registered session.
    pub fn is_active(&self, ticket: &SessionTicket) -> bool {
        self.inner
            .lock()
            .sessions
            .get(&ticket.identity)
            .is_some_and(|queue| Arc::ptr_eq(queue, &ticket.queue))
    }

    /// Whether `identity` has a registered session.
    pub fn contains(&self, identity: &str) -> bool {
        self.inner.lock().sessions.contains_key(identity)
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// The most recently published frame.
    pub fn last_frame(&self) -> Option<Frame> {
        self.inner.lock().cache.get()
    }

    /// Counters for this track.
    pub fn metrics(&self) -> TrackMetrics {
        let inner = self.inner.lock();
        let live_evictions: u64 = inner.sessions.values().map(|q| q.evicted()).sum();
        TrackMetrics {
            frames_published: inner.frames_published,
            bytes_published: inner.bytes_published,
            frames_evicted: inner.retired_evictions + live_evictions,
            active_sessions: inner.sessions.len(),
        }
    }
}
