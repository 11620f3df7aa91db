//! Bounded drop-oldest frame queue.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use screenrelay_capture::Frame;

/// Result of [`FrameQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued without eviction.
    Queued,

    /// Queued after evicting the oldest frame.
    Evicted,

    /// Not newer than the last frame pushed; dropped.
    Stale,

    /// The queue is closed.
    Closed,
}

/// Why [`FrameQueue::recv_timeout`] returned without a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRecvError {
    Timeout,
    Closed,
}

#[derive(Debug)]
struct QueueInner {
    frames: VecDeque<Frame>,
    last_sequence: Option<u64>,
    evicted: u64,
    closed: bool,
}

/// Ring buffer of at most `capacity` frames with a blocking receive.
///
/// Sequence numbers accepted by `push` are strictly increasing, so a
/// consumer never sees a frame twice or out of order.
#[derive(Debug)]
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity),
                last_sequence: None,
                evicted: 0,
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest one when full. Never blocks.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let mut inner = self.inner.lock();
        if inner.closed {
            return PushOutcome::Closed;
        }
        if inner.last_sequence.is_some_and(|last| frame.sequence <= last) {
            return PushOutcome::Stale;
        }

        let outcome = if inner.frames.len() >= self.capacity {
            inner.frames.pop_front();
            inner.evicted += 1;
            PushOutcome::Evicted
        } else {
            PushOutcome::Queued
        };

        inner.last_sequence = Some(frame.sequence);
        inner.frames.push_back(frame);
        drop(inner);

        self.available.notify_one();
        outcome
    }

    /// Wait up to `timeout` for the oldest queued frame.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Frame, QueueRecvError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(frame) = inner.frames.pop_front() {
                return Ok(frame);
            }
            if inner.closed {
                return Err(QueueRecvError::Closed);
            }
            if self.available.wait_until(&mut inner, deadline).timed_out() {
                return match inner.frames.pop_front() {
                    Some(frame) => Ok(frame),
                    None if inner.closed => Err(QueueRecvError::Closed),
                    None => Err(QueueRecvError::Timeout),
                };
            }
        }
    }

    /// Take the oldest frame without waiting.
    pub fn try_recv(&self) -> Option<Frame> {
        self.inner.lock().frames.pop_front()
    }

    /// Discard queued frames and wake every waiting consumer.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.frames.clear();
        }
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames evicted since creation.
    pub fn evicted(&self) -> u64 {
        self.inner.lock().evicted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::test_support::frame;

    fn drain(queue: &FrameQueue) -> Vec<u64> {
        std::iter::from_fn(|| queue.try_recv())
            .map(|f| f.sequence)
            .collect()
    }

    #[test]
    fn test_capacity_two_keeps_newest() {
        let queue = FrameQueue::new(2);

        assert_eq!(queue.push(frame(1)), PushOutcome::Queued);
        assert_eq!(queue.push(frame(2)), PushOutcome::Queued);
        assert_eq!(queue.push(frame(3)), PushOutcome::Evicted);

        assert_eq!(drain(&queue), vec![2, 3]);
        assert_eq!(queue.evicted(), 1);
    }

    #[test]
    fn test_overflow_keeps_newest_k_oldest_first() {
        let k = 5;
        let m = 12;
        let queue = FrameQueue::new(k);

        for seq in 0..(k + m) as u64 {
            queue.push(frame(seq));
        }

        let expected: Vec<u64> = (m as u64..(k + m) as u64).collect();
        assert_eq!(drain(&queue), expected);
        assert_eq!(queue.evicted(), m as u64);
    }

    #[test]
    fn test_stale_frames_are_dropped() {
        let queue = FrameQueue::new(4);

        queue.push(frame(7));
        assert_eq!(queue.push(frame(7)), PushOutcome::Stale);
        assert_eq!(queue.push(frame(3)), PushOutcome::Stale);
        assert_eq!(queue.push(frame(8)), PushOutcome::Queued);

        assert_eq!(drain(&queue), vec![7, 8]);
    }

    #[test]
    fn test_recv_timeout_and_close() {
        let queue = Arc::new(FrameQueue::new(4));

        assert_eq!(
            queue.recv_timeout(Duration::from_millis(10)).map(|f| f.sequence),
            Err(QueueRecvError::Timeout)
        );

        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.recv_timeout(Duration::from_secs(10)).map(|f| f.sequence))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert_eq!(waiter.join().unwrap(), Err(QueueRecvError::Closed));
        assert_eq!(queue.push(frame(1)), PushOutcome::Closed);
    }

    #[test]
    fn test_recv_wakes_on_push() {
        let queue = Arc::new(FrameQueue::new(4));

        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.recv_timeout(Duration::from_secs(10)).map(|f| f.sequence))
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(frame(42));

        assert_eq!(waiter.join().unwrap(), Ok(42));
    }
}
