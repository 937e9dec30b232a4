//! Frame queues between the network and the audio callback
//!
//! The audio callback only ever try-pushes and try-pops here; anything that
//! may wait lives on the network side.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fixed-capacity FIFO of compressed frames for one peer.
/// On overflow the oldest frame is discarded to keep latency bounded.
pub struct FrameQueue {
    queue: ArrayQueue<Bytes>,
    overflow_count: AtomicUsize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame, evicting the oldest if full
    pub fn push(&self, frame: Bytes) {
        if self.queue.force_push(frame).is_some() {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Pop the oldest frame without blocking
    pub fn try_pop(&self) -> Option<Bytes> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

/// Per-peer inbound queues keyed by speaker identity
///
/// The map is guarded by a mutex held only for lookup/insert/remove and the
/// non-blocking pops of one playback tick.
pub struct PeerQueues {
    queues: Mutex<HashMap<Arc<str>, FrameQueue>>,
    capacity: usize,
}

impl PeerQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Create an empty queue for `identity` if absent. Returns `true` if created.
    pub fn add(&self, identity: &str) -> bool {
        let mut queues = self.queues.lock();
        if queues.contains_key(identity) {
            return false;
        }
        queues.insert(Arc::from(identity), FrameQueue::new(self.capacity));
        true
    }

    /// Delete the queue for `identity` and any frames still buffered in it
    pub fn remove(&self, identity: &str) -> bool {
        self.queues.lock().remove(identity).is_some()
    }

    /// Append a frame, creating the queue on first sight of `identity`
    pub fn push(&self, identity: &str, frame: Bytes) {
        let mut queues = self.queues.lock();
        match queues.get(identity) {
            Some(queue) => queue.push(frame),
            None => {
                let queue = FrameQueue::new(self.capacity);
                queue.push(frame);
                queues.insert(Arc::from(identity), queue);
            }
        }
    }

    /// Pop at most one frame from every non-empty queue into `out`.
    /// Peers with nothing buffered are skipped for this tick.
    pub fn pop_each(&self, out: &mut Vec<(Arc<str>, Bytes)>) {
        out.clear();
        let queues = self.queues.lock();
        for (identity, queue) in queues.iter() {
            if let Some(frame) = queue.try_pop() {
                out.push((identity.clone(), frame));
            }
        }
    }

    /// Known identities
    pub fn identities(&self) -> Vec<String> {
        self.queues.lock().keys().map(|k| k.to_string()).collect()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.queues.lock().contains_key(identity)
    }

    /// Buffered frames for `identity`
    pub fn queued(&self, identity: &str) -> usize {
        self.queues.lock().get(identity).map_or(0, FrameQueue::len)
    }

    /// Total frames discarded on overflow across all peers
    pub fn overflow_count(&self) -> usize {
        self.queues
            .lock()
            .values()
            .map(FrameQueue::overflow_count)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.queues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.lock().is_empty()
    }
}

/// Producer side of the outbound compressed-frame queue
///
/// Capture pushes without blocking; when the queue is full the oldest frame
/// is dropped so the newest audio always goes out.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: Sender<Bytes>,
    // Kept to evict the oldest frame on overflow
    drain: Receiver<Bytes>,
    dropped: Arc<AtomicUsize>,
}

/// Consumer side, owned by the network send loop
pub struct OutboundReceiver {
    rx: Receiver<Bytes>,
}

/// Create a bounded outbound queue
pub fn outbound_queue(capacity: usize) -> (OutboundQueue, OutboundReceiver) {
    let (tx, rx) = bounded(capacity);
    (
        OutboundQueue {
            tx,
            drain: rx.clone(),
            dropped: Arc::new(AtomicUsize::new(0)),
        },
        OutboundReceiver { rx },
    )
}

impl OutboundQueue {
    /// Enqueue without blocking
    pub fn push(&self, frame: Bytes) {
        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.drain.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    frame = back;
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
    }

    /// Frames lost to overflow
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl OutboundReceiver {
    /// Block up to `timeout` for the next frame
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Bytes, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}
