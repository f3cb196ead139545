//! Bounded event channel between the capture loop and its consumers
//!
//! The queue never holds more than `capacity` events. When it is full the
//! oldest queued frame is discarded so the capture loop never waits on a slow
//! consumer. Only a queue with no frames left gives up a status event, oldest
//! `Error`/`Retrying` report first. Events sent while no receiver exists are
//! not queued. Each event is handed to exactly one receiver; cloned receivers
//! share one queue.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::types::{StatusEvent, StreamEvent};

struct Inner {
    queue: Mutex<VecDeque<StreamEvent>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    receivers: AtomicUsize,
    frames_dropped: AtomicU64,
    status_dropped: AtomicU64,
}

/// Retry chatter is the first status to go when the queue is all status
fn is_retry_report(event: &StreamEvent) -> bool {
    matches!(
        event,
        StreamEvent::Status(StatusEvent::Error { .. } | StatusEvent::Retrying { .. })
    )
}

/// Create a channel holding up to `capacity` events
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let inner = Arc::new(Inner {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity: capacity.max(1),
        notify: Notify::new(),
        closed: AtomicBool::new(false),
        receivers: AtomicUsize::new(1),
        frames_dropped: AtomicU64::new(0),
        status_dropped: AtomicU64::new(0),
    });
    (
        EventSender {
            inner: inner.clone(),
        },
        EventReceiver { inner },
    )
}

/// Producer half, owned by the controller
pub struct EventSender {
    inner: Arc<Inner>,
}

impl EventSender {
    /// Queue an event without blocking
    pub fn send(&self, event: StreamEvent) {
        if self.inner.receivers.load(Ordering::Acquire) == 0 {
            if !event.is_frame() {
                trace!("No receivers, not queueing {:?}", event);
            }
            return;
        }

        {
            let mut queue = self.inner.queue.lock();
            while queue.len() >= self.inner.capacity {
                self.evict_one(&mut queue);
            }
            queue.push_back(event);
        }
        self.inner.notify.notify_waiters();
    }

    fn evict_one(&self, queue: &mut VecDeque<StreamEvent>) {
        if let Some(pos) = queue.iter().position(StreamEvent::is_frame) {
            queue.remove(pos);
            let total = self.inner.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            trace!("Event queue full, dropped oldest frame (total: {})", total);
            return;
        }

        let pos = queue.iter().position(is_retry_report).unwrap_or(0);
        if let Some(StreamEvent::Status(status)) = queue.remove(pos) {
            let total = self.inner.status_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Event queue full of status, dropped {:?} (total: {})", status, total);
        }
    }

    /// Frames discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.inner.frames_dropped.load(Ordering::Relaxed)
    }

    /// Status events discarded because the queue held nothing else
    pub fn status_dropped(&self) -> u64 {
        self.inner.status_dropped.load(Ordering::Relaxed)
    }

    /// Create a new receiver sharing the queue
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.receivers.fetch_add(1, Ordering::AcqRel);
        EventReceiver {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for EventSender {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }
}

/// Consumer half
pub struct EventReceiver {
    inner: Arc<Inner>,
}

impl Clone for EventReceiver {
    fn clone(&self) -> Self {
        self.inner.receivers.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        if self.inner.receivers.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Nobody can read what is left
            self.inner.queue.lock().clear();
        }
    }
}

impl EventReceiver {
    /// Wait for the next event
    ///
    /// Returns `None` once the controller is gone and the queue is drained.
    pub async fn recv(&self) -> Option<StreamEvent> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return self.try_recv();
            }

            notified.await;
        }
    }

    /// Take the next event if one is queued
    pub fn try_recv(&self) -> Option<StreamEvent> {
        self.inner.queue.lock().pop_front()
    }

    /// Take every queued event
    pub fn drain(&self) -> Vec<StreamEvent> {
        self.inner.queue.lock().drain(..).collect()
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the producer has gone away
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}
