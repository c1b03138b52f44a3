//! Event buffer shared between producers and a tracer's write loop
//!
//! # Design
//!
//! Producers append to a `Vec` under a short-held mutex and then poke a
//! single-slot wake channel with `try_send`. If a wake is already pending the
//! send is a no-op: the event is stored, only the notification is coalesced.
//!
//! The write loop never encodes from the shared `Vec`. It swaps the live
//! buffer with its own scratch buffer under the lock and works on the
//! swapped-out events after releasing it, so I/O never happens while a
//! producer could be waiting.
//!
//! ```text
//! trace() ──push──> [events] <──swap── write loop ──encode──> stream
//!    └──try_send──> [wake: cap 1] ──recv──┘
//! ```
//!
//! Closing drops the wake sender. The receiver then yields any pending wake
//! followed by `Signal::Closed`, and events traced after close are rejected.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// What the write loop observed when it woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// New events may be waiting
    Wake,
    /// The tracer was closed; drain once more and terminate
    Closed,
}

impl Signal {
    #[inline]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Receiving half of the wake channel, owned by the write loop
#[derive(Debug)]
pub struct Wakeup {
    rx: mpsc::Receiver<()>,
}

impl Wakeup {
    /// Wait for the next wake or the closed indication
    pub async fn wait(&mut self) -> Signal {
        match self.rx.recv().await {
            Some(()) => Signal::Wake,
            None => Signal::Closed,
        }
    }
}

/// Mutex-guarded event buffer with a coalescing wake signal
#[derive(Debug)]
pub struct TraceBuffer<E> {
    inner: Mutex<Inner<E>>,
}

#[derive(Debug)]
struct Inner<E> {
    events: Vec<E>,
    /// `None` once closed
    wake: Option<mpsc::Sender<()>>,
}

impl<E> TraceBuffer<E> {
    /// Create an empty buffer and the wake receiver for its write loop
    pub fn new() -> (Self, Wakeup) {
        let (tx, rx) = mpsc::channel(1);
        let buffer = Self {
            inner: Mutex::new(Inner {
                events: Vec::new(),
                wake: Some(tx),
            }),
        };
        (buffer, Wakeup { rx })
    }

    /// Append an event and wake the write loop
    ///
    /// Never blocks. Returns false (and drops the event) if the buffer has
    /// been closed.
    pub fn push(&self, event: E) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(wake) = inner.wake.as_ref() else {
            return false;
        };
        inner.events.push(event);
        // Full means a wake is already pending.
        let _ = wake.try_send(());
        true
    }

    /// Stop accepting events and signal the write loop to finish
    ///
    /// Returns false if the buffer was already closed.
    pub fn close(&self) -> bool {
        self.inner.lock().wake.take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().wake.is_none()
    }

    /// Exchange the live buffer with `scratch`
    ///
    /// `scratch` is cleared first so its allocation is reused and the events
    /// of the previous round are released outside the lock. On return
    /// `scratch` holds every event pushed since the last swap, in push order.
    pub fn swap(&self, scratch: &mut Vec<E>) {
        scratch.clear();
        let mut inner = self.inner.lock();
        std::mem::swap(&mut inner.events, scratch);
    }

    /// Number of events waiting for the next swap
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod buffer_test;
