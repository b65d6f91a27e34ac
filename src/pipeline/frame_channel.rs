//! Bounded blocking channel for decoded video frames
//!
//! The decode thread pushes, the render side pops. When the channel is full
//! the producer blocks (backpressure) instead of dropping frames. `stop()`
//! releases every blocked caller: pushers return their item, poppers drain
//! whatever is left and then get `None`.
//!
//! # Design
//!
//! A `Mutex<VecDeque>` guarded by two condition variables, one per direction:
//! - `not_empty`: signalled on push, waited on by `pop`
//! - `not_full`: signalled on pop/clear, waited on by `push`
//!
//! Both are broadcast on `stop()`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::decoder::DecodedVideoFrame;

/// Returned by [`FrameChannel::push`] when the channel was stopped; carries
/// the rejected item back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Stopped<T>(pub T);

struct Inner<T> {
    queue: VecDeque<T>,
    stopped: bool,
}

/// Bounded FIFO with blocking and non-blocking pop.
pub struct FrameChannel<T = DecodedVideoFrame> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> FrameChannel<T> {
    /// Create a channel holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                stopped: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `item`, blocking while the channel is full.
    ///
    /// Fails, handing the item back, if the channel is or becomes stopped.
    pub fn push(&self, item: T) -> Result<(), Stopped<T>> {
        let mut inner = self.lock();
        while !inner.stopped && inner.queue.len() >= self.capacity {
            inner = self
                .not_full
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if inner.stopped {
            return Err(Stopped(item));
        }

        inner.queue.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the oldest item, blocking until one arrives.
    ///
    /// Returns `None` only once the channel is stopped and drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.queue.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.stopped {
                return None;
            }
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Dequeue the oldest item if there is one.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.lock().queue.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Reject further pushes and wake every waiter.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Discard everything queued.
    pub fn clear(&self) {
        self.lock().queue.clear();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> std::fmt::Debug for FrameChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("FrameChannel")
            .field("len", &inner.queue.len())
            .field("capacity", &self.capacity)
            .field("stopped", &inner.stopped)
            .finish()
    }
}
