//! # Hand-off Queue
//!
//! A bounded single-producer single-consumer queue that carries audio from
//! the device callback thread into the async runtime.
//!
//! The sending side never blocks and never allocates: `push` is a lock-free
//! `ArrayQueue` operation plus a waker notification. When the queue is full
//! the overflow policy decides which item is given back to the caller. The
//! receiving side is an ordinary async `pop()`.

use crossbeam::queue::ArrayQueue;
use futures_util::task::AtomicWaker;
use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::Poll;

/// What happens to an item pushed into a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to admit the new one
    DropOldest,
    /// Keep the queue as is and hand the new item back
    DropNewest,
}

struct Shared<T> {
    queue: ArrayQueue<T>,
    policy: OverflowPolicy,
    waker: AtomicWaker,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> Shared<T> {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.waker.wake();
        }
    }
}

/// Creates a bounded hand-off queue.
///
/// A capacity of zero is bumped to one; the queue always holds at least one item.
pub fn channel<T>(capacity: usize, policy: OverflowPolicy) -> (HandoffSender<T>, HandoffReceiver<T>) {
    let shared = Arc::new(Shared {
        queue: ArrayQueue::new(capacity.max(1)),
        policy,
        waker: AtomicWaker::new(),
        closed: AtomicBool::new(false),
        dropped: AtomicU64::new(0),
    });

    (
        HandoffSender {
            shared: shared.clone(),
        },
        HandoffReceiver { shared },
    )
}

/// Producer half. Safe to call from a realtime thread.
pub struct HandoffSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> HandoffSender<T> {
    /// Enqueues `item` without blocking.
    ///
    /// Returns the item that did not make it into the queue: the evicted
    /// oldest item under `DropOldest`, the rejected new item under
    /// `DropNewest`, or `item` itself once the queue is closed.
    pub fn push(&self, item: T) -> Option<T> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Some(item);
        }

        let overflow = match self.shared.policy {
            OverflowPolicy::DropOldest => self.shared.queue.force_push(item),
            OverflowPolicy::DropNewest => self.shared.queue.push(item).err(),
        };

        if overflow.is_some() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.waker.wake();
        overflow
    }

    /// Closes the queue. Items already queued can still be popped.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// A handle that can close the queue from outside the producer thread.
    pub fn closer(&self) -> HandoffCloser<T> {
        HandoffCloser {
            shared: self.shared.clone(),
        }
    }

    /// Items discarded by the overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Drop for HandoffSender<T> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Closes a queue without owning its sender.
pub struct HandoffCloser<T> {
    shared: Arc<Shared<T>>,
}

impl<T> HandoffCloser<T> {
    pub fn close(&self) {
        self.shared.close();
    }
}

/// Consumer half, driven from the async runtime.
pub struct HandoffReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> HandoffReceiver<T> {
    /// Waits for the next item in FIFO order.
    ///
    /// Resolves to `None` once the queue is closed and fully drained.
    pub async fn pop(&mut self) -> Option<T> {
        poll_fn(|cx| {
            if let Some(item) = self.shared.queue.pop() {
                return Poll::Ready(Some(item));
            }

            self.shared.waker.register(cx.waker());

            // Re-check after registering so a push racing with registration is not lost
            if let Some(item) = self.shared.queue.pop() {
                return Poll::Ready(Some(item));
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return Poll::Ready(self.shared.queue.pop());
            }
            Poll::Pending
        })
        .await
    }

    /// Non-blocking pop.
    pub fn try_pop(&mut self) -> Option<T> {
        self.shared.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Items discarded by the overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Closes the queue from the consumer side.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl<T> Drop for HandoffReceiver<T> {
    fn drop(&mut self) {
        self.shared.close();
    }
}
