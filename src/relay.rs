//! # Relay Fanout
//!
//! Shares one stream of frames between any number of subscribers without
//! touching the capture path more than once.
//!
//! ## How it works:
//! - Every subscriber owns a private bounded drop-oldest queue
//! - `publish` pushes a cheap clone of the frame (an `Arc` bump) into each queue
//! - A subscriber that stops reading only loses its own oldest frames
//! - Unsubscribing removes one hash-map entry and touches nobody else
//!
//! ## Delivery guarantee:
//! Every subscriber receives every frame exactly once, in order, as long as
//! it stays within its queue capacity (`audio.subscriber_queue_capacity`,
//! 50 frames or one second by default). A subscriber that falls further
//! behind loses its oldest frames instead of growing without bound; the
//! loss is counted in [`Subscription::dropped`].

use crate::audio::handoff::{self, HandoffReceiver, HandoffSender, OverflowPolicy};
use crate::audio::producer::FrameProducer;
use crate::audio::Frame;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct FanoutInner {
    slots: Mutex<HashMap<u64, HandoffSender<Frame>>>,
    next_id: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
    published: AtomicU64,
}

/// One producer, many subscribers.
#[derive(Clone)]
pub struct RelayFanout {
    inner: Arc<FanoutInner>,
}

impl RelayFanout {
    /// Creates a fanout whose subscriber queues hold `capacity` frames each.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(FanoutInner {
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity,
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a new subscriber.
    ///
    /// The subscription only sees frames published after this returns.
    /// Subscribing to a closed fanout yields a subscription that ends at once.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, frames) = handoff::channel(self.inner.capacity, OverflowPolicy::DropOldest);

        {
            let mut slots = self.inner.slots.lock();
            if self.inner.closed.load(Ordering::Acquire) {
                sender.close();
            } else {
                slots.insert(id, sender);
            }
        }

        debug!(subscription_id = id, "Relay subscriber added");

        Subscription {
            frames,
            handle: SubscriptionHandle {
                id,
                fanout: Arc::downgrade(&self.inner),
                released: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// Delivers `frame` to every live subscriber. Returns how many received it.
    pub fn publish(&self, frame: &Frame) -> usize {
        let mut slots = self.inner.slots.lock();
        slots.retain(|_, sender| !sender.is_closed());
        for sender in slots.values() {
            sender.push(frame.clone());
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        slots.len()
    }

    /// Ends every subscription. Queued frames can still be drained.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.slots.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn frames_published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Runs the pump: pull from `producer`, publish, repeat.
    ///
    /// When the producer reports the stream closed the fanout is closed too,
    /// so every subscriber's `next()` resolves to `None`.
    pub fn spawn(&self, mut producer: FrameProducer) -> JoinHandle<()> {
        let fanout = self.clone();
        tokio::spawn(async move {
            info!("Relay pump started");
            while let Ok(frame) = producer.next().await {
                fanout.publish(&frame);
            }
            fanout.close();
            info!(
                frames = fanout.frames_published(),
                samples = producer.sample_count(),
                "Relay pump stopped"
            );
        })
    }
}

/// Consumer side of one fanout slot.
pub struct Subscription {
    frames: HandoffReceiver<Frame>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.handle.id
    }

    /// Next frame for this subscriber, or `None` once released or closed.
    pub async fn next(&mut self) -> Option<Frame> {
        self.frames.pop().await
    }

    /// A handle the owner keeps to release this slot later.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Frames this subscriber lost because it read too slowly.
    pub fn dropped(&self) -> u64 {
        self.frames.dropped()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.release();
    }
}

/// Owner-side handle that unregisters a subscription.
///
/// Holds the fanout weakly, so a handle never keeps the relay alive.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: u64,
    fanout: Weak<FanoutInner>,
    released: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the slot from the fanout.
    ///
    /// Dropping the slot's sender closes the queue, which wakes a pending
    /// `next()` with `None` once queued frames are drained. Returns `false`
    /// if the subscription was already released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(inner) = self.fanout.upgrade() {
            inner.slots.lock().remove(&self.id);
        }
        debug!(subscription_id = self.id, "Relay subscriber released");
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}
