//! # Capture Source
//!
//! Owns the loopback input stream and the realtime callback that feeds the
//! hand-off queue.
//!
//! ## Realtime Rules:
//! The callback runs on the audio backend's thread. It copies samples into
//! pre-allocated buffers from a lock-free pool, pushes full buffers into the
//! queue and hands evicted buffers back to the pool. It never allocates,
//! locks, logs or panics; problems only bump counters in
//! [`CaptureDiagnostics`], which the async side reads and logs.
//!
//! ## Framing:
//! Backends deliver blocks of whatever period the device settled on. The
//! callback re-frames them into exact [`BUFFER_LEN`] buffers so every frame
//! downstream is one 20ms Opus frame.

use super::device::{
    select_loopback, select_named, AudioHost, DeviceSelector, InputStream, StreamParams,
    StreamStatus,
};
use super::handoff::{self, HandoffCloser, HandoffReceiver, HandoffSender, OverflowPolicy};
use super::{AudioBuffer, BUFFER_LEN};
use crate::error::CaptureError;
use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Free list of sample buffers shared by the callback and the producer.
pub struct BufferPool {
    free: ArrayQueue<AudioBuffer>,
}

impl BufferPool {
    /// Creates a pool pre-filled with `size` silent buffers.
    pub fn new(size: usize) -> Self {
        let free = ArrayQueue::new(size.max(1));
        for _ in 0..free.capacity() {
            let _ = free.push(AudioBuffer::silent());
        }
        Self { free }
    }

    pub fn take(&self) -> Option<AudioBuffer> {
        self.free.pop()
    }

    /// Returns a buffer to the pool. Surplus buffers are dropped.
    pub fn recycle(&self, buffer: AudioBuffer) {
        let _ = self.free.push(buffer);
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

/// Counters written by the realtime callback.
#[derive(Debug, Default)]
pub struct CaptureDiagnostics {
    captured: AtomicU64,
    evicted: AtomicU64,
    input_overflows: AtomicU64,
    device_errors: AtomicU64,
    pool_misses: AtomicU64,
}

/// Point-in-time copy of [`CaptureDiagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    /// Full buffers handed to the queue
    pub captured_buffers: u64,
    /// Buffers evicted by the drop-oldest policy
    pub evicted_buffers: u64,
    /// Input overflow flags raised by the device
    pub input_overflows: u64,
    /// Stream errors reported by the backend
    pub device_errors: u64,
    /// Blocks discarded because no free buffer was available
    pub pool_misses: u64,
}

impl CaptureDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            captured_buffers: self.captured.load(Ordering::Relaxed),
            evicted_buffers: self.evicted.load(Ordering::Relaxed),
            input_overflows: self.input_overflows.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            pool_misses: self.pool_misses.load(Ordering::Relaxed),
        }
    }

    fn record_status(&self, status: StreamStatus) {
        let counter = match status {
            StreamStatus::InputOverflow => &self.input_overflows,
            StreamStatus::DeviceError => &self.device_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Consumer side of a running capture, handed to the frame producer.
pub struct CaptureFeed {
    pub buffers: HandoffReceiver<AudioBuffer>,
    pub pool: Arc<BufferPool>,
    pub diagnostics: Arc<CaptureDiagnostics>,
}

/// State captured by the realtime callback closure.
struct Framer {
    sender: HandoffSender<AudioBuffer>,
    pool: Arc<BufferPool>,
    diagnostics: Arc<CaptureDiagnostics>,
    current: Option<AudioBuffer>,
    filled: usize,
}

impl Framer {
    fn write(&mut self, mut data: &[i16]) {
        while !data.is_empty() {
            if self.current.is_none() {
                self.current = self.pool.take();
                self.filled = 0;
            }
            let Some(buffer) = self.current.as_mut() else {
                // Rest of this block is lost until the producer returns a buffer
                self.diagnostics.pool_misses.fetch_add(1, Ordering::Relaxed);
                return;
            };

            let n = (BUFFER_LEN - self.filled).min(data.len());
            buffer.samples_mut()[self.filled..self.filled + n].copy_from_slice(&data[..n]);
            self.filled += n;
            data = &data[n..];

            if self.filled == BUFFER_LEN {
                if let Some(full) = self.current.take() {
                    self.diagnostics.captured.fetch_add(1, Ordering::Relaxed);
                    if let Some(evicted) = self.sender.push(full) {
                        self.diagnostics.evicted.fetch_add(1, Ordering::Relaxed);
                        self.pool.recycle(evicted);
                    }
                }
                self.filled = 0;
            }
        }
    }
}

/// Captures a loopback device into a bounded drop-oldest queue.
///
/// ## Lifecycle:
/// - `new` only records the configuration; no device is touched
/// - `start` selects a device, opens the stream and returns the consumer side
/// - `stop` stops the stream and closes the queue; calling it again is a no-op
pub struct CaptureSource {
    host: Arc<dyn AudioHost>,
    selector: DeviceSelector,
    queue_capacity: usize,
    stream: Option<Box<dyn InputStream>>,
    closer: Option<HandoffCloser<AudioBuffer>>,
    diagnostics: Arc<CaptureDiagnostics>,
}

impl CaptureSource {
    pub fn new(host: Arc<dyn AudioHost>, selector: DeviceSelector, queue_capacity: usize) -> Self {
        Self {
            host,
            selector,
            queue_capacity,
            stream: None,
            closer: None,
            diagnostics: Arc::new(CaptureDiagnostics::default()),
        }
    }

    /// Selects a device and starts capturing.
    ///
    /// ## Returns:
    /// - **Ok(feed)**: The consumer side of the hand-off queue
    /// - **Err(AlreadyRunning)**: `start` was already called without `stop`
    /// - **Err(..)**: Device enumeration, selection or stream setup failed
    pub fn start(&mut self) -> Result<CaptureFeed, CaptureError> {
        if self.stream.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        let devices = self.host.devices()?;
        if !devices.iter().any(|d| d.is_input()) {
            return Err(CaptureError::NoDevices);
        }

        let device = match &self.selector {
            DeviceSelector::Named(name) => Some(
                select_named(&devices, name)
                    .ok_or_else(|| CaptureError::DeviceNotFound(name.clone()))?,
            ),
            DeviceSelector::Auto => {
                let found = select_loopback(&devices);
                if found.is_none() {
                    warn!("No loopback device found, falling back to the default input");
                }
                found
            }
        };

        let (sender, buffers) = handoff::channel(self.queue_capacity, OverflowPolicy::DropOldest);
        let closer = sender.closer();

        // One buffer being filled, one being read, the rest queued
        let pool = Arc::new(BufferPool::new(self.queue_capacity + 2));

        let mut framer = Framer {
            sender,
            pool: pool.clone(),
            diagnostics: self.diagnostics.clone(),
            current: None,
            filled: 0,
        };
        let status_diagnostics = self.diagnostics.clone();

        let stream = self.host.open_input(
            device,
            StreamParams::default(),
            Box::new(move |data| framer.write(data)),
            Box::new(move |status| status_diagnostics.record_status(status)),
        )?;

        info!(
            device = stream.device_name(),
            queue_capacity = self.queue_capacity,
            "Audio capture started"
        );

        self.stream = Some(stream);
        self.closer = Some(closer);

        Ok(CaptureFeed {
            buffers,
            pool,
            diagnostics: self.diagnostics.clone(),
        })
    }

    /// Stops capturing and closes the queue. Safe to call at any time.
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!(device = stream.device_name(), "Audio capture stopped");
        }
        if let Some(closer) = self.closer.take() {
            closer.close();
        }
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.stream.as_ref().map(|s| s.device_name())
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::QUEUE_CAPACITY;
    use crate::testing::FakeHost;

    fn source(host: &Arc<FakeHost>, selector: DeviceSelector) -> CaptureSource {
        CaptureSource::new(host.clone(), selector, QUEUE_CAPACITY)
    }

    #[test]
    fn test_start_selects_loopback_device() {
        let host = Arc::new(FakeHost::new(&["Microphone", "Monitor of Built-in Audio"]));
        let mut capture = source(&host, DeviceSelector::Auto);

        let _feed = capture.start().expect("capture should start");
        assert_eq!(host.opened_device(), Some(Some(1)));
        assert_eq!(capture.device_name(), Some("Monitor of Built-in Audio"));
    }

    #[test]
    fn test_falls_back_to_default_input() {
        let host = Arc::new(FakeHost::new(&["Microphone", "Headset"]));
        let mut capture = source(&host, DeviceSelector::Auto);

        capture.start().expect("capture should start");
        assert_eq!(host.opened_device(), Some(None));
    }

    #[test]
    fn test_named_device_must_exist() {
        let host = Arc::new(FakeHost::new(&["Microphone"]));
        let mut capture = source(&host, DeviceSelector::Named("BlackHole".into()));

        let err = capture.start().err();
        assert!(matches!(err, Some(CaptureError::DeviceNotFound(name)) if name == "BlackHole"));
        assert!(!capture.is_running());
    }

    #[test]
    fn test_no_input_devices() {
        let host = Arc::new(FakeHost::new(&[]));
        let mut capture = source(&host, DeviceSelector::Auto);
        assert!(matches!(capture.start(), Err(CaptureError::NoDevices)));
    }

    #[test]
    fn test_second_start_is_rejected() {
        let host = Arc::new(FakeHost::new(&["pulse"]));
        let mut capture = source(&host, DeviceSelector::Auto);

        let _feed = capture.start().expect("capture should start");
        assert!(matches!(capture.start(), Err(CaptureError::AlreadyRunning)));
    }

    #[test]
    fn test_odd_periods_are_reframed() {
        let host = Arc::new(FakeHost::new(&["pulse"]));
        let mut capture = source(&host, DeviceSelector::Auto);
        let mut feed = capture.start().expect("capture should start");

        // 3 x 1000 samples = one full buffer plus 1080 pending
        for value in 1..=3 {
            host.emit(&vec![value as i16; 1000]);
        }

        let buffer = feed.buffers.try_pop().expect("one full buffer");
        assert_eq!(buffer.samples().len(), BUFFER_LEN);
        assert_eq!(&buffer.samples()[..1000], &[1i16; 1000][..]);
        assert_eq!(&buffer.samples()[1000..1920], &[2i16; 920][..]);
        assert!(feed.buffers.try_pop().is_none());
    }

    #[test]
    fn test_full_queue_evicts_oldest_and_recycles() {
        let host = Arc::new(FakeHost::new(&["pulse"]));
        let mut capture = source(&host, DeviceSelector::Auto);
        let mut feed = capture.start().expect("capture should start");

        for value in 1..=21 {
            host.emit(&vec![value as i16; BUFFER_LEN]);
        }

        assert_eq!(feed.buffers.len(), QUEUE_CAPACITY);
        let first = feed.buffers.try_pop().expect("queued buffer");
        assert_eq!(first.samples()[0], 2);

        let mut last = None;
        while let Some(buffer) = feed.buffers.try_pop() {
            last = Some(buffer.samples()[0]);
        }
        assert_eq!(last, Some(21));

        let diagnostics = capture.diagnostics();
        assert_eq!(diagnostics.captured_buffers, 21);
        assert_eq!(diagnostics.evicted_buffers, 1);
        assert_eq!(diagnostics.pool_misses, 0);
    }

    #[test]
    fn test_status_flags_are_counted_not_fatal() {
        let host = Arc::new(FakeHost::new(&["pulse"]));
        let mut capture = source(&host, DeviceSelector::Auto);
        let mut feed = capture.start().expect("capture should start");

        host.emit_status(StreamStatus::InputOverflow);
        host.emit_status(StreamStatus::DeviceError);
        host.emit(&vec![5i16; BUFFER_LEN]);

        assert!(feed.buffers.try_pop().is_some());
        let diagnostics = capture.diagnostics();
        assert_eq!(diagnostics.input_overflows, 1);
        assert_eq!(diagnostics.device_errors, 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes_queue() {
        let host = Arc::new(FakeHost::new(&["pulse"]));
        let mut capture = source(&host, DeviceSelector::Auto);
        let mut feed = capture.start().expect("capture should start");

        capture.stop();
        capture.stop();

        assert_eq!(host.stop_count(), 1);
        assert!(!capture.is_running());
        assert_eq!(feed.buffers.pop().await, None);
    }

    #[test]
    fn test_stop_without_start() {
        let host = Arc::new(FakeHost::new(&["pulse"]));
        let mut capture = source(&host, DeviceSelector::Auto);
        capture.stop();
        assert_eq!(host.stop_count(), 0);
    }

    #[test]
    fn test_pool_refills_from_consumer() {
        let pool = BufferPool::new(2);
        let a = pool.take().expect("buffer");
        let _b = pool.take().expect("buffer");
        assert!(pool.take().is_none());

        pool.recycle(a);
        assert_eq!(pool.available(), 1);
    }
}
