//! # Frame Producer
//!
//! Turns captured buffers into timestamped [`Frame`]s.
//!
//! The presentation timestamp is the running count of samples per channel
//! since the stream started, in a 1/48000 time base. It only advances when a
//! buffer is actually dequeued: buffers lost to overflow leave no gap in the
//! timestamps, and nothing is synthesized when the device goes quiet.

use super::capture::{CaptureDiagnostics, CaptureFeed, DiagnosticsSnapshot};
use super::{AudioBuffer, Frame, SAMPLE_RATE};
use crate::audio::handoff::HandoffReceiver;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// The capture side has stopped and every queued buffer was consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("audio stream closed")]
pub struct StreamClosed;

pub struct FrameProducer {
    feed: CaptureFeed,
    sample_count: u64,
    reported: DiagnosticsSnapshot,
}

impl FrameProducer {
    pub fn new(feed: CaptureFeed) -> Self {
        Self {
            feed,
            sample_count: 0,
            reported: DiagnosticsSnapshot::default(),
        }
    }

    /// Waits for the next captured buffer and stamps it.
    pub async fn next(&mut self) -> Result<Frame, StreamClosed> {
        let buffer = self.feed.buffers.pop().await.ok_or(StreamClosed)?;
        Ok(self.stamp(buffer))
    }

    /// Samples per channel produced so far; also the next frame's timestamp.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn diagnostics(&self) -> &Arc<CaptureDiagnostics> {
        &self.feed.diagnostics
    }

    pub fn buffers(&self) -> &HandoffReceiver<AudioBuffer> {
        &self.feed.buffers
    }

    fn stamp(&mut self, buffer: AudioBuffer) -> Frame {
        let frame = Frame {
            samples: Arc::from(buffer.samples()),
            pts: self.sample_count,
        };
        let frames = buffer.frames() as u64;
        self.feed.pool.recycle(buffer);

        if self.sample_count % (SAMPLE_RATE as u64) < frames {
            self.report(&frame);
        }
        self.sample_count += frames;

        frame
    }

    /// Once per second of audio: level at debug, fresh device trouble at warn.
    fn report(&mut self, frame: &Frame) {
        debug!(
            pts = frame.pts,
            seconds = frame.pts_seconds(),
            rms = frame.rms(),
            queued = self.feed.buffers.len(),
            "Audio level"
        );

        let now = self.feed.diagnostics.snapshot();
        let before = self.reported;
        if now.input_overflows > before.input_overflows {
            warn!(
                count = now.input_overflows - before.input_overflows,
                "Audio device reported input overflow"
            );
        }
        if now.device_errors > before.device_errors {
            warn!(
                count = now.device_errors - before.device_errors,
                "Audio device reported stream errors"
            );
        }
        if now.evicted_buffers > before.evicted_buffers {
            warn!(
                count = now.evicted_buffers - before.evicted_buffers,
                "Consumer fell behind, dropped oldest audio buffers"
            );
        }
        if now.pool_misses > before.pool_misses {
            warn!(
                count = now.pool_misses - before.pool_misses,
                "Capture callback ran out of free buffers"
            );
        }
        self.reported = now;
    }
}
