//! # Audio Pipeline
//!
//! Everything between the loopback device and the relay lives here.
//!
//! ## Key Components:
//! - **device**: Device descriptions, loopback selection and the `AudioHost` seam
//! - **capture**: Realtime callback that frames raw PCM into fixed buffers
//! - **handoff**: Bounded drop-oldest queue from the capture thread into tokio
//! - **producer**: Stamps captured buffers with presentation timestamps
//!
//! ## Audio Format:
//! - **Sample Rate**: 48kHz (48,000 Hz)
//! - **Bit Depth**: 16-bit signed PCM
//! - **Channels**: Stereo, interleaved
//! - **Frame Size**: 960 samples per channel (20ms, the Opus frame size)

pub mod capture;
pub mod device;
pub mod handoff;
pub mod producer;

#[cfg(feature = "cpal-host")]
pub mod cpal_host;

use std::sync::Arc;
use std::time::Duration;

/// Capture sample rate in Hz.
pub const SAMPLE_RATE: u32 = 48_000;

/// Interleaved channel count.
pub const CHANNELS: u16 = 2;

/// Samples per channel in one buffer (20ms at 48kHz).
pub const FRAME_SAMPLES: usize = 960;

/// Interleaved samples in one buffer.
pub const BUFFER_LEN: usize = FRAME_SAMPLES * CHANNELS as usize;

/// Buffers held between the capture thread and the producer (~400ms).
pub const QUEUE_CAPACITY: usize = 20;

/// One captured block of interleaved PCM.
///
/// Always exactly [`BUFFER_LEN`] samples long. The capture thread fills it,
/// the hand-off queue moves it, and the producer copies it out into a
/// [`Frame`] before handing the allocation back to the buffer pool.
#[derive(Debug, PartialEq, Eq)]
pub struct AudioBuffer {
    samples: Box<[i16]>,
}

impl AudioBuffer {
    /// A zeroed buffer. Only called when pre-filling the pool.
    pub fn silent() -> Self {
        Self {
            samples: vec![0i16; BUFFER_LEN].into_boxed_slice(),
        }
    }

    /// A buffer where every sample carries `value`.
    pub fn filled(value: i16) -> Self {
        Self {
            samples: vec![value; BUFFER_LEN].into_boxed_slice(),
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub(crate) fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Samples per channel held by this buffer.
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS as usize
    }
}

/// A captured buffer stamped with its position in the stream.
///
/// The sample block is shared read-only between every relay subscriber,
/// so cloning a frame never copies audio.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Interleaved stereo samples
    pub samples: Arc<[i16]>,
    /// Presentation timestamp in samples since the stream started
    pub pts: u64,
}

impl Frame {
    /// Time base of [`Frame::pts`] as `(numerator, denominator)`.
    pub const TIME_BASE: (u32, u32) = (1, SAMPLE_RATE);

    /// Samples per channel carried by this frame.
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS as usize
    }

    /// Playback duration of this frame.
    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.frames() as u64 * 1_000_000 / SAMPLE_RATE as u64)
    }

    /// Presentation timestamp in seconds.
    pub fn pts_seconds(&self) -> f64 {
        self.pts as f64 / SAMPLE_RATE as f64
    }

    /// Root-mean-square level normalized to `[0.0, 1.0]`.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let v = s as f64 / 32768.0;
                v * v
            })
            .sum();
        (sum / self.samples.len() as f64).sqrt() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_is_one_opus_frame() {
        let buffer = AudioBuffer::silent();
        assert_eq!(buffer.samples().len(), 1920);
        assert_eq!(buffer.frames(), FRAME_SAMPLES);
    }

    #[test]
    fn test_frame_timing() {
        let frame = Frame {
            samples: Arc::from(AudioBuffer::filled(0).samples()),
            pts: 48_000,
        };
        assert_eq!(frame.duration(), Duration::from_millis(20));
        assert_eq!(frame.pts_seconds(), 1.0);
        assert_eq!(Frame::TIME_BASE, (1, 48_000));
    }

    #[test]
    fn test_rms_levels() {
        let silent = Frame {
            samples: Arc::from(AudioBuffer::silent().samples()),
            pts: 0,
        };
        assert_eq!(silent.rms(), 0.0);

        let loud = Frame {
            samples: Arc::from(AudioBuffer::filled(i16::MIN).samples()),
            pts: 0,
        };
        assert!((loud.rms() - 1.0).abs() < 1e-6);
    }
}
