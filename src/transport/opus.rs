//! Opus encoding for outbound audio, through libopus.

use super::TransportError;
use crate::audio::{Frame, CHANNELS, FRAME_SAMPLES, SAMPLE_RATE};

/// `OPUS_APPLICATION_AUDIO` from opus_defines.h: tuned for music and mixed content.
const OPUS_APPLICATION_AUDIO: i32 = 2049;

/// Largest packet libopus is asked to write (recommended in the libopus docs).
const MAX_PACKET: usize = 4000;

/// Encodes 20ms stereo frames into Opus packets.
pub struct OpusEncoder {
    encoder: *mut libopus_sys::OpusEncoder,
    packet: Box<[u8]>,
}

// SAFETY: the encoder state is only ever touched through `&mut self`, so it is
// used by one thread at a time; it is never shared, hence no `Sync`.
unsafe impl Send for OpusEncoder {}

impl OpusEncoder {
    pub fn new(bitrate: i32) -> Result<Self, TransportError> {
        let mut error: i32 = 0;
        let encoder = unsafe {
            libopus_sys::opus_encoder_create(
                SAMPLE_RATE as i32,
                CHANNELS as i32,
                OPUS_APPLICATION_AUDIO,
                &mut error,
            )
        };

        if encoder.is_null() || error != 0 {
            return Err(TransportError::Media(format!(
                "failed to create Opus encoder: error code {}",
                error
            )));
        }

        let result = unsafe {
            libopus_sys::opus_encoder_ctl(
                encoder,
                libopus_sys::OPUS_SET_BITRATE_REQUEST as i32,
                bitrate,
            )
        };
        if result != 0 {
            unsafe { libopus_sys::opus_encoder_destroy(encoder) };
            return Err(TransportError::Media(format!(
                "failed to set Opus bitrate {}: error code {}",
                bitrate, result
            )));
        }

        Ok(Self {
            encoder,
            packet: vec![0u8; MAX_PACKET].into_boxed_slice(),
        })
    }

    /// Encodes one frame and returns the packet bytes.
    pub fn encode(&mut self, frame: &Frame) -> Result<&[u8], TransportError> {
        if frame.frames() != FRAME_SAMPLES {
            return Err(TransportError::Media(format!(
                "expected {} samples per channel, got {}",
                FRAME_SAMPLES,
                frame.frames()
            )));
        }

        let len = unsafe {
            libopus_sys::opus_encode(
                self.encoder,
                frame.samples.as_ptr(),
                FRAME_SAMPLES as i32,
                self.packet.as_mut_ptr(),
                self.packet.len() as i32,
            )
        };

        if len < 0 {
            return Err(TransportError::Media(format!(
                "Opus encoding failed: error code {}",
                len
            )));
        }
        Ok(&self.packet[..len as usize])
    }
}

impl Drop for OpusEncoder {
    fn drop(&mut self) {
        unsafe { libopus_sys::opus_encoder_destroy(self.encoder) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use std::sync::Arc;

    #[test]
    fn test_encodes_silence_into_small_packet() {
        let mut encoder = OpusEncoder::new(128_000).expect("encoder");
        let frame = Frame {
            samples: Arc::from(AudioBuffer::silent().samples()),
            pts: 0,
        };

        let packet = encoder.encode(&frame).expect("packet");
        assert!(!packet.is_empty());
        assert!(packet.len() < 100);
    }

    #[test]
    fn test_rejects_short_frames() {
        let mut encoder = OpusEncoder::new(64_000).expect("encoder");
        let frame = Frame {
            samples: Arc::from(vec![0i16; 100]),
            pts: 0,
        };
        assert!(encoder.encode(&frame).is_err());
    }
}
