//! # cpal Audio Backend
//!
//! `AudioHost` over the platform's default cpal host.
//!
//! `cpal::Stream` may not be moved between threads on every platform, so
//! each input stream lives on its own thread. The thread builds and starts
//! the stream, reports the outcome back, then parks until it is told to
//! stop; dropping the stream there stops the device.

use super::device::{
    AudioHost, DataCallback, DeviceInfo, InputStream, StatusCallback, StreamParams, StreamStatus,
};
use crate::error::CaptureError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Float blocks are converted through a fixed stack buffer of this many samples.
const CONVERT_CHUNK: usize = 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct CpalHost;

impl CpalHost {
    pub fn new() -> Self {
        Self
    }
}

impl AudioHost for CpalHost {
    fn devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let devices = host
            .devices()
            .map_err(|e| CaptureError::Enumeration(e.to_string()))?;

        let infos: Vec<DeviceInfo> = devices
            .enumerate()
            .map(|(index, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Unknown device {}", index));
                let max_input_channels = device
                    .supported_input_configs()
                    .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                    .unwrap_or(0);
                DeviceInfo {
                    index,
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    name,
                    max_input_channels,
                }
            })
            .collect();

        for info in &infos {
            debug!(
                index = info.index,
                name = %info.name,
                inputs = info.max_input_channels,
                default = info.is_default,
                "Found audio device"
            );
        }
        Ok(infos)
    }

    fn open_input(
        &self,
        device: Option<usize>,
        params: StreamParams,
        on_data: DataCallback,
        on_status: StatusCallback,
    ) -> Result<Box<dyn InputStream>, CaptureError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<String, CaptureError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("loopcast-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(device, params, on_data, on_status) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns on an explicit stop or when the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| CaptureError::BuildStream(e.to_string()))?;

        let name = ready_rx
            .recv()
            .map_err(|_| CaptureError::BuildStream("capture thread exited early".to_string()))??;

        Ok(Box::new(CpalInputStream {
            name,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }))
    }
}

struct CpalInputStream {
    name: String,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl InputStream for CpalInputStream {
    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(device = %self.name, "Capture thread panicked");
            }
        }
    }

    fn device_name(&self) -> &str {
        &self.name
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(
    device: Option<usize>,
    params: StreamParams,
    mut on_data: DataCallback,
    mut on_status: StatusCallback,
) -> Result<(cpal::Stream, String), CaptureError> {
    let host = cpal::default_host();
    let device = match device {
        Some(index) => host
            .devices()
            .map_err(|e| CaptureError::Enumeration(e.to_string()))?
            .nth(index)
            .ok_or_else(|| CaptureError::DeviceNotFound(format!("#{}", index)))?,
        None => host.default_input_device().ok_or(CaptureError::NoDevices)?,
    };
    let name = device.name().unwrap_or_else(|_| "Unknown device".to_string());

    let (format, buffer_size) = pick_format(&device, &params)?;
    let config = StreamConfig {
        channels: params.channels,
        sample_rate: SampleRate(params.sample_rate),
        buffer_size,
    };
    debug!(device = %name, ?format, ?buffer_size, "Opening input stream");

    let on_error = move |_err: cpal::StreamError| on_status(StreamStatus::DeviceError);

    let stream = match format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| on_data(data),
            on_error,
            None,
        ),
        _ => {
            let mut scratch = [0i16; CONVERT_CHUNK];
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for chunk in data.chunks(CONVERT_CHUNK) {
                        for (dst, &src) in scratch.iter_mut().zip(chunk) {
                            *dst = (src.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                        }
                        on_data(&scratch[..chunk.len()]);
                    }
                },
                on_error,
                None,
            )
        }
    }
    .map_err(|e| CaptureError::BuildStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::PlayStream(e.to_string()))?;

    Ok((stream, name))
}

/// Picks a native sample format (i16 preferred, f32 converted) and a buffer size.
fn pick_format(
    device: &cpal::Device,
    params: &StreamParams,
) -> Result<(SampleFormat, BufferSize), CaptureError> {
    let rate = SampleRate(params.sample_rate);
    let candidates: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| CaptureError::UnsupportedConfig(e.to_string()))?
        .filter(|range| {
            range.channels() == params.channels
                && range.min_sample_rate() <= rate
                && rate <= range.max_sample_rate()
        })
        .collect();

    let range = candidates
        .iter()
        .find(|range| range.sample_format() == SampleFormat::I16)
        .or_else(|| {
            candidates
                .iter()
                .find(|range| range.sample_format() == SampleFormat::F32)
        })
        .ok_or_else(|| {
            CaptureError::UnsupportedConfig(format!(
                "no {}-channel {} Hz i16/f32 input",
                params.channels, params.sample_rate
            ))
        })?;

    let period = params.period as u32;
    let buffer_size = match range.buffer_size() {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&period) => {
            BufferSize::Fixed(period)
        }
        _ => BufferSize::Default,
    };

    Ok((range.sample_format(), buffer_size))
}
