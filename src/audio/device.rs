//! # Audio Devices
//!
//! Describes input devices, picks the loopback/monitor device to capture,
//! and defines the narrow seam (`AudioHost`) through which the platform
//! audio backend is driven.

use crate::error::CaptureError;

/// Name fragments that identify loopback/monitor inputs, most specific first.
///
/// - **cable output**: VB-Audio virtual cable (Windows)
/// - **monitor**: PulseAudio / PipeWire monitor sources (Linux)
/// - **stereo mix**: Realtek "Stereo Mix" (Windows)
/// - **loopback**: BlackHole, Loopback and friends (macOS)
/// - **pulse**: the ALSA `pulse` plugin
/// - **what u hear**: Creative SoundBlaster
pub const LOOPBACK_KEYWORDS: [&str; 6] = [
    "cable output",
    "monitor",
    "stereo mix",
    "loopback",
    "pulse",
    "what u hear",
];

/// An enumerated audio device as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceInfo {
    /// Position in the host's enumeration, used to open the device
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    /// Whether this is the platform's default input
    pub is_default: bool,
}

impl DeviceInfo {
    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }
}

/// How the capture device is chosen at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Keyword search, then the default input
    Auto,
    /// First input device whose name contains this text (case-insensitive)
    Named(String),
}

impl DeviceSelector {
    pub fn from_config(device: Option<&str>) -> Self {
        match device.map(str::trim) {
            Some(name) if !name.is_empty() => DeviceSelector::Named(name.to_string()),
            _ => DeviceSelector::Auto,
        }
    }
}

/// Returns the index of the best loopback device, if any.
///
/// Keywords are tried in priority order; within one keyword the first
/// input-capable device in enumeration order wins. Output-only devices
/// never match.
pub fn select_loopback(devices: &[DeviceInfo]) -> Option<usize> {
    let names: Vec<(usize, String)> = devices
        .iter()
        .filter(|d| d.is_input())
        .map(|d| (d.index, d.name.to_lowercase()))
        .collect();

    LOOPBACK_KEYWORDS.iter().find_map(|keyword| {
        names
            .iter()
            .find(|(_, name)| name.contains(keyword))
            .map(|(index, _)| *index)
    })
}

/// Returns the index of the first input device whose name contains `name`.
pub fn select_named(devices: &[DeviceInfo], name: &str) -> Option<usize> {
    let needle = name.to_lowercase();
    devices
        .iter()
        .filter(|d| d.is_input())
        .find(|d| d.name.to_lowercase().contains(&needle))
        .map(|d| d.index)
}

/// Parameters requested when opening an input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Preferred callback period in samples per channel; hosts may ignore it
    pub period: usize,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            sample_rate: super::SAMPLE_RATE,
            channels: super::CHANNELS,
            period: super::FRAME_SAMPLES,
        }
    }
}

/// Out-of-band conditions the device reports alongside samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// The device dropped input before the callback could run
    InputOverflow,
    /// The backend reported a stream error; capture continues
    DeviceError,
}

/// Realtime sample callback. Receives interleaved `i16` blocks of any length.
pub type DataCallback = Box<dyn FnMut(&[i16]) + Send + 'static>;

/// Status callback, invoked from the backend's thread.
pub type StatusCallback = Box<dyn FnMut(StreamStatus) + Send + 'static>;

/// Platform audio backend.
pub trait AudioHost: Send + Sync {
    /// Enumerates every device the backend knows about.
    fn devices(&self) -> Result<Vec<DeviceInfo>, CaptureError>;

    /// Opens and starts an input stream.
    ///
    /// ## Parameters:
    /// - **device**: Index from `devices()`, or `None` for the default input
    /// - **params**: Requested format
    /// - **on_data**: Called on the realtime thread for every block
    /// - **on_status**: Called whenever the device flags a problem
    fn open_input(
        &self,
        device: Option<usize>,
        params: StreamParams,
        on_data: DataCallback,
        on_status: StatusCallback,
    ) -> Result<Box<dyn InputStream>, CaptureError>;
}

/// A running input stream. Dropping it must also stop the device.
pub trait InputStream: Send {
    /// Stops delivering callbacks. Must be safe to call more than once.
    fn stop(&mut self);

    /// Name of the device actually opened.
    fn device_name(&self) -> &str;
}
