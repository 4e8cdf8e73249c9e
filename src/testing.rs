//! # Test Doubles
//!
//! In-memory stand-ins for the audio backend and the media transport, used
//! by unit tests and the HTTP integration tests. Both can share an
//! [`EventLog`] so tests can assert on the order things happened in.

use crate::audio::device::{
    AudioHost, DataCallback, DeviceInfo, InputStream, StatusCallback, StreamParams, StreamStatus,
};
use crate::audio::Frame;
use crate::error::CaptureError;
use crate::relay::Subscription;
use crate::transport::{
    MediaTransport, NewTransportSession, SessionDescription, TransportError, TransportSession,
    TransportState,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Ordered record of interesting events, shared between fakes.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }
}

#[derive(Default)]
struct FakeStreamState {
    opened: Option<Option<usize>>,
    on_data: Option<DataCallback>,
    on_status: Option<StatusCallback>,
}

/// Audio backend with a fixed device list and manually driven callbacks.
pub struct FakeHost {
    devices: Vec<DeviceInfo>,
    state: Arc<Mutex<FakeStreamState>>,
    stops: Arc<AtomicUsize>,
    fail_open: Option<String>,
    log: EventLog,
}

impl FakeHost {
    /// Stereo input devices with the given names; the first one is the default.
    pub fn new(names: &[&str]) -> Self {
        let devices = names
            .iter()
            .enumerate()
            .map(|(index, name)| DeviceInfo {
                index,
                name: name.to_string(),
                max_input_channels: 2,
                is_default: index == 0,
            })
            .collect();
        Self::with_devices(devices)
    }

    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices,
            state: Arc::new(Mutex::new(FakeStreamState::default())),
            stops: Arc::new(AtomicUsize::new(0)),
            fail_open: None,
            log: EventLog::new(),
        }
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Makes `open_input` fail with a build error.
    pub fn failing(mut self, reason: &str) -> Self {
        self.fail_open = Some(reason.to_string());
        self
    }

    /// Delivers a block to the open stream. Returns `false` if none is open.
    pub fn emit(&self, samples: &[i16]) -> bool {
        let mut state = self.state.lock();
        match state.on_data.as_mut() {
            Some(on_data) => {
                on_data(samples);
                true
            }
            None => false,
        }
    }

    pub fn emit_status(&self, status: StreamStatus) -> bool {
        let mut state = self.state.lock();
        match state.on_status.as_mut() {
            Some(on_status) => {
                on_status(status);
                true
            }
            None => false,
        }
    }

    /// Device passed to the last successful `open_input`.
    pub fn opened_device(&self) -> Option<Option<usize>> {
        self.state.lock().opened
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl AudioHost for FakeHost {
    fn devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        Ok(self.devices.clone())
    }

    fn open_input(
        &self,
        device: Option<usize>,
        _params: StreamParams,
        on_data: DataCallback,
        on_status: StatusCallback,
    ) -> Result<Box<dyn InputStream>, CaptureError> {
        if let Some(reason) = &self.fail_open {
            return Err(CaptureError::BuildStream(reason.clone()));
        }

        let name = match device {
            Some(index) => self.devices.iter().find(|d| d.index == index),
            None => self.devices.iter().find(|d| d.is_default),
        }
        .map(|d| d.name.clone())
        .unwrap_or_else(|| "default".to_string());

        {
            let mut state = self.state.lock();
            state.opened = Some(device);
            state.on_data = Some(on_data);
            state.on_status = Some(on_status);
        }
        self.log.record(format!("capture started {}", name));

        Ok(Box::new(FakeInputStream {
            name,
            state: self.state.clone(),
            stops: self.stops.clone(),
            stopped: false,
            log: self.log.clone(),
        }))
    }
}

struct FakeInputStream {
    name: String,
    state: Arc<Mutex<FakeStreamState>>,
    stops: Arc<AtomicUsize>,
    stopped: bool,
    log: EventLog,
}

impl InputStream for FakeInputStream {
    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        {
            let mut state = self.state.lock();
            state.on_data = None;
            state.on_status = None;
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.log.record("capture stopped");
    }

    fn device_name(&self) -> &str {
        &self.name
    }
}

impl Drop for FakeInputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Media transport whose sessions answer every offer with a canned SDP.
pub struct FakeTransport {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    reject_negotiation: AtomicBool,
    fail_create: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
    close_delay: Mutex<Option<Duration>>,
    log: EventLog,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            reject_negotiation: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            create_delay: Mutex::new(None),
            close_delay: Mutex::new(None),
            log: EventLog::new(),
        }
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn reject_negotiation(&self, reject: bool) {
        self.reject_negotiation.store(reject, Ordering::SeqCst);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Makes `create_session` sleep before returning.
    pub fn delay_create(&self, delay: Duration) {
        *self.create_delay.lock() = Some(delay);
    }

    /// Makes each new session's `close` sleep before it takes effect.
    pub fn delay_close(&self, delay: Duration) {
        *self.close_delay.lock() = Some(delay);
    }

    pub fn session(&self, id: Uuid) -> Option<Arc<FakeSession>> {
        self.sessions.lock().iter().find(|s| s.id == id).cloned()
    }

    /// Every session created so far, oldest first.
    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().clone()
    }

    /// Reports a connection state change for session `id`.
    pub fn report(&self, id: Uuid, state: TransportState) -> bool {
        self.session(id)
            .map(|s| s.state_tx.send(state).is_ok())
            .unwrap_or(false)
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn create_session(&self, id: Uuid) -> Result<NewTransportSession, TransportError> {
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::Setup("fake transport refused".to_string()));
        }

        let (state_tx, state_events) = mpsc::unbounded_channel();
        let session = Arc::new(FakeSession {
            id,
            state_tx,
            source: Mutex::new(None),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            reject: self.reject_negotiation.load(Ordering::SeqCst),
            close_delay: *self.close_delay.lock(),
            log: self.log.clone(),
        });
        self.sessions.lock().push(session.clone());

        Ok(NewTransportSession {
            session,
            state_events,
        })
    }
}

pub struct FakeSession {
    pub id: Uuid,
    state_tx: mpsc::UnboundedSender<TransportState>,
    source: Mutex<Option<Subscription>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    reject: bool,
    close_delay: Option<Duration>,
    log: EventLog,
}

impl FakeSession {
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn has_source(&self) -> bool {
        self.source.lock().is_some()
    }

    /// Takes the attached subscription out, e.g. to read frames from it.
    pub fn take_source(&self) -> Option<Subscription> {
        self.source.lock().take()
    }

    /// Reads the next frame from the attached subscription.
    pub async fn next_frame(&self) -> Option<Frame> {
        let mut source = self.take_source()?;
        let frame = source.next().await;
        *self.source.lock() = Some(source);
        frame
    }
}

#[async_trait]
impl TransportSession for FakeSession {
    fn attach_audio_source(&self, source: Subscription) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        *self.source.lock() = Some(source);
        Ok(())
    }

    async fn negotiate(&self, offer: &SessionDescription) -> Result<SessionDescription, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.reject {
            return Err(TransportError::Negotiation("fake transport rejected offer".to_string()));
        }
        self.log.record(format!("negotiate {}", self.id));
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- {} 0 IN IP4 127.0.0.1\r\ns=-\r\n{}",
            self.id.simple(),
            offer.sdp.lines().skip(3).collect::<Vec<_>>().join("\r\n")
        )))
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.log.record(format!("close {}", self.id));
            let _ = self.state_tx.send(TransportState::Closed);
        }
    }
}

/// Minimal browser-style offer body.
pub fn offer_json() -> String {
    serde_json::json!({
        "sdp": "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=recvonly\r\n",
        "type": "offer"
    })
    .to_string()
}
