//! # Stream Service
//!
//! Owns the capture pipeline and the client sessions for the lifetime of
//! the process.
//!
//! ## Lifecycle:
//! - **on_start**: Open the loopback device, start the relay pump and begin
//!   accepting offers
//! - **on_stop**: Stop accepting offers, close every session, then stop
//!   capture and wait for the pump to drain
//!
//! If `on_start` fails the service stays up but unavailable: `/offer`
//! answers 503 and `/health` reports the capture error.

use crate::audio::capture::{CaptureSource, DiagnosticsSnapshot};
use crate::audio::device::{AudioHost, DeviceSelector};
use crate::audio::producer::FrameProducer;
use crate::config::AppConfig;
use crate::error::{CaptureError, SignalingError};
use crate::relay::RelayFanout;
use crate::session::{ConnectionRegistry, RegistrySummary};
use crate::signaling::{RelaySlot, SignalingEndpoint};
use crate::transport::{MediaTransport, SessionDescription};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Snapshot of the streaming side for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub streaming: bool,
    pub device: Option<String>,
    pub subscribers: usize,
    pub frames_published: u64,
    pub capture: DiagnosticsSnapshot,
    pub last_error: Option<String>,
}

pub struct StreamService {
    capture: Mutex<CaptureSource>,
    relay: RelaySlot,
    pump: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<ConnectionRegistry>,
    signaling: SignalingEndpoint,
    subscriber_queue_capacity: usize,
    last_error: RwLock<Option<String>>,
}

impl StreamService {
    pub fn new(
        config: &AppConfig,
        host: Arc<dyn AudioHost>,
        transport: Arc<dyn MediaTransport>,
    ) -> Self {
        let selector = DeviceSelector::from_config(config.audio.device.as_deref());
        let capture = CaptureSource::new(host, selector, config.audio.queue_capacity);
        let registry = Arc::new(ConnectionRegistry::new(
            config.performance.max_concurrent_sessions,
        ));
        let relay: RelaySlot = Arc::new(RwLock::new(None));
        let signaling = SignalingEndpoint::new(registry.clone(), transport, relay.clone());

        Self {
            capture: Mutex::new(capture),
            relay,
            pump: Mutex::new(None),
            registry,
            signaling,
            subscriber_queue_capacity: config.audio.subscriber_queue_capacity,
            last_error: RwLock::new(None),
        }
    }

    /// Starts capture and the relay pump. Calling it while running is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_start(&self) -> Result<(), CaptureError> {
        let mut capture = self.capture.lock();
        if capture.is_running() {
            return Ok(());
        }

        let feed = match capture.start() {
            Ok(feed) => feed,
            Err(err) => {
                error!(error = %err, "Failed to start audio capture");
                *self.last_error.write() = Some(err.to_string());
                return Err(err);
            }
        };

        let fanout = RelayFanout::new(self.subscriber_queue_capacity);
        let pump = fanout.spawn(FrameProducer::new(feed));

        *self.pump.lock() = Some(pump);
        self.registry.reopen();
        *self.relay.write() = Some(fanout);
        *self.last_error.write() = None;

        info!(
            device = capture.device_name().unwrap_or("unknown"),
            "Audio stream ready"
        );
        Ok(())
    }

    /// Closes every session, then stops capture.
    ///
    /// The registry refuses new sessions from here on, including offers that
    /// were already past the availability check. Safe to call more than once
    /// and safe when `on_start` never succeeded.
    pub async fn on_stop(&self) {
        let relay = self.relay.write().take();

        let closed = self.registry.close_all().await;

        self.capture.lock().stop();

        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                error!(error = %e, "Relay pump task failed");
            }
        }
        if let Some(relay) = relay {
            relay.close();
        }

        info!(sessions_closed = closed, "Audio stream stopped");
    }

    pub async fn handle_offer(&self, body: &[u8]) -> Result<SessionDescription, SignalingError> {
        self.signaling.handle_offer(body).await
    }

    pub fn is_streaming(&self) -> bool {
        self.relay.read().is_some()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> RegistrySummary {
        self.registry.summary()
    }

    pub fn status(&self) -> ServiceStatus {
        let (subscribers, frames_published) = self
            .relay
            .read()
            .as_ref()
            .map(|r| (r.subscriber_count(), r.frames_published()))
            .unwrap_or((0, 0));
        let capture = self.capture.lock();

        ServiceStatus {
            streaming: self.is_streaming(),
            device: capture.device_name().map(str::to_string),
            subscribers,
            frames_published,
            capture: capture.diagnostics(),
            last_error: self.last_error.read().clone(),
        }
    }
}
