//! # WebRTC Transport
//!
//! `MediaTransport` backed by webrtc-rs. Each client gets its own peer
//! connection with a single send-only Opus track fed from a relay
//! subscription.
//!
//! ## Negotiation:
//! The answer is returned only after ICE gathering finishes, so it carries
//! every local candidate and no trickle channel is needed.

use super::opus::OpusEncoder;
use super::{
    MediaTransport, NewTransportSession, SessionDescription, TransportError, TransportSession,
    TransportState,
};
use crate::audio::{CHANNELS, SAMPLE_RATE};
use crate::config::TransportConfig;
use crate::relay::Subscription;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

impl From<RTCPeerConnectionState> for TransportState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New => TransportState::New,
            RTCPeerConnectionState::Connecting => TransportState::Connecting,
            RTCPeerConnectionState::Connected => TransportState::Connected,
            RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
            RTCPeerConnectionState::Failed => TransportState::Failed,
            RTCPeerConnectionState::Closed => TransportState::Closed,
            _ => TransportState::New,
        }
    }
}

/// Creates one peer connection per client from a shared API instance.
pub struct WebRtcTransport {
    api: API,
    ice_servers: Vec<String>,
    opus_bitrate: i32,
}

impl WebRtcTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        info!(
            ice_servers = ?config.ice_servers,
            bitrate = config.opus_bitrate,
            "WebRTC transport ready"
        );

        Ok(Self {
            api,
            ice_servers: config.ice_servers.clone(),
            opus_bitrate: config.opus_bitrate,
        })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn create_session(&self, id: Uuid) -> Result<NewTransportSession, TransportError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.rtc_configuration())
                .await
                .map_err(|e| TransportError::Setup(e.to_string()))?,
        );

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: SAMPLE_RATE,
                channels: CHANNELS as u16,
                ..Default::default()
            },
            "audio".to_owned(),
            "loopcast".to_owned(),
        ));

        let rtp_sender = match pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                let _ = pc.close().await;
                return Err(TransportError::Setup(format!("failed to add audio track: {}", e)));
            }
        };

        // Interceptors only run while RTCP is being read
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let (state_tx, state_events) = mpsc::unbounded_channel();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(session_id = %id, ?state, "Peer connection state changed");
            let _ = state_tx.send(TransportState::from(state));
            Box::pin(async {})
        }));

        let session = Arc::new(WebRtcSession {
            id,
            pc,
            track,
            opus_bitrate: self.opus_bitrate,
            pump: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        Ok(NewTransportSession {
            session,
            state_events,
        })
    }
}

struct WebRtcSession {
    id: Uuid,
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
    opus_bitrate: i32,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WebRtcSession {
    /// Encodes frames from `source` onto the track until the subscription ends.
    async fn pump(
        id: Uuid,
        track: Arc<TrackLocalStaticSample>,
        mut encoder: OpusEncoder,
        mut source: Subscription,
    ) {
        debug!(session_id = %id, subscription = source.id(), "Audio pump started");
        let mut sent: u64 = 0;

        while let Some(frame) = source.next().await {
            let data = match encoder.encode(&frame) {
                Ok(packet) => Bytes::copy_from_slice(packet),
                Err(e) => {
                    warn!(session_id = %id, pts = frame.pts, error = %e, "Dropping frame");
                    continue;
                }
            };

            let sample = Sample {
                data,
                duration: frame.duration(),
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!(session_id = %id, error = %e, "Failed to write sample");
                continue;
            }
            sent += 1;
        }

        debug!(
            session_id = %id,
            frames_sent = sent,
            frames_dropped = source.dropped(),
            "Audio pump stopped"
        );
    }
}

#[async_trait]
impl TransportSession for WebRtcSession {
    fn attach_audio_source(&self, source: Subscription) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let mut pump = self.pump.lock();
        if pump.is_some() {
            return Err(TransportError::Media("audio source already attached".to_string()));
        }

        let encoder = OpusEncoder::new(self.opus_bitrate)?;
        *pump = Some(tokio::spawn(Self::pump(
            self.id,
            Arc::clone(&self.track),
            encoder,
            source,
        )));
        Ok(())
    }

    async fn negotiate(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let remote = RTCSessionDescription::offer(offer.sdp.clone())
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;

        let mut gathering_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        let _ = gathering_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| TransportError::Negotiation("no local description".to_string()))?;

        debug!(session_id = %self.id, "Answer ready");
        Ok(SessionDescription::answer(local.sdp))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Aborting drops the subscription, which releases it from the relay
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }

        if let Err(e) = self.pc.close().await {
            warn!(session_id = %self.id, error = %e, "Error closing peer connection");
        }
    }
}
