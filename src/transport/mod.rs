//! # Media Transport
//!
//! The seam between session bookkeeping and the real-time media stack.
//!
//! A `MediaTransport` creates one `TransportSession` per client. The session
//! takes a relay subscription as its outbound audio, answers the client's
//! offer and reports connection state changes on a channel. Everything on
//! the far side of this trait (ICE, DTLS, SRTP, codecs) is the backend's
//! business.

#[cfg(feature = "webrtc-transport")]
pub mod opus;
#[cfg(feature = "webrtc-transport")]
pub mod webrtc;

use crate::relay::Subscription;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// An offer or answer as exchanged with the browser: `{"sdp": "...", "type": "offer"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpKind,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpKind::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpKind::Answer,
        }
    }
}

/// Connection state reported by a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to set up transport session: {0}")]
    Setup(String),

    #[error("offer/answer exchange failed: {0}")]
    Negotiation(String),

    #[error("failed to attach audio source: {0}")]
    Media(String),

    #[error("transport session is closed")]
    Closed,
}

/// A freshly created session and the channel its state changes arrive on.
pub struct NewTransportSession {
    pub session: Arc<dyn TransportSession>,
    pub state_events: mpsc::UnboundedReceiver<TransportState>,
}

/// Factory for per-client transport sessions.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn create_session(&self, id: Uuid) -> Result<NewTransportSession, TransportError>;
}

/// One client's media connection.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Uses `source` as the outbound audio track. Consumes the subscription.
    fn attach_audio_source(&self, source: Subscription) -> Result<(), TransportError>;

    /// Applies the remote offer and returns the local answer.
    async fn negotiate(&self, offer: &SessionDescription) -> Result<SessionDescription, TransportError>;

    /// Closes the connection. Must tolerate repeated calls.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_wire_format() {
        let parsed: SessionDescription =
            serde_json::from_str(r#"{"sdp":"v=0\r\n","type":"offer"}"#).expect("valid offer");
        assert_eq!(parsed, SessionDescription::offer("v=0\r\n"));

        let json = serde_json::to_value(SessionDescription::answer("v=0")).expect("serializable");
        assert_eq!(json["type"], "answer");
        assert_eq!(json["sdp"], "v=0");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let parsed = serde_json::from_str::<SessionDescription>(r#"{"sdp":"v=0","type":"bogus"}"#);
        assert!(parsed.is_err());
    }
}
