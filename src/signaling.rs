//! # Signaling
//!
//! Answers a client's offer: validates it, creates and registers a session,
//! wires the relay into the session's transport and returns the answer.

use crate::error::SignalingError;
use crate::relay::RelayFanout;
use crate::session::{ConnectionRegistry, Session, SessionStatus};
use crate::transport::{MediaTransport, SdpKind, SessionDescription};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared slot holding the relay while the stream is live.
pub type RelaySlot = Arc<RwLock<Option<RelayFanout>>>;

pub struct SignalingEndpoint {
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn MediaTransport>,
    relay: RelaySlot,
}

impl SignalingEndpoint {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        transport: Arc<dyn MediaTransport>,
        relay: RelaySlot,
    ) -> Self {
        Self {
            registry,
            transport,
            relay,
        }
    }

    /// Handles one offer body and returns the answer description.
    ///
    /// ## Errors:
    /// - **MalformedOffer**: Body is not `{sdp, type: "offer"}`; nothing is registered
    /// - **Unavailable**: The stream is not running, or shutdown started
    ///   before the session could be set up
    /// - **CapacityReached**: Too many concurrent sessions
    /// - **Transport**: The transport could not create a session
    /// - **Negotiation**: The session was created but negotiation failed;
    ///   it has already been torn down as `failed`
    pub async fn handle_offer(&self, body: &[u8]) -> Result<SessionDescription, SignalingError> {
        let offer = parse_offer(body)?;

        let relay = self
            .relay
            .read()
            .clone()
            .ok_or(SignalingError::Unavailable)?;
        self.registry.ensure_capacity()?;

        let session_id = Uuid::new_v4();
        let created = self.transport.create_session(session_id).await?;
        let transport = created.session.clone();

        let session = Arc::new(Session::new(session_id, created.session));
        if let Err(err) = self.registry.register(session.clone()) {
            session.teardown(SessionStatus::Failed).await;
            return Err(err);
        }

        let subscription = relay.subscribe();
        session.attach_subscription(subscription.handle());
        self.registry.watch(session_id, created.state_events);

        let answer = match transport.attach_audio_source(subscription) {
            Ok(()) => transport.negotiate(&offer).await,
            Err(err) => Err(err),
        };

        // Shutdown may have closed the session while it was negotiating
        if session.status().is_terminal() {
            self.registry.teardown(session_id, SessionStatus::Closed).await;
            return Err(SignalingError::Unavailable);
        }

        match answer {
            Ok(answer) => {
                info!(session_id = %session_id, "Answered offer");
                Ok(answer)
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "Negotiation failed");
                self.registry.teardown(session_id, SessionStatus::Failed).await;
                Err(SignalingError::Negotiation(err.to_string()))
            }
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

/// Parses and checks an offer body.
pub fn parse_offer(body: &[u8]) -> Result<SessionDescription, SignalingError> {
    let description: SessionDescription = serde_json::from_slice(body)
        .map_err(|e| SignalingError::MalformedOffer(e.to_string()))?;

    if description.kind != SdpKind::Offer {
        return Err(SignalingError::MalformedOffer(format!(
            "expected type 'offer', got '{}'",
            serde_json::to_value(description.kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default()
        )));
    }
    if description.sdp.trim().is_empty() {
        return Err(SignalingError::MalformedOffer("sdp is empty".to_string()));
    }

    Ok(description)
}
