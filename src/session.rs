//! # Connection Registry
//!
//! Tracks every client session from offer to teardown. Each session owns
//! one transport session and one relay subscription, and gives both up
//! exactly once when it reaches a terminal state.
//!
//! ## Session Lifecycle:
//! 1. **Negotiating**: Offer received, answer being produced
//! 2. **Connected**: The transport reported a live connection
//! 3. **Failed**: Negotiation or the connection failed
//! 4. **Closed**: The client went away or the service is shutting down
//!
//! `Failed` and `Closed` are terminal. Reaching one closes the transport,
//! releases the subscription and removes the session from the registry.

use crate::error::SignalingError;
use crate::relay::SubscriptionHandle;
use crate::transport::{TransportSession, TransportState};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Current status of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Negotiating,
    Connected,
    Failed,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Negotiating => "negotiating",
            SessionStatus::Connected => "connected",
            SessionStatus::Failed => "failed",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Failed | SessionStatus::Closed)
    }
}

/// What the registry does in response to a transport state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    MarkConnected,
    Teardown(SessionStatus),
    Ignore,
}

/// Maps a reported transport state to a registry action.
///
/// `Disconnected` is ignored: transports may recover from it on their own,
/// and a permanent loss is reported later as `Failed` or `Closed`.
pub fn reaction(state: TransportState) -> SessionAction {
    match state {
        TransportState::Connected => SessionAction::MarkConnected,
        TransportState::Failed => SessionAction::Teardown(SessionStatus::Failed),
        TransportState::Closed => SessionAction::Teardown(SessionStatus::Closed),
        TransportState::New | TransportState::Connecting | TransportState::Disconnected => {
            SessionAction::Ignore
        }
    }
}

/// One client connection.
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    status: RwLock<SessionStatus>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    ended_at: RwLock<Option<DateTime<Utc>>>,
    transport: Mutex<Option<Arc<dyn TransportSession>>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl Session {
    pub fn new(id: Uuid, transport: Arc<dyn TransportSession>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            status: RwLock::new(SessionStatus::Negotiating),
            connected_at: RwLock::new(None),
            ended_at: RwLock::new(None),
            transport: Mutex::new(Some(transport)),
            subscription: Mutex::new(None),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    /// Records the relay subscription feeding this session.
    ///
    /// A session that is already terminal releases the handle right away.
    pub fn attach_subscription(&self, handle: SubscriptionHandle) {
        if self.status().is_terminal() {
            handle.release();
            return;
        }
        *self.subscription.lock() = Some(handle);
    }

    /// ## State Transition:
    /// Negotiating → Connected
    pub fn mark_connected(&self) -> bool {
        let mut status = self.status.write();
        if *status != SessionStatus::Negotiating {
            return false;
        }
        *status = SessionStatus::Connected;
        *self.connected_at.write() = Some(Utc::now());
        true
    }

    /// Moves the session to `terminal` and gives up its resources.
    ///
    /// The status changes first, then the transport is closed, then the
    /// subscription is released. Returns `false` if the session was already
    /// terminal, in which case nothing else happens.
    pub async fn teardown(&self, terminal: SessionStatus) -> bool {
        {
            let mut status = self.status.write();
            if status.is_terminal() {
                return false;
            }
            *status = terminal;
            *self.ended_at.write() = Some(Utc::now());
        }

        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            transport.close().await;
        }

        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.release();
        }

        true
    }

    /// Seconds from creation to now, or to the end of the session.
    pub fn duration_seconds(&self) -> f64 {
        let end_time = self.ended_at.read().unwrap_or_else(Utc::now);
        end_time.signed_duration_since(self.created_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            status: self.status(),
            created_at: self.created_at,
            connected_at: *self.connected_at.read(),
            duration_seconds: self.duration_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub total_sessions: usize,
    pub max_sessions: usize,
    pub status_counts: HashMap<&'static str, usize>,
    pub sessions: Vec<SessionSummary>,
}

/// Live client sessions, keyed by id.
///
/// ## Resource Management:
/// - Enforces the maximum concurrent session limit
/// - Removes sessions as soon as they reach a terminal state
/// - Closes everything on shutdown
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    max_sessions: usize,
    /// Set by `close_all`; only read or written under the `sessions` write lock
    closed: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            closed: AtomicBool::new(false),
        }
    }

    /// Accepts sessions again after `close_all`.
    pub fn reopen(&self) {
        let _sessions = self.sessions.write();
        self.closed.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fails with `CapacityReached` when no more sessions may be added, or
    /// with `Unavailable` after `close_all`.
    pub fn ensure_capacity(&self) -> Result<(), SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::Unavailable);
        }
        if self.sessions.read().len() >= self.max_sessions {
            return Err(SignalingError::CapacityReached(self.max_sessions));
        }
        Ok(())
    }

    /// Adds a session, re-checking the limit under the write lock.
    ///
    /// Fails with `Unavailable` once `close_all` has run, so an offer that
    /// was still being set up during shutdown cannot outlive it.
    pub fn register(&self, session: Arc<Session>) -> Result<(), SignalingError> {
        let mut sessions = self.sessions.write();
        if self.closed.load(Ordering::Acquire) {
            return Err(SignalingError::Unavailable);
        }
        if sessions.len() >= self.max_sessions {
            return Err(SignalingError::CapacityReached(self.max_sessions));
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    /// Follows a session's transport state events until it terminates.
    ///
    /// The watcher holds the registry weakly and stops on its own once the
    /// session is gone or the event channel closes.
    pub fn watch(
        self: &Arc<Self>,
        session_id: Uuid,
        mut events: mpsc::UnboundedReceiver<TransportState>,
    ) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            while let Some(state) = events.recv().await {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                debug!(session_id = %session_id, state = ?state, "Transport state changed");

                match reaction(state) {
                    SessionAction::MarkConnected => {
                        if registry.mark_connected(session_id) {
                            info!(session_id = %session_id, "Client connected");
                        }
                    }
                    SessionAction::Teardown(status) => {
                        registry.teardown(session_id, status).await;
                        break;
                    }
                    SessionAction::Ignore => {}
                }
            }
        })
    }

    pub fn mark_connected(&self, session_id: Uuid) -> bool {
        self.get(session_id)
            .map(|session| session.mark_connected())
            .unwrap_or(false)
    }

    /// Removes a session, then tears it down. Repeated calls return `false`.
    ///
    /// The entry is gone before the transport close is awaited, so a
    /// terminal session never shows up in `active_count` or `summary`.
    pub async fn teardown(&self, session_id: Uuid, status: SessionStatus) -> bool {
        let removed = self.sessions.write().remove(&session_id);
        let Some(session) = removed else {
            return false;
        };

        let changed = session.teardown(status).await;

        if changed {
            match status {
                SessionStatus::Failed => warn!(session_id = %session_id, "Session failed"),
                _ => info!(
                    session_id = %session_id,
                    status = status.as_str(),
                    duration_seconds = session.duration_seconds(),
                    "Session ended"
                ),
            }
        }
        changed
    }

    /// Stops accepting sessions and closes every registered one.
    /// Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let sessions: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write();
            self.closed.store(true, Ordering::Release);
            sessions.drain().map(|(_, session)| session).collect()
        };

        let mut closed = 0;
        for session in sessions {
            if session.teardown(SessionStatus::Closed).await {
                closed += 1;
            }
        }

        if closed > 0 {
            info!(count = closed, "Closed all client sessions");
        }
        closed
    }

    pub fn get(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().get(&session_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn summary(&self) -> RegistrySummary {
        let sessions = self.sessions.read();

        let mut status_counts = HashMap::new();
        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions.values() {
            let summary = session.summary();
            *status_counts.entry(summary.status.as_str()).or_insert(0) += 1;
            summaries.push(summary);
        }
        summaries.sort_by_key(|s| s.created_at);

        RegistrySummary {
            total_sessions: sessions.len(),
            max_sessions: self.max_sessions,
            status_counts,
            sessions: summaries,
        }
    }
}
