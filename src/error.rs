//! # Error Handling
//!
//! This module defines the error types of each layer and how they're
//! converted to HTTP responses.
//!
//! ## Error Layers:
//! - **CaptureError**: Audio device problems. Fatal to startup, never to a
//!   running stream.
//! - **SignalingError**: One offer could not be answered. Local to a single
//!   request.
//! - **AppError**: The HTTP boundary type. Every domain error ends up here
//!   and is rendered as a JSON body.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### thiserror for domain errors
//! - **#[derive(Error)]**: Generates `std::error::Error` and `Display` from
//!   the `#[error("...")]` attributes
//! - **#[from]**: Generates a `From` impl so `?` converts automatically
//!
//! ### Traits for Error Conversion
//! - **From trait**: Converts domain errors into `AppError`
//! - **ResponseError trait**: Converts `AppError` into an HTTP response

use crate::transport::TransportError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Failures while selecting or opening the capture device.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no audio input devices available")]
    NoDevices,

    #[error("audio input device matching '{0}' not found")]
    DeviceNotFound(String),

    #[error("device does not support the requested format: {0}")]
    UnsupportedConfig(String),

    #[error("failed to enumerate audio devices: {0}")]
    Enumeration(String),

    #[error("failed to build input stream: {0}")]
    BuildStream(String),

    #[error("failed to start input stream: {0}")]
    PlayStream(String),

    #[error("capture is already running")]
    AlreadyRunning,
}

/// Why an offer could not be answered.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The body was not a `{sdp, type: "offer"}` description
    #[error("malformed offer: {0}")]
    MalformedOffer(String),

    /// No audio is being captured right now
    #[error("audio stream is not available")]
    Unavailable,

    #[error("maximum concurrent sessions ({0}) reached")]
    CapacityReached(usize),

    /// The transport rejected the offer or failed to produce an answer
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The transport could not create a session at all
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Error types returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **ServiceUnavailable**: The stream is down or full (503 errors)
/// - **Unprocessable**: Well-formed request that could not be honored (422 errors)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    ServiceUnavailable(String),
    Unprocessable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Unprocessable(msg) => write!(f, "Unprocessable: {}", msg),
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
            AppError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable", msg)
            }
        }
    }
}

/// Renders every error as the same JSON envelope.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "bad_request",
///     "message": "malformed offer: missing field `sdp`",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Maps each signaling failure to the status the browser client expects.
///
/// ## HTTP Status Code Mapping:
/// - MalformedOffer → 400
/// - Unavailable/CapacityReached → 503
/// - Negotiation → 422
/// - Transport → 500
impl From<SignalingError> for AppError {
    fn from(err: SignalingError) -> Self {
        let message = err.to_string();
        match err {
            SignalingError::MalformedOffer(_) => AppError::BadRequest(message),
            SignalingError::Unavailable | SignalingError::CapacityReached(_) => {
                AppError::ServiceUnavailable(message)
            }
            SignalingError::Negotiation(_) => AppError::Unprocessable(message),
            SignalingError::Transport(_) => AppError::Internal(message),
        }
    }
}
