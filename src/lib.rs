//! # loopcast
//!
//! Streams a system loopback audio device to browsers over WebRTC.
//!
//! ## Application Architecture:
//! - **audio**: Device selection, realtime capture, the hand-off queue and the frame producer
//! - **relay**: Fans one frame stream out to every connected client
//! - **session**: Per-client session state and the connection registry
//! - **signaling**: Turns an HTTP offer into a registered session and an answer
//! - **service**: Start/stop lifecycle tying the pieces together
//! - **transport**: The media transport seam (WebRTC backend behind a feature)
//! - **config / state / error / health / handlers / middleware**: The HTTP application

pub mod audio;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod net;
pub mod relay;
pub mod service;
pub mod session;
pub mod signaling;
pub mod state;
#[cfg(test)]
pub mod testing;
pub mod transport;
