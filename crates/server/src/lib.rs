//! ASR WebSocket server
//!
//! Maps one client connection onto one streaming decoder, translates the
//! wire protocol, and publishes partial and final results.

pub mod http;
pub mod messages;
pub mod metrics;
pub mod session;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use messages::{ClientSignal, NbestEntry, ServerMessage};
pub use session::{SessionManager, SpeechSession};
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session error: {0}")]
    Session(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
