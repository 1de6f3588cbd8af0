//! Gateway error taxonomy
//!
//! Distinguishes the error kinds the session state machine must treat
//! differently (see spec §7): `Cancelled` propagates silently,
//! `TransportError` and `UnexpectedError` terminate the session,
//! `EngineError` is sanitized into an empty transcript, and malformed
//! control JSON never becomes an error at all (it's ignored at the
//! decode site, not routed through this enum).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// The session's cancellation signal fired while a task was suspended.
    #[error("cancelled")]
    Cancelled,

    /// A read or write on the duplex channel failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The recognition engine itself failed (model error, decode failure).
    /// Always sanitized to an empty transcript before reaching the client.
    #[error("engine error: {0}")]
    Engine(#[from] crate::engine::SpeechError),

    /// Anything else raised on the ingress path that isn't a transport
    /// failure or a deliberate cancellation.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl GatewayError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GatewayError::Cancelled)
    }
}
