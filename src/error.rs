//! Session-level errors.
//!
//! Transport failures are defined next to the transport traits; this module
//! covers what the session reports to its callers, with static codes for
//! metrics and log labelling.

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not connect: {0}")]
    Connect(#[source] TransportError),

    #[error("could not join room {room}: {source}")]
    Join {
        room: String,
        #[source]
        source: TransportError,
    },

    #[error("session is closed")]
    Closed,

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl SessionError {
    /// Get a static error code string for labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Join { .. } => "join",
            Self::Closed => "closed",
            Self::Metrics(_) => "metrics",
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
