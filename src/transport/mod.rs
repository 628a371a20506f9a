//! Transport abstraction for the chat session.
//!
//! The session never touches the wire. It talks to a connected transport
//! through two halves: an [`Inbound`] reader owned by the receiver loop and
//! a shared [`Outbound`] writer used by everything else. A [`Connector`]
//! performs the handshake and hands back both halves.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::session::{ChatType, Format};

pub mod gateway;
#[cfg(test)]
pub mod mock;
pub mod stream;
pub mod tls;

/// Presence `show` value advertised while the relay is online.
pub const SHOW_CHAT: &str = "chat";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("end of stream")]
    Closed,
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("framing error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("authentication refused: {0}")]
    Auth(String),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// One unit of data read from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Stanza {
    Chat(Chat),
    Presence(Presence),
}

/// Inbound chat message. `kind` is the raw chat-type tag; it is classified
/// by the receiver loop and unknown tags are dropped there.
#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub remote: String,
    pub kind: String,
    pub text: String,
}

/// Inbound presence notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Presence {
    pub from: String,
    pub kind: PresenceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceKind {
    /// No type attribute at all.
    Available,
    Subscribe,
    Unavailable,
    Error,
    Other(String),
}

impl From<&str> for PresenceKind {
    fn from(tag: &str) -> Self {
        match tag {
            "" => Self::Available,
            "subscribe" => Self::Subscribe,
            "unavailable" => Self::Unavailable,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Outgoing chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingChat<'a> {
    pub to: &'a str,
    pub kind: ChatType,
    pub text: &'a str,
}

/// Presence asserted by the local side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceUpdate {
    Available { show: String, status: String },
    Unavailable { status: String },
}

/// Request to enter a group room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomJoin {
    pub room: String,
    pub nick: String,
    /// Protected join when set.
    pub password: Option<String>,
}

/// Handshake parameters.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Gateway address, `host:port`.
    pub gateway: String,
    pub user: String,
    pub password: String,
    pub no_tls: bool,
    pub tls_insecure: bool,
    /// Initial presence `show` and status text.
    pub show: String,
    pub status: String,
}

/// Reading half of a connected transport.
#[async_trait]
pub trait Inbound: Send {
    /// Wait for the next stanza. [`TransportError::Closed`] signals end-of-stream.
    async fn recv(&mut self) -> Result<Stanza, TransportError>;
}

/// Writing half of a connected transport. Implementations serialize
/// concurrent writers internally.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_chat(&self, chat: &OutgoingChat<'_>, format: Format) -> Result<(), TransportError>;

    async fn send_presence(&self, update: &PresenceUpdate) -> Result<(), TransportError>;

    async fn approve_subscription(&self, jid: &str) -> Result<(), TransportError>;

    async fn revoke_subscription(&self, jid: &str) -> Result<(), TransportError>;

    async fn join_room(&self, join: &RoomJoin) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    /// Full local address bound during the handshake.
    fn jid(&self) -> &str;

    fn is_encrypted(&self) -> bool;
}

/// Both halves of a freshly handshaken transport.
pub struct Connection {
    pub inbound: Box<dyn Inbound>,
    pub outbound: Arc<dyn Outbound>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> Result<Connection, TransportError>;
}

/// How the receiver loop should treat a failed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadErrorAction {
    /// The remote side closed the stream; the session cannot continue.
    EndOfStream,
    /// Anything else; retried with backoff.
    Transient,
}

pub fn classify_read_error(e: &TransportError) -> ReadErrorAction {
    match e {
        TransportError::Closed => ReadErrorAction::EndOfStream,
        _ => ReadErrorAction::Transient,
    }
}
