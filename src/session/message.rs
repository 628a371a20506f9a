//! Message value types shared by producers, the sender loop and the transport.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Render format of an outgoing message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Text,
    Html,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown format: {0}")]
pub struct UnknownFormat(pub String);

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Html => "html",
        }
    }
}

impl FromStr for Format {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "text" => Ok(Self::Text),
            "html" => Ok(Self::Html),
            _ => Err(UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat-type tag of a message: one-to-one or group room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    Chat,
    GroupChat,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unhandled chat type: {0}")]
pub struct UnknownChatType(pub String);

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::GroupChat => "groupchat",
        }
    }
}

impl FromStr for ChatType {
    type Err = UnknownChatType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "groupchat" => Ok(Self::GroupChat),
            _ => Err(UnknownChatType(s.to_string())),
        }
    }
}

impl fmt::Display for ChatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item on the outbound queue. Consumed exactly once by the sender loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Direct recipient; `None` broadcasts to every allow-listed
    /// correspondent and every room.
    pub to: Option<String>,
    pub text: String,
    pub format: Format,
}

impl OutboundMessage {
    pub fn broadcast(text: impl Into<String>, format: Format) -> Self {
        Self {
            to: None,
            text: text.into(),
            format,
        }
    }

    pub fn direct(to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: Some(to.into()),
            text: text.into(),
            format: Format::Text,
        }
    }
}
