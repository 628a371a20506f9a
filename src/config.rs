//! Configuration loading and validation.

use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::session::{Format, UnknownFormat, bare_jid};
use crate::transport::gateway::Endpoint;
use crate::transport::{ConnectOptions, RoomJoin, SHOW_CHAT};

/// HTTP listen address used when `listen` is empty.
const DEFAULT_LISTEN: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
    9091,
);

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Format(#[from] UnknownFormat),
    #[error("xmpp.user must be set")]
    MissingUser,
    #[error("xmpp.gateway must be set")]
    MissingGateway,
    #[error("invalid xmpp.gateway address {0:?}, expected host:port")]
    InvalidGateway(String),
    #[error("invalid listen address {0:?}")]
    InvalidListen(String),
}

/// Where the HTTP server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl ListenAddr {
    /// An absolute path selects a Unix socket, anything else a TCP address.
    /// Empty falls back to `127.0.0.1:9091`.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        if value.is_empty() {
            return Ok(Self::Tcp(DEFAULT_LISTEN));
        }
        if value.starts_with('/') {
            return Ok(Self::Unix(PathBuf::from(value)));
        }
        value
            .parse()
            .map(Self::Tcp)
            .map_err(|_| ConfigError::InvalidListen(value.to_string()))
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub listen: ListenAddr,
    pub debug: bool,
    /// Broadcast once the session is up.
    pub startup_message: Option<String>,
    /// Render format for broadcasts that do not choose one.
    pub format: Format,
    pub xmpp: XmppConfig,
}

/// Chat session configuration.
#[derive(Debug, Clone)]
pub struct XmppConfig {
    /// Stanza gateway address, `host:port`.
    pub gateway: String,
    pub user: String,
    pub password: String,
    /// Allow-list, in configuration order. Sorted by the session.
    pub send_notif: Vec<String>,
    /// Presence status text.
    pub status: String,
    pub no_tls: bool,
    pub tls_insecure: bool,
    pub send_muc: Vec<RoomConfig>,
}

/// A group room joined at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    pub room: String,
    pub nick: String,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawConfig {
    listen: String,
    debug: bool,
    startup_message: String,
    format: String,
    xmpp: RawXmppConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawXmppConfig {
    gateway: String,
    user: String,
    password: String,
    send_notif: Vec<String>,
    status: String,
    no_tls: bool,
    tls_insecure: bool,
    send_muc: Vec<RawRoomConfig>,
}

#[derive(Debug, Deserialize)]
struct RawRoomConfig {
    room: String,
    nick: Option<String>,
    password: Option<String>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            listen: String::new(),
            debug: false,
            startup_message: String::new(),
            format: String::new(),
            xmpp: RawXmppConfig::default(),
        }
    }
}

impl Default for RawXmppConfig {
    fn default() -> Self {
        Self {
            gateway: String::new(),
            user: String::new(),
            password: String::new(),
            send_notif: Vec::new(),
            status: "Monitoring".to_string(),
            no_tls: false,
            tls_insecure: false,
            send_muc: Vec::new(),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content)?;
        let format = raw.format.parse::<Format>()?;
        let listen = ListenAddr::parse(&raw.listen)?;

        let xmpp = raw.xmpp;
        if xmpp.user.is_empty() {
            return Err(ConfigError::MissingUser);
        }
        if xmpp.gateway.is_empty() {
            return Err(ConfigError::MissingGateway);
        }
        if xmpp.gateway.parse::<Endpoint>().is_err() {
            return Err(ConfigError::InvalidGateway(xmpp.gateway));
        }
        let default_nick = bare_jid(&xmpp.user).to_string();
        let send_muc = xmpp
            .send_muc
            .into_iter()
            .map(|muc| RoomConfig {
                room: muc.room,
                nick: muc
                    .nick
                    .filter(|nick| !nick.is_empty())
                    .unwrap_or_else(|| default_nick.clone()),
                password: muc.password,
            })
            .collect();

        Ok(Self {
            listen,
            debug: raw.debug,
            startup_message: non_empty(raw.startup_message),
            format,
            xmpp: XmppConfig {
                gateway: xmpp.gateway,
                user: xmpp.user,
                password: xmpp.password,
                send_notif: xmpp.send_notif,
                status: xmpp.status,
                no_tls: xmpp.no_tls,
                tls_insecure: xmpp.tls_insecure,
                send_muc,
            },
        })
    }
}

impl XmppConfig {
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            gateway: self.gateway.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            no_tls: self.no_tls,
            tls_insecure: self.tls_insecure,
            show: SHOW_CHAT.to_string(),
            status: self.status.clone(),
        }
    }

    pub fn room_joins(&self) -> Vec<RoomJoin> {
        self.send_muc
            .iter()
            .map(|muc| RoomJoin {
                room: muc.room.clone(),
                nick: muc.nick.clone(),
                password: muc.password.clone(),
            })
            .collect()
    }
}
