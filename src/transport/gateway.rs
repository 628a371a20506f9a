//! Stanza-gateway transport.
//!
//! Speaks newline-delimited JSON frames to a gateway that owns the actual
//! XMPP stream. Each frame carries one stanza and is tagged by `"op"`.
//! The connection opens with an `auth` frame and is usable once the
//! gateway answers `ready` with the bound address.
//!
//! The gateway is an external component running next to the relay; its
//! address is always configured explicitly.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info};

use super::stream::GatewayStream;
use super::tls::upgrade_to_tls;
use super::{
    Chat, ConnectOptions, Connection, Connector, Inbound, Outbound, OutgoingChat, Presence,
    PresenceKind, PresenceUpdate, RoomJoin, Stanza, TransportError,
};
use crate::session::Format;

/// Upper bound for a single frame, generous enough for large alert bodies.
const MAX_FRAME_LEN: usize = 256 * 1024;

type Lines = Framed<GatewayStream, LinesCodec>;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Auth {
        jid: &'a str,
        password: &'a str,
        show: &'a str,
        status: &'a str,
    },
    Message {
        to: &'a str,
        #[serde(rename = "type")]
        kind: &'a str,
        body: &'a str,
        html: bool,
    },
    Presence {
        #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
        kind: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        show: Option<&'a str>,
        status: &'a str,
    },
    Subscribed {
        to: &'a str,
    },
    Unsubscribed {
        to: &'a str,
    },
    Join {
        room: &'a str,
        nick: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<&'a str>,
        history: u32,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ServerFrame {
    Ready {
        jid: String,
    },
    Error {
        reason: String,
    },
    Message {
        from: String,
        #[serde(rename = "type", default)]
        kind: String,
        #[serde(default)]
        body: String,
    },
    Presence {
        from: String,
        #[serde(rename = "type", default)]
        kind: String,
    },
}

/// Gateway address, `host:port`. IPv6 hosts are bracketed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(addr: &str) -> Result<Self, Self::Err> {
        let invalid = || TransportError::InvalidAddress(addr.to_string());
        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        let host = match host.strip_prefix('[') {
            Some(bracketed) => bracketed.strip_suffix(']').ok_or_else(invalid)?,
            None if host.contains(':') => return Err(invalid()),
            None => host,
        };
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Connects to a stanza gateway over TCP, optionally wrapped in TLS.
#[derive(Debug, Default, Clone, Copy)]
pub struct GatewayConnector;

#[async_trait]
impl Connector for GatewayConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Connection, TransportError> {
        let endpoint = options.gateway.parse::<Endpoint>()?;
        debug!(gateway = %endpoint, tls = !options.no_tls, "Opening gateway connection");
        let stream = open(&endpoint, options).await?;
        handshake(stream, options).await
    }
}

async fn open(endpoint: &Endpoint, options: &ConnectOptions) -> Result<GatewayStream, TransportError> {
    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
    tcp.set_nodelay(true)?;
    if options.no_tls {
        return Ok(GatewayStream::Plain(tcp));
    }
    let tls = upgrade_to_tls(tcp, &endpoint.host, !options.tls_insecure).await?;
    Ok(GatewayStream::Tls(Box::new(tls)))
}

async fn handshake(stream: GatewayStream, options: &ConnectOptions) -> Result<Connection, TransportError> {
    let encrypted = stream.is_tls();
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));

    let auth = ClientFrame::Auth {
        jid: &options.user,
        password: &options.password,
        show: &options.show,
        status: &options.status,
    };
    framed.send(serde_json::to_string(&auth)?).await?;

    let jid = loop {
        let line = match framed.next().await {
            Some(line) => line?,
            None => return Err(TransportError::Closed),
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ServerFrame>(&line)? {
            ServerFrame::Ready { jid } => break jid,
            ServerFrame::Error { reason } => return Err(TransportError::Auth(reason)),
            other => {
                return Err(TransportError::Auth(format!(
                    "unexpected frame before ready: {other:?}"
                )));
            }
        }
    };
    info!(jid = %jid, encrypted, "Gateway session established");

    let (sink, stream) = framed.split();
    Ok(Connection {
        inbound: Box::new(GatewayReader { stream }),
        outbound: Arc::new(GatewayWriter {
            sink: Mutex::new(sink),
            jid,
            encrypted,
        }),
    })
}

pub struct GatewayReader {
    stream: SplitStream<Lines>,
}

#[async_trait]
impl Inbound for GatewayReader {
    async fn recv(&mut self) -> Result<Stanza, TransportError> {
        loop {
            let line = match self.stream.next().await {
                Some(line) => line?,
                None => return Err(TransportError::Closed),
            };
            // Blank lines are keepalives.
            if line.trim().is_empty() {
                continue;
            }
            return match serde_json::from_str::<ServerFrame>(&line)? {
                ServerFrame::Message { from, kind, body } => Ok(Stanza::Chat(Chat {
                    remote: from,
                    kind,
                    text: body,
                })),
                ServerFrame::Presence { from, kind } => Ok(Stanza::Presence(Presence {
                    from,
                    kind: PresenceKind::from(kind.as_str()),
                })),
                ServerFrame::Error { reason } => Err(TransportError::Remote(reason)),
                ServerFrame::Ready { jid } => {
                    debug!(jid = %jid, "Ignoring repeated ready frame");
                    continue;
                }
            };
        }
    }
}

pub struct GatewayWriter {
    sink: Mutex<SplitSink<Lines, String>>,
    jid: String,
    encrypted: bool,
}

impl GatewayWriter {
    async fn write(&self, frame: &ClientFrame<'_>) -> Result<(), TransportError> {
        let line = serde_json::to_string(frame)?;
        self.sink.lock().await.send(line).await?;
        Ok(())
    }
}

#[async_trait]
impl Outbound for GatewayWriter {
    async fn send_chat(&self, chat: &OutgoingChat<'_>, format: Format) -> Result<(), TransportError> {
        self.write(&ClientFrame::Message {
            to: chat.to,
            kind: chat.kind.as_str(),
            body: chat.text,
            html: matches!(format, Format::Html),
        })
        .await
    }

    async fn send_presence(&self, update: &PresenceUpdate) -> Result<(), TransportError> {
        let frame = match update {
            PresenceUpdate::Available { show, status } => ClientFrame::Presence {
                kind: None,
                show: Some(show.as_str()),
                status,
            },
            PresenceUpdate::Unavailable { status } => ClientFrame::Presence {
                kind: Some("unavailable"),
                show: None,
                status,
            },
        };
        self.write(&frame).await
    }

    async fn approve_subscription(&self, jid: &str) -> Result<(), TransportError> {
        self.write(&ClientFrame::Subscribed { to: jid }).await
    }

    async fn revoke_subscription(&self, jid: &str) -> Result<(), TransportError> {
        self.write(&ClientFrame::Unsubscribed { to: jid }).await
    }

    async fn join_room(&self, join: &RoomJoin) -> Result<(), TransportError> {
        self.write(&ClientFrame::Join {
            room: &join.room,
            nick: &join.nick,
            password: join.password.as_deref(),
            history: 0,
        })
        .await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink.lock().await.close().await?;
        Ok(())
    }

    fn jid(&self) -> &str {
        &self.jid
    }

    fn is_encrypted(&self) -> bool {
        self.encrypted
    }
}
