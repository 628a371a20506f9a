//! Chat session manager.
//!
//! A [`Session`] owns one connected transport and runs two background
//! tasks for its whole lifetime:
//!
//! - the sender loop, sole consumer of the bounded outbound queue, which
//!   delivers one message at a time in arrival order;
//! - the receiver loop, which reads inbound stanzas and routes them to the
//!   command interpreter or the presence handler.
//!
//! Producers (`send`, `send_to`) block when the queue is full and are
//! released with [`SessionError::Closed`] once the session closes. `close`
//! tears the session down exactly once no matter how many callers race on
//! it, and never waits on a stalled transport for longer than
//! [`CLOSE_TIMEOUT`] per step.

mod allow_list;
mod commands;
mod message;
mod presence;
mod receiver;
mod sender;

pub use allow_list::{AllowList, bare_jid};
pub use message::{ChatType, Format, OutboundMessage, UnknownFormat};

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::config::Config;
use crate::error::{SessionError, SessionResult};
use crate::metrics::{Metrics, MetricsSource, SessionInfo};
use crate::telemetry::spans;
use crate::transport::{Connection, Connector, Outbound, PresenceUpdate, RoomJoin, TransportError};
use sender::SenderLoop;

/// Capacity of the outbound queue. Small on purpose: a stalled transport
/// must throttle producers rather than buffer.
const OUTBOUND_QUEUE_SIZE: usize = 16;

/// Upper bound for each transport step of the teardown.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Status text of the unavailable presence sent on close.
pub const CLOSE_STATUS: &str = "No monitoring";

/// Invoked once after teardown, e.g. to stop the HTTP listener.
pub type ShutdownHook = Box<dyn FnOnce() + Send>;

/// Invoked when receive errors persist past the retry threshold, before
/// the session closes.
pub type FatalHook = Box<dyn Fn(&TransportError) + Send + Sync>;

/// Collaborators handed to a session at construction.
pub struct SessionContext {
    pub metrics: Arc<Metrics>,
    /// Provider for the `metrics` chat command.
    pub snapshot: Arc<dyn MetricsSource>,
    pub on_close: ShutdownHook,
    pub on_fatal: FatalHook,
}

/// Handle to a running session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    outbound: Arc<dyn Outbound>,
    queue: mpsc::Sender<OutboundMessage>,
    queue_closed: CancellationToken,
    /// Fired once the transport is being shut; aborts an in-flight delivery.
    transport_closed: CancellationToken,
    allow_list: Arc<AllowList>,
    /// Configured presence status text, re-asserted when forced offline.
    status: String,
    closed: AtomicBool,
    metrics: Arc<Metrics>,
    snapshot: Arc<dyn MetricsSource>,
    info: SessionInfo,
    on_close: Mutex<Option<ShutdownHook>>,
}

async fn join_rooms(outbound: &dyn Outbound, joins: &[RoomJoin]) -> SessionResult<Vec<String>> {
    let mut rooms = Vec::with_capacity(joins.len());
    for join in joins {
        outbound.join_room(join).await.map_err(|source| SessionError::Join {
            room: join.room.clone(),
            source,
        })?;
        info!(room = %join.room, nick = %join.nick, protected = join.password.is_some(), "Joined room");
        rooms.push(join.room.clone());
    }
    Ok(rooms)
}

impl Session {
    /// Connect, join every configured room and start both loops.
    ///
    /// Any failure after the handshake closes the transport before the
    /// error is returned; no partially built session survives.
    pub async fn connect(
        connector: &dyn Connector,
        config: &Config,
        ctx: SessionContext,
    ) -> SessionResult<Self> {
        let xmpp = &config.xmpp;
        info!(user = %xmpp.user, gateway = %xmpp.gateway, "Connecting to the XMPP account");

        let Connection { inbound, outbound } = connector
            .connect(&xmpp.connect_options())
            .await
            .map_err(SessionError::Connect)?;

        let prepared = async {
            let rooms = join_rooms(outbound.as_ref(), &xmpp.room_joins()).await?;
            let info = ctx
                .metrics
                .register_session(outbound.jid(), outbound.is_encrypted())?;
            Ok::<_, SessionError>((rooms, info))
        }
        .await;
        let (rooms, info) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                if let Err(close_err) = outbound.close().await {
                    warn!(error = %close_err, "Failed to close transport after setup error");
                }
                return Err(e);
            }
        };

        let (queue, queue_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let queue_closed = CancellationToken::new();
        let transport_closed = CancellationToken::new();
        let allow_list = Arc::new(AllowList::new(xmpp.send_notif.clone()));
        if allow_list.is_empty() && rooms.is_empty() {
            warn!("No recipients or rooms configured, broadcasts will go nowhere");
        }
        let jid = outbound.jid().to_string();

        let session = Self {
            inner: Arc::new(Inner {
                outbound: Arc::clone(&outbound),
                queue,
                queue_closed: queue_closed.clone(),
                transport_closed: transport_closed.clone(),
                allow_list: Arc::clone(&allow_list),
                status: xmpp.status.clone(),
                closed: AtomicBool::new(false),
                metrics: Arc::clone(&ctx.metrics),
                snapshot: ctx.snapshot,
                info,
                on_close: Mutex::new(Some(ctx.on_close)),
            }),
        };

        let (allow_list_len, room_count) = (allow_list.len(), rooms.len());
        let sender = SenderLoop {
            outbound,
            allow_list,
            rooms,
            metrics: ctx.metrics,
        };
        tokio::spawn(
            sender
                .run(queue_rx, queue_closed, transport_closed)
                .instrument(spans::session(&jid, "sender")),
        );
        tokio::spawn(
            receiver::run(session.clone(), inbound, ctx.on_fatal)
                .instrument(spans::session(&jid, "receiver")),
        );
        info!(jid = %jid, recipients = allow_list_len, rooms = room_count, "Session started");

        if let Some(message) = &config.startup_message
            && let Err(e) = session.send(message.as_str(), config.format).await
        {
            warn!(error = %e, "Could not queue startup message");
        }
        Ok(session)
    }

    /// Queue a broadcast to every allow-listed correspondent and every room.
    ///
    /// Empty text is a no-op. Waits while the queue is full.
    pub async fn send(&self, text: impl Into<String>, format: Format) -> SessionResult<()> {
        let text = text.into();
        if text.is_empty() {
            return Ok(());
        }
        self.enqueue(OutboundMessage::broadcast(text, format)).await
    }

    /// Queue a plain-text message to a single recipient.
    pub async fn send_to(&self, to: &str, text: impl Into<String>) -> SessionResult<()> {
        let text = text.into();
        if text.is_empty() {
            return Ok(());
        }
        self.enqueue(OutboundMessage::direct(to, text)).await
    }

    async fn enqueue(&self, message: OutboundMessage) -> SessionResult<()> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        tokio::select! {
            sent = self.inner.queue.send(message) => sent.map_err(|_| SessionError::Closed),
            _ = self.inner.queue_closed.cancelled() => Err(SessionError::Closed),
        }
    }

    /// Tear the session down. Only the first call does any work.
    ///
    /// Failures while announcing unavailability or closing the transport
    /// are logged; the shutdown hook always runs.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!("Session already closing");
            return;
        }
        info!("Closing session");

        self.inner.metrics.unregister_session(&self.inner.info);
        self.inner.queue_closed.cancel();

        let unavailable = PresenceUpdate::Unavailable {
            status: CLOSE_STATUS.to_string(),
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, self.inner.outbound.send_presence(&unavailable)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to announce unavailability"),
            Err(_) => warn!("Timed out announcing unavailability"),
        }

        // Release the writer if a delivery is stuck on the transport.
        self.inner.transport_closed.cancel();
        match tokio::time::timeout(CLOSE_TIMEOUT, self.inner.outbound.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to close transport"),
            Err(_) => warn!("Timed out closing transport"),
        }

        let hook = self.inner.on_close.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Full local address.
    pub fn jid(&self) -> &str {
        self.inner.outbound.jid()
    }
}
