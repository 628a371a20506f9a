//! In-memory transport used by the session tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{
    ConnectOptions, Connection, Connector, Inbound, Outbound, OutgoingChat, PresenceUpdate,
    RoomJoin, Stanza, TransportError,
};
use crate::session::{ChatType, Format};

/// Everything the session asked the transport to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Chat {
        to: String,
        kind: ChatType,
        text: String,
        format: Format,
    },
    Presence(PresenceUpdate),
    Approve(String),
    Revoke(String),
    Join(RoomJoin),
    Close,
}

pub struct MockOutbound {
    jid: String,
    actions: Mutex<Vec<Action>>,
    failing_join: Option<String>,
    failing_chat: Option<String>,
    stalling_chat: bool,
    stalling_presence: bool,
}

impl MockOutbound {
    pub fn new(jid: &str) -> Self {
        Self {
            jid: jid.to_string(),
            actions: Mutex::new(Vec::new()),
            failing_join: None,
            failing_chat: None,
            stalling_chat: false,
            stalling_presence: false,
        }
    }

    /// Refuse to join `room`.
    pub fn failing_join(mut self, room: &str) -> Self {
        self.failing_join = Some(room.to_string());
        self
    }

    /// Fail every chat addressed to `to`.
    pub fn failing_chat(mut self, to: &str) -> Self {
        self.failing_chat = Some(to.to_string());
        self
    }

    /// Never complete a chat write, like a peer that stopped reading.
    pub fn stalling_chat(mut self) -> Self {
        self.stalling_chat = true;
        self
    }

    /// Never complete a presence write.
    pub fn stalling_presence(mut self) -> Self {
        self.stalling_presence = true;
        self
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().clone()
    }

    /// Chats sent so far as `(to, text)` pairs.
    pub fn chats(&self) -> Vec<(String, String)> {
        self.actions
            .lock()
            .iter()
            .filter_map(|action| match action {
                Action::Chat { to, text, .. } => Some((to.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, action: Action) {
        self.actions.lock().push(action);
    }
}

#[async_trait]
impl Outbound for MockOutbound {
    async fn send_chat(&self, chat: &OutgoingChat<'_>, format: Format) -> Result<(), TransportError> {
        self.record(Action::Chat {
            to: chat.to.to_string(),
            kind: chat.kind,
            text: chat.text.to_string(),
            format,
        });
        if self.stalling_chat {
            std::future::pending::<()>().await;
        }
        if self.failing_chat.as_deref() == Some(chat.to) {
            return Err(TransportError::Remote("recipient unavailable".to_string()));
        }
        Ok(())
    }

    async fn send_presence(&self, update: &PresenceUpdate) -> Result<(), TransportError> {
        self.record(Action::Presence(update.clone()));
        if self.stalling_presence {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn approve_subscription(&self, jid: &str) -> Result<(), TransportError> {
        self.record(Action::Approve(jid.to_string()));
        Ok(())
    }

    async fn revoke_subscription(&self, jid: &str) -> Result<(), TransportError> {
        self.record(Action::Revoke(jid.to_string()));
        Ok(())
    }

    async fn join_room(&self, join: &RoomJoin) -> Result<(), TransportError> {
        self.record(Action::Join(join.clone()));
        if self.failing_join.as_deref() == Some(join.room.as_str()) {
            return Err(TransportError::Remote("forbidden".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.record(Action::Close);
        Ok(())
    }

    fn jid(&self) -> &str {
        &self.jid
    }

    fn is_encrypted(&self) -> bool {
        true
    }
}

/// Inbound half fed from a test script. Once the script is exhausted the
/// reader blocks forever, like an idle connection.
pub struct MockInbound {
    events: mpsc::UnboundedReceiver<Result<Stanza, TransportError>>,
}

#[async_trait]
impl Inbound for MockInbound {
    async fn recv(&mut self) -> Result<Stanza, TransportError> {
        match self.events.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }
}

/// Test-side controls of a mock connection.
pub struct MockHandle {
    pub events: mpsc::UnboundedSender<Result<Stanza, TransportError>>,
    pub outbound: Arc<MockOutbound>,
}

impl MockHandle {
    pub fn push(&self, event: Result<Stanza, TransportError>) {
        // The receiver may already be gone after a close.
        let _ = self.events.send(event);
    }
}

/// Hands out a single prepared connection, or refuses.
pub struct MockConnector {
    connection: Mutex<Option<Connection>>,
}

impl MockConnector {
    pub fn new(outbound: MockOutbound) -> (Self, MockHandle) {
        let (events, rx) = mpsc::unbounded_channel();
        let outbound = Arc::new(outbound);
        let connection = Connection {
            inbound: Box::new(MockInbound { events: rx }),
            outbound: Arc::clone(&outbound) as Arc<dyn Outbound>,
        };
        let connector = Self {
            connection: Mutex::new(Some(connection)),
        };
        (connector, MockHandle { events, outbound })
    }

    pub fn refusing() -> Self {
        Self {
            connection: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _options: &ConnectOptions) -> Result<Connection, TransportError> {
        self.connection
            .lock()
            .take()
            .ok_or_else(|| TransportError::Auth("not-authorized".to_string()))
    }
}
