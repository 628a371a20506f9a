//! Receiver loop: reads inbound stanzas and routes them.

use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{ChatType, FatalHook, Session, bare_jid};
use crate::session::AllowList;
use crate::transport::{Inbound, Presence, ReadErrorAction, Stanza, classify_read_error};

/// Pause between retries after a transient read error.
pub(super) const RECV_BACKOFF: Duration = Duration::from_secs(1);

/// Consecutive transient read errors tolerated before giving up.
pub(super) const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Where an inbound stanza goes.
#[derive(Debug, PartialEq)]
pub(super) enum Route<'a> {
    Command { sender: &'a str, text: &'a str },
    Presence(&'a Presence),
    Drop(&'static str),
}

/// Classify a stanza. Only non-empty one-to-one chats from allow-listed
/// senders reach the command interpreter.
pub(super) fn route<'a>(stanza: &'a Stanza, allow_list: &AllowList) -> Route<'a> {
    match stanza {
        Stanza::Chat(chat) => match chat.kind.parse::<ChatType>() {
            Ok(ChatType::Chat) => {
                if chat.text.is_empty() {
                    return Route::Drop("empty chat");
                }
                let sender = bare_jid(&chat.remote);
                if allow_list.contains(sender) {
                    Route::Command {
                        sender,
                        text: &chat.text,
                    }
                } else {
                    Route::Drop("unknown sender")
                }
            }
            Ok(ChatType::GroupChat) => Route::Drop("group chat"),
            Err(_) => Route::Drop("unknown chat type"),
        },
        Stanza::Presence(presence) => Route::Presence(presence),
    }
}

pub(super) async fn run(session: Session, mut inbound: Box<dyn Inbound>, on_fatal: FatalHook) {
    let mut consecutive_errors = 0u32;
    loop {
        let stanza = match inbound.recv().await {
            Ok(stanza) => {
                consecutive_errors = 0;
                stanza
            }
            Err(e) => {
                if session.is_closed() {
                    debug!(error = %e, "Session closed, receiver stopping");
                    return;
                }
                match classify_read_error(&e) {
                    ReadErrorAction::EndOfStream => {
                        info!("Remote closed the stream");
                        session.close().await;
                        return;
                    }
                    ReadErrorAction::Transient => {
                        consecutive_errors += 1;
                        if consecutive_errors > MAX_CONSECUTIVE_ERRORS {
                            error!(errors = consecutive_errors, error = %e, "Receive errors persist, giving up");
                            // The owner learns the cause before the close hook fires.
                            on_fatal(&e);
                            session.close().await;
                            return;
                        }
                        warn!(attempt = consecutive_errors, error = %e, "Receive failed, retrying");
                        tokio::time::sleep(RECV_BACKOFF).await;
                        continue;
                    }
                }
            }
        };

        debug!(stanza = ?stanza, "Stanza received");
        match route(&stanza, &session.inner.allow_list) {
            Route::Command { sender, text } => session.handle_command(sender, text).await,
            Route::Presence(presence) => session.handle_presence(presence).await,
            Route::Drop(reason) => debug!(reason, stanza = ?stanza, "Dropping stanza"),
        }
    }
}
