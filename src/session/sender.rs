//! Sender loop: sole consumer of the outbound queue.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{AllowList, ChatType, Format, OutboundMessage};
use crate::metrics::Metrics;
use crate::transport::{Outbound, OutgoingChat};

pub(super) struct SenderLoop {
    pub(super) outbound: Arc<dyn Outbound>,
    pub(super) allow_list: Arc<AllowList>,
    pub(super) rooms: Vec<String>,
    pub(super) metrics: Arc<Metrics>,
}

impl SenderLoop {
    /// Deliver queued messages until the queue is closed and drained.
    ///
    /// Cancelling `queue_closed` closes the receiving half: producers are
    /// rejected from then on while already buffered messages are still
    /// delivered. Cancelling `transport_closed` abandons the delivery in
    /// progress and ends the loop.
    pub(super) async fn run(
        self,
        mut queue: mpsc::Receiver<OutboundMessage>,
        queue_closed: CancellationToken,
        transport_closed: CancellationToken,
    ) {
        let mut draining = false;
        loop {
            tokio::select! {
                message = queue.recv() => match message {
                    Some(message) => {
                        if !self.deliver_until(message, &transport_closed).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = queue_closed.cancelled(), if !draining => {
                    queue.close();
                    draining = true;
                }
            }
        }
        debug!("Sender loop finished");
    }

    /// Returns false when the transport went away mid-delivery.
    async fn deliver_until(&self, message: OutboundMessage, transport_closed: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = self.deliver(message) => true,
            () = transport_closed.cancelled() => {
                warn!("Transport closed during delivery, dropping the rest of the queue");
                false
            }
        }
    }

    async fn deliver(&self, message: OutboundMessage) {
        match &message.to {
            Some(to) => {
                self.deliver_one(ChatType::Chat, to, &message.text, message.format)
                    .await;
            }
            None => {
                for to in self.allow_list.iter() {
                    self.deliver_one(ChatType::Chat, to, &message.text, message.format)
                        .await;
                }
                for room in &self.rooms {
                    self.deliver_one(ChatType::GroupChat, room, &message.text, message.format)
                        .await;
                }
            }
        }
    }

    async fn deliver_one(&self, kind: ChatType, to: &str, text: &str, format: Format) {
        self.metrics.record_sent(to, kind, format);
        let chat = OutgoingChat { to, kind, text };
        if let Err(e) = self.outbound.send_chat(&chat, format).await {
            self.metrics.record_delivery_error(to);
            warn!(recipient = %to, chat_type = %kind, error = %e, "Delivery failed");
        }
    }
}
