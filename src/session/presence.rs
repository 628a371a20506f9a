//! Presence handling: subscription gate and presence re-assertion.

use tracing::{debug, info, trace, warn};

use super::{Session, bare_jid};
use crate::transport::{Presence, PresenceKind, PresenceUpdate, SHOW_CHAT};

impl Session {
    pub(super) async fn handle_presence(&self, presence: &Presence) {
        let outbound = &self.inner.outbound;
        let from = presence.from.as_str();

        match &presence.kind {
            PresenceKind::Subscribe => {
                if self.inner.allow_list.contains(bare_jid(from)) {
                    match outbound.approve_subscription(from).await {
                        Ok(()) => debug!(from = %from, "Approved subscription"),
                        Err(e) => warn!(from = %from, error = %e, "Failed to approve subscription"),
                    }
                } else {
                    match outbound.revoke_subscription(from).await {
                        Ok(()) => debug!(from = %from, "Revoked subscription"),
                        Err(e) => warn!(from = %from, error = %e, "Failed to revoke subscription"),
                    }
                }
            }
            PresenceKind::Unavailable if from == outbound.jid() => {
                // Something external marked us offline.
                info!("Presence forced unavailable, re-asserting");
                let update = PresenceUpdate::Available {
                    show: SHOW_CHAT.to_string(),
                    status: self.inner.status.clone(),
                };
                if let Err(e) = outbound.send_presence(&update).await {
                    warn!(error = %e, "Failed to re-assert presence");
                }
            }
            PresenceKind::Unavailable => debug!(from = %from, "Contact went unavailable"),
            PresenceKind::Error => info!(from = %from, "Presence error"),
            PresenceKind::Available => trace!(from = %from, "Contact available"),
            PresenceKind::Other(kind) => debug!(from = %from, kind = %kind, "Unhandled presence"),
        }
    }
}
