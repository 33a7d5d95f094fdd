//! Invitation coordination
//!
//! One party invites a specific other party into a call room. The invitation
//! document carries a pre-generated room id; accepting hands that room id to
//! the negotiation side. Status moves pending -> accepted/declined/expired
//! exactly once, by the recipient's response or by expiry (a startup sweep
//! plus a lazy check on first observation).

use crate::store::{InvitationDoc, InvitationStatus, SignalingStore, User};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An incoming invitation as surfaced to the recipient
#[derive(Debug, Clone, PartialEq)]
pub struct Invitation {
    /// Store-assigned invitation id
    pub id: String,
    /// The inviting party
    pub from: User,
    /// Target call room
    pub room_id: String,
    /// Absolute expiry time
    pub expires_at: SystemTime,
}

/// Manages invitation documents and their status transitions
pub struct InvitationCoordinator {
    store: Arc<dyn SignalingStore>,
    ttl: Duration,
    user: RwLock<Option<User>>,
    /// The recipient's single "current incoming invitation" slot: the latest
    /// observed pending invitation replaces any prior one.
    incoming_tx: Arc<watch::Sender<Option<Invitation>>>,
    incoming_task: Mutex<Option<JoinHandle<()>>>,
}

impl InvitationCoordinator {
    /// Create a coordinator against a store, with the configured TTL
    pub fn new(store: Arc<dyn SignalingStore>, ttl: Duration) -> Self {
        let (incoming_tx, _) = watch::channel(None);
        Self {
            store,
            ttl,
            user: RwLock::new(None),
            incoming_tx: Arc::new(incoming_tx),
            incoming_task: Mutex::new(None),
        }
    }

    /// Supply the authenticated local identity
    pub async fn set_user(&self, user: User) {
        *self.user.write().await = Some(user);
    }

    /// The authenticated local identity, if one was supplied
    pub async fn current_user(&self) -> Option<User> {
        self.user.read().await.clone()
    }

    async fn require_user(&self, operation: &str) -> Result<User> {
        self.user
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Unauthenticated(format!("{operation} requires a signed-in user")))
    }

    /// Write a pending invitation for `to_user` targeting `room_id`.
    ///
    /// Returns the store-assigned invitation id. The document becomes visible
    /// to the recipient's subscription within one store round trip.
    pub async fn send_invitation(&self, to_user: &User, room_id: &str) -> Result<String> {
        let sender = self.require_user("send_invitation").await?;
        let now = SystemTime::now();

        let doc = InvitationDoc {
            from_user_id: sender.id,
            from_user_name: sender.display_name,
            from_user_phone: sender.phone,
            to_user_id: to_user.id.clone(),
            room_id: room_id.to_string(),
            status: InvitationStatus::Pending,
            created_at: now,
            expires_at: now + self.ttl,
        };

        let invitation_id = self.store.create_invitation(doc).await?;
        info!(%invitation_id, room_id, to = %to_user.id, "invitation sent");
        Ok(invitation_id)
    }

    /// Watch for invitations addressed to the local user.
    ///
    /// Restartable; each call re-subscribes from the store and replaces any
    /// prior watch task. Invitations already past their expiry are
    /// transitioned to expired instead of being surfaced.
    pub async fn watch_incoming(&self) -> Result<watch::Receiver<Option<Invitation>>> {
        let user = self.require_user("watch_incoming").await?;
        let mut sub = self.store.watch_incoming_invitations(&user.id).await?;

        // Subscribe before the forwarding task starts so its first send is
        // observed as a change.
        let rx = self.incoming_tx.subscribe();

        let store = self.store.clone();
        let tx = self.incoming_tx.clone();
        let task = tokio::spawn(async move {
            while let Some((id, doc)) = sub.recv().await {
                if doc.is_expired_at(SystemTime::now()) {
                    debug!(invitation_id = %id, "expiring stale invitation on observation");
                    if let Err(e) = store
                        .set_invitation_status(&id, InvitationStatus::Expired)
                        .await
                    {
                        warn!(invitation_id = %id, error = %e, "failed to expire invitation");
                    }
                    continue;
                }

                let invitation = Invitation {
                    id,
                    from: User {
                        id: doc.from_user_id,
                        display_name: doc.from_user_name,
                        phone: doc.from_user_phone,
                    },
                    room_id: doc.room_id,
                    expires_at: doc.expires_at,
                };
                if tx.send(Some(invitation)).is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.incoming_task.lock().await.replace(task) {
            previous.abort();
        }

        Ok(rx)
    }

    /// Reset the current-incoming-invitation slot (the UI dismissed it)
    pub fn clear_incoming(&self) {
        self.incoming_tx.send_replace(None);
    }

    /// Record the recipient's response.
    ///
    /// Returns the invitation's room id on accept (`None` if the re-read
    /// fails or the document vanished). Responding to an already-resolved
    /// invitation fails with `ProtocolViolation`.
    pub async fn respond(&self, invitation_id: &str, accepted: bool) -> Result<Option<String>> {
        let doc = self
            .store
            .get_invitation(invitation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("invitation {invitation_id}")))?;

        if doc.status.is_terminal() {
            return Err(Error::ProtocolViolation(format!(
                "invitation {invitation_id} already {:?}",
                doc.status
            )));
        }

        let status = if accepted {
            InvitationStatus::Accepted
        } else {
            InvitationStatus::Declined
        };
        self.store
            .set_invitation_status(invitation_id, status)
            .await?;
        info!(%invitation_id, ?status, "invitation response recorded");

        if !accepted {
            return Ok(None);
        }

        match self.store.get_invitation(invitation_id).await {
            Ok(Some(doc)) => Ok(Some(doc.room_id)),
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(%invitation_id, error = %e, "re-read after accept failed");
                Ok(None)
            }
        }
    }

    /// Watch the status of an invitation the local user sent.
    ///
    /// Level-triggered: a store snapshot may redeliver a terminal status the
    /// consumer has already seen.
    pub async fn watch_response(
        &self,
        invitation_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<InvitationStatus>> {
        let mut sub = self.store.watch_invitation(invitation_id).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(doc) = sub.recv().await {
                if doc.status.is_terminal() && tx.send(doc.status).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    /// Transition every pending invitation whose TTL elapsed to expired.
    ///
    /// Run once at startup; the lazy check in `watch_incoming` covers
    /// invitations created and expiring between sweeps.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let pending = self.store.pending_invitations().await?;
        let now = SystemTime::now();
        let mut swept = 0usize;

        for (id, doc) in pending {
            if doc.is_expired_at(now) {
                match self
                    .store
                    .set_invitation_status(&id, InvitationStatus::Expired)
                    .await
                {
                    Ok(()) => swept += 1,
                    Err(e) => warn!(invitation_id = %id, error = %e, "sweep failed"),
                }
            }
        }

        info!(swept, "expired invitation sweep complete");
        Ok(swept)
    }
}

impl Drop for InvitationCoordinator {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.incoming_task.try_lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn coordinator() -> InvitationCoordinator {
        InvitationCoordinator::new(Arc::new(MemoryStore::new()), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_send_requires_identity() {
        let coord = coordinator();
        let err = coord
            .send_invitation(&User::new("bob", "Bob"), "room")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_watch_incoming_requires_identity() {
        let coord = coordinator();
        assert!(coord.watch_incoming().await.is_err());
    }

    #[tokio::test]
    async fn test_respond_to_missing_invitation() {
        let coord = coordinator();
        let err = coord.respond("missing", true).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_double_respond_rejected() {
        let coord = coordinator();
        coord.set_user(User::new("alice", "Alice")).await;

        let id = coord
            .send_invitation(&User::new("bob", "Bob"), "room")
            .await
            .unwrap();
        coord.respond(&id, false).await.unwrap();

        let err = coord.respond(&id, true).await.unwrap_err();
        assert!(err.is_protocol_violation());
    }
}
