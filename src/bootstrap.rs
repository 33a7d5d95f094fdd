//! Call establishment flow
//!
//! Glues the invitation coordinator to the negotiation engine: inviting
//! generates the room id up front and watches for the response, accepting
//! joins the invitation's room. Navigation hints flow through the engine's
//! event channel so the embedding UI has a single stream to follow.

use crate::engine::{CallEvent, CallRole, NavigationEvent, NegotiationEngine};
use crate::invite::{Invitation, InvitationCoordinator};
use crate::store::{InvitationStatus, User};
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Connects invitations to sessions
pub struct CallBootstrap {
    engine: Arc<NegotiationEngine>,
    coordinator: Arc<InvitationCoordinator>,
}

impl CallBootstrap {
    pub fn new(engine: Arc<NegotiationEngine>, coordinator: Arc<InvitationCoordinator>) -> Self {
        Self {
            engine,
            coordinator,
        }
    }

    /// Generate an opaque room identifier
    pub fn generate_room_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Invite `target` to a fresh room.
    ///
    /// Returns the room id immediately; when the response lands, a
    /// `Navigation` event fires: `Navigate { is_host: true }` on accept,
    /// `InvitationDeclined` / `InvitationExpired` otherwise.
    pub async fn invite_user(&self, target: &User) -> Result<String> {
        let room_id = Self::generate_room_id();
        let invitation_id = self.coordinator.send_invitation(target, &room_id).await?;

        self.engine.emit(CallEvent::RemoteUser(target.clone()));

        let mut responses = self.coordinator.watch_response(&invitation_id).await?;
        let engine = self.engine.clone();
        let nav_room = room_id.clone();
        tokio::spawn(async move {
            if let Some(status) = responses.recv().await {
                let event = match status {
                    InvitationStatus::Accepted => NavigationEvent::Navigate {
                        room_id: nav_room,
                        is_host: true,
                    },
                    InvitationStatus::Declined => NavigationEvent::InvitationDeclined,
                    InvitationStatus::Expired => NavigationEvent::InvitationExpired,
                    InvitationStatus::Pending => return,
                };
                info!(%invitation_id, ?event, "invitation resolved");
                engine.emit(CallEvent::Navigation(event));
            }
        });

        Ok(room_id)
    }

    /// Accept an incoming invitation and join its room as `user`
    pub async fn join_from_invitation(&self, invitation: &Invitation, user: &User) -> Result<()> {
        let room_id = self
            .coordinator
            .respond(&invitation.id, true)
            .await?
            .unwrap_or_else(|| invitation.room_id.clone());
        self.coordinator.clear_incoming();

        self.engine
            .emit(CallEvent::RemoteUser(invitation.from.clone()));
        self.engine
            .start_session(&room_id, CallRole::Joiner, user)
            .await
    }

    /// Decline an incoming invitation
    pub async fn decline_invitation(&self, invitation: &Invitation) -> Result<()> {
        if let Err(e) = self.coordinator.respond(&invitation.id, false).await {
            warn!(invitation_id = %invitation.id, error = %e, "decline failed");
            self.coordinator.clear_incoming();
            return Err(e);
        }
        self.coordinator.clear_incoming();
        Ok(())
    }
}
