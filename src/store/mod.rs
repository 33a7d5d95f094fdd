//! Signaling store seam
//!
//! The two peers cannot reach each other before negotiation completes, so all
//! setup metadata travels through a document-oriented store: one session
//! document per call room, an append-only candidate sub-collection, and one
//! document per invitation. [`SignalingStore`] is the seam a production store
//! adapter implements; [`MemoryStore`] is the in-process reference
//! implementation backing the test suite.
//!
//! Ordering contract: every mutating method resolves only after the change is
//! visible to subscribers, and candidate replay order is the store-assigned
//! arrival order, never sender-local order.

pub mod docs;
pub mod memory;

pub use docs::{
    CandidateDoc, InvitationDoc, InvitationStatus, SdpKind, SessionDescription, SessionDoc,
    SessionPatch, SessionStatus, User,
};
pub use memory::MemoryStore;

use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A live change feed from the store.
///
/// Dropping (or closing) the subscription detaches it; the store prunes
/// disconnected subscribers on the next notification.
#[derive(Debug)]
pub struct StoreSubscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> StoreSubscription<T> {
    /// Wrap a receiver handed out by a store implementation
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx }
    }

    /// Receive the next change notification, or `None` once detached
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Receive without waiting; `None` when no notification is queued
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving further notifications
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Document store used as the out-of-band signaling channel
#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Create the session document for a room.
    ///
    /// Fails with `ProtocolViolation` if the room already exists.
    async fn create_session(&self, room_id: &str, doc: SessionDoc) -> Result<()>;

    /// Read a session document, `None` if the room does not exist
    async fn get_session(&self, room_id: &str) -> Result<Option<SessionDoc>>;

    /// Apply a sparse update to a session document.
    ///
    /// Session invariants (forward-only status, at-most-one offer/answer) are
    /// enforced here; fails with `NotFound` if the room does not exist.
    async fn update_session(&self, room_id: &str, patch: SessionPatch) -> Result<()>;

    /// Delete a session document and its candidate sub-collection
    async fn delete_session(&self, room_id: &str) -> Result<()>;

    /// Subscribe to a session document: the current snapshot (if the room
    /// exists) followed by every subsequent modification
    async fn watch_session(&self, room_id: &str) -> Result<StoreSubscription<SessionDoc>>;

    /// Append a connectivity candidate to a room's sub-collection.
    ///
    /// The store assigns the arrival sequence used for replay ordering.
    async fn add_candidate(&self, room_id: &str, candidate: CandidateDoc) -> Result<()>;

    /// Subscribe to a room's candidates: all previously-appended candidates
    /// replayed in arrival order, then live additions
    async fn watch_candidates(
        &self,
        room_id: &str,
    ) -> Result<StoreSubscription<(u64, CandidateDoc)>>;

    /// Create an invitation document, returning its store-assigned id
    async fn create_invitation(&self, doc: InvitationDoc) -> Result<String>;

    /// Read an invitation, `None` if it does not exist
    async fn get_invitation(&self, invitation_id: &str) -> Result<Option<InvitationDoc>>;

    /// Overwrite an invitation's status.
    ///
    /// The store does not guard terminal statuses; callers that need the
    /// pending-only transition guarantee enforce it before writing.
    async fn set_invitation_status(
        &self,
        invitation_id: &str,
        status: InvitationStatus,
    ) -> Result<()>;

    /// List all currently-pending invitations (for the startup expiry sweep)
    async fn pending_invitations(&self) -> Result<Vec<(String, InvitationDoc)>>;

    /// Subscribe to pending invitations addressed to a user: existing pending
    /// documents replayed as additions, then live additions
    async fn watch_incoming_invitations(
        &self,
        user_id: &str,
    ) -> Result<StoreSubscription<(String, InvitationDoc)>>;

    /// Subscribe to a single invitation document: the current snapshot (if it
    /// exists) followed by every status change. Level-triggered; a snapshot
    /// may redeliver an already-seen terminal status.
    async fn watch_invitation(
        &self,
        invitation_id: &str,
    ) -> Result<StoreSubscription<InvitationDoc>>;
}
