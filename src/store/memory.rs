//! In-process signaling store
//!
//! Implements the full [`SignalingStore`] contract against process-local
//! state. Backing the test suite is its main job, but it is also the
//! reference for what a production store adapter must guarantee: writes are
//! visible to subscribers before the write resolves, and candidates replay in
//! arrival order.

use super::{
    CandidateDoc, InvitationDoc, InvitationStatus, SessionDoc, SessionPatch, SignalingStore,
    StoreSubscription,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::debug;

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionDoc>,
    session_watchers: HashMap<String, Vec<UnboundedSender<SessionDoc>>>,
    candidates: HashMap<String, Vec<CandidateDoc>>,
    candidate_watchers: HashMap<String, Vec<UnboundedSender<(u64, CandidateDoc)>>>,
    invitations: HashMap<String, InvitationDoc>,
    invitation_watchers: HashMap<String, Vec<UnboundedSender<InvitationDoc>>>,
    incoming_watchers: HashMap<String, Vec<UnboundedSender<(String, InvitationDoc)>>>,
}

/// In-memory [`SignalingStore`] implementation
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of candidates currently recorded for a room (test helper)
    pub fn candidate_count(&self, room_id: &str) -> usize {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.candidates.get(room_id).map_or(0, Vec::len)
    }
}

/// Send to every watcher, pruning the ones whose subscription was dropped
fn notify<T: Clone>(watchers: &mut Vec<UnboundedSender<T>>, value: &T) {
    watchers.retain(|w| w.send(value.clone()).is_ok());
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn create_session(&self, room_id: &str, doc: SessionDoc) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if inner.sessions.contains_key(room_id) {
            return Err(Error::ProtocolViolation(format!(
                "session {room_id} already exists"
            )));
        }
        inner.sessions.insert(room_id.to_string(), doc.clone());
        if let Some(watchers) = inner.session_watchers.get_mut(room_id) {
            notify(watchers, &doc);
        }
        debug!(room_id, "session created");
        Ok(())
    }

    async fn get_session(&self, room_id: &str) -> Result<Option<SessionDoc>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.sessions.get(room_id).cloned())
    }

    async fn update_session(&self, room_id: &str, patch: SessionPatch) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let doc = inner
            .sessions
            .get_mut(room_id)
            .ok_or_else(|| Error::NotFound(format!("session {room_id}")))?;
        patch.apply(doc)?;
        let doc = doc.clone();
        if let Some(watchers) = inner.session_watchers.get_mut(room_id) {
            notify(watchers, &doc);
        }
        Ok(())
    }

    async fn delete_session(&self, room_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.sessions.remove(room_id);
        inner.candidates.remove(room_id);
        inner.session_watchers.remove(room_id);
        inner.candidate_watchers.remove(room_id);
        debug!(room_id, "session deleted");
        Ok(())
    }

    async fn watch_session(&self, room_id: &str) -> Result<StoreSubscription<SessionDoc>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if let Some(doc) = inner.sessions.get(room_id) {
            let _ = tx.send(doc.clone());
        }
        inner
            .session_watchers
            .entry(room_id.to_string())
            .or_default()
            .push(tx);
        Ok(StoreSubscription::new(rx))
    }

    async fn add_candidate(&self, room_id: &str, candidate: CandidateDoc) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let list = inner.candidates.entry(room_id.to_string()).or_default();
        let seq = list.len() as u64;
        list.push(candidate.clone());
        if let Some(watchers) = inner.candidate_watchers.get_mut(room_id) {
            notify(watchers, &(seq, candidate));
        }
        Ok(())
    }

    async fn watch_candidates(
        &self,
        room_id: &str,
    ) -> Result<StoreSubscription<(u64, CandidateDoc)>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("store lock poisoned");
        // Replay existing candidates in arrival order under the same lock that
        // registers the watcher, so no addition is missed or duplicated.
        if let Some(list) = inner.candidates.get(room_id) {
            for (seq, candidate) in list.iter().enumerate() {
                let _ = tx.send((seq as u64, candidate.clone()));
            }
        }
        inner
            .candidate_watchers
            .entry(room_id.to_string())
            .or_default()
            .push(tx);
        Ok(StoreSubscription::new(rx))
    }

    async fn create_invitation(&self, doc: InvitationDoc) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.invitations.insert(id.clone(), doc.clone());
        if let Some(watchers) = inner.incoming_watchers.get_mut(&doc.to_user_id) {
            notify(watchers, &(id.clone(), doc));
        }
        debug!(invitation_id = %id, "invitation created");
        Ok(id)
    }

    async fn get_invitation(&self, invitation_id: &str) -> Result<Option<InvitationDoc>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.invitations.get(invitation_id).cloned())
    }

    async fn set_invitation_status(
        &self,
        invitation_id: &str,
        status: InvitationStatus,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let doc = inner
            .invitations
            .get_mut(invitation_id)
            .ok_or_else(|| Error::NotFound(format!("invitation {invitation_id}")))?;
        doc.status = status;
        let doc = doc.clone();
        if let Some(watchers) = inner.invitation_watchers.get_mut(invitation_id) {
            notify(watchers, &doc);
        }
        Ok(())
    }

    async fn pending_invitations(&self) -> Result<Vec<(String, InvitationDoc)>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .invitations
            .iter()
            .filter(|(_, doc)| doc.status == InvitationStatus::Pending)
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect())
    }

    async fn watch_incoming_invitations(
        &self,
        user_id: &str,
    ) -> Result<StoreSubscription<(String, InvitationDoc)>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("store lock poisoned");
        // Existing pending invitations replay as additions, matching a
        // filtered-collection subscription against a live store.
        for (id, doc) in inner
            .invitations
            .iter()
            .filter(|(_, doc)| doc.to_user_id == user_id && doc.status == InvitationStatus::Pending)
        {
            let _ = tx.send((id.clone(), doc.clone()));
        }
        inner
            .incoming_watchers
            .entry(user_id.to_string())
            .or_default()
            .push(tx);
        Ok(StoreSubscription::new(rx))
    }

    async fn watch_invitation(
        &self,
        invitation_id: &str,
    ) -> Result<StoreSubscription<InvitationDoc>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if let Some(doc) = inner.invitations.get(invitation_id) {
            let _ = tx.send(doc.clone());
        }
        inner
            .invitation_watchers
            .entry(invitation_id.to_string())
            .or_default()
            .push(tx);
        Ok(StoreSubscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SdpKind, SessionDescription, SessionStatus};
    use std::time::{Duration, SystemTime};

    fn candidate(sender: &str, n: u32) -> CandidateDoc {
        CandidateDoc {
            candidate: format!("candidate:{n}"),
            sdp_mline_index: Some(0),
            sdp_mid: Some("0".to_string()),
            sender_id: sender.to_string(),
        }
    }

    fn invitation(from: &str, to: &str, room: &str) -> InvitationDoc {
        let now = SystemTime::now();
        InvitationDoc {
            from_user_id: from.to_string(),
            from_user_name: from.to_uppercase(),
            from_user_phone: None,
            to_user_id: to.to_string(),
            room_id: room.to_string(),
            status: InvitationStatus::Pending,
            created_at: now,
            expires_at: now + Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn test_create_session_twice_fails() {
        let store = MemoryStore::new();
        store
            .create_session("room", SessionDoc::new("alice"))
            .await
            .unwrap();
        let err = store
            .create_session("room", SessionDoc::new("bob"))
            .await
            .unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_update_is_visible_before_write_resolves() {
        let store = MemoryStore::new();
        store
            .create_session("room", SessionDoc::new("alice"))
            .await
            .unwrap();

        let mut sub = store.watch_session("room").await.unwrap();
        // Snapshot of the existing document arrives first
        assert_eq!(sub.try_recv().unwrap().status, SessionStatus::Waiting);

        store
            .update_session(
                "room",
                SessionPatch {
                    status: Some(SessionStatus::Active),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // The write already resolved, so the notification is already queued
        assert_eq!(sub.try_recv().unwrap().status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_update_missing_session_fails() {
        let store = MemoryStore::new();
        let err = store
            .update_session("nope", SessionPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_second_offer_rejected_by_store() {
        let store = MemoryStore::new();
        store
            .create_session("room", SessionDoc::new("alice"))
            .await
            .unwrap();

        let offer = SessionDescription {
            kind: SdpKind::Offer,
            sdp: "v=0".to_string(),
        };
        store
            .update_session(
                "room",
                SessionPatch {
                    offer: Some(offer.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let err = store
            .update_session(
                "room",
                SessionPatch {
                    offer: Some(offer),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_candidates_replay_in_arrival_order() {
        let store = MemoryStore::new();
        for n in 0..3 {
            store
                .add_candidate("room", candidate("alice", n))
                .await
                .unwrap();
        }

        // Subscribe after the fact: all three replay, in order, then live ones
        let mut sub = store.watch_candidates("room").await.unwrap();
        store
            .add_candidate("room", candidate("alice", 3))
            .await
            .unwrap();

        for expected in 0..4u64 {
            let (seq, doc) = sub.try_recv().unwrap();
            assert_eq!(seq, expected);
            assert_eq!(doc.candidate, format!("candidate:{expected}"));
        }
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_incoming_invitations_replay_and_filter() {
        let store = MemoryStore::new();
        store
            .create_invitation(invitation("alice", "bob", "r1"))
            .await
            .unwrap();
        store
            .create_invitation(invitation("alice", "carol", "r2"))
            .await
            .unwrap();

        let mut sub = store.watch_incoming_invitations("bob").await.unwrap();
        let (_, doc) = sub.try_recv().unwrap();
        assert_eq!(doc.room_id, "r1");
        // carol's invitation never shows up on bob's feed
        assert!(sub.try_recv().is_none());

        store
            .create_invitation(invitation("carol", "bob", "r3"))
            .await
            .unwrap();
        let (_, doc) = sub.try_recv().unwrap();
        assert_eq!(doc.room_id, "r3");
    }

    #[tokio::test]
    async fn test_watch_invitation_snapshot_then_changes() {
        let store = MemoryStore::new();
        let id = store
            .create_invitation(invitation("alice", "bob", "r1"))
            .await
            .unwrap();

        let mut sub = store.watch_invitation(&id).await.unwrap();
        assert_eq!(sub.try_recv().unwrap().status, InvitationStatus::Pending);

        store
            .set_invitation_status(&id, InvitationStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(sub.try_recv().unwrap().status, InvitationStatus::Accepted);
    }

    #[tokio::test]
    async fn test_delete_session_clears_candidates() {
        let store = MemoryStore::new();
        store
            .create_session("room", SessionDoc::new("alice"))
            .await
            .unwrap();
        store
            .add_candidate("room", candidate("alice", 0))
            .await
            .unwrap();

        store.delete_session("room").await.unwrap();
        assert!(store.get_session("room").await.unwrap().is_none());
        assert_eq!(store.candidate_count("room"), 0);
    }
}
