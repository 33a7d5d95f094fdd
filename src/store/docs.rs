//! Document types ferried through the signaling store

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Identity supplied by the authentication collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable user identifier
    pub id: String,
    /// Human-readable display name
    pub display_name: String,
    /// Optional phone number carried into invitations
    pub phone: Option<String>,
}

impl User {
    /// Create a user with no phone number
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            phone: None,
        }
    }
}

/// The two halves of the offer/answer exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Session offer published by the host
    Offer,
    /// Session answer published by the joiner
    Answer,
}

/// A session-description payload with its type tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    pub kind: SdpKind,
    /// Raw SDP payload
    pub sdp: String,
}

/// Session document lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created by the host, waiting for a joiner
    Waiting,
    /// Both parties present
    Active,
    /// Call finished, document eligible for deletion after a grace period
    Ended,
}

impl SessionStatus {
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Waiting => 0,
            SessionStatus::Active => 1,
            SessionStatus::Ended => 2,
        }
    }

    /// Status only ever moves forward: waiting -> active -> ended.
    /// Writing the current status again is allowed (idempotent teardown).
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        next.rank() >= self.rank()
    }
}

/// One call room's shared negotiation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDoc {
    /// User id of the session creator (the host)
    pub created_by: String,
    /// Creation time
    pub created_at: SystemTime,
    /// User ids of the parties present
    pub participants: Vec<String>,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Host's offer, written at most once
    pub offer: Option<SessionDescription>,
    /// Joiner's answer, written at most once
    pub answer: Option<SessionDescription>,
    /// Set when the session ends
    pub ended_at: Option<SystemTime>,
}

impl SessionDoc {
    /// Create a fresh waiting session owned by `created_by`
    pub fn new(created_by: impl Into<String>) -> Self {
        let created_by = created_by.into();
        Self {
            participants: vec![created_by.clone()],
            created_by,
            created_at: SystemTime::now(),
            status: SessionStatus::Waiting,
            offer: None,
            answer: None,
            ended_at: None,
        }
    }

    /// Check whether a user id is already in the participant list
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

/// Sparse update to a session document, mirroring a partial store write
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    /// Replace the participant list
    pub participants: Option<Vec<String>>,
    /// Advance the status
    pub status: Option<SessionStatus>,
    /// Publish the offer
    pub offer: Option<SessionDescription>,
    /// Publish the answer
    pub answer: Option<SessionDescription>,
    /// Record the end time
    pub ended_at: Option<SystemTime>,
}

impl SessionPatch {
    /// Apply this patch to a document, enforcing the session invariants:
    /// status never moves backward, and offer/answer are written at most once.
    pub fn apply(self, doc: &mut SessionDoc) -> Result<()> {
        if let Some(status) = self.status {
            if !doc.status.can_transition_to(status) {
                return Err(Error::ProtocolViolation(format!(
                    "session status cannot move from {:?} to {:?}",
                    doc.status, status
                )));
            }
            doc.status = status;
        }

        if let Some(offer) = self.offer {
            if doc.offer.is_some() {
                return Err(Error::ProtocolViolation(
                    "session offer already published".to_string(),
                ));
            }
            doc.offer = Some(offer);
        }

        if let Some(answer) = self.answer {
            if doc.answer.is_some() {
                return Err(Error::ProtocolViolation(
                    "session answer already published".to_string(),
                ));
            }
            doc.answer = Some(answer);
        }

        if let Some(participants) = self.participants {
            doc.participants = participants;
        }

        if let Some(ended_at) = self.ended_at {
            doc.ended_at = Some(ended_at);
        }

        Ok(())
    }
}

/// A proposed network path, appended to a session's candidate sub-collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDoc {
    /// Candidate string from the negotiation protocol
    pub candidate: String,
    /// Media-line index
    pub sdp_mline_index: Option<u16>,
    /// Media identifier
    pub sdp_mid: Option<String>,
    /// User id of the publishing party
    pub sender_id: String,
}

/// Invitation document lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    /// Awaiting the recipient's response
    Pending,
    /// Recipient accepted
    Accepted,
    /// Recipient declined
    Declined,
    /// TTL elapsed before a response
    Expired,
}

impl InvitationStatus {
    /// Once non-pending an invitation is immutable
    pub fn is_terminal(self) -> bool {
        self != InvitationStatus::Pending
    }
}

/// One invite from a sender to a recipient, targeting a pre-generated room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationDoc {
    /// Sender user id
    pub from_user_id: String,
    /// Sender display name
    pub from_user_name: String,
    /// Sender phone number, if known
    pub from_user_phone: Option<String>,
    /// Recipient user id
    pub to_user_id: String,
    /// Target session identifier, generated by the sender up front
    pub room_id: String,
    /// Lifecycle status
    pub status: InvitationStatus,
    /// Creation time
    pub created_at: SystemTime,
    /// Absolute expiry time (creation + TTL)
    pub expires_at: SystemTime,
}

impl InvitationDoc {
    /// Check whether the invitation's TTL has elapsed at `now`
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_session_status_moves_forward_only() {
        assert!(SessionStatus::Waiting.can_transition_to(SessionStatus::Active));
        assert!(SessionStatus::Waiting.can_transition_to(SessionStatus::Ended));
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Ended));
        assert!(!SessionStatus::Active.can_transition_to(SessionStatus::Waiting));
        assert!(!SessionStatus::Ended.can_transition_to(SessionStatus::Active));
        // Idempotent re-write of the same status is allowed
        assert!(SessionStatus::Ended.can_transition_to(SessionStatus::Ended));
    }

    #[test]
    fn test_patch_rejects_backward_status() {
        let mut doc = SessionDoc::new("alice");
        doc.status = SessionStatus::Active;

        let patch = SessionPatch {
            status: Some(SessionStatus::Waiting),
            ..Default::default()
        };
        assert!(patch.apply(&mut doc).is_err());
        assert_eq!(doc.status, SessionStatus::Active);
    }

    #[test]
    fn test_patch_rejects_second_offer() {
        let mut doc = SessionDoc::new("alice");
        let offer = SessionDescription {
            kind: SdpKind::Offer,
            sdp: "v=0".to_string(),
        };

        let first = SessionPatch {
            offer: Some(offer.clone()),
            ..Default::default()
        };
        assert!(first.apply(&mut doc).is_ok());

        let second = SessionPatch {
            offer: Some(offer),
            ..Default::default()
        };
        let err = second.apply(&mut doc).unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_patch_rejects_second_answer() {
        let mut doc = SessionDoc::new("alice");
        let answer = SessionDescription {
            kind: SdpKind::Answer,
            sdp: "v=0".to_string(),
        };

        let first = SessionPatch {
            answer: Some(answer.clone()),
            ..Default::default()
        };
        assert!(first.apply(&mut doc).is_ok());

        let second = SessionPatch {
            answer: Some(answer),
            ..Default::default()
        };
        assert!(second.apply(&mut doc).is_err());
    }

    #[test]
    fn test_invitation_terminality() {
        assert!(!InvitationStatus::Pending.is_terminal());
        assert!(InvitationStatus::Accepted.is_terminal());
        assert!(InvitationStatus::Declined.is_terminal());
        assert!(InvitationStatus::Expired.is_terminal());
    }

    #[test]
    fn test_invitation_expiry_check() {
        let now = SystemTime::now();
        let doc = InvitationDoc {
            from_user_id: "alice".to_string(),
            from_user_name: "Alice".to_string(),
            from_user_phone: None,
            to_user_id: "bob".to_string(),
            room_id: "xk3f9q".to_string(),
            status: InvitationStatus::Pending,
            created_at: now,
            expires_at: now + Duration::from_secs(300),
        };

        assert!(!doc.is_expired_at(now));
        assert!(doc.is_expired_at(now + Duration::from_secs(301)));
    }

    #[test]
    fn test_session_doc_serialization() {
        let doc = SessionDoc::new("alice");
        let json = serde_json::to_string(&doc).unwrap();
        let deserialized: SessionDoc = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, deserialized);
    }
}
