//! Call negotiation engine
//!
//! One `NegotiationEngine` drives at most one call session at a time. Every
//! piece of session state lives on a single event-loop task fed by an mpsc
//! channel; store watchers, peer connection callbacks, and media control
//! commands all funnel through it, so signaling is processed strictly in
//! order with no cross-task locking.

mod candidates;
mod session;

pub use candidates::CandidateBuffer;
pub use session::NegotiationEngine;

use crate::store::User;
use std::sync::Arc;
use webrtc::track::track_remote::TrackRemote;

/// Which side of the session this party plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    /// Creates the session document and publishes the offer
    Host,
    /// Reads the offer and publishes the answer
    Joiner,
}

/// Lifecycle phase of a call session.
///
/// Forward-only through the happy path; `Connected` and `Reconnecting`
/// alternate during repair, and `Failed` parks the session once the restart
/// budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// No session
    Idle,
    /// Capturing media and building the peer connection
    Initializing,
    /// Host: offer published, waiting for an answer
    Hosting,
    /// Joiner: waiting for the offer to appear
    Joining,
    /// Descriptions exchanged, ICE in progress
    Negotiating,
    /// Media flowing
    Connected,
    /// Connection degraded, repair probes running
    Reconnecting,
    /// Restart budget exhausted, waiting for explicit teardown
    Failed,
    /// Session torn down
    Ended,
}

impl CallPhase {
    /// Whether a session is live in this phase
    pub fn is_live(self) -> bool {
        !matches!(self, CallPhase::Idle | CallPhase::Ended)
    }
}

/// Navigation hints for the embedding UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEvent {
    /// Move to the call screen for this room
    Navigate { room_id: String, is_host: bool },
    /// The invited party declined
    InvitationDeclined,
    /// The invitation expired before a response
    InvitationExpired,
}

/// A remote track surfaced to the embedder
#[derive(Clone)]
pub struct RemoteMediaHandle {
    track: Arc<TrackRemote>,
}

impl RemoteMediaHandle {
    pub fn new(track: Arc<TrackRemote>) -> Self {
        Self { track }
    }

    pub fn track(&self) -> Arc<TrackRemote> {
        self.track.clone()
    }

    /// "audio" or "video"
    pub fn kind(&self) -> String {
        self.track.kind().to_string()
    }
}

impl std::fmt::Debug for RemoteMediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMediaHandle")
            .field("id", &self.track.id())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Events broadcast to embedders while a session runs
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// The session moved to a new phase
    Phase(CallPhase),
    /// Human-readable progress line for the UI
    StatusText(String),
    /// A remote track arrived
    RemoteMedia(RemoteMediaHandle),
    /// The identity of the remote party became known
    RemoteUser(User),
    /// UI navigation hint
    Navigation(NavigationEvent),
}

#[cfg(test)]
mod phase_tests {
    use super::*;

    #[test]
    fn test_live_phases() {
        assert!(!CallPhase::Idle.is_live());
        assert!(!CallPhase::Ended.is_live());
        assert!(CallPhase::Initializing.is_live());
        assert!(CallPhase::Connected.is_live());
        assert!(CallPhase::Reconnecting.is_live());
        assert!(CallPhase::Failed.is_live());
    }
}
