//! Two-party call negotiation over a document-oriented signaling store
//!
//! This crate establishes peer-to-peer audio/video calls between exactly two
//! parties. Signaling rides on a pluggable document store rather than a
//! dedicated server: the host writes a session document with its offer, the
//! joiner answers into the same document, and both sides trickle ICE
//! candidates through a per-session sub-collection.
//!
//! # Features
//!
//! - **Invitation coordination**: TTL-bounded invitations with pending →
//!   accepted/declined/expired transitions and response watching
//! - **Offer/answer negotiation**: exactly one offer and one answer per
//!   session document, candidates buffered until the remote description lands
//! - **Self-repair**: bounded ICE restarts with exponential backoff when the
//!   connection degrades
//! - **Media controls**: mute toggles, camera switching, and screen share by
//!   swapping the outbound track without renegotiation
//! - **Pluggable store**: `SignalingStore` seam with a complete in-memory
//!   implementation for tests and embedding
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  CallBootstrap (invite → navigate → join)            │
//! │  ├─ InvitationCoordinator (invitation documents)     │
//! │  └─ NegotiationEngine (one live session)             │
//! │      ├─ session driver task (all mutable state)      │
//! │      ├─ PeerConnection (webrtc-rs wrapper)           │
//! │      └─ LocalMedia (camera/mic pair, track swaps)    │
//! │          ↕                                           │
//! │  SignalingStore (sessions, candidates, invitations)  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use peercall::{
//!     CallConfig, CallRole, MemoryStore, NegotiationEngine, StaticMediaSource, User,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> peercall::Result<()> {
//! let config = CallConfig::default();
//! let store = Arc::new(MemoryStore::new());
//! let engine = NegotiationEngine::new(config, store, Arc::new(StaticMediaSource::new()))?;
//!
//! let alice = User::new("alice", "Alice");
//! engine.start_session("room-1", CallRole::Host, &alice).await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod error;
pub mod invite;
pub mod media;
pub mod peer;
pub mod store;

pub use bootstrap::CallBootstrap;
pub use config::{AudioQuality, CallConfig, TurnServerConfig, VideoQuality};
pub use engine::{
    CallEvent, CallPhase, CallRole, NavigationEvent, NegotiationEngine, RemoteMediaHandle,
};
pub use error::{Error, Result};
pub use invite::{Invitation, InvitationCoordinator};
pub use media::{CameraFacing, LocalMedia, LocalTrack, MediaSource, StaticMediaSource, TrackKind};
pub use peer::{CallStats, PeerConnection, RestartPolicy, RestartTracker};
pub use store::{
    CandidateDoc, InvitationDoc, InvitationStatus, MemoryStore, SdpKind, SessionDescription,
    SessionDoc, SessionPatch, SessionStatus, SignalingStore, StoreSubscription, User,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
