//! Peer connection layer: the webrtc-rs wrapper, restart bounds, and
//! negotiation telemetry

mod connection;
mod lifecycle;
mod stats;

pub use connection::PeerConnection;
pub use lifecycle::{RestartPolicy, RestartTracker};
pub use stats::CallStats;
