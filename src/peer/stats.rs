//! Negotiation telemetry
//!
//! Counters the engine maintains as signaling flows through it. Telemetry is
//! non-critical: nothing here gates call behavior.

use std::time::SystemTime;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// A snapshot of one call's negotiation activity
#[derive(Debug, Clone)]
pub struct CallStats {
    /// When the session was set up locally
    pub started_at: SystemTime,
    /// When the connection first reached connected, if it has
    pub connected_at: Option<SystemTime>,
    /// Local candidates published to the store
    pub candidates_sent: u64,
    /// Remote candidates applied (buffered ones count on flush)
    pub candidates_received: u64,
    /// ICE restart probes fired
    pub ice_restarts: u32,
    /// Latest observed connection state
    pub connection_state: RTCPeerConnectionState,
}

impl CallStats {
    pub fn new() -> Self {
        Self {
            started_at: SystemTime::now(),
            connected_at: None,
            candidates_sent: 0,
            candidates_received: 0,
            ice_restarts: 0,
            connection_state: RTCPeerConnectionState::New,
        }
    }

    pub fn record_candidate_sent(&mut self) {
        self.candidates_sent += 1;
    }

    pub fn record_candidates_received(&mut self, count: u64) {
        self.candidates_received += count;
    }

    pub fn record_ice_restart(&mut self) {
        self.ice_restarts += 1;
    }

    pub fn record_state(&mut self, state: RTCPeerConnectionState) {
        if state == RTCPeerConnectionState::Connected && self.connected_at.is_none() {
            self.connected_at = Some(SystemTime::now());
        }
        self.connection_state = state;
    }

    /// Time from setup to first connected, if the call ever connected
    pub fn setup_time(&self) -> Option<std::time::Duration> {
        self.connected_at
            .and_then(|at| at.duration_since(self.started_at).ok())
    }
}

impl Default for CallStats {
    fn default() -> Self {
        Self::new()
    }
}
