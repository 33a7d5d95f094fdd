//! Configuration for call sessions and invitations

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for call negotiation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional, needed behind symmetric NAT)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Capture quality targets for the local camera
    pub video: VideoQuality,

    /// Capture processing for the local microphone
    pub audio: AudioQuality,

    /// Host delay between creating the session document and publishing the
    /// offer, so the document is observable before the joiner subscribes
    pub offer_settle_delay_ms: u64,

    /// Repair probe delay after the connection reports disconnected
    pub disconnected_restart_delay_ms: u64,

    /// Repair probe delay after the connection reports failed
    pub failed_restart_delay_ms: u64,

    /// Invitation time-to-live (default: 5 minutes)
    pub invitation_ttl_secs: u64,

    /// Grace period before a best-effort delete of an ended session document
    pub session_delete_grace_secs: u64,

    /// Maximum consecutive ICE restarts before the session parks in Failed
    pub max_ice_restarts: u32,

    /// Backoff multiplier applied to repair probe delays on repeated restarts
    pub restart_backoff_multiplier: f64,

    /// Upper bound on a backed-off repair probe delay in milliseconds
    pub restart_backoff_max_ms: u64,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Capture quality targets for local video
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VideoQuality {
    /// Ideal capture width in pixels
    pub width: u32,
    /// Ideal capture height in pixels
    pub height: u32,
    /// Ideal capture framerate
    pub framerate_fps: u32,
}

/// Capture processing flags for local audio
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioQuality {
    /// Enable echo cancellation
    pub echo_cancellation: bool,
    /// Enable noise suppression
    pub noise_suppression: bool,
    /// Enable automatic gain control
    pub auto_gain_control: bool,
}

impl Default for VideoQuality {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            framerate_fps: 30,
        }
    }
}

impl Default for AudioQuality {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            video: VideoQuality::default(),
            audio: AudioQuality::default(),
            offer_settle_delay_ms: 1000,
            disconnected_restart_delay_ms: 3000,
            failed_restart_delay_ms: 1000,
            invitation_ttl_secs: 300,
            session_delete_grace_secs: 60,
            max_ice_restarts: 5,
            restart_backoff_multiplier: 2.0,
            restart_backoff_max_ms: 30000,
        }
    }
}

impl CallConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty
    /// - video dimensions or framerate are zero
    /// - `invitation_ttl_secs` is zero
    /// - `max_ice_restarts` is zero
    /// - `restart_backoff_multiplier` is below 1.0
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if self.video.width == 0 || self.video.height == 0 || self.video.framerate_fps == 0 {
            return Err(Error::InvalidConfig(format!(
                "video quality targets must be non-zero, got {}x{}@{}",
                self.video.width, self.video.height, self.video.framerate_fps
            )));
        }

        if self.invitation_ttl_secs == 0 {
            return Err(Error::InvalidConfig(
                "invitation_ttl_secs must be non-zero".to_string(),
            ));
        }

        if self.max_ice_restarts == 0 {
            return Err(Error::InvalidConfig(
                "max_ice_restarts must be at least 1".to_string(),
            ));
        }

        if self.restart_backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "restart_backoff_multiplier must be >= 1.0, got {}",
                self.restart_backoff_multiplier
            )));
        }

        Ok(())
    }

    /// Invitation time-to-live as a Duration
    pub fn invitation_ttl(&self) -> Duration {
        Duration::from_secs(self.invitation_ttl_secs)
    }

    /// Grace period before ended session documents are deleted
    pub fn session_delete_grace(&self) -> Duration {
        Duration::from_secs(self.session_delete_grace_secs)
    }

    /// Add TURN servers to this configuration
    ///
    /// Useful for chaining on top of `Default`.
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Set the invitation time-to-live
    pub fn with_invitation_ttl_secs(mut self, secs: u64) -> Self {
        self.invitation_ttl_secs = secs;
        self
    }
}
