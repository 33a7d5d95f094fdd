//! Local track wrappers
//!
//! `LocalTrack` pairs a webrtc-rs sample track with mute state and capture
//! metadata. `LocalMedia` groups the camera/microphone pair for a call and
//! supports swapping the outgoing video track in place, which is how camera
//! switching and screen share work: the RTP sender keeps running while the
//! track behind it is substituted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Which physical camera a video track was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFacing {
    Front,
    Rear,
}

impl CameraFacing {
    /// The opposite camera
    pub fn flipped(self) -> Self {
        match self {
            CameraFacing::Front => CameraFacing::Rear,
            CameraFacing::Rear => CameraFacing::Front,
        }
    }
}

/// Track media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A locally-captured outbound track
pub struct LocalTrack {
    rtc: Arc<TrackLocalStaticSample>,
    kind: TrackKind,
    /// Set for camera-captured video, `None` for audio and screen capture
    facing: Option<CameraFacing>,
    enabled: AtomicBool,
}

impl LocalTrack {
    pub fn new(
        rtc: Arc<TrackLocalStaticSample>,
        kind: TrackKind,
        facing: Option<CameraFacing>,
    ) -> Self {
        Self {
            rtc,
            kind,
            facing,
            enabled: AtomicBool::new(true),
        }
    }

    /// The underlying webrtc-rs track
    pub fn rtc(&self) -> Arc<TrackLocalStaticSample> {
        self.rtc.clone()
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn facing(&self) -> Option<CameraFacing> {
        self.facing
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Flip the enabled state, returning the new state
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("facing", &self.facing)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// The camera/microphone pair captured for a call
#[derive(Debug)]
pub struct LocalMedia {
    video: RwLock<Arc<LocalTrack>>,
    audio: Arc<LocalTrack>,
}

impl LocalMedia {
    pub fn new(video: Arc<LocalTrack>, audio: Arc<LocalTrack>) -> Self {
        Self {
            video: RwLock::new(video),
            audio,
        }
    }

    pub async fn video(&self) -> Arc<LocalTrack> {
        self.video.read().await.clone()
    }

    pub fn audio(&self) -> Arc<LocalTrack> {
        self.audio.clone()
    }

    /// Flip video mute, returning the new enabled state
    pub async fn toggle_video(&self) -> bool {
        self.video.read().await.toggle()
    }

    /// Flip audio mute, returning the new enabled state
    pub async fn toggle_audio(&self) -> bool {
        self.audio.toggle()
    }

    /// Substitute the outgoing video track, carrying the mute state over.
    /// Returns the replaced track.
    pub async fn replace_video(&self, track: Arc<LocalTrack>) -> Arc<LocalTrack> {
        let mut slot = self.video.write().await;
        track.set_enabled(slot.is_enabled());
        std::mem::replace(&mut *slot, track)
    }
}
