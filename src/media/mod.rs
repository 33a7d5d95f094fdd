//! Media capture seam
//!
//! Real device capture belongs to the embedder: this crate only negotiates
//! what capture produces. `MediaSource` is the seam; `StaticMediaSource` is
//! the in-crate implementation backed by sample tracks that the embedder (or
//! a test) feeds frames into directly.

mod tracks;

pub use tracks::{CameraFacing, LocalMedia, LocalTrack, TrackKind};

use crate::config::{AudioQuality, VideoQuality};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Produces local outbound tracks.
///
/// Acquisition failure surfaces as `Error::Unavailable`; the caller treats
/// that as fatal for call start.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Capture the camera/microphone pair with the given quality targets
    async fn capture(&self, video: &VideoQuality, audio: &AudioQuality) -> Result<LocalMedia>;

    /// Capture a single camera video track from the given facing
    async fn capture_camera(
        &self,
        facing: CameraFacing,
        video: &VideoQuality,
    ) -> Result<Arc<LocalTrack>>;

    /// Capture the display for screen sharing
    async fn capture_display(&self) -> Result<Arc<LocalTrack>>;
}

/// Sample-track-backed media source.
///
/// Tracks are created immediately and never fail to acquire; whoever owns the
/// source writes samples into them.
#[derive(Debug, Default)]
pub struct StaticMediaSource;

impl StaticMediaSource {
    pub fn new() -> Self {
        Self
    }

    fn audio_codec() -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        }
    }

    fn video_codec() -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            ..Default::default()
        }
    }

    fn video_track(facing: Option<CameraFacing>) -> Arc<LocalTrack> {
        let id = Uuid::new_v4();
        let rtc = Arc::new(TrackLocalStaticSample::new(
            Self::video_codec(),
            format!("video-{id}"),
            format!("stream-{id}"),
        ));
        Arc::new(LocalTrack::new(rtc, TrackKind::Video, facing))
    }
}

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn capture(&self, video: &VideoQuality, _audio: &AudioQuality) -> Result<LocalMedia> {
        debug!(
            width = video.width,
            height = video.height,
            fps = video.framerate_fps,
            "capturing camera and microphone"
        );
        let id = Uuid::new_v4();
        let audio_rtc = Arc::new(TrackLocalStaticSample::new(
            Self::audio_codec(),
            format!("audio-{id}"),
            format!("stream-{id}"),
        ));
        Ok(LocalMedia::new(
            Self::video_track(Some(CameraFacing::Front)),
            Arc::new(LocalTrack::new(audio_rtc, TrackKind::Audio, None)),
        ))
    }

    async fn capture_camera(
        &self,
        facing: CameraFacing,
        _video: &VideoQuality,
    ) -> Result<Arc<LocalTrack>> {
        debug!(?facing, "capturing camera");
        Ok(Self::video_track(Some(facing)))
    }

    async fn capture_display(&self) -> Result<Arc<LocalTrack>> {
        debug!("capturing display");
        Ok(Self::video_track(None))
    }
}

#[cfg(test)]
mod source_tests {
    use super::*;
    use crate::config::CallConfig;

    #[tokio::test]
    async fn test_capture_yields_camera_pair() {
        let config = CallConfig::default();
        let source = StaticMediaSource::new();
        let media = source.capture(&config.video, &config.audio).await.unwrap();
        assert_eq!(media.video().await.kind(), TrackKind::Video);
        assert_eq!(media.video().await.facing(), Some(CameraFacing::Front));
        assert_eq!(media.audio().kind(), TrackKind::Audio);
    }

    #[tokio::test]
    async fn test_display_capture_has_no_facing() {
        let source = StaticMediaSource::new();
        let track = source.capture_display().await.unwrap();
        assert_eq!(track.facing(), None);
    }
}
