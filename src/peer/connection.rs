//! WebRTC peer connection wrapper
//!
//! Thin layer over webrtc-rs that maps SDP and candidate flow onto the store
//! document types and enforces the signaling-state guards: a host only
//! accepts an answer while it holds a local offer, a joiner only accepts an
//! offer while stable with no remote description. Guard violations surface as
//! `ProtocolViolation` instead of corrupting the underlying connection.

use crate::config::CallConfig;
use crate::media::LocalMedia;
use crate::store::{CandidateDoc, SdpKind, SessionDescription};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Peer connection for one call session
pub struct PeerConnection {
    room_id: String,
    pc: Arc<RTCPeerConnection>,

    /// RTP senders retained so tracks can be swapped mid-call
    audio_sender: RwLock<Option<Arc<RTCRtpSender>>>,
    video_sender: RwLock<Option<Arc<RTCRtpSender>>>,
}

impl PeerConnection {
    /// Create a peer connection configured with the call's ICE servers
    pub async fn new(room_id: &str, config: &CallConfig) -> Result<Self> {
        info!(room_id, "creating peer connection");

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::PeerConnection(format!("failed to register codecs: {e}")))?;

        let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::PeerConnection(format!("failed to register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| Error::PeerConnection(format!("failed to create connection: {e}")))?,
        );

        Ok(Self {
            room_id: room_id.to_string(),
            pc,
            audio_sender: RwLock::new(None),
            video_sender: RwLock::new(None),
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Attach the local camera/microphone pair before negotiation starts
    pub async fn attach_media(&self, media: &LocalMedia) -> Result<()> {
        let audio = media.audio();
        let sender = self
            .pc
            .add_track(audio.rtc() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::PeerConnection(format!("failed to add audio track: {e}")))?;
        *self.audio_sender.write().await = Some(sender);

        let video = media.video().await;
        let sender = self
            .pc
            .add_track(video.rtc() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::PeerConnection(format!("failed to add video track: {e}")))?;
        *self.video_sender.write().await = Some(sender);

        debug!(room_id = %self.room_id, "local media attached");
        Ok(())
    }

    /// Create an offer and apply it locally.
    ///
    /// Host side of step one: the returned description is what gets written
    /// to the session document.
    pub async fn create_offer(&self) -> Result<SessionDescription> {
        let state = self.pc.signaling_state();
        if state != RTCSignalingState::Stable {
            return Err(Error::ProtocolViolation(format!(
                "cannot create offer in signaling state {state}"
            )));
        }

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Sdp(format!("failed to create offer: {e}")))?;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Sdp(format!("failed to set local offer: {e}")))?;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| Error::Sdp("no local description after setting offer".to_string()))?;

        debug!(room_id = %self.room_id, "created offer");
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: local.sdp,
        })
    }

    /// Apply a remote offer and produce the answer.
    ///
    /// Joiner side: only valid while stable with no remote description yet.
    pub async fn accept_offer(&self, remote: &SessionDescription) -> Result<SessionDescription> {
        if remote.kind != SdpKind::Offer {
            return Err(Error::ProtocolViolation(format!(
                "accept_offer given a {:?} description",
                remote.kind
            )));
        }

        let state = self.pc.signaling_state();
        if state != RTCSignalingState::Stable || self.pc.remote_description().await.is_some() {
            return Err(Error::ProtocolViolation(format!(
                "cannot accept offer in signaling state {state}"
            )));
        }

        let offer = RTCSessionDescription::offer(remote.sdp.clone())
            .map_err(|e| Error::Sdp(format!("failed to parse offer: {e}")))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::Sdp(format!("failed to set remote offer: {e}")))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Sdp(format!("failed to create answer: {e}")))?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Sdp(format!("failed to set local answer: {e}")))?;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| Error::Sdp("no local description after setting answer".to_string()))?;

        debug!(room_id = %self.room_id, "accepted offer, created answer");
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: local.sdp,
        })
    }

    /// Apply the remote answer.
    ///
    /// Host side: only valid while a local offer is outstanding.
    pub async fn apply_answer(&self, remote: &SessionDescription) -> Result<()> {
        if remote.kind != SdpKind::Answer {
            return Err(Error::ProtocolViolation(format!(
                "apply_answer given a {:?} description",
                remote.kind
            )));
        }

        let state = self.pc.signaling_state();
        if state != RTCSignalingState::HaveLocalOffer {
            return Err(Error::ProtocolViolation(format!(
                "cannot apply answer in signaling state {state}"
            )));
        }

        let answer = RTCSessionDescription::answer(remote.sdp.clone())
            .map_err(|e| Error::Sdp(format!("failed to parse answer: {e}")))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::Sdp(format!("failed to set remote answer: {e}")))?;

        debug!(room_id = %self.room_id, "applied answer");
        Ok(())
    }

    /// Feed one remote ICE candidate into the connection
    pub async fn add_remote_candidate(&self, doc: &CandidateDoc) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: doc.candidate.clone(),
            sdp_mid: doc.sdp_mid.clone(),
            sdp_mline_index: doc.sdp_mline_index,
            username_fragment: None,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidate(format!("failed to add candidate: {e}")))?;
        Ok(())
    }

    /// Fire an ICE restart.
    ///
    /// The restart offer is applied locally only; candidate exchange through
    /// the store carries the repair, the session document keeps its single
    /// original offer.
    pub async fn restart_ice(&self) -> Result<()> {
        let offer = self
            .pc
            .create_offer(Some(RTCOfferOptions {
                ice_restart: true,
                ..Default::default()
            }))
            .await
            .map_err(|e| Error::IceCandidate(format!("ICE restart offer failed: {e}")))?;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::IceCandidate(format!("ICE restart apply failed: {e}")))?;

        info!(room_id = %self.room_id, "ICE restart fired");
        Ok(())
    }

    /// Swap the outbound video track without renegotiating
    pub async fn replace_video_track(&self, track: Arc<TrackLocalStaticSample>) -> Result<()> {
        let sender = self
            .video_sender
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::ProtocolViolation("no outbound video sender".to_string()))?;

        sender
            .replace_track(Some(track as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| Error::PeerConnection(format!("failed to replace video track: {e}")))?;

        debug!(room_id = %self.room_id, "outbound video track replaced");
        Ok(())
    }

    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.pc.connection_state()
    }

    pub fn signaling_state(&self) -> RTCSignalingState {
        self.pc.signaling_state()
    }

    /// Register a handler for locally-gathered ICE candidates
    pub fn on_local_candidate<F>(&self, handler: F)
    where
        F: Fn(RTCIceCandidateInit) + Send + Sync + 'static,
    {
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => handler(init),
                        Err(e) => warn!(error = %e, "failed to serialize local candidate"),
                    }
                }
                Box::pin(async {})
            }));
    }

    /// Register a handler for connection state changes
    pub fn on_state_change<F>(&self, handler: F)
    where
        F: Fn(RTCPeerConnectionState) + Send + Sync + 'static,
    {
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                handler(state);
                Box::pin(async {})
            }));
    }

    /// Register a handler for remote track arrival
    pub fn on_remote_track<F>(&self, handler: F)
    where
        F: Fn(Arc<TrackRemote>) + Send + Sync + 'static,
    {
        self.pc
            .on_track(Box::new(move |track, _receiver, _transceiver| {
                handler(track);
                Box::pin(async {})
            }));
    }

    /// Close the underlying connection
    pub async fn close(&self) -> Result<()> {
        info!(room_id = %self.room_id, "closing peer connection");
        self.pc
            .close()
            .await
            .map_err(|e| Error::PeerConnection(format!("failed to close connection: {e}")))?;
        Ok(())
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("room_id", &self.room_id)
            .field("connection_state", &self.connection_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaSource, StaticMediaSource};

    async fn connection() -> PeerConnection {
        let config = CallConfig::default();
        let pc = PeerConnection::new("room-test", &config).await.unwrap();
        let media = StaticMediaSource::new()
            .capture(&config.video, &config.audio)
            .await
            .unwrap();
        pc.attach_media(&media).await.unwrap();
        pc
    }

    #[tokio::test]
    async fn test_accept_offer_rejects_answer_kind() {
        let pc = connection().await;
        let desc = SessionDescription {
            kind: SdpKind::Answer,
            sdp: String::new(),
        };
        let err = pc.accept_offer(&desc).await.unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_apply_answer_requires_local_offer() {
        let pc = connection().await;
        let desc = SessionDescription {
            kind: SdpKind::Answer,
            sdp: String::new(),
        };
        // Still stable, no local offer outstanding
        let err = pc.apply_answer(&desc).await.unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_second_offer_blocked_while_one_outstanding() {
        let pc = connection().await;
        pc.create_offer().await.unwrap();
        let err = pc.create_offer().await.unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_connections() {
        let host = connection().await;
        let joiner = connection().await;

        let offer = host.create_offer().await.unwrap();
        let answer = joiner.accept_offer(&offer).await.unwrap();
        host.apply_answer(&answer).await.unwrap();

        assert_eq!(host.signaling_state(), RTCSignalingState::Stable);
        assert_eq!(joiner.signaling_state(), RTCSignalingState::Stable);

        host.close().await.unwrap();
        joiner.close().await.unwrap();
    }
}
