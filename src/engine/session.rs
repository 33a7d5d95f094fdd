//! Per-session negotiation state machine
//!
//! `NegotiationEngine` is the long-lived handle; each call spawns one driver
//! task that owns every piece of mutable session state. Store watchers, peer
//! connection callbacks, repair timers, and media control commands all send
//! `SessionEvent`s into the driver's channel, so nothing about a session is
//! touched from two tasks at once.
//!
//! Signaling writes keep the session document's invariants: the offer and
//! answer are each published exactly once, ICE restarts never touch the
//! document, and status only moves forward.

use crate::config::CallConfig;
use crate::engine::{CallEvent, CallPhase, CallRole, CandidateBuffer, RemoteMediaHandle};
use crate::media::{CameraFacing, LocalMedia, MediaSource};
use crate::peer::{CallStats, PeerConnection, RestartPolicy, RestartTracker};
use crate::store::{
    CandidateDoc, SessionDoc, SessionPatch, SessionStatus, SignalingStore, User,
};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::track::track_remote::TrackRemote;

/// Everything a session's driver loop reacts to
enum SessionEvent {
    /// The session document changed in the store
    SessionChanged(SessionDoc),
    /// A candidate appeared in the store (any sender)
    RemoteCandidate(u64, CandidateDoc),
    /// The local connection gathered a candidate
    LocalCandidate(RTCIceCandidateInit),
    /// The local connection changed state
    ConnectionState(RTCPeerConnectionState),
    /// A remote track arrived
    RemoteTrack(Arc<TrackRemote>),
    /// Settle delay elapsed, host publishes its offer
    PublishOffer,
    /// A scheduled repair probe fired
    RestartProbe,
    /// Media control command from the engine handle
    Control(ControlCmd),
    /// Tear the session down
    End {
        remote: bool,
        done: Option<oneshot::Sender<()>>,
    },
}

enum ControlCmd {
    ToggleVideo(oneshot::Sender<bool>),
    ToggleAudio(oneshot::Sender<bool>),
    SwitchCamera(oneshot::Sender<Result<CameraFacing>>),
    StartScreenShare(oneshot::Sender<Result<()>>),
    StopScreenShare(oneshot::Sender<Result<()>>),
    Stats(oneshot::Sender<CallStats>),
}

struct ActiveCall {
    room_id: String,
    live: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<SessionEvent>,
    driver: JoinHandle<()>,
    forwarders: Vec<JoinHandle<()>>,
}

/// Drives two-party call sessions over a signaling store.
///
/// At most one session is live per engine; starting a new session ends the
/// previous one first.
pub struct NegotiationEngine {
    config: CallConfig,
    store: Arc<dyn SignalingStore>,
    media_source: Arc<dyn MediaSource>,
    events_tx: broadcast::Sender<CallEvent>,
    phase_tx: Arc<watch::Sender<CallPhase>>,
    active: Mutex<Option<ActiveCall>>,
}

impl NegotiationEngine {
    pub fn new(
        config: CallConfig,
        store: Arc<dyn SignalingStore>,
        media_source: Arc<dyn MediaSource>,
    ) -> Result<Self> {
        config.validate()?;
        let (events_tx, _) = broadcast::channel(64);
        let (phase_tx, _) = watch::channel(CallPhase::Idle);
        Ok(Self {
            config,
            store,
            media_source,
            events_tx,
            phase_tx: Arc::new(phase_tx),
            active: Mutex::new(None),
        })
    }

    /// Subscribe to session events
    pub fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.events_tx.subscribe()
    }

    /// Watch the current phase
    pub fn phases(&self) -> watch::Receiver<CallPhase> {
        self.phase_tx.subscribe()
    }

    /// The current phase
    pub fn phase(&self) -> CallPhase {
        *self.phase_tx.borrow()
    }

    pub(crate) fn emit(&self, event: CallEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Whether a session is currently live
    pub async fn is_active(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|call| call.live.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Room id of the live session, if any
    pub async fn current_room(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|call| call.live.load(Ordering::SeqCst))
            .map(|call| call.room_id.clone())
    }

    /// Start a session in `room_id`, probing the store to pick a role: no
    /// session document yet means host, an existing one means joiner.
    pub async fn start_session_auto(&self, room_id: &str, user: &User) -> Result<()> {
        let role = match self.store.get_session(room_id).await? {
            Some(_) => CallRole::Joiner,
            None => CallRole::Host,
        };
        self.start_session(room_id, role, user).await
    }

    /// Start a session in `room_id` as `role`, acting as `user`.
    ///
    /// Any previous session is ended first. Fails with `Unavailable` when
    /// media cannot be acquired and `NotFound` when joining a room that does
    /// not exist; on failure the engine returns to `Idle`.
    pub async fn start_session(&self, room_id: &str, role: CallRole, user: &User) -> Result<()> {
        let mut slot = self.active.lock().await;
        if let Some(previous) = slot.take() {
            info!(room_id = %previous.room_id, "ending previous session");
            Self::terminate(previous).await;
        }

        match self.start_inner(room_id, role, user).await {
            Ok(call) => {
                *slot = Some(call);
                Ok(())
            }
            Err(e) => {
                publish_phase(&self.phase_tx, &self.events_tx, CallPhase::Idle);
                Err(e)
            }
        }
    }

    async fn start_inner(&self, room_id: &str, role: CallRole, user: &User) -> Result<ActiveCall> {
        info!(room_id, ?role, user_id = %user.id, "starting session");
        publish_phase(&self.phase_tx, &self.events_tx, CallPhase::Initializing);
        let _ = self
            .events_tx
            .send(CallEvent::StatusText("Preparing call...".to_string()));

        let media = Arc::new(
            self.media_source
                .capture(&self.config.video, &self.config.audio)
                .await?,
        );

        let pc = Arc::new(PeerConnection::new(room_id, &self.config).await?);
        pc.attach_media(&media).await?;

        let live = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let tx = tx.clone();
            let live = live.clone();
            pc.on_local_candidate(move |init| {
                if live.load(Ordering::SeqCst) {
                    let _ = tx.send(SessionEvent::LocalCandidate(init));
                }
            });
        }
        {
            let tx = tx.clone();
            let live = live.clone();
            pc.on_state_change(move |state| {
                if live.load(Ordering::SeqCst) {
                    let _ = tx.send(SessionEvent::ConnectionState(state));
                }
            });
        }
        {
            let tx = tx.clone();
            let live = live.clone();
            pc.on_remote_track(move |track| {
                if live.load(Ordering::SeqCst) {
                    let _ = tx.send(SessionEvent::RemoteTrack(track));
                }
            });
        }

        let mut forwarders = Vec::new();

        match role {
            CallRole::Host => {
                self.store
                    .create_session(room_id, SessionDoc::new(user.id.clone()))
                    .await?;

                // Let the document settle in the store before publishing the
                // offer, so a joiner subscribing right away sees a consistent
                // progression.
                let settle = Duration::from_millis(self.config.offer_settle_delay_ms);
                let tx = tx.clone();
                forwarders.push(tokio::spawn(async move {
                    tokio::time::sleep(settle).await;
                    let _ = tx.send(SessionEvent::PublishOffer);
                }));

                publish_phase(&self.phase_tx, &self.events_tx, CallPhase::Hosting);
                let _ = self
                    .events_tx
                    .send(CallEvent::StatusText("Calling...".to_string()));
            }
            CallRole::Joiner => {
                let doc = self
                    .store
                    .get_session(room_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("session {room_id}")))?;

                // Register in the session document right away so the host can
                // see the arrival before the offer round trip completes.
                let mut participants = doc.participants.clone();
                if !doc.has_participant(&user.id) {
                    participants.push(user.id.clone());
                }
                self.store
                    .update_session(
                        room_id,
                        SessionPatch {
                            status: Some(SessionStatus::Active),
                            participants: Some(participants),
                            ..Default::default()
                        },
                    )
                    .await?;

                publish_phase(&self.phase_tx, &self.events_tx, CallPhase::Joining);
                let _ = self
                    .events_tx
                    .send(CallEvent::StatusText("Joining call...".to_string()));
            }
        }

        let subs = async {
            let session_sub = self.store.watch_session(room_id).await?;
            let candidate_sub = self.store.watch_candidates(room_id).await?;
            Ok::<_, Error>((session_sub, candidate_sub))
        }
        .await;
        let (mut session_sub, mut candidate_sub) = match subs {
            Ok(subs) => subs,
            Err(e) => {
                for task in forwarders {
                    task.abort();
                }
                // A host has already written the session document; do not
                // leave it orphaned in the store.
                if role == CallRole::Host {
                    if let Err(del) = self.store.delete_session(room_id).await {
                        warn!(
                            room_id,
                            error = %del,
                            "failed to remove session after setup error"
                        );
                    }
                }
                return Err(e);
            }
        };
        {
            let tx = tx.clone();
            forwarders.push(tokio::spawn(async move {
                while let Some(doc) = session_sub.recv().await {
                    if tx.send(SessionEvent::SessionChanged(doc)).is_err() {
                        break;
                    }
                }
            }));
        }

        {
            let tx = tx.clone();
            forwarders.push(tokio::spawn(async move {
                while let Some((seq, doc)) = candidate_sub.recv().await {
                    if tx.send(SessionEvent::RemoteCandidate(seq, doc)).is_err() {
                        break;
                    }
                }
            }));
        }

        let driver = Driver {
            role,
            room_id: room_id.to_string(),
            user_id: user.id.clone(),
            config: self.config.clone(),
            store: self.store.clone(),
            media_source: self.media_source.clone(),
            pc,
            media,
            live: live.clone(),
            tx: tx.clone(),
            events: self.events_tx.clone(),
            phase_tx: self.phase_tx.clone(),
            stats: CallStats::new(),
            buffer: CandidateBuffer::new(),
            remote_applied: false,
            answered: false,
            tracker: RestartTracker::new(RestartPolicy::from_config(&self.config)),
            probe_pending: false,
            screen_saved_facing: None,
            remote_media_seen: false,
            ended: false,
        };
        let driver = tokio::spawn(driver.run(rx));

        Ok(ActiveCall {
            room_id: room_id.to_string(),
            live,
            tx,
            driver,
            forwarders,
        })
    }

    /// End the live session. Idempotent: with no session this is a no-op.
    pub async fn end_session(&self) -> Result<()> {
        let call = self.active.lock().await.take();
        if let Some(call) = call {
            Self::terminate(call).await;
        }
        Ok(())
    }

    async fn terminate(call: ActiveCall) {
        if call.live.swap(false, Ordering::SeqCst) {
            let (done_tx, done_rx) = oneshot::channel();
            if call
                .tx
                .send(SessionEvent::End {
                    remote: false,
                    done: Some(done_tx),
                })
                .is_ok()
            {
                let _ = done_rx.await;
            }
        }
        for forwarder in call.forwarders {
            forwarder.abort();
        }
        call.driver.abort();
    }

    async fn send_control(&self, cmd: ControlCmd) -> Result<()> {
        let slot = self.active.lock().await;
        let call = slot
            .as_ref()
            .filter(|call| call.live.load(Ordering::SeqCst))
            .ok_or_else(|| Error::ProtocolViolation("no active session".to_string()))?;
        call.tx
            .send(SessionEvent::Control(cmd))
            .map_err(|_| Error::ProtocolViolation("no active session".to_string()))
    }

    /// Flip the local video mute, returning the new enabled state
    pub async fn toggle_video(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.send_control(ControlCmd::ToggleVideo(tx)).await?;
        rx.await
            .map_err(|_| Error::Transient("session ended during control".to_string()))
    }

    /// Flip the local audio mute, returning the new enabled state
    pub async fn toggle_audio(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.send_control(ControlCmd::ToggleAudio(tx)).await?;
        rx.await
            .map_err(|_| Error::Transient("session ended during control".to_string()))
    }

    /// Swap front/rear camera, returning the new facing
    pub async fn switch_camera(&self) -> Result<CameraFacing> {
        let (tx, rx) = oneshot::channel();
        self.send_control(ControlCmd::SwitchCamera(tx)).await?;
        rx.await
            .map_err(|_| Error::Transient("session ended during control".to_string()))?
    }

    /// Substitute the outgoing camera with a display capture
    pub async fn start_screen_share(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send_control(ControlCmd::StartScreenShare(tx)).await?;
        rx.await
            .map_err(|_| Error::Transient("session ended during control".to_string()))?
    }

    /// Restore the camera after a screen share
    pub async fn stop_screen_share(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send_control(ControlCmd::StopScreenShare(tx)).await?;
        rx.await
            .map_err(|_| Error::Transient("session ended during control".to_string()))?
    }

    /// Snapshot of the live session's negotiation telemetry
    pub async fn stats(&self) -> Result<CallStats> {
        let (tx, rx) = oneshot::channel();
        self.send_control(ControlCmd::Stats(tx)).await?;
        rx.await
            .map_err(|_| Error::Transient("session ended during control".to_string()))
    }
}

/// Status string announced for a connection-state transition, if any.
fn connection_status_text(state: RTCPeerConnectionState) -> Option<&'static str> {
    match state {
        RTCPeerConnectionState::Connected => Some("Connected"),
        RTCPeerConnectionState::Disconnected => Some("Reconnecting..."),
        RTCPeerConnectionState::Failed => Some("Connection failed"),
        _ => None,
    }
}

fn publish_phase(
    phase_tx: &watch::Sender<CallPhase>,
    events: &broadcast::Sender<CallEvent>,
    phase: CallPhase,
) {
    let changed = *phase_tx.borrow() != phase;
    if changed {
        info!(?phase, "session phase");
        phase_tx.send_replace(phase);
        let _ = events.send(CallEvent::Phase(phase));
    }
}

/// Owns all mutable state for one session; runs on a single task
struct Driver {
    role: CallRole,
    room_id: String,
    user_id: String,
    config: CallConfig,
    store: Arc<dyn SignalingStore>,
    media_source: Arc<dyn MediaSource>,
    pc: Arc<PeerConnection>,
    media: Arc<LocalMedia>,
    live: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<SessionEvent>,
    events: broadcast::Sender<CallEvent>,
    phase_tx: Arc<watch::Sender<CallPhase>>,
    stats: CallStats,
    buffer: CandidateBuffer,
    /// Remote description applied; candidates feed the connection directly
    remote_applied: bool,
    /// Host: answer applied. Joiner: answer published.
    answered: bool,
    tracker: RestartTracker,
    probe_pending: bool,
    /// Facing of the camera displaced by a live screen share
    screen_saved_facing: Option<CameraFacing>,
    /// At least one remote track has arrived
    remote_media_seen: bool,
    ended: bool,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
            if self.ended {
                break;
            }
        }
        debug!(room_id = %self.room_id, "session driver finished");
    }

    async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::SessionChanged(doc) => self.on_session_changed(doc).await,
            SessionEvent::RemoteCandidate(seq, doc) => self.on_remote_candidate(seq, doc).await,
            SessionEvent::LocalCandidate(init) => self.on_local_candidate(init).await,
            SessionEvent::ConnectionState(state) => self.on_connection_state(state),
            SessionEvent::RemoteTrack(track) => {
                debug!(room_id = %self.room_id, "remote track arrived");
                if !self.remote_media_seen {
                    self.remote_media_seen = true;
                    let _ = self.events.send(CallEvent::StatusText("In call".to_string()));
                }
                let _ = self
                    .events
                    .send(CallEvent::RemoteMedia(RemoteMediaHandle::new(track)));
            }
            SessionEvent::PublishOffer => self.on_publish_offer().await,
            SessionEvent::RestartProbe => self.on_restart_probe().await,
            SessionEvent::Control(cmd) => self.on_control(cmd).await,
            SessionEvent::End { remote, done } => {
                self.teardown(remote).await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
        }
    }

    async fn on_session_changed(&mut self, doc: SessionDoc) {
        if doc.status == SessionStatus::Ended {
            info!(room_id = %self.room_id, "remote party ended the call");
            self.teardown(true).await;
            return;
        }

        match self.role {
            CallRole::Host => {
                if self.answered {
                    return;
                }
                let Some(answer) = doc.answer else { return };

                match self.pc.apply_answer(&answer).await {
                    Ok(()) => {
                        self.answered = true;
                        self.remote_applied = true;
                        self.flush_buffer().await;
                        self.set_phase(CallPhase::Negotiating);
                        self.status_text("Connecting...");
                    }
                    Err(e) => warn!(room_id = %self.room_id, error = %e, "failed to apply answer"),
                }
            }
            CallRole::Joiner => {
                if self.answered {
                    return;
                }
                let Some(offer) = doc.offer.clone() else {
                    return;
                };

                let answer = match self.pc.accept_offer(&offer).await {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!(room_id = %self.room_id, error = %e, "failed to accept offer");
                        return;
                    }
                };

                self.remote_applied = true;
                self.flush_buffer().await;

                let mut participants = doc.participants.clone();
                if !doc.has_participant(&self.user_id) {
                    participants.push(self.user_id.clone());
                }
                let patch = SessionPatch {
                    answer: Some(answer),
                    status: Some(SessionStatus::Active),
                    participants: Some(participants),
                    ..Default::default()
                };
                if let Err(e) = self.store.update_session(&self.room_id, patch).await {
                    warn!(room_id = %self.room_id, error = %e, "failed to publish answer");
                    self.set_phase(CallPhase::Failed);
                    self.status_text("Call setup failed");
                    return;
                }

                self.answered = true;
                self.set_phase(CallPhase::Negotiating);
                self.status_text("Connecting...");
            }
        }
    }

    async fn on_remote_candidate(&mut self, seq: u64, doc: CandidateDoc) {
        if doc.sender_id == self.user_id {
            return;
        }

        if !self.remote_applied {
            self.buffer.push(seq, doc);
            return;
        }

        match self.pc.add_remote_candidate(&doc).await {
            Ok(()) => self.stats.record_candidates_received(1),
            Err(e) => warn!(room_id = %self.room_id, error = %e, "failed to add candidate"),
        }
    }

    async fn flush_buffer(&mut self) {
        let buffered = self.buffer.drain();
        if buffered.is_empty() {
            return;
        }
        debug!(
            room_id = %self.room_id,
            count = buffered.len(),
            "flushing buffered candidates"
        );
        let mut applied = 0u64;
        for (_, doc) in buffered {
            match self.pc.add_remote_candidate(&doc).await {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(room_id = %self.room_id, error = %e, "failed to add buffered candidate")
                }
            }
        }
        self.stats.record_candidates_received(applied);
    }

    async fn on_local_candidate(&mut self, init: RTCIceCandidateInit) {
        let doc = CandidateDoc {
            candidate: init.candidate,
            sdp_mline_index: init.sdp_mline_index,
            sdp_mid: init.sdp_mid,
            sender_id: self.user_id.clone(),
        };
        match self.store.add_candidate(&self.room_id, doc).await {
            Ok(()) => self.stats.record_candidate_sent(),
            Err(e) => warn!(room_id = %self.room_id, error = %e, "failed to publish candidate"),
        }
    }

    fn on_connection_state(&mut self, state: RTCPeerConnectionState) {
        self.stats.record_state(state);
        if let Some(text) = connection_status_text(state) {
            self.status_text(text);
        }
        match state {
            RTCPeerConnectionState::Connected => {
                self.tracker.record_success();
                self.probe_pending = false;
                self.set_phase(CallPhase::Connected);
            }
            RTCPeerConnectionState::Disconnected => {
                self.set_phase(CallPhase::Reconnecting);
                self.schedule_probe(Duration::from_millis(
                    self.config.disconnected_restart_delay_ms,
                ));
            }
            RTCPeerConnectionState::Failed => {
                self.set_phase(CallPhase::Reconnecting);
                self.schedule_probe(Duration::from_millis(self.config.failed_restart_delay_ms));
            }
            _ => {}
        }
    }

    fn schedule_probe(&mut self, base: Duration) {
        if self.probe_pending || self.ended {
            return;
        }
        if !self.tracker.should_restart() {
            warn!(
                room_id = %self.room_id,
                attempts = self.tracker.attempts(),
                "restart budget exhausted"
            );
            self.set_phase(CallPhase::Failed);
            self.status_text("Connection lost");
            return;
        }

        let delay = self.tracker.next_delay(base);
        debug!(room_id = %self.room_id, ?delay, "scheduling repair probe");
        self.probe_pending = true;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SessionEvent::RestartProbe);
        });
    }

    async fn on_restart_probe(&mut self) {
        self.probe_pending = false;
        let state = self.pc.connection_state();
        if !matches!(
            state,
            RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
        ) {
            return;
        }

        self.tracker.record_attempt();
        self.stats.record_ice_restart();
        if let Err(e) = self.pc.restart_ice().await {
            warn!(room_id = %self.room_id, error = %e, "ICE restart failed");
        }
        // If the repair does not take, the state stays bad without a fresh
        // state-change event; keep probing until recovery or the cap.
        self.schedule_probe(Duration::from_millis(self.config.failed_restart_delay_ms));
    }

    async fn on_publish_offer(&mut self) {
        if self.ended || self.answered || self.role != CallRole::Host {
            return;
        }

        let offer = match self.pc.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                warn!(room_id = %self.room_id, error = %e, "failed to create offer");
                self.set_phase(CallPhase::Failed);
                self.status_text("Call setup failed");
                return;
            }
        };

        let patch = SessionPatch {
            offer: Some(offer),
            ..Default::default()
        };
        if let Err(e) = self.store.update_session(&self.room_id, patch).await {
            warn!(room_id = %self.room_id, error = %e, "failed to publish offer");
            self.set_phase(CallPhase::Failed);
            self.status_text("Call setup failed");
            return;
        }

        info!(room_id = %self.room_id, "offer published");
        self.status_text("Waiting for the other party...");
    }

    async fn on_control(&mut self, cmd: ControlCmd) {
        match cmd {
            ControlCmd::ToggleVideo(reply) => {
                let _ = reply.send(self.media.toggle_video().await);
            }
            ControlCmd::ToggleAudio(reply) => {
                let _ = reply.send(self.media.toggle_audio().await);
            }
            ControlCmd::SwitchCamera(reply) => {
                let _ = reply.send(self.switch_camera().await);
            }
            ControlCmd::StartScreenShare(reply) => {
                let _ = reply.send(self.start_screen_share().await);
            }
            ControlCmd::StopScreenShare(reply) => {
                let _ = reply.send(self.stop_screen_share().await);
            }
            ControlCmd::Stats(reply) => {
                let _ = reply.send(self.stats.clone());
            }
        }
    }

    async fn switch_camera(&mut self) -> Result<CameraFacing> {
        if self.screen_saved_facing.is_some() {
            return Err(Error::ProtocolViolation(
                "camera switch unavailable during screen share".to_string(),
            ));
        }

        let current = self
            .media
            .video()
            .await
            .facing()
            .unwrap_or(CameraFacing::Front);
        let target = current.flipped();

        let track = self
            .media_source
            .capture_camera(target, &self.config.video)
            .await?;
        self.pc.replace_video_track(track.rtc()).await?;
        self.media.replace_video(track).await;

        info!(room_id = %self.room_id, ?target, "camera switched");
        Ok(target)
    }

    async fn start_screen_share(&mut self) -> Result<()> {
        if self.screen_saved_facing.is_some() {
            return Err(Error::ProtocolViolation(
                "screen share already active".to_string(),
            ));
        }

        let display = self.media_source.capture_display().await?;
        self.pc.replace_video_track(display.rtc()).await?;
        let displaced = self.media.replace_video(display).await;
        self.screen_saved_facing = Some(displaced.facing().unwrap_or(CameraFacing::Front));

        info!(room_id = %self.room_id, "screen share started");
        Ok(())
    }

    async fn stop_screen_share(&mut self) -> Result<()> {
        let facing = self.screen_saved_facing.take().ok_or_else(|| {
            Error::ProtocolViolation("no screen share active".to_string())
        })?;

        // The displaced capture was stopped when the share started; acquire
        // a fresh camera rather than reviving the old track.
        let camera = self
            .media_source
            .capture_camera(facing, &self.config.video)
            .await?;
        self.pc.replace_video_track(camera.rtc()).await?;
        self.media.replace_video(camera).await;

        info!(room_id = %self.room_id, "screen share stopped");
        Ok(())
    }

    async fn teardown(&mut self, remote: bool) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.live.store(false, Ordering::SeqCst);

        if let Err(e) = self.pc.close().await {
            warn!(room_id = %self.room_id, error = %e, "error closing connection");
        }

        if !remote {
            let patch = SessionPatch {
                status: Some(SessionStatus::Ended),
                ended_at: Some(SystemTime::now()),
                ..Default::default()
            };
            if let Err(e) = self.store.update_session(&self.room_id, patch).await {
                debug!(room_id = %self.room_id, error = %e, "end marker write failed");
            }

            // The ending party deletes the document after a grace period so
            // the other side can observe the ended status first.
            let store = self.store.clone();
            let room_id = self.room_id.clone();
            let grace = self.config.session_delete_grace();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if let Err(e) = store.delete_session(&room_id).await {
                    debug!(room_id, error = %e, "grace-period delete failed");
                }
            });
        }

        self.set_phase(CallPhase::Ended);
        self.status_text("Call ended");
        info!(room_id = %self.room_id, remote, "session ended");
    }

    fn set_phase(&self, phase: CallPhase) {
        publish_phase(&self.phase_tx, &self.events, phase);
    }

    fn status_text(&self, text: &str) {
        let _ = self.events.send(CallEvent::StatusText(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StaticMediaSource;
    use crate::store::{InvitationDoc, InvitationStatus, MemoryStore, StoreSubscription};
    use async_trait::async_trait;

    fn quick_config() -> CallConfig {
        CallConfig {
            offer_settle_delay_ms: 10,
            session_delete_grace_secs: 0,
            ..CallConfig::default()
        }
    }

    fn engine_with(store: Arc<MemoryStore>) -> NegotiationEngine {
        NegotiationEngine::new(quick_config(), store, Arc::new(StaticMediaSource::new())).unwrap()
    }

    struct NoMedia;

    #[async_trait]
    impl MediaSource for NoMedia {
        async fn capture(
            &self,
            _video: &crate::config::VideoQuality,
            _audio: &crate::config::AudioQuality,
        ) -> Result<LocalMedia> {
            Err(Error::Unavailable("no capture device".to_string()))
        }

        async fn capture_camera(
            &self,
            _facing: CameraFacing,
            _video: &crate::config::VideoQuality,
        ) -> Result<Arc<crate::media::LocalTrack>> {
            Err(Error::Unavailable("no capture device".to_string()))
        }

        async fn capture_display(&self) -> Result<Arc<crate::media::LocalTrack>> {
            Err(Error::Unavailable("no capture device".to_string()))
        }
    }

    /// Delegates to a real store but refuses candidate subscriptions.
    struct NoCandidateWatch(Arc<MemoryStore>);

    #[async_trait]
    impl SignalingStore for NoCandidateWatch {
        async fn create_session(&self, room_id: &str, doc: SessionDoc) -> Result<()> {
            self.0.create_session(room_id, doc).await
        }

        async fn get_session(&self, room_id: &str) -> Result<Option<SessionDoc>> {
            self.0.get_session(room_id).await
        }

        async fn update_session(&self, room_id: &str, patch: SessionPatch) -> Result<()> {
            self.0.update_session(room_id, patch).await
        }

        async fn delete_session(&self, room_id: &str) -> Result<()> {
            self.0.delete_session(room_id).await
        }

        async fn watch_session(&self, room_id: &str) -> Result<StoreSubscription<SessionDoc>> {
            self.0.watch_session(room_id).await
        }

        async fn add_candidate(&self, room_id: &str, candidate: CandidateDoc) -> Result<()> {
            self.0.add_candidate(room_id, candidate).await
        }

        async fn watch_candidates(
            &self,
            _room_id: &str,
        ) -> Result<StoreSubscription<(u64, CandidateDoc)>> {
            Err(Error::Transient("candidate watch refused".to_string()))
        }

        async fn create_invitation(&self, doc: InvitationDoc) -> Result<String> {
            self.0.create_invitation(doc).await
        }

        async fn get_invitation(&self, invitation_id: &str) -> Result<Option<InvitationDoc>> {
            self.0.get_invitation(invitation_id).await
        }

        async fn set_invitation_status(
            &self,
            invitation_id: &str,
            status: InvitationStatus,
        ) -> Result<()> {
            self.0.set_invitation_status(invitation_id, status).await
        }

        async fn pending_invitations(&self) -> Result<Vec<(String, InvitationDoc)>> {
            self.0.pending_invitations().await
        }

        async fn watch_incoming_invitations(
            &self,
            user_id: &str,
        ) -> Result<StoreSubscription<(String, InvitationDoc)>> {
            self.0.watch_incoming_invitations(user_id).await
        }

        async fn watch_invitation(
            &self,
            invitation_id: &str,
        ) -> Result<StoreSubscription<InvitationDoc>> {
            self.0.watch_invitation(invitation_id).await
        }
    }

    #[tokio::test]
    async fn test_controls_require_active_session() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let err = engine.toggle_video().await.unwrap_err();
        assert!(err.is_protocol_violation());
        let err = engine.switch_camera().await.unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_end_without_session_is_noop() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        engine.end_session().await.unwrap();
        engine.end_session().await.unwrap();
        assert_eq!(engine.phase(), CallPhase::Idle);
    }

    #[tokio::test]
    async fn test_join_missing_room_fails() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let err = engine
            .start_session("no-such-room", CallRole::Joiner, &User::new("bob", "Bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(engine.phase(), CallPhase::Idle);
    }

    #[tokio::test]
    async fn test_media_failure_aborts_start() {
        let engine = NegotiationEngine::new(
            quick_config(),
            Arc::new(MemoryStore::new()),
            Arc::new(NoMedia),
        )
        .unwrap();
        let err = engine
            .start_session("room", CallRole::Host, &User::new("alice", "Alice"))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(engine.phase(), CallPhase::Idle);
    }

    #[tokio::test]
    async fn test_host_publishes_single_offer() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let user = User::new("alice", "Alice");

        engine
            .start_session("room-offer", CallRole::Host, &user)
            .await
            .unwrap();

        let offer = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(doc) = store.get_session("room-offer").await.unwrap() {
                    if let Some(offer) = doc.offer {
                        return offer;
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("offer never published");
        assert_eq!(offer.kind, crate::store::SdpKind::Offer);

        engine.end_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_ending_marks_session_ended() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let user = User::new("alice", "Alice");

        engine
            .start_session("room-end", CallRole::Host, &user)
            .await
            .unwrap();
        engine.end_session().await.unwrap();

        assert_eq!(engine.phase(), CallPhase::Ended);
        // The end marker lands before end_session resolves; deletion follows
        // after the grace period.
        if let Some(doc) = store.get_session("room-end").await.unwrap() {
            assert_eq!(doc.status, SessionStatus::Ended);
            assert!(doc.ended_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_joiner_registers_at_join_time() {
        let store = Arc::new(MemoryStore::new());
        store
            .create_session("room-join", SessionDoc::new("alice".to_string()))
            .await
            .unwrap();
        let engine = engine_with(store.clone());

        engine
            .start_session("room-join", CallRole::Joiner, &User::new("bob", "Bob"))
            .await
            .unwrap();

        // Visible in the store before any offer exchange has happened.
        let doc = store.get_session("room-join").await.unwrap().unwrap();
        assert!(doc.has_participant("bob"));
        assert_eq!(doc.status, SessionStatus::Active);
        assert!(doc.offer.is_none());

        engine.end_session().await.unwrap();
    }

    #[test]
    fn test_connection_status_announcements() {
        use RTCPeerConnectionState::*;
        assert_eq!(connection_status_text(Connected), Some("Connected"));
        assert_eq!(connection_status_text(Disconnected), Some("Reconnecting..."));
        assert_eq!(connection_status_text(Failed), Some("Connection failed"));
        assert_eq!(connection_status_text(New), None);
    }

    #[tokio::test]
    async fn test_host_setup_failure_removes_session_doc() {
        let inner = Arc::new(MemoryStore::new());
        let engine = NegotiationEngine::new(
            quick_config(),
            Arc::new(NoCandidateWatch(inner.clone())),
            Arc::new(StaticMediaSource::new()),
        )
        .unwrap();

        let err = engine
            .start_session("room-orphan", CallRole::Host, &User::new("alice", "Alice"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(inner.get_session("room-orphan").await.unwrap().is_none());
        assert_eq!(engine.phase(), CallPhase::Idle);
    }
}
