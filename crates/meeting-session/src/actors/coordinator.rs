//! The session loop.
//!
//! One task owns all meeting state: the roster, every peer link, chat
//! history, media, and the reconnect timers. Everything reaches it as
//! a message, through the command mailbox, the transport event funnel,
//! or the internal signal channel, so handlers never contend on locks
//! and every state change happens in a single place.

use crate::actors::messages::{
    InternalEvent, Meeting, MeetingRole, SessionCommand, SessionPhase, SessionSnapshot,
};
use crate::chat::ChatRelay;
use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::events::{IncomingInvite, LogLevel, RemovalReason, SessionEvent, SessionEvents};
use crate::link::{LinkState, PeerLink};
use crate::media::{MediaController, ScreenShareGrant};
use crate::ports::directory::PeerDirectory;
use crate::ports::media::{MediaDevices, MediaKind};
use crate::ports::rtc::{
    IceCandidateInit, RemoteMediaTrack, RtcTransportFactory, TransportError, TransportEvent,
    TransportState,
};
use crate::ports::signaling::SignalingPort;
use crate::reconnect::{ReconnectSupervisor, ScheduleOutcome};
use crate::registry::ConnectionRegistry;
use crate::roster::Roster;
use bytes::Bytes;
use common::{MeetingId, PeerId, TrackId};
use signaling_protocol::{codec, ChannelFrame, ChatMessage, Signal, SignalEnvelope};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Who this endpoint is on the network.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    /// Stable peer identifier, unique on the LAN
    pub peer_id: PeerId,
    /// Name shown to other participants
    pub display_name: String,
}

/// Handle for interacting with a running session loop.
///
/// Cheap to clone; all clones talk to the same loop.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    cancel_token: CancellationToken,
    events: SessionEvents,
}

impl SessionHandle {
    /// Create a meeting and become its host.
    ///
    /// # Errors
    ///
    /// Returns an error if a meeting is already active or the session
    /// loop has shut down.
    pub async fn create_meeting(&self) -> Result<MeetingId, SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionCommand::CreateMeeting { respond_to })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Join the meeting with the given code as a guest.
    ///
    /// # Errors
    ///
    /// Returns an error if a meeting is already active, the code is
    /// empty, or the session loop has shut down.
    pub async fn join_by_code(&self, code: impl Into<String>) -> Result<(), SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionCommand::JoinByCode {
                code: code.into(),
                respond_to,
            })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Invite peers to the active meeting. Host only.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no active meeting or this endpoint
    /// is not its host.
    pub async fn invite(&self, peers: Vec<PeerId>) -> Result<(), SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionCommand::Invite { peers, respond_to })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Accept a received invite and join its meeting.
    ///
    /// # Errors
    ///
    /// Returns an error if a meeting is already active.
    pub async fn accept_invite(&self, invite: IncomingInvite) -> Result<(), SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionCommand::AcceptInvite { invite, respond_to })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Decline a received invite.
    ///
    /// # Errors
    ///
    /// Returns an error if the session loop has shut down.
    pub async fn decline_invite(&self, invite: IncomingInvite) -> Result<(), SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionCommand::DeclineInvite { invite, respond_to })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Leave the active meeting. As host this ends the meeting for
    /// everyone. A no-op outside a meeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the session loop has shut down.
    pub async fn leave(&self) -> Result<(), SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionCommand::Leave { respond_to })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Send a chat message to every participant.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no active meeting.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionCommand::SendChat {
                text: text.into(),
                respond_to,
            })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Toggle the microphone, returning the new enabled state.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no active meeting or no microphone
    /// can be acquired.
    pub async fn toggle_mic(&self) -> Result<bool, SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionCommand::ToggleMic { respond_to })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Start sharing the screen, to everyone or to an explicit subset
    /// of participants. Restarts the share if one is already running.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no active meeting, capture cannot
    /// start, or no named target is in the meeting.
    pub async fn start_screen_share(
        &self,
        targets: Option<Vec<PeerId>>,
    ) -> Result<(), SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionCommand::StartScreenShare {
                targets,
                respond_to,
            })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Stop the running screen share. A no-op when not sharing.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no active meeting.
    pub async fn stop_screen_share(&self) -> Result<(), SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionCommand::StopScreenShare { respond_to })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Feed a signaling envelope into the session loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the session loop has shut down.
    pub async fn deliver_signal(&self, envelope: SignalEnvelope) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::DeliverSignal { envelope })
            .await
            .map_err(|_| SessionError::SessionClosed)
    }

    /// Fetch a point-in-time snapshot of the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session loop has shut down.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionCommand::Snapshot { respond_to })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Subscribe to session events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Stop the session loop. It leaves any active meeting first.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The session loop state. Constructed and run via [`spawn`](Self::spawn).
pub struct SessionCoordinator {
    identity: SessionIdentity,
    config: SessionConfig,
    signaling: Arc<dyn SignalingPort>,
    directory: Arc<dyn PeerDirectory>,
    transports: Arc<dyn RtcTransportFactory>,
    receiver: mpsc::Receiver<SessionCommand>,
    transport_tx: mpsc::Sender<(PeerId, TransportEvent)>,
    transport_rx: mpsc::Receiver<(PeerId, TransportEvent)>,
    internal_tx: mpsc::Sender<InternalEvent>,
    internal_rx: mpsc::Receiver<InternalEvent>,
    cancel_token: CancellationToken,
    events: SessionEvents,
    phase: SessionPhase,
    meeting: Option<Meeting>,
    roster: Roster,
    registry: ConnectionRegistry,
    chat: ChatRelay,
    media: MediaController,
    reconnect: ReconnectSupervisor,
    /// Watches the live screen capture for an external stop
    capture_watch: Option<JoinHandle<()>>,
}

impl SessionCoordinator {
    /// Spawn a session loop and return a handle to it.
    #[must_use]
    pub fn spawn(
        identity: SessionIdentity,
        config: SessionConfig,
        signaling: Arc<dyn SignalingPort>,
        directory: Arc<dyn PeerDirectory>,
        transports: Arc<dyn RtcTransportFactory>,
        devices: Arc<dyn MediaDevices>,
        cancel_token: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.command_buffer);
        let (transport_tx, transport_rx) = mpsc::channel(config.link_event_buffer);
        let (internal_tx, internal_rx) = mpsc::channel(config.link_event_buffer);
        let events = SessionEvents::new(config.event_capacity);
        let reconnect = ReconnectSupervisor::new(
            config.reconnect_delay,
            config.reconnect_max_attempts,
            internal_tx.clone(),
        );

        let coordinator = Self {
            identity,
            config,
            signaling,
            directory,
            transports,
            receiver,
            transport_tx,
            transport_rx,
            internal_tx,
            internal_rx,
            cancel_token: cancel_token.clone(),
            events: events.clone(),
            phase: SessionPhase::Lobby,
            meeting: None,
            roster: Roster::new(),
            registry: ConnectionRegistry::new(),
            chat: ChatRelay::new(),
            media: MediaController::new(devices),
            reconnect,
            capture_watch: None,
        };
        let join_handle = tokio::spawn(coordinator.run());

        let handle = SessionHandle {
            sender,
            cancel_token,
            events,
        };
        (handle, join_handle)
    }

    #[instrument(skip_all, name = "session.coordinator", fields(peer_id = %self.identity.peer_id))]
    async fn run(mut self) {
        info!(target: "session.coordinator", "Session loop started");
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "session.coordinator", "Session loop cancelled");
                    self.leave_meeting(true).await;
                    break;
                }
                Some(command) = self.receiver.recv() => {
                    self.handle_command(command).await;
                }
                Some((peer_id, event)) = self.transport_rx.recv() => {
                    self.handle_transport_event(peer_id, event).await;
                }
                Some(event) = self.internal_rx.recv() => {
                    self.handle_internal(event).await;
                }
            }
        }
        info!(target: "session.coordinator", "Session loop stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::CreateMeeting { respond_to } => {
                let result = self.create_meeting().await;
                let _ = respond_to.send(result);
            }
            SessionCommand::JoinByCode { code, respond_to } => {
                let result = self.join_by_code(&code).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::Invite { peers, respond_to } => {
                let result = self.invite(peers).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::AcceptInvite { invite, respond_to } => {
                let result = self.accept_invite(invite).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::DeclineInvite { invite, respond_to } => {
                let result = self.decline_invite(invite).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::Leave { respond_to } => {
                self.leave_meeting(true).await;
                let _ = respond_to.send(Ok(()));
            }
            SessionCommand::SendChat { text, respond_to } => {
                let result = self.send_chat(text).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::ToggleMic { respond_to } => {
                let result = self.toggle_mic().await;
                let _ = respond_to.send(result);
            }
            SessionCommand::StartScreenShare {
                targets,
                respond_to,
            } => {
                let result = self.start_screen_share(targets).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::StopScreenShare { respond_to } => {
                let result = self.stop_screen_share().await;
                let _ = respond_to.send(result);
            }
            SessionCommand::DeliverSignal { envelope } => {
                self.handle_signal(envelope).await;
            }
            SessionCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    // ---- Commands ----

    async fn create_meeting(&mut self) -> Result<MeetingId, SessionError> {
        if let Some(meeting) = &self.meeting {
            return Err(SessionError::AlreadyInMeeting(meeting.id.to_string()));
        }
        let meeting_id = MeetingId::new();
        self.meeting = Some(Meeting {
            id: meeting_id.clone(),
            role: MeetingRole::Host,
        });
        self.set_phase(SessionPhase::Hosting);
        self.acquire_audio_best_effort().await;
        info!(target: "session.coordinator", meeting_id = %meeting_id, "Meeting created");
        Ok(meeting_id)
    }

    async fn join_by_code(&mut self, code: &str) -> Result<(), SessionError> {
        if let Some(meeting) = &self.meeting {
            return Err(SessionError::AlreadyInMeeting(meeting.id.to_string()));
        }
        let code = code.trim();
        if code.is_empty() {
            return Err(SessionError::InvalidRequest(
                "meeting code is empty".to_string(),
            ));
        }
        let meeting_id = MeetingId::from(code);
        self.meeting = Some(Meeting {
            id: meeting_id.clone(),
            role: MeetingRole::Guest,
        });
        self.set_phase(SessionPhase::Joining);
        self.acquire_audio_best_effort().await;
        info!(target: "session.coordinator", meeting_id = %meeting_id, "Joining meeting");

        let contacts = self.directory.online_peers().await;
        let others: Vec<PeerId> = contacts
            .into_iter()
            .map(|contact| contact.peer_id)
            .filter(|peer_id| *peer_id != self.identity.peer_id)
            .collect();
        if others.is_empty() {
            warn!(target: "session.coordinator", "No peers reachable for join");
            self.events.log(
                LogLevel::Warn,
                "Joined, but no peers are reachable yet".to_string(),
            );
            return Ok(());
        }
        for peer_id in others {
            self.send_signal(
                meeting_id.clone(),
                peer_id,
                Signal::RejoinRequest {
                    username: self.identity.display_name.clone(),
                },
            )
            .await;
        }
        Ok(())
    }

    async fn invite(&mut self, peers: Vec<PeerId>) -> Result<(), SessionError> {
        let Some(meeting) = &self.meeting else {
            return Err(SessionError::NoActiveMeeting);
        };
        if meeting.role != MeetingRole::Host {
            return Err(SessionError::NotHost("invite peers".to_string()));
        }
        let meeting_id = meeting.id.clone();
        for peer_id in peers {
            if peer_id == self.identity.peer_id {
                continue;
            }
            if self.roster.contains(&peer_id) {
                debug!(target: "session.coordinator", peer_id = %peer_id, "Peer already in meeting");
                continue;
            }
            info!(target: "session.coordinator", peer_id = %peer_id, "Inviting peer");
            self.send_signal(
                meeting_id.clone(),
                peer_id,
                Signal::Invite {
                    host_name: self.identity.display_name.clone(),
                },
            )
            .await;
        }
        Ok(())
    }

    async fn accept_invite(&mut self, invite: IncomingInvite) -> Result<(), SessionError> {
        if let Some(meeting) = &self.meeting {
            return Err(SessionError::AlreadyInMeeting(meeting.id.to_string()));
        }
        info!(target: "session.coordinator", meeting_id = %invite.meeting_id, host = %invite.host, "Accepting invite");
        self.meeting = Some(Meeting {
            id: invite.meeting_id.clone(),
            role: MeetingRole::Guest,
        });
        self.set_phase(SessionPhase::Joining);
        self.acquire_audio_best_effort().await;
        self.add_participant(invite.host.clone(), Some(invite.host_name));
        self.send_signal(
            invite.meeting_id,
            invite.host,
            Signal::InviteResponse {
                accepted: true,
                username: Some(self.identity.display_name.clone()),
            },
        )
        .await;
        Ok(())
    }

    async fn decline_invite(&mut self, invite: IncomingInvite) -> Result<(), SessionError> {
        debug!(target: "session.coordinator", meeting_id = %invite.meeting_id, host = %invite.host, "Declining invite");
        self.send_signal(
            invite.meeting_id,
            invite.host,
            Signal::InviteResponse {
                accepted: false,
                username: None,
            },
        )
        .await;
        Ok(())
    }

    async fn send_chat(&mut self, text: String) -> Result<(), SessionError> {
        let Some(meeting) = &self.meeting else {
            return Err(SessionError::NoActiveMeeting);
        };
        let meeting_id = meeting.id.clone();
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let message = ChatMessage {
            sender: self.identity.peer_id.clone(),
            sender_name: self.identity.display_name.clone(),
            text: text.to_string(),
            timestamp: common::time::epoch_millis(),
        };
        self.chat.record(&message);
        self.events.emit(SessionEvent::ChatReceived {
            message: message.clone(),
        });

        // Data channel when open, signaling always; receivers dedupe
        let frame = match codec::encode_frame(&ChannelFrame::Chat {
            chat: message.clone(),
        }) {
            Ok(encoded) => Some(Bytes::from(encoded)),
            Err(e) => {
                warn!(target: "session.chat", error = %e, "Could not encode chat frame");
                None
            }
        };
        for peer_id in self.roster.peer_ids() {
            if let (Some(bytes), Some(link)) = (&frame, self.registry.get(&peer_id)) {
                if let Some(channel) = link.data_channel() {
                    if channel.is_open() {
                        if let Err(e) = channel.send(bytes.clone()).await {
                            debug!(target: "session.chat", peer_id = %peer_id, error = %e, "Channel chat send failed");
                        }
                    }
                }
            }
            self.send_signal(
                meeting_id.clone(),
                peer_id,
                Signal::Chat {
                    chat: message.clone(),
                },
            )
            .await;
        }
        Ok(())
    }

    async fn toggle_mic(&mut self) -> Result<bool, SessionError> {
        if self.meeting.is_none() {
            return Err(SessionError::NoActiveMeeting);
        }
        let had_mic = self.media.mic().is_some();
        let enabled = self
            .media
            .toggle_mic()
            .await
            .map_err(|e| SessionError::MediaUnavailable(e.to_string()))?;
        if !had_mic {
            // The device came up mid-meeting; existing links need it
            self.attach_mic_to_links().await;
        }
        info!(target: "session.coordinator", enabled, "Microphone toggled");
        Ok(enabled)
    }

    async fn start_screen_share(
        &mut self,
        targets: Option<Vec<PeerId>>,
    ) -> Result<(), SessionError> {
        let Some(meeting) = &self.meeting else {
            return Err(SessionError::NoActiveMeeting);
        };
        let meeting_id = meeting.id.clone();

        if self.media.is_sharing() {
            // Restart toward the new target set
            self.stop_screen_share_inner(meeting_id.clone()).await;
        }

        let (grant, initial_targets) = match targets {
            None => (ScreenShareGrant::Everyone, self.roster.peer_ids()),
            Some(list) => {
                let wanted: HashSet<PeerId> = list
                    .into_iter()
                    .filter(|peer_id| {
                        *peer_id != self.identity.peer_id && self.roster.contains(peer_id)
                    })
                    .collect();
                if wanted.is_empty() {
                    return Err(SessionError::InvalidRequest(
                        "no share target is in the meeting".to_string(),
                    ));
                }
                let initial = wanted.iter().cloned().collect();
                (ScreenShareGrant::Selected(wanted), initial)
            }
        };

        let capture = self
            .media
            .start_screen()
            .await
            .map_err(|e| SessionError::MediaUnavailable(e.to_string()))?;
        let track = capture.track;
        self.spawn_capture_watch(track.id(), capture.ended);
        let selective = grant.is_selective();
        self.media.set_grant(grant);
        info!(
            target: "session.media",
            selective,
            targets = initial_targets.len(),
            "Screen share starting"
        );

        for peer_id in initial_targets {
            if selective {
                self.send_signal(
                    meeting_id.clone(),
                    peer_id.clone(),
                    Signal::ScreenShareInvite {
                        host_name: self.identity.display_name.clone(),
                    },
                )
                .await;
            }
            let attached = match self.registry.get_mut(&peer_id) {
                Some(link) => Some(link.attach_video(Arc::clone(&track)).await),
                None => None,
            };
            match attached {
                Some(Ok(())) => {
                    if let Err(e) = self.negotiate(&peer_id).await {
                        warn!(target: "session.media", peer_id = %peer_id, error = %e, "Renegotiation for share failed");
                    }
                }
                Some(Err(e)) => {
                    warn!(target: "session.media", peer_id = %peer_id, error = %e, "Could not attach screen track");
                }
                None => {}
            }
            self.send_signal(meeting_id.clone(), peer_id, Signal::ScreenShare { sharing: true })
                .await;
        }
        Ok(())
    }

    async fn stop_screen_share(&mut self) -> Result<(), SessionError> {
        let Some(meeting) = &self.meeting else {
            return Err(SessionError::NoActiveMeeting);
        };
        let meeting_id = meeting.id.clone();
        if !self.media.is_sharing() {
            return Ok(());
        }
        self.stop_screen_share_inner(meeting_id).await;
        Ok(())
    }

    /// Tear down the outbound share: capture, watcher, per-link video
    /// bindings, and the stop announcement toward everyone granted.
    async fn stop_screen_share_inner(&mut self, meeting_id: MeetingId) {
        if let Some(watch) = self.capture_watch.take() {
            watch.abort();
        }
        let _ = self.media.stop_screen().await;
        let targets: Vec<PeerId> = match self.media.clear_grant() {
            Some(ScreenShareGrant::Everyone) => self.roster.peer_ids(),
            Some(ScreenShareGrant::Selected(targets)) => targets.into_iter().collect(),
            None => Vec::new(),
        };

        for peer_id in targets {
            let detached = match self.registry.get_mut(&peer_id) {
                Some(link) => Some(link.detach_video().await),
                None => None,
            };
            match detached {
                Some(Ok(true)) => {
                    if let Err(e) = self.negotiate(&peer_id).await {
                        warn!(target: "session.media", peer_id = %peer_id, error = %e, "Renegotiation after share stop failed");
                    }
                }
                Some(Err(e)) => {
                    warn!(target: "session.media", peer_id = %peer_id, error = %e, "Could not detach screen track");
                }
                Some(Ok(false)) | None => {}
            }
            self.send_signal(meeting_id.clone(), peer_id, Signal::ScreenShare { sharing: false })
                .await;
        }
        info!(target: "session.media", "Screen share stopped");
    }

    /// Leave the active meeting, notifying peers unless they told us
    /// first. Idempotent.
    async fn leave_meeting(&mut self, notify: bool) {
        let Some(meeting) = self.meeting.take() else {
            return;
        };
        info!(target: "session.coordinator", meeting_id = %meeting.id, "Leaving meeting");

        if notify {
            let farewell = match meeting.role {
                MeetingRole::Host => Signal::Ended,
                MeetingRole::Guest => Signal::Leave,
            };
            for peer_id in self.roster.peer_ids() {
                self.send_signal(meeting.id.clone(), peer_id, farewell.clone())
                    .await;
            }
        }

        if let Some(watch) = self.capture_watch.take() {
            watch.abort();
        }
        self.reconnect.cancel_all();
        for mut link in self.registry.drain() {
            link.close().await;
        }
        self.media.stop_all().await;
        self.chat.clear();
        self.roster.clear();
        self.set_phase(SessionPhase::Lobby);
        self.events
            .emit(SessionEvent::MeetingEnded { meeting_id: meeting.id });
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            meeting: self.meeting.clone(),
            participants: self.roster.participants(),
            links: self.registry.states(),
            chat: self.chat.history().to_vec(),
            pending_retries: self.reconnect.pending_count(),
            mic_enabled: self.media.mic_enabled(),
            sharing: self.media.is_sharing(),
        }
    }

    // ---- Signaling ----

    async fn handle_signal(&mut self, envelope: SignalEnvelope) {
        if envelope.from == self.identity.peer_id {
            // Brokers may echo broadcasts back to us
            return;
        }
        trace!(
            target: "session.coordinator",
            from = %envelope.from,
            kind = envelope.signal.kind(),
            "Signal received"
        );
        let in_meeting = self
            .meeting
            .as_ref()
            .is_some_and(|meeting| meeting.id == envelope.meeting_id);
        let SignalEnvelope {
            from,
            meeting_id,
            signal,
            ..
        } = envelope;

        match signal {
            // Invites are about a meeting we are not in, so they skip
            // the meeting gate
            Signal::Invite { host_name } => self.on_invite(from, meeting_id, host_name),
            _ if !in_meeting => {
                if self.meeting.is_none() {
                    debug!(target: "session.coordinator", from = %from, kind = signal.kind(), "Dropping signal with no active meeting");
                } else {
                    warn!(target: "session.coordinator", from = %from, kind = signal.kind(), "Dropping signal for a different meeting");
                }
            }
            Signal::InviteResponse { accepted, username } => {
                self.on_invite_response(from, accepted, username).await;
            }
            Signal::Offer { sdp } => self.on_offer(from, sdp).await,
            Signal::Answer { sdp } => self.on_answer(from, sdp).await,
            Signal::IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                self.on_remote_candidate(
                    from,
                    IceCandidateInit {
                        candidate,
                        sdp_mid,
                        sdp_mline_index,
                    },
                )
                .await;
            }
            Signal::Chat { chat } => self.deliver_chat(chat),
            Signal::Leave => self.remove_participant(&from, RemovalReason::Left).await,
            Signal::Ended => self.on_meeting_ended(&from).await,
            Signal::ScreenShare { sharing } => self.on_screen_share(from, sharing),
            Signal::ScreenShareInvite { host_name } => {
                self.events.emit(SessionEvent::ScreenShareInvited {
                    peer_id: from,
                    host_name,
                });
            }
            Signal::RejoinRequest { username } => self.on_join_request(from, username).await,
            Signal::ParticipantList { participants } => {
                self.on_participant_list(from, participants).await;
            }
        }
    }

    fn on_invite(&mut self, host: PeerId, meeting_id: MeetingId, host_name: String) {
        if self
            .meeting
            .as_ref()
            .is_some_and(|meeting| meeting.id == meeting_id)
        {
            debug!(target: "session.coordinator", host = %host, "Invite for the meeting we are already in");
            return;
        }
        info!(target: "session.coordinator", host = %host, meeting_id = %meeting_id, "Invite received");
        self.events.emit(SessionEvent::InviteReceived {
            invite: IncomingInvite {
                meeting_id,
                host,
                host_name,
            },
        });
    }

    async fn on_invite_response(&mut self, from: PeerId, accepted: bool, username: Option<String>) {
        let is_host = self
            .meeting
            .as_ref()
            .is_some_and(|meeting| meeting.role == MeetingRole::Host);
        if !is_host {
            warn!(target: "session.coordinator", from = %from, "Invite response arrived at a non-host");
            return;
        }
        if !accepted {
            info!(target: "session.coordinator", peer_id = %from, "Invite declined");
            self.events
                .emit(SessionEvent::InviteDeclined { peer_id: from });
            return;
        }
        info!(target: "session.coordinator", peer_id = %from, "Invite accepted");
        self.add_participant(from.clone(), username);
        self.initiate_link(from.clone()).await;
        self.announce_share_if_granted(&from).await;
    }

    async fn on_join_request(&mut self, from: PeerId, username: String) {
        let Some(meeting) = &self.meeting else {
            return;
        };
        let meeting_id = meeting.id.clone();
        info!(target: "session.coordinator", peer_id = %from, "Peer requested to join");
        self.add_participant(from.clone(), Some(username));

        // Tell the joiner who else is here, ourselves included
        let mut participants: Vec<PeerId> = self
            .roster
            .peer_ids()
            .into_iter()
            .filter(|peer_id| *peer_id != from)
            .collect();
        participants.push(self.identity.peer_id.clone());
        self.send_signal(
            meeting_id,
            from.clone(),
            Signal::ParticipantList { participants },
        )
        .await;

        self.initiate_link(from.clone()).await;
        self.announce_share_if_granted(&from).await;
    }

    async fn on_participant_list(&mut self, from: PeerId, participants: Vec<PeerId>) {
        // Resolve display names against the directory in one pass
        let contacts = self.directory.online_peers().await;
        let name_of = |peer_id: &PeerId| {
            contacts
                .iter()
                .find(|contact| contact.peer_id == *peer_id)
                .map(|contact| contact.display_name.clone())
        };

        self.add_participant(from.clone(), name_of(&from));
        for peer_id in participants {
            if peer_id == self.identity.peer_id || peer_id == from {
                continue;
            }
            let known = self.roster.contains(&peer_id);
            let display_name = name_of(&peer_id);
            self.add_participant(peer_id.clone(), display_name);
            if !known && !self.registry.contains(&peer_id) {
                // A member the rejoin request never reached; offer from
                // our side, glare resolution covers the race
                self.initiate_link(peer_id).await;
            }
        }
    }

    async fn on_offer(&mut self, from: PeerId, sdp: String) {
        let Some(meeting) = &self.meeting else {
            return;
        };
        let meeting_id = meeting.id.clone();

        if let Some(link) = self.registry.get(&from) {
            if link.state() == LinkState::OfferSent {
                // Offer glare: both sides offered at once. The smaller
                // peer id keeps its offer, the larger one answers.
                if self.identity.peer_id < from {
                    debug!(target: "session.coordinator", peer_id = %from, "Glare, keeping our offer");
                    return;
                }
                debug!(target: "session.coordinator", peer_id = %from, "Glare, answering the peer's offer");
                self.close_link(&from).await;
            }
        }

        if !self.roster.contains(&from) {
            // An offer implies membership we have not heard about yet
            self.add_participant(from.clone(), None);
        }
        if !self.registry.contains(&from) {
            if let Err(e) = self.create_link(from.clone(), false).await {
                warn!(target: "session.coordinator", peer_id = %from, error = %e, "Could not build transport for offer");
                self.events
                    .log(LogLevel::Warn, format!("Connection with {from} failed"));
                return;
            }
        }

        let applied = match self.registry.get_mut(&from) {
            Some(link) => link.apply_remote_offer(sdp).await,
            None => return,
        };
        match applied {
            Ok(answer_sdp) => {
                self.send_signal(meeting_id, from, Signal::Answer { sdp: answer_sdp })
                    .await;
            }
            Err(e) => {
                warn!(target: "session.coordinator", peer_id = %from, error = %e, "Failed to answer offer");
                self.events
                    .log(LogLevel::Warn, format!("Negotiation with {from} failed"));
            }
        }
    }

    async fn on_answer(&mut self, from: PeerId, sdp: String) {
        let Some(link) = self.registry.get_mut(&from) else {
            debug!(target: "session.coordinator", peer_id = %from, "Answer for unknown link");
            return;
        };
        if link.state() != LinkState::OfferSent {
            warn!(
                target: "session.coordinator",
                peer_id = %from,
                state = link.state().as_str(),
                "Dropping answer in unexpected state"
            );
            return;
        }
        if let Err(e) = link.apply_remote_answer(sdp).await {
            warn!(target: "session.coordinator", peer_id = %from, error = %e, "Failed to apply answer");
            self.events
                .log(LogLevel::Warn, format!("Negotiation with {from} failed"));
        }
    }

    async fn on_remote_candidate(&mut self, from: PeerId, candidate: IceCandidateInit) {
        let Some(link) = self.registry.get_mut(&from) else {
            debug!(target: "session.coordinator", peer_id = %from, "Candidate for unknown link");
            return;
        };
        link.handle_remote_candidate(candidate).await;
    }

    fn deliver_chat(&mut self, message: ChatMessage) {
        if self.chat.record(&message) {
            self.events.emit(SessionEvent::ChatReceived { message });
        } else {
            trace!(target: "session.chat", "Duplicate chat suppressed");
        }
    }

    fn on_screen_share(&mut self, from: PeerId, sharing: bool) {
        if sharing {
            if self.media.record_remote_share(from.clone()) {
                self.events.emit(SessionEvent::ScreenShareChanged {
                    peer_id: from,
                    sharing: true,
                });
            } else {
                debug!(target: "session.coordinator", peer_id = %from, "Duplicate share announcement");
            }
            return;
        }
        // A stop only counts from the peer whose share it is
        let has_video = self
            .registry
            .get(&from)
            .is_some_and(PeerLink::has_remote_video);
        if !self.media.has_remote_share(&from) && !has_video {
            warn!(target: "session.coordinator", peer_id = %from, "Ignoring stop-share from a peer with no active share");
            return;
        }
        self.media.clear_remote_share(&from);
        self.events.emit(SessionEvent::ScreenShareChanged {
            peer_id: from,
            sharing: false,
        });
    }

    async fn on_meeting_ended(&mut self, from: &PeerId) {
        info!(target: "session.coordinator", peer_id = %from, "Meeting ended by host");
        self.events.log(LogLevel::Info, "Meeting ended");
        self.leave_meeting(false).await;
    }

    // ---- Transport events ----

    async fn handle_transport_event(&mut self, peer_id: PeerId, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => {
                self.on_transport_state(peer_id, state).await;
            }
            TransportEvent::LocalCandidate(candidate) => {
                self.on_local_candidate(peer_id, candidate).await;
            }
            TransportEvent::DataChannelOpened(channel) => {
                if let Some(link) = self.registry.get_mut(&peer_id) {
                    debug!(target: "session.coordinator", peer_id = %peer_id, label = %channel.label(), "Data channel open");
                    link.set_data_channel(channel);
                }
            }
            TransportEvent::DataChannelMessage(bytes) => {
                self.on_channel_message(&peer_id, &bytes);
            }
            TransportEvent::TrackAdded(track) => self.on_track_added(peer_id, track),
            TransportEvent::TrackRemoved { track_id, kind } => {
                self.on_track_removed(&peer_id, &track_id, kind);
            }
        }
    }

    async fn on_transport_state(&mut self, peer_id: PeerId, state: TransportState) {
        let new_link_state = match state {
            TransportState::Connected => Some(LinkState::Connected),
            // A close we did not issue is a loss like any other
            TransportState::Disconnected | TransportState::Closed => Some(LinkState::Disconnected),
            TransportState::Failed => Some(LinkState::Failed),
            TransportState::New | TransportState::Connecting => None,
        };
        let changed = {
            let Some(link) = self.registry.get_mut(&peer_id) else {
                return;
            };
            link.note_transport_state(state);
            match new_link_state {
                Some(link_state) => link.set_state(link_state),
                None => false,
            }
        };
        if changed {
            if let Some(link_state) = new_link_state {
                self.events.emit(SessionEvent::LinkStateChanged {
                    peer_id: peer_id.clone(),
                    state: link_state,
                });
            }
        }
        match new_link_state {
            Some(LinkState::Connected) => {
                info!(target: "session.coordinator", peer_id = %peer_id, "Peer link connected");
                self.reconnect.cancel(&peer_id);
            }
            Some(LinkState::Disconnected | LinkState::Failed) => {
                warn!(target: "session.coordinator", peer_id = %peer_id, state = ?state, "Peer link lost");
                self.engage_reconnect(&peer_id).await;
            }
            _ => {}
        }
    }

    async fn on_local_candidate(&mut self, peer_id: PeerId, candidate: IceCandidateInit) {
        let Some(meeting) = &self.meeting else {
            return;
        };
        if !self.registry.contains(&peer_id) {
            // Late candidates from a link we already closed
            return;
        }
        self.send_signal(
            meeting.id.clone(),
            peer_id,
            Signal::IceCandidate {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
            },
        )
        .await;
    }

    fn on_channel_message(&mut self, peer_id: &PeerId, bytes: &Bytes) {
        match codec::decode_frame(bytes) {
            Ok(ChannelFrame::Chat { chat }) => self.deliver_chat(chat),
            Err(e) => {
                warn!(target: "session.chat", peer_id = %peer_id, error = %e, "Malformed channel frame");
            }
        }
    }

    fn on_track_added(&mut self, peer_id: PeerId, track: Arc<dyn RemoteMediaTrack>) {
        let Some(link) = self.registry.get_mut(&peer_id) else {
            return;
        };
        let kind = link.add_remote_track(track);
        if kind == MediaKind::Video {
            self.media.record_remote_share(peer_id.clone());
        }
        debug!(target: "session.coordinator", peer_id = %peer_id, kind = kind.as_str(), "Remote track added");
        self.events.emit(SessionEvent::IncomingMedia {
            peer_id,
            kind,
            active: true,
        });
    }

    fn on_track_removed(&mut self, peer_id: &PeerId, track_id: &TrackId, kind: MediaKind) {
        if let Some(link) = self.registry.get_mut(peer_id) {
            link.remove_remote_track_by_id(track_id);
        }
        if kind == MediaKind::Video {
            self.media.clear_remote_share(peer_id);
        }
        debug!(target: "session.coordinator", peer_id = %peer_id, kind = kind.as_str(), "Remote track removed");
        self.events.emit(SessionEvent::IncomingMedia {
            peer_id: peer_id.clone(),
            kind,
            active: false,
        });
    }

    // ---- Internal signals ----

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::RetryDue { peer_id } => self.on_retry_due(peer_id).await,
            InternalEvent::ScreenCaptureEnded { track_id } => {
                self.on_capture_ended(&track_id).await;
            }
        }
    }

    async fn on_retry_due(&mut self, peer_id: PeerId) {
        self.reconnect.on_fired(&peer_id);
        if self.meeting.is_none() {
            return;
        }
        if !self.roster.contains(&peer_id) {
            debug!(target: "session.coordinator", peer_id = %peer_id, "Skipping retry for a peer that left");
            return;
        }
        if self
            .registry
            .get(&peer_id)
            .is_some_and(|link| link.state() == LinkState::Connected)
        {
            // Recovered on its own while the timer ran
            self.reconnect.cancel(&peer_id);
            return;
        }
        info!(target: "session.coordinator", peer_id = %peer_id, "Attempting reconnect");

        // Replace the dead link with a fresh initiator
        self.close_link(&peer_id).await;
        match self.create_link(peer_id.clone(), true).await {
            Ok(()) => {
                if let Err(e) = self.negotiate(&peer_id).await {
                    warn!(target: "session.coordinator", peer_id = %peer_id, error = %e, "Reconnect negotiation failed");
                    self.engage_reconnect(&peer_id).await;
                }
            }
            Err(e) => {
                warn!(target: "session.coordinator", peer_id = %peer_id, error = %e, "Reconnect transport failed");
                self.engage_reconnect(&peer_id).await;
            }
        }
    }

    async fn on_capture_ended(&mut self, track_id: &TrackId) {
        if self.media.screen_track_id().as_ref() != Some(track_id) {
            // A notification from a capture we already replaced
            debug!(target: "session.media", "Stale capture-ended notification");
            return;
        }
        let Some(meeting) = &self.meeting else {
            return;
        };
        let meeting_id = meeting.id.clone();
        info!(target: "session.media", "Screen capture ended by the platform");
        self.stop_screen_share_inner(meeting_id).await;
        self.events
            .log(LogLevel::Info, "Screen sharing stopped");
    }

    // ---- Shared plumbing ----

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!(target: "session.coordinator", from = ?self.phase, to = ?phase, "Phase changed");
            self.phase = phase;
        }
    }

    async fn acquire_audio_best_effort(&mut self) {
        if let Err(e) = self.media.ensure_audio().await {
            warn!(target: "session.coordinator", error = %e, "Continuing without microphone");
            self.events
                .log(LogLevel::Warn, format!("Microphone unavailable: {e}"));
        }
    }

    async fn send_signal(&self, meeting_id: MeetingId, to: PeerId, signal: Signal) {
        let envelope = SignalEnvelope::new(self.identity.peer_id.clone(), to, meeting_id, signal);
        if let Err(e) = self.signaling.send(envelope).await {
            // Signaling is best effort; retries ride on link recovery
            debug!(target: "session.coordinator", error = %e, "Signal send failed");
        }
    }

    /// Add a peer to the roster, emitting an event for new members and
    /// promoting the phase once the meeting has someone in it.
    fn add_participant(&mut self, peer_id: PeerId, display_name: Option<String>) {
        let newly_added = self.roster.add(peer_id.clone(), display_name);
        if !newly_added {
            return;
        }
        let display_name = self
            .roster
            .display_name(&peer_id)
            .unwrap_or(peer_id.as_str())
            .to_string();
        info!(target: "session.coordinator", peer_id = %peer_id, display_name = %display_name, "Participant added");
        self.events.emit(SessionEvent::ParticipantAdded {
            peer_id,
            display_name,
        });
        if matches!(self.phase, SessionPhase::Hosting | SessionPhase::Joining) {
            self.set_phase(SessionPhase::Active);
        }
    }

    async fn remove_participant(&mut self, peer_id: &PeerId, reason: RemovalReason) {
        self.cleanup_peer(peer_id).await;
        if let Some(participant) = self.roster.remove(peer_id) {
            info!(target: "session.coordinator", peer_id = %peer_id, reason = ?reason, "Participant removed");
            self.events.emit(SessionEvent::ParticipantRemoved {
                peer_id: participant.peer_id,
                reason,
            });
        }
    }

    /// Forget everything attached to a peer: timers, share state, and
    /// its link. Keeps the roster entry; callers decide about that.
    async fn cleanup_peer(&mut self, peer_id: &PeerId) {
        self.reconnect.cancel(peer_id);
        self.media.clear_remote_share(peer_id);
        if let Some(grant) = self.media.grant_mut() {
            grant.remove_target(peer_id);
        }
        self.close_link(peer_id).await;
    }

    /// Close and drop the link to a peer, announcing the media that
    /// disappears with it.
    async fn close_link(&mut self, peer_id: &PeerId) {
        let Some(mut link) = self.registry.remove(peer_id) else {
            return;
        };
        for kind in link.remote_track_kinds() {
            self.events.emit(SessionEvent::IncomingMedia {
                peer_id: peer_id.clone(),
                kind,
                active: false,
            });
        }
        link.close().await;
        self.events.emit(SessionEvent::LinkStateChanged {
            peer_id: peer_id.clone(),
            state: LinkState::Closed,
        });
    }

    /// Build a transport and link toward a peer, attaching whatever
    /// local media it should carry.
    async fn create_link(&mut self, peer_id: PeerId, initiator: bool) -> Result<(), TransportError> {
        let transport = self
            .transports
            .create(&peer_id, self.transport_tx.clone())
            .await?;
        let mut link = PeerLink::new(peer_id.clone(), initiator, transport);
        if let Err(e) = self.outfit_link(&mut link, initiator).await {
            link.close().await;
            return Err(e);
        }
        debug!(target: "session.coordinator", peer_id = %peer_id, initiator, "Link created");
        self.registry.insert(link);
        Ok(())
    }

    /// Attach local media and, for the initiator, the data channel to
    /// a link that is not yet registered.
    async fn outfit_link(&self, link: &mut PeerLink, initiator: bool) -> Result<(), TransportError> {
        if let Some(mic) = self.media.mic() {
            link.attach_audio(mic).await?;
        }
        if let Some(screen) = self.media.screen() {
            if self
                .media
                .grant()
                .is_some_and(|grant| grant.is_target(link.peer_id()))
            {
                link.attach_video(screen).await?;
            }
        }
        if initiator {
            let channel = link
                .transport()
                .create_data_channel(&self.config.data_channel_label)
                .await?;
            link.set_data_channel(channel);
        }
        Ok(())
    }

    /// Create a link as initiator and start negotiating. Failures are
    /// logged; connectivity repair belongs to the reconnect machinery.
    async fn initiate_link(&mut self, peer_id: PeerId) {
        if self.registry.contains(&peer_id) {
            debug!(target: "session.coordinator", peer_id = %peer_id, "Link already exists");
            return;
        }
        match self.create_link(peer_id.clone(), true).await {
            Ok(()) => {
                if let Err(e) = self.negotiate(&peer_id).await {
                    warn!(target: "session.coordinator", peer_id = %peer_id, error = %e, "Failed to start negotiation");
                    self.events
                        .log(LogLevel::Warn, format!("Could not reach {peer_id}"));
                }
            }
            Err(e) => {
                warn!(target: "session.coordinator", peer_id = %peer_id, error = %e, "Failed to build transport");
                self.events
                    .log(LogLevel::Warn, format!("Could not reach {peer_id}"));
            }
        }
    }

    /// Send a fresh offer on an existing link. Also the renegotiation
    /// path after a track change.
    async fn negotiate(&mut self, peer_id: &PeerId) -> Result<(), TransportError> {
        let Some(meeting) = &self.meeting else {
            return Ok(());
        };
        let meeting_id = meeting.id.clone();
        let sdp = match self.registry.get_mut(peer_id) {
            Some(link) => link.start_offer().await?,
            None => return Ok(()),
        };
        self.send_signal(meeting_id, peer_id.clone(), Signal::Offer { sdp })
            .await;
        Ok(())
    }

    async fn attach_mic_to_links(&mut self) {
        let Some(mic) = self.media.mic() else {
            return;
        };
        for peer_id in self.registry.peer_ids() {
            let attached = match self.registry.get_mut(&peer_id) {
                Some(link) => link.attach_audio(Arc::clone(&mic)).await,
                None => continue,
            };
            match attached {
                Ok(()) => {
                    if let Err(e) = self.negotiate(&peer_id).await {
                        warn!(target: "session.coordinator", peer_id = %peer_id, error = %e, "Renegotiation failed");
                    }
                }
                Err(e) => {
                    warn!(target: "session.coordinator", peer_id = %peer_id, error = %e, "Could not attach microphone");
                }
            }
        }
    }

    /// Tell a newly linked peer about our running share when the grant
    /// covers it.
    async fn announce_share_if_granted(&mut self, peer_id: &PeerId) {
        let Some(meeting) = &self.meeting else {
            return;
        };
        if self.media.is_sharing()
            && self
                .media
                .grant()
                .is_some_and(|grant| grant.is_target(peer_id))
        {
            self.send_signal(
                meeting.id.clone(),
                peer_id.clone(),
                Signal::ScreenShare { sharing: true },
            )
            .await;
        }
    }

    async fn engage_reconnect(&mut self, peer_id: &PeerId) {
        match self.reconnect.schedule(peer_id) {
            ScheduleOutcome::Scheduled(attempt) => {
                info!(target: "session.reconnect", peer_id = %peer_id, attempt, "Reconnect scheduled");
                if attempt == 1 {
                    self.events
                        .log(LogLevel::Warn, format!("Connection to {peer_id} lost, retrying"));
                }
            }
            ScheduleOutcome::AlreadyPending => {
                debug!(target: "session.reconnect", peer_id = %peer_id, "Reconnect already pending");
            }
            ScheduleOutcome::Exhausted => {
                warn!(target: "session.reconnect", peer_id = %peer_id, "Reconnect attempts exhausted");
                self.events
                    .log(LogLevel::Warn, format!("{peer_id} is unreachable"));
                self.remove_participant(peer_id, RemovalReason::Unreachable)
                    .await;
            }
        }
    }

    fn spawn_capture_watch(&mut self, track_id: TrackId, ended: oneshot::Receiver<()>) {
        if let Some(old) = self.capture_watch.take() {
            old.abort();
        }
        let signals = self.internal_tx.clone();
        self.capture_watch = Some(tokio::spawn(async move {
            // Err means the capture was stopped from our side
            if ended.await.is_ok() {
                let _ = signals
                    .send(InternalEvent::ScreenCaptureEnded { track_id })
                    .await;
            }
        }));
    }
}
