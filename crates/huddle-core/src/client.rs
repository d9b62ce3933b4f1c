//! The client façade.
//!
//! Every public operation validates synchronously (session state, then
//! capability, then role) and hands a command to the transport without
//! waiting. Results come back as transport events, which one task applies in
//! arrival order before fanning them out to observers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::breakout::{self, BreakoutService, BreakoutState};
use crate::capabilities::{
    AllowAllDevices, Capability, CapabilityChange, CapabilityRegistry, DevicePermissions,
};
use crate::chat::{self, ChatLog, ChatService};
use crate::controls::{AudioControls, VideoControls};
use crate::dispatcher::{EventDispatcher, ObserverToken};
use crate::errors::HuddleError;
use crate::events::{AreaSet, EventArea, HuddleEvent, HuddleEventListener, ParticipantInfo};
use crate::hand_raise::{self, HandQueue, HandRaiseManager};
use crate::lock;
use crate::params::{JoinParams, StartParams};
use crate::participants::Roster;
use crate::privileges::{
    PrivilegeCoordinator, PrivilegeKind, PrivilegeOutcome, RequestId, Role, RoleAction,
};
use crate::session::{
    EndReason, LeaveReason, MeetingInfo, SessionId, SessionMachine, SessionState, Transition,
    Trigger,
};
use crate::settings::ClientConfig;
use crate::transcription::{self, TranscriptionService, TranscriptionState};
use crate::transport::{EventSink, Inbound, Transport, TransportCommand, TransportEvent};
use crate::waiting_room::WaitingRoomService;
use crate::webinar::{self, QaBoard, WebinarService};
use huddle_media::{
    BufferPool, FrameIngress, FrameSink, MediaPipeline, MediaRuntime, Resolution, StreamKind,
    Subscription, SubscriptionStats, UserId,
};

pub(crate) struct SessionCore {
    pub(crate) machine: SessionMachine,
    pub(crate) roster: Roster,
}

/// State shared by the façade, the feature services and the event loop.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) dispatcher: EventDispatcher,
    pub(crate) capabilities: CapabilityRegistry,
    pub(crate) privileges: PrivilegeCoordinator,
    pub(crate) media: MediaPipeline,
    pub(crate) pool: BufferPool,
    pub(crate) handle: Handle,
    core: Mutex<SessionCore>,
    state_tx: watch::Sender<SessionState>,
    pub(crate) chat: Mutex<ChatLog>,
    pub(crate) hands: Mutex<HandQueue>,
    pub(crate) auto_lower: Mutex<Option<JoinHandle<()>>>,
    pub(crate) breakout: Mutex<BreakoutState>,
    pub(crate) qa: Mutex<QaBoard>,
    pub(crate) transcription: Mutex<TranscriptionState>,
    pub(crate) pinned: Mutex<Option<UserId>>,
}

impl Shared {
    /// Lock order: `core` before any of the feature locks.
    pub(crate) fn core(&self) -> MutexGuard<'_, SessionCore> {
        lock(&self.core)
    }

    pub(crate) fn emit(&self, event: HuddleEvent) {
        self.dispatcher.emit(event);
    }

    pub(crate) fn send(&self, command: TransportCommand) -> Result<(), HuddleError> {
        tracing::debug!(?command, "transport command");
        self.transport.send(command).map_err(HuddleError::from)
    }

    /// Session must be in progress and `capability` (if any) enabled.
    /// Returns the local role for further checks.
    pub(crate) fn gate(
        &self,
        operation: &'static str,
        capability: Option<Capability>,
    ) -> Result<Role, HuddleError> {
        let core = self.core();
        core.machine.require_in_session(operation)?;
        if let Some(cap) = capability {
            if !self.capabilities.is_enabled(cap) {
                return Err(HuddleError::CapabilityDisabled(cap));
            }
        }
        Ok(core.roster.local_role())
    }

    pub(crate) fn gate_role(
        &self,
        operation: &'static str,
        capability: Option<Capability>,
        action: RoleAction,
    ) -> Result<(), HuddleError> {
        self.gate(operation, capability)?.require(action, operation)
    }

    pub(crate) fn participant(&self, user: UserId) -> Result<ParticipantInfo, HuddleError> {
        self.core()
            .roster
            .participant(user)
            .cloned()
            .ok_or(HuddleError::ParticipantNotFound(user))
    }

    pub(crate) fn local_id(&self) -> Option<UserId> {
        self.core().roster.local_id()
    }

    pub(crate) fn local_user(&self, operation: &'static str) -> Result<UserId, HuddleError> {
        self.local_id().ok_or(HuddleError::InvalidState {
            operation,
            state: "joining",
        })
    }

    pub(crate) fn emit_capability_changes(&self, changes: Vec<CapabilityChange>) {
        for change in changes {
            self.emit(HuddleEvent::CapabilityChanged {
                capability: change.capability,
                enabled: change.enabled,
            });
        }
    }

    /// Caller holds the core lock so state changes and their events stay in
    /// the same order.
    fn publish(&self, transition: &Transition) {
        tracing::info!(
            from = transition.from.name(),
            to = transition.to.name(),
            "session state changed"
        );
        self.state_tx.send_replace(transition.to.clone());
        self.emit(HuddleEvent::SessionStateChanged(transition.to.clone()));
    }

    /// Tear down everything tied to the session that just ended and emit the
    /// terminal event. Runs once per session: `Ended` has no way out but a
    /// new join.
    fn finish(&self, core: &mut SessionCore, reason: EndReason) {
        let streams = self.media.unsubscribe_all();
        self.privileges.end_session();
        if let Some(timer) = lock(&self.auto_lower).take() {
            timer.abort();
        }
        core.roster.clear();
        tracing::info!(?reason, streams, "session ended");
        self.emit(HuddleEvent::SessionEnded { reason });
    }

    fn reset_for_new_session(&self, core: &mut SessionCore) {
        core.roster.clear();
        lock(&self.chat).clear();
        lock(&self.hands).clear();
        *lock(&self.breakout) = BreakoutState::default();
        *lock(&self.qa) = QaBoard::default();
        *lock(&self.transcription) = TranscriptionState::default();
        *lock(&self.pinned) = None;
        self.capabilities.reset_session();
    }

    fn fire(&self, core: &mut SessionCore, trigger: Trigger) -> Option<Transition> {
        match core.machine.fire(trigger) {
            Ok(transition) => {
                self.publish(&transition);
                if let Some(reason) = transition.ended() {
                    self.finish(core, reason);
                }
                Some(transition)
            }
            Err(e) => {
                tracing::warn!("ignoring transport trigger: {e}");
                None
            }
        }
    }

    fn send_leave(&self, session: Option<SessionId>, end_for_all: bool) {
        let Some(session) = session else { return };
        if let Err(e) = self.send(TransportCommand::Leave {
            session,
            end_for_all,
        }) {
            tracing::warn!("leave command failed: {e}");
        }
    }

    fn reconnect_expired(&self) {
        let mut core = self.core();
        if !matches!(core.machine.state(), SessionState::Reconnecting { .. }) {
            return;
        }
        tracing::warn!("reconnection timed out");
        let session = core.machine.session_id().cloned();
        self.fire(&mut core, Trigger::Terminated(EndReason::ConnectionFailed));
        drop(core);
        self.send_leave(session, false);
    }

    fn set_privilege(&self, kind: PrivilegeKind, granted: bool) {
        if self.privileges.set_granted(kind, granted) {
            self.emit(HuddleEvent::PrivilegeChanged { kind, granted });
            let changes = self.capabilities.set_privilege(kind, granted);
            self.emit_capability_changes(changes);
        }
    }

    fn apply(self: &Arc<Self>, inbound: Inbound, reconnect_deadline: &mut Option<Instant>) {
        let Inbound { session, event } = inbound;
        {
            let core = self.core();
            if !core.machine.state().is_live() {
                tracing::debug!(?event, "dropping transport event outside a session");
                return;
            }
            if session.as_ref() != core.machine.session_id() {
                tracing::debug!(?event, "dropping transport event of another session");
                return;
            }
        }

        match event {
            TransportEvent::Connected => {
                self.fire(&mut self.core(), Trigger::Connected);
            }
            TransportEvent::JoinConfirmed { myself, meeting } => {
                let role = myself.role;
                {
                    let mut core = self.core();
                    let Some(transition) = self.fire(&mut core, Trigger::JoinConfirmed) else {
                        return;
                    };
                    core.roster.set_local_id(myself.user_id);
                    core.roster.upsert(myself);
                    core.machine.set_meeting(meeting.clone());
                    tracing::info!(topic = %meeting.topic, from = transition.from.name(), "joined meeting");
                    self.emit(HuddleEvent::MeetingReady(meeting));
                }
                self.privileges.set_local_role(role);
                let changes = self.capabilities.set_role(role);
                self.emit_capability_changes(changes);
            }
            TransportEvent::WaitingRoomStatus { waiting } => {
                let mut core = self.core();
                match core.machine.set_waiting_room(waiting) {
                    Ok(()) => self.emit(HuddleEvent::WaitingRoomStatusChanged { waiting }),
                    Err(e) => tracing::warn!("ignoring waiting room status: {e}"),
                }
            }
            TransportEvent::ConnectionLost => {
                let transition = self.fire(&mut self.core(), Trigger::ConnectionLost);
                if let Some(transition) = transition {
                    if transition.ended().is_some() {
                        *reconnect_deadline = None;
                    } else if !matches!(transition.from, SessionState::Reconnecting { .. }) {
                        *reconnect_deadline = Some(Instant::now() + self.config.reconnect_timeout());
                    }
                }
            }
            TransportEvent::ConnectionRestored => {
                if self.fire(&mut self.core(), Trigger::ConnectionRestored).is_some() {
                    *reconnect_deadline = None;
                }
            }
            TransportEvent::Ended(reason) => {
                *reconnect_deadline = None;
                self.fire(&mut self.core(), Trigger::Terminated(reason));
            }
            TransportEvent::Error(error) => {
                if error.retryable {
                    tracing::warn!(%error, "transport command failed");
                    self.emit(HuddleEvent::SessionError(error));
                } else {
                    tracing::error!(%error, "terminal transport failure");
                    *reconnect_deadline = None;
                    self.emit(HuddleEvent::SessionError(error));
                    self.fire(
                        &mut self.core(),
                        Trigger::Terminated(EndReason::ConnectionFailed),
                    );
                }
            }
            TransportEvent::PolicyUpdate(policy) => {
                let changes = self.capabilities.apply_policy(policy);
                self.emit_capability_changes(changes);
            }

            TransportEvent::UserJoined(info) => {
                let mut core = self.core();
                let waiting = info.in_waiting_room;
                core.roster.upsert(info.clone());
                if waiting {
                    self.emit(HuddleEvent::UserWaiting(info));
                } else {
                    self.emit(HuddleEvent::UserJoined(info));
                }
            }
            TransportEvent::UserLeft(user) => self.on_user_left(user),
            TransportEvent::UserAdmitted(user) => {
                let mut core = self.core();
                let Some(p) = core.roster.participant_mut(user) else {
                    return;
                };
                p.in_waiting_room = false;
                let info = p.clone();
                self.emit(HuddleEvent::UserAdmitted(user));
                self.emit(HuddleEvent::UserJoined(info));
            }
            TransportEvent::RoleChanged { user, role } => {
                let is_me = {
                    let mut core = self.core();
                    let Some(p) = core.roster.participant_mut(user) else {
                        return;
                    };
                    p.role = role;
                    p.is_interpreter = role == Role::Interpreter;
                    let is_me = p.is_myself;
                    self.emit(HuddleEvent::RoleChanged { user, role });
                    is_me
                };
                if is_me {
                    tracing::info!(?role, "local role changed");
                    self.privileges.set_local_role(role);
                    let changes = self.capabilities.set_role(role);
                    self.emit_capability_changes(changes);
                }
            }
            TransportEvent::NameChanged { user, name } => {
                let mut core = self.core();
                if let Some(p) = core.roster.participant_mut(user) {
                    p.name = name.clone();
                    self.emit(HuddleEvent::NameChanged { user, name });
                }
            }
            TransportEvent::AudioStatus { user, status } => {
                let mut core = self.core();
                if let Some(p) = core.roster.participant_mut(user) {
                    p.audio = status;
                    self.emit(HuddleEvent::AudioStatusChanged { user, status });
                }
            }
            TransportEvent::VideoStatus { user, status } => {
                let mut core = self.core();
                if let Some(p) = core.roster.participant_mut(user) {
                    p.video = status;
                    self.emit(HuddleEvent::VideoStatusChanged { user, status });
                }
            }
            TransportEvent::ActiveSpeakers(speakers) => {
                self.core().roster.set_active_speakers(speakers.clone());
                self.emit(HuddleEvent::ActiveSpeakersChanged(speakers.clone()));
                hand_raise::on_active_speakers(self, &speakers);
            }
            TransportEvent::HandRaised { user, raised_at_ms } => {
                hand_raise::on_raised(self, user, raised_at_ms)
            }
            TransportEvent::HandLowered(user) => hand_raise::on_lowered(self, user),

            TransportEvent::ChatReceived(message) => chat::on_message(self, message),
            TransportEvent::ChatDeleted { message_id, by } => chat::on_deleted(self, message_id, by),
            TransportEvent::ChatPrivilegeChanged(privilege) => {
                self.emit(HuddleEvent::ChatPrivilegeChanged(privilege));
                let changes = self.capabilities.set_chat_privilege(privilege);
                self.emit_capability_changes(changes);
            }

            TransportEvent::PrivilegeRequested {
                request,
                kind,
                requester,
            } => {
                let name = self
                    .core()
                    .roster
                    .participant(requester)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                let handler = self.privileges.incoming(request, kind, requester, name);
                self.emit(HuddleEvent::PrivilegeRequested(handler));
            }
            TransportEvent::PrivilegeOutcome { request, granted } => {
                let outcome = if granted {
                    PrivilegeOutcome::Granted
                } else {
                    PrivilegeOutcome::Denied
                };
                if let Some(kind) = self.privileges.resolve(&request, outcome) {
                    if granted {
                        self.set_privilege(kind, true);
                    }
                }
            }
            TransportEvent::PrivilegeChanged { kind, granted } => self.set_privilege(kind, granted),
            TransportEvent::RecordingStatus { user, status } => {
                self.emit(HuddleEvent::RecordingStatusChanged { user, status })
            }

            TransportEvent::BreakoutRooms(rooms) => breakout::on_rooms(self, rooms),
            TransportEvent::BreakoutStatus(status) => breakout::on_status(self, status),
            TransportEvent::BreakoutInvitation { room_id } => breakout::on_invitation(self, room_id),
            TransportEvent::BreakoutMembership { room_id } => breakout::on_membership(self, room_id),
            TransportEvent::BreakoutBroadcast { from, text } => {
                self.emit(HuddleEvent::BreakoutBroadcast { from, text })
            }

            TransportEvent::QuestionAdded(question) => webinar::on_question(self, question),
            TransportEvent::QuestionAnswered {
                question_id,
                answer,
            } => webinar::on_answer(self, question_id, answer),
            TransportEvent::QuestionVotes {
                question_id,
                upvotes,
            } => webinar::on_votes(self, question_id, upvotes),
            TransportEvent::AttendeeTalk { user, allowed } => {
                webinar::on_attendee_talk(self, user, allowed)
            }

            TransportEvent::TranscriptionStatus(status) => transcription::on_status(self, status),
            TransportEvent::Caption(caption) => transcription::on_caption(self, caption),
            TransportEvent::Interpretation(status) => {
                transcription::on_interpretation(self, status)
            }
        }
    }

    fn on_user_left(&self, user: UserId) {
        let mut core = self.core();
        if core.roster.remove(user).is_none() {
            return;
        }
        lock(&self.hands).lower(user);
        {
            let mut pinned = lock(&self.pinned);
            if *pinned == Some(user) {
                *pinned = None;
                self.emit(HuddleEvent::PinChanged(None));
            }
        }
        let kinds: Vec<StreamKind> = self
            .media
            .active_subscriptions()
            .into_iter()
            .filter(|(u, _)| *u == user)
            .map(|(_, kind)| kind)
            .collect();
        self.media.unsubscribe_participant(user);

        self.emit(HuddleEvent::UserLeft(user));
        for kind in kinds {
            tracing::debug!(user = %user, ?kind, "media subscription ended with participant");
            self.emit(HuddleEvent::MediaSubscriptionEnded { user, kind });
        }
    }
}

async fn session_loop(shared: Weak<Shared>, mut rx: mpsc::UnboundedReceiver<Inbound>) {
    let mut reconnect_deadline: Option<Instant> = None;
    loop {
        let event = match reconnect_deadline {
            Some(deadline) => tokio::select! {
                event = rx.recv() => event,
                _ = tokio::time::sleep_until(deadline) => {
                    reconnect_deadline = None;
                    match shared.upgrade() {
                        Some(shared) => shared.reconnect_expired(),
                        None => break,
                    }
                    continue;
                }
            },
            None => rx.recv().await,
        };
        let Some(event) = event else { break };
        let Some(shared) = shared.upgrade() else { break };
        shared.apply(event, &mut reconnect_deadline);
    }
    tracing::debug!("session loop exited");
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: Option<SessionId>,
    pub state: SessionState,
    pub meeting: Option<MeetingInfo>,
    pub in_waiting_room: bool,
    pub local_user: Option<UserId>,
    pub participant_count: usize,
}

/// Entry point for host applications. Owns one session at a time.
pub struct HuddleClient {
    shared: Arc<Shared>,
    sink: EventSink,
    event_loop: JoinHandle<()>,
}

impl HuddleClient {
    /// Must be called from within a tokio runtime.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self, HuddleError> {
        Self::with_devices(config, transport, Arc::new(AllowAllDevices))
    }

    pub fn with_devices(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        devices: Arc<dyn DevicePermissions>,
    ) -> Result<Self, HuddleError> {
        let handle = Handle::try_current()
            .map_err(|e| HuddleError::Config(format!("no tokio runtime: {e}")))?;

        let runtime = if config.media.dedicated_runtime {
            MediaRuntime::Dedicated
        } else {
            MediaRuntime::Shared(handle.clone())
        };
        let media = MediaPipeline::new(config.media.clone(), runtime)?;
        let dispatcher = EventDispatcher::new(&handle);
        let privileges = PrivilegeCoordinator::new(
            config.privilege_request_timeout(),
            dispatcher.clone(),
            transport.clone(),
            handle.clone(),
        );
        let capabilities = CapabilityRegistry::new(config.default_capabilities.clone(), devices);
        let (state_tx, _) = watch::channel(SessionState::Idle);

        let shared = Arc::new(Shared {
            pool: BufferPool::new(config.media.pool_buffers),
            chat: Mutex::new(ChatLog::new(config.chat_history_limit)),
            config,
            transport,
            dispatcher,
            capabilities,
            privileges,
            media,
            handle: handle.clone(),
            core: Mutex::new(SessionCore {
                machine: SessionMachine::new(),
                roster: Roster::new(),
            }),
            state_tx,
            hands: Mutex::new(HandQueue::default()),
            auto_lower: Mutex::new(None),
            breakout: Mutex::new(BreakoutState::default()),
            qa: Mutex::new(QaBoard::default()),
            transcription: Mutex::new(TranscriptionState::default()),
            pinned: Mutex::new(None),
        });

        let (sink, rx) = EventSink::new();
        let event_loop = handle.spawn(session_loop(Arc::downgrade(&shared), rx));
        tracing::info!("huddle client ready");

        Ok(Self {
            shared,
            sink,
            event_loop,
        })
    }

    /// Extra handle for pushing transport events of the current session,
    /// e.g. from a second signaling channel.
    pub fn event_sink(&self) -> EventSink {
        match self.shared.core().machine.session_id() {
            Some(session) => self.sink.bound_to(session.clone()),
            None => self.sink.clone(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    // ---- lifecycle ----

    pub fn start(&self, params: StartParams) -> Result<SessionId, HuddleError> {
        params.validate()?;
        self.open_session(Trigger::Start, |session| TransportCommand::Start { session, params })
    }

    pub fn join(&self, params: JoinParams) -> Result<SessionId, HuddleError> {
        params.validate()?;
        self.open_session(Trigger::Join, |session| TransportCommand::Join { session, params })
    }

    fn open_session(
        &self,
        trigger: Trigger,
        command: impl FnOnce(SessionId) -> TransportCommand,
    ) -> Result<SessionId, HuddleError> {
        let shared = &self.shared;
        let mut core = shared.core();
        let previous = core.machine.clone();
        let transition = core.machine.fire(trigger)?;
        let Some(session) = core.machine.session_id().cloned() else {
            core.machine = previous;
            return Err(HuddleError::Config("session id missing after open".into()));
        };

        shared.transport.attach(self.sink.bound_to(session.clone()));
        if let Err(e) = shared.send(command(session.clone())) {
            core.machine = previous;
            return Err(e);
        }
        shared.reset_for_new_session(&mut core);
        shared.publish(&transition);
        tracing::info!(session = %session, "session opened");
        Ok(session)
    }

    /// Leave (or end, for hosts) the current session. Leaving an ended
    /// session is a no-op.
    pub fn leave(&self, reason: LeaveReason) -> Result<(), HuddleError> {
        let shared = &self.shared;
        let mut core = shared.core();
        match core.machine.state() {
            SessionState::Ended(_) => return Ok(()),
            SessionState::Idle => {
                return Err(HuddleError::InvalidState {
                    operation: "leave",
                    state: "idle",
                });
            }
            _ => {}
        }
        if reason == LeaveReason::EndForAll {
            core.roster
                .local_role()
                .require(RoleAction::EndMeetingForAll, "end_meeting")?;
        }

        let session = core.machine.session_id().cloned();
        let transition = core.machine.fire(Trigger::Leave(reason))?;
        shared.publish(&transition);
        if let Some(end) = transition.ended() {
            shared.finish(&mut core, end);
        }
        drop(core);
        shared.send_leave(session, reason == LeaveReason::EndForAll);
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.shared.core().machine.state().clone()
    }

    /// Receiver that always holds the latest state.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn session_info(&self) -> SessionInfo {
        let core = self.shared.core();
        SessionInfo {
            id: core.machine.session_id().cloned(),
            state: core.machine.state().clone(),
            meeting: core.machine.meeting().cloned(),
            in_waiting_room: core.machine.in_waiting_room(),
            local_user: core.roster.local_id(),
            participant_count: core.roster.participant_count(),
        }
    }

    // ---- observers ----

    pub fn subscribe(
        &self,
        areas: AreaSet,
        listener: Arc<dyn HuddleEventListener>,
    ) -> ObserverToken {
        self.shared.dispatcher.subscribe(areas, listener)
    }

    pub fn subscribe_channel(
        &self,
        areas: AreaSet,
    ) -> (ObserverToken, mpsc::UnboundedReceiver<HuddleEvent>) {
        self.shared.dispatcher.subscribe_channel(areas)
    }

    pub fn unsubscribe(&self, token: ObserverToken) -> bool {
        self.shared.dispatcher.unsubscribe(token)
    }

    /// Notify `listener` whenever `capability` flips.
    pub fn on_capability_change(
        &self,
        capability: Capability,
        listener: Arc<dyn HuddleEventListener>,
    ) -> ObserverToken {
        let filtered = move |event: HuddleEvent| {
            if matches!(&event, HuddleEvent::CapabilityChanged { capability: c, .. } if *c == capability)
                || event.is_terminal()
            {
                listener.on_event(event);
            }
        };
        self.shared
            .dispatcher
            .subscribe(EventArea::Capability.into(), Arc::new(filtered))
    }

    /// Wait until every event emitted so far was delivered.
    pub async fn flush_events(&self) {
        self.shared.dispatcher.flush().await;
    }

    // ---- roster ----

    pub fn participants(&self) -> Vec<ParticipantInfo> {
        self.shared.core().roster.participants().to_vec()
    }

    pub fn participant(&self, user: UserId) -> Option<ParticipantInfo> {
        self.shared.core().roster.participant(user).cloned()
    }

    pub fn myself(&self) -> Option<ParticipantInfo> {
        self.shared.core().roster.myself().cloned()
    }

    pub fn active_speakers(&self) -> Vec<UserId> {
        self.shared.core().roster.active_speakers().to_vec()
    }

    // ---- capabilities ----

    pub fn is_enabled(&self, capability: Capability) -> bool {
        self.shared.capabilities.is_enabled(capability)
    }

    pub fn capabilities(&self) -> BTreeMap<Capability, bool> {
        self.shared.capabilities.snapshot()
    }

    /// Local on/off switch for a feature, independent of server policy.
    pub fn set_feature_enabled(&self, capability: Capability, enabled: bool) {
        let changes = self.shared.capabilities.set_toggle(capability, enabled);
        self.shared.emit_capability_changes(changes);
    }

    /// Re-read device permissions after the platform reported a change.
    pub fn refresh_device_permissions(&self) {
        let changes = self.shared.capabilities.recompute();
        self.shared.emit_capability_changes(changes);
    }

    // ---- raw media ----

    pub fn subscribe_video(
        &self,
        user: UserId,
        resolution: Resolution,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Subscription, HuddleError> {
        self.subscribe_stream("subscribe_video", user, StreamKind::Video, resolution, sink)
    }

    pub fn subscribe_share(
        &self,
        user: UserId,
        resolution: Resolution,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Subscription, HuddleError> {
        self.subscribe_stream("subscribe_share", user, StreamKind::Share, resolution, sink)
    }

    pub fn subscribe_audio(
        &self,
        user: UserId,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Subscription, HuddleError> {
        self.subscribe_stream("subscribe_audio", user, StreamKind::Audio, Resolution::default(), sink)
    }

    fn subscribe_stream(
        &self,
        operation: &'static str,
        user: UserId,
        kind: StreamKind,
        resolution: Resolution,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Subscription, HuddleError> {
        let shared = &self.shared;
        // Held across the subscribe so a concurrent departure cannot slip in
        // between the roster check and the new route.
        let core = shared.core();
        core.machine.require_in_session(operation)?;
        if !shared.capabilities.is_enabled(Capability::RawData) {
            return Err(HuddleError::CapabilityDisabled(Capability::RawData));
        }
        if !core.roster.contains(user) {
            return Err(HuddleError::ParticipantNotFound(user));
        }

        let subscription = shared.media.subscribe(user, kind, resolution, sink)?;
        if let Err(e) = shared.send(TransportCommand::SubscribeStream {
            user,
            kind,
            resolution,
        }) {
            subscription.unsubscribe();
            return Err(e);
        }
        Ok(subscription)
    }

    /// Stop a raw stream. Returns `false` if it was not subscribed.
    pub fn unsubscribe_media(&self, user: UserId, kind: StreamKind) -> bool {
        let shared = &self.shared;
        let in_session = shared.core().machine.state() == &SessionState::InSession;
        if !shared.media.unsubscribe(user, kind) {
            return false;
        }
        if in_session {
            if let Err(e) = shared.send(TransportCommand::UnsubscribeStream { user, kind }) {
                tracing::warn!(user = %user, ?kind, "unsubscribe command failed: {e}");
            }
        }
        true
    }

    pub fn set_video_resolution(
        &self,
        user: UserId,
        kind: StreamKind,
        resolution: Resolution,
    ) -> Result<(), HuddleError> {
        self.shared.gate("set_video_resolution", None)?;
        self.shared.media.set_resolution(user, kind, resolution)?;
        self.shared.send(TransportCommand::SetStreamResolution {
            user,
            kind,
            resolution,
        })
    }

    /// Producer side for the network layer's decoded frames.
    pub fn frame_ingress(&self) -> FrameIngress {
        self.shared.media.ingress()
    }

    /// Pool to draw frame buffers from when feeding [`Self::frame_ingress`].
    pub fn buffer_pool(&self) -> BufferPool {
        self.shared.pool.clone()
    }

    pub fn media_stats(&self, user: UserId, kind: StreamKind) -> Option<SubscriptionStats> {
        self.shared.media.stats(user, kind)
    }

    pub fn media_subscriptions(&self) -> Vec<(UserId, StreamKind)> {
        self.shared.media.active_subscriptions()
    }

    // ---- privileges and roles ----

    pub fn request_privilege(&self, kind: PrivilegeKind) -> Result<RequestId, HuddleError> {
        self.shared.gate("request_privilege", None)?;
        self.shared.privileges.request(kind)
    }

    pub fn has_privilege(&self, kind: PrivilegeKind) -> bool {
        self.shared.privileges.has_privilege(kind)
    }

    pub fn pending_privilege_requests(&self) -> Vec<(RequestId, PrivilegeKind)> {
        self.shared.privileges.pending()
    }

    pub fn start_local_recording(&self) -> Result<(), HuddleError> {
        self.shared
            .gate("start_local_recording", Some(Capability::LocalRecording))?;
        self.shared.send(TransportCommand::StartLocalRecording)
    }

    pub fn stop_local_recording(&self) -> Result<(), HuddleError> {
        self.shared
            .gate("stop_local_recording", Some(Capability::LocalRecording))?;
        self.shared.send(TransportCommand::StopLocalRecording)
    }

    pub fn make_host(&self, user: UserId) -> Result<(), HuddleError> {
        self.change_role("make_host", RoleAction::MakeHost, user, Role::Host, None)
    }

    pub fn assign_cohost(&self, user: UserId) -> Result<(), HuddleError> {
        self.change_role("assign_cohost", RoleAction::AssignCohost, user, Role::CoHost, None)
    }

    pub fn revoke_cohost(&self, user: UserId) -> Result<(), HuddleError> {
        self.change_role(
            "revoke_cohost",
            RoleAction::AssignCohost,
            user,
            Role::Attendee,
            Some(Role::CoHost),
        )
    }

    /// Role change requests are validated here; the roster changes when
    /// the server confirms with `RoleChanged`.
    pub(crate) fn change_role(
        &self,
        operation: &'static str,
        action: RoleAction,
        user: UserId,
        role: Role,
        expected: Option<Role>,
    ) -> Result<(), HuddleError> {
        request_role_change(&self.shared, operation, action, user, role, expected)
    }

    pub fn claim_host(&self, host_key: &str) -> Result<(), HuddleError> {
        self.shared.gate("claim_host", None)?;
        if host_key.trim().is_empty() {
            return Err(HuddleError::InvalidParams("host key is empty".into()));
        }
        self.shared.send(TransportCommand::ClaimHost {
            host_key: host_key.to_string(),
        })
    }

    pub fn remove_user(&self, user: UserId) -> Result<(), HuddleError> {
        self.shared
            .gate_role("remove_user", None, RoleAction::RemoveUser)?;
        self.shared.participant(user)?;
        if self.shared.local_id() == Some(user) {
            return Err(HuddleError::InvalidParams("cannot remove yourself".into()));
        }
        self.shared.send(TransportCommand::RemoveUser(user))
    }

    pub fn rename_user(&self, user: UserId, name: &str) -> Result<(), HuddleError> {
        let role = self.shared.gate("rename_user", None)?;
        self.shared.participant(user)?;
        if self.shared.local_id() != Some(user) {
            role.require(RoleAction::RenameOthers, "rename_user")?;
        }
        if name.trim().is_empty() {
            return Err(HuddleError::InvalidParams("name is empty".into()));
        }
        self.shared.send(TransportCommand::RenameUser {
            user,
            name: name.trim().to_string(),
        })
    }

    // ---- feature services ----

    pub fn audio(&self) -> AudioControls {
        AudioControls::new(self.shared.clone())
    }

    pub fn video(&self) -> VideoControls {
        VideoControls::new(self.shared.clone())
    }

    pub fn chat(&self) -> ChatService {
        ChatService::new(self.shared.clone())
    }

    pub fn hand_raise(&self) -> HandRaiseManager {
        HandRaiseManager::new(self.shared.clone())
    }

    pub fn waiting_room(&self) -> WaitingRoomService {
        WaitingRoomService::new(self.shared.clone())
    }

    pub fn breakout(&self) -> BreakoutService {
        BreakoutService::new(self.shared.clone())
    }

    pub fn webinar(&self) -> WebinarService {
        WebinarService::new(self.shared.clone())
    }

    pub fn transcription(&self) -> TranscriptionService {
        TranscriptionService::new(self.shared.clone())
    }
}

pub(crate) fn request_role_change(
    shared: &Shared,
    operation: &'static str,
    action: RoleAction,
    user: UserId,
    role: Role,
    expected: Option<Role>,
) -> Result<(), HuddleError> {
    shared.gate_role(operation, None, action)?;
    let target = shared.participant(user)?;
    if let Some(expected) = expected {
        if target.role != expected {
            return Err(HuddleError::InvalidParams(format!(
                "{user} is {:?}, not {expected:?}",
                target.role
            )));
        }
    }
    if target.role == role {
        return Ok(());
    }
    shared.send(TransportCommand::ChangeRole { user, role })
}

impl Drop for HuddleClient {
    fn drop(&mut self) {
        let session = {
            let core = self.shared.core();
            core.machine
                .state()
                .is_live()
                .then(|| core.machine.session_id().cloned())
                .flatten()
        };
        self.shared.send_leave(session, false);
        self.event_loop.abort();
    }
}
