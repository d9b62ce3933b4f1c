//! A scripted meeting server living in the same process.
//!
//! Every command is answered the way a cooperative server would: joins are
//! confirmed with a seeded roster, role and moderation commands are echoed
//! back as roster events, and privilege requests follow a fixed policy.
//! Tests and the demo add server-side behavior with [`LoopbackTransport::inject`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use huddle_core::{
    Answer, ChatDeleteBy, ChatMessage, EventSink, MeetingInfo, ParticipantInfo, Question,
    RecordingStatus, Role, TranscriptionStatus, Transport, TransportCommand, TransportError,
    TransportEvent, UserId,
};

/// How the loopback server answers privilege requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivilegePolicy {
    #[default]
    Grant,
    Deny,
    /// Never answer, so requests time out.
    Ignore,
}

struct Server {
    local_id: UserId,
    myself: Option<ParticipantInfo>,
    peers: Vec<ParticipantInfo>,
    meeting: MeetingInfo,
    hold_in_waiting_room: bool,
    privileges: PrivilegePolicy,
    host_key: Option<String>,
    votes: HashMap<String, u32>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Server {
    fn me(&self) -> UserId {
        self.local_id
    }

    fn my_name(&self) -> String {
        self.myself.as_ref().map(|p| p.name.clone()).unwrap_or_default()
    }

    fn peer_mut(&mut self, user: UserId) -> Option<&mut ParticipantInfo> {
        self.peers.iter_mut().find(|p| p.user_id == user)
    }

    fn open(&mut self, name: &str, role: Role) -> Vec<TransportEvent> {
        self.myself = Some(ParticipantInfo::new(self.local_id, name, role));
        let mut events = vec![TransportEvent::Connected];
        if self.hold_in_waiting_room && role != Role::Host {
            events.push(TransportEvent::WaitingRoomStatus { waiting: true });
        } else {
            events.extend(self.admission());
        }
        events
    }

    fn admission(&mut self) -> Vec<TransportEvent> {
        let Some(myself) = self.myself.clone() else {
            return Vec::new();
        };
        self.hold_in_waiting_room = false;
        let mut events = vec![TransportEvent::JoinConfirmed {
            myself,
            meeting: self.meeting.clone(),
        }];
        events.extend(self.peers.iter().cloned().map(TransportEvent::UserJoined));
        events
    }

    fn respond(&mut self, command: TransportCommand) -> Vec<TransportEvent> {
        use TransportCommand as C;
        use TransportEvent as E;

        let me = self.me();
        match command {
            C::Start { params, .. } => self.open(&params.display_name, Role::Host),
            C::Join { params, .. } => self.open(&params.display_name, Role::Attendee),
            C::Leave { .. } => {
                self.myself = None;
                Vec::new()
            }

            C::MuteMyAudio(muted) => {
                let Some(myself) = self.myself.as_mut() else { return Vec::new() };
                myself.audio.muted = muted;
                vec![E::AudioStatus {
                    user: me,
                    status: myself.audio,
                }]
            }
            C::SetMyVideo(sending) => {
                let Some(myself) = self.myself.as_mut() else { return Vec::new() };
                myself.video.sending = sending;
                vec![E::VideoStatus {
                    user: me,
                    status: myself.video,
                }]
            }
            C::MuteUserAudio { user, mute: true } => {
                let Some(peer) = self.peer_mut(user) else { return Vec::new() };
                peer.audio.muted = true;
                vec![E::AudioStatus {
                    user,
                    status: peer.audio,
                }]
            }
            C::MuteAllAudio { .. } => self
                .peers
                .iter_mut()
                .map(|p| {
                    p.audio.muted = true;
                    E::AudioStatus {
                        user: p.user_id,
                        status: p.audio,
                    }
                })
                .collect(),
            C::StopUserVideo(user) => {
                let Some(peer) = self.peer_mut(user) else { return Vec::new() };
                peer.video.sending = false;
                vec![E::VideoStatus {
                    user,
                    status: peer.video,
                }]
            }

            C::SendChat {
                message_id,
                target,
                text,
            } => vec![E::ChatReceived(ChatMessage {
                id: message_id,
                sender: me,
                sender_name: self.my_name(),
                target,
                text,
                timestamp_ms: now_ms(),
                is_mine: false,
            })],
            C::DeleteChat { message_id } => vec![E::ChatDeleted {
                message_id,
                by: ChatDeleteBy::Sender,
            }],
            C::SetChatPrivilege(privilege) => vec![E::ChatPrivilegeChanged(privilege)],

            C::RaiseHand => vec![E::HandRaised {
                user: me,
                raised_at_ms: now_ms(),
            }],
            C::LowerHand(user) => vec![E::HandLowered(user)],
            C::LowerAllHands => std::iter::once(me)
                .chain(self.peers.iter().map(|p| p.user_id))
                .map(E::HandLowered)
                .collect(),

            C::RequestPrivilege { request, .. } => match self.privileges {
                PrivilegePolicy::Grant => vec![E::PrivilegeOutcome {
                    request,
                    granted: true,
                }],
                PrivilegePolicy::Deny => vec![E::PrivilegeOutcome {
                    request,
                    granted: false,
                }],
                PrivilegePolicy::Ignore => Vec::new(),
            },
            C::StartLocalRecording => vec![E::RecordingStatus {
                user: me,
                status: RecordingStatus::Started,
            }],
            C::StopLocalRecording => vec![E::RecordingStatus {
                user: me,
                status: RecordingStatus::Stopped,
            }],

            C::ChangeRole { user, role } => {
                if user == me {
                    if let Some(myself) = self.myself.as_mut() {
                        myself.role = role;
                    }
                } else if let Some(peer) = self.peer_mut(user) {
                    peer.role = role;
                } else {
                    return Vec::new();
                }
                vec![E::RoleChanged { user, role }]
            }
            C::ClaimHost { host_key } => {
                if self.host_key.as_deref() == Some(host_key.as_str()) {
                    vec![E::RoleChanged {
                        user: me,
                        role: Role::Host,
                    }]
                } else {
                    vec![E::Error(TransportError::retryable("host key rejected"))]
                }
            }
            C::RemoveUser(user) => {
                self.peers.retain(|p| p.user_id != user);
                vec![E::UserLeft(user)]
            }
            C::RenameUser { user, name } => vec![E::NameChanged { user, name }],
            C::AllowAttendeeTalk { user, allow } => vec![E::AttendeeTalk {
                user,
                allowed: allow,
            }],

            C::AdmitUser(user) => {
                let Some(peer) = self.peer_mut(user) else { return Vec::new() };
                peer.in_waiting_room = false;
                vec![E::UserAdmitted(user)]
            }
            C::AdmitAll => self
                .peers
                .iter_mut()
                .filter(|p| p.in_waiting_room)
                .map(|p| {
                    p.in_waiting_room = false;
                    E::UserAdmitted(p.user_id)
                })
                .collect(),
            C::PutInWaitingRoom(user) => {
                let Some(peer) = self.peer_mut(user) else { return Vec::new() };
                peer.in_waiting_room = true;
                vec![E::UserJoined(peer.clone())]
            }

            C::JoinBreakoutRoom(room) => vec![E::BreakoutMembership {
                room_id: Some(room),
            }],
            C::LeaveBreakoutRoom => vec![E::BreakoutMembership { room_id: None }],
            C::BroadcastToBreakoutRooms(text) => vec![E::BreakoutBroadcast {
                from: self.my_name(),
                text,
            }],

            C::AskQuestion {
                question_id,
                text,
                anonymous,
            } => vec![E::QuestionAdded(Question {
                id: question_id,
                text,
                asker: (!anonymous).then_some(me),
                asker_name: (!anonymous).then(|| self.my_name()),
                upvotes: 0,
                answers: Vec::new(),
            })],
            C::AnswerQuestion {
                question_id,
                text,
                private,
            } => vec![E::QuestionAnswered {
                question_id,
                answer: Answer {
                    text,
                    responder: me,
                    private,
                },
            }],
            C::VoteQuestion { question_id, up } => {
                let votes = self.votes.entry(question_id.clone()).or_default();
                *votes = if up {
                    votes.saturating_add(1)
                } else {
                    votes.saturating_sub(1)
                };
                vec![E::QuestionVotes {
                    question_id,
                    upvotes: *votes,
                }]
            }

            C::StartTranscription => vec![
                E::TranscriptionStatus(TranscriptionStatus::Starting),
                E::TranscriptionStatus(TranscriptionStatus::Running),
            ],
            C::StopTranscription => vec![E::TranscriptionStatus(TranscriptionStatus::Stopped)],

            C::MuteUserAudio { mute: false, .. }
            | C::AskAllToUnmute
            | C::AskUserStartVideo(_)
            | C::SwitchCamera
            | C::SubscribeStream { .. }
            | C::UnsubscribeStream { .. }
            | C::SetStreamResolution { .. }
            | C::RespondPrivilege { .. }
            | C::SetSpokenLanguage(_)
            | C::SetTranslationLanguage(_)
            | C::JoinInterpretationChannel(_) => Vec::new(),
        }
    }
}

/// [`Transport`] backed by the in-process scripted server.
pub struct LoopbackTransport {
    sink: Mutex<Option<EventSink>>,
    server: Mutex<Server>,
    sent: Mutex<Vec<TransportCommand>>,
    fail_next: Mutex<Option<TransportError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackTransport {
    /// The local user gets id 1; seed others with [`Self::with_peer`].
    pub fn new(meeting: MeetingInfo) -> Self {
        Self {
            sink: Mutex::new(None),
            server: Mutex::new(Server {
                local_id: UserId(1),
                myself: None,
                peers: Vec::new(),
                meeting,
                hold_in_waiting_room: false,
                privileges: PrivilegePolicy::default(),
                host_key: None,
                votes: HashMap::new(),
            }),
            sent: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
        }
    }

    pub fn with_peer(self, peer: ParticipantInfo) -> Self {
        lock(&self.server).peers.push(peer);
        self
    }

    pub fn with_privilege_policy(self, policy: PrivilegePolicy) -> Self {
        lock(&self.server).privileges = policy;
        self
    }

    /// Hold non-host joiners in the waiting room until [`Self::admit_local`].
    pub fn with_waiting_room(self) -> Self {
        lock(&self.server).hold_in_waiting_room = true;
        self
    }

    pub fn with_host_key(self, key: impl Into<String>) -> Self {
        lock(&self.server).host_key = Some(key.into());
        self
    }

    pub fn local_id(&self) -> UserId {
        lock(&self.server).local_id
    }

    /// Admit the local user held in the waiting room.
    pub fn admit_local(&self) {
        let events = lock(&self.server).admission();
        self.deliver_all(events);
    }

    /// Push a server-side event to the client. Returns `false` when no
    /// client is attached.
    pub fn inject(&self, event: TransportEvent) -> bool {
        match lock(&self.sink).as_ref() {
            Some(sink) => sink.deliver(event),
            None => false,
        }
    }

    /// Make the next command fail synchronously.
    pub fn fail_next(&self, error: TransportError) {
        *lock(&self.fail_next) = Some(error);
    }

    /// Every command accepted so far, oldest first.
    pub fn sent(&self) -> Vec<TransportCommand> {
        lock(&self.sent).clone()
    }

    fn deliver_all(&self, events: Vec<TransportEvent>) {
        for event in events {
            tracing::trace!(?event, "loopback event");
            if !self.inject(event) {
                tracing::debug!("loopback has no client attached");
                return;
            }
        }
    }
}

impl Transport for LoopbackTransport {
    fn attach(&self, sink: EventSink) {
        *lock(&self.sink) = Some(sink);
    }

    fn send(&self, command: TransportCommand) -> Result<(), TransportError> {
        if let Some(error) = lock(&self.fail_next).take() {
            tracing::debug!(?command, %error, "loopback rejecting command");
            return Err(error);
        }
        lock(&self.sent).push(command.clone());
        let events = lock(&self.server).respond(command);
        self.deliver_all(events);
        Ok(())
    }
}
