//! Boundary to the signaling/transport layer.
//!
//! The core issues [`TransportCommand`]s and never waits on them. The
//! transport reports back by pushing [`TransportEvent`]s into the
//! [`EventSink`] it was attached to; the session event loop applies them one
//! at a time, in arrival order. Each sink is bound to one session, and events
//! arriving through a sink of another session are dropped.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::breakout::{BreakoutRoom, BreakoutStatus};
use crate::capabilities::{Capability, ChatPrivilege};
use crate::errors::TransportError;
use crate::events::{
    AudioStatus, ChatDeleteBy, ChatMessage, ChatTarget, ParticipantInfo, RecordingStatus,
    VideoStatus,
};
use crate::params::{JoinParams, StartParams};
use crate::privileges::{PrivilegeKind, RequestId, Role};
use crate::session::{EndReason, MeetingInfo, SessionId};
use crate::transcription::{Caption, InterpretationStatus, TranscriptionStatus};
use crate::webinar::{Answer, Question};
use huddle_media::{Resolution, StreamKind, UserId};

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    Start { session: SessionId, params: StartParams },
    Join { session: SessionId, params: JoinParams },
    Leave { session: SessionId, end_for_all: bool },

    MuteMyAudio(bool),
    SetMyVideo(bool),
    SwitchCamera,
    MuteUserAudio { user: UserId, mute: bool },
    MuteAllAudio { allow_self_unmute: bool },
    AskAllToUnmute,
    StopUserVideo(UserId),
    AskUserStartVideo(UserId),

    SubscribeStream { user: UserId, kind: StreamKind, resolution: Resolution },
    UnsubscribeStream { user: UserId, kind: StreamKind },
    SetStreamResolution { user: UserId, kind: StreamKind, resolution: Resolution },

    SendChat { message_id: String, target: ChatTarget, text: String },
    DeleteChat { message_id: String },
    SetChatPrivilege(ChatPrivilege),

    RaiseHand,
    LowerHand(UserId),
    LowerAllHands,

    RequestPrivilege { request: RequestId, kind: PrivilegeKind },
    RespondPrivilege { request: RequestId, grant: bool },
    StartLocalRecording,
    StopLocalRecording,

    ChangeRole { user: UserId, role: Role },
    ClaimHost { host_key: String },
    RemoveUser(UserId),
    RenameUser { user: UserId, name: String },
    AllowAttendeeTalk { user: UserId, allow: bool },

    AdmitUser(UserId),
    AdmitAll,
    PutInWaitingRoom(UserId),

    JoinBreakoutRoom(String),
    LeaveBreakoutRoom,
    BroadcastToBreakoutRooms(String),

    AskQuestion { question_id: String, text: String, anonymous: bool },
    AnswerQuestion { question_id: String, text: String, private: bool },
    VoteQuestion { question_id: String, up: bool },

    StartTranscription,
    StopTranscription,
    SetSpokenLanguage(String),
    SetTranslationLanguage(Option<String>),
    JoinInterpretationChannel(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    JoinConfirmed { myself: ParticipantInfo, meeting: MeetingInfo },
    WaitingRoomStatus { waiting: bool },
    ConnectionLost,
    ConnectionRestored,
    /// Meeting ended, local user removed, credentials expired.
    Ended(EndReason),
    /// An accepted command failed. Terminal errors end the session.
    Error(TransportError),
    PolicyUpdate(HashMap<Capability, bool>),

    UserJoined(ParticipantInfo),
    UserLeft(UserId),
    UserAdmitted(UserId),
    RoleChanged { user: UserId, role: Role },
    NameChanged { user: UserId, name: String },
    AudioStatus { user: UserId, status: AudioStatus },
    VideoStatus { user: UserId, status: VideoStatus },
    ActiveSpeakers(Vec<UserId>),
    HandRaised { user: UserId, raised_at_ms: i64 },
    HandLowered(UserId),

    ChatReceived(ChatMessage),
    ChatDeleted { message_id: String, by: ChatDeleteBy },
    ChatPrivilegeChanged(ChatPrivilege),

    PrivilegeRequested { request: RequestId, kind: PrivilegeKind, requester: UserId },
    PrivilegeOutcome { request: RequestId, granted: bool },
    PrivilegeChanged { kind: PrivilegeKind, granted: bool },
    RecordingStatus { user: UserId, status: RecordingStatus },

    BreakoutRooms(Vec<BreakoutRoom>),
    BreakoutStatus(BreakoutStatus),
    BreakoutInvitation { room_id: String },
    BreakoutMembership { room_id: Option<String> },
    BreakoutBroadcast { from: String, text: String },

    QuestionAdded(Question),
    QuestionAnswered { question_id: String, answer: Answer },
    QuestionVotes { question_id: String, upvotes: u32 },
    AttendeeTalk { user: UserId, allowed: bool },

    TranscriptionStatus(TranscriptionStatus),
    Caption(Caption),
    Interpretation(InterpretationStatus),
}

/// Signaling layer the core drives.
pub trait Transport: Send + Sync {
    /// Called whenever a session opens, before its `Start`/`Join` command,
    /// with a sink bound to that session. Replaces the previous sink.
    fn attach(&self, sink: EventSink);

    /// Queue a command. Must not block; failures that occur later are
    /// reported as [`TransportEvent::Error`].
    fn send(&self, command: TransportCommand) -> Result<(), TransportError>;
}

/// An event tagged with the session whose sink it came through.
#[derive(Debug)]
pub(crate) struct Inbound {
    pub(crate) session: Option<SessionId>,
    pub(crate) event: TransportEvent,
}

/// Handle the transport pushes inbound events through. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Inbound>,
    session: Option<SessionId>,
}

impl EventSink {
    /// Unbound sink: nothing it delivers is applied.
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, session: None }, rx)
    }

    pub(crate) fn bound_to(&self, session: SessionId) -> Self {
        Self {
            tx: self.tx.clone(),
            session: Some(session),
        }
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    /// Returns `false` once the client is gone.
    pub fn deliver(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Inbound {
                session: self.session.clone(),
                event,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
