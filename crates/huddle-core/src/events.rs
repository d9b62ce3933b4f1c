use serde::{Deserialize, Serialize};

use crate::breakout::{BreakoutRoom, BreakoutStatus};
use crate::capabilities::{Capability, ChatPrivilege};
use crate::errors::TransportError;
use crate::privileges::{PrivilegeHandler, PrivilegeKind, PrivilegeOutcome, RequestId, Role};
use crate::session::{EndReason, MeetingInfo, SessionState};
use crate::transcription::{Caption, InterpretationStatus, TranscriptionStatus};
use crate::webinar::{Answer, Question};
use huddle_media::{StreamKind, UserId};

/// Delivery context an event belongs to. Each area has its own ordered queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventArea {
    Session,
    Audio,
    Video,
    User,
    Chat,
    Webinar,
    BreakoutRoom,
    Privilege,
    Transcription,
    Interpretation,
    WaitingRoom,
    Capability,
    Recording,
}

impl EventArea {
    pub const ALL: [EventArea; 13] = [
        EventArea::Session,
        EventArea::Audio,
        EventArea::Video,
        EventArea::User,
        EventArea::Chat,
        EventArea::Webinar,
        EventArea::BreakoutRoom,
        EventArea::Privilege,
        EventArea::Transcription,
        EventArea::Interpretation,
        EventArea::WaitingRoom,
        EventArea::Capability,
        EventArea::Recording,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Set of areas an observer registers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AreaSet(u16);

impl AreaSet {
    pub const ALL: AreaSet = AreaSet((1 << EventArea::ALL.len()) - 1);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn of(areas: &[EventArea]) -> Self {
        areas.iter().fold(Self::empty(), |set, a| set.with(*a))
    }

    pub fn with(self, area: EventArea) -> Self {
        Self(self.0 | area.bit())
    }

    pub fn contains(self, area: EventArea) -> bool {
        self.0 & area.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<EventArea> for AreaSet {
    fn from(area: EventArea) -> Self {
        Self::empty().with(area)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioConnection {
    #[default]
    None,
    Voip,
    Telephony,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioStatus {
    pub muted: bool,
    pub talking: bool,
    pub connection: AudioConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoStatus {
    pub sending: bool,
    pub sharing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub user_id: UserId,
    pub name: String,
    pub role: Role,
    pub audio: AudioStatus,
    pub video: VideoStatus,
    pub hand_raised: bool,
    pub in_waiting_room: bool,
    pub is_myself: bool,
    pub is_interpreter: bool,
    pub interpreter_language: Option<String>,
}

impl ParticipantInfo {
    pub fn new(user_id: UserId, name: impl Into<String>, role: Role) -> Self {
        Self {
            user_id,
            name: name.into(),
            role,
            audio: AudioStatus::default(),
            video: VideoStatus::default(),
            hand_raised: false,
            in_waiting_room: false,
            is_myself: false,
            is_interpreter: role == Role::Interpreter,
            interpreter_language: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatTarget {
    Everyone,
    AllPanelists,
    WaitingRoom,
    User(UserId),
}

impl ChatTarget {
    pub fn is_private(&self) -> bool {
        matches!(self, ChatTarget::User(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: UserId,
    pub sender_name: String,
    pub target: ChatTarget,
    pub text: String,
    pub timestamp_ms: i64,
    pub is_mine: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatDeleteBy {
    Sender,
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingStatus {
    Started,
    Paused,
    Stopped,
    Failed,
}

/// Events emitted by the core to registered observers.
#[derive(Debug, Clone)]
pub enum HuddleEvent {
    SessionStateChanged(SessionState),
    MeetingReady(MeetingInfo),
    /// A command accepted earlier failed in the transport; the session goes on.
    SessionError(TransportError),
    /// Terminal. Delivered once to every observer whatever its areas.
    SessionEnded { reason: EndReason },

    AudioStatusChanged { user: UserId, status: AudioStatus },

    VideoStatusChanged { user: UserId, status: VideoStatus },
    MediaSubscriptionEnded { user: UserId, kind: StreamKind },
    /// Local pin changed.
    PinChanged(Option<UserId>),

    UserJoined(ParticipantInfo),
    UserLeft(UserId),
    RoleChanged { user: UserId, role: Role },
    NameChanged { user: UserId, name: String },
    ActiveSpeakersChanged(Vec<UserId>),
    HandRaiseChanged { user: UserId, raised: bool, position: Option<usize> },

    ChatMessageReceived(ChatMessage),
    ChatMessageDeleted { message_id: String, by: ChatDeleteBy },
    ChatPrivilegeChanged(ChatPrivilege),

    QuestionAdded(Question),
    QuestionAnswered { question_id: String, answer: Answer },
    QuestionVotesChanged { question_id: String, upvotes: u32 },
    AttendeeTalkChanged { user: UserId, allowed: bool },

    BreakoutRoomsUpdated(Vec<BreakoutRoom>),
    BreakoutStatusChanged(BreakoutStatus),
    BreakoutInvitation { room_id: String, room_name: String },
    BreakoutMembershipChanged { room_id: Option<String> },
    BreakoutBroadcast { from: String, text: String },

    PrivilegeRequested(PrivilegeHandler),
    PrivilegeRequestResolved {
        request: RequestId,
        kind: PrivilegeKind,
        outcome: PrivilegeOutcome,
    },
    PrivilegeChanged { kind: PrivilegeKind, granted: bool },

    TranscriptionStatusChanged(TranscriptionStatus),
    CaptionReceived(Caption),

    InterpretationChanged(InterpretationStatus),

    WaitingRoomStatusChanged { waiting: bool },
    UserWaiting(ParticipantInfo),
    UserAdmitted(UserId),

    CapabilityChanged { capability: Capability, enabled: bool },

    RecordingStatusChanged { user: UserId, status: RecordingStatus },
}

impl HuddleEvent {
    pub fn area(&self) -> EventArea {
        use HuddleEvent::*;
        match self {
            SessionStateChanged(_) | MeetingReady(_) | SessionError(_) | SessionEnded { .. } => {
                EventArea::Session
            }
            AudioStatusChanged { .. } => EventArea::Audio,
            VideoStatusChanged { .. } | MediaSubscriptionEnded { .. } | PinChanged(_) => {
                EventArea::Video
            }
            UserJoined(_)
            | UserLeft(_)
            | RoleChanged { .. }
            | NameChanged { .. }
            | ActiveSpeakersChanged(_)
            | HandRaiseChanged { .. } => EventArea::User,
            ChatMessageReceived(_) | ChatMessageDeleted { .. } | ChatPrivilegeChanged(_) => {
                EventArea::Chat
            }
            QuestionAdded(_)
            | QuestionAnswered { .. }
            | QuestionVotesChanged { .. }
            | AttendeeTalkChanged { .. } => EventArea::Webinar,
            BreakoutRoomsUpdated(_)
            | BreakoutStatusChanged(_)
            | BreakoutInvitation { .. }
            | BreakoutMembershipChanged { .. }
            | BreakoutBroadcast { .. } => EventArea::BreakoutRoom,
            PrivilegeRequested(_) | PrivilegeRequestResolved { .. } | PrivilegeChanged { .. } => {
                EventArea::Privilege
            }
            TranscriptionStatusChanged(_) | CaptionReceived(_) => EventArea::Transcription,
            InterpretationChanged(_) => EventArea::Interpretation,
            WaitingRoomStatusChanged { .. } | UserWaiting(_) | UserAdmitted(_) => {
                EventArea::WaitingRoom
            }
            CapabilityChanged { .. } => EventArea::Capability,
            RecordingStatusChanged { .. } => EventArea::Recording,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HuddleEvent::SessionEnded { .. })
    }
}

/// Receives events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait HuddleEventListener: Send + Sync {
    fn on_event(&self, event: HuddleEvent);
}

impl<F> HuddleEventListener for F
where
    F: Fn(HuddleEvent) + Send + Sync,
{
    fn on_event(&self, event: HuddleEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_set_membership() {
        let set = AreaSet::of(&[EventArea::Chat, EventArea::User]);
        assert!(set.contains(EventArea::Chat));
        assert!(set.contains(EventArea::User));
        assert!(!set.contains(EventArea::Session));
        assert!(AreaSet::empty().is_empty());
        for area in EventArea::ALL {
            assert!(AreaSet::ALL.contains(area));
        }
    }

    #[test]
    fn every_event_has_one_area() {
        let joined = HuddleEvent::UserJoined(ParticipantInfo::new(UserId(7), "Ada", Role::Attendee));
        assert_eq!(joined.area(), EventArea::User);
        let ended = HuddleEvent::SessionEnded {
            reason: EndReason::LeftByUser,
        };
        assert_eq!(ended.area(), EventArea::Session);
        assert!(ended.is_terminal());
        let cap = HuddleEvent::CapabilityChanged {
            capability: Capability::Chat,
            enabled: false,
        };
        assert_eq!(cap.area(), EventArea::Capability);
        assert!(!cap.is_terminal());
    }

    #[test]
    fn closures_are_listeners() {
        let seen = std::sync::Mutex::new(Vec::new());
        let listener = |event: HuddleEvent| seen.lock().unwrap().push(event.area());
        listener.on_event(HuddleEvent::UserLeft(UserId(1)));
        assert_eq!(*seen.lock().unwrap(), vec![EventArea::User]);
    }

    #[test]
    fn private_chat_target() {
        assert!(ChatTarget::User(UserId(3)).is_private());
        assert!(!ChatTarget::Everyone.is_private());
    }
}
