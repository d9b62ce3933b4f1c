//! Session lifecycle.
//!
//! `Idle -> Connecting -> Joining -> InSession <-> Reconnecting -> Ended`.
//! A reconnect started before the join was confirmed resumes at `Joining`.
//! The machine is pure: it validates a trigger against the current state and
//! moves to the next one, or rejects the trigger and stays where it was.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::HuddleError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    LeftByUser,
    /// The host ended the meeting, or the local host ended it for everyone.
    EndedByHost,
    RemovedByHost,
    AuthExpired,
    ConnectionFailed,
    JoinRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LeaveReason {
    #[default]
    Leave,
    /// Host only: end the meeting for every participant.
    EndForAll,
}

/// Where a reconnecting session returns once the link is back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resume {
    Joining,
    InSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Joining,
    InSession,
    Reconnecting { attempt: u32, resume: Resume },
    Ended(EndReason),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Joining => "joining",
            SessionState::InSession => "in-session",
            SessionState::Reconnecting { .. } => "reconnecting",
            SessionState::Ended(_) => "ended",
        }
    }

    /// A session exists and has not ended.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::Joining
                | SessionState::InSession
                | SessionState::Reconnecting { .. }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingInfo {
    pub number: Option<String>,
    pub topic: String,
    pub host_name: Option<String>,
    pub is_webinar: bool,
    pub is_view_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Start,
    Join,
    Connected,
    JoinConfirmed,
    ConnectionLost,
    ConnectionRestored,
    Leave(LeaveReason),
    Terminated(EndReason),
}

impl Trigger {
    fn name(self) -> &'static str {
        match self {
            Trigger::Start => "start",
            Trigger::Join => "join",
            Trigger::Connected => "connected",
            Trigger::JoinConfirmed => "join_confirmed",
            Trigger::ConnectionLost => "connection_lost",
            Trigger::ConnectionRestored => "connection_restored",
            Trigger::Leave(_) => "leave",
            Trigger::Terminated(_) => "terminated",
        }
    }
}

/// Next state for `trigger`, or `None` if the trigger is not valid in `state`.
pub fn next_state(state: &SessionState, trigger: Trigger) -> Option<SessionState> {
    use SessionState::*;
    let next = match (state, trigger) {
        (Idle | Ended(_), Trigger::Start | Trigger::Join) => Connecting,
        (Connecting, Trigger::Connected) => Joining,
        (Joining, Trigger::JoinConfirmed) => InSession,
        (Connecting, Trigger::ConnectionLost) => Ended(EndReason::ConnectionFailed),
        (Joining, Trigger::ConnectionLost) => Reconnecting {
            attempt: 1,
            resume: Resume::Joining,
        },
        (InSession, Trigger::ConnectionLost) => Reconnecting {
            attempt: 1,
            resume: Resume::InSession,
        },
        (Reconnecting { attempt, resume }, Trigger::ConnectionLost) => Reconnecting {
            attempt: attempt.saturating_add(1),
            resume: *resume,
        },
        (Reconnecting { resume, .. }, Trigger::ConnectionRestored) => match resume {
            Resume::Joining => Joining,
            Resume::InSession => InSession,
        },
        (s, Trigger::Leave(reason)) if s.is_live() => Ended(match reason {
            LeaveReason::Leave => EndReason::LeftByUser,
            LeaveReason::EndForAll => EndReason::EndedByHost,
        }),
        (s, Trigger::Terminated(reason)) if s.is_live() => Ended(reason),
        _ => return None,
    };
    Some(next)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

impl Transition {
    pub fn ended(&self) -> Option<EndReason> {
        match self.to {
            SessionState::Ended(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    session_id: Option<SessionId>,
    meeting: Option<MeetingInfo>,
    in_waiting_room: bool,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            session_id: None,
            meeting: None,
            in_waiting_room: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn meeting(&self) -> Option<&MeetingInfo> {
        self.meeting.as_ref()
    }

    pub fn set_meeting(&mut self, meeting: MeetingInfo) {
        self.meeting = Some(meeting);
    }

    pub fn in_waiting_room(&self) -> bool {
        self.in_waiting_room
    }

    /// Only meaningful before the join is confirmed.
    pub fn set_waiting_room(&mut self, waiting: bool) -> Result<(), HuddleError> {
        let joining = matches!(
            self.state,
            SessionState::Joining
                | SessionState::Reconnecting {
                    resume: Resume::Joining,
                    ..
                }
        );
        if !joining {
            return Err(self.reject("waiting_room_status"));
        }
        self.in_waiting_room = waiting;
        Ok(())
    }

    /// Apply `trigger`. On rejection nothing changes.
    pub fn fire(&mut self, trigger: Trigger) -> Result<Transition, HuddleError> {
        let next = next_state(&self.state, trigger).ok_or_else(|| self.reject(trigger.name()))?;
        let from = std::mem::replace(&mut self.state, next.clone());

        match trigger {
            Trigger::Start | Trigger::Join => {
                self.session_id = Some(SessionId::generate());
                self.meeting = None;
                self.in_waiting_room = false;
            }
            Trigger::JoinConfirmed => self.in_waiting_room = false,
            _ => {}
        }

        tracing::debug!(from = from.name(), to = next.name(), "session transition");
        Ok(Transition { from, to: next })
    }

    pub fn require_in_session(&self, operation: &'static str) -> Result<(), HuddleError> {
        if self.state == SessionState::InSession {
            Ok(())
        } else {
            Err(self.reject(operation))
        }
    }

    fn reject(&self, operation: &'static str) -> HuddleError {
        HuddleError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }
}
