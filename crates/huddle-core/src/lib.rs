//! Huddle meeting client core.
//!
//! Session lifecycle, capability gating, privilege flows and event fan-out
//! for a multi-party meeting. Signaling and device access stay behind the
//! [`Transport`] and [`DevicePermissions`] traits; raw frames flow through
//! the `huddle-media` pipeline.

pub mod breakout;
pub mod capabilities;
pub mod chat;
pub mod client;
pub mod controls;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod hand_raise;
pub mod params;
pub mod participants;
pub mod privileges;
pub mod session;
pub mod settings;
pub mod transcription;
pub mod transport;
pub mod waiting_room;
pub mod webinar;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use breakout::{BreakoutRoom, BreakoutService, BreakoutStatus};
pub use capabilities::{
    AllowAllDevices, Authorization, Capability, CapabilityChange, CapabilityRegistry,
    ChatPrivilege, DeviceKind, DevicePermissions,
};
pub use chat::ChatService;
pub use client::{HuddleClient, SessionInfo};
pub use controls::{AudioControls, VideoControls};
pub use dispatcher::{EventDispatcher, ObserverToken};
pub use errors::{ErrorCode, HuddleError, TransportError};
pub use events::{
    AreaSet, AudioConnection, AudioStatus, ChatDeleteBy, ChatMessage, ChatTarget, EventArea,
    HuddleEvent, HuddleEventListener, ParticipantInfo, RecordingStatus, VideoStatus,
};
pub use hand_raise::HandRaiseManager;
pub use params::{JoinParams, StartParams};
pub use participants::Roster;
pub use privileges::{
    PrivilegeCoordinator, PrivilegeHandler, PrivilegeKind, PrivilegeOutcome, RequestId, Role,
    RoleAction,
};
pub use session::{
    EndReason, LeaveReason, MeetingInfo, Resume, SessionId, SessionMachine, SessionState,
};
pub use settings::{ClientConfig, Settings, SettingsStore};
pub use transcription::{
    Caption, InterpretationLanguage, InterpretationStatus, Interpreter, TranscriptionService,
    TranscriptionStatus,
};
pub use transport::{EventSink, Transport, TransportCommand, TransportEvent};
pub use waiting_room::WaitingRoomService;
pub use webinar::{Answer, Question, WebinarService};

pub use huddle_media::{
    AudioFrame, BufferPool, FrameBuffer, FrameIngress, FrameSink, MediaConfig, Resolution,
    StreamKind, Subscription, SubscriptionStats, UserId, VideoFrame,
};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
