//! Error taxonomy returned by every façade operation.
//!
//! Local validation failures come back synchronously as `HuddleError`.
//! Failures that originate in the transport after a command was accepted
//! arrive later as `HuddleEvent::SessionError` or end the session; they are
//! never raised across the asynchronous boundary.

use thiserror::Error;

use crate::capabilities::Capability;
use crate::privileges::{RequestId, Role};
use huddle_media::{MediaError, UserId};

/// Failure reported by the transport/signaling layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    /// The same command may succeed if issued again later.
    pub retryable: bool,
}

impl TransportError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HuddleError {
    #[error("{operation} is not valid while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("capability disabled: {0:?}")]
    CapabilityDisabled(Capability),
    #[error("privilege request {0} already resolved")]
    AlreadyResolved(RequestId),
    #[error("transport error: {0}")]
    Transport(TransportError),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("{operation} requires a different role than {role:?}")]
    PermissionDenied { operation: &'static str, role: Role },
    #[error("participant not found: {0}")]
    ParticipantNotFound(UserId),
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Stable numeric codes handed to host applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    InvalidState = 1,
    CapabilityDisabled = 2,
    AlreadyResolved = 3,
    TransportRetryable = 4,
    TransportTerminal = 5,
    ResourceExhausted = 6,
    PermissionDenied = 7,
    ParticipantNotFound = 8,
    InvalidParams = 9,
    Config = 10,
}

impl HuddleError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HuddleError::InvalidState { .. } => ErrorCode::InvalidState,
            HuddleError::CapabilityDisabled(_) => ErrorCode::CapabilityDisabled,
            HuddleError::AlreadyResolved(_) => ErrorCode::AlreadyResolved,
            HuddleError::Transport(e) if e.retryable => ErrorCode::TransportRetryable,
            HuddleError::Transport(_) => ErrorCode::TransportTerminal,
            HuddleError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            HuddleError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            HuddleError::ParticipantNotFound(_) => ErrorCode::ParticipantNotFound,
            HuddleError::InvalidParams(_) => ErrorCode::InvalidParams,
            HuddleError::Config(_) => ErrorCode::Config,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HuddleError::Transport(e) if e.retryable)
    }
}

impl From<TransportError> for HuddleError {
    fn from(e: TransportError) -> Self {
        HuddleError::Transport(e)
    }
}

impl From<MediaError> for HuddleError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::PoolExhausted { .. } | MediaError::SubscriptionLimit { .. } => {
                HuddleError::ResourceExhausted(e.to_string())
            }
            MediaError::NotSubscribed { user, .. } => {
                HuddleError::InvalidParams(format!("no media subscription for {user}"))
            }
            MediaError::InvalidFrame(msg) => HuddleError::InvalidParams(msg),
            MediaError::Runtime(msg) => HuddleError::Config(msg),
        }
    }
}
