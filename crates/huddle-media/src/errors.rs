use thiserror::Error;

use crate::{StreamKind, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("buffer pool exhausted ({capacity} buffers outstanding)")]
    PoolExhausted { capacity: usize },
    #[error("subscription limit reached ({limit})")]
    SubscriptionLimit { limit: usize },
    #[error("no {kind:?} subscription for user {user}")]
    NotSubscribed { user: UserId, kind: StreamKind },
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("media runtime: {0}")]
    Runtime(String),
}
