//! Raw media pipeline for Huddle.
//!
//! Delivers reference-counted I420 and PCM frames from the network side to
//! application frame sinks, one bounded queue and one delivery task per
//! subscribed (participant, stream) pair. Slow consumers lose video frames
//! or see audio overruns; nothing queues without bound.

pub mod buffer;
pub mod errors;
pub mod frame;
pub mod pipeline;
pub mod playout;

use serde::{Deserialize, Serialize};

pub use buffer::{BufferPool, FrameBuffer};
pub use errors::MediaError;
pub use frame::{AudioFrame, VideoFrame, VideoRotation};
pub use pipeline::{
    FrameIngress, FrameSink, MediaPipeline, MediaRuntime, PushOutcome, Subscription,
    SubscriptionStats,
};
pub use playout::PlayoutBuffer;

/// Server-assigned participant identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Share,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Resolution {
    P90,
    P180,
    #[default]
    P360,
    P720,
    P1080,
}

impl Resolution {
    /// Nominal frame size for a 16:9 stream.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::P90 => (160, 90),
            Resolution::P180 => (320, 180),
            Resolution::P360 => (640, 360),
            Resolution::P720 => (1280, 720),
            Resolution::P1080 => (1920, 1080),
        }
    }
}

/// Queue and runtime sizing for the media pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Frames queued per video/share subscription before new ones are dropped.
    pub video_queue_depth: usize,
    /// Frames queued per audio subscription before an overrun is flagged.
    pub audio_queue_depth: usize,
    pub max_subscriptions: usize,
    /// Buffers the frame pool may have outstanding at once.
    pub pool_buffers: usize,
    /// Run frame delivery on a runtime owned by the pipeline.
    pub dedicated_runtime: bool,
    pub worker_threads: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video_queue_depth: 4,
            audio_queue_depth: 16,
            max_subscriptions: 16,
            pool_buffers: 64,
            dedicated_runtime: false,
            worker_threads: 2,
        }
    }
}
