use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::frame::AudioFrame;
use crate::pipeline::FrameSink;
use crate::UserId;

/// Mono i16 ring fed by audio subscriptions and drained by the platform
/// audio output.
///
/// Multi-channel frames are downmixed. Past `max_samples` the oldest samples
/// are discarded and counted in [`PlayoutBuffer::discarded`].
pub struct PlayoutBuffer {
    ring: Mutex<Ring>,
    sample_rate: u32,
    max_samples: usize,
}

#[derive(Default)]
struct Ring {
    samples: VecDeque<i16>,
    discarded: u64,
}

impl PlayoutBuffer {
    /// Two seconds at `sample_rate` mono.
    pub fn new(sample_rate: u32) -> Self {
        Self::with_limit(sample_rate, sample_rate as usize * 2)
    }

    pub fn with_limit(sample_rate: u32, max_samples: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                samples: VecDeque::with_capacity(max_samples),
                discarded: 0,
            }),
            sample_rate: sample_rate.max(1),
            max_samples,
        }
    }

    fn ring(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_samples(&self, samples: &[i16]) {
        let mut ring = self.ring();
        ring.samples.extend(samples.iter().copied());
        let excess = ring.samples.len().saturating_sub(self.max_samples);
        if excess > 0 {
            ring.samples.drain(..excess);
            ring.discarded += excess as u64;
        }
    }

    /// Fill `out` from the ring. Returns how many samples were real; the rest
    /// of `out` is silence.
    pub fn pull_samples(&self, out: &mut [i16]) -> usize {
        let mut ring = self.ring();
        let real = ring.samples.len().min(out.len());
        let (head, tail) = out.split_at_mut(real);
        for (slot, sample) in head.iter_mut().zip(ring.samples.drain(..real)) {
            *slot = sample;
        }
        tail.fill(0);
        real
    }

    pub fn buffered(&self) -> usize {
        self.ring().samples.len()
    }

    /// Playout latency currently queued.
    pub fn buffered_duration(&self) -> Duration {
        Duration::from_micros(self.buffered() as u64 * 1_000_000 / u64::from(self.sample_rate))
    }

    /// Samples dropped because the consumer fell behind.
    pub fn discarded(&self) -> u64 {
        self.ring().discarded
    }

    pub fn clear(&self) {
        self.ring().samples.clear();
    }
}

fn downmix(frame: &AudioFrame) -> Vec<i16> {
    let channels = frame.channels() as usize;
    if channels == 1 {
        return frame.samples().collect();
    }
    let interleaved: Vec<i16> = frame.samples().collect();
    interleaved
        .chunks_exact(channels)
        .map(|group| {
            let sum: i32 = group.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

impl FrameSink for PlayoutBuffer {
    fn on_audio_frame(&self, _user: UserId, frame: &AudioFrame) {
        self.push_samples(&downmix(frame));
    }

    fn on_audio_overrun(&self, user: UserId, dropped: u64) {
        tracing::debug!(user = %user, dropped, "playout input overrun");
    }
}
