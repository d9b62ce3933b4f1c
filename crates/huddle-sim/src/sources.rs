//! Synthetic media for driving the frame ingress without devices.

use std::time::Duration;

use huddle_media::{AudioFrame, BufferPool, MediaError, Resolution, VideoFrame};

/// Moving luma gradient over mid-grey chroma, `fps` frames per second.
pub struct SyntheticVideoSource {
    pool: BufferPool,
    width: u32,
    height: u32,
    frame_interval_us: u64,
    frame_index: u64,
}

impl SyntheticVideoSource {
    pub fn new(pool: BufferPool, resolution: Resolution, fps: u32) -> Self {
        let (width, height) = resolution.dimensions();
        Self {
            pool,
            width,
            height,
            frame_interval_us: 1_000_000 / u64::from(fps.max(1)),
            frame_index: 0,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(self.frame_interval_us)
    }

    /// Fails with `PoolExhausted` while consumers still hold every buffer.
    pub fn next_frame(&mut self) -> Result<VideoFrame, MediaError> {
        let luma = (self.width * self.height) as usize;
        let mut buffer = self.pool.acquire(VideoFrame::i420_len(self.width, self.height))?;
        if let Some(data) = buffer.make_mut() {
            let shift = self.frame_index as usize;
            let (y, chroma) = data.split_at_mut(luma);
            for (i, px) in y.iter_mut().enumerate() {
                let x = i % self.width as usize;
                *px = ((x + shift) % 256) as u8;
            }
            chroma.fill(128);
        }
        let timestamp_us = self.frame_index * self.frame_interval_us;
        self.frame_index += 1;
        VideoFrame::i420(buffer, self.width, self.height, timestamp_us)
    }
}

/// Sine tone as interleaved PCM16.
pub struct SyntheticAudioSource {
    pool: BufferPool,
    sample_rate: u32,
    channels: u16,
    frequency_hz: f64,
    samples_emitted: u64,
}

impl SyntheticAudioSource {
    pub fn new(pool: BufferPool, sample_rate: u32, channels: u16, frequency_hz: f64) -> Self {
        Self {
            pool,
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            frequency_hz,
            samples_emitted: 0,
        }
    }

    pub fn next_frame(&mut self, duration: Duration) -> Result<AudioFrame, MediaError> {
        let per_channel = (u128::from(self.sample_rate) * duration.as_micros() / 1_000_000) as usize;
        let channels = self.channels as usize;
        let mut buffer = self.pool.acquire(per_channel * channels * 2)?;
        if let Some(data) = buffer.make_mut() {
            for (n, frame) in data.chunks_exact_mut(2 * channels).enumerate() {
                let t = (self.samples_emitted + n as u64) as f64 / f64::from(self.sample_rate);
                let value = (t * self.frequency_hz * std::f64::consts::TAU).sin() * 0.25;
                let sample = ((value * f64::from(i16::MAX)) as i16).to_le_bytes();
                for slot in frame.chunks_exact_mut(2) {
                    slot.copy_from_slice(&sample);
                }
            }
        }
        let timestamp_us = self.samples_emitted * 1_000_000 / u64::from(self.sample_rate);
        self.samples_emitted += per_channel as u64;
        AudioFrame::pcm16(buffer, self.sample_rate, self.channels, timestamp_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_frames_advance_and_recycle() {
        let pool = BufferPool::new(1);
        let mut source = SyntheticVideoSource::new(pool.clone(), Resolution::P90, 30);
        let first = source.next_frame().unwrap();
        assert_eq!((first.width(), first.height()), (160, 90));
        assert_eq!(first.y_plane()[0], 0);
        assert!(first.u_plane().iter().all(|b| *b == 128));
        assert!(matches!(source.next_frame(), Err(MediaError::PoolExhausted { .. })));

        drop(first);
        let second = source.next_frame().unwrap();
        assert_eq!(second.timestamp_us(), 33_333);
        assert_eq!(second.y_plane()[0], 1);
    }

    #[test]
    fn audio_frames_have_requested_duration() {
        let mut source = SyntheticAudioSource::new(BufferPool::new(4), 48_000, 2, 440.0);
        let frame = source.next_frame(Duration::from_millis(10)).unwrap();
        assert_eq!(frame.samples_per_channel(), 480);
        assert_eq!(frame.duration(), Duration::from_millis(10));
        let next = source.next_frame(Duration::from_millis(10)).unwrap();
        assert_eq!(next.timestamp_us(), 10_000);
        let samples: Vec<i16> = next.samples().take(2).collect();
        assert_eq!(samples[0], samples[1]);
    }
}
