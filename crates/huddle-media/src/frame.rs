use std::time::Duration;

use crate::buffer::FrameBuffer;
use crate::errors::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoRotation {
    #[default]
    None,
    Clockwise90,
    Rotate180,
    Clockwise270,
}

/// One planar I420 image. The Y, U and V planes are stored back to back in a
/// single [`FrameBuffer`].
#[derive(Debug, Clone)]
pub struct VideoFrame {
    buffer: FrameBuffer,
    width: u32,
    height: u32,
    rotation: VideoRotation,
    timestamp_us: u64,
}

fn chroma_len(width: u32, height: u32) -> usize {
    (width as usize).div_ceil(2) * (height as usize).div_ceil(2)
}

impl VideoFrame {
    pub fn i420(
        buffer: FrameBuffer,
        width: u32,
        height: u32,
        timestamp_us: u64,
    ) -> Result<Self, MediaError> {
        if width == 0 || height == 0 {
            return Err(MediaError::InvalidFrame(format!(
                "empty dimensions {width}x{height}"
            )));
        }
        let expected = Self::i420_len(width, height);
        if buffer.len() < expected {
            return Err(MediaError::InvalidFrame(format!(
                "{width}x{height} I420 needs {expected} bytes, got {}",
                buffer.len()
            )));
        }
        Ok(Self {
            buffer,
            width,
            height,
            rotation: VideoRotation::None,
            timestamp_us,
        })
    }

    /// Bytes needed for an I420 image of the given size.
    pub fn i420_len(width: u32, height: u32) -> usize {
        width as usize * height as usize + 2 * chroma_len(width, height)
    }

    pub fn with_rotation(mut self, rotation: VideoRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rotation(&self) -> VideoRotation {
        self.rotation
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn y_plane(&self) -> &[u8] {
        let y = self.width as usize * self.height as usize;
        self.buffer.as_slice().get(..y).unwrap_or_default()
    }

    pub fn u_plane(&self) -> &[u8] {
        let y = self.width as usize * self.height as usize;
        let c = chroma_len(self.width, self.height);
        self.buffer.as_slice().get(y..y + c).unwrap_or_default()
    }

    pub fn v_plane(&self) -> &[u8] {
        let y = self.width as usize * self.height as usize;
        let c = chroma_len(self.width, self.height);
        self.buffer.as_slice().get(y + c..y + 2 * c).unwrap_or_default()
    }
}

/// Interleaved signed 16-bit little-endian PCM.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    buffer: FrameBuffer,
    sample_rate: u32,
    channels: u16,
    timestamp_us: u64,
}

impl AudioFrame {
    pub fn pcm16(
        buffer: FrameBuffer,
        sample_rate: u32,
        channels: u16,
        timestamp_us: u64,
    ) -> Result<Self, MediaError> {
        if sample_rate == 0 || channels == 0 {
            return Err(MediaError::InvalidFrame(format!(
                "bad audio format {sample_rate} Hz / {channels} ch"
            )));
        }
        let frame_bytes = 2 * channels as usize;
        if buffer.len() % frame_bytes != 0 {
            return Err(MediaError::InvalidFrame(format!(
                "{} bytes is not a whole number of {channels}-channel samples",
                buffer.len()
            )));
        }
        Ok(Self {
            buffer,
            sample_rate,
            channels,
            timestamp_us,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Samples per channel.
    pub fn samples_per_channel(&self) -> usize {
        self.buffer.len() / (2 * self.channels as usize)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_micros(
            self.samples_per_channel() as u64 * 1_000_000 / self.sample_rate as u64,
        )
    }

    /// Interleaved samples.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.buffer
            .as_slice()
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i420_planes_split_the_buffer() {
        let len = VideoFrame::i420_len(4, 2);
        assert_eq!(len, 8 + 2 * 2);
        let mut bytes = vec![1u8; 8];
        bytes.extend([2, 2, 3, 3]);
        let frame = VideoFrame::i420(FrameBuffer::detached(bytes), 4, 2, 0).unwrap();
        assert_eq!(frame.y_plane(), &[1; 8]);
        assert_eq!(frame.u_plane(), &[2, 2]);
        assert_eq!(frame.v_plane(), &[3, 3]);
    }

    #[test]
    fn odd_dimensions_round_chroma_up() {
        assert_eq!(VideoFrame::i420_len(3, 3), 9 + 2 * 4);
    }

    #[test]
    fn short_video_buffer_is_rejected() {
        let err = VideoFrame::i420(FrameBuffer::detached(vec![0; 10]), 4, 4, 0).unwrap_err();
        assert!(matches!(err, MediaError::InvalidFrame(_)));
    }

    #[test]
    fn audio_samples_decode_little_endian() {
        let bytes: Vec<u8> = [100i16, -2, 300, 7]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let frame = AudioFrame::pcm16(FrameBuffer::detached(bytes), 48_000, 2, 0).unwrap();
        assert_eq!(frame.samples().collect::<Vec<_>>(), vec![100, -2, 300, 7]);
        assert_eq!(frame.samples_per_channel(), 2);
    }

    #[test]
    fn audio_duration_from_rate() {
        let frame = AudioFrame::pcm16(FrameBuffer::detached(vec![0; 960]), 48_000, 1, 0).unwrap();
        assert_eq!(frame.duration(), Duration::from_millis(10));
    }

    #[test]
    fn ragged_audio_buffer_is_rejected() {
        assert!(AudioFrame::pcm16(FrameBuffer::detached(vec![0; 3]), 48_000, 1, 0).is_err());
        assert!(AudioFrame::pcm16(FrameBuffer::detached(vec![0; 4]), 0, 1, 0).is_err());
    }
}
