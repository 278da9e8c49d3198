//! Core media types shared by the send and receive pipelines

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

/// Kind of media carried by a track, encoder or decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Audio samples
    Audio,
    /// Video pictures
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// What the call carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    /// Audio only
    Audio,
    /// Audio and video
    Video,
}

impl CallType {
    /// Whether the call carries video
    pub fn has_video(self) -> bool {
        matches!(self, CallType::Video)
    }

    /// Media kinds the call carries
    pub fn kinds(self) -> &'static [MediaKind] {
        match self {
            CallType::Audio => &[MediaKind::Audio],
            CallType::Video => &[MediaKind::Audio, MediaKind::Video],
        }
    }
}

/// Layout of a raw frame's data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// A picture of the given size
    Video { width: u32, height: u32 },
    /// Interleaved PCM
    Audio { sample_rate: u32, channels: u8 },
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// A raw captured frame pulled from a [`crate::LocalTrack`]
///
/// Capture sources often lend out pooled buffers. The release hook hands the
/// buffer back and runs exactly once, either through [`RawFrame::close`] or
/// when the frame is dropped.
pub struct RawFrame {
    /// Capture timestamp in microseconds
    pub timestamp: u64,
    /// Duration in microseconds, when known
    pub duration: Option<u64>,
    /// Data layout
    pub format: FrameFormat,
    /// Frame contents
    pub data: Bytes,
    release: Option<ReleaseHook>,
}

impl RawFrame {
    /// Create a video frame
    pub fn video(timestamp: u64, width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            duration: None,
            format: FrameFormat::Video { width, height },
            data: data.into(),
            release: None,
        }
    }

    /// Create an audio frame
    pub fn audio(timestamp: u64, sample_rate: u32, channels: u8, data: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            duration: None,
            format: FrameFormat::Audio {
                sample_rate,
                channels,
            },
            data: data.into(),
            release: None,
        }
    }

    /// Set the frame duration in microseconds
    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Install the hook that returns the underlying buffer to its source
    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    /// Media kind implied by the frame format
    pub fn kind(&self) -> MediaKind {
        match self.format {
            FrameFormat::Video { .. } => MediaKind::Video,
            FrameFormat::Audio { .. } => MediaKind::Audio,
        }
    }

    /// Picture size for video frames
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self.format {
            FrameFormat::Video { width, height } => Some((width, height)),
            FrameFormat::Audio { .. } => None,
        }
    }

    /// Release the frame now
    pub fn close(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("timestamp", &self.timestamp)
            .field("duration", &self.duration)
            .field("format", &self.format)
            .field("len", &self.data.len())
            .field("pending_release", &self.release.is_some())
            .finish()
    }
}

/// Whether an encoded chunk can be decoded on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    /// Independently decodable
    Key,
    /// Depends on earlier chunks
    Delta,
}

/// Compressed output of an encoder, or input to a decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Media kind
    pub kind: MediaKind,
    /// Key or delta
    pub chunk_type: ChunkType,
    /// Presentation timestamp in microseconds
    pub timestamp: u64,
    /// Duration in microseconds, when known
    pub duration: Option<u64>,
    /// Compressed bytes
    pub data: Bytes,
}

impl EncodedChunk {
    /// Create a video chunk
    pub fn video(chunk_type: ChunkType, timestamp: u64, data: impl Into<Bytes>) -> Self {
        Self {
            kind: MediaKind::Video,
            chunk_type,
            timestamp,
            duration: None,
            data: data.into(),
        }
    }

    /// Create an audio chunk (audio chunks are always key chunks)
    pub fn audio(timestamp: u64, data: impl Into<Bytes>) -> Self {
        Self {
            kind: MediaKind::Audio,
            chunk_type: ChunkType::Key,
            timestamp,
            duration: None,
            data: data.into(),
        }
    }

    /// Whether this is a key chunk
    pub fn is_key(&self) -> bool {
        self.chunk_type == ChunkType::Key
    }
}

/// A decoded picture ready for rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedVideoFrame {
    /// Presentation timestamp in microseconds
    pub timestamp: u64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Display rotation in degrees
    pub rotation: i32,
    /// Pixel data
    pub data: Bytes,
}

/// A decoded audio buffer
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Presentation timestamp in microseconds
    pub timestamp: u64,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u8,
    /// Interleaved samples
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    /// Playback duration of the buffer
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as u64 / u64::from(self.channels);
        Duration::from_micros(frames * 1_000_000 / u64::from(self.sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_frame(counter: &Arc<AtomicUsize>) -> RawFrame {
        let counter = counter.clone();
        RawFrame::video(0, 640, 480, vec![0u8; 4]).with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_release_on_close_runs_once() {
        let released = Arc::new(AtomicUsize::new(0));
        counted_frame(&released).close();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        {
            let _frame = counted_frame(&released);
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_audio_duration() {
        let audio = DecodedAudio {
            timestamp: 0,
            sample_rate: 48_000,
            channels: 2,
            samples: vec![0.0; 960 * 2],
        };
        assert_eq!(audio.duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_call_type_kinds() {
        assert_eq!(CallType::Audio.kinds(), &[MediaKind::Audio]);
        assert!(CallType::Video.has_video());
        assert!(!CallType::Audio.has_video());
    }
}
