//! Encoder and decoder seams
//!
//! Platform codecs report results asynchronously. Here that is modelled as a
//! typed event queue the owning session polls after every call, which keeps
//! each codec exclusively owned by one pipeline loop.

use callwire_codec_core::{AudioConfig, VideoConfig};

use crate::config::{AudioEncoderSettings, VideoEncoderSettings};
use crate::error::Result;
use crate::types::{DecodedAudio, DecodedVideoFrame, EncodedChunk, MediaKind, RawFrame};

/// Settings an encoder is configured with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderConfig {
    /// Video encoder settings for a given input size
    Video {
        /// Codec string
        codec: String,
        /// Input width in pixels
        width: u32,
        /// Input height in pixels
        height: u32,
        /// Target bitrate in bits per second
        bitrate: u32,
        /// Nominal frame rate
        framerate: u32,
    },
    /// Audio encoder settings
    Audio {
        /// Codec string
        codec: String,
        /// Sample rate in Hz
        sample_rate: u32,
        /// Channel count
        channels: u8,
        /// Target bitrate in bits per second
        bitrate: u32,
    },
}

impl EncoderConfig {
    /// Video settings for frames of `width` x `height`
    pub fn video(settings: &VideoEncoderSettings, width: u32, height: u32) -> Self {
        EncoderConfig::Video {
            codec: settings.codec.clone(),
            width,
            height,
            bitrate: settings.bitrate,
            framerate: settings.framerate,
        }
    }

    /// Audio settings
    pub fn audio(settings: &AudioEncoderSettings) -> Self {
        EncoderConfig::Audio {
            codec: settings.codec.clone(),
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            bitrate: settings.bitrate,
        }
    }

    /// Media kind these settings apply to
    pub fn kind(&self) -> MediaKind {
        match self {
            EncoderConfig::Video { .. } => MediaKind::Video,
            EncoderConfig::Audio { .. } => MediaKind::Audio,
        }
    }
}

/// Decoder configuration emitted by an encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderMetadata {
    /// Video decoder configuration
    Video(VideoConfig),
    /// Audio decoder configuration
    Audio(AudioConfig),
}

impl EncoderMetadata {
    /// Media kind of the configuration
    pub fn kind(&self) -> MediaKind {
        match self {
            EncoderMetadata::Video(_) => MediaKind::Video,
            EncoderMetadata::Audio(_) => MediaKind::Audio,
        }
    }
}

/// Output reported by an encoder
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderEvent {
    /// A compressed chunk is ready
    Chunk(EncodedChunk),
    /// The encoder produced (or changed) its decoder configuration
    ConfigChanged(EncoderMetadata),
    /// The encoder failed asynchronously
    Fault(String),
}

/// A video or audio encoder
pub trait MediaEncoder: Send {
    /// Apply settings, starting a new configuration generation
    fn configure(&mut self, config: &EncoderConfig) -> Result<()>;

    /// Submit a frame. Output arrives through [`MediaEncoder::poll_event`].
    fn encode(&mut self, frame: &RawFrame, keyframe: bool) -> Result<()>;

    /// Next pending output, if any
    fn poll_event(&mut self) -> Option<EncoderEvent>;

    /// Push out everything still queued
    fn flush(&mut self) -> Result<()>;

    /// Release the encoder
    fn close(&mut self);

    /// Number of frames submitted but not yet emitted
    fn queue_size(&self) -> usize;
}

/// Creates encoders for a media kind
pub trait EncoderFactory: Send + Sync {
    /// Create an unconfigured encoder
    fn create_encoder(&self, kind: MediaKind) -> Result<Box<dyn MediaEncoder>>;
}

/// Settings a decoder is configured with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderConfig {
    /// Video decoder settings
    Video {
        /// Fully qualified codec string
        codec: String,
        /// Codec-specific configuration record
        description: Option<Vec<u8>>,
        /// Coded width in pixels
        coded_width: u32,
        /// Coded height in pixels
        coded_height: u32,
        /// Display rotation in degrees
        rotation: i32,
    },
    /// Audio decoder settings
    Audio {
        /// Codec string
        codec: String,
        /// Sample rate in Hz
        sample_rate: u32,
        /// Channel count
        channels: u8,
        /// Codec-specific configuration record
        description: Option<Vec<u8>>,
    },
}

impl DecoderConfig {
    /// Media kind these settings apply to
    pub fn kind(&self) -> MediaKind {
        match self {
            DecoderConfig::Video { .. } => MediaKind::Video,
            DecoderConfig::Audio { .. } => MediaKind::Audio,
        }
    }

    /// Codec string
    pub fn codec(&self) -> &str {
        match self {
            DecoderConfig::Video { codec, .. } | DecoderConfig::Audio { codec, .. } => codec,
        }
    }
}

/// Output reported by a decoder
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    /// A decoded picture
    VideoFrame(DecodedVideoFrame),
    /// A decoded audio buffer
    AudioData(DecodedAudio),
    /// The decoder failed asynchronously and must be replaced
    Fault(String),
}

/// A video or audio decoder
pub trait MediaDecoder: Send {
    /// Apply settings. Reconfiguring an existing decoder is allowed.
    fn configure(&mut self, config: &DecoderConfig) -> Result<()>;

    /// Submit a chunk. Output arrives through [`MediaDecoder::poll_event`].
    fn decode(&mut self, chunk: EncodedChunk) -> Result<()>;

    /// Next pending output, if any
    fn poll_event(&mut self) -> Option<DecoderEvent>;

    /// Number of chunks submitted but not yet decoded
    fn queue_size(&self) -> usize;

    /// Release the decoder
    fn close(&mut self);
}

/// Creates decoders for a media kind
pub trait DecoderFactory: Send + Sync {
    /// Create an unconfigured decoder
    fn create_decoder(&self, kind: MediaKind) -> Result<Box<dyn MediaDecoder>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;

    #[test]
    fn test_encoder_config_from_settings() {
        let media = MediaConfig::default();
        let video = EncoderConfig::video(&media.video, 1280, 720);
        assert_eq!(video.kind(), MediaKind::Video);
        assert!(matches!(
            video,
            EncoderConfig::Video { width: 1280, height: 720, framerate: 30, .. }
        ));

        let audio = EncoderConfig::audio(&media.audio);
        assert_eq!(audio.kind(), MediaKind::Audio);
    }

    #[test]
    fn test_decoder_config_accessors() {
        let config = DecoderConfig::Audio {
            codec: "opus".into(),
            sample_rate: 48_000,
            channels: 2,
            description: None,
        };
        assert_eq!(config.kind(), MediaKind::Audio);
        assert_eq!(config.codec(), "opus");
    }
}
