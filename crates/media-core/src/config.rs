//! Media pipeline configuration
//!
//! All thresholds used by the sender, receiver and playout scheduler live
//! here. Every field has a default, so a TOML file only needs to name the
//! knobs it changes:
//!
//! ```toml
//! keyframe_interval = 30
//! max_decode_queue = 10
//!
//! [video]
//! codec = "hev1.1.6.L93"
//! bitrate = 1500000
//!
//! [log]
//! pipeline_level = "debug"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logging::parse_log_level;

/// Video encoder settings applied when a video track is attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoEncoderSettings {
    /// Codec string handed to the encoder
    pub codec: String,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Nominal capture frame rate
    pub framerate: u32,
}

impl Default for VideoEncoderSettings {
    fn default() -> Self {
        Self {
            codec: "hev1.1.6.L93.B0".to_string(),
            bitrate: 1_000_000,
            framerate: 30,
        }
    }
}

/// Audio encoder settings applied when an audio track is attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEncoderSettings {
    /// Codec string handed to the encoder
    pub codec: String,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u8,
    /// Target bitrate in bits per second
    pub bitrate: u32,
}

impl Default for AudioEncoderSettings {
    fn default() -> Self {
        Self {
            codec: "opus".to_string(),
            sample_rate: 48_000,
            channels: 1,
            bitrate: 32_000,
        }
    }
}

/// Logging section, turned into a [`crate::LoggingConfig`] by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Level for every target
    pub level: String,
    /// Level for the callwire crates only
    pub pipeline_level: Option<String>,
    /// Emit JSON lines
    pub json: bool,
    /// Include file and line information
    pub file_info: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            pipeline_level: None,
            json: false,
            file_info: false,
        }
    }
}

/// Configuration for the media pipelines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Every n-th video frame is encoded as a key frame
    pub keyframe_interval: u64,
    /// Delta frames are dropped once the decoder holds more than this many
    pub max_decode_queue: usize,
    /// Largest lead of scheduled audio over the clock before resyncing
    pub audio_max_drift_ms: u64,
    /// Lead given to the first buffer after a resync
    pub audio_resync_offset_ms: u64,
    /// Pause after a failed transport receive
    pub receive_retry_delay_ms: u64,
    /// Pause after a packet fails to dispatch
    pub error_cooldown_ms: u64,
    /// Video encoder settings
    pub video: VideoEncoderSettings,
    /// Audio encoder settings
    pub audio: AudioEncoderSettings,
    /// Logging settings
    pub log: LogSettings,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            keyframe_interval: 60,
            max_decode_queue: 15,
            audio_max_drift_ms: 100,
            audio_resync_offset_ms: 20,
            receive_retry_delay_ms: 50,
            error_cooldown_ms: 10,
            video: VideoEncoderSettings::default(),
            audio: AudioEncoderSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl MediaConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: MediaConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Check that the thresholds are usable
    pub fn validate(&self) -> Result<()> {
        if self.keyframe_interval == 0 {
            return Err(Error::configuration("keyframe_interval must be at least 1"));
        }
        if self.max_decode_queue == 0 {
            return Err(Error::configuration("max_decode_queue must be at least 1"));
        }
        if self.audio_resync_offset_ms >= self.audio_max_drift_ms {
            return Err(Error::configuration(format!(
                "audio_resync_offset_ms ({}) must be below audio_max_drift_ms ({})",
                self.audio_resync_offset_ms, self.audio_max_drift_ms
            )));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(Error::configuration(
                "audio sample_rate and channels must be non-zero",
            ));
        }
        parse_log_level(&self.log.level)?;
        if let Some(level) = self.log.pipeline_level.as_deref() {
            parse_log_level(level)?;
        }
        Ok(())
    }

    /// Largest allowed audio lead
    pub fn audio_max_drift(&self) -> Duration {
        Duration::from_millis(self.audio_max_drift_ms)
    }

    /// Lead applied after an audio resync
    pub fn audio_resync_offset(&self) -> Duration {
        Duration::from_millis(self.audio_resync_offset_ms)
    }

    /// Pause after a receive failure
    pub fn receive_retry_delay(&self) -> Duration {
        Duration::from_millis(self.receive_retry_delay_ms)
    }

    /// Pause after a dispatch failure
    pub fn error_cooldown(&self) -> Duration {
        Duration::from_millis(self.error_cooldown_ms)
    }
}
