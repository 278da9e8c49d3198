//! Decoder configuration records exchanged in config and control frames
//!
//! These records travel as UTF-8 JSON in the payload of `VideoConfig`,
//! `AudioConfig` and `TransceiverState` frames. Field names follow the
//! camelCase convention used by peer implementations.

use serde::{Deserialize, Serialize};

/// Video decoder configuration produced by an encoder's first metadata emission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConfig {
    /// Codec identifier (e.g. `hev1.1.6.L93` or a short name like `h264`)
    pub codec: String,
    /// Coded frame width in pixels
    pub coded_width: u32,
    /// Coded frame height in pixels
    pub coded_height: u32,
    /// Nominal frame rate, if the encoder reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framerate: Option<u32>,
    /// Display rotation in degrees
    #[serde(default)]
    pub rotation: i32,
    /// Codec-specific binary configuration record (e.g. hvcC)
    #[serde(
        default,
        with = "description_base64",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Vec<u8>>,
}

impl VideoConfig {
    /// Create a config without a description blob
    pub fn new(codec: impl Into<String>, coded_width: u32, coded_height: u32) -> Self {
        Self {
            codec: codec.into(),
            coded_width,
            coded_height,
            framerate: None,
            rotation: 0,
            description: None,
        }
    }

    /// Attach a binary description record
    pub fn with_description(mut self, description: impl Into<Vec<u8>>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Audio decoder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    /// Codec identifier (e.g. `opus`)
    pub codec: String,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub number_of_channels: u8,
    /// Codec-specific binary configuration, if any
    #[serde(
        default,
        with = "description_base64",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Vec<u8>>,
}

impl AudioConfig {
    /// Create a config without a description blob
    pub fn new(codec: impl Into<String>, sample_rate: u32, number_of_channels: u8) -> Self {
        Self {
            codec: codec.into(),
            sample_rate,
            number_of_channels,
            description: None,
        }
    }
}

/// Which media directions the remote side currently has enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransceiverState {
    /// Remote microphone is sending
    #[serde(rename = "audioEnable")]
    pub audio_enable: bool,
    /// Remote camera is sending
    #[serde(rename = "videoEnable")]
    pub video_enable: bool,
}

mod description_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|text| STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}
