//! Wire framing for media and control packets
//!
//! Every packet starts with a one byte frame type code. Data frames
//! (`VideoKey`, `VideoDelta`, `Audio`, `Orientation`) follow it with an
//! eight byte big-endian timestamp; config and control frames carry no
//! timestamp. The payload follows the header immediately.
//!
//! ```text
//!  0        1                                 9
//! +--------+---------------------------------+----------------
//! |  type  |   timestamp (data frames only)  |  payload ...
//! +--------+---------------------------------+----------------
//! ```
//!
//! The header length is a function of the type code alone. Unknown type
//! codes decode as [`FrameType::Unknown`] with a one byte header so newer
//! control messages never break older receivers.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;

use crate::config::{AudioConfig, TransceiverState, VideoConfig};
use crate::error::{CodecError, Result};

/// Header length of config and control frames
pub const CONTROL_HEADER_LEN: usize = 1;

/// Header length of data frames (type code + 64-bit timestamp)
pub const DATA_HEADER_LEN: usize = 9;

/// Size of the rotation value leading an orientation payload
pub const ORIENTATION_PAYLOAD_LEN: usize = 4;

/// Frame type carried in the first byte of every packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// JSON video decoder configuration
    VideoConfig,
    /// JSON audio decoder configuration
    AudioConfig,
    /// Encoded video key frame (starts a GOP)
    VideoKey,
    /// Encoded video delta frame
    VideoDelta,
    /// Encoded audio chunk
    Audio,
    /// Peer finished setting up its side of the call
    Connected,
    /// JSON transceiver enable flags
    TransceiverState,
    /// Display rotation change
    Orientation,
    /// Type code this implementation does not know
    Unknown(u8),
}

impl FrameType {
    /// Convert a wire code to a frame type
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => Self::VideoConfig,
            1 => Self::AudioConfig,
            2 => Self::VideoKey,
            3 => Self::VideoDelta,
            4 => Self::Audio,
            5 => Self::Connected,
            6 => Self::TransceiverState,
            7 => Self::Orientation,
            other => Self::Unknown(other),
        }
    }

    /// Convert to the wire code
    pub fn to_u8(self) -> u8 {
        match self {
            Self::VideoConfig => 0,
            Self::AudioConfig => 1,
            Self::VideoKey => 2,
            Self::VideoDelta => 3,
            Self::Audio => 4,
            Self::Connected => 5,
            Self::TransceiverState => 6,
            Self::Orientation => 7,
            Self::Unknown(code) => code,
        }
    }

    /// Whether frames of this type carry a timestamp
    pub fn is_data(self) -> bool {
        matches!(
            self,
            Self::VideoKey | Self::VideoDelta | Self::Audio | Self::Orientation
        )
    }

    /// Whether the payload is a JSON document
    pub fn is_json(self) -> bool {
        matches!(
            self,
            Self::VideoConfig | Self::AudioConfig | Self::TransceiverState
        )
    }

    /// Header length for this type
    pub fn header_len(self) -> usize {
        if self.is_data() {
            DATA_HEADER_LEN
        } else {
            CONTROL_HEADER_LEN
        }
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::VideoConfig => "video-config",
            Self::AudioConfig => "audio-config",
            Self::VideoKey => "video-key",
            Self::VideoDelta => "video-delta",
            Self::Audio => "audio",
            Self::Connected => "connected",
            Self::TransceiverState => "transceiver-state",
            Self::Orientation => "orientation",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// A single framed packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Frame type
    pub frame_type: FrameType,
    /// Presentation timestamp, present only for data frames
    pub timestamp: Option<u64>,
    /// Payload bytes following the header
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet, dropping any timestamp given for a non-data type
    pub fn new(frame_type: FrameType, timestamp: Option<u64>, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            timestamp: if frame_type.is_data() { timestamp } else { None },
            payload: payload.into(),
        }
    }

    /// Encoded video key frame
    pub fn video_key(timestamp: u64, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::VideoKey, Some(timestamp), payload)
    }

    /// Encoded video delta frame
    pub fn video_delta(timestamp: u64, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::VideoDelta, Some(timestamp), payload)
    }

    /// Encoded audio chunk
    pub fn audio(timestamp: u64, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Audio, Some(timestamp), payload)
    }

    /// Rotation change, encoded as a big-endian `i32`
    pub fn orientation(timestamp: u64, rotation: i32) -> Self {
        Self::new(
            FrameType::Orientation,
            Some(timestamp),
            Bytes::copy_from_slice(&rotation.to_be_bytes()),
        )
    }

    /// Connected notification (empty payload)
    pub fn connected() -> Self {
        Self::new(FrameType::Connected, None, Bytes::new())
    }

    /// Transceiver state as JSON
    pub fn transceiver_state(state: &TransceiverState) -> Result<Self> {
        Self::json_frame(FrameType::TransceiverState, state)
    }

    /// Video decoder configuration as JSON
    pub fn video_config(config: &VideoConfig) -> Result<Self> {
        Self::json_frame(FrameType::VideoConfig, config)
    }

    /// Audio decoder configuration as JSON
    pub fn audio_config(config: &AudioConfig) -> Result<Self> {
        Self::json_frame(FrameType::AudioConfig, config)
    }

    fn json_frame<T: serde::Serialize>(frame_type: FrameType, value: &T) -> Result<Self> {
        let json = serde_json::to_vec(value)?;
        Ok(Self::new(frame_type, None, json))
    }

    /// Header length of this packet on the wire
    pub fn header_len(&self) -> usize {
        self.frame_type.header_len()
    }

    /// Total encoded size
    pub fn encoded_len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.frame_type.to_u8());

        if self.frame_type.is_data() {
            let timestamp = self.timestamp.ok_or(CodecError::MissingTimestamp {
                frame_type: self.frame_type,
            })?;
            buf.put_u64(timestamp);
        }

        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Parse wire bytes; the payload shares the input buffer
    pub fn decode(data: Bytes) -> Result<Self> {
        let Some(&code) = data.first() else {
            return Err(CodecError::truncated(CONTROL_HEADER_LEN, 0));
        };

        let frame_type = FrameType::from_u8(code);
        let header_len = frame_type.header_len();
        if data.len() < header_len {
            return Err(CodecError::truncated(header_len, data.len()));
        }

        let timestamp = if frame_type.is_data() {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data[1..DATA_HEADER_LEN]);
            Some(u64::from_be_bytes(raw))
        } else {
            None
        };

        Ok(Self {
            frame_type,
            timestamp,
            payload: data.slice(header_len..),
        })
    }

    /// Rotation value leading an orientation payload
    pub fn rotation(&self) -> Result<i32> {
        if self.payload.len() < ORIENTATION_PAYLOAD_LEN {
            return Err(CodecError::truncated(
                ORIENTATION_PAYLOAD_LEN,
                self.payload.len(),
            ));
        }
        let mut raw = [0u8; ORIENTATION_PAYLOAD_LEN];
        raw.copy_from_slice(&self.payload[..ORIENTATION_PAYLOAD_LEN]);
        Ok(i32::from_be_bytes(raw))
    }

    /// Parse the JSON payload of a config or control frame
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Encode a frame from its parts
///
/// JSON frame types take their payload from `config` and ignore `payload`;
/// when no config object is given the payload is empty. `Connected` always
/// has an empty payload.
pub fn encode_frame(
    frame_type: FrameType,
    timestamp: Option<u64>,
    payload: &[u8],
    config: Option<&serde_json::Value>,
) -> Result<Bytes> {
    let body = match frame_type {
        FrameType::Connected => Bytes::new(),
        t if t.is_json() => match config {
            Some(value) => Bytes::from(serde_json::to_vec(value)?),
            None => Bytes::new(),
        },
        _ => Bytes::copy_from_slice(payload),
    };
    Packet::new(frame_type, timestamp, body).encode()
}

/// Decode a frame into its parts
pub fn decode_frame(data: Bytes) -> Result<Packet> {
    Packet::decode(data)
}
