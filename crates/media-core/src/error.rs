//! Error types for the media pipelines

use callwire_codec_core::CodecError;
use thiserror::Error;

use crate::types::MediaKind;

/// Result type for media-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the send and receive pipelines
///
/// Only configuration problems during setup are meant to reach callers as
/// hard failures. The loops log and absorb everything else.
#[derive(Error, Debug)]
pub enum Error {
    /// Framing or codec configuration parsing failed
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A decoder reported an asynchronous fault
    #[error("Decoder fault ({kind}): {message}")]
    DecoderFault { kind: MediaKind, message: String },

    /// Submitting a frame to an encoder failed
    #[error("Encode failure ({kind}): {message}")]
    EncodeFailure { kind: MediaKind, message: String },

    /// The transport failed to deliver the next packet
    #[error("Transport receive failure: {message}")]
    TransportReceiveFailure { message: String },

    /// The transport rejected an outgoing packet
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The transport or session has been closed
    #[error("Media session closed")]
    Closed,

    /// An operation needs `init` to have run first
    #[error("Not initialized: {message}")]
    NotInitialized { message: String },

    /// Invalid settings, or a factory could not produce a working component
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Reading a configuration file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file is not valid TOML for [`crate::MediaConfig`]
    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a transport send error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a transport receive error
    pub fn receive_failure(message: impl Into<String>) -> Self {
        Self::TransportReceiveFailure {
            message: message.into(),
        }
    }

    /// Create an encode failure for `kind`
    pub fn encode_failure(kind: MediaKind, message: impl Into<String>) -> Self {
        Self::EncodeFailure {
            kind,
            message: message.into(),
        }
    }

    /// Create a decoder fault for `kind`
    pub fn decoder_fault(kind: MediaKind, message: impl Into<String>) -> Self {
        Self::DecoderFault {
            kind,
            message: message.into(),
        }
    }

    /// Whether the pipeline keeps running after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Codec(err) => err.is_recoverable(),
            Error::DecoderFault { .. }
            | Error::EncodeFailure { .. }
            | Error::TransportReceiveFailure { .. }
            | Error::Transport { .. } => true,
            Error::Closed
            | Error::NotInitialized { .. }
            | Error::Configuration { .. }
            | Error::Io(_)
            | Error::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callwire_codec_core::decode_frame;

    #[test]
    fn test_codec_errors_convert() {
        let err: Error = decode_frame(bytes::Bytes::new()).unwrap_err().into();
        assert!(matches!(err, Error::Codec(CodecError::TruncatedFrame { .. })));
    }

    #[test]
    fn test_recoverability() {
        assert!(Error::decoder_fault(MediaKind::Video, "gpu reset").is_recoverable());
        assert!(Error::receive_failure("reset by peer").is_recoverable());
        assert!(!Error::configuration("keyframe interval is zero").is_recoverable());
        assert!(!Error::Closed.is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = Error::encode_failure(MediaKind::Audio, "queue full");
        assert_eq!(err.to_string(), "Encode failure (audio): queue full");
    }
}
