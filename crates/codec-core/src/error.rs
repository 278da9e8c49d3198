//! Error handling for the codec library
//!
//! This module defines the error types raised while framing packets,
//! parsing decoder configuration records and deriving codec strings.

#![allow(missing_docs)]

use std::fmt;
use thiserror::Error;

use crate::frame::FrameType;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Error type for codec operations
#[derive(Error, Debug)]
pub enum CodecError {
    /// Binary decoder configuration record could not be parsed
    #[error("Malformed decoder configuration record: {reason}")]
    MalformedConfig { reason: String },

    /// Profile space outside of 0..=3 while building a codec string
    #[error("Unknown HEVC profile space: {space}")]
    UnknownProfileSpace { space: u8 },

    /// Frame shorter than its header or typed payload requires
    #[error("Truncated frame: need {needed} bytes, got {available}")]
    TruncatedFrame { needed: usize, available: usize },

    /// Data frame built without a timestamp
    #[error("Frame type {frame_type:?} requires a timestamp")]
    MissingTimestamp { frame_type: FrameType },

    /// JSON payload could not be serialized or parsed
    #[error("JSON payload error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// Create a new malformed configuration error
    pub fn malformed_config(reason: impl Into<String>) -> Self {
        Self::MalformedConfig {
            reason: reason.into(),
        }
    }

    /// Create a new truncated frame error
    pub fn truncated(needed: usize, available: usize) -> Self {
        Self::TruncatedFrame { needed, available }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors affect a single packet; the stream can continue
    /// with the next one.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::TruncatedFrame { .. } | Self::Json(_) => true,

            Self::MalformedConfig { .. }
            | Self::UnknownProfileSpace { .. }
            | Self::MissingTimestamp { .. } => false,
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedConfig { .. } | Self::UnknownProfileSpace { .. } => ErrorCategory::Configuration,

            Self::TruncatedFrame { .. } | Self::MissingTimestamp { .. } => ErrorCategory::Framing,

            Self::Json(_) => ErrorCategory::Serialization,
        }
    }
}

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Decoder configuration and codec string errors
    Configuration,
    /// Wire framing errors
    Framing,
    /// JSON payload errors
    Serialization,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Framing => write!(f, "Framing"),
            Self::Serialization => write!(f, "Serialization"),
        }
    }
}
