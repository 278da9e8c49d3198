//! # Codec-Core: Media Framing and Codec Configuration
//!
//! This library provides the wire-level pieces of the callwire media
//! pipeline: the packet framing shared with every peer, the decoder
//! configuration records carried in config frames, and parsing of the
//! binary HEVC configuration record used to derive codec strings.
//!
//! ## Features
//!
//! - **Frame codec**: one byte type code, 64-bit timestamp for data frames
//! - **Config records**: JSON video/audio configs and transceiver state
//! - **HEVC**: `HEVCDecoderConfigurationRecord` demuxing and RFC 6381 codec strings
//! - **Mapping**: best-effort codec strings for short codec names
//!
//! ## Usage
//!
//! ```rust
//! use callwire_codec_core::{decode_frame, FrameType, Packet};
//!
//! let wire = Packet::video_key(1_000, vec![0x00, 0x01]).encode()?;
//! let packet = decode_frame(wire)?;
//! assert_eq!(packet.frame_type, FrameType::VideoKey);
//! assert_eq!(packet.timestamp, Some(1_000));
//! # Ok::<(), callwire_codec_core::CodecError>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod frame;
pub mod hevc;
pub mod mapping;

// Re-export commonly used types
pub use config::{AudioConfig, TransceiverState, VideoConfig};
pub use error::{CodecError, ErrorCategory, Result};
pub use frame::{decode_frame, encode_frame, FrameType, Packet};
pub use hevc::{HevcDecoderConfigurationRecord, HevcNalUnitType, NalArray};
pub use mapping::CodecStringMapper;

/// Version information for the codec library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the codec library
///
/// Installs a default `tracing` subscriber if none is set yet. It's safe to
/// call multiple times.
pub fn init() -> Result<()> {
    // Initialize logging if not already done
    let _ = tracing_subscriber::fmt::try_init();

    tracing::info!("Codec-Core v{} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }
}
