//! # Media-Core: Send and Receive Pipelines for callwire
//!
//! This crate moves encoded audio and video between two peers over any
//! transport that implements [`MediaTransport`]. It owns the parts of a call
//! that sit between capture and the network on one side, and between the
//! network and rendering on the other:
//!
//! - **Sender**: pulls raw frames from [`LocalTrack`]s, forces periodic key
//!   frames, records and sends decoder configs, and holds back data frames
//!   until the peer has every config it needs.
//! - **Receiver**: configures decoders from config frames (deriving HEVC codec
//!   strings from `hvcC` records), waits for key frames, sheds load under
//!   decoder backpressure, replaces faulted decoders, and schedules audio.
//! - **Call**: runs both for one call and answers a peer's `Connected` by
//!   resending configs.
//!
//! Encoders and decoders are supplied by the embedding application through
//! [`EncoderFactory`] and [`DecoderFactory`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use callwire_media_core::{CallMedia, CallType, ChannelTrack, LoopbackTransport, MediaKind};
//! # use callwire_media_core::{DecoderFactory, EncoderFactory};
//! # async fn run(encoders: Arc<dyn EncoderFactory>, decoders: Arc<dyn DecoderFactory>) -> callwire_media_core::Result<()> {
//! let (local, _remote) = LoopbackTransport::pair();
//! let (_mic_tx, mic) = ChannelTrack::new(MediaKind::Audio, 8);
//!
//! let mut call = CallMedia::builder(Arc::new(local), encoders, decoders)
//!     .start(CallType::Audio, vec![Box::new(mic)])
//!     .await?;
//! call.send_connected().await?;
//! call.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod call;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod playout;
pub mod receiver;
pub mod sender;
pub mod track;
pub mod transport;
pub mod types;

pub use call::{CallMedia, CallMediaBuilder};
pub use config::{AudioEncoderSettings, LogSettings, MediaConfig, VideoEncoderSettings};
pub use engine::{
    DecoderConfig, DecoderEvent, DecoderFactory, EncoderConfig, EncoderEvent, EncoderFactory,
    EncoderMetadata, MediaDecoder, MediaEncoder,
};
pub use error::{Error, Result};
pub use logging::{setup_logging, LoggingConfig};
pub use playout::{AudioClock, AudioScheduler, ManualAudioClock, MonotonicAudioClock, ScheduledAudio};
pub use receiver::{
    MediaReceiver, ReceiverEvent, ReceiverStats, ReceiverStatsSnapshot, RemoteMedia, VideoDecodeState,
};
pub use sender::{ConfigGate, MediaSender, SenderControl, SenderStats, SenderStatsSnapshot};
pub use track::{ChannelTrack, LocalTrack};
pub use transport::{LoopbackTransport, MediaTransport, SendPath};
pub use types::{
    CallType, ChunkType, DecodedAudio, DecodedVideoFrame, EncodedChunk, FrameFormat, MediaKind,
    RawFrame,
};

pub use callwire_codec_core as codec;

/// Version information for the media library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
