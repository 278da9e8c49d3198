//! Video decode session state machine
//!
//! ```text
//! Uninitialized --config--> AwaitingKeyframe --key--> Decoding
//!        ^                        ^  ^                  |  |
//!        |                        |  +--decode error----+  |
//!        |                        |  +--backpressure----+  |
//!        +--respawn failed-- Respawning <------fault-------+
//! ```

use tracing::{debug, warn};

use super::recreate_decoder;
use crate::engine::{DecoderConfig, DecoderEvent, DecoderFactory, MediaDecoder};
use crate::error::Result;
use crate::types::{DecodedVideoFrame, EncodedChunk, MediaKind};

/// Where the video decoder is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoDecodeState {
    /// No usable decoder
    Uninitialized,
    /// Configured, dropping deltas until a key frame arrives
    AwaitingKeyframe,
    /// Decoding every chunk
    Decoding,
    /// Replacing a faulted decoder
    Respawning,
}

/// What happened to one incoming chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkOutcome {
    Submitted,
    DroppedAwaitingKeyframe,
    DroppedBackpressure,
    DecodeFailed,
    NotConfigured,
}

/// Result of polling the decoder
#[derive(Debug, Default)]
pub(crate) struct VideoDrain {
    pub(crate) frames: Vec<DecodedVideoFrame>,
    /// `Some(success)` when a fault forced a respawn
    pub(crate) respawned: Option<bool>,
}

pub(crate) struct VideoDecodeSession {
    decoder: Option<Box<dyn MediaDecoder>>,
    last_config: Option<DecoderConfig>,
    state: VideoDecodeState,
}

impl VideoDecodeSession {
    pub(crate) fn new() -> Self {
        Self {
            decoder: None,
            last_config: None,
            state: VideoDecodeState::Uninitialized,
        }
    }

    pub(crate) fn state(&self) -> VideoDecodeState {
        self.state
    }

    /// Configure the decoder, creating it on first use
    pub(crate) fn configure(&mut self, factory: &dyn DecoderFactory, config: DecoderConfig) -> Result<()> {
        let decoder = match self.decoder.take() {
            Some(decoder) => decoder,
            None => factory.create_decoder(MediaKind::Video)?,
        };
        let decoder = self.decoder.insert(decoder);

        if let Err(err) = decoder.configure(&config) {
            self.state = VideoDecodeState::Uninitialized;
            return Err(err);
        }

        debug!("Video decoder configured for {}", config.codec());
        self.last_config = Some(config);
        self.state = VideoDecodeState::AwaitingKeyframe;
        Ok(())
    }

    /// Apply a new display rotation, if it differs from the configured one
    ///
    /// Returns whether the decoder was reconfigured.
    pub(crate) fn reconfigure_rotation(&mut self, rotation: i32) -> Result<bool> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(false);
        };
        let Some(mut config) = self.last_config.clone() else {
            return Ok(false);
        };
        let DecoderConfig::Video { rotation: current, .. } = &mut config else {
            return Ok(false);
        };
        if *current == rotation {
            return Ok(false);
        }
        *current = rotation;

        decoder.configure(&config)?;
        self.last_config = Some(config);
        self.state = VideoDecodeState::AwaitingKeyframe;
        Ok(true)
    }

    /// Feed one chunk through the keyframe and backpressure rules
    pub(crate) fn on_chunk(&mut self, chunk: EncodedChunk, max_queue: usize) -> ChunkOutcome {
        let Some(decoder) = self.decoder.as_mut() else {
            return ChunkOutcome::NotConfigured;
        };

        match self.state {
            VideoDecodeState::Uninitialized | VideoDecodeState::Respawning => {
                return ChunkOutcome::NotConfigured;
            }
            VideoDecodeState::AwaitingKeyframe => {
                if !chunk.is_key() {
                    return ChunkOutcome::DroppedAwaitingKeyframe;
                }
                self.state = VideoDecodeState::Decoding;
            }
            VideoDecodeState::Decoding => {
                if !chunk.is_key() && decoder.queue_size() > max_queue {
                    debug!(
                        "Video decoder queue at {} (> {}), dropping delta and waiting for a key frame",
                        decoder.queue_size(),
                        max_queue
                    );
                    self.state = VideoDecodeState::AwaitingKeyframe;
                    return ChunkOutcome::DroppedBackpressure;
                }
            }
        }

        match decoder.decode(chunk) {
            Ok(()) => ChunkOutcome::Submitted,
            Err(err) => {
                warn!("Video decode failed, waiting for next key frame: {}", err);
                self.state = VideoDecodeState::AwaitingKeyframe;
                ChunkOutcome::DecodeFailed
            }
        }
    }

    /// Collect decoded frames, replacing the decoder if it faulted
    pub(crate) fn drain(&mut self, factory: &dyn DecoderFactory) -> VideoDrain {
        let mut drained = VideoDrain::default();
        let mut fault = None;

        if let Some(decoder) = self.decoder.as_mut() {
            while let Some(event) = decoder.poll_event() {
                match event {
                    DecoderEvent::VideoFrame(frame) => drained.frames.push(frame),
                    DecoderEvent::AudioData(_) => debug!("Video decoder emitted audio, ignoring"),
                    DecoderEvent::Fault(message) => {
                        fault = Some(message);
                        break;
                    }
                }
            }
        }

        if let Some(message) = fault {
            warn!("Video decoder fault: {}", message);
            drained.respawned = Some(self.respawn(factory));
        }
        drained
    }

    fn respawn(&mut self, factory: &dyn DecoderFactory) -> bool {
        self.state = VideoDecodeState::Respawning;
        if let Some(mut old) = self.decoder.take() {
            old.close();
        }

        let Some(config) = self.last_config.as_ref() else {
            self.state = VideoDecodeState::Uninitialized;
            return false;
        };

        match recreate_decoder(factory, MediaKind::Video, config) {
            Ok(decoder) => {
                self.decoder = Some(decoder);
                self.state = VideoDecodeState::AwaitingKeyframe;
                true
            }
            Err(err) => {
                warn!("Could not respawn video decoder: {}", err);
                self.state = VideoDecodeState::Uninitialized;
                false
            }
        }
    }

    pub(crate) fn close(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
        }
        self.last_config = None;
        self.state = VideoDecodeState::Uninitialized;
    }
}
