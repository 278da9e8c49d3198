//! Audio decode session

use tracing::{debug, warn};

use super::recreate_decoder;
use crate::engine::{DecoderConfig, DecoderEvent, DecoderFactory, MediaDecoder};
use crate::error::Result;
use crate::types::{DecodedAudio, EncodedChunk, MediaKind};

#[derive(Debug, Default)]
pub(crate) struct AudioDrain {
    pub(crate) buffers: Vec<DecodedAudio>,
    pub(crate) respawned: Option<bool>,
}

/// Audio has no keyframe rules: once configured, every chunk is decoded.
pub(crate) struct AudioDecodeSession {
    decoder: Option<Box<dyn MediaDecoder>>,
    last_config: Option<DecoderConfig>,
}

impl AudioDecodeSession {
    pub(crate) fn new() -> Self {
        Self {
            decoder: None,
            last_config: None,
        }
    }

    pub(crate) fn configure(&mut self, factory: &dyn DecoderFactory, config: DecoderConfig) -> Result<()> {
        let decoder = match self.decoder.take() {
            Some(decoder) => decoder,
            None => factory.create_decoder(MediaKind::Audio)?,
        };
        let decoder = self.decoder.insert(decoder);
        decoder.configure(&config)?;

        debug!("Audio decoder configured for {}", config.codec());
        self.last_config = Some(config);
        Ok(())
    }

    pub(crate) fn decode(&mut self, chunk: EncodedChunk) -> Result<bool> {
        match (self.decoder.as_mut(), self.last_config.is_some()) {
            (Some(decoder), true) => decoder.decode(chunk).map(|()| true),
            _ => Ok(false),
        }
    }

    pub(crate) fn drain(&mut self, factory: &dyn DecoderFactory) -> AudioDrain {
        let mut drained = AudioDrain::default();
        let mut fault = None;

        if let Some(decoder) = self.decoder.as_mut() {
            while let Some(event) = decoder.poll_event() {
                match event {
                    DecoderEvent::AudioData(buffer) => drained.buffers.push(buffer),
                    DecoderEvent::VideoFrame(_) => debug!("Audio decoder emitted video, ignoring"),
                    DecoderEvent::Fault(message) => {
                        fault = Some(message);
                        break;
                    }
                }
            }
        }

        if let Some(message) = fault {
            warn!("Audio decoder fault: {}", message);
            if let Some(mut old) = self.decoder.take() {
                old.close();
            }
            let respawned = match self.last_config.as_ref() {
                Some(config) => match recreate_decoder(factory, MediaKind::Audio, config) {
                    Ok(decoder) => {
                        self.decoder = Some(decoder);
                        true
                    }
                    Err(err) => {
                        warn!("Could not respawn audio decoder: {}", err);
                        false
                    }
                },
                None => false,
            };
            drained.respawned = Some(respawned);
        }
        drained
    }

    pub(crate) fn close(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
        }
        self.last_config = None;
    }
}
