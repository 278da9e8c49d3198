//! Per-kind encode session and the pull loop that drives it

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Delivery, SenderShared, SenderStats};
use crate::config::{MediaConfig, VideoEncoderSettings};
use crate::engine::{EncoderConfig, EncoderEvent, EncoderMetadata, MediaEncoder};
use crate::error::Result;
use crate::track::LocalTrack;
use crate::types::{EncodedChunk, MediaKind, RawFrame};

/// Something the session wants put on the wire
#[derive(Debug)]
pub(crate) enum SessionOutput {
    /// First decoder config of the current encoder generation
    Config(EncoderMetadata),
    /// An encoded chunk
    Chunk(EncodedChunk),
}

/// Encoder state for one media kind
///
/// Owned by exactly one pull loop at a time. It moves into the loop task and
/// comes back out through the task's join handle, so a replacement track can
/// keep using the same encoder.
pub(crate) struct EncodeSession {
    kind: MediaKind,
    encoder: Box<dyn MediaEncoder>,
    video_settings: VideoEncoderSettings,
    keyframe_interval: u64,
    generation: u64,
    config_recorded: bool,
    configured_dims: Option<(u32, u32)>,
    frame_index: u64,
    force_keyframe: bool,
    alive: bool,
}

impl EncodeSession {
    /// Wrap a fresh encoder. Audio encoders are configured immediately, video
    /// encoders once the first frame reveals the picture size.
    pub(crate) fn new(kind: MediaKind, encoder: Box<dyn MediaEncoder>, config: &MediaConfig) -> Result<Self> {
        let mut session = Self {
            kind,
            encoder,
            video_settings: config.video.clone(),
            keyframe_interval: config.keyframe_interval.max(1),
            generation: 0,
            config_recorded: false,
            configured_dims: None,
            frame_index: 0,
            force_keyframe: false,
            alive: true,
        };
        if kind == MediaKind::Audio {
            session.configure(&EncoderConfig::audio(&config.audio))?;
        }
        Ok(session)
    }

    pub(crate) fn kind(&self) -> MediaKind {
        self.kind
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    fn configure(&mut self, config: &EncoderConfig) -> Result<()> {
        self.encoder.configure(config)?;
        self.generation += 1;
        self.config_recorded = false;
        debug!("Configured {} encoder, generation {}", self.kind, self.generation);
        Ok(())
    }

    /// Encode one frame and collect whatever the encoder produced
    ///
    /// The frame is released before this returns, whatever the outcome.
    pub(crate) fn encode(&mut self, frame: RawFrame, stats: &SenderStats) -> Vec<SessionOutput> {
        if !self.alive {
            frame.close();
            return Vec::new();
        }

        if let Some(dims) = frame.dimensions() {
            if self.configured_dims != Some(dims) {
                if let Some((width, height)) = self.configured_dims {
                    info!(
                        "Video input changed from {}x{} to {}x{}, reconfiguring encoder",
                        width, height, dims.0, dims.1
                    );
                }
                let config = EncoderConfig::video(&self.video_settings, dims.0, dims.1);
                if let Err(err) = self.configure(&config) {
                    warn!("Failed to configure video encoder for {}x{}: {}", dims.0, dims.1, err);
                    stats.encode_failures.fetch_add(1, Ordering::Relaxed);
                    frame.close();
                    return self.drain();
                }
                self.configured_dims = Some(dims);
                self.force_keyframe = true;
            }
        }

        let keyframe = self.kind == MediaKind::Video
            && (self.force_keyframe || self.frame_index % self.keyframe_interval == 0);
        if keyframe {
            self.force_keyframe = false;
        }
        self.frame_index += 1;

        let result = self.encoder.encode(&frame, keyframe);
        frame.close();

        match result {
            Ok(()) => {
                stats.frames_encoded.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                warn!("{} encode failed: {}", self.kind, err);
                stats.encode_failures.fetch_add(1, Ordering::Relaxed);
                if keyframe {
                    self.force_keyframe = true;
                }
            }
        }

        self.drain()
    }

    /// Encode the next video frame as a key frame
    pub(crate) fn request_keyframe(&mut self) {
        if self.kind == MediaKind::Video && !self.force_keyframe {
            debug!("Key frame requested for the next video frame");
            self.force_keyframe = true;
        }
    }

    /// The recorded config never reached the peer; take the encoder's next
    /// report for this generation instead of ignoring it as a repeat
    pub(crate) fn config_not_sent(&mut self) {
        self.config_recorded = false;
    }

    /// Collect pending encoder events
    pub(crate) fn drain(&mut self) -> Vec<SessionOutput> {
        let mut outputs = Vec::new();
        while let Some(event) = self.encoder.poll_event() {
            if !self.alive {
                debug!("Ignoring {} encoder event after close", self.kind);
                continue;
            }
            match event {
                EncoderEvent::ConfigChanged(metadata) => {
                    if metadata.kind() != self.kind {
                        warn!("{} encoder reported a {} config, ignoring", self.kind, metadata.kind());
                    } else if self.config_recorded {
                        debug!("Repeat {} config in generation {} ignored", self.kind, self.generation);
                    } else {
                        self.config_recorded = true;
                        outputs.push(SessionOutput::Config(metadata));
                    }
                }
                EncoderEvent::Chunk(chunk) => outputs.push(SessionOutput::Chunk(chunk)),
                EncoderEvent::Fault(message) => {
                    warn!("{} encoder fault: {}", self.kind, message);
                }
            }
        }
        outputs
    }

    /// Flush and release the encoder. Output produced after this point is dropped.
    pub(crate) fn close(&mut self) {
        if !self.alive {
            return;
        }
        if let Err(err) = self.encoder.flush() {
            debug!("Flushing {} encoder failed: {}", self.kind, err);
        }
        self.alive = false;
        let _ = self.drain();
        self.encoder.close();
        debug!("Closed {} encode session", self.kind);
    }
}

/// What a pull loop hands back when it exits
pub(crate) struct PullLoopExit {
    pub(crate) session: EncodeSession,
    pub(crate) track: Box<dyn LocalTrack>,
}

/// Pull frames from `track` until it ends or `cancel` fires
pub(crate) async fn run_pull_loop(
    mut session: EncodeSession,
    mut track: Box<dyn LocalTrack>,
    shared: Arc<SenderShared>,
    cancel: CancellationToken,
) -> PullLoopExit {
    let kind = session.kind();
    debug!("{} pull loop started", kind);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("{} pull loop cancelled", kind);
                break;
            }
            frame = track.read() => frame,
        };

        let Some(frame) = next else {
            info!("{} track ended", kind);
            break;
        };

        for output in session.encode(frame, &shared.stats) {
            let is_config = matches!(output, SessionOutput::Config(_));
            let is_key = matches!(&output, SessionOutput::Chunk(chunk) if chunk.is_key());

            match shared.dispatch(output).await {
                Ok(Delivery::Sent) => {}
                // the peer cannot decode deltas without the key frame it missed
                Ok(Delivery::Gated) if is_key => session.request_keyframe(),
                Ok(Delivery::Gated) => {}
                Err(err) => {
                    warn!("Failed to send {} output: {}", kind, err);
                    if is_config {
                        session.config_not_sent();
                    }
                }
            }
        }
    }

    PullLoopExit { session, track }
}
