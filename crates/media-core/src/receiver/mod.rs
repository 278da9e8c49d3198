//! Media receiver
//!
//! Reads framed packets from the transport, configures decoders from config
//! frames, feeds them encoded chunks and hands decoded output to the
//! application. Video is gated on key frames: after configuration, a decode
//! error or a backlog in the decoder, deltas are dropped until the next key
//! frame. Audio buffers are placed on the playout clock by an
//! [`AudioScheduler`].
//!
//! Steady-state failures never end the receive loop. A bad packet costs that
//! packet, a faulted decoder is replaced, and the loop only returns when the
//! transport closes or the loop is cancelled.

mod audio;
mod video;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use callwire_codec_core::{hevc, AudioConfig, CodecStringMapper, FrameType, Packet, TransceiverState, VideoConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use video::VideoDecodeState;

use self::audio::AudioDecodeSession;
use self::video::{ChunkOutcome, VideoDecodeSession};
use crate::config::MediaConfig;
use crate::engine::{DecoderConfig, DecoderFactory, MediaDecoder};
use crate::error::{Error, Result};
use crate::playout::{AudioClock, AudioScheduler, MonotonicAudioClock, ScheduledAudio};
use crate::transport::MediaTransport;
use crate::types::{CallType, ChunkType, DecodedVideoFrame, EncodedChunk, MediaKind};

/// Notifications from the remote side and from the decode pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// The peer is ready to receive
    Connected,
    /// The peer changed which directions it sends
    TransceiverState(TransceiverState),
    /// The peer's capture rotation in degrees
    Orientation {
        /// Rotation in degrees
        rotation: i32,
    },
    /// A decoder was configured from a config frame
    DecoderConfigured {
        /// Which decoder
        kind: MediaKind,
        /// Codec string it was configured with
        codec: String,
    },
    /// A faulted decoder was replaced
    DecoderRespawned {
        /// Which decoder
        kind: MediaKind,
        /// Whether the replacement is usable
        success: bool,
    },
}

/// Decoded output streams handed to the application
#[derive(Debug)]
pub struct RemoteMedia {
    /// Decoded pictures, for video calls
    pub video: Option<mpsc::UnboundedReceiver<DecodedVideoFrame>>,
    /// Decoded audio with playout start times
    pub audio: mpsc::UnboundedReceiver<ScheduledAudio>,
}

struct OutputWriters {
    video: Option<mpsc::UnboundedSender<DecodedVideoFrame>>,
    audio: mpsc::UnboundedSender<ScheduledAudio>,
}

/// Receiver counters
#[derive(Debug, Default)]
pub struct ReceiverStats {
    /// Packets read from the transport
    pub packets_received: AtomicU64,
    /// Packets that failed to parse or dispatch
    pub packets_rejected: AtomicU64,
    /// Decoded pictures delivered
    pub video_frames_decoded: AtomicU64,
    /// Decoded audio buffers scheduled
    pub audio_buffers_scheduled: AtomicU64,
    /// Video deltas dropped while waiting for a key frame
    pub dropped_awaiting_keyframe: AtomicU64,
    /// Video deltas dropped because the decoder was backed up
    pub dropped_backpressure: AtomicU64,
    /// Chunks a decoder refused
    pub decode_errors: AtomicU64,
    /// Decoders replaced after a fault
    pub decoder_respawns: AtomicU64,
    /// Packets with a type code this receiver does not know
    pub unknown_frames: AtomicU64,
}

/// Point-in-time copy of [`ReceiverStats`]
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStatsSnapshot {
    pub packets_received: u64,
    pub packets_rejected: u64,
    pub video_frames_decoded: u64,
    pub audio_buffers_scheduled: u64,
    pub dropped_awaiting_keyframe: u64,
    pub dropped_backpressure: u64,
    pub decode_errors: u64,
    pub decoder_respawns: u64,
    pub unknown_frames: u64,
}

impl ReceiverStats {
    /// Read all counters
    pub fn snapshot(&self) -> ReceiverStatsSnapshot {
        ReceiverStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_rejected: self.packets_rejected.load(Ordering::Relaxed),
            video_frames_decoded: self.video_frames_decoded.load(Ordering::Relaxed),
            audio_buffers_scheduled: self.audio_buffers_scheduled.load(Ordering::Relaxed),
            dropped_awaiting_keyframe: self.dropped_awaiting_keyframe.load(Ordering::Relaxed),
            dropped_backpressure: self.dropped_backpressure.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            decoder_respawns: self.decoder_respawns.load(Ordering::Relaxed),
            unknown_frames: self.unknown_frames.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Create and configure a replacement decoder
pub(crate) fn recreate_decoder(
    factory: &dyn DecoderFactory,
    kind: MediaKind,
    config: &DecoderConfig,
) -> Result<Box<dyn MediaDecoder>> {
    let mut decoder = factory.create_decoder(kind)?;
    decoder.configure(config)?;
    Ok(decoder)
}

/// Decodes what the peer sends
pub struct MediaReceiver {
    transport: Arc<dyn MediaTransport>,
    decoders: Arc<dyn DecoderFactory>,
    config: MediaConfig,
    mapper: CodecStringMapper,
    call_type: Option<CallType>,
    video: VideoDecodeSession,
    audio: AudioDecodeSession,
    scheduler: AudioScheduler,
    clock: Arc<dyn AudioClock>,
    outputs: Option<OutputWriters>,
    remote: Option<RemoteMedia>,
    rotation: i32,
    events_tx: mpsc::UnboundedSender<ReceiverEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ReceiverEvent>>,
    cancel: CancellationToken,
    stats: Arc<ReceiverStats>,
}

impl MediaReceiver {
    /// Create a receiver scheduling audio against a monotonic clock
    pub fn new(
        transport: Arc<dyn MediaTransport>,
        decoders: Arc<dyn DecoderFactory>,
        config: MediaConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            transport,
            decoders,
            scheduler: AudioScheduler::new(config.audio_max_drift(), config.audio_resync_offset()),
            config,
            mapper: CodecStringMapper::new(),
            call_type: None,
            video: VideoDecodeSession::new(),
            audio: AudioDecodeSession::new(),
            clock: Arc::new(MonotonicAudioClock::new()),
            outputs: None,
            remote: None,
            rotation: 0,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
            stats: Arc::new(ReceiverStats::default()),
        })
    }

    /// Schedule audio against `clock` instead
    pub fn with_clock(mut self, clock: Arc<dyn AudioClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a custom codec name table for configs without a description
    pub fn with_codec_mapper(mut self, mapper: CodecStringMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Prepare outputs for a call
    ///
    /// Must run before [`MediaReceiver::receive_loop`]. After a
    /// [`MediaReceiver::stop`] the receiver can be initialized again; fetch a
    /// fresh [`MediaReceiver::cancellation_token`] afterwards.
    pub fn init(&mut self, call_type: CallType) -> Result<()> {
        if self.call_type.is_some() {
            return Err(Error::configuration("receiver is already initialized"));
        }

        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (video_tx, video_rx) = if call_type.has_video() {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        self.outputs = Some(OutputWriters {
            video: video_tx,
            audio: audio_tx,
        });
        self.remote = Some(RemoteMedia {
            video: video_rx,
            audio: audio_rx,
        });

        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.scheduler.reset();
        self.call_type = Some(call_type);
        info!("Receiver initialized for {:?} call", call_type);
        Ok(())
    }

    /// Take the decoded output streams. Returns `None` after the first call.
    pub fn get_remote_media(&mut self) -> Option<RemoteMedia> {
        self.remote.take()
    }

    /// Take the event stream. Returns `None` after the first call.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<ReceiverEvent>> {
        self.events_rx.take()
    }

    /// Token that ends [`MediaReceiver::receive_loop`] when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<ReceiverStats> {
        self.stats.clone()
    }

    /// Current video decoder state
    pub fn video_state(&self) -> VideoDecodeState {
        self.video.state()
    }

    /// Whether video deltas are currently being dropped until a key frame
    pub fn is_waiting_for_keyframe(&self) -> bool {
        self.video.state() == VideoDecodeState::AwaitingKeyframe
    }

    /// Receive and dispatch packets until the transport closes or the
    /// cancellation token fires
    pub async fn receive_loop(&mut self) -> Result<()> {
        if self.call_type.is_none() {
            return Err(Error::NotInitialized {
                message: "call init before receive_loop".to_string(),
            });
        }

        let transport = self.transport.clone();
        let cancel = self.cancel.clone();
        info!("Receive loop started");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Receive loop cancelled");
                    break;
                }
                next = transport.recv() => next,
            };

            match next {
                Ok(Some(data)) => {
                    if let Err(err) = self.handle_packet(data) {
                        bump(&self.stats.packets_rejected);
                        warn!("Failed to handle packet: {}", err);
                        if !pause(&cancel, self.config.error_cooldown()).await {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    info!("Transport closed, receive loop ending");
                    break;
                }
                Err(err) => {
                    warn!("Receive failed, retrying: {}", err);
                    if !pause(&cancel, self.config.receive_retry_delay()).await {
                        break;
                    }
                }
            }
        }

        info!("Receive loop stopped");
        Ok(())
    }

    /// Dispatch a single framed packet
    pub fn handle_packet(&mut self, data: Bytes) -> Result<()> {
        bump(&self.stats.packets_received);
        let packet = Packet::decode(data)?;

        match packet.frame_type {
            FrameType::VideoConfig => self.on_video_config(&packet),
            FrameType::AudioConfig => self.on_audio_config(&packet),
            FrameType::VideoKey | FrameType::VideoDelta => self.on_video_chunk(packet),
            FrameType::Audio => self.on_audio_chunk(packet),
            FrameType::Connected => {
                debug!("Peer connected");
                self.emit(ReceiverEvent::Connected);
                Ok(())
            }
            FrameType::TransceiverState => {
                let state: TransceiverState = packet.json()?;
                debug!(
                    "Peer transceiver state: audio={} video={}",
                    state.audio_enable, state.video_enable
                );
                self.emit(ReceiverEvent::TransceiverState(state));
                Ok(())
            }
            FrameType::Orientation => self.on_orientation(packet.rotation()?),
            FrameType::Unknown(code) => {
                bump(&self.stats.unknown_frames);
                debug!("Ignoring frame with unknown type code {}", code);
                Ok(())
            }
        }
    }

    fn require_call_type(&self) -> Result<CallType> {
        self.call_type.ok_or_else(|| Error::NotInitialized {
            message: "media frame received before init".to_string(),
        })
    }

    fn resolve_video_codec(&self, config: &VideoConfig) -> String {
        if CodecStringMapper::is_byte_configured(&config.codec) {
            if let Some(description) = config.description.as_deref() {
                match hevc::codec_string_from_description(description) {
                    Ok(codec) => return codec,
                    Err(err) => warn!(
                        "Could not derive codec string from '{}' description, using fallback: {}",
                        config.codec, err
                    ),
                }
            }
        }
        self.mapper.resolve(&config.codec)
    }

    fn on_video_config(&mut self, packet: &Packet) -> Result<()> {
        if !self.require_call_type()?.has_video() {
            debug!("Ignoring video config in audio-only call");
            return Ok(());
        }

        let config: VideoConfig = packet.json()?;
        let codec = self.resolve_video_codec(&config);
        if config.rotation != 0 {
            self.rotation = config.rotation;
        }

        let decoder_config = DecoderConfig::Video {
            codec: codec.clone(),
            description: config.description,
            coded_width: config.coded_width,
            coded_height: config.coded_height,
            rotation: self.rotation,
        };
        self.video.configure(self.decoders.as_ref(), decoder_config)?;

        info!(
            "Video decoder configured: {} {}x{}",
            codec, config.coded_width, config.coded_height
        );
        self.emit(ReceiverEvent::DecoderConfigured {
            kind: MediaKind::Video,
            codec,
        });
        Ok(())
    }

    fn on_audio_config(&mut self, packet: &Packet) -> Result<()> {
        self.require_call_type()?;

        let config: AudioConfig = packet.json()?;
        let codec = self.mapper.resolve(&config.codec);
        let decoder_config = DecoderConfig::Audio {
            codec: codec.clone(),
            sample_rate: config.sample_rate,
            channels: config.number_of_channels,
            description: config.description,
        };
        self.audio.configure(self.decoders.as_ref(), decoder_config)?;

        info!(
            "Audio decoder configured: {} {} Hz x{}",
            codec, config.sample_rate, config.number_of_channels
        );
        self.emit(ReceiverEvent::DecoderConfigured {
            kind: MediaKind::Audio,
            codec,
        });
        Ok(())
    }

    fn on_video_chunk(&mut self, packet: Packet) -> Result<()> {
        if !self.require_call_type()?.has_video() {
            debug!("Ignoring video frame in audio-only call");
            return Ok(());
        }

        let chunk_type = if packet.frame_type == FrameType::VideoKey {
            ChunkType::Key
        } else {
            ChunkType::Delta
        };
        let timestamp = packet.timestamp.unwrap_or_default();
        let chunk = EncodedChunk::video(chunk_type, timestamp, packet.payload);

        match self.video.on_chunk(chunk, self.config.max_decode_queue) {
            ChunkOutcome::Submitted => {}
            ChunkOutcome::DroppedAwaitingKeyframe => bump(&self.stats.dropped_awaiting_keyframe),
            ChunkOutcome::DroppedBackpressure => bump(&self.stats.dropped_backpressure),
            ChunkOutcome::DecodeFailed => bump(&self.stats.decode_errors),
            ChunkOutcome::NotConfigured => debug!("Dropping video frame at {}: no decoder", timestamp),
        }

        self.drain_video();
        Ok(())
    }

    fn drain_video(&mut self) {
        let drained = self.video.drain(self.decoders.as_ref());

        if let Some(writer) = self.outputs.as_ref().and_then(|outputs| outputs.video.as_ref()) {
            for frame in drained.frames {
                bump(&self.stats.video_frames_decoded);
                if writer.send(frame).is_err() {
                    debug!("Video output closed, discarding frame");
                }
            }
        }

        if let Some(success) = drained.respawned {
            bump(&self.stats.decoder_respawns);
            self.emit(ReceiverEvent::DecoderRespawned {
                kind: MediaKind::Video,
                success,
            });
        }
    }

    fn on_audio_chunk(&mut self, packet: Packet) -> Result<()> {
        self.require_call_type()?;

        let timestamp = packet.timestamp.unwrap_or_default();
        let chunk = EncodedChunk::audio(timestamp, packet.payload);
        match self.audio.decode(chunk) {
            Ok(true) => {}
            Ok(false) => debug!("Dropping audio frame at {}: no decoder", timestamp),
            Err(err) => {
                bump(&self.stats.decode_errors);
                warn!("Audio decode failed: {}", err);
            }
        }

        self.drain_audio();
        Ok(())
    }

    fn drain_audio(&mut self) {
        let drained = self.audio.drain(self.decoders.as_ref());

        for buffer in drained.buffers {
            let now = self.clock.current_time();
            let start_at = self.scheduler.schedule(now, buffer.duration());
            bump(&self.stats.audio_buffers_scheduled);
            if let Some(outputs) = self.outputs.as_ref() {
                let scheduled = ScheduledAudio {
                    start_at,
                    audio: buffer,
                };
                if outputs.audio.send(scheduled).is_err() {
                    debug!("Audio output closed, discarding buffer");
                }
            }
        }

        if let Some(success) = drained.respawned {
            bump(&self.stats.decoder_respawns);
            self.emit(ReceiverEvent::DecoderRespawned {
                kind: MediaKind::Audio,
                success,
            });
        }
    }

    fn on_orientation(&mut self, rotation: i32) -> Result<()> {
        self.emit(ReceiverEvent::Orientation { rotation });
        if rotation == self.rotation {
            return Ok(());
        }

        self.rotation = rotation;
        if self.video.reconfigure_rotation(rotation)? {
            info!("Video decoder reconfigured for rotation {}", rotation);
        }
        Ok(())
    }

    fn emit(&self, event: ReceiverEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("Receiver event dropped: no listener");
        }
    }

    /// Tear down decoders and outputs. Safe to call more than once.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        self.outputs = None;
        self.remote = None;
        self.video.close();
        self.audio.close();
        self.clock.close();
        self.scheduler.reset();
        self.rotation = 0;
        if self.call_type.take().is_some() {
            info!("Receiver stopped");
        }
    }
}

/// Sleep for `delay` unless cancelled first. Returns false when cancelled.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
