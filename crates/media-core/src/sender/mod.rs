//! Media sender
//!
//! Pulls raw frames from local tracks, encodes them and frames them for the
//! transport. Each attached track gets its own pull loop task. Data frames are
//! held back (dropped, not queued) until the peer has been sent the decoder
//! configuration of every attached kind.
//!
//! Outgoing paths:
//!
//! | Output              | Transport call        |
//! |---------------------|-----------------------|
//! | video key chunk     | `begin_with_gop`      |
//! | video delta chunk   | `send_frame`          |
//! | audio chunk         | `send_audio_frame`    |
//! | configs and control | `send_control_frame`  |

mod gate;
mod session;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use callwire_codec_core::{AudioConfig, Packet, TransceiverState, VideoConfig};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use gate::ConfigGate;

use self::session::{run_pull_loop, EncodeSession, PullLoopExit, SessionOutput};
use crate::config::MediaConfig;
use crate::engine::{EncoderFactory, EncoderMetadata};
use crate::error::Result;
use crate::track::LocalTrack;
use crate::transport::MediaTransport;
use crate::types::{ChunkType, EncodedChunk, MediaKind};

/// Sender counters
#[derive(Debug, Default)]
pub struct SenderStats {
    /// Frames accepted by an encoder
    pub frames_encoded: AtomicU64,
    /// Frames an encoder rejected or could not be configured for
    pub encode_failures: AtomicU64,
    /// Decoder configs sent
    pub configs_sent: AtomicU64,
    /// Data chunks handed to the transport
    pub chunks_sent: AtomicU64,
    /// Data chunks dropped because the config gate was closed
    pub chunks_gated: AtomicU64,
    /// Bytes of data frames handed to the transport
    pub bytes_sent: AtomicU64,
}

/// Point-in-time copy of [`SenderStats`]
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStatsSnapshot {
    pub frames_encoded: u64,
    pub encode_failures: u64,
    pub configs_sent: u64,
    pub chunks_sent: u64,
    pub chunks_gated: u64,
    pub bytes_sent: u64,
}

impl SenderStats {
    /// Read all counters
    pub fn snapshot(&self) -> SenderStatsSnapshot {
        SenderStatsSnapshot {
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            configs_sent: self.configs_sent.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            chunks_gated: self.chunks_gated.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct RecordedConfigs {
    video: Option<VideoConfig>,
    audio: Option<AudioConfig>,
}

/// Whether a session output reached the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    /// Dropped because the config gate was closed
    Gated,
}

/// State shared by the pull loops and control handles
pub(crate) struct SenderShared {
    transport: Arc<dyn MediaTransport>,
    gate: ConfigGate,
    configs: Mutex<RecordedConfigs>,
    stats: SenderStats,
    epoch: Instant,
}

impl SenderShared {
    async fn dispatch(&self, output: SessionOutput) -> Result<Delivery> {
        match output {
            SessionOutput::Config(metadata) => {
                self.send_config(metadata).await?;
                Ok(Delivery::Sent)
            }
            SessionOutput::Chunk(chunk) => self.send_chunk(chunk).await,
        }
    }

    async fn send_config(&self, metadata: EncoderMetadata) -> Result<()> {
        let kind = metadata.kind();
        let packet = match &metadata {
            EncoderMetadata::Video(config) => Packet::video_config(config)?,
            EncoderMetadata::Audio(config) => Packet::audio_config(config)?,
        };

        {
            let mut configs = self.configs.lock();
            match metadata {
                EncoderMetadata::Video(config) => configs.video = Some(config),
                EncoderMetadata::Audio(config) => configs.audio = Some(config),
            }
        }

        self.transport.send_control_frame(packet.encode()?).await?;
        self.gate.mark_sent(kind);
        self.stats.configs_sent.fetch_add(1, Ordering::Relaxed);
        info!("Sent {} decoder config", kind);
        Ok(())
    }

    async fn send_chunk(&self, chunk: EncodedChunk) -> Result<Delivery> {
        if !self.gate.is_open() {
            self.stats.chunks_gated.fetch_add(1, Ordering::Relaxed);
            debug!("Dropping {} chunk at {}: config not sent yet", chunk.kind, chunk.timestamp);
            return Ok(Delivery::Gated);
        }

        let len = chunk.data.len() as u64;
        match (chunk.kind, chunk.chunk_type) {
            (MediaKind::Video, ChunkType::Key) => {
                let wire = Packet::video_key(chunk.timestamp, chunk.data).encode()?;
                self.transport.begin_with_gop(wire).await?;
            }
            (MediaKind::Video, ChunkType::Delta) => {
                let wire = Packet::video_delta(chunk.timestamp, chunk.data).encode()?;
                self.transport.send_frame(wire).await?;
            }
            (MediaKind::Audio, _) => {
                let wire = Packet::audio(chunk.timestamp, chunk.data).encode()?;
                self.transport.send_audio_frame(wire).await?;
            }
        }

        self.stats.chunks_sent.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_sent.fetch_add(len, Ordering::Relaxed);
        Ok(Delivery::Sent)
    }

    fn forget_config(&self, kind: MediaKind) {
        let mut configs = self.configs.lock();
        match kind {
            MediaKind::Video => configs.video = None,
            MediaKind::Audio => configs.audio = None,
        }
    }
}

/// Cloneable handle for the control side of a [`MediaSender`]
///
/// Control frames bypass the config gate. The handle stays usable from other
/// tasks while the sender itself is busy attaching or replacing tracks.
#[derive(Clone)]
pub struct SenderControl {
    shared: Arc<SenderShared>,
}

impl SenderControl {
    /// Resend the recorded config of every attached kind
    ///
    /// Used when the peer (re)connects. Kinds whose encoder has not produced
    /// a config yet are skipped; their config goes out when it appears.
    pub async fn send_configs(&self) -> Result<()> {
        let (video, audio) = {
            let configs = self.shared.configs.lock();
            (configs.video.clone(), configs.audio.clone())
        };

        if let Some(config) = audio.filter(|_| self.shared.gate.is_active(MediaKind::Audio)) {
            self.shared.send_config(EncoderMetadata::Audio(config)).await?;
        }
        if let Some(config) = video.filter(|_| self.shared.gate.is_active(MediaKind::Video)) {
            self.shared.send_config(EncoderMetadata::Video(config)).await?;
        }
        Ok(())
    }

    /// Tell the peer this side is ready to receive
    pub async fn send_connected(&self) -> Result<()> {
        let wire = Packet::connected().encode()?;
        self.shared.transport.send_control_frame(wire).await
    }

    /// Tell the peer which local directions are enabled
    pub async fn send_transceiver_state(&self, audio_enable: bool, video_enable: bool) -> Result<()> {
        let state = TransceiverState {
            audio_enable,
            video_enable,
        };
        let wire = Packet::transceiver_state(&state)?.encode()?;
        self.shared.transport.send_control_frame(wire).await
    }

    /// Tell the peer the capture rotation in degrees
    pub async fn send_orientation(&self, rotation: i32) -> Result<()> {
        let timestamp = self.shared.epoch.elapsed().as_micros() as u64;
        let wire = Packet::orientation(timestamp, rotation).encode()?;
        self.shared.transport.send_control_frame(wire).await
    }

    /// Whether data frames currently pass the gate
    pub fn is_gate_open(&self) -> bool {
        self.shared.gate.is_open()
    }

    /// Read the sender counters
    pub fn stats(&self) -> SenderStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<PullLoopExit>,
}

impl RunningLoop {
    /// Cancel the loop and take back its session and track
    async fn shutdown(self) -> Option<PullLoopExit> {
        self.cancel.cancel();
        match self.handle.await {
            Ok(exit) => Some(exit),
            Err(err) => {
                debug!("Pull loop did not exit cleanly: {}", err);
                None
            }
        }
    }
}

/// Encodes local tracks and sends them to the peer
pub struct MediaSender {
    control: SenderControl,
    encoders: Arc<dyn EncoderFactory>,
    config: MediaConfig,
    audio: Option<RunningLoop>,
    video: Option<RunningLoop>,
}

impl MediaSender {
    /// Create a sender with nothing attached
    pub fn new(
        transport: Arc<dyn MediaTransport>,
        encoders: Arc<dyn EncoderFactory>,
        config: MediaConfig,
    ) -> Result<Self> {
        config.validate()?;
        let shared = SenderShared {
            transport,
            gate: ConfigGate::new(),
            configs: Mutex::new(RecordedConfigs::default()),
            stats: SenderStats::default(),
            epoch: Instant::now(),
        };
        Ok(Self {
            control: SenderControl {
                shared: Arc::new(shared),
            },
            encoders,
            config,
            audio: None,
            video: None,
        })
    }

    /// Control handle that can be moved to other tasks
    pub fn control(&self) -> SenderControl {
        self.control.clone()
    }

    /// Whether a track of `kind` is attached
    pub fn is_attached(&self, kind: MediaKind) -> bool {
        self.slot(kind).is_some()
    }

    fn slot(&self, kind: MediaKind) -> &Option<RunningLoop> {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    fn slot_mut(&mut self, kind: MediaKind) -> &mut Option<RunningLoop> {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }

    fn new_session(&self, kind: MediaKind) -> Result<EncodeSession> {
        let encoder = self.encoders.create_encoder(kind)?;
        EncodeSession::new(kind, encoder, &self.config)
    }

    fn spawn_loop(&mut self, session: EncodeSession, track: Box<dyn LocalTrack>) {
        let kind = session.kind();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_pull_loop(
            session,
            track,
            self.control.shared.clone(),
            cancel.clone(),
        ));
        *self.slot_mut(kind) = Some(RunningLoop { cancel, handle });
    }

    /// Start sending `track`
    ///
    /// Attaching a kind that already has a track replaces it.
    pub async fn attach(&mut self, track: Box<dyn LocalTrack>) -> Result<()> {
        let kind = track.kind();
        if self.is_attached(kind) {
            return self.replace_track(track).await;
        }

        let session = self.new_session(kind)?;
        self.control.shared.gate.activate(kind);
        self.spawn_loop(session, track);
        info!("Attached {} track", kind);
        Ok(())
    }

    /// Swap the source of an attached kind without renegotiating
    ///
    /// The encoder and the already-sent config carry over to the new track.
    /// If the old loop cannot be joined a fresh encoder is created.
    pub async fn replace_track(&mut self, track: Box<dyn LocalTrack>) -> Result<()> {
        let kind = track.kind();

        let reclaimed = match self.slot_mut(kind).take() {
            Some(running) => running.shutdown().await,
            None => None,
        };

        let session = match reclaimed {
            Some(PullLoopExit {
                session,
                track: mut old_track,
            }) => {
                old_track.stop();
                if session.is_alive() {
                    debug!("Reusing {} encoder (generation {})", kind, session.generation());
                    session
                } else {
                    self.new_session(kind)?
                }
            }
            None => self.new_session(kind)?,
        };

        self.control.shared.gate.activate(kind);
        self.spawn_loop(session, track);
        info!("Replaced {} track", kind);
        Ok(())
    }

    /// Stop sending `kind`
    ///
    /// The encoder is flushed and closed, the track stopped, and the kind no
    /// longer holds the gate closed.
    pub async fn detach(&mut self, kind: MediaKind) {
        if let Some(running) = self.slot_mut(kind).take() {
            match running.shutdown().await {
                Some(mut exit) => {
                    exit.session.close();
                    exit.track.stop();
                }
                None => warn!("Lost {} encode session while detaching", kind),
            }
            info!("Detached {} track", kind);
        }
        self.control.shared.gate.deactivate(kind);
        self.control.shared.forget_config(kind);
    }

    /// Detach everything. Safe to call more than once.
    pub async fn stop(&mut self) {
        self.detach(MediaKind::Video).await;
        self.detach(MediaKind::Audio).await;
        self.control.shared.gate.reset();
    }

    /// See [`SenderControl::send_configs`]
    pub async fn send_configs(&self) -> Result<()> {
        self.control.send_configs().await
    }

    /// See [`SenderControl::send_connected`]
    pub async fn send_connected(&self) -> Result<()> {
        self.control.send_connected().await
    }

    /// See [`SenderControl::send_transceiver_state`]
    pub async fn send_transceiver_state(&self, audio_enable: bool, video_enable: bool) -> Result<()> {
        self.control.send_transceiver_state(audio_enable, video_enable).await
    }

    /// See [`SenderControl::send_orientation`]
    pub async fn send_orientation(&self, rotation: i32) -> Result<()> {
        self.control.send_orientation(rotation).await
    }

    /// Read the sender counters
    pub fn stats(&self) -> SenderStatsSnapshot {
        self.control.stats()
    }
}

impl Drop for MediaSender {
    fn drop(&mut self) {
        for running in [self.audio.as_ref(), self.video.as_ref()].into_iter().flatten() {
            running.cancel.cancel();
        }
    }
}
