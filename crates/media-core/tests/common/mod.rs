//! Test doubles shared by the media-core integration tests
//!
//! Encoders and decoders here do no real compression. They echo frame bytes
//! through the pipeline and record every call in a probe the test can inspect
//! or steer.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use callwire_media_core::codec::{AudioConfig, VideoConfig};
use callwire_media_core::{
    ChunkType, DecodedAudio, DecodedVideoFrame, DecoderConfig, DecoderEvent, DecoderFactory,
    EncodedChunk, EncoderConfig, EncoderEvent, EncoderFactory, EncoderMetadata, Error,
    MediaDecoder, MediaEncoder, MediaKind, MediaTransport, RawFrame, Result,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Codec string the fake video encoder reports
pub const FAKE_VIDEO_CODEC: &str = "hev1.1.6.L93";

/// Samples per fake decoded audio buffer (20 ms at 48 kHz mono)
pub const AUDIO_SAMPLES: usize = 960;

// ---------------------------------------------------------------------------
// Encoders
// ---------------------------------------------------------------------------

/// Observes and steers every encoder of one kind
#[derive(Debug)]
pub struct EncoderProbe {
    pub created: AtomicUsize,
    pub configures: Mutex<Vec<EncoderConfig>>,
    pub keyframes: Mutex<Vec<bool>>,
    pub flushed: AtomicUsize,
    pub closed: AtomicUsize,
    /// Report a decoder config alongside every chunk
    pub emit_config: AtomicBool,
    /// Reject the next `encode` call
    pub fail_next_encode: AtomicBool,
}

impl Default for EncoderProbe {
    fn default() -> Self {
        Self {
            created: AtomicUsize::new(0),
            configures: Mutex::new(Vec::new()),
            keyframes: Mutex::new(Vec::new()),
            flushed: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            emit_config: AtomicBool::new(true),
            fail_next_encode: AtomicBool::new(false),
        }
    }
}

pub struct FakeEncoder {
    kind: MediaKind,
    probe: Arc<EncoderProbe>,
    config: Option<EncoderConfig>,
    events: VecDeque<EncoderEvent>,
}

impl FakeEncoder {
    fn metadata(&self) -> Option<EncoderMetadata> {
        match self.config.as_ref()? {
            EncoderConfig::Video { width, height, .. } => {
                Some(EncoderMetadata::Video(VideoConfig::new(FAKE_VIDEO_CODEC, *width, *height)))
            }
            EncoderConfig::Audio {
                codec,
                sample_rate,
                channels,
                ..
            } => Some(EncoderMetadata::Audio(AudioConfig::new(
                codec.clone(),
                *sample_rate,
                *channels,
            ))),
        }
    }
}

impl MediaEncoder for FakeEncoder {
    fn configure(&mut self, config: &EncoderConfig) -> Result<()> {
        self.probe.configures.lock().push(config.clone());
        self.config = Some(config.clone());
        Ok(())
    }

    fn encode(&mut self, frame: &RawFrame, keyframe: bool) -> Result<()> {
        self.probe.keyframes.lock().push(keyframe);
        if self.probe.fail_next_encode.swap(false, Ordering::SeqCst) {
            return Err(Error::encode_failure(self.kind, "fake encoder rejected frame"));
        }
        if self.config.is_none() {
            return Err(Error::encode_failure(self.kind, "not configured"));
        }

        if self.probe.emit_config.load(Ordering::SeqCst) {
            if let Some(metadata) = self.metadata() {
                self.events.push_back(EncoderEvent::ConfigChanged(metadata));
            }
        }

        let chunk = match self.kind {
            MediaKind::Video => {
                let chunk_type = if keyframe { ChunkType::Key } else { ChunkType::Delta };
                EncodedChunk::video(chunk_type, frame.timestamp, frame.data.clone())
            }
            MediaKind::Audio => EncodedChunk::audio(frame.timestamp, frame.data.clone()),
        };
        self.events.push_back(EncoderEvent::Chunk(chunk));
        Ok(())
    }

    fn poll_event(&mut self) -> Option<EncoderEvent> {
        self.events.pop_front()
    }

    fn flush(&mut self) -> Result<()> {
        self.probe.flushed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.probe.closed.fetch_add(1, Ordering::SeqCst);
        self.events.clear();
    }

    fn queue_size(&self) -> usize {
        self.events.len()
    }
}

#[derive(Debug, Default)]
pub struct FakeEncoderFactory {
    pub audio: Arc<EncoderProbe>,
    pub video: Arc<EncoderProbe>,
}

impl FakeEncoderFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn probe(&self, kind: MediaKind) -> &Arc<EncoderProbe> {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }
}

impl EncoderFactory for FakeEncoderFactory {
    fn create_encoder(&self, kind: MediaKind) -> Result<Box<dyn MediaEncoder>> {
        let probe = self.probe(kind).clone();
        probe.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEncoder {
            kind,
            probe,
            config: None,
            events: VecDeque::new(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Decoders
// ---------------------------------------------------------------------------

/// Observes and steers every decoder of one kind
#[derive(Debug, Default)]
pub struct DecoderProbe {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub configures: Mutex<Vec<DecoderConfig>>,
    pub decoded: Mutex<Vec<EncodedChunk>>,
    /// Reported by `queue_size`
    pub queue_size: AtomicUsize,
    /// Reject the next `decode` call
    pub fail_next_decode: AtomicBool,
    /// Report a fault instead of output for the next chunk
    pub fault_next: AtomicBool,
    /// Make the factory fail
    pub fail_create: AtomicBool,
}

impl DecoderProbe {
    pub fn configure_count(&self) -> usize {
        self.configures.lock().len()
    }

    pub fn decoded_count(&self) -> usize {
        self.decoded.lock().len()
    }

    pub fn last_config(&self) -> Option<DecoderConfig> {
        self.configures.lock().last().cloned()
    }
}

pub struct FakeDecoder {
    kind: MediaKind,
    probe: Arc<DecoderProbe>,
    config: Option<DecoderConfig>,
    events: VecDeque<DecoderEvent>,
}

impl MediaDecoder for FakeDecoder {
    fn configure(&mut self, config: &DecoderConfig) -> Result<()> {
        self.probe.configures.lock().push(config.clone());
        self.config = Some(config.clone());
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedChunk) -> Result<()> {
        if self.probe.fail_next_decode.swap(false, Ordering::SeqCst) {
            return Err(Error::decoder_fault(self.kind, "fake decoder rejected chunk"));
        }
        self.probe.decoded.lock().push(chunk.clone());

        if self.probe.fault_next.swap(false, Ordering::SeqCst) {
            self.events.push_back(DecoderEvent::Fault("fake hardware reset".to_string()));
            return Ok(());
        }

        let event = match self.config.as_ref() {
            Some(DecoderConfig::Video {
                coded_width,
                coded_height,
                rotation,
                ..
            }) => DecoderEvent::VideoFrame(DecodedVideoFrame {
                timestamp: chunk.timestamp,
                width: *coded_width,
                height: *coded_height,
                rotation: *rotation,
                data: chunk.data,
            }),
            Some(DecoderConfig::Audio {
                sample_rate,
                channels,
                ..
            }) => DecoderEvent::AudioData(DecodedAudio {
                timestamp: chunk.timestamp,
                sample_rate: *sample_rate,
                channels: *channels,
                samples: vec![0.0; AUDIO_SAMPLES * usize::from(*channels)],
            }),
            None => return Err(Error::configuration("decoder not configured")),
        };
        self.events.push_back(event);
        Ok(())
    }

    fn poll_event(&mut self) -> Option<DecoderEvent> {
        self.events.pop_front()
    }

    fn queue_size(&self) -> usize {
        self.probe.queue_size.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.probe.closed.fetch_add(1, Ordering::SeqCst);
        self.events.clear();
    }
}

#[derive(Debug, Default)]
pub struct FakeDecoderFactory {
    pub audio: Arc<DecoderProbe>,
    pub video: Arc<DecoderProbe>,
}

impl FakeDecoderFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn probe(&self, kind: MediaKind) -> &Arc<DecoderProbe> {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }
}

impl DecoderFactory for FakeDecoderFactory {
    fn create_decoder(&self, kind: MediaKind) -> Result<Box<dyn MediaDecoder>> {
        let probe = self.probe(kind).clone();
        if probe.fail_create.load(Ordering::SeqCst) {
            return Err(Error::configuration("fake decoder factory exhausted"));
        }
        probe.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDecoder {
            kind,
            probe,
            config: None,
            events: VecDeque::new(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Transport whose receive side is scripted by the test
///
/// Outgoing frames are discarded. `recv` yields scripted results in order and
/// reports a closed transport once the script sender is dropped.
pub struct ScriptedTransport {
    script: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Bytes>>>,
    pub recv_calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> (mpsc::UnboundedSender<Result<Bytes>>, Arc<Self>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Arc::new(Self {
                script: tokio::sync::Mutex::new(rx),
                recv_calls: AtomicUsize::new(0),
            }),
        )
    }
}

#[async_trait]
impl MediaTransport for ScriptedTransport {
    async fn send_control_frame(&self, _frame: Bytes) -> Result<()> {
        Ok(())
    }

    async fn send_audio_frame(&self, _frame: Bytes) -> Result<()> {
        Ok(())
    }

    async fn send_frame(&self, _frame: Bytes) -> Result<()> {
        Ok(())
    }

    async fn begin_with_gop(&self, _frame: Bytes) -> Result<()> {
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Bytes>> {
        self.recv_calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().await.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Counts how often frame buffers are handed back
#[derive(Debug, Clone, Default)]
pub struct ReleaseCounter(Arc<AtomicUsize>);

impl ReleaseCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn video(&self, timestamp: u64, width: u32, height: u32) -> RawFrame {
        let counter = self.0.clone();
        RawFrame::video(timestamp, width, height, timestamp.to_be_bytes().to_vec()).with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    pub fn audio(&self, timestamp: u64) -> RawFrame {
        let counter = self.0.clone();
        RawFrame::audio(timestamp, 48_000, 1, vec![0u8; 64]).with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Minimal hvcC record: Main profile, level 93, one VPS array
pub fn hvcc_main_profile() -> Vec<u8> {
    let mut record = vec![
        0x01, // configurationVersion
        0x01, // profile_space 0, tier 0, profile_idc 1
        0x60, 0x00, 0x00, 0x00, // compatibility flags
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // constraint flags
        93,   // level_idc
        0xF0, 0x00, // min_spatial_segmentation_idc
        0xFC, // parallelismType
        0xFD, // chroma_format_idc = 1
        0xF8, // bit_depth_luma_minus8
        0xF8, // bit_depth_chroma_minus8
        0x00, 0x00, // avgFrameRate
        0x0F, // constantFrameRate 0, numTemporalLayers 1, nested 1, lengthSizeMinusOne 3
        0x01, // numOfArrays
    ];
    record.extend_from_slice(&[0xA0, 0x00, 0x01, 0x00, 0x02, 0x40, 0x01]);
    record
}
