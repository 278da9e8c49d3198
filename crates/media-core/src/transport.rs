//! Transport abstraction for encoded media frames
//!
//! The pipelines do not care how bytes reach the peer. A transport offers four
//! outgoing paths, so that a stream-per-GOP transport can open a new stream on
//! each key frame and prioritise audio and control traffic, plus one incoming
//! stream of whole frames.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::debug;

use crate::error::{Error, Result};

/// Carries framed packets to and from the peer
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Send a config or control frame
    async fn send_control_frame(&self, frame: Bytes) -> Result<()>;

    /// Send an audio data frame
    async fn send_audio_frame(&self, frame: Bytes) -> Result<()>;

    /// Send a video delta frame on the current group of pictures
    async fn send_frame(&self, frame: Bytes) -> Result<()>;

    /// Start a new group of pictures with a key frame
    async fn begin_with_gop(&self, frame: Bytes) -> Result<()>;

    /// Wait for the next incoming frame
    ///
    /// Returns `Ok(None)` once the transport is closed for good.
    async fn recv(&self) -> Result<Option<Bytes>>;
}

/// Outgoing path a frame was sent on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPath {
    /// `send_control_frame`
    Control,
    /// `send_audio_frame`
    Audio,
    /// `send_frame`
    Frame,
    /// `begin_with_gop`
    Gop,
}

/// In-memory transport connecting two endpoints in the same process
///
/// Each end keeps the path every frame was sent on, so the far end can tell
/// key frames that opened a new group from plain deltas.
#[derive(Debug)]
pub struct LoopbackTransport {
    outgoing: Mutex<Option<mpsc::UnboundedSender<(SendPath, Bytes)>>>,
    incoming: AsyncMutex<mpsc::UnboundedReceiver<(SendPath, Bytes)>>,
}

impl LoopbackTransport {
    /// Create two connected ends
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                outgoing: Mutex::new(Some(a_tx)),
                incoming: AsyncMutex::new(b_rx),
            },
            Self {
                outgoing: Mutex::new(Some(b_tx)),
                incoming: AsyncMutex::new(a_rx),
            },
        )
    }

    /// Stop sending. The far end sees `recv` return `None` once drained.
    pub fn close(&self) {
        if self.outgoing.lock().take().is_some() {
            debug!("Loopback transport closed");
        }
    }

    /// Next incoming frame together with the path it was sent on
    pub async fn recv_tagged(&self) -> Option<(SendPath, Bytes)> {
        self.incoming.lock().await.recv().await
    }

    /// Take every frame that has already arrived without waiting
    pub fn drain_tagged(&self) -> Vec<(SendPath, Bytes)> {
        let mut drained = Vec::new();
        if let Ok(mut incoming) = self.incoming.try_lock() {
            while let Ok(item) = incoming.try_recv() {
                drained.push(item);
            }
        }
        drained
    }

    fn push(&self, path: SendPath, frame: Bytes) -> Result<()> {
        let outgoing = self.outgoing.lock();
        let sender = outgoing.as_ref().ok_or(Error::Closed)?;
        sender
            .send((path, frame))
            .map_err(|_| Error::transport("loopback peer is gone"))
    }
}

#[async_trait]
impl MediaTransport for LoopbackTransport {
    async fn send_control_frame(&self, frame: Bytes) -> Result<()> {
        self.push(SendPath::Control, frame)
    }

    async fn send_audio_frame(&self, frame: Bytes) -> Result<()> {
        self.push(SendPath::Audio, frame)
    }

    async fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.push(SendPath::Frame, frame)
    }

    async fn begin_with_gop(&self, frame: Bytes) -> Result<()> {
        self.push(SendPath::Gop, frame)
    }

    async fn recv(&self) -> Result<Option<Bytes>> {
        Ok(self.recv_tagged().await.map(|(_, frame)| frame))
    }
}
