//! Local capture tracks

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{MediaKind, RawFrame};

/// A source of raw frames, such as a camera or microphone
#[async_trait]
pub trait LocalTrack: Send {
    /// Media kind produced by the track
    fn kind(&self) -> MediaKind;

    /// Wait for the next frame. `None` means the track has ended.
    async fn read(&mut self) -> Option<RawFrame>;

    /// Stop capturing. Frames not yet read are released.
    fn stop(&mut self);
}

/// A track fed through a bounded channel
///
/// Useful for bridging a capture callback, or for feeding frames in tests.
#[derive(Debug)]
pub struct ChannelTrack {
    kind: MediaKind,
    frames: mpsc::Receiver<RawFrame>,
    stopped: bool,
}

impl ChannelTrack {
    /// Create a track and the sender that feeds it
    ///
    /// ```rust
    /// use callwire_media_core::{ChannelTrack, LocalTrack, MediaKind, RawFrame};
    ///
    /// # tokio_test::block_on(async {
    /// let (mic, mut track) = ChannelTrack::new(MediaKind::Audio, 8);
    /// mic.send(RawFrame::audio(0, 48_000, 1, vec![0u8; 1920])).await.unwrap();
    ///
    /// let frame = track.read().await.unwrap();
    /// assert_eq!(frame.kind(), MediaKind::Audio);
    /// # });
    /// ```
    pub fn new(kind: MediaKind, capacity: usize) -> (mpsc::Sender<RawFrame>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                kind,
                frames: rx,
                stopped: false,
            },
        )
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[async_trait]
impl LocalTrack for ChannelTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn read(&mut self) -> Option<RawFrame> {
        if self.stopped {
            return None;
        }
        self.frames.recv().await
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.frames.close();

        let mut released = 0usize;
        while let Ok(frame) = self.frames.try_recv() {
            frame.close();
            released += 1;
        }
        debug!("Stopped {} track, released {} pending frames", self.kind, released);
    }
}
