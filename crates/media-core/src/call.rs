//! Call media session
//!
//! Ties one [`MediaSender`] and one [`MediaReceiver`] to a transport for the
//! lifetime of a call. The receive loop runs on its own task, and receiver
//! events are forwarded to the application. A `Connected` event from the peer
//! makes the sender resend its decoder configs, so a peer that (re)joins late
//! can start decoding without waiting for the encoder to emit a new config.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MediaConfig;
use crate::engine::{DecoderFactory, EncoderFactory};
use crate::error::Result;
use crate::playout::AudioClock;
use crate::receiver::{MediaReceiver, ReceiverEvent, ReceiverStats, RemoteMedia};
use crate::sender::{MediaSender, SenderControl, SenderStatsSnapshot};
use crate::track::LocalTrack;
use crate::transport::MediaTransport;
use crate::types::{CallType, MediaKind};

/// Builder for [`CallMedia`]
pub struct CallMediaBuilder {
    transport: Arc<dyn MediaTransport>,
    encoders: Arc<dyn EncoderFactory>,
    decoders: Arc<dyn DecoderFactory>,
    config: MediaConfig,
    clock: Option<Arc<dyn AudioClock>>,
}

impl CallMediaBuilder {
    /// Use `config` instead of the defaults
    pub fn config(mut self, config: MediaConfig) -> Self {
        self.config = config;
        self
    }

    /// Schedule received audio against `clock`
    pub fn audio_clock(mut self, clock: Arc<dyn AudioClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Start the receive side and attach `tracks`
    pub async fn start(self, call_type: CallType, tracks: Vec<Box<dyn LocalTrack>>) -> Result<CallMedia> {
        let mut receiver = MediaReceiver::new(self.transport.clone(), self.decoders, self.config.clone())?;
        if let Some(clock) = self.clock {
            receiver = receiver.with_clock(clock);
        }
        receiver.init(call_type)?;

        let mut sender = MediaSender::new(self.transport, self.encoders, self.config)?;
        for track in tracks {
            if !call_type.kinds().contains(&track.kind()) {
                warn!("Not attaching {} track to a {:?} call", track.kind(), call_type);
                continue;
            }
            sender.attach(track).await?;
        }

        let remote = receiver.get_remote_media();
        let receiver_events = receiver.take_event_receiver();
        let receiver_cancel = receiver.cancellation_token();
        let receiver_stats = receiver.stats();

        let receive_task = tokio::spawn(async move {
            if let Err(err) = receiver.receive_loop().await {
                warn!("Receive loop ended with error: {}", err);
            }
            receiver
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let forward_task = receiver_events.map(|events| {
            tokio::spawn(forward_events(events, sender.control(), events_tx))
        });

        info!("Call media started ({:?})", call_type);
        Ok(CallMedia {
            sender,
            receive_task: Some(receive_task),
            forward_task,
            receiver_cancel,
            receiver_stats,
            remote,
            events: Some(events_rx),
            stopped: false,
        })
    }
}

/// Forward receiver events, answering `Connected` with our configs
async fn forward_events(
    mut events: mpsc::UnboundedReceiver<ReceiverEvent>,
    control: SenderControl,
    app: mpsc::UnboundedSender<ReceiverEvent>,
) {
    while let Some(event) = events.recv().await {
        if event == ReceiverEvent::Connected {
            debug!("Peer connected, resending decoder configs");
            if let Err(err) = control.send_configs().await {
                warn!("Failed to resend decoder configs: {}", err);
            }
        }
        if app.send(event).is_err() {
            debug!("Application event listener gone");
        }
    }
}

/// Both media directions of one call
pub struct CallMedia {
    sender: MediaSender,
    receive_task: Option<JoinHandle<MediaReceiver>>,
    forward_task: Option<JoinHandle<()>>,
    receiver_cancel: CancellationToken,
    receiver_stats: Arc<ReceiverStats>,
    remote: Option<RemoteMedia>,
    events: Option<mpsc::UnboundedReceiver<ReceiverEvent>>,
    stopped: bool,
}

impl CallMedia {
    /// Start configuring a call over `transport`
    pub fn builder(
        transport: Arc<dyn MediaTransport>,
        encoders: Arc<dyn EncoderFactory>,
        decoders: Arc<dyn DecoderFactory>,
    ) -> CallMediaBuilder {
        CallMediaBuilder {
            transport,
            encoders,
            decoders,
            config: MediaConfig::default(),
            clock: None,
        }
    }

    /// Take the decoded remote media streams
    pub fn take_remote_media(&mut self) -> Option<RemoteMedia> {
        self.remote.take()
    }

    /// Take the stream of receiver events
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<ReceiverEvent>> {
        self.events.take()
    }

    /// The send side
    pub fn sender(&self) -> &MediaSender {
        &self.sender
    }

    /// Attach a track, replacing any existing one of the same kind
    pub async fn attach(&mut self, track: Box<dyn LocalTrack>) -> Result<()> {
        self.sender.attach(track).await
    }

    /// Swap the source of an attached kind
    pub async fn replace_track(&mut self, track: Box<dyn LocalTrack>) -> Result<()> {
        self.sender.replace_track(track).await
    }

    /// Stop sending `kind`
    pub async fn detach(&mut self, kind: MediaKind) {
        self.sender.detach(kind).await;
    }

    /// Tell the peer this side is ready
    pub async fn send_connected(&self) -> Result<()> {
        self.sender.send_connected().await
    }

    /// Sender counters
    pub fn sender_stats(&self) -> SenderStatsSnapshot {
        self.sender.stats()
    }

    /// Receiver counters
    pub fn receiver_stats(&self) -> Arc<ReceiverStats> {
        self.receiver_stats.clone()
    }

    /// Whether `stop` has run
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Stop both directions. Safe to call more than once.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.sender.stop().await;

        self.receiver_cancel.cancel();
        if let Some(task) = self.receive_task.take() {
            match task.await {
                Ok(mut receiver) => receiver.stop(),
                Err(err) => debug!("Receive task did not exit cleanly: {}", err),
            }
        }
        if let Some(task) = self.forward_task.take() {
            task.abort();
        }

        info!("Call media stopped");
    }
}

impl Drop for CallMedia {
    fn drop(&mut self) {
        self.receiver_cancel.cancel();
        if let Some(task) = self.forward_task.take() {
            task.abort();
        }
    }
}
