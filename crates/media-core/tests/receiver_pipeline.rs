//! Receiver pipeline integration tests
//!
//! Feeds framed packets straight into `MediaReceiver::handle_packet` (and
//! through `receive_loop` for the loop behaviour) and checks what the fake
//! decoders saw.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use callwire_media_core::codec::{AudioConfig, Packet, TransceiverState, VideoConfig};
use callwire_media_core::{
    CallType, DecoderConfig, Error, LoopbackTransport, ManualAudioClock, MediaConfig, MediaKind,
    MediaReceiver, ReceiverEvent, VideoDecodeState,
};
use common::{hvcc_main_profile, FakeDecoderFactory, ScriptedTransport};

fn receiver(call_type: CallType) -> (MediaReceiver, Arc<FakeDecoderFactory>) {
    let (local, _peer) = LoopbackTransport::pair();
    let decoders = FakeDecoderFactory::new();
    let mut receiver =
        MediaReceiver::new(Arc::new(local), decoders.clone(), MediaConfig::default()).unwrap();
    receiver.init(call_type).unwrap();
    (receiver, decoders)
}

fn wire(packet: Packet) -> Bytes {
    packet.encode().unwrap()
}

fn video_config(codec: &str) -> Bytes {
    wire(Packet::video_config(&VideoConfig::new(codec, 640, 480)).unwrap())
}

fn key(ts: u64) -> Bytes {
    wire(Packet::video_key(ts, vec![0x26, 0x01]))
}

fn delta(ts: u64) -> Bytes {
    wire(Packet::video_delta(ts, vec![0x02, 0x01]))
}

fn audio_config() -> Bytes {
    wire(Packet::audio_config(&AudioConfig::new("opus", 48_000, 1)).unwrap())
}

#[tokio::test]
async fn test_deltas_wait_for_keyframe() {
    println!("🧪 Testing key frame gating");
    let (mut rx, decoders) = receiver(CallType::Video);
    let mut remote = rx.get_remote_media().unwrap();
    let mut video_out = remote.video.take().unwrap();

    assert_eq!(rx.video_state(), VideoDecodeState::Uninitialized);
    rx.handle_packet(video_config("hev1.1.6.L93")).unwrap();
    assert!(rx.is_waiting_for_keyframe());

    rx.handle_packet(delta(1)).unwrap();
    assert_eq!(decoders.video.decoded_count(), 0);
    assert!(rx.is_waiting_for_keyframe());

    rx.handle_packet(key(2)).unwrap();
    assert_eq!(decoders.video.decoded_count(), 1);
    assert_eq!(rx.video_state(), VideoDecodeState::Decoding);

    rx.handle_packet(delta(3)).unwrap();
    assert_eq!(decoders.video.decoded_count(), 2);

    let first = video_out.try_recv().unwrap();
    assert_eq!(first.timestamp, 2);
    assert_eq!((first.width, first.height), (640, 480));
    assert_eq!(video_out.try_recv().unwrap().timestamp, 3);

    let stats = rx.stats().snapshot();
    assert_eq!(stats.dropped_awaiting_keyframe, 1);
    assert_eq!(stats.video_frames_decoded, 2);
    println!("✅ Deltas dropped until the key frame");
}

#[tokio::test]
async fn test_backpressure_drops_delta_and_waits() {
    let (mut rx, decoders) = receiver(CallType::Video);
    rx.handle_packet(video_config("hev1.1.6.L93")).unwrap();
    rx.handle_packet(key(0)).unwrap();

    decoders.video.queue_size.store(15, Ordering::SeqCst);
    rx.handle_packet(delta(1)).unwrap();
    assert_eq!(decoders.video.decoded_count(), 2);
    assert!(!rx.is_waiting_for_keyframe());

    decoders.video.queue_size.store(16, Ordering::SeqCst);
    rx.handle_packet(delta(2)).unwrap();
    assert_eq!(decoders.video.decoded_count(), 2);
    assert!(rx.is_waiting_for_keyframe());
    assert_eq!(rx.stats().snapshot().dropped_backpressure, 1);

    // key frames are still accepted under load
    rx.handle_packet(key(3)).unwrap();
    assert_eq!(decoders.video.decoded_count(), 3);
    assert_eq!(rx.video_state(), VideoDecodeState::Decoding);
}

#[tokio::test]
async fn test_decode_error_returns_to_waiting() {
    let (mut rx, decoders) = receiver(CallType::Video);
    rx.handle_packet(video_config("hev1.1.6.L93")).unwrap();
    rx.handle_packet(key(0)).unwrap();

    decoders.video.fail_next_decode.store(true, Ordering::SeqCst);
    assert!(rx.handle_packet(delta(1)).is_ok(), "decode errors are absorbed");
    assert!(rx.is_waiting_for_keyframe());
    assert_eq!(rx.stats().snapshot().decode_errors, 1);

    rx.handle_packet(delta(2)).unwrap();
    assert_eq!(decoders.video.decoded_count(), 1);
}

#[tokio::test]
async fn test_fault_respawns_decoder_with_last_config() {
    println!("🧪 Testing decoder respawn");
    let (mut rx, decoders) = receiver(CallType::Video);
    let mut events = rx.take_event_receiver().unwrap();

    rx.handle_packet(video_config("hev1.1.6.L93")).unwrap();
    decoders.video.fault_next.store(true, Ordering::SeqCst);
    rx.handle_packet(key(0)).unwrap();

    assert_eq!(decoders.video.created.load(Ordering::SeqCst), 2);
    assert_eq!(decoders.video.closed.load(Ordering::SeqCst), 1);
    assert_eq!(decoders.video.configure_count(), 2);
    let configures = decoders.video.configures.lock().clone();
    assert_eq!(configures[0], configures[1]);
    assert!(rx.is_waiting_for_keyframe());
    assert_eq!(rx.stats().snapshot().decoder_respawns, 1);

    let mut saw_respawn = false;
    while let Ok(event) = events.try_recv() {
        if event
            == (ReceiverEvent::DecoderRespawned {
                kind: MediaKind::Video,
                success: true,
            })
        {
            saw_respawn = true;
        }
    }
    assert!(saw_respawn);

    rx.handle_packet(key(1)).unwrap();
    assert_eq!(rx.video_state(), VideoDecodeState::Decoding);
    println!("✅ Faulted decoder replaced");
}

#[tokio::test]
async fn test_failed_respawn_leaves_video_uninitialized() {
    let (mut rx, decoders) = receiver(CallType::Video);
    rx.handle_packet(video_config("hev1.1.6.L93")).unwrap();

    decoders.video.fault_next.store(true, Ordering::SeqCst);
    decoders.video.fail_create.store(true, Ordering::SeqCst);
    rx.handle_packet(key(0)).unwrap();

    assert_eq!(rx.video_state(), VideoDecodeState::Uninitialized);
    rx.handle_packet(key(1)).unwrap();
    assert_eq!(decoders.video.decoded_count(), 1);

    // a new config recovers
    decoders.video.fail_create.store(false, Ordering::SeqCst);
    rx.handle_packet(video_config("hev1.1.6.L93")).unwrap();
    rx.handle_packet(key(2)).unwrap();
    assert_eq!(decoders.video.decoded_count(), 2);
}

#[tokio::test]
async fn test_orientation_reconfigures_only_on_change() {
    let (mut rx, decoders) = receiver(CallType::Video);
    let mut events = rx.take_event_receiver().unwrap();
    rx.handle_packet(video_config("hev1.1.6.L93")).unwrap();
    assert_eq!(decoders.video.configure_count(), 1);

    rx.handle_packet(wire(Packet::orientation(10, 90))).unwrap();
    assert_eq!(decoders.video.configure_count(), 2);
    assert!(matches!(
        decoders.video.last_config(),
        Some(DecoderConfig::Video { rotation: 90, .. })
    ));

    rx.handle_packet(wire(Packet::orientation(20, 90))).unwrap();
    assert_eq!(decoders.video.configure_count(), 2);

    let orientations: Vec<ReceiverEvent> = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|event| matches!(event, ReceiverEvent::Orientation { .. }))
        .collect();
    assert_eq!(orientations.len(), 2);
}

#[tokio::test]
async fn test_hevc_codec_string_from_description() {
    let (mut rx, decoders) = receiver(CallType::Video);

    let config = VideoConfig::new("hev1", 1280, 720).with_description(hvcc_main_profile());
    rx.handle_packet(wire(Packet::video_config(&config).unwrap())).unwrap();

    match decoders.video.last_config() {
        Some(DecoderConfig::Video {
            codec, description, ..
        }) => {
            assert_eq!(codec, "hev1.1.6.L93");
            assert_eq!(description, Some(hvcc_main_profile()));
        }
        other => panic!("unexpected decoder config {:?}", other),
    }
}

#[tokio::test]
async fn test_bad_description_falls_back_to_mapping() {
    let (mut rx, decoders) = receiver(CallType::Video);

    let config = VideoConfig::new("hevc", 1280, 720).with_description(vec![0x02, 0x00]);
    rx.handle_packet(wire(Packet::video_config(&config).unwrap())).unwrap();
    assert!(matches!(
        decoders.video.last_config(),
        Some(DecoderConfig::Video { ref codec, .. }) if codec == "hev1.1.6.L93.B0"
    ));

    // codecs that are not byte-configured go straight to the mapper
    rx.handle_packet(video_config("h264")).unwrap();
    assert!(matches!(
        decoders.video.last_config(),
        Some(DecoderConfig::Video { ref codec, .. }) if codec == "avc1.42E01F"
    ));
}

#[tokio::test]
async fn test_audio_scheduling_resyncs_after_drift() {
    println!("🧪 Testing audio playout scheduling");
    let (local, _peer) = LoopbackTransport::pair();
    let decoders = FakeDecoderFactory::new();
    let clock = Arc::new(ManualAudioClock::new());
    let mut rx = MediaReceiver::new(Arc::new(local), decoders.clone(), MediaConfig::default())
        .unwrap()
        .with_clock(clock.clone());
    rx.init(CallType::Audio).unwrap();
    let mut remote = rx.get_remote_media().unwrap();
    assert!(remote.video.is_none());

    rx.handle_packet(audio_config()).unwrap();

    // a burst of 20 ms buffers with the clock standing still
    for ts in 0..7 {
        rx.handle_packet(wire(Packet::audio(ts * 20_000, vec![0xAB; 40]))).unwrap();
    }

    let starts: Vec<Duration> = std::iter::from_fn(|| remote.audio.try_recv().ok())
        .map(|scheduled| scheduled.start_at)
        .collect();
    let ms = Duration::from_millis;
    assert_eq!(
        starts,
        vec![ms(0), ms(20), ms(40), ms(60), ms(80), ms(100), ms(20)]
    );

    // once the clock catches up, buffers go back to back again
    clock.set(ms(40));
    rx.handle_packet(wire(Packet::audio(140_000, vec![0xAB; 40]))).unwrap();
    assert_eq!(remote.audio.try_recv().unwrap().start_at, ms(40));
    println!("✅ Audio schedule pulled back after exceeding drift");
}

#[tokio::test]
async fn test_control_events() {
    let (mut rx, _decoders) = receiver(CallType::Audio);
    let mut events = rx.take_event_receiver().unwrap();
    assert!(rx.take_event_receiver().is_none());

    rx.handle_packet(wire(Packet::connected())).unwrap();
    let state = TransceiverState {
        audio_enable: false,
        video_enable: true,
    };
    rx.handle_packet(wire(Packet::transceiver_state(&state).unwrap())).unwrap();

    assert_eq!(events.try_recv().unwrap(), ReceiverEvent::Connected);
    assert_eq!(events.try_recv().unwrap(), ReceiverEvent::TransceiverState(state));
}

#[tokio::test]
async fn test_unknown_and_ignored_frames() {
    let (mut rx, decoders) = receiver(CallType::Audio);

    rx.handle_packet(Bytes::from_static(&[42, 1, 2, 3])).unwrap();
    assert_eq!(rx.stats().snapshot().unknown_frames, 1);

    // video is ignored in an audio-only call
    rx.handle_packet(video_config("hev1.1.6.L93")).unwrap();
    rx.handle_packet(key(0)).unwrap();
    assert_eq!(decoders.video.created.load(Ordering::SeqCst), 0);

    // malformed frames are reported to the caller of handle_packet
    assert!(matches!(rx.handle_packet(Bytes::new()), Err(Error::Codec(_))));
}

#[tokio::test]
async fn test_media_before_init_is_rejected() {
    let (local, _peer) = LoopbackTransport::pair();
    let decoders = FakeDecoderFactory::new();
    let mut rx = MediaReceiver::new(Arc::new(local), decoders, MediaConfig::default()).unwrap();

    assert!(matches!(
        rx.handle_packet(audio_config()),
        Err(Error::NotInitialized { .. })
    ));
    assert!(matches!(rx.receive_loop().await, Err(Error::NotInitialized { .. })));
}

#[tokio::test]
async fn test_receive_loop_survives_errors_and_ends_on_close() {
    let (script, transport) = ScriptedTransport::new();
    let decoders = FakeDecoderFactory::new();
    let mut rx = MediaReceiver::new(transport.clone(), decoders.clone(), MediaConfig::default()).unwrap();
    rx.init(CallType::Video).unwrap();

    script.send(Ok(video_config("hev1.1.6.L93"))).unwrap();
    script.send(Err(Error::receive_failure("connection reset"))).unwrap();
    script.send(Ok(Bytes::new())).unwrap();
    script.send(Ok(key(0))).unwrap();
    drop(script);

    tokio::time::timeout(Duration::from_secs(2), rx.receive_loop())
        .await
        .expect("loop ends when the transport closes")
        .unwrap();

    assert_eq!(transport.recv_calls.load(Ordering::SeqCst), 5);
    assert_eq!(decoders.video.decoded_count(), 1);
    assert_eq!(rx.stats().snapshot().packets_rejected, 1);
}

#[tokio::test]
async fn test_receive_loop_cancellation_and_idempotent_stop() {
    let (script, transport) = ScriptedTransport::new();
    let decoders = FakeDecoderFactory::new();
    let mut rx = MediaReceiver::new(transport, decoders.clone(), MediaConfig::default()).unwrap();
    rx.init(CallType::Video).unwrap();
    rx.handle_packet(video_config("hev1.1.6.L93")).unwrap();
    rx.handle_packet(audio_config()).unwrap();

    let cancel = rx.cancellation_token();
    let task = tokio::spawn(async move {
        rx.receive_loop().await.unwrap();
        rx
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let mut rx = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("loop ends on cancel")
        .unwrap();
    drop(script);

    rx.stop();
    rx.stop();
    assert_eq!(decoders.video.closed.load(Ordering::SeqCst), 1);
    assert_eq!(decoders.audio.closed.load(Ordering::SeqCst), 1);
    assert_eq!(rx.video_state(), VideoDecodeState::Uninitialized);
    assert!(rx.get_remote_media().is_none());

    // the receiver can be reused for another call
    rx.init(CallType::Audio).unwrap();
    assert!(!rx.cancellation_token().is_cancelled());
}
