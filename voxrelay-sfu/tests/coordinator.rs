//! Integration tests for the channel coordinator
//!
//! Drives the registry end to end against the bookkeeping engine.
//!
//! Run with: cargo test --test coordinator

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use voxrelay_sfu::{
    BookkeepingEngine, ChannelId, ChannelRegistry, CodecCapability, ConsumeRequest,
    ConsumerHandle, EngineResult, MediaEngine, MediaHandle, MediaKind, PeerEvent, PeerId,
    ProduceRequest, ProducerHandle, Renegotiation, SfuConfig, SpeakingEvent, StreamDescriptor,
    Transition, TransportHandle, TransportSetup,
};

const OFFER: &str = "v=0\n\
    o=- 1 2 IN IP4 127.0.0.1\n\
    s=-\n\
    t=0 0\n\
    m=audio 9 UDP/TLS/RTP/SAVPF 111\n\
    a=extmap:1 urn:ietf:params:rtp-hdrext:ssrc-audio-level\n\
    m=video 9 UDP/TLS/RTP/SAVPF 102\n\
    a=extmap:2 http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time\n\
    a=extmap:3 urn:3gpp:video-orientation\n";

fn client_codecs() -> Vec<CodecCapability> {
    vec![
        CodecCapability {
            name: "opus".to_string(),
            kind: MediaKind::Audio,
            priority: 1000,
            payload_type: Some(120),
            rtx_payload_type: None,
        },
        CodecCapability {
            name: "H264".to_string(),
            kind: MediaKind::Video,
            priority: 1000,
            payload_type: Some(101),
            rtx_payload_type: Some(102),
        },
    ]
}

fn audio(ssrc: u32) -> Renegotiation {
    Renegotiation {
        audio_ssrc: ssrc,
        ..Default::default()
    }
}

fn audio_video(audio_ssrc: u32, video_ssrc: u32) -> Renegotiation {
    Renegotiation {
        audio_ssrc,
        video_ssrc,
        rtx_ssrc: video_ssrc + 1,
        streams: vec![StreamDescriptor {
            kind: "video".to_string(),
            rid: "100".to_string(),
            ssrc: video_ssrc,
            rtx_ssrc: video_ssrc + 1,
            active: true,
            max_bitrate: Some(2_500_000),
            quality: Some(100),
            ..Default::default()
        }],
    }
}

struct Harness {
    registry: Arc<ChannelRegistry>,
    engine: Arc<BookkeepingEngine>,
    channel: ChannelId,
}

impl Harness {
    fn new() -> Self {
        let engine = Arc::new(BookkeepingEngine::default());
        Self {
            registry: ChannelRegistry::new(SfuConfig::default(), engine.clone()),
            engine,
            channel: ChannelId::from("channel-1"),
        }
    }

    /// Join and bring the media layer up
    async fn connect(&self, peer: &str) -> mpsc::Receiver<PeerEvent> {
        let peer = PeerId::from(peer);
        let events = self
            .registry
            .join(self.channel.clone(), peer.clone())
            .await
            .unwrap();
        let answer = self
            .registry
            .connect_transport(&self.channel, &peer, OFFER, client_codecs())
            .await
            .unwrap();
        assert!(answer.contains("a=candidate:"));
        self.registry
            .protocol_negotiated(&self.channel, &peer)
            .await
            .unwrap();
        events
    }

    async fn renegotiate(&self, peer: &str, request: Renegotiation) -> Vec<Transition> {
        self.registry
            .renegotiate(&self.channel, &PeerId::from(peer), request)
            .await
            .unwrap()
    }

    async fn snapshot(&self, peer: &str) -> voxrelay_sfu::PeerSnapshot {
        self.registry
            .peer_snapshot(&self.channel, &PeerId::from(peer))
            .await
            .unwrap()
    }
}

fn drain(events: &mut mpsc::Receiver<PeerEvent>) -> Vec<PeerEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test]
async fn test_scenario_joins_without_producers() {
    let h = Harness::new();

    let _a = h.connect("a").await;
    assert_eq!(h.engine.routing_context_count(), 1);

    let _b = h.connect("b").await;
    let stats = h.registry.stats().await;
    assert_eq!(stats.channels, 1);
    assert_eq!(stats.peers, 2);
    assert_eq!(stats.connected_peers, 2);
    assert_eq!(stats.producers, 0);
    assert_eq!(stats.consumers, 0);
    assert_eq!(h.engine.routing_context_count(), 1);
}

#[tokio::test]
async fn test_scenario_audio_producer_fans_out() {
    let h = Harness::new();
    let mut a_events = h.connect("a").await;
    let mut b_events = h.connect("b").await;

    let transitions = h.renegotiate("a", audio(5)).await;
    assert_eq!(transitions, vec![Transition::Created(MediaKind::Audio)]);

    let a = h.snapshot("a").await;
    let producer = a.producer(MediaKind::Audio).unwrap();
    assert_eq!(producer.ssrc, 5);
    assert!(a.consumers.is_empty());

    let b = h.snapshot("b").await;
    assert_eq!(b.consumers.len(), 1);
    assert_eq!(b.consumers[0].producer_id, producer.id);
    assert_eq!(b.consumers[0].source, PeerId::from("a"));

    let notices = drain(&mut b_events);
    assert_eq!(notices.len(), 1);
    match &notices[0] {
        PeerEvent::Video(notice) => {
            assert_eq!(notice.user_id, PeerId::from("a"));
            assert_eq!(notice.audio_ssrc, b.consumers[0].ssrc);
            assert_eq!(notice.video_ssrc, 0);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(drain(&mut a_events).is_empty());
}

#[tokio::test]
async fn test_scenario_audio_teardown() {
    let h = Harness::new();
    let _a = h.connect("a").await;
    let _b = h.connect("b").await;
    h.renegotiate("a", audio(5)).await;

    let transitions = h.renegotiate("a", audio(0)).await;
    assert_eq!(transitions, vec![Transition::Destroyed(MediaKind::Audio)]);
    assert!(h.snapshot("a").await.producers.is_empty());
    assert!(h.snapshot("b").await.consumers.is_empty());
    assert_eq!(h.engine.producer_count(), 0);
    assert_eq!(h.engine.consumer_count(), 0);

    // already absent
    assert!(h.renegotiate("a", audio(0)).await.is_empty());
}

#[tokio::test]
async fn test_scenario_speaking_excludes_origin() {
    let h = Harness::new();
    let mut a = h.connect("a").await;
    let mut b = h.connect("b").await;
    let mut c = h.connect("c").await;

    let report = h
        .registry
        .broadcast_speaking(&h.channel, &PeerId::from("a"), 1, 123)
        .await
        .unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.dropped, 0);

    let expected = PeerEvent::Speaking(SpeakingEvent {
        user_id: PeerId::from("a"),
        speaking: 1,
        ssrc: 123,
    });
    assert_eq!(drain(&mut b), vec![expected.clone()]);
    assert_eq!(drain(&mut c), vec![expected]);
    assert!(drain(&mut a).is_empty());
}

#[tokio::test]
async fn test_scenario_leave_with_video_producer() {
    let h = Harness::new();
    let a = h.connect("a").await;
    let mut b = h.connect("b").await;
    let _c = h.connect("c").await;
    h.renegotiate("a", audio_video(5, 10)).await;
    h.renegotiate("b", audio(20)).await;
    drain(&mut b);

    assert_eq!(h.snapshot("b").await.consumers.len(), 2);
    assert_eq!(h.snapshot("c").await.consumers.len(), 3);

    drop(a);
    assert!(h.registry.leave(&h.channel, &PeerId::from("a")).await);

    let b_view = h.snapshot("b").await;
    let c_view = h.snapshot("c").await;
    assert!(b_view.consumers.is_empty());
    assert_eq!(c_view.consumers.len(), 1);
    assert_eq!(c_view.consumers[0].source, PeerId::from("b"));
    assert_eq!(h.engine.producer_count(), 1);
    assert!(h.engine.has_routing_context(&h.channel));
    assert_eq!(
        drain(&mut b),
        vec![PeerEvent::ClientDisconnect {
            user_id: PeerId::from("a")
        }]
    );

    assert!(h.registry.leave(&h.channel, &PeerId::from("b")).await);
    assert!(h.engine.has_routing_context(&h.channel));
    assert!(h.registry.leave(&h.channel, &PeerId::from("c")).await);
    assert!(!h.engine.has_routing_context(&h.channel));
    assert_eq!(h.registry.channel_count(), 0);
    assert_eq!(h.engine.transport_count(), 0);
}

#[tokio::test]
async fn test_fan_out_completeness() {
    let h = Harness::new();
    let mut receivers = Vec::new();
    for i in 0..5 {
        receivers.push(h.connect(&format!("peer{i}")).await);
    }

    h.renegotiate("peer0", audio_video(0, 10)).await;
    let producer = h.snapshot("peer0").await.producer(MediaKind::Video).cloned().unwrap();
    assert_eq!(producer.rtx_ssrc, Some(11));

    for i in 1..5 {
        let view = h.snapshot(&format!("peer{i}")).await;
        assert_eq!(view.consumers_of(&producer.id).count(), 1);
    }
}

#[tokio::test]
async fn test_no_self_consumption() {
    let h = Harness::new();
    let mut receivers = Vec::new();
    for i in 0..4 {
        receivers.push(h.connect(&format!("peer{i}")).await);
    }
    for i in 0..4 {
        h.renegotiate(&format!("peer{i}"), audio_video(100 + i, 200 + 10 * i))
            .await;
    }

    for i in 0..4 {
        let id = format!("peer{i}");
        let view = h.snapshot(&id).await;
        assert_eq!(view.producers.len(), 2);
        assert_eq!(view.consumers.len(), 6);
        assert!(view.consumers.iter().all(|c| c.source.as_str() != id));
        for own in &view.producers {
            assert_eq!(view.consumers_of(&own.id).count(), 0);
        }
    }
}

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let h = Harness::new();
    let _a = h.connect("a").await;
    let _b = h.connect("b").await;
    let _c = h.connect("c").await;
    h.renegotiate("a", audio_video(5, 10)).await;
    h.renegotiate("b", audio(20)).await;
    let before = h.registry.stats().await;

    let first = h.registry.reconcile(&h.channel).await.unwrap();
    let second = h.registry.reconcile(&h.channel).await.unwrap();
    assert!(first.created.is_empty());
    assert!(second.created.is_empty());
    assert_eq!(second.failed, 0);
    assert_eq!(second.existing, before.consumers);
    assert_eq!(h.registry.stats().await, before);
}

#[tokio::test]
async fn test_one_producer_per_kind() {
    let h = Harness::new();
    let _a = h.connect("a").await;
    let _b = h.connect("b").await;

    assert_eq!(
        h.renegotiate("a", audio(5)).await,
        vec![Transition::Created(MediaKind::Audio)]
    );
    let first = h.snapshot("a").await.producer(MediaKind::Audio).cloned().unwrap();

    assert!(h.renegotiate("a", audio(6)).await.is_empty());
    let second = h.snapshot("a").await.producer(MediaKind::Audio).cloned().unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(h.snapshot("b").await.consumers.len(), 1);
    assert_eq!(h.engine.producer_count(), 1);
}

#[tokio::test]
async fn test_inactive_stream_suppresses_video() {
    let h = Harness::new();
    let _a = h.connect("a").await;

    let mut request = audio_video(5, 10);
    request.streams[0].active = false;
    assert_eq!(
        h.renegotiate("a", request).await,
        vec![Transition::Created(MediaKind::Audio)]
    );
    assert!(h.snapshot("a").await.producer(MediaKind::Video).is_none());
}

#[tokio::test]
async fn test_producer_waits_for_transport() {
    let h = Harness::new();
    let _a = h
        .registry
        .join(h.channel.clone(), PeerId::from("a"))
        .await
        .unwrap();

    assert!(h.renegotiate("a", audio(5)).await.is_empty());
    assert!(h.snapshot("a").await.producers.is_empty());
}

#[tokio::test]
async fn test_late_joiner_receives_existing_producers() {
    let h = Harness::new();
    let _a = h.connect("a").await;
    h.renegotiate("a", audio_video(5, 10)).await;

    let mut d = h.connect("d").await;
    let view = h.snapshot("d").await;
    assert_eq!(view.consumers.len(), 2);

    let video = view
        .consumers
        .iter()
        .find(|c| c.kind == MediaKind::Video)
        .unwrap();
    match drain(&mut d).as_slice() {
        [PeerEvent::Video(notice)] => {
            assert_eq!(notice.user_id, PeerId::from("a"));
            assert_eq!(notice.video_ssrc, video.ssrc);
            assert_eq!(notice.rtx_ssrc, video.rtx_ssrc.unwrap());
            assert_eq!(notice.streams.len(), 1);
            assert_eq!(notice.streams[0].ssrc, video.ssrc);
            assert_eq!(notice.streams[0].rid, "100");
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_joins_share_one_routing_context() {
    let h = Harness::new();
    let mut tasks = Vec::new();
    for i in 0..16 {
        let registry = Arc::clone(&h.registry);
        let channel = h.channel.clone();
        tasks.push(tokio::spawn(async move {
            registry.join(channel, PeerId::new(format!("peer{i}"))).await
        }));
    }
    let mut receivers = Vec::new();
    for task in tasks {
        receivers.push(task.await.unwrap().unwrap());
    }

    assert_eq!(h.registry.members(&h.channel).await.len(), 16);
    assert_eq!(h.engine.routing_context_count(), 1);
}

#[tokio::test]
async fn test_join_racing_last_leave() {
    let h = Harness::new();
    for round in 0..20 {
        let leaver = PeerId::new(format!("leaver{round}"));
        let joiner = PeerId::new(format!("joiner{round}"));
        let _rx = h.registry.join(h.channel.clone(), leaver.clone()).await.unwrap();

        let leave = {
            let registry = Arc::clone(&h.registry);
            let channel = h.channel.clone();
            tokio::spawn(async move { registry.leave(&channel, &leaver).await })
        };
        let join = {
            let registry = Arc::clone(&h.registry);
            let channel = h.channel.clone();
            let joiner = joiner.clone();
            tokio::spawn(async move { registry.join(channel, joiner).await })
        };
        assert!(leave.await.unwrap());
        let _joined = join.await.unwrap().unwrap();

        assert_eq!(h.registry.members(&h.channel).await, vec![joiner.clone()]);
        assert!(h.engine.has_routing_context(&h.channel));
        assert_eq!(h.registry.channel_count(), 1);

        assert!(h.registry.leave(&h.channel, &joiner).await);
        assert_eq!(h.registry.channel_count(), 0);
        assert!(!h.engine.has_routing_context(&h.channel));
    }
}

/// Records close calls in order while delegating to the bookkeeping engine
struct RecordingEngine {
    inner: BookkeepingEngine,
    closed: Mutex<Vec<MediaHandle>>,
}

#[async_trait]
impl MediaEngine for RecordingEngine {
    async fn create_routing_context(&self, channel_id: &ChannelId) -> EngineResult<()> {
        self.inner.create_routing_context(channel_id).await
    }

    async fn dispose_routing_context(&self, channel_id: &ChannelId) -> EngineResult<()> {
        self.inner.dispose_routing_context(channel_id).await
    }

    async fn connect_transport(
        &self,
        channel_id: &ChannelId,
        peer_id: &PeerId,
        offer: &str,
    ) -> EngineResult<TransportSetup> {
        self.inner.connect_transport(channel_id, peer_id, offer).await
    }

    async fn produce(
        &self,
        transport: &TransportHandle,
        request: ProduceRequest,
    ) -> EngineResult<ProducerHandle> {
        self.inner.produce(transport, request).await
    }

    async fn consume(
        &self,
        transport: &TransportHandle,
        request: ConsumeRequest,
    ) -> EngineResult<ConsumerHandle> {
        self.inner.consume(transport, request).await
    }

    async fn close(&self, handle: &MediaHandle) -> EngineResult<()> {
        self.closed.lock().push(handle.clone());
        self.inner.close(handle).await
    }
}

#[tokio::test]
async fn test_cascade_closes_consumers_before_producer() {
    let engine = Arc::new(RecordingEngine {
        inner: BookkeepingEngine::default(),
        closed: Mutex::new(Vec::new()),
    });
    let registry = ChannelRegistry::new(SfuConfig::default(), engine.clone());
    let channel = ChannelId::from("c");

    let mut receivers = Vec::new();
    for peer in ["a", "b", "c"] {
        let peer = PeerId::from(peer);
        receivers.push(registry.join(channel.clone(), peer.clone()).await.unwrap());
        registry
            .connect_transport(&channel, &peer, OFFER, client_codecs())
            .await
            .unwrap();
    }
    let a = PeerId::from("a");
    registry
        .renegotiate(&channel, &a, audio_video(0, 10))
        .await
        .unwrap();
    let producer = registry
        .peer_snapshot(&channel, &a)
        .await
        .unwrap()
        .producer(MediaKind::Video)
        .cloned()
        .unwrap();

    registry
        .renegotiate(&channel, &a, audio_video(0, 0))
        .await
        .unwrap();

    let closed = engine.closed.lock().clone();
    let producer_at = closed
        .iter()
        .position(|h| h == &MediaHandle::Producer(producer.id.clone()))
        .unwrap();
    let consumers: Vec<usize> = closed
        .iter()
        .enumerate()
        .filter(|(_, h)| matches!(h, MediaHandle::Consumer(_)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(consumers.len(), 2);
    assert!(consumers.iter().all(|i| *i < producer_at));
    assert_eq!(engine.inner.consumer_count(), 0);
}
