//! Channel registry
//!
//! Top-level entry point of the coordinator. Owns every channel, creates a
//! channel's routing context on first join and disposes it on last leave,
//! and runs producer transitions, reconciliation and broadcasts under the
//! channel's lock.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::broadcaster::{self, BroadcastReport};
use crate::capability::LocalCapabilities;
use crate::channel::{Channel, ChannelState, ChannelStats};
use crate::config::SfuConfig;
use crate::context::MediaContext;
use crate::engine::{MediaEngine, TransportSetup};
use crate::error::{Result, SfuError};
use crate::event::{PeerEvent, SpeakingEvent};
use crate::lifecycle::{self, Renegotiation, Transition};
use crate::media::{CodecCapability, MediaKind, RtpCapabilities};
use crate::peer::Peer;
use crate::reconciler::{self, ReconcileReport, Scope};
use crate::types::{ChannelId, ConsumerId, PeerId, ProducerId};

/// Aggregated statistics over all channels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub channels: usize,
    pub peers: usize,
    pub connected_peers: usize,
    pub producers: usize,
    pub consumers: usize,
}

impl RegistryStats {
    fn add(&mut self, channel: ChannelStats) {
        self.channels += 1;
        self.peers += channel.peer_count;
        self.connected_peers += channel.connected_peers;
        self.producers += channel.producer_count;
        self.consumers += channel.consumer_count;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProducerSnapshot {
    pub id: ProducerId,
    pub kind: MediaKind,
    pub ssrc: u32,
    pub rtx_ssrc: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerSnapshot {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub source: PeerId,
    pub kind: MediaKind,
    pub ssrc: u32,
    pub rtx_ssrc: Option<u32>,
}

/// Point-in-time view of one peer's media state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSnapshot {
    pub peer_id: PeerId,
    pub connected: bool,
    pub producers: Vec<ProducerSnapshot>,
    pub consumers: Vec<ConsumerSnapshot>,
}

impl PeerSnapshot {
    #[must_use]
    pub fn producer(&self, kind: MediaKind) -> Option<&ProducerSnapshot> {
        self.producers.iter().find(|p| p.kind == kind)
    }

    /// Consumers referencing `producer_id`
    pub fn consumers_of<'a>(
        &'a self,
        producer_id: &'a ProducerId,
    ) -> impl Iterator<Item = &'a ConsumerSnapshot> + 'a {
        self.consumers.iter().filter(move |c| &c.producer_id == producer_id)
    }
}

pub struct ChannelRegistry {
    ctx: MediaContext,
    /// Shared with detached leave tasks
    channels: Arc<DashMap<ChannelId, Arc<Channel>>>,
}

impl ChannelRegistry {
    pub fn new(config: SfuConfig, engine: Arc<dyn MediaEngine>) -> Arc<Self> {
        Self::with_capabilities(config, engine, LocalCapabilities::default())
    }

    pub fn with_capabilities(
        config: SfuConfig,
        engine: Arc<dyn MediaEngine>,
        local: LocalCapabilities,
    ) -> Arc<Self> {
        info!(
            max_channels = config.max_channels,
            max_peers_per_channel = config.max_peers_per_channel,
            peer_event_buffer = config.peer_event_buffer,
            "Channel registry initialized"
        );
        Arc::new(Self {
            ctx: MediaContext {
                engine,
                config: Arc::new(config),
                local: Arc::new(local),
            },
            channels: Arc::new(DashMap::new()),
        })
    }

    pub fn config(&self) -> &SfuConfig {
        &self.ctx.config
    }

    pub fn local_capabilities(&self) -> &LocalCapabilities {
        &self.ctx.local
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    fn channel(&self, channel_id: &ChannelId) -> Option<Arc<Channel>> {
        self.channels.get(channel_id).map(|entry| Arc::clone(entry.value()))
    }

    fn get_or_insert_channel(&self, channel_id: &ChannelId) -> Result<Arc<Channel>> {
        if let Some(channel) = self.channel(channel_id) {
            return Ok(channel);
        }

        let max = self.ctx.config.max_channels;
        if max > 0 && self.channels.len() >= max {
            warn!(
                current_channels = self.channels.len(),
                max_channels = max,
                "Channel limit reached"
            );
            return Err(SfuError::ChannelLimitReached);
        }

        let entry = self
            .channels
            .entry(channel_id.clone())
            .or_insert_with(|| Arc::new(Channel::new(channel_id.clone())));
        Ok(Arc::clone(entry.value()))
    }

    /// Register `peer_id` in `channel_id`. Returns the receiving half of the
    /// peer's control-event queue.
    pub async fn join(
        &self,
        channel_id: ChannelId,
        peer_id: PeerId,
    ) -> Result<mpsc::Receiver<PeerEvent>> {
        loop {
            let channel = self.get_or_insert_channel(&channel_id)?;
            let mut state = channel.lock().await;

            // Lost the race against the last leave; look the channel up again
            if state.closed {
                continue;
            }

            if state.peers.contains_key(&peer_id) {
                return Err(SfuError::AlreadyJoined { channel_id, peer_id });
            }

            let max = self.ctx.config.max_peers_per_channel;
            if max > 0 && state.peers.len() >= max {
                warn!(
                    channel_id = %channel_id,
                    current_peers = state.peers.len(),
                    max_peers = max,
                    "Peer limit reached for channel"
                );
                return Err(SfuError::ChannelFull(channel_id));
            }

            if !state.routed {
                if let Err(e) = self.ctx.engine.create_routing_context(&channel_id).await {
                    error!(channel_id = %channel_id, error = %e, "Failed to create routing context");
                    if state.peers.is_empty() {
                        state.closed = true;
                        self.channels
                            .remove_if(&channel_id, |_, c| Arc::ptr_eq(c, &channel));
                    }
                    return Err(SfuError::RoutingUnavailable {
                        channel_id,
                        reason: e.to_string(),
                    });
                }
                state.routed = true;
                info!(channel_id = %channel_id, "Created channel");
            }

            let (peer, events) = Peer::new(
                peer_id.clone(),
                channel_id.clone(),
                self.ctx.config.peer_event_buffer,
            );
            state.peers.insert(peer_id.clone(), peer);

            info!(
                channel_id = %channel_id,
                peer_id = %peer_id,
                peer_count = state.peers.len(),
                "Peer joined channel"
            );
            return Ok(events);
        }
    }

    /// Remove `peer_id` and release everything it holds. Remaining members
    /// get a `ClientDisconnect`; the last leave disposes the channel.
    ///
    /// Runs to completion even if the calling future is dropped. Repeating a
    /// leave is a no-op that returns false.
    pub async fn leave(&self, channel_id: &ChannelId, peer_id: &PeerId) -> bool {
        let Some(channel) = self.channel(channel_id) else {
            debug!(channel_id = %channel_id, "Channel not found when removing peer");
            return false;
        };

        let ctx = self.ctx.clone();
        let channels = Arc::clone(&self.channels);
        let peer_id = peer_id.clone();
        let cleanup =
            tokio::spawn(async move { remove_member(&ctx, &channels, &channel, &peer_id).await });

        match cleanup.await {
            Ok(removed) => removed,
            Err(e) => {
                error!(channel_id = %channel_id, error = %e, "Leave cleanup task failed");
                false
            }
        }
    }

    /// Current members, sorted. Empty if the channel does not exist.
    pub async fn members(&self, channel_id: &ChannelId) -> Vec<PeerId> {
        match self.channel(channel_id) {
            Some(channel) => channel.members().await,
            None => Vec::new(),
        }
    }

    /// Establish the peer's transport from its offer and attach it.
    /// Returns the answer for the peer.
    pub async fn connect_transport(
        &self,
        channel_id: &ChannelId,
        peer_id: &PeerId,
        offer: &str,
        codecs: Vec<CodecCapability>,
    ) -> Result<String> {
        let channel = self.member_channel(channel_id, peer_id)?;
        let mut state = channel.lock().await;
        ensure_member(&state, channel_id, peer_id)?;

        let setup = self.ctx.engine.connect_transport(channel_id, peer_id, offer).await?;
        let answer = setup.answer.clone();
        self.attach_locked(&mut state, peer_id, setup, codecs).await;
        Ok(answer)
    }

    /// Attach a transport established outside the registry
    pub async fn attach_transport(
        &self,
        channel_id: &ChannelId,
        peer_id: &PeerId,
        setup: TransportSetup,
        codecs: Vec<CodecCapability>,
    ) -> Result<()> {
        let channel = self.member_channel(channel_id, peer_id)?;
        let mut state = channel.lock().await;
        ensure_member(&state, channel_id, peer_id)?;
        self.attach_locked(&mut state, peer_id, setup, codecs).await;
        Ok(())
    }

    async fn attach_locked(
        &self,
        state: &mut ChannelState,
        peer_id: &PeerId,
        setup: TransportSetup,
        codecs: Vec<CodecCapability>,
    ) {
        let replacing = state.peers.get(peer_id).is_some_and(|p| p.has_transport());
        if replacing {
            info!(peer_id = %peer_id, "Replacing peer transport");
            let transitions = lifecycle::release_media(&self.ctx, state, peer_id).await;
            if !transitions.is_empty() {
                notify_others_about(state, peer_id);
            }
        }

        if let Some(peer) = state.peers.get_mut(peer_id) {
            peer.capabilities = RtpCapabilities {
                codecs,
                header_extensions: setup.header_extensions,
            };
            debug!(peer_id = %peer_id, transport_id = %setup.handle.id, "Transport attached");
            peer.transport = Some(setup.handle);
        }
    }

    /// The peer's transport is usable: subscribe it to existing producers
    /// and notify every receiver that gained consumers.
    pub async fn protocol_negotiated(
        &self,
        channel_id: &ChannelId,
        peer_id: &PeerId,
    ) -> Result<ReconcileReport> {
        let channel = self.member_channel(channel_id, peer_id)?;
        let mut state = channel.lock().await;
        ensure_member(&state, channel_id, peer_id)?;

        if !state.peers.get(peer_id).is_some_and(|p| p.has_transport()) {
            debug!(peer_id = %peer_id, "Protocol negotiated without transport, skipping");
            return Ok(ReconcileReport::default());
        }

        // The new transport can receive every existing producer
        let scope = Scope::Receiver(peer_id.clone());
        let report = reconciler::reconcile(&self.ctx, &mut state, &scope).await;
        let pairs = report.touched_pairs();
        reconciler::notify_pairs(&state, pairs.iter().map(|(r, s)| (r, s)));
        Ok(report)
    }

    /// Apply a renegotiation from `peer_id`, reconcile the channel and tell
    /// every other connected member what it now receives from `peer_id`.
    pub async fn renegotiate(
        &self,
        channel_id: &ChannelId,
        peer_id: &PeerId,
        request: Renegotiation,
    ) -> Result<Vec<Transition>> {
        let channel = self.member_channel(channel_id, peer_id)?;
        let mut state = channel.lock().await;
        ensure_member(&state, channel_id, peer_id)?;

        let transitions = lifecycle::apply(&self.ctx, &mut state, peer_id, &request).await;
        // Only this peer's producers can have changed
        let scope = Scope::Source(peer_id.clone());
        let report = reconciler::reconcile(&self.ctx, &mut state, &scope).await;

        notify_others_about(&state, peer_id);

        debug!(
            channel_id = %channel_id,
            peer_id = %peer_id,
            transitions = ?transitions,
            created = report.created.len(),
            "Renegotiation applied"
        );
        Ok(transitions)
    }

    /// Run a full reconciliation pass on a channel
    pub async fn reconcile(&self, channel_id: &ChannelId) -> Result<ReconcileReport> {
        let Some(channel) = self.channel(channel_id) else {
            return Ok(ReconcileReport::default());
        };
        let mut state = channel.lock().await;
        Ok(reconciler::reconcile(&self.ctx, &mut state, &Scope::All).await)
    }

    /// Relay a speaking indication to every other member
    pub async fn broadcast_speaking(
        &self,
        channel_id: &ChannelId,
        origin: &PeerId,
        speaking: u32,
        ssrc: u32,
    ) -> Result<BroadcastReport> {
        let channel = self.member_channel(channel_id, origin)?;
        let state = channel.lock().await;
        ensure_member(&state, channel_id, origin)?;

        let event = PeerEvent::Speaking(SpeakingEvent {
            user_id: origin.clone(),
            speaking,
            ssrc,
        });
        Ok(broadcaster::broadcast(&state, origin, &event))
    }

    pub async fn peer_snapshot(&self, channel_id: &ChannelId, peer_id: &PeerId) -> Option<PeerSnapshot> {
        let channel = self.channel(channel_id)?;
        let state = channel.lock().await;
        let peer = state.peers.get(peer_id)?;
        Some(PeerSnapshot {
            peer_id: peer.id.clone(),
            connected: peer.has_transport(),
            producers: peer
                .producers()
                .map(|p| ProducerSnapshot {
                    id: p.id().clone(),
                    kind: p.kind(),
                    ssrc: p.ssrc,
                    rtx_ssrc: p.rtx_ssrc,
                })
                .collect(),
            consumers: peer
                .consumers()
                .iter()
                .map(|c| ConsumerSnapshot {
                    id: c.handle.id.clone(),
                    producer_id: c.producer_id().clone(),
                    source: c.source.clone(),
                    kind: c.kind(),
                    ssrc: c.handle.ssrc,
                    rtx_ssrc: c.handle.rtx_ssrc,
                })
                .collect(),
        })
    }

    pub async fn get_channel_stats(&self, channel_id: &ChannelId) -> ChannelStats {
        match self.channel(channel_id) {
            Some(channel) => channel.get_stats().await,
            None => ChannelStats::default(),
        }
    }

    pub async fn stats(&self) -> RegistryStats {
        let channels: Vec<Arc<Channel>> = self
            .channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut stats = RegistryStats::default();
        for channel in channels {
            stats.add(channel.get_stats().await);
        }
        stats
    }

    /// Tear down every channel
    pub async fn shutdown(&self) {
        let channels: Vec<Arc<Channel>> = self
            .channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for channel in channels {
            let mut state = channel.lock().await;
            let peers: Vec<PeerId> = state.peers.keys().cloned().collect();
            for peer_id in &peers {
                lifecycle::teardown_peer(&self.ctx, &mut state, peer_id).await;
            }
            close_channel(&self.ctx, &self.channels, &channel, &mut state).await;
        }
        info!("Channel registry shut down");
    }

    fn member_channel(&self, channel_id: &ChannelId, peer_id: &PeerId) -> Result<Arc<Channel>> {
        self.channel(channel_id)
            .ok_or_else(|| not_joined(channel_id, peer_id))
    }
}

fn not_joined(channel_id: &ChannelId, peer_id: &PeerId) -> SfuError {
    SfuError::PeerNotJoined {
        channel_id: channel_id.clone(),
        peer_id: peer_id.clone(),
    }
}

fn ensure_member(state: &ChannelState, channel_id: &ChannelId, peer_id: &PeerId) -> Result<()> {
    if state.closed || !state.peers.contains_key(peer_id) {
        return Err(not_joined(channel_id, peer_id));
    }
    Ok(())
}

/// Video notice about `source` to every other connected member
fn notify_others_about(state: &ChannelState, source: &PeerId) -> usize {
    let receivers: Vec<&PeerId> = state
        .peers
        .values()
        .filter(|p| &p.id != source && p.has_transport())
        .map(|p| &p.id)
        .collect();
    reconciler::notify_pairs(state, receivers.into_iter().map(|r| (r, source)))
}

async fn remove_member(
    ctx: &MediaContext,
    channels: &DashMap<ChannelId, Arc<Channel>>,
    channel: &Arc<Channel>,
    peer_id: &PeerId,
) -> bool {
    let mut state = channel.lock().await;
    if !lifecycle::teardown_peer(ctx, &mut state, peer_id).await {
        return false;
    }

    info!(
        channel_id = %channel.id,
        peer_id = %peer_id,
        peer_count = state.peers.len(),
        "Peer left channel"
    );

    if state.peers.is_empty() {
        close_channel(ctx, channels, channel, &mut state).await;
        return true;
    }

    broadcaster::broadcast(
        &state,
        peer_id,
        &PeerEvent::ClientDisconnect {
            user_id: peer_id.clone(),
        },
    );
    let report = reconciler::reconcile(ctx, &mut state, &Scope::All).await;
    let pairs = report.touched_pairs();
    reconciler::notify_pairs(&state, pairs.iter().map(|(r, s)| (r, s)));
    true
}

async fn close_channel(
    ctx: &MediaContext,
    channels: &DashMap<ChannelId, Arc<Channel>>,
    channel: &Arc<Channel>,
    state: &mut ChannelState,
) {
    if state.routed {
        if let Err(e) = ctx.engine.dispose_routing_context(&channel.id).await {
            warn!(channel_id = %channel.id, error = %e, "Failed to dispose routing context");
        }
        state.routed = false;
    }
    state.closed = true;
    channels.remove_if(&channel.id, |_, c| Arc::ptr_eq(c, channel));
    info!(channel_id = %channel.id, remaining_channels = channels.len(), "Closed channel");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, MockMediaEngine};
    use crate::media::{ConsumerHandle, HeaderExtension, MediaHandle, ProducerHandle, StreamDescriptor, TransportHandle};
    use crate::types::TransportId;

    fn opus_and_h264() -> Vec<CodecCapability> {
        vec![
            CodecCapability {
                name: "opus".to_string(),
                kind: MediaKind::Audio,
                priority: 1000,
                payload_type: Some(111),
                rtx_payload_type: None,
            },
            CodecCapability {
                name: "H264".to_string(),
                kind: MediaKind::Video,
                priority: 1000,
                payload_type: Some(102),
                rtx_payload_type: Some(103),
            },
        ]
    }

    fn setup_for(peer: &PeerId) -> TransportSetup {
        TransportSetup {
            handle: TransportHandle {
                id: TransportId::new(format!("t-{peer}")),
            },
            answer: "answer".to_string(),
            header_extensions: vec![HeaderExtension {
                kind: MediaKind::Audio,
                uri: crate::capability::AUDIO_LEVEL_URI.to_string(),
                id: 1,
            }],
        }
    }

    fn permissive_engine() -> MockMediaEngine {
        let mut engine = MockMediaEngine::new();
        engine.expect_create_routing_context().returning(|_| Ok(()));
        engine.expect_dispose_routing_context().returning(|_| Ok(()));
        engine
            .expect_connect_transport()
            .returning(|_, peer, _| Ok(setup_for(peer)));
        engine.expect_close().returning(|_| Ok(()));
        engine
    }

    #[tokio::test]
    async fn test_registry_creation() {
        let registry = ChannelRegistry::new(SfuConfig::default(), Arc::new(permissive_engine()));
        assert_eq!(registry.channel_count(), 0);
        assert_eq!(registry.stats().await, RegistryStats::default());
    }

    #[tokio::test]
    async fn test_routing_unavailable_rejects_join() {
        let mut engine = MockMediaEngine::new();
        engine
            .expect_create_routing_context()
            .times(1)
            .returning(|_| Err(EngineError::Internal("no workers".to_string())));
        let registry = ChannelRegistry::new(SfuConfig::default(), Arc::new(engine));

        let result = registry
            .join(ChannelId::from("c"), PeerId::from("a"))
            .await;
        assert!(matches!(result, Err(SfuError::RoutingUnavailable { .. })));
        assert_eq!(registry.channel_count(), 0);
        assert!(registry.members(&ChannelId::from("c")).await.is_empty());
    }

    #[tokio::test]
    async fn test_peer_limit() {
        let config = SfuConfig {
            max_peers_per_channel: 2,
            ..Default::default()
        };
        let registry = ChannelRegistry::new(config, Arc::new(permissive_engine()));
        let channel = ChannelId::from("c");

        let _a = registry.join(channel.clone(), PeerId::from("peer1")).await.unwrap();
        let _b = registry.join(channel.clone(), PeerId::from("peer2")).await.unwrap();

        let result = registry.join(channel.clone(), PeerId::from("peer3")).await;
        assert!(matches!(result, Err(SfuError::ChannelFull(_))));
    }

    #[tokio::test]
    async fn test_channel_limit() {
        let config = SfuConfig {
            max_channels: 1,
            ..Default::default()
        };
        let registry = ChannelRegistry::new(config, Arc::new(permissive_engine()));

        let _a = registry.join(ChannelId::from("c1"), PeerId::from("a")).await.unwrap();
        let result = registry.join(ChannelId::from("c2"), PeerId::from("b")).await;
        assert!(matches!(result, Err(SfuError::ChannelLimitReached)));
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected() {
        let registry = ChannelRegistry::new(SfuConfig::default(), Arc::new(permissive_engine()));
        let channel = ChannelId::from("c");
        let _a = registry.join(channel.clone(), PeerId::from("a")).await.unwrap();
        let again = registry.join(channel, PeerId::from("a")).await;
        assert!(matches!(again, Err(SfuError::AlreadyJoined { .. })));
    }

    #[tokio::test]
    async fn test_operations_require_membership() {
        let registry = ChannelRegistry::new(SfuConfig::default(), Arc::new(permissive_engine()));
        let channel = ChannelId::from("c");
        let result = registry
            .broadcast_speaking(&channel, &PeerId::from("ghost"), 1, 1)
            .await;
        assert!(matches!(result, Err(SfuError::PeerNotJoined { .. })));
        assert!(!registry.leave(&channel, &PeerId::from("ghost")).await);
    }

    #[tokio::test]
    async fn test_consume_failure_is_skipped() {
        let mut engine = permissive_engine();
        engine.expect_produce().returning(|_, request| {
            Ok(ProducerHandle {
                id: ProducerId::new(format!("p-{}", request.kind)),
                kind: request.kind,
            })
        });
        engine.expect_consume().returning(|transport, request| {
            if transport.id.as_str() == "t-b" {
                Err(EngineError::Closed("transport t-b".to_string()))
            } else {
                Ok(ConsumerHandle {
                    id: ConsumerId::new(format!("c-{}", transport.id)),
                    producer_id: request.producer_id,
                    kind: request.rtp_capabilities.kind,
                    ssrc: 9,
                    rtx_ssrc: None,
                })
            }
        });
        let registry = ChannelRegistry::new(SfuConfig::default(), Arc::new(engine));
        let channel = ChannelId::from("c");
        let (a, b, c) = (PeerId::from("a"), PeerId::from("b"), PeerId::from("c"));

        let mut receivers = Vec::new();
        for peer in [&a, &b, &c] {
            receivers.push(registry.join(channel.clone(), peer.clone()).await.unwrap());
            registry
                .connect_transport(&channel, peer, "offer", opus_and_h264())
                .await
                .unwrap();
        }

        registry
            .renegotiate(
                &channel,
                &a,
                Renegotiation {
                    audio_ssrc: 5,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let b_view = registry.peer_snapshot(&channel, &b).await.unwrap();
        let c_view = registry.peer_snapshot(&channel, &c).await.unwrap();
        assert!(b_view.consumers.is_empty());
        assert_eq!(c_view.consumers.len(), 1);
        assert_eq!(c_view.consumers[0].source, a);
    }

    #[tokio::test]
    async fn test_produce_failure_is_abandoned() {
        let mut engine = permissive_engine();
        engine
            .expect_produce()
            .returning(|_, _| Err(EngineError::Rejected("bad parameters".to_string())));
        let registry = ChannelRegistry::new(SfuConfig::default(), Arc::new(engine));
        let channel = ChannelId::from("c");
        let a = PeerId::from("a");

        let _rx = registry.join(channel.clone(), a.clone()).await.unwrap();
        registry
            .connect_transport(&channel, &a, "offer", opus_and_h264())
            .await
            .unwrap();

        let transitions = registry
            .renegotiate(
                &channel,
                &a,
                Renegotiation {
                    audio_ssrc: 5,
                    video_ssrc: 6,
                    rtx_ssrc: 7,
                    streams: vec![StreamDescriptor {
                        kind: "video".to_string(),
                        rid: "100".to_string(),
                        ssrc: 6,
                        rtx_ssrc: 7,
                        active: true,
                        ..Default::default()
                    }],
                },
            )
            .await
            .unwrap();
        assert!(transitions.is_empty());
        let view = registry.peer_snapshot(&channel, &a).await.unwrap();
        assert!(view.producers.is_empty());
    }

    #[tokio::test]
    async fn test_close_errors_do_not_block_teardown() {
        let mut engine = MockMediaEngine::new();
        engine.expect_create_routing_context().returning(|_| Ok(()));
        engine
            .expect_dispose_routing_context()
            .times(1)
            .returning(|_| Ok(()));
        engine
            .expect_connect_transport()
            .returning(|_, peer, _| Ok(setup_for(peer)));
        engine
            .expect_close()
            .withf(|handle| matches!(handle, MediaHandle::Transport(_)))
            .returning(|_| Err(EngineError::Internal("stuck".to_string())));

        let registry = ChannelRegistry::new(SfuConfig::default(), Arc::new(engine));
        let channel = ChannelId::from("c");
        let a = PeerId::from("a");
        let _rx = registry.join(channel.clone(), a.clone()).await.unwrap();
        registry
            .connect_transport(&channel, &a, "offer", opus_and_h264())
            .await
            .unwrap();

        assert!(registry.leave(&channel, &a).await);
        assert_eq!(registry.channel_count(), 0);
        assert!(!registry.leave(&channel, &a).await);
    }

    #[tokio::test]
    async fn test_shutdown_closes_all_channels() {
        let registry = ChannelRegistry::new(SfuConfig::default(), Arc::new(permissive_engine()));
        let _a = registry.join(ChannelId::from("c1"), PeerId::from("a")).await.unwrap();
        let _b = registry.join(ChannelId::from("c2"), PeerId::from("b")).await.unwrap();
        assert_eq!(registry.channel_count(), 2);
        assert_eq!(registry.stats().await.peers, 2);

        registry.shutdown().await;
        assert_eq!(registry.channel_count(), 0);
        assert!(registry.channel_ids().is_empty());
    }
}
