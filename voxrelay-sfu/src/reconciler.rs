//! Subscription reconciliation
//!
//! Brings a channel to the fan-out state: every peer with a transport holds
//! exactly one consumer for each active producer of every other peer. A pass
//! only creates what is missing, so it can run after any membership or
//! producer change. Individual failures are logged and skipped; the next pass
//! retries them.

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::capability::negotiate;
use crate::channel::ChannelState;
use crate::context::MediaContext;
use crate::event::{PeerEvent, VideoNotice};
use crate::media::{ConsumeRequest, MediaKind};
use crate::peer::Consumer;
use crate::types::{PeerId, ProducerId};

/// Which (source, receiver) pairs a pass considers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    /// Only producers owned by this peer
    Source(PeerId),
    /// Only consumers for this receiving peer
    Receiver(PeerId),
}

impl Scope {
    fn includes_source(&self, peer_id: &PeerId) -> bool {
        match self {
            Self::Source(source) => source == peer_id,
            Self::All | Self::Receiver(_) => true,
        }
    }

    fn includes_receiver(&self, peer_id: &PeerId) -> bool {
        match self {
            Self::Receiver(receiver) => receiver == peer_id,
            Self::All | Self::Source(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedConsumer {
    pub receiver: PeerId,
    pub source: PeerId,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<CreatedConsumer>,
    /// Pairs already satisfied by an existing consumer
    pub existing: usize,
    pub failed: usize,
}

impl ReconcileReport {
    /// Distinct (receiver, source) pairs that gained a consumer
    #[must_use]
    pub fn touched_pairs(&self) -> BTreeSet<(PeerId, PeerId)> {
        self.created
            .iter()
            .map(|c| (c.receiver.clone(), c.source.clone()))
            .collect()
    }
}

pub(crate) async fn reconcile(
    ctx: &MediaContext,
    state: &mut ChannelState,
    scope: &Scope,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    let sources: Vec<(PeerId, MediaKind, ProducerId)> = state
        .peers
        .values()
        .filter(|peer| scope.includes_source(&peer.id))
        .flat_map(|peer| {
            peer.producers()
                .map(move |p| (peer.id.clone(), p.kind(), p.id().clone()))
        })
        .collect();
    let mut receivers: Vec<PeerId> = state
        .peers
        .values()
        .filter(|peer| peer.has_transport() && scope.includes_receiver(&peer.id))
        .map(|peer| peer.id.clone())
        .collect();
    receivers.sort();

    for (source, kind, producer_id) in &sources {
        for receiver in &receivers {
            if receiver == source {
                continue;
            }
            let Some(peer) = state.peers.get(receiver) else {
                continue;
            };
            if peer.consumer_for(producer_id).is_some() {
                report.existing += 1;
                continue;
            }
            let Some(transport) = peer.transport.clone() else {
                continue;
            };
            let negotiated = match negotiate(*kind, &ctx.local, &peer.capabilities) {
                Ok(negotiated) => negotiated,
                Err(e) => {
                    debug!(receiver = %receiver, source = %source, kind = %kind, error = %e, "Receiver cannot take producer");
                    report.failed += 1;
                    continue;
                }
            };
            let request = ConsumeRequest {
                producer_id: producer_id.clone(),
                rtp_capabilities: negotiated,
                source: source.clone(),
                preferred_layers: (*kind == MediaKind::Video)
                    .then_some(ctx.config.initial_video_layers),
                paused: false,
            };

            match ctx.engine.consume(&transport, request).await {
                Ok(handle) => {
                    debug!(
                        receiver = %receiver,
                        source = %source,
                        kind = %kind,
                        consumer_id = %handle.id,
                        "Consumer created"
                    );
                    if let Some(peer) = state.peers.get_mut(receiver) {
                        peer.consumers.push(Consumer {
                            handle,
                            source: source.clone(),
                        });
                        report.created.push(CreatedConsumer {
                            receiver: receiver.clone(),
                            source: source.clone(),
                            kind: *kind,
                        });
                    }
                }
                Err(e) => {
                    warn!(receiver = %receiver, source = %source, kind = %kind, error = %e, "Engine failed to create consumer");
                    report.failed += 1;
                }
            }
        }
    }

    if !report.created.is_empty() || report.failed > 0 {
        info!(
            created = report.created.len(),
            existing = report.existing,
            failed = report.failed,
            "Reconciliation pass finished"
        );
    }
    report
}

/// Queue a video notice to each receiver about the given source.
/// Returns how many notices were queued.
pub(crate) fn notify_pairs<'a>(
    state: &ChannelState,
    pairs: impl IntoIterator<Item = (&'a PeerId, &'a PeerId)>,
) -> usize {
    pairs
        .into_iter()
        .filter(|(receiver, source)| receiver != source)
        .filter_map(|(receiver, source)| {
            let receiver = state.peers.get(receiver)?;
            let source = state.peers.get(source)?;
            Some(receiver.try_send(PeerEvent::Video(VideoNotice::between(receiver, source))))
        })
        .filter(|queued| *queued)
        .count()
}
