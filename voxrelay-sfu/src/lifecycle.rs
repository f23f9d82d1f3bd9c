//! Producer lifecycle
//!
//! Per peer and media kind the producer is either absent or active:
//!
//! - `Absent -> Active` when a renegotiation carries a non-zero SSRC for the
//!   kind and no producer exists (video additionally needs its first stream
//!   descriptor marked active).
//! - `Active -> Absent` when a renegotiation carries SSRC 0 for the kind, or
//!   when the peer leaves. Dependent consumers on every peer are closed and
//!   removed before the producer itself is closed.
//!
//! Requests for a state that already holds are no-ops.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capability::negotiate;
use crate::channel::ChannelState;
use crate::context::MediaContext;
use crate::media::{
    MediaHandle, MediaKind, ProduceRequest, RtpEncoding, RtpParameters, StreamDescriptor,
};
use crate::peer::{Peer, Producer};
use crate::types::{ConsumerId, PeerId};

/// A peer's renegotiation signal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renegotiation {
    #[serde(default)]
    pub audio_ssrc: u32,
    #[serde(default)]
    pub video_ssrc: u32,
    #[serde(default)]
    pub rtx_ssrc: u32,
    #[serde(default)]
    pub streams: Vec<StreamDescriptor>,
}

impl Renegotiation {
    #[must_use]
    pub const fn ssrc(&self, kind: MediaKind) -> u32 {
        match kind {
            MediaKind::Audio => self.audio_ssrc,
            MediaKind::Video => self.video_ssrc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created(MediaKind),
    Destroyed(MediaKind),
}

/// Apply a renegotiation from `peer_id`. Teardowns run before creations.
pub(crate) async fn apply(
    ctx: &MediaContext,
    state: &mut ChannelState,
    peer_id: &PeerId,
    request: &Renegotiation,
) -> Vec<Transition> {
    let Some(peer) = state.peers.get_mut(peer_id) else {
        return Vec::new();
    };
    peer.streams = request.streams.clone();

    let mut transitions = Vec::new();

    for kind in MediaKind::ALL {
        if request.ssrc(kind) == 0 && teardown_producer(ctx, state, peer_id, kind).await {
            transitions.push(Transition::Destroyed(kind));
        }
    }

    for kind in MediaKind::ALL {
        if request.ssrc(kind) != 0 && create_producer(ctx, state, peer_id, kind, request).await {
            transitions.push(Transition::Created(kind));
        }
    }

    transitions
}

async fn create_producer(
    ctx: &MediaContext,
    state: &mut ChannelState,
    peer_id: &PeerId,
    kind: MediaKind,
    request: &Renegotiation,
) -> bool {
    let Some(peer) = state.peers.get(peer_id) else {
        return false;
    };
    if peer.producer(kind).is_some() {
        return false;
    }
    let Some(transport) = peer.transport.clone() else {
        debug!(peer_id = %peer_id, kind = %kind, "No transport yet, deferring producer creation");
        return false;
    };
    let Some((ssrc, rtx_ssrc, produce)) = build_produce_request(ctx, peer, kind, request) else {
        return false;
    };

    match ctx.engine.produce(&transport, produce).await {
        Ok(handle) => {
            info!(
                peer_id = %peer_id,
                kind = %kind,
                producer_id = %handle.id,
                ssrc,
                "Producer created"
            );
            if let Some(peer) = state.peers.get_mut(peer_id) {
                peer.producers.insert(
                    kind,
                    Producer {
                        handle,
                        ssrc,
                        rtx_ssrc,
                    },
                );
            }
            true
        }
        Err(e) => {
            warn!(peer_id = %peer_id, kind = %kind, error = %e, "Engine failed to create producer");
            false
        }
    }
}

fn build_produce_request(
    ctx: &MediaContext,
    peer: &Peer,
    kind: MediaKind,
    request: &Renegotiation,
) -> Option<(u32, Option<u32>, ProduceRequest)> {
    let negotiated = match negotiate(kind, &ctx.local, &peer.capabilities) {
        Ok(negotiated) => negotiated,
        Err(e) => {
            warn!(peer_id = %peer.id, kind = %kind, error = %e, "Cannot negotiate producer parameters");
            return None;
        }
    };

    let (encoding, key_frame_request_delay_ms) = match kind {
        MediaKind::Audio => (
            RtpEncoding {
                ssrc: request.audio_ssrc,
                rtx_ssrc: None,
                codec_payload_type: negotiated.payload_type,
                max_bitrate: Some(ctx.config.audio_max_bitrate),
                rid: None,
                scalability_mode: None,
                dtx: false,
            },
            None,
        ),
        MediaKind::Video => {
            let Some(stream) = request.streams.first() else {
                debug!(peer_id = %peer.id, "Video SSRC without stream descriptor");
                return None;
            };
            if !stream.active {
                debug!(peer_id = %peer.id, rid = %stream.rid, "Video stream inactive");
                return None;
            }
            let ssrc = if stream.ssrc != 0 { stream.ssrc } else { request.video_ssrc };
            let rtx_ssrc = if stream.rtx_ssrc != 0 { stream.rtx_ssrc } else { request.rtx_ssrc };
            (
                RtpEncoding {
                    ssrc,
                    rtx_ssrc: (rtx_ssrc != 0).then_some(rtx_ssrc),
                    codec_payload_type: negotiated.payload_type,
                    max_bitrate: stream.max_bitrate,
                    rid: (!stream.rid.is_empty()).then(|| stream.rid.clone()),
                    scalability_mode: Some(ctx.config.video_scalability_mode.clone()),
                    dtx: true,
                },
                Some(ctx.config.key_frame_request_delay_ms),
            )
        }
    };

    Some((
        encoding.ssrc,
        encoding.rtx_ssrc,
        ProduceRequest {
            kind,
            rtp_parameters: RtpParameters {
                codecs: negotiated.codecs,
                header_extensions: negotiated.header_extensions,
                encodings: vec![encoding],
            },
            key_frame_request_delay_ms,
        },
    ))
}

/// Tear down `owner`'s producer of `kind` and every consumer referencing it.
/// Returns false if there was nothing to tear down.
pub(crate) async fn teardown_producer(
    ctx: &MediaContext,
    state: &mut ChannelState,
    owner: &PeerId,
    kind: MediaKind,
) -> bool {
    let Some(producer_id) = state
        .peers
        .get(owner)
        .and_then(|p| p.producer(kind))
        .map(|p| p.id().clone())
    else {
        return false;
    };

    let dependents: Vec<ConsumerId> = state
        .peers
        .values()
        .flat_map(|peer| peer.consumers.iter())
        .filter(|c| c.producer_id() == &producer_id)
        .map(|c| c.handle.id.clone())
        .collect();

    for consumer_id in &dependents {
        close_handle(ctx, MediaHandle::Consumer(consumer_id.clone())).await;
    }
    for peer in state.peers.values_mut() {
        peer.consumers.retain(|c| c.producer_id() != &producer_id);
    }

    close_handle(ctx, MediaHandle::Producer(producer_id.clone())).await;
    if let Some(peer) = state.peers.get_mut(owner) {
        peer.producers.remove(&kind);
    }

    info!(
        peer_id = %owner,
        kind = %kind,
        producer_id = %producer_id,
        closed_consumers = dependents.len(),
        "Producer torn down"
    );
    true
}

/// Release everything a peer holds on the engine: its producers (with
/// cascade), its own consumers and its transport. The peer stays a member.
pub(crate) async fn release_media(
    ctx: &MediaContext,
    state: &mut ChannelState,
    peer_id: &PeerId,
) -> Vec<Transition> {
    let mut transitions = Vec::new();
    for kind in MediaKind::ALL {
        if teardown_producer(ctx, state, peer_id, kind).await {
            transitions.push(Transition::Destroyed(kind));
        }
    }

    let Some(peer) = state.peers.get_mut(peer_id) else {
        return transitions;
    };
    let consumers = std::mem::take(&mut peer.consumers);
    let transport = peer.transport.take();

    for consumer in consumers {
        close_handle(ctx, MediaHandle::Consumer(consumer.handle.id)).await;
    }
    if let Some(transport) = transport {
        close_handle(ctx, MediaHandle::Transport(transport.id)).await;
    }
    transitions
}

/// Release a peer's media and remove it from the channel. Safe to repeat.
pub(crate) async fn teardown_peer(ctx: &MediaContext, state: &mut ChannelState, peer_id: &PeerId) -> bool {
    if !state.peers.contains_key(peer_id) {
        return false;
    }
    release_media(ctx, state, peer_id).await;
    state.peers.remove(peer_id);
    true
}

async fn close_handle(ctx: &MediaContext, handle: MediaHandle) {
    if let Err(e) = ctx.engine.close(&handle).await {
        warn!(handle = %handle, error = %e, "Engine failed to close handle");
    }
}
