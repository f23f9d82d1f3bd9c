//! Peer records
//!
//! A peer is addressed by identity inside its channel; the signaling
//! connection only keeps the ids and the receiving half of the event queue.

use std::collections::BTreeMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

use crate::event::PeerEvent;
use crate::media::{
    ConsumerHandle, MediaKind, ProducerHandle, RtpCapabilities, StreamDescriptor, TransportHandle,
};
use crate::types::{ChannelId, PeerId, ProducerId};

/// An active producer owned by a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Producer {
    pub handle: ProducerHandle,
    pub ssrc: u32,
    pub rtx_ssrc: Option<u32>,
}

impl Producer {
    #[must_use]
    pub const fn id(&self) -> &ProducerId {
        &self.handle.id
    }

    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        self.handle.kind
    }
}

/// A receiving peer's subscription to a remote producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer {
    pub handle: ConsumerHandle,
    /// Owner of the consumed producer
    pub source: PeerId,
}

impl Consumer {
    #[must_use]
    pub const fn producer_id(&self) -> &ProducerId {
        &self.handle.producer_id
    }

    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        self.handle.kind
    }
}

/// Peer state held by its channel
pub struct Peer {
    pub id: PeerId,
    pub channel_id: ChannelId,
    pub(crate) capabilities: RtpCapabilities,
    pub(crate) transport: Option<TransportHandle>,
    pub(crate) producers: BTreeMap<MediaKind, Producer>,
    pub(crate) consumers: Vec<Consumer>,
    /// Stream descriptors from the peer's latest renegotiation
    pub(crate) streams: Vec<StreamDescriptor>,
    events: mpsc::Sender<PeerEvent>,
    joined_at: Instant,
}

impl Peer {
    pub(crate) fn new(
        id: PeerId,
        channel_id: ChannelId,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<PeerEvent>) {
        let (events, rx) = mpsc::channel(buffer.max(1));
        let peer = Self {
            id,
            channel_id,
            capabilities: RtpCapabilities::default(),
            transport: None,
            producers: BTreeMap::new(),
            consumers: Vec::new(),
            streams: Vec::new(),
            events,
            joined_at: Instant::now(),
        };
        (peer, rx)
    }

    /// Whether the media layer is connected
    #[must_use]
    pub const fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    #[must_use]
    pub fn producer(&self, kind: MediaKind) -> Option<&Producer> {
        self.producers.get(&kind)
    }

    pub fn producers(&self) -> impl Iterator<Item = &Producer> {
        self.producers.values()
    }

    #[must_use]
    pub fn consumers(&self) -> &[Consumer] {
        &self.consumers
    }

    /// The consumer referencing `producer_id`, if any
    #[must_use]
    pub fn consumer_for(&self, producer_id: &ProducerId) -> Option<&Consumer> {
        self.consumers.iter().find(|c| c.producer_id() == producer_id)
    }

    /// The consumer of `kind` whose producer belongs to `source`
    #[must_use]
    pub fn consumer_from(&self, source: &PeerId, kind: MediaKind) -> Option<&Consumer> {
        self.consumers
            .iter()
            .find(|c| c.kind() == kind && &c.source == source)
    }

    /// Try to queue an event for this peer.
    /// Returns false if the queue is full (slow connection) or closed.
    pub fn try_send(&self, event: PeerEvent) -> bool {
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(peer_id = %self.id, "Peer event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        debug!(
            peer_id = %self.id,
            channel_id = %self.channel_id,
            producers = self.producers.len(),
            consumers = self.consumers.len(),
            connected_for_ms = self.joined_at.elapsed().as_millis() as u64,
            "Peer dropped"
        );
        // Dropping the sender closes the event queue, which ends the
        // connection's forwarding task.
    }
}
