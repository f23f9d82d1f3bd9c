//! Channel state
//!
//! All mutation of a channel (membership, producers, consumers) happens while
//! holding its state lock, so join, leave, producer transitions and
//! reconciliation passes on one channel are serialized, including across the
//! engine calls they await. Different channels never share a lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};

use crate::peer::Peer;
use crate::types::{ChannelId, PeerId};

pub struct Channel {
    pub id: ChannelId,
    state: Mutex<ChannelState>,
}

pub(crate) struct ChannelState {
    pub peers: HashMap<PeerId, Peer>,
    /// Whether the engine-side routing context exists
    pub routed: bool,
    /// Set once the last member left and the channel was unregistered.
    /// A joiner that still holds this instance must look it up again.
    pub closed: bool,
}

impl Channel {
    pub(crate) fn new(id: ChannelId) -> Self {
        Self {
            id,
            state: Mutex::new(ChannelState {
                peers: HashMap::new(),
                routed: false,
                closed: false,
            }),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().await
    }

    /// Consistent snapshot of the current members
    pub async fn members(&self) -> Vec<PeerId> {
        let state = self.lock().await;
        let mut members: Vec<_> = state.peers.keys().cloned().collect();
        members.sort();
        members
    }

    pub async fn get_stats(&self) -> ChannelStats {
        self.lock().await.stats()
    }
}

impl ChannelState {
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            peer_count: self.peers.len(),
            producer_count: self.peers.values().map(|p| p.producers.len()).sum(),
            consumer_count: self.peers.values().map(|p| p.consumers.len()).sum(),
            connected_peers: self.peers.values().filter(|p| p.has_transport()).count(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub peer_count: usize,
    pub connected_peers: usize,
    pub producer_count: usize,
    pub consumer_count: usize,
}
