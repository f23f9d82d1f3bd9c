//! Coordinator error types

use thiserror::Error;

use crate::engine::EngineError;
use crate::types::{ChannelId, PeerId};

#[derive(Debug, Error)]
pub enum SfuError {
    #[error("routing context unavailable for channel {channel_id}: {reason}")]
    RoutingUnavailable { channel_id: ChannelId, reason: String },

    #[error("peer {peer_id} has not joined channel {channel_id}")]
    PeerNotJoined { channel_id: ChannelId, peer_id: PeerId },

    #[error("peer {peer_id} already joined channel {channel_id}")]
    AlreadyJoined { channel_id: ChannelId, peer_id: PeerId },

    #[error("channel {0} is full")]
    ChannelFull(ChannelId),

    #[error("maximum number of channels reached")]
    ChannelLimitReached,

    #[error("media engine error: {0}")]
    Engine(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, SfuError>;
