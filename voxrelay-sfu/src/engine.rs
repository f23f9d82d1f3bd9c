//! Media engine boundary
//!
//! The engine performs the actual RTP switching, ICE, DTLS/SRTP and bandwidth
//! estimation. The coordinator only asks it for routing contexts, transports,
//! producers and consumers, and tells it when to close them. Engine calls are
//! suspension points; implementations are expected to enforce their own
//! timeouts.

use async_trait::async_trait;
use thiserror::Error;

use crate::media::{
    ConsumeRequest, ConsumerHandle, HeaderExtension, MediaHandle, ProduceRequest, ProducerHandle,
    TransportHandle,
};
use crate::types::{ChannelId, PeerId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("handle closed: {0}")]
    Closed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected by engine: {0}")]
    Rejected(String),

    #[error("engine internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Outcome of establishing a peer's transport from its offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSetup {
    pub handle: TransportHandle,
    /// Answer to hand back to the peer
    pub answer: String,
    /// Header extensions the peer offered
    pub header_extensions: Vec<HeaderExtension>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Allocate the per-channel routing context
    async fn create_routing_context(&self, channel_id: &ChannelId) -> EngineResult<()>;

    /// Release the per-channel routing context
    async fn dispose_routing_context(&self, channel_id: &ChannelId) -> EngineResult<()>;

    /// Establish a transport for `peer_id` from its session offer
    async fn connect_transport(
        &self,
        channel_id: &ChannelId,
        peer_id: &PeerId,
        offer: &str,
    ) -> EngineResult<TransportSetup>;

    async fn produce(
        &self,
        transport: &TransportHandle,
        request: ProduceRequest,
    ) -> EngineResult<ProducerHandle>;

    async fn consume(
        &self,
        transport: &TransportHandle,
        request: ConsumeRequest,
    ) -> EngineResult<ConsumerHandle>;

    /// Close a transport, producer or consumer. Closing an unknown handle is
    /// not an error.
    async fn close(&self, handle: &MediaHandle) -> EngineResult<()>;
}
