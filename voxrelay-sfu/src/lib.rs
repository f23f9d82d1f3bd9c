//! `VoxRelay` channel media coordinator
//!
//! Control plane of a selective forwarding relay. Tracks which peers belong
//! to which channel, which media each peer produces, and which remote
//! producers each peer consumes, and keeps that graph consistent as peers
//! join, leave and renegotiate. Packets never pass through here; a
//! [`MediaEngine`] does the forwarding.
//!
//! ## Architecture
//!
//! - **`ChannelRegistry`**: channel membership, routing-context lifetime,
//!   entry point for every operation
//! - **`negotiate`**: per-peer, per-kind codec and header-extension selection
//! - **`lifecycle`**: producer state machine with cascading teardown
//! - **`reconciler`**: idempotent producer to consumer fan-out
//! - **`broadcaster`**: best-effort control events to other members
//!
//! All mutation of one channel is serialized under that channel's lock,
//! including across engine calls. Different channels proceed in parallel.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voxrelay_sfu::{BookkeepingEngine, ChannelRegistry, Renegotiation, SfuConfig};
//!
//! let registry = ChannelRegistry::new(SfuConfig::default(), Arc::new(BookkeepingEngine::default()));
//! let events = registry.join("channel".into(), "alice".into()).await?;
//! let answer = registry.connect_transport(&"channel".into(), &"alice".into(), &offer, codecs).await?;
//! registry.protocol_negotiated(&"channel".into(), &"alice".into()).await?;
//! registry.renegotiate(&"channel".into(), &"alice".into(), Renegotiation { audio_ssrc: 5, ..Default::default() }).await?;
//! ```

mod bookkeeping;
mod broadcaster;
mod capability;
mod channel;
mod config;
mod context;
mod engine;
mod error;
mod event;
mod lifecycle;
mod media;
mod peer;
mod reconciler;
mod registry;
mod types;

pub use bookkeeping::{AnswerLatch, BookkeepingConfig, BookkeepingEngine};
pub use broadcaster::BroadcastReport;
pub use capability::{
    default_payload_type, negotiate, recognized_extensions, LocalCapabilities, LocalCodec,
    NegotiatedParameters, NegotiationError,
};
pub use channel::ChannelStats;
pub use config::SfuConfig;
pub use engine::{EngineError, EngineResult, MediaEngine, TransportSetup};
pub use error::{Result, SfuError};
pub use event::{PeerEvent, SpeakingEvent, VideoNotice};
pub use lifecycle::{Renegotiation, Transition};
pub use media::{
    CodecCapability, ConsumeRequest, ConsumerHandle, HeaderExtension, MaxResolution, MediaHandle,
    MediaKind, PreferredLayers, ProduceRequest, ProducerHandle, RtpCapabilities, RtpCodec,
    RtpEncoding, RtpParameters, StreamDescriptor, TransportHandle,
};
pub use peer::{Consumer, Peer, Producer};
pub use reconciler::{CreatedConsumer, ReconcileReport};
pub use registry::{
    ChannelRegistry, ConsumerSnapshot, PeerSnapshot, ProducerSnapshot, RegistryStats,
};
pub use types::{ChannelId, ConsumerId, PeerId, ProducerId, TransportId};
