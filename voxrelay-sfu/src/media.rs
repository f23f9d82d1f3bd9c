//! Media descriptions exchanged with the media engine
//!
//! Producers, consumers and transports are owned by the engine; the
//! coordinator only holds the handles defined here plus the RTP parameters
//! it hands to the engine when asking for new ones.

use serde::{Deserialize, Serialize};

use crate::types::{ConsumerId, PeerId, ProducerId, TransportId};

/// Media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Every kind a peer may produce, in processing order
    pub const ALL: [Self; 2] = [Self::Audio, Self::Video];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Parse an SDP media type or codec `type` field
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A codec as advertised by a peer during protocol selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecCapability {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    #[serde(default)]
    pub priority: u32,
    /// Preferred payload type; absent when the peer leaves it to the server
    #[serde(default)]
    pub payload_type: Option<u8>,
    #[serde(default)]
    pub rtx_payload_type: Option<u8>,
}

/// RTP header extension offered by a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderExtension {
    pub kind: MediaKind,
    pub uri: String,
    pub id: u8,
}

/// Everything a peer told us about what it can send and receive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpCapabilities {
    pub codecs: Vec<CodecCapability>,
    pub header_extensions: Vec<HeaderExtension>,
}

/// A codec resolved to a concrete payload type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpCodec {
    pub name: String,
    pub kind: MediaKind,
    pub payload_type: u8,
    pub rtx_payload_type: Option<u8>,
    pub clock_rate: u32,
    pub channels: Option<u8>,
}

/// One RTP encoding of a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpEncoding {
    pub ssrc: u32,
    pub rtx_ssrc: Option<u32>,
    pub codec_payload_type: u8,
    pub max_bitrate: Option<u32>,
    pub rid: Option<String>,
    pub scalability_mode: Option<String>,
    pub dtx: bool,
}

/// RTP parameters handed to the engine when producing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpParameters {
    pub codecs: Vec<RtpCodec>,
    pub header_extensions: Vec<HeaderExtension>,
    pub encodings: Vec<RtpEncoding>,
}

/// Producer creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceRequest {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub key_frame_request_delay_ms: Option<u32>,
}

/// Spatial/temporal layer selection for simulcast or SVC video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredLayers {
    pub spatial_layer: u8,
    pub temporal_layer: u8,
}

/// Consumer creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeRequest {
    pub producer_id: ProducerId,
    /// Receiver-side capabilities, already negotiated for the producer's kind
    pub rtp_capabilities: crate::capability::NegotiatedParameters,
    /// Owner of the producer, carried as application data
    pub source: PeerId,
    pub preferred_layers: Option<PreferredLayers>,
    pub paused: bool,
}

/// Maximum resolution advertised for a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxResolution {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// A stream descriptor as sent in Identify/Video payloads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub rid: String,
    #[serde(default)]
    pub ssrc: u32,
    #[serde(default)]
    pub rtx_ssrc: u32,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_framerate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_resolution: Option<MaxResolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
}

/// Transport handle; owned by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportHandle {
    pub id: TransportId,
}

/// Producer handle; owned by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerHandle {
    pub id: ProducerId,
    pub kind: MediaKind,
}

/// Consumer handle with the SSRCs the engine assigned to this consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerHandle {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub ssrc: u32,
    pub rtx_ssrc: Option<u32>,
}

/// Anything the engine can close
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaHandle {
    Transport(TransportId),
    Producer(ProducerId),
    Consumer(ConsumerId),
}

impl std::fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(id) => write!(f, "transport:{id}"),
            Self::Producer(id) => write!(f, "producer:{id}"),
            Self::Consumer(id) => write!(f, "consumer:{id}"),
        }
    }
}
