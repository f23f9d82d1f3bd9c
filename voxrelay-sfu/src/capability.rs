//! Capability negotiation
//!
//! Derives, for one peer and one media kind, the codecs and RTP header
//! extensions both sides can use. Pure functions over capability state.
//!
//! ## Default payload types
//!
//! When a peer does not advertise a payload type for a codec the server
//! prefers, the following fixed defaults apply:
//!
//! | codec | kind  | payload type |
//! |-------|-------|--------------|
//! | opus  | audio | 111          |
//! | H264  | video | 102          |
//! | VP8   | video | 96           |
//! | VP9   | video | 98           |
//!
//! Any other codec without an advertised payload type is not negotiable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::{HeaderExtension, MediaKind, RtpCapabilities, RtpCodec};

pub const AUDIO_LEVEL_URI: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";
pub const TOFFSET_URI: &str = "urn:ietf:params:rtp-hdrext:toffset";
pub const ABS_SEND_TIME_URI: &str = "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time";
pub const TRANSPORT_CC_URI: &str =
    "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";
pub const PLAYOUT_DELAY_URI: &str = "http://www.webrtc.org/experiments/rtp-hdrext/playout-delay";
pub const VIDEO_ORIENTATION_URI: &str = "urn:3gpp:video-orientation";

const AUDIO_EXTENSIONS: &[&str] = &[AUDIO_LEVEL_URI];
const VIDEO_EXTENSIONS: &[&str] = &[
    TOFFSET_URI,
    ABS_SEND_TIME_URI,
    TRANSPORT_CC_URI,
    PLAYOUT_DELAY_URI,
    VIDEO_ORIENTATION_URI,
];

/// Header extension URIs recognized for a kind
#[must_use]
pub const fn recognized_extensions(kind: MediaKind) -> &'static [&'static str] {
    match kind {
        MediaKind::Audio => AUDIO_EXTENSIONS,
        MediaKind::Video => VIDEO_EXTENSIONS,
    }
}

/// Fixed fallback payload type for a well-known codec (see module docs)
#[must_use]
pub fn default_payload_type(codec: &str) -> Option<u8> {
    match codec.to_ascii_lowercase().as_str() {
        "opus" => Some(111),
        "h264" => Some(102),
        "vp8" => Some(96),
        "vp9" => Some(98),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("no {0} codec supported by both sides")]
    NoCodec(MediaKind),

    #[error("no payload type for codec {0}")]
    NoPayloadType(String),
}

/// A codec the server is willing to relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCodec {
    pub name: String,
    pub kind: MediaKind,
    pub clock_rate: u32,
    pub channels: Option<u8>,
}

/// Server-side capabilities. Codec order is preference order per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCapabilities {
    pub codecs: Vec<LocalCodec>,
}

impl Default for LocalCapabilities {
    fn default() -> Self {
        let codec = |name: &str, kind, clock_rate, channels| LocalCodec {
            name: name.to_string(),
            kind,
            clock_rate,
            channels,
        };
        Self {
            codecs: vec![
                codec("opus", MediaKind::Audio, 48_000, Some(2)),
                codec("H264", MediaKind::Video, 90_000, None),
                codec("VP8", MediaKind::Video, 90_000, None),
                codec("VP9", MediaKind::Video, 90_000, None),
            ],
        }
    }
}

impl LocalCapabilities {
    /// The codec the server prefers for a kind
    #[must_use]
    pub fn preferred(&self, kind: MediaKind) -> Option<&LocalCodec> {
        self.codecs.iter().find(|c| c.kind == kind)
    }

    fn find(&self, kind: MediaKind, name: &str) -> Option<&LocalCodec> {
        self.codecs
            .iter()
            .find(|c| c.kind == kind && c.name.eq_ignore_ascii_case(name))
    }
}

/// Result of negotiating one kind for one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedParameters {
    pub kind: MediaKind,
    /// Usable codecs, in the peer's priority order
    pub codecs: Vec<RtpCodec>,
    pub header_extensions: Vec<HeaderExtension>,
    /// Payload type of the server-preferred codec
    pub payload_type: u8,
}

/// Negotiate codecs and header extensions for `kind`
pub fn negotiate(
    kind: MediaKind,
    local: &LocalCapabilities,
    remote: &RtpCapabilities,
) -> Result<NegotiatedParameters, NegotiationError> {
    let preferred = local.preferred(kind).ok_or(NegotiationError::NoCodec(kind))?;

    let mut remote_codecs: Vec<_> = remote.codecs.iter().filter(|c| c.kind == kind).collect();
    remote_codecs.sort_by_key(|c| c.priority);

    let codecs: Vec<RtpCodec> = remote_codecs
        .iter()
        .filter_map(|remote_codec| {
            let local_codec = local.find(kind, &remote_codec.name)?;
            let payload_type = remote_codec
                .payload_type
                .or_else(|| default_payload_type(&local_codec.name))?;
            Some(RtpCodec {
                name: local_codec.name.clone(),
                kind,
                payload_type,
                rtx_payload_type: remote_codec.rtx_payload_type,
                clock_rate: local_codec.clock_rate,
                channels: local_codec.channels,
            })
        })
        .collect();

    let payload_type = codecs
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(&preferred.name))
        .map(|c| c.payload_type)
        .or_else(|| default_payload_type(&preferred.name))
        .ok_or_else(|| NegotiationError::NoPayloadType(preferred.name.clone()))?;

    let recognized = recognized_extensions(kind);
    let header_extensions = remote
        .header_extensions
        .iter()
        .filter(|ext| ext.kind == kind && recognized.contains(&ext.uri.as_str()))
        .cloned()
        .collect();

    Ok(NegotiatedParameters {
        kind,
        codecs,
        header_extensions,
        payload_type,
    })
}
