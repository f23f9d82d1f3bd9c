//! Voice gateway wire format
//!
//! Every frame is a JSON text message `{"op": <u8>, "d": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use voxrelay_sfu::{CodecCapability, PeerId, StreamDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Identify = 0,
    SelectProtocol = 1,
    Ready = 2,
    Heartbeat = 3,
    SessionDescription = 4,
    Speaking = 5,
    HeartbeatAck = 6,
    Hello = 8,
    Video = 12,
    ClientDisconnect = 13,
    MediaSinkWants = 15,
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(op: u8) -> Result<Self, Self::Error> {
        Ok(match op {
            0 => Self::Identify,
            1 => Self::SelectProtocol,
            2 => Self::Ready,
            3 => Self::Heartbeat,
            4 => Self::SessionDescription,
            5 => Self::Speaking,
            6 => Self::HeartbeatAck,
            8 => Self::Hello,
            12 => Self::Video,
            13 => Self::ClientDisconnect,
            15 => Self::MediaSinkWants,
            other => return Err(other),
        })
    }
}

/// Websocket close codes used by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    UnknownOpcode = 4001,
    DecodeError = 4002,
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    SessionTimeout = 4009,
    UnknownProtocol = 4012,
    ServerCrashed = 4015,
}

impl CloseCode {
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::UnknownOpcode => "Unknown opcode",
            Self::DecodeError => "Failed to decode payload",
            Self::NotAuthenticated => "Not authenticated",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Already authenticated",
            Self::SessionTimeout => "Session timeout",
            Self::UnknownProtocol => "Unknown protocol",
            Self::ServerCrashed => "Voice server crashed",
        }
    }
}

/// A raw frame. The opcode is kept numeric so unknown opcodes can be told
/// apart from malformed frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

impl Envelope {
    pub fn new(op: OpCode, payload: impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            op: op as u8,
            d: serde_json::to_value(payload)?,
        })
    }

    pub fn opcode(&self) -> Result<OpCode, u8> {
        OpCode::try_from(self.op)
    }

    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.d)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Guild id
    pub server_id: String,
    /// Main gateway session
    pub session_id: String,
    pub user_id: String,
    /// Voice state token
    pub token: String,
    #[serde(default)]
    pub streams: Vec<StreamDescriptor>,
    #[serde(default)]
    pub video: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_dave_protocol_version: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub ssrc: u32,
    pub streams: Vec<StreamDescriptor>,
    pub ip: String,
    pub port: u16,
    pub modes: Vec<String>,
    pub experiments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectProtocolPayload {
    pub protocol: String,
    /// For webrtc, the session offer
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub sdp: Option<String>,
    #[serde(default)]
    pub codecs: Vec<CodecCapability>,
    #[serde(default)]
    pub rtc_connection_id: Option<String>,
}

impl SelectProtocolPayload {
    /// The offer, from `sdp` if present, else from `data`
    #[must_use]
    pub fn offer(&self) -> Option<&str> {
        self.sdp
            .as_deref()
            .filter(|sdp| !sdp.is_empty())
            .or_else(|| self.data.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptionPayload {
    pub sdp: String,
    pub audio_codec: String,
    pub video_codec: String,
    pub media_session_id: String,
}

/// Inbound speaking indication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakingPayload {
    #[serde(default)]
    pub speaking: u32,
    #[serde(default)]
    pub delay: u32,
    #[serde(default)]
    pub ssrc: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDisconnectPayload {
    pub user_id: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSinkWantsPayload {
    pub any: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_opcode_round_numbers() {
        assert_eq!(OpCode::try_from(12), Ok(OpCode::Video));
        assert_eq!(OpCode::try_from(15), Ok(OpCode::MediaSinkWants));
        assert_eq!(OpCode::try_from(7), Err(7));
        assert_eq!(CloseCode::AuthenticationFailed.code(), 4004);
        assert_eq!(CloseCode::ServerCrashed.code(), 4015);
    }

    #[test]
    fn test_identify_from_client_json() {
        let envelope: Envelope = serde_json::from_value(json!({
            "op": 0,
            "d": {
                "server_id": "g",
                "session_id": "s",
                "user_id": "u",
                "token": "t",
                "video": true,
                "streams": [{"type": "video", "rid": "100", "quality": 100}]
            }
        }))
        .unwrap();

        assert_eq!(envelope.opcode(), Ok(OpCode::Identify));
        let identify: IdentifyPayload = envelope.payload().unwrap();
        assert_eq!(identify.streams.len(), 1);
        assert_eq!(identify.streams[0].rid, "100");
        assert!(identify.video);
    }

    #[test]
    fn test_select_protocol_offer_source() {
        let from_data: SelectProtocolPayload = serde_json::from_value(json!({
            "protocol": "webrtc",
            "data": "v=0\n",
            "codecs": []
        }))
        .unwrap();
        assert_eq!(from_data.offer(), Some("v=0\n"));

        let from_sdp: SelectProtocolPayload = serde_json::from_value(json!({
            "protocol": "webrtc",
            "data": "ignored",
            "sdp": "v=1\n"
        }))
        .unwrap();
        assert_eq!(from_sdp.offer(), Some("v=1\n"));

        let udp: SelectProtocolPayload = serde_json::from_value(json!({
            "protocol": "udp",
            "data": {"address": "1.2.3.4", "port": 1, "mode": "x"}
        }))
        .unwrap();
        assert_eq!(udp.offer(), None);
    }

    #[test]
    fn test_envelope_serializes_numeric_op() {
        let envelope = Envelope::new(OpCode::MediaSinkWants, MediaSinkWantsPayload { any: 100 }).unwrap();
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"op": 15, "d": {"any": 100}})
        );
    }
}
