//! Control events delivered to peers through their event queue

use serde::{Deserialize, Serialize};

use crate::media::{MediaKind, StreamDescriptor};
use crate::peer::Peer;
use crate::types::PeerId;

/// Speaking indication, relayed verbatim apart from the originator id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakingEvent {
    pub user_id: PeerId,
    pub speaking: u32,
    pub ssrc: u32,
}

/// Consumer-side SSRCs a receiver should expect for one source peer.
/// Zero means "no stream of that kind".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoNotice {
    pub user_id: PeerId,
    pub audio_ssrc: u32,
    pub video_ssrc: u32,
    pub rtx_ssrc: u32,
    pub streams: Vec<StreamDescriptor>,
}

impl VideoNotice {
    /// What `receiver` should expect from `source`, based on the consumers
    /// `receiver` currently holds. The source's stream descriptors are
    /// rewritten with the receiver-side SSRCs.
    #[must_use]
    pub fn between(receiver: &Peer, source: &Peer) -> Self {
        let audio = receiver.consumer_from(&source.id, MediaKind::Audio);
        let video = receiver.consumer_from(&source.id, MediaKind::Video);

        let audio_ssrc = audio.map_or(0, |c| c.handle.ssrc);
        let video_ssrc = video.map_or(0, |c| c.handle.ssrc);
        let rtx_ssrc = video.and_then(|c| c.handle.rtx_ssrc).unwrap_or(0);

        Self {
            user_id: source.id.clone(),
            audio_ssrc,
            video_ssrc,
            rtx_ssrc,
            streams: source
                .streams
                .iter()
                .map(|stream| StreamDescriptor {
                    ssrc: video_ssrc,
                    rtx_ssrc,
                    ..stream.clone()
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Speaking(SpeakingEvent),
    Video(VideoNotice),
    ClientDisconnect { user_id: PeerId },
}
