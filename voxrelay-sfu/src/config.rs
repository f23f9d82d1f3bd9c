//! Coordinator configuration

use serde::{Deserialize, Serialize};

use crate::media::PreferredLayers;

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// Maximum number of concurrent channels (0 = unlimited)
    pub max_channels: usize,
    /// Maximum peers per channel (0 = unlimited)
    pub max_peers_per_channel: usize,
    /// Capacity of each peer's outbound control-event queue
    pub peer_event_buffer: usize,
    /// Max bitrate advertised on audio producer encodings (bps)
    pub audio_max_bitrate: u32,
    /// Scalability mode requested for video producers
    pub video_scalability_mode: String,
    /// Delay between key frame requests forwarded to video producers (ms)
    pub key_frame_request_delay_ms: u32,
    /// Layers requested when a video consumer is first created
    pub initial_video_layers: PreferredLayers,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            max_channels: 0,
            max_peers_per_channel: 0,
            peer_event_buffer: 256,
            audio_max_bitrate: 64_000,
            video_scalability_mode: "L1T1".to_string(),
            key_frame_request_delay_ms: 1000,
            initial_video_layers: PreferredLayers {
                spatial_layer: 0,
                temporal_layer: 0,
            },
        }
    }
}
