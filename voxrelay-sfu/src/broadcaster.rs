//! Fire-and-forget delivery of control events to channel members

use tracing::debug;

use crate::channel::ChannelState;
use crate::event::PeerEvent;
use crate::types::PeerId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Recipients whose queue was full or gone
    pub dropped: usize,
}

/// Queue `event` for every member except `origin`. Never waits on a slow
/// recipient.
pub(crate) fn broadcast(state: &ChannelState, origin: &PeerId, event: &PeerEvent) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    for peer in state.peers.values().filter(|p| &p.id != origin) {
        if peer.try_send(event.clone()) {
            report.delivered += 1;
        } else {
            report.dropped += 1;
        }
    }
    if report.dropped > 0 {
        debug!(origin = %origin, dropped = report.dropped, "Broadcast partially dropped");
    }
    report
}
