//! Per-connection voice gateway state machine
//!
//! A connection starts `Connected` (Hello sent, identify deadline armed),
//! becomes `Identified` once its session is verified and the peer joined
//! the channel, and `Negotiated` once its transport is up. Frames leave
//! through an outbound queue so the state machine never touches the socket.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use voxrelay_core::config::VoiceConfig;
use voxrelay_core::repository::{VoiceSessionKey, VoiceSessionStore};
use voxrelay_sfu::{
    ChannelId, ChannelRegistry, MediaKind, PeerEvent, PeerId, Renegotiation, StreamDescriptor,
};

use super::error::GatewayError;
use super::protocol::{
    ClientDisconnectPayload, CloseCode, Envelope, HelloPayload, IdentifyPayload,
    MediaSinkWantsPayload, OpCode, ReadyPayload, SelectProtocolPayload, SessionDescriptionPayload,
    SpeakingPayload,
};

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Value of `any` in MediaSinkWants
const MEDIA_SINK_WANTS_ANY: u32 = 100;

/// Something to write to the client socket
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(Envelope),
    Close(CloseCode),
}

/// Shared services every connection needs
#[derive(Clone)]
pub struct GatewayContext {
    pub registry: Arc<ChannelRegistry>,
    pub sessions: Arc<dyn VoiceSessionStore>,
    pub voice: Arc<VoiceConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connected,
    Identified,
    Negotiated,
}

struct Membership {
    channel_id: ChannelId,
    peer_id: PeerId,
    forwarder: JoinHandle<()>,
}

pub struct VoiceConnection {
    ctx: GatewayContext,
    outbound: mpsc::Sender<Outbound>,
    phase: Phase,
    member: Option<Membership>,
    /// Last SSRC handed out in Ready
    ssrc_counter: u32,
}

impl VoiceConnection {
    pub fn new(ctx: GatewayContext, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            ctx,
            outbound,
            phase: Phase::Connected,
            member: None,
            ssrc_counter: 0,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn is_identified(&self) -> bool {
        !matches!(self.phase, Phase::Connected)
    }

    /// Run the connection over `incoming` text frames, then close it with the
    /// matching close code if it failed, and leave the channel.
    pub async fn serve(mut self, incoming: impl Stream<Item = String>) {
        if let Err(e) = self.run(incoming).await {
            match e.close_code() {
                Some(code) => {
                    warn!(error = %e, close_code = code.code(), "Closing voice connection");
                    // The writer may already be gone
                    let _ = self.outbound.send(Outbound::Close(code)).await;
                }
                None => debug!(error = %e, "Voice connection ended"),
            }
        }
        self.close().await;
    }

    /// Send Hello, then dispatch frames until the stream ends or a handler
    /// fails. Fails with `SessionTimeout` if Identify does not arrive in time.
    pub async fn run(&mut self, incoming: impl Stream<Item = String>) -> Result<()> {
        let mut incoming = std::pin::pin!(incoming);
        self.hello().await?;

        let deadline = tokio::time::sleep(Duration::from_millis(self.ctx.voice.identify_timeout_ms));
        let mut deadline = std::pin::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut deadline, if !self.is_identified() => {
                    return Err(GatewayError::SessionTimeout);
                }
                frame = incoming.next() => match frame {
                    Some(text) => self.handle_text(&text).await?,
                    None => return Ok(()),
                },
            }
        }
    }

    pub async fn hello(&self) -> Result<()> {
        self.send(
            OpCode::Hello,
            HelloPayload {
                heartbeat_interval: self.ctx.voice.heartbeat_interval_ms,
            },
        )
        .await
    }

    /// Decode and dispatch one text frame
    pub async fn handle_text(&mut self, text: &str) -> Result<()> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let op = envelope.opcode().map_err(GatewayError::UnknownOpcode)?;

        match op {
            OpCode::Heartbeat => self.send(OpCode::HeartbeatAck, envelope.d).await,
            OpCode::Identify => self.identify(envelope.payload()?).await,
            _ if !self.is_identified() => Err(GatewayError::NotAuthenticated),
            OpCode::SelectProtocol => self.select_protocol(envelope.payload()?).await,
            OpCode::Video => self.video(envelope.payload()?).await,
            OpCode::Speaking => self.speaking(envelope.payload()?).await,
            // Server-to-client opcodes
            other => Err(GatewayError::UnknownOpcode(other as u8)),
        }
    }

    async fn identify(&mut self, payload: IdentifyPayload) -> Result<()> {
        if self.is_identified() {
            return Err(GatewayError::AlreadyAuthenticated);
        }

        let key = VoiceSessionKey {
            server_id: payload.server_id,
            user_id: payload.user_id,
            session_id: payload.session_id,
            token: payload.token,
        };
        let Some(session) = self.ctx.sessions.find(&key).await? else {
            warn!(user_id = %key.user_id, server_id = %key.server_id, "No voice session for identify");
            return Err(GatewayError::AuthenticationFailed);
        };

        let channel_id = ChannelId::from(session.channel_id);
        let peer_id = PeerId::from(key.user_id);
        let events = self
            .ctx
            .registry
            .join(channel_id.clone(), peer_id.clone())
            .await?;

        info!(channel_id = %channel_id, peer_id = %peer_id, "Voice connection identified");
        self.phase = Phase::Identified;

        let ready = ReadyPayload {
            ssrc: self.ssrc_counter,
            streams: payload
                .streams
                .into_iter()
                .map(|stream| self.allocate_stream(stream))
                .collect(),
            ip: self.ctx.voice.announced_ip.clone(),
            port: self.ctx.voice.announced_port,
            modes: Vec::new(),
            experiments: self.ctx.voice.experiments.clone(),
        };
        // Ready goes out before any event queued for this peer
        let sent = self.send(OpCode::Ready, ready).await;

        self.member = Some(Membership {
            channel_id,
            peer_id,
            forwarder: spawn_forwarder(events, self.outbound.clone()),
        });
        sent
    }

    fn allocate_stream(&mut self, stream: StreamDescriptor) -> StreamDescriptor {
        self.ssrc_counter += 1;
        let ssrc = self.ssrc_counter;
        self.ssrc_counter += 1;
        StreamDescriptor {
            ssrc,
            rtx_ssrc: self.ssrc_counter,
            ..stream
        }
    }

    async fn select_protocol(&mut self, payload: SelectProtocolPayload) -> Result<()> {
        if payload.protocol != "webrtc" {
            return Err(GatewayError::UnknownProtocol(payload.protocol));
        }
        let offer = payload.offer().map(str::to_owned).ok_or_else(|| {
            GatewayError::Decode(<serde_json::Error as serde::de::Error>::custom(
                "missing session offer",
            ))
        })?;

        let (channel_id, peer_id) = self.membership()?;
        let registry = Arc::clone(&self.ctx.registry);

        let answer = registry
            .connect_transport(&channel_id, &peer_id, &offer, payload.codecs)
            .await?;

        let local = registry.local_capabilities();
        let codec_name = |kind: MediaKind| {
            local
                .preferred(kind)
                .map(|codec| codec.name.clone())
                .unwrap_or_default()
        };
        let description = SessionDescriptionPayload {
            sdp: answer,
            audio_codec: codec_name(MediaKind::Audio),
            video_codec: codec_name(MediaKind::Video),
            media_session_id: nanoid::nanoid!(),
        };
        self.send(OpCode::SessionDescription, description).await?;
        self.phase = Phase::Negotiated;

        let report = registry.protocol_negotiated(&channel_id, &peer_id).await?;
        debug!(
            peer_id = %peer_id,
            created = report.created.len(),
            existing = report.existing,
            failed = report.failed,
            "Protocol negotiated"
        );
        Ok(())
    }

    async fn video(&mut self, request: Renegotiation) -> Result<()> {
        let (channel_id, peer_id) = self.membership()?;
        self.send(
            OpCode::MediaSinkWants,
            MediaSinkWantsPayload {
                any: MEDIA_SINK_WANTS_ANY,
            },
        )
        .await?;

        let transitions = self
            .ctx
            .registry
            .renegotiate(&channel_id, &peer_id, request)
            .await?;
        debug!(peer_id = %peer_id, transitions = ?transitions, "Video renegotiated");
        Ok(())
    }

    async fn speaking(&mut self, payload: SpeakingPayload) -> Result<()> {
        let (channel_id, peer_id) = self.membership()?;
        let report = self
            .ctx
            .registry
            .broadcast_speaking(&channel_id, &peer_id, payload.speaking, payload.ssrc)
            .await?;
        if report.dropped > 0 {
            debug!(peer_id = %peer_id, dropped = report.dropped, "Speaking not delivered to every peer");
        }
        Ok(())
    }

    /// Leave the channel, if joined. Idempotent.
    pub async fn close(&mut self) {
        let Some(member) = self.member.take() else {
            return;
        };
        self.ctx
            .registry
            .leave(&member.channel_id, &member.peer_id)
            .await;
        member.forwarder.abort();
        let _ = member.forwarder.await;
        info!(
            channel_id = %member.channel_id,
            peer_id = %member.peer_id,
            "Voice connection closed"
        );
    }

    fn membership(&self) -> Result<(ChannelId, PeerId)> {
        self.member
            .as_ref()
            .map(|m| (m.channel_id.clone(), m.peer_id.clone()))
            .ok_or(GatewayError::NotAuthenticated)
    }

    async fn send(&self, op: OpCode, payload: impl serde::Serialize) -> Result<()> {
        let envelope = Envelope::new(op, payload)?;
        self.outbound
            .send(Outbound::Frame(envelope))
            .await
            .map_err(|_| GatewayError::ConnectionClosed)
    }
}

/// Copy coordinator events for this peer into its outbound queue
fn spawn_forwarder(
    mut events: mpsc::Receiver<PeerEvent>,
    outbound: mpsc::Sender<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let frame = match event_frame(event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Failed to encode peer event");
                    continue;
                }
            };
            if outbound.send(Outbound::Frame(frame)).await.is_err() {
                break;
            }
        }
    })
}

fn event_frame(event: PeerEvent) -> serde_json::Result<Envelope> {
    match event {
        PeerEvent::Speaking(speaking) => Envelope::new(OpCode::Speaking, speaking),
        PeerEvent::Video(notice) => Envelope::new(OpCode::Video, notice),
        PeerEvent::ClientDisconnect { user_id } => {
            Envelope::new(OpCode::ClientDisconnect, ClientDisconnectPayload { user_id })
        }
    }
}
