//! In-process media engine that only does bookkeeping
//!
//! Allocates ids and consumer SSRCs, tracks routing contexts and handle
//! ownership, and reports operations on closed handles. It never touches
//! packets; deployments that relay real media plug a different
//! [`MediaEngine`] in.

use async_trait::async_trait;
use parking_lot::Mutex;
use sdp::description::common::{Address, Attribute, ConnectionInformation};
use sdp::description::media::{MediaDescription, MediaName, RangedPort};
use sdp::description::session::SessionDescription;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::engine::{EngineError, EngineResult, MediaEngine, TransportSetup};
use crate::media::{
    ConsumeRequest, ConsumerHandle, HeaderExtension, MediaHandle, MediaKind, ProduceRequest,
    ProducerHandle, TransportHandle,
};
use crate::types::{generate_handle_id, ChannelId, ConsumerId, PeerId, ProducerId, TransportId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BookkeepingConfig {
    /// Address placed in the answer's host candidate
    pub announced_ip: String,
    pub announced_port: u16,
    /// First SSRC handed out to consumers
    pub consumer_ssrc_base: u32,
    /// Addresses gathered after `announced_ip`. Only the first gathered
    /// candidate completes an answer.
    pub extra_candidate_ips: Vec<String>,
}

impl Default for BookkeepingConfig {
    fn default() -> Self {
        Self {
            announced_ip: "127.0.0.1".to_string(),
            announced_port: 9009,
            consumer_ssrc_base: 100_000,
            extra_candidate_ips: Vec::new(),
        }
    }
}

/// One-shot completion for a pending answer. The first `resolve` wins;
/// later calls are ignored.
pub struct AnswerLatch<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> AnswerLatch<T> {
    #[must_use]
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Returns true if this call delivered the value
    pub fn resolve(&self, value: T) -> bool {
        match self.tx.lock().take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.lock().is_none()
    }
}

struct TransportEntry {
    channel_id: ChannelId,
    peer_id: PeerId,
}

struct ProducerEntry {
    transport_id: TransportId,
    kind: MediaKind,
}

struct ConsumerEntry {
    transport_id: TransportId,
    producer_id: ProducerId,
}

#[derive(Default)]
struct EngineState {
    routing: HashSet<ChannelId>,
    transports: HashMap<TransportId, TransportEntry>,
    producers: HashMap<ProducerId, ProducerEntry>,
    consumers: HashMap<ConsumerId, ConsumerEntry>,
    next_ssrc: u32,
}

impl EngineState {
    fn allocate_ssrc(&mut self) -> u32 {
        self.next_ssrc = self.next_ssrc.wrapping_add(1);
        self.next_ssrc
    }

    fn remove_producer(&mut self, producer_id: &ProducerId) {
        self.producers.remove(producer_id);
        self.consumers.retain(|_, c| &c.producer_id != producer_id);
    }

    fn remove_transport(&mut self, transport_id: &TransportId) {
        self.transports.remove(transport_id);
        let producers: Vec<ProducerId> = self
            .producers
            .iter()
            .filter(|(_, p)| &p.transport_id == transport_id)
            .map(|(id, _)| id.clone())
            .collect();
        for producer_id in &producers {
            self.remove_producer(producer_id);
        }
        self.consumers.retain(|_, c| &c.transport_id != transport_id);
    }
}

pub struct BookkeepingEngine {
    config: BookkeepingConfig,
    state: Mutex<EngineState>,
}

impl BookkeepingEngine {
    #[must_use]
    pub fn new(config: BookkeepingConfig) -> Self {
        let state = EngineState {
            next_ssrc: config.consumer_ssrc_base.wrapping_sub(1),
            ..Default::default()
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn routing_context_count(&self) -> usize {
        self.state.lock().routing.len()
    }

    pub fn has_routing_context(&self, channel_id: &ChannelId) -> bool {
        self.state.lock().routing.contains(channel_id)
    }

    pub fn transport_count(&self) -> usize {
        self.state.lock().transports.len()
    }

    pub fn producer_count(&self) -> usize {
        self.state.lock().producers.len()
    }

    pub fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    /// Whether the engine still considers `handle` open
    pub fn is_open(&self, handle: &MediaHandle) -> bool {
        let state = self.state.lock();
        match handle {
            MediaHandle::Transport(id) => state.transports.contains_key(id),
            MediaHandle::Producer(id) => state.producers.contains_key(id),
            MediaHandle::Consumer(id) => state.consumers.contains_key(id),
        }
    }

    /// Host candidates in gathering order
    fn candidates(&self) -> Vec<String> {
        std::iter::once(&self.config.announced_ip)
            .chain(&self.config.extra_candidate_ips)
            .map(|ip| {
                format!(
                    "1 1 UDP 2130706431 {ip} {} typ host",
                    self.config.announced_port
                )
            })
            .collect()
    }

    /// Answer mirroring every offered section. Sections we cannot carry are
    /// rejected with port 0.
    fn build_answer(&self, sections: &[OfferedSection]) -> SessionDescription {
        let mut answer = SessionDescription::new_jsep_session_description(false)
            .with_property_attribute("ice-lite".to_string())
            .with_value_attribute("ice-ufrag".to_string(), generate_handle_id())
            .with_value_attribute("ice-pwd".to_string(), generate_handle_id());

        let bundle: Vec<&str> = sections
            .iter()
            .filter(|section| section.kind.is_some())
            .filter_map(|section| section.mid.as_deref())
            .collect();
        if !bundle.is_empty() {
            answer = answer.with_value_attribute("group".to_string(), format!("BUNDLE {}", bundle.join(" ")));
        }

        for section in sections {
            let port = if section.kind.is_some() {
                self.config.announced_port
            } else {
                0
            };
            let mut media = MediaDescription {
                media_name: MediaName {
                    media: section.media_name.media.clone(),
                    port: RangedPort {
                        value: port as isize,
                        range: None,
                    },
                    protos: section.media_name.protos.clone(),
                    formats: section.media_name.formats.clone(),
                },
                media_title: None,
                connection_information: Some(connection_information(&self.config.announced_ip)),
                bandwidth: Vec::new(),
                encryption_key: None,
                attributes: Vec::new(),
            };
            if let Some(mid) = &section.mid {
                media = media.with_value_attribute("mid".to_string(), mid.clone());
            }
            if section.kind.is_some() {
                media = media.with_property_attribute("rtcp-mux".to_string());
                for ext in &section.header_extensions {
                    media = media.with_value_attribute("extmap".to_string(), format!("{} {}", ext.id, ext.uri));
                }
            }
            answer = answer.with_media(media);
        }
        answer
    }
}

impl Default for BookkeepingEngine {
    fn default() -> Self {
        Self::new(BookkeepingConfig::default())
    }
}

/// One `m=` section of an offer. `kind` is `None` for media we do not relay
/// (data channels and anything unknown).
struct OfferedSection {
    media_name: MediaName,
    kind: Option<MediaKind>,
    mid: Option<String>,
    header_extensions: Vec<HeaderExtension>,
}

fn parse_offer(offer: &str) -> EngineResult<Vec<OfferedSection>> {
    let offer = SessionDescription::unmarshal(&mut Cursor::new(offer.as_bytes()))
        .map_err(|e| EngineError::Rejected(format!("malformed offer: {e}")))?;

    Ok(offer
        .media_descriptions
        .into_iter()
        .map(|media| {
            let kind = MediaKind::parse(&media.media_name.media);
            let mid = media.attribute("mid").flatten().map(str::to_string);
            let header_extensions = match kind {
                Some(kind) => media
                    .attributes
                    .iter()
                    .filter(|attr| attr.key == "extmap")
                    .filter_map(|attr| parse_extmap(kind, attr.value.as_deref()?))
                    .collect(),
                None => Vec::new(),
            };
            OfferedSection {
                media_name: media.media_name,
                kind,
                mid,
                header_extensions,
            }
        })
        .collect())
}

/// `<id>[/<direction>] <uri>`
fn parse_extmap(kind: MediaKind, value: &str) -> Option<HeaderExtension> {
    let mut parts = value.split_whitespace();
    let id = parts.next()?;
    let uri = parts.next()?;
    let id = id.split('/').next()?.parse::<u8>().ok()?;
    Some(HeaderExtension {
        kind,
        uri: uri.to_string(),
        id,
    })
}

fn connection_information(ip: &str) -> ConnectionInformation {
    let address_type = if ip.contains(':') { "IP6" } else { "IP4" };
    ConnectionInformation {
        network_type: "IN".to_string(),
        address_type: address_type.to_string(),
        address: Some(Address {
            address: ip.to_string(),
            ttl: None,
            range: None,
        }),
    }
}

/// Gathers `candidates` on its own task. Each one completes the answer
/// through `latch`; only the first lands.
fn spawn_gathering(
    answer: SessionDescription,
    candidates: Vec<String>,
    latch: AnswerLatch<String>,
    transport_id: TransportId,
) {
    tokio::spawn(async move {
        for candidate in candidates {
            let mut completed = answer.clone();
            for media in completed
                .media_descriptions
                .iter_mut()
                .filter(|media| media.media_name.port.value != 0)
            {
                media.attributes.push(Attribute {
                    key: "candidate".to_string(),
                    value: Some(candidate.clone()),
                });
            }
            if !latch.resolve(completed.marshal()) {
                debug!(transport_id = %transport_id, candidate = %candidate, "Late candidate ignored");
            }
        }
    });
}

#[async_trait]
impl MediaEngine for BookkeepingEngine {
    async fn create_routing_context(&self, channel_id: &ChannelId) -> EngineResult<()> {
        if self.state.lock().routing.insert(channel_id.clone()) {
            debug!(channel_id = %channel_id, "Routing context allocated");
        }
        Ok(())
    }

    async fn dispose_routing_context(&self, channel_id: &ChannelId) -> EngineResult<()> {
        let mut state = self.state.lock();
        if !state.routing.remove(channel_id) {
            return Ok(());
        }
        let transports: Vec<TransportId> = state
            .transports
            .iter()
            .filter(|(_, t)| &t.channel_id == channel_id)
            .map(|(id, _)| id.clone())
            .collect();
        for transport_id in &transports {
            state.remove_transport(transport_id);
        }
        debug!(channel_id = %channel_id, released_transports = transports.len(), "Routing context disposed");
        Ok(())
    }

    async fn connect_transport(
        &self,
        channel_id: &ChannelId,
        peer_id: &PeerId,
        offer: &str,
    ) -> EngineResult<TransportSetup> {
        let sections = parse_offer(offer)?;
        if !sections.iter().any(|section| section.kind.is_some()) {
            return Err(EngineError::Rejected("offer has no audio or video section".to_string()));
        }

        let handle = TransportHandle {
            id: TransportId::new(generate_handle_id()),
        };
        {
            let mut state = self.state.lock();
            if !state.routing.contains(channel_id) {
                return Err(EngineError::NotFound(format!("routing context {channel_id}")));
            }
            state.transports.insert(
                handle.id.clone(),
                TransportEntry {
                    channel_id: channel_id.clone(),
                    peer_id: peer_id.clone(),
                },
            );
        }

        let (latch, pending) = AnswerLatch::new();
        spawn_gathering(
            self.build_answer(&sections),
            self.candidates(),
            latch,
            handle.id.clone(),
        );
        let answer = pending
            .await
            .map_err(|_| EngineError::Internal("answer was never completed".to_string()))?;

        info!(
            channel_id = %channel_id,
            peer_id = %peer_id,
            transport_id = %handle.id,
            "Transport connected"
        );

        Ok(TransportSetup {
            handle,
            answer,
            header_extensions: sections
                .into_iter()
                .flat_map(|section| section.header_extensions)
                .collect(),
        })
    }

    async fn produce(
        &self,
        transport: &TransportHandle,
        request: ProduceRequest,
    ) -> EngineResult<ProducerHandle> {
        if request.rtp_parameters.encodings.is_empty() {
            return Err(EngineError::Rejected("producer without encodings".to_string()));
        }
        let mut state = self.state.lock();
        let Some(owner) = state.transports.get(&transport.id) else {
            return Err(EngineError::Closed(format!("transport {}", transport.id)));
        };
        let duplicate = state
            .producers
            .values()
            .any(|p| p.transport_id == transport.id && p.kind == request.kind);
        if duplicate {
            return Err(EngineError::Rejected(format!(
                "{} producer already exists for {}",
                request.kind, owner.peer_id
            )));
        }

        let id = ProducerId::new(generate_handle_id());
        state.producers.insert(
            id.clone(),
            ProducerEntry {
                transport_id: transport.id.clone(),
                kind: request.kind,
            },
        );
        Ok(ProducerHandle {
            id,
            kind: request.kind,
        })
    }

    async fn consume(
        &self,
        transport: &TransportHandle,
        request: ConsumeRequest,
    ) -> EngineResult<ConsumerHandle> {
        let mut state = self.state.lock();
        if !state.transports.contains_key(&transport.id) {
            return Err(EngineError::Closed(format!("transport {}", transport.id)));
        }
        let Some(kind) = state.producers.get(&request.producer_id).map(|p| p.kind) else {
            return Err(EngineError::Closed(format!("producer {}", request.producer_id)));
        };
        if kind != request.rtp_capabilities.kind {
            return Err(EngineError::Rejected(format!(
                "capabilities for {} offered to a {kind} producer",
                request.rtp_capabilities.kind
            )));
        }

        let ssrc = state.allocate_ssrc();
        let rtx_ssrc = (kind == MediaKind::Video).then(|| state.allocate_ssrc());
        let id = ConsumerId::new(generate_handle_id());
        state.consumers.insert(
            id.clone(),
            ConsumerEntry {
                transport_id: transport.id.clone(),
                producer_id: request.producer_id.clone(),
            },
        );
        Ok(ConsumerHandle {
            id,
            producer_id: request.producer_id,
            kind,
            ssrc,
            rtx_ssrc,
        })
    }

    async fn close(&self, handle: &MediaHandle) -> EngineResult<()> {
        let mut state = self.state.lock();
        match handle {
            MediaHandle::Transport(id) => state.remove_transport(id),
            MediaHandle::Producer(id) => state.remove_producer(id),
            MediaHandle::Consumer(id) => {
                state.consumers.remove(id);
            }
        }
        Ok(())
    }
}
