//! Peer link manager.
//!
//! Owns every `PeerLink` of a session, keyed by remote socket id. Links are
//! created lazily (by the roster on join, or by an offer from an unseen
//! peer) and never duplicated. Remote signaling is applied under the
//! signaling-state guards that make unordered relay delivery safe:
//!
//! - offer glare is settled by socket id: the side with the larger id is
//!   polite and rolls its offer back, the other keeps its offer and
//!   ignores the colliding one
//! - an answer is applied only while a local offer is outstanding
//! - candidates for unknown peers are dropped
//! - connection events from a previous link generation are ignored

use crate::errors::{ClientError, NegotiationError};
use crate::media::{LocalMedia, RemoteStream};
use crate::peer::connection::{
    ConnectionEvent, ConnectionEventKind, ConnectionEventSender, ConnectionFactory,
    SignalingState, TransportState,
};
use crate::peer::link::{LinkState, PeerLink, PeerLinkView};
use crate::relay::RelayTransport;
use common::protocol::{ClientMessage, IceCandidate, SdpKind, SessionDescription};
use common::types::SocketId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Link changes the session surfaces to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The peer's stream was reported (replacing any previous one).
    RemoteStream {
        peer_id: SocketId,
        stream: RemoteStream,
    },
    Connected {
        peer_id: SocketId,
    },
    TransportFailed {
        peer_id: SocketId,
    },
    /// An ICE-restart offer was sent for a stalled link.
    Renegotiated {
        peer_id: SocketId,
        attempt: u32,
    },
    /// Restart attempts are exhausted; the link is left as-is.
    Stalled {
        peer_id: SocketId,
        attempts: u32,
    },
}

pub struct PeerLinkManager {
    local_id: SocketId,
    local_media: LocalMedia,
    factory: Arc<dyn ConnectionFactory>,
    relay: Arc<dyn RelayTransport>,
    links: HashMap<SocketId, PeerLink>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    next_link_id: u64,
    stall_timeout: Duration,
    max_renegotiation_attempts: u32,
}

impl PeerLinkManager {
    /// Create a manager. The receiver yields every connection event of
    /// every link and belongs to the session's event loop.
    #[must_use]
    pub fn new(
        local_id: SocketId,
        local_media: LocalMedia,
        factory: Arc<dyn ConnectionFactory>,
        relay: Arc<dyn RelayTransport>,
        stall_timeout: Duration,
        max_renegotiation_attempts: u32,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            local_id,
            local_media,
            factory,
            relay,
            links: HashMap::new(),
            events_tx,
            next_link_id: 0,
            stall_timeout,
            max_renegotiation_attempts,
        };
        (manager, events_rx)
    }

    #[must_use]
    pub fn local_id(&self) -> &SocketId {
        &self.local_id
    }

    /// Create the link to `peer_id`, sending an offer if `is_offerer`.
    ///
    /// Idempotent: an existing link is returned unchanged and no offer is
    /// sent. If the offer fails the link is kept in its last good state.
    pub async fn create_peer_link(
        &mut self,
        peer_id: &SocketId,
        nickname: &str,
        is_offerer: bool,
    ) -> Result<PeerLinkView, ClientError> {
        if let Some(link) = self.links.get(peer_id) {
            debug!(
                target: "client.peer",
                peer_id = %peer_id,
                state = link.state.as_str(),
                "Peer link already exists"
            );
            return Ok(link.view());
        }

        if peer_id == &self.local_id {
            return Err(ClientError::Protocol("cannot link to self".to_string()));
        }

        self.insert_link(peer_id, nickname, is_offerer).await?;

        if is_offerer {
            self.send_offer(peer_id, false).await?;
        }

        self.get(peer_id)
            .ok_or_else(|| ClientError::Protocol(format!("link to {peer_id} vanished")))
    }

    /// Apply a remote offer and answer it.
    pub async fn handle_remote_offer(
        &mut self,
        sender_id: &SocketId,
        nickname: &str,
        description: SessionDescription,
    ) -> Result<(), ClientError> {
        if description.kind != SdpKind::Offer {
            return Err(ClientError::Protocol("offer carried an answer".to_string()));
        }

        if !self.links.contains_key(sender_id) {
            self.insert_link(sender_id, nickname, false).await?;
        }
        let Some(link) = self.links.get_mut(sender_id) else {
            return Ok(());
        };

        if link.connection.signaling_state() == SignalingState::HaveLocalOffer {
            if !is_polite(&self.local_id, sender_id) {
                info!(
                    target: "client.peer",
                    peer_id = %sender_id,
                    "Offer glare, keeping local offer"
                );
                return Ok(());
            }
            info!(
                target: "client.peer",
                peer_id = %sender_id,
                "Offer glare, rolling back local offer"
            );
            link.connection
                .rollback()
                .await
                .map_err(|e| negotiation_failed(sender_id, "rollback", e))?;
            link.is_offerer = false;
        }

        link.connection
            .set_remote_description(description)
            .await
            .map_err(|e| negotiation_failed(sender_id, "apply remote offer", e))?;
        link.transition(LinkState::HaveRemoteDescription);
        link.begin_negotiation();

        let answer = link
            .connection
            .create_answer()
            .await
            .map_err(|e| negotiation_failed(sender_id, "create answer", e))?;
        link.connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| negotiation_failed(sender_id, "apply local answer", e))?;

        self.relay
            .send(ClientMessage::Answer {
                target_id: sender_id.clone(),
                description: answer,
            })
            .await?;

        link.transition(LinkState::AnswerApplied);
        settle(link);

        debug!(
            target: "client.peer",
            peer_id = %sender_id,
            state = link.state.as_str(),
            "Answered remote offer"
        );
        Ok(())
    }

    /// Apply a remote answer. Answers arriving when no local offer is
    /// outstanding are duplicates or late and are discarded.
    pub async fn handle_remote_answer(
        &mut self,
        sender_id: &SocketId,
        description: SessionDescription,
    ) -> Result<(), ClientError> {
        let Some(link) = self.links.get_mut(sender_id) else {
            debug!(
                target: "client.peer",
                peer_id = %sender_id,
                "Answer for unknown peer dropped"
            );
            return Ok(());
        };

        let signaling = link.connection.signaling_state();
        if signaling != SignalingState::HaveLocalOffer {
            debug!(
                target: "client.peer",
                peer_id = %sender_id,
                state = link.state.as_str(),
                signaling = ?signaling,
                "Answer discarded, negotiation already settled"
            );
            return Ok(());
        }

        link.connection
            .set_remote_description(description)
            .await
            .map_err(|e| negotiation_failed(sender_id, "apply remote answer", e))?;
        link.transition(LinkState::AnswerApplied);
        settle(link);
        Ok(())
    }

    /// Add a remote candidate. Unknown peers are a benign drop.
    pub async fn handle_remote_candidate(
        &mut self,
        sender_id: &SocketId,
        candidate: IceCandidate,
    ) -> Result<(), ClientError> {
        let Some(link) = self.links.get(sender_id) else {
            debug!(
                target: "client.peer",
                peer_id = %sender_id,
                "Candidate for unknown peer dropped"
            );
            return Ok(());
        };

        link.connection
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| negotiation_failed(sender_id, "add candidate", e))
    }

    /// Apply an event reported by a connection.
    pub async fn handle_connection_event(&mut self, event: ConnectionEvent) -> Option<LinkEvent> {
        let Some(link) = self.links.get_mut(&event.peer_id) else {
            debug!(
                target: "client.peer",
                peer_id = %event.peer_id,
                "Connection event for closed link ignored"
            );
            return None;
        };

        if link.link_id != event.link_id || link.state.is_terminal() {
            debug!(
                target: "client.peer",
                peer_id = %event.peer_id,
                link_id = event.link_id,
                current_link_id = link.link_id,
                "Stale connection event ignored"
            );
            return None;
        }

        match event.kind {
            ConnectionEventKind::LocalCandidate(candidate) => {
                if let Err(e) = self
                    .relay
                    .send(ClientMessage::Candidate {
                        target_id: event.peer_id.clone(),
                        candidate,
                    })
                    .await
                {
                    warn!(
                        target: "client.peer",
                        peer_id = %event.peer_id,
                        error = %e,
                        "Failed to send local candidate"
                    );
                }
                None
            }
            ConnectionEventKind::RemoteTrack(stream) => {
                link.remote_stream = Some(stream.clone());
                Some(LinkEvent::RemoteStream {
                    peer_id: event.peer_id,
                    stream,
                })
            }
            ConnectionEventKind::StateChanged(state) => {
                link.transport_state = state;
                debug!(
                    target: "client.peer",
                    peer_id = %event.peer_id,
                    transport = state.as_str(),
                    link_state = link.state.as_str(),
                    "Transport state changed"
                );
                match state {
                    TransportState::Connected => {
                        settle(link);
                        Some(LinkEvent::Connected {
                            peer_id: event.peer_id,
                        })
                    }
                    TransportState::Failed => Some(LinkEvent::TransportFailed {
                        peer_id: event.peer_id,
                    }),
                    _ => None,
                }
            }
        }
    }

    /// Close and remove the link to `peer_id`. Callbacks are detached
    /// before the connection is closed. Returns false if there was none.
    pub async fn close_peer_link(&mut self, peer_id: &SocketId) -> bool {
        let Some(link) = self.links.get_mut(peer_id) else {
            return false;
        };

        link.events.detach();
        link.connection.detach();
        if let Err(e) = link.connection.close().await {
            debug!(
                target: "client.peer",
                peer_id = %peer_id,
                error = %e,
                "Connection close reported an error"
            );
        }
        link.transition(LinkState::Closed);
        self.links.remove(peer_id);

        info!(
            target: "client.peer",
            peer_id = %peer_id,
            remaining = self.links.len(),
            "Peer link closed"
        );
        true
    }

    /// Close every link. Returns how many were closed.
    pub async fn close_all(&mut self) -> usize {
        let peers: Vec<SocketId> = self.links.keys().cloned().collect();
        let mut closed = 0;
        for peer_id in peers {
            if self.close_peer_link(&peer_id).await {
                closed += 1;
            }
        }
        closed
    }

    /// Re-offer stalled links this side offered, within the attempt budget.
    ///
    /// Links this side answered are left to the remote offerer.
    pub async fn check_stalls(&mut self) -> Vec<LinkEvent> {
        let now = Instant::now();
        let stalled: Vec<SocketId> = self
            .links
            .values()
            .filter(|link| {
                !matches!(link.state, LinkState::Stable | LinkState::Closed)
                    && now.duration_since(link.negotiation_started) >= self.stall_timeout
            })
            .map(|link| link.peer_id.clone())
            .collect();

        let mut events = Vec::new();
        for peer_id in stalled {
            let Some(link) = self.links.get_mut(&peer_id) else {
                continue;
            };

            if !link.is_offerer || !link.state.can_transition_to(LinkState::OfferSent) {
                debug!(
                    target: "client.peer",
                    peer_id = %peer_id,
                    state = link.state.as_str(),
                    "Stalled link left to remote offerer"
                );
                continue;
            }

            if link.renegotiation_attempts >= self.max_renegotiation_attempts {
                if !link.stall_reported {
                    link.stall_reported = true;
                    warn!(
                        target: "client.peer",
                        peer_id = %peer_id,
                        attempts = link.renegotiation_attempts,
                        state = link.state.as_str(),
                        "Negotiation stalled, giving up"
                    );
                    events.push(LinkEvent::Stalled {
                        peer_id: peer_id.clone(),
                        attempts: link.renegotiation_attempts,
                    });
                }
                continue;
            }

            link.renegotiation_attempts += 1;
            let attempt = link.renegotiation_attempts;
            info!(
                target: "client.peer",
                peer_id = %peer_id,
                attempt = attempt,
                "Negotiation stalled, sending ICE restart offer"
            );

            if self.send_offer(&peer_id, true).await.is_ok() {
                events.push(LinkEvent::Renegotiated { peer_id, attempt });
            }
        }
        events
    }

    #[must_use]
    pub fn get(&self, peer_id: &SocketId) -> Option<PeerLinkView> {
        self.links.get(peer_id).map(PeerLink::view)
    }

    /// Views of every link, ordered by peer id.
    #[must_use]
    pub fn views(&self) -> Vec<PeerLinkView> {
        let mut views: Vec<PeerLinkView> = self.links.values().map(PeerLink::view).collect();
        views.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        views
    }

    #[must_use]
    pub fn contains(&self, peer_id: &SocketId) -> bool {
        self.links.contains_key(peer_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    async fn insert_link(
        &mut self,
        peer_id: &SocketId,
        nickname: &str,
        is_offerer: bool,
    ) -> Result<(), ClientError> {
        let link_id = self.next_link_id;
        self.next_link_id += 1;

        let events = ConnectionEventSender::new(peer_id.clone(), link_id, self.events_tx.clone());
        let connection = self
            .factory
            .create(peer_id, events.clone())
            .await
            .map_err(|e| negotiation_failed(peer_id, "create connection", e))?;

        if let Err(e) = connection.add_local_media(&self.local_media).await {
            events.detach();
            connection.detach();
            if let Err(close_err) = connection.close().await {
                debug!(
                    target: "client.peer",
                    peer_id = %peer_id,
                    error = %close_err,
                    "Connection close reported an error"
                );
            }
            return Err(negotiation_failed(peer_id, "attach local media", e));
        }

        self.links.insert(
            peer_id.clone(),
            PeerLink::new(
                peer_id.clone(),
                nickname.to_string(),
                link_id,
                connection,
                events,
                is_offerer,
            ),
        );

        info!(
            target: "client.peer",
            peer_id = %peer_id,
            link_id = link_id,
            is_offerer = is_offerer,
            total_links = self.links.len(),
            "Peer link created"
        );
        Ok(())
    }

    async fn send_offer(&mut self, peer_id: &SocketId, ice_restart: bool) -> Result<(), ClientError> {
        let Some(link) = self.links.get_mut(peer_id) else {
            return Ok(());
        };

        let offer = link
            .connection
            .create_offer(ice_restart)
            .await
            .map_err(|e| negotiation_failed(peer_id, "create offer", e))?;
        link.connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| negotiation_failed(peer_id, "apply local offer", e))?;

        self.relay
            .send(ClientMessage::Offer {
                target_id: peer_id.clone(),
                description: offer,
            })
            .await?;

        link.transition(LinkState::OfferSent);
        link.begin_negotiation();

        debug!(
            target: "client.peer",
            peer_id = %peer_id,
            ice_restart = ice_restart,
            "Offer sent"
        );
        Ok(())
    }
}

/// Promote an answered link to `Stable` once its transport is connected.
fn settle(link: &mut PeerLink) {
    if link.state == LinkState::AnswerApplied && link.transport_state == TransportState::Connected {
        link.transition(LinkState::Stable);
    }
}

/// During offer glare the side with the larger socket id yields.
fn is_polite(local_id: &SocketId, remote_id: &SocketId) -> bool {
    local_id > remote_id
}

fn negotiation_failed(peer_id: &SocketId, stage: &'static str, source: NegotiationError) -> ClientError {
    warn!(
        target: "client.peer",
        peer_id = %peer_id,
        stage = stage,
        error = %source,
        "Negotiation step failed, link keeps its last state"
    );
    ClientError::negotiation(peer_id, source)
}
