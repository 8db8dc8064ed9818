//! Per-peer link state.

use crate::media::RemoteStream;
use crate::peer::connection::{ConnectionEventSender, MediaConnection, TransportState};
use common::types::SocketId;
use tokio::time::Instant;
use tracing::warn;

/// Negotiation progress of one peer link.
///
/// - Offering side: `New -> OfferSent -> AnswerApplied -> Stable`
/// - Answering side: `New -> HaveRemoteDescription -> AnswerApplied -> Stable`
/// - Offer glare and remote renegotiation re-enter `HaveRemoteDescription`;
///   a stall restart re-enters `OfferSent`.
///
/// Every non-`Closed` state may move to `Closed`; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    OfferSent,
    HaveRemoteDescription,
    AnswerApplied,
    Stable,
    Closed,
}

impl LinkState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LinkState::New => "new",
            LinkState::OfferSent => "offer_sent",
            LinkState::HaveRemoteDescription => "have_remote_description",
            LinkState::AnswerApplied => "answer_applied",
            LinkState::Stable => "stable",
            LinkState::Closed => "closed",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Closed)
    }

    #[must_use]
    pub fn can_transition_to(self, next: LinkState) -> bool {
        use LinkState::{AnswerApplied, Closed, HaveRemoteDescription, New, OfferSent, Stable};

        match (self, next) {
            (Closed, _) => false,
            (_, Closed)
            | (New | OfferSent | AnswerApplied, OfferSent)
            | (New | OfferSent | AnswerApplied | Stable, HaveRemoteDescription)
            | (OfferSent | HaveRemoteDescription, AnswerApplied)
            | (AnswerApplied, Stable) => true,
            _ => false,
        }
    }
}

/// Read-only view of a link for components outside the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerLinkView {
    pub peer_id: SocketId,
    pub remote_nickname: String,
    pub state: LinkState,
    pub is_offerer: bool,
    pub transport_state: TransportState,
    pub remote_stream: Option<RemoteStream>,
    pub renegotiation_attempts: u32,
}

/// One media link to a remote participant. Owned by `PeerLinkManager`.
pub(crate) struct PeerLink {
    pub(crate) peer_id: SocketId,
    pub(crate) remote_nickname: String,
    pub(crate) link_id: u64,
    pub(crate) connection: Box<dyn MediaConnection>,
    pub(crate) events: ConnectionEventSender,
    pub(crate) state: LinkState,
    /// Whether this side created the link as offerer.
    pub(crate) is_offerer: bool,
    pub(crate) transport_state: TransportState,
    pub(crate) remote_stream: Option<RemoteStream>,
    pub(crate) negotiation_started: Instant,
    pub(crate) renegotiation_attempts: u32,
    pub(crate) stall_reported: bool,
}

impl PeerLink {
    pub(crate) fn new(
        peer_id: SocketId,
        remote_nickname: String,
        link_id: u64,
        connection: Box<dyn MediaConnection>,
        events: ConnectionEventSender,
        is_offerer: bool,
    ) -> Self {
        Self {
            peer_id,
            remote_nickname,
            link_id,
            connection,
            events,
            state: LinkState::New,
            is_offerer,
            transport_state: TransportState::New,
            remote_stream: None,
            negotiation_started: Instant::now(),
            renegotiation_attempts: 0,
            stall_reported: false,
        }
    }

    /// Move to `next` if the table allows it. Refused moves keep the state.
    pub(crate) fn transition(&mut self, next: LinkState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                target: "client.peer",
                peer_id = %self.peer_id,
                from = self.state.as_str(),
                to = next.as_str(),
                "Refused link state transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    /// Restart the stall clock for a fresh negotiation round.
    pub(crate) fn begin_negotiation(&mut self) {
        self.negotiation_started = Instant::now();
        self.stall_reported = false;
    }

    pub(crate) fn view(&self) -> PeerLinkView {
        PeerLinkView {
            peer_id: self.peer_id.clone(),
            remote_nickname: self.remote_nickname.clone(),
            state: self.state,
            is_offerer: self.is_offerer,
            transport_state: self.transport_state,
            remote_stream: self.remote_stream.clone(),
            renegotiation_attempts: self.renegotiation_attempts,
        }
    }
}
