//! Mock peer connections.
//!
//! `MockConnection` follows the W3C signaling state machine closely enough
//! to exercise glare and duplicate answers: offers and answers are only
//! accepted in the states a browser would accept them in, and `rollback`
//! discards an outstanding offer.
//!
//! Every connection the factory creates is reachable through a
//! [`ConnectionProbe`] for inspection and for injecting connection events.
//!
//! # Example
//!
//! ```rust,ignore
//! use session_test_utils::MockConnectionFactory;
//!
//! let factory = MockConnectionFactory::builder()
//!     .manual_connect()
//!     .build();
//!
//! // ... drive a session ...
//! let probe = factory.probe(&"peer-1".into()).unwrap();
//! assert_eq!(probe.offers_created(), 1);
//! ```

use async_trait::async_trait;
use common::protocol::{IceCandidate, SdpKind, SessionDescription};
use common::types::SocketId;
use session_client::media::LocalMedia;
use session_client::peer::{
    ConnectionEventKind, ConnectionEventSender, ConnectionFactory, MediaConnection,
    SignalingState, TransportState,
};
use session_client::NegotiationError;
use std::sync::{Arc, Mutex};

/// Called with the peer id when a connection is closed.
pub type CloseHook = Arc<dyn Fn(&SocketId) + Send + Sync>;

#[derive(Default)]
struct FactorySettings {
    fail_create: bool,
    fail_offers: bool,
    fail_media: bool,
    fail_close: bool,
    manual_connect: bool,
    close_hook: Option<CloseHook>,
}

/// Factory of mock connections.
#[derive(Clone, Default)]
pub struct MockConnectionFactory {
    settings: Arc<Mutex<FactorySettings>>,
    created: Arc<Mutex<Vec<ConnectionProbe>>>,
}

impl MockConnectionFactory {
    /// Factory whose connections report `Connected` as soon as an answer
    /// is applied on either side.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builder() -> MockConnectionFactoryBuilder {
        MockConnectionFactoryBuilder::default()
    }

    /// Install a hook run at the start of every `close`.
    pub fn on_close(&self, hook: CloseHook) {
        self.settings.lock().unwrap().close_hook = Some(hook);
    }

    /// Most recent connection created for `peer_id`.
    #[must_use]
    pub fn probe(&self, peer_id: &SocketId) -> Option<ConnectionProbe> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|probe| probe.peer_id() == *peer_id)
            .cloned()
    }

    /// Every connection created, oldest first.
    #[must_use]
    pub fn probes(&self) -> Vec<ConnectionProbe> {
        self.created.lock().unwrap().clone()
    }

    /// Number of connections created.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn create(
        &self,
        peer_id: &SocketId,
        events: ConnectionEventSender,
    ) -> Result<Box<dyn MediaConnection>, NegotiationError> {
        let (fail_create, failures, manual_connect, close_hook) = {
            let settings = self.settings.lock().unwrap();
            (
                settings.fail_create,
                Failures {
                    offers: settings.fail_offers,
                    media: settings.fail_media,
                    close: settings.fail_close,
                },
                settings.manual_connect,
                settings.close_hook.clone(),
            )
        };
        if fail_create {
            return Err(NegotiationError::Backend("mock create failure".to_string()));
        }

        let probe = ConnectionProbe {
            inner: Arc::new(Mutex::new(ConnectionRecord::new(peer_id.clone()))),
            events,
        };
        self.created.lock().unwrap().push(probe.clone());

        Ok(Box::new(MockConnection {
            probe,
            failures,
            auto_connect: !manual_connect,
            close_hook,
        }))
    }
}

/// Builder for [`MockConnectionFactory`].
#[derive(Default)]
pub struct MockConnectionFactoryBuilder {
    settings: FactorySettings,
}

impl MockConnectionFactoryBuilder {
    /// Fail every `create`.
    #[must_use]
    pub fn fail_create(mut self) -> Self {
        self.settings.fail_create = true;
        self
    }

    /// Fail every `create_offer`.
    #[must_use]
    pub fn fail_offers(mut self) -> Self {
        self.settings.fail_offers = true;
        self
    }

    /// Fail every `add_local_media`.
    #[must_use]
    pub fn fail_media(mut self) -> Self {
        self.settings.fail_media = true;
        self
    }

    /// Report an error from every `close`, after closing.
    #[must_use]
    pub fn fail_close(mut self) -> Self {
        self.settings.fail_close = true;
        self
    }

    /// Never report `Connected` on its own; use [`ConnectionProbe::emit`].
    #[must_use]
    pub fn manual_connect(mut self) -> Self {
        self.settings.manual_connect = true;
        self
    }

    #[must_use]
    pub fn build(self) -> MockConnectionFactory {
        MockConnectionFactory {
            settings: Arc::new(Mutex::new(self.settings)),
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[derive(Debug)]
struct ConnectionRecord {
    peer_id: SocketId,
    signaling: SignalingState,
    local_media: Option<LocalMedia>,
    offers_created: usize,
    ice_restarts: usize,
    answers_created: usize,
    rollbacks: usize,
    remote_descriptions: Vec<SessionDescription>,
    local_descriptions: Vec<SessionDescription>,
    candidates: Vec<IceCandidate>,
    detached: bool,
    closed: bool,
}

impl ConnectionRecord {
    fn new(peer_id: SocketId) -> Self {
        Self {
            peer_id,
            signaling: SignalingState::Stable,
            local_media: None,
            offers_created: 0,
            ice_restarts: 0,
            answers_created: 0,
            rollbacks: 0,
            remote_descriptions: Vec::new(),
            local_descriptions: Vec::new(),
            candidates: Vec::new(),
            detached: false,
            closed: false,
        }
    }
}

/// Inspection handle for one mock connection.
#[derive(Clone)]
pub struct ConnectionProbe {
    inner: Arc<Mutex<ConnectionRecord>>,
    events: ConnectionEventSender,
}

impl ConnectionProbe {
    #[must_use]
    pub fn peer_id(&self) -> SocketId {
        self.inner.lock().unwrap().peer_id.clone()
    }

    #[must_use]
    pub fn link_id(&self) -> u64 {
        self.events.link_id()
    }

    #[must_use]
    pub fn signaling_state(&self) -> SignalingState {
        self.inner.lock().unwrap().signaling
    }

    #[must_use]
    pub fn local_media(&self) -> Option<LocalMedia> {
        self.inner.lock().unwrap().local_media.clone()
    }

    /// Offers created, ICE restarts included.
    #[must_use]
    pub fn offers_created(&self) -> usize {
        self.inner.lock().unwrap().offers_created
    }

    #[must_use]
    pub fn ice_restarts(&self) -> usize {
        self.inner.lock().unwrap().ice_restarts
    }

    #[must_use]
    pub fn answers_created(&self) -> usize {
        self.inner.lock().unwrap().answers_created
    }

    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.inner.lock().unwrap().rollbacks
    }

    /// Remote descriptions successfully applied.
    #[must_use]
    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.inner.lock().unwrap().remote_descriptions.clone()
    }

    /// Local descriptions successfully applied.
    #[must_use]
    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.inner.lock().unwrap().local_descriptions.clone()
    }

    #[must_use]
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.inner.lock().unwrap().candidates.clone()
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.inner.lock().unwrap().detached
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Report an event as the connection would. Returns false once the
    /// connection has been detached.
    pub fn emit(&self, kind: ConnectionEventKind) -> bool {
        self.events.emit(kind)
    }
}

#[derive(Clone, Copy)]
struct Failures {
    offers: bool,
    media: bool,
    close: bool,
}

struct MockConnection {
    probe: ConnectionProbe,
    failures: Failures,
    auto_connect: bool,
    close_hook: Option<CloseHook>,
}

impl MockConnection {
    fn invalid_state(action: &str, state: SignalingState) -> NegotiationError {
        NegotiationError::InvalidState(format!("cannot {action} in {state:?}"))
    }

    fn connected(&self) {
        if self.auto_connect {
            self.probe
                .emit(ConnectionEventKind::StateChanged(TransportState::Connected));
        }
    }
}

#[async_trait]
impl MediaConnection for MockConnection {
    async fn add_local_media(&self, media: &LocalMedia) -> Result<(), NegotiationError> {
        if self.failures.media {
            return Err(NegotiationError::Backend("mock media failure".to_string()));
        }
        self.probe.inner.lock().unwrap().local_media = Some(media.clone());
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, NegotiationError> {
        if self.failures.offers {
            return Err(NegotiationError::Description("mock offer failure".to_string()));
        }
        let mut record = self.probe.inner.lock().unwrap();
        match record.signaling {
            SignalingState::Stable | SignalingState::HaveLocalOffer => {}
            state => return Err(Self::invalid_state("create offer", state)),
        }
        record.offers_created += 1;
        if ice_restart {
            record.ice_restarts += 1;
        }
        Ok(SessionDescription::offer(format!(
            "mock-offer-{}-{}",
            record.peer_id, record.offers_created
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let mut record = self.probe.inner.lock().unwrap();
        if record.signaling != SignalingState::HaveRemoteOffer {
            return Err(Self::invalid_state("create answer", record.signaling));
        }
        record.answers_created += 1;
        Ok(SessionDescription::answer(format!(
            "mock-answer-{}-{}",
            record.peer_id, record.answers_created
        )))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let completed = {
            let mut record = self.probe.inner.lock().unwrap();
            let (next, completed) = match (description.kind, record.signaling) {
                (SdpKind::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                    (SignalingState::HaveLocalOffer, false)
                }
                (SdpKind::Answer, SignalingState::HaveRemoteOffer) => {
                    (SignalingState::Stable, true)
                }
                (_, state) => return Err(Self::invalid_state("apply local description", state)),
            };
            record.signaling = next;
            record.local_descriptions.push(description);
            completed
        };
        if completed {
            self.connected();
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let completed = {
            let mut record = self.probe.inner.lock().unwrap();
            let (next, completed) = match (description.kind, record.signaling) {
                (SdpKind::Offer, SignalingState::Stable | SignalingState::HaveRemoteOffer) => {
                    (SignalingState::HaveRemoteOffer, false)
                }
                (SdpKind::Answer, SignalingState::HaveLocalOffer) => {
                    (SignalingState::Stable, true)
                }
                (_, state) => return Err(Self::invalid_state("apply remote description", state)),
            };
            record.signaling = next;
            record.remote_descriptions.push(description);
            completed
        };
        if completed {
            self.connected();
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), NegotiationError> {
        let mut record = self.probe.inner.lock().unwrap();
        match record.signaling {
            SignalingState::HaveLocalOffer | SignalingState::HaveRemoteOffer => {
                record.signaling = SignalingState::Stable;
                record.rollbacks += 1;
                Ok(())
            }
            state => Err(Self::invalid_state("roll back", state)),
        }
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let mut record = self.probe.inner.lock().unwrap();
        if record.closed {
            return Err(NegotiationError::Candidate("connection closed".to_string()));
        }
        record.candidates.push(candidate);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.probe.signaling_state()
    }

    fn detach(&self) {
        self.probe.events.detach();
        self.probe.inner.lock().unwrap().detached = true;
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        if let Some(hook) = &self.close_hook {
            hook(&self.probe.peer_id());
        }
        // A detached connection's final state report goes nowhere
        self.probe
            .emit(ConnectionEventKind::StateChanged(TransportState::Closed));

        let mut record = self.probe.inner.lock().unwrap();
        record.signaling = SignalingState::Closed;
        record.closed = true;
        if self.failures.close {
            return Err(NegotiationError::Backend("mock close failure".to_string()));
        }
        Ok(())
    }
}
