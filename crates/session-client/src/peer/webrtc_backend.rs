//! `MediaConnection` backed by the `webrtc` crate.

use crate::errors::NegotiationError;
use crate::media::{LocalMedia, MediaTrack, RemoteStream, TrackKind};
use crate::peer::connection::{
    ConnectionEventKind, ConnectionEventSender, ConnectionFactory, MediaConnection,
    SignalingState, TransportState,
};
use async_trait::async_trait;
use common::protocol::{IceCandidate, SdpKind, SessionDescription};
use common::types::SocketId;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Builds one `RTCPeerConnection` per peer link from a shared API object.
pub struct WebRtcConnectionFactory {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcConnectionFactory {
    pub fn new(ice_servers: Vec<String>) -> Result<Self, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(backend_error)?;

        let api = APIBuilder::new().with_media_engine(media_engine).build();
        Ok(Self { api, ice_servers })
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ConnectionFactory for WebRtcConnectionFactory {
    async fn create(
        &self,
        peer_id: &SocketId,
        events: ConnectionEventSender,
    ) -> Result<Box<dyn MediaConnection>, NegotiationError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.configuration())
                .await
                .map_err(backend_error)?,
        );
        register_callbacks(&pc, &events);

        debug!(target: "client.peer", peer_id = %peer_id, "Peer connection created");
        Ok(Box::new(WebRtcConnection { pc, events }))
    }
}

fn register_callbacks(pc: &Arc<RTCPeerConnection>, events: &ConnectionEventSender) {
    let candidates = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = candidates.clone();
        Box::pin(async move {
            // None marks end of gathering
            let Some(candidate) = candidate else { return };
            match candidate.to_json() {
                Ok(init) => {
                    events.emit(ConnectionEventKind::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }));
                }
                Err(e) => {
                    warn!(target: "client.peer", error = %e, "Failed to encode local candidate");
                }
            }
        })
    }));

    let tracks = events.clone();
    let remote = Arc::new(Mutex::new(None::<RemoteStream>));
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let kind = match track.kind() {
                RTPCodecType::Video => TrackKind::Video,
                _ => TrackKind::Audio,
            };
            let media_track = MediaTrack {
                id: track.id(),
                kind,
            };
            let stream_id = track.stream_id();

            // Tracks of one stream arrive one callback at a time
            let stream = {
                let mut guard = remote.lock().unwrap_or_else(PoisonError::into_inner);
                let stream = match guard.take() {
                    Some(mut stream) if stream.stream_id == stream_id => {
                        stream.tracks.retain(|t| t.id != media_track.id);
                        stream.tracks.push(media_track);
                        stream
                    }
                    _ => RemoteStream {
                        stream_id,
                        tracks: vec![media_track],
                    },
                };
                *guard = Some(stream.clone());
                stream
            };

            let events = tracks.clone();
            Box::pin(async move {
                events.emit(ConnectionEventKind::RemoteTrack(stream));
            })
        },
    ));

    let states = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = states.clone();
        Box::pin(async move {
            let state = match state {
                RTCPeerConnectionState::Connecting => TransportState::Connecting,
                RTCPeerConnectionState::Connected => TransportState::Connected,
                RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
                RTCPeerConnectionState::Failed => TransportState::Failed,
                RTCPeerConnectionState::Closed => TransportState::Closed,
                _ => TransportState::New,
            };
            events.emit(ConnectionEventKind::StateChanged(state));
        })
    }));
}

struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    events: ConnectionEventSender,
}

#[async_trait]
impl MediaConnection for WebRtcConnection {
    async fn add_local_media(&self, media: &LocalMedia) -> Result<(), NegotiationError> {
        for track in &media.tracks {
            let mime_type = match track.kind {
                TrackKind::Audio => MIME_TYPE_OPUS,
                TrackKind::Video => MIME_TYPE_VP8,
            };
            let local = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_owned(),
                    ..Default::default()
                },
                track.id.clone(),
                media.stream_id.clone(),
            ));
            self.pc
                .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(backend_error)?;
        }
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, NegotiationError> {
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self
            .pc
            .create_offer(Some(options))
            .await
            .map_err(|e| NegotiationError::Description(e.to_string()))?;
        Ok(to_wire(&offer, SdpKind::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| NegotiationError::Description(e.to_string()))?;
        Ok(to_wire(&answer, SdpKind::Answer))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.pc
            .set_local_description(from_wire(description)?)
            .await
            .map_err(|e| NegotiationError::Description(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.pc
            .set_remote_description(from_wire(description)?)
            .await
            .map_err(|e| NegotiationError::Description(e.to_string()))
    }

    async fn rollback(&self) -> Result<(), NegotiationError> {
        let rollback: RTCSessionDescription =
            serde_json::from_value(serde_json::json!({ "type": "rollback", "sdp": "" }))
                .map_err(|e| NegotiationError::Description(e.to_string()))?;
        self.pc
            .set_local_description(rollback)
            .await
            .map_err(|e| NegotiationError::InvalidState(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| NegotiationError::Candidate(e.to_string()))
    }

    fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveLocalPranswer => {
                SignalingState::HaveLocalOffer
            }
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveRemotePranswer => {
                SignalingState::HaveRemoteOffer
            }
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }

    fn detach(&self) {
        self.events.detach();
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc.close().await.map_err(backend_error)
    }
}

fn to_wire(description: &RTCSessionDescription, kind: SdpKind) -> SessionDescription {
    SessionDescription {
        kind,
        sdp: description.sdp.clone(),
    }
}

fn from_wire(description: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    let converted = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
    };
    converted.map_err(|e| NegotiationError::Description(e.to_string()))
}

fn backend_error(e: webrtc::Error) -> NegotiationError {
    NegotiationError::Backend(e.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;

    #[test]
    fn test_rollback_description_parses() {
        let rollback: RTCSessionDescription =
            serde_json::from_value(serde_json::json!({ "type": "rollback", "sdp": "" })).unwrap();
        assert_eq!(rollback.sdp_type, RTCSdpType::Rollback);
    }

    #[test]
    fn test_factory_builds_with_and_without_ice_servers() {
        let factory = WebRtcConnectionFactory::new(Vec::new()).unwrap();
        assert!(factory.configuration().ice_servers.is_empty());

        let factory =
            WebRtcConnectionFactory::new(vec!["stun:stun.example.org:3478".to_string()]).unwrap();
        assert_eq!(factory.configuration().ice_servers.len(), 1);
    }
}
