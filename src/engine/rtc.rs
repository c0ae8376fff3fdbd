//! Default negotiation engine over the `webrtc` crate.
//!
//! Device capture and rendering stay out of scope: the local stream is a
//! pair of placeholder sample tracks the host application feeds. Everything
//! the coordinator needs — offer/answer generation, description state,
//! trickle ICE in both directions — is real.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::config::CallConfig;
use crate::error::EngineError;
use crate::ice::IceServerEntry;
use crate::message::{CandidateInit, Sdp, SdpKind};
use crate::utils::random_id;

use super::{EngineEvent, EngineSession, NegotiationEngine, StreamInfo};

pub struct WebRtcEngine {
    api: API,
    fallback_stun: Vec<String>,
    local: Mutex<Option<LocalMedia>>,
}

struct LocalMedia {
    info: StreamInfo,
    tracks: Vec<Arc<TrackLocalStaticSample>>,
}

impl WebRtcEngine {
    pub fn new(config: &CallConfig) -> Result<Self, EngineError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        Ok(WebRtcEngine {
            api,
            fallback_stun: config.fallback_stun.clone(),
            local: Mutex::new(None),
        })
    }

    fn local_media(&self) -> LocalMediaSnapshot {
        let mut guard = self.local.lock().unwrap();
        let media = guard.get_or_insert_with(|| {
            let stream_id = format!("stream-{}", random_id());
            let audio = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    ..Default::default()
                },
                format!("audio-{}", random_id()),
                stream_id.clone(),
            ));
            let video = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
                format!("video-{}", random_id()),
                stream_id.clone(),
            ));
            LocalMedia {
                info: StreamInfo { id: stream_id },
                tracks: vec![audio, video],
            }
        });
        LocalMediaSnapshot {
            info: media.info.clone(),
            tracks: media.tracks.clone(),
        }
    }
}

struct LocalMediaSnapshot {
    info: StreamInfo,
    tracks: Vec<Arc<TrackLocalStaticSample>>,
}

#[async_trait]
impl NegotiationEngine for WebRtcEngine {
    async fn create_local_stream(&self) -> Result<StreamInfo, EngineError> {
        Ok(self.local_media().info)
    }

    async fn create_session(
        &self,
        epoch: u64,
        servers: Vec<IceServerEntry>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        let config = RTCConfiguration {
            ice_servers: ice_servers(&servers, &self.fallback_stun),
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(config).await?);

        let media = self.local_media();
        for track in &media.tracks {
            let track = Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>;
            let _ = pc.add_track(track).await?;
        }

        let candidate_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            if let Some(c) = cand {
                match c.to_json() {
                    Ok(init) => {
                        let candidate = CandidateInit {
                            candidate: init.candidate,
                            sdp_mline_index: init.sdp_mline_index,
                            sdp_mid: init.sdp_mid,
                        };
                        let _ = candidate_tx.send(EngineEvent::Candidate { epoch, candidate });
                    }
                    Err(e) => warn!(error = %e, "could not serialize local candidate"),
                }
            } else {
                debug!(epoch, "candidate gathering complete");
            }
            Box::pin(async {})
        }));

        // One remote stream per session: announce it on the first track.
        let announced = Arc::new(AtomicBool::new(false));
        let track_tx = events;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            let announced = Arc::clone(&announced);
            let stream = StreamInfo {
                id: track.stream_id(),
            };
            Box::pin(async move {
                if !announced.swap(true, Ordering::SeqCst) {
                    let _ = tx.send(EngineEvent::RemoteStream { epoch, stream });
                }
            })
        }));

        pc.on_peer_connection_state_change(Box::new(move |state| {
            debug!(epoch, ?state, "peer connection state changed");
            Box::pin(async {})
        }));

        Ok(Box::new(RtcSession {
            pc,
            pending: Mutex::new(Vec::new()),
        }))
    }
}

struct RtcSession {
    pc: Arc<RTCPeerConnection>,
    /// Remote candidates received before the remote description.
    pending: Mutex<Vec<CandidateInit>>,
}

impl RtcSession {
    async fn apply_candidate(&self, c: CandidateInit) -> Result<(), EngineError> {
        let init = RTCIceCandidateInit {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            ..Default::default()
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| EngineError::InvalidCandidate(e.to_string()))
    }
}

#[async_trait]
impl EngineSession for RtcSession {
    async fn create_offer(&self) -> Result<Sdp, EngineError> {
        let offer = self.pc.create_offer(None).await?;
        Ok(Sdp {
            kind: SdpKind::Offer,
            sdp: offer.sdp,
        })
    }

    async fn create_answer(&self) -> Result<Sdp, EngineError> {
        let answer = self.pc.create_answer(None).await?;
        Ok(Sdp {
            kind: SdpKind::Answer,
            sdp: answer.sdp,
        })
    }

    async fn set_local_description(&self, sdp: Sdp) -> Result<(), EngineError> {
        let desc = rtc_description(&sdp)?;
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(&self, sdp: Sdp) -> Result<(), EngineError> {
        let desc = rtc_description(&sdp)?;
        self.pc.set_remote_description(desc).await?;

        let queued: Vec<CandidateInit> = self.pending.lock().unwrap().drain(..).collect();
        for candidate in queued {
            if let Err(e) = self.apply_candidate(candidate).await {
                warn!(error = %e, "queued candidate was rejected");
            }
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<(), EngineError> {
        if self.pc.remote_description().await.is_some() {
            self.apply_candidate(candidate).await
        } else {
            debug!("remote description not set yet, queuing candidate");
            self.pending.lock().unwrap().push(candidate);
            Ok(())
        }
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "peer connection close failed");
        }
    }
}

fn rtc_description(sdp: &Sdp) -> Result<RTCSessionDescription, EngineError> {
    match sdp.kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp.sdp.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(sdp.sdp.clone()),
    }
    .map_err(|e| EngineError::InvalidSdp(e.to_string()))
}

fn ice_servers(entries: &[IceServerEntry], fallback: &[String]) -> Vec<RTCIceServer> {
    if entries.is_empty() {
        return vec![RTCIceServer {
            urls: fallback.to_vec(),
            username: String::new(),
            credential: String::new(),
        }];
    }
    entries
        .iter()
        .map(|e| RTCIceServer {
            urls: e.urls.clone(),
            username: e.username.clone().unwrap_or_default(),
            credential: e.credential.clone().unwrap_or_default(),
        })
        .collect()
}
