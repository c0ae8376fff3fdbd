//! Session Coordinator.
//!
//! Owns the single active peer session and the negotiation state machine:
//!
//! ```text
//! Idle -> Joining -> Offering  -\
//!            |                   +-> Connected -> Idle
//!            \----> Answering  -/
//! ```
//!
//! All transitions are serialized: relay events and engine events funnel
//! into one task ([`SessionCoordinator::run`]) and each event is processed
//! to completion, engine awaits included, before the next one is taken.
//! Engine failures abandon the in-flight operation only; a later correct
//! message (typically a fresh offer) recovers the session.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::CallConfig;
use crate::engine::adapter::EnginePeer;
use crate::engine::{EngineEvent, NegotiationEngine};
use crate::error::{EngineError, SignalError};
use crate::ice::IceServerStore;
use crate::listener::CallListener;
use crate::message::{CandidateInit, CandidatePayload, MessageBody, Sdp, SdpKind, SignalMessage};
use crate::relay::{JoinAck, RelayEvent, SignalSender};
use crate::utils::generate_sid;

/// Negotiation progress of the active peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// No active session.
    Idle,
    /// Join request sent, awaiting the roster.
    Joining,
    /// Local offer sent, awaiting the answer.
    Offering,
    /// Remote offer received, producing the answer.
    Answering,
    /// Both descriptions set; candidates may still arrive.
    Connected,
}

/// The single active negotiation context.
struct PeerSession {
    peer_id: String,
    /// Echoed verbatim once received from the peer; generated on first use
    /// otherwise.
    sid: Option<String>,
}

/// Handle for pushing decoded relay events into the coordinator inbox.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<RelayEvent>,
}

impl CoordinatorHandle {
    /// Returns `false` when the coordinator has shut down.
    pub fn relay_event(&self, event: RelayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

pub struct SessionCoordinator {
    config: CallConfig,
    sender: Arc<dyn SignalSender>,
    listener: Arc<dyn CallListener>,
    peer: EnginePeer,
    servers: IceServerStore,
    state: NegotiationState,
    session: Option<PeerSession>,
    inbox: mpsc::UnboundedReceiver<RelayEvent>,
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl SessionCoordinator {
    pub fn new(
        config: CallConfig,
        engine: Arc<dyn NegotiationEngine>,
        sender: Arc<dyn SignalSender>,
        listener: Arc<dyn CallListener>,
    ) -> (Self, CoordinatorHandle) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let coordinator = SessionCoordinator {
            config,
            sender,
            listener,
            peer: EnginePeer::new(engine, engine_tx),
            servers: IceServerStore::default(),
            state: NegotiationState::Idle,
            session: None,
            inbox,
            engine_rx,
        };
        (coordinator, CoordinatorHandle { tx })
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.peer_id.as_str())
    }

    pub fn sid(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.sid.as_deref())
    }

    /// Drives the coordinator until the handle side is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                relay = self.inbox.recv() => match relay {
                    Some(event) => self.handle_relay_event(event).await,
                    None => break,
                },
                Some(event) = self.engine_rx.recv() => self.handle_engine_event(event).await,
            }
        }
    }

    /// Processes one decoded relay event.
    pub async fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected => self.on_connected().await,
            RelayEvent::JoinAck(ack) => self.on_join_ack(ack).await,
            RelayEvent::Message(msg) => {
                debug!(kind = msg.body.kind(), from = ?msg.from, "message received");
                match msg.body {
                    MessageBody::Offer(sdp) => match msg.from {
                        Some(from) => self.on_offer(from, msg.sid, sdp.sdp).await,
                        None => warn!("offer without a sender dropped"),
                    },
                    MessageBody::Answer(sdp) => self.on_answer(sdp.sdp).await,
                    MessageBody::Candidate(p) => self.on_candidate(p.candidate).await,
                }
            }
            RelayEvent::PeerRemoved { id } => self.on_remove(id).await,
            RelayEvent::AssistServers { kind, server } => match server {
                Some(announcement) => {
                    let entry = announcement.into_entry(kind);
                    info!(?kind, urls = ?entry.urls, "assist server updated");
                    self.servers.set(kind, entry);
                }
                None => debug!(?kind, "empty assist server announcement ignored"),
            },
        }
    }

    /// Processes one engine event. Events of a superseded engine session are
    /// discarded by their epoch.
    pub async fn handle_engine_event(&mut self, event: EngineEvent) {
        if !self.peer.is_current_epoch(event.epoch()) {
            debug!(epoch = event.epoch(), "event of a superseded session discarded");
            return;
        }
        match event {
            EngineEvent::Candidate { candidate, .. } => {
                // Outbound candidates are never batched.
                let msg = self.outbound(MessageBody::Candidate(CandidatePayload { candidate }));
                self.send(msg).await;
            }
            EngineEvent::RemoteStream { stream, .. } => {
                info!(stream = %stream.id, "remote stream added");
                self.listener.remote_stream_added(&stream);
            }
        }
    }

    /// Relay (re)connected: drop whatever was in flight and join the room
    /// from scratch.
    async fn on_connected(&mut self) {
        info!(room = %self.config.room, "relay connected, joining room");
        self.peer.reset().await;
        self.session = None;
        self.state = NegotiationState::Idle;

        match self.peer.ensure_local_stream().await {
            Ok(Some(stream)) => self.listener.local_stream_added(&stream),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "create_local_stream failed"),
        }

        match self.sender.send_join(&self.config.room).await {
            Ok(()) => self.state = NegotiationState::Joining,
            Err(e) => warn!(error = %e, "join request failed"),
        }
    }

    /// Roster received: with peers present, the first entry becomes the
    /// callee of our offer; an empty room means we wait as callee.
    async fn on_join_ack(&mut self, ack: JoinAck) {
        if self.state != NegotiationState::Joining {
            debug!(state = ?self.state, "join ack ignored");
            return;
        }
        let peer_id = match ack.first_peer() {
            Some(id) => id.to_string(),
            None => {
                info!("room is empty, waiting for a caller");
                return;
            }
        };

        info!(peer = %peer_id, "peer present, calling");
        self.session = Some(PeerSession {
            peer_id,
            sid: None,
        });
        match self.produce_offer().await {
            Ok(offer) => {
                self.state = NegotiationState::Offering;
                let msg = self.outbound(MessageBody::Offer(offer));
                self.send(msg).await;
            }
            Err(e) => warn!(error = %e, "offer abandoned"),
        }
    }

    /// A fresh offer always restarts negotiation as callee. An offer from a
    /// different peer while a session is active tears the old session down
    /// first; peer identity is never silently overwritten.
    async fn on_offer(&mut self, from: String, sid: String, sdp: String) {
        let other_peer = self
            .session
            .as_ref()
            .map(|s| s.peer_id != from)
            .unwrap_or(false);
        if other_peer && self.state != NegotiationState::Idle {
            info!(new_peer = %from, "offer from a different peer, restarting");
            self.peer.reset().await;
        }

        self.session = Some(PeerSession {
            peer_id: from.clone(),
            sid: if sid.is_empty() { None } else { Some(sid) },
        });
        self.state = NegotiationState::Answering;

        match self.produce_answer(sdp).await {
            Ok(answer) => {
                let msg = self.outbound(MessageBody::Answer(answer));
                self.send(msg).await;
                self.state = NegotiationState::Connected;
                info!(peer = %from, "answer sent, session connected");
            }
            Err(e) => warn!(error = %e, "answer abandoned"),
        }
    }

    /// An answer is only meaningful while we are offering; anything else is
    /// stale or duplicated.
    async fn on_answer(&mut self, sdp: String) {
        if self.state != NegotiationState::Offering {
            warn!(state = ?self.state, "answer ignored, not awaiting one");
            return;
        }
        let result = match self.peer.session() {
            Some(session) => {
                session
                    .set_remote_description(Sdp {
                        kind: SdpKind::Answer,
                        sdp,
                    })
                    .await
            }
            None => Err(EngineError::Session("no active engine session".into())),
        };
        match result {
            Ok(()) => {
                self.state = NegotiationState::Connected;
                info!("answer applied, session connected");
            }
            Err(e) => {
                warn!(error = %SignalError::engine("set_remote_description", e), "answer abandoned");
            }
        }
    }

    /// Candidates are accepted in every state but `Idle`; gathering is
    /// asynchronous and may outlive the description exchange in either
    /// direction. The engine session is created lazily so candidates that
    /// precede the offer are not lost.
    async fn on_candidate(&mut self, candidate: CandidateInit) {
        if self.state == NegotiationState::Idle {
            warn!("candidate dropped, no session in progress");
            return;
        }
        let servers = self.servers.servers();
        let result = match self.peer.ensure_session(servers).await {
            Ok(session) => session.add_remote_candidate(candidate).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(error = %SignalError::engine("add_remote_candidate", e), "candidate not applied");
        }
    }

    async fn on_remove(&mut self, id: String) {
        let is_current = self
            .session
            .as_ref()
            .map(|s| s.peer_id == id)
            .unwrap_or(false);
        if !is_current {
            debug!(peer = %id, "remove for another peer ignored");
            return;
        }
        info!(peer = %id, "peer removed, clearing session");
        self.peer.reset().await;
        self.session = None;
        self.state = NegotiationState::Idle;
    }

    async fn produce_offer(&mut self) -> Result<Sdp, SignalError> {
        let servers = self.servers.servers();
        let session = self
            .peer
            .ensure_session(servers)
            .await
            .map_err(|e| SignalError::engine("create_session", e))?;
        let offer = session
            .create_offer()
            .await
            .map_err(|e| SignalError::engine("create_offer", e))?;
        session
            .set_local_description(offer.clone())
            .await
            .map_err(|e| SignalError::engine("set_local_description", e))?;
        Ok(offer)
    }

    async fn produce_answer(&mut self, remote_sdp: String) -> Result<Sdp, SignalError> {
        let servers = self.servers.servers();
        let session = self
            .peer
            .ensure_session(servers)
            .await
            .map_err(|e| SignalError::engine("create_session", e))?;
        session
            .set_remote_description(Sdp {
                kind: SdpKind::Offer,
                sdp: remote_sdp,
            })
            .await
            .map_err(|e| SignalError::engine("set_remote_description", e))?;
        let answer = session
            .create_answer()
            .await
            .map_err(|e| SignalError::engine("create_answer", e))?;
        session
            .set_local_description(answer.clone())
            .await
            .map_err(|e| SignalError::engine("set_local_description", e))?;
        Ok(answer)
    }

    /// Builds a fresh envelope. The sid is the peer's when one was received,
    /// the stored generated one otherwise; `to` is empty while the target
    /// peer is unknown.
    fn outbound(&mut self, body: MessageBody) -> SignalMessage {
        let (sid, to) = match &mut self.session {
            Some(session) => (
                session.sid.get_or_insert_with(generate_sid).clone(),
                session.peer_id.clone(),
            ),
            None => (generate_sid(), String::new()),
        };
        SignalMessage::outbound(body, sid, to, self.config.room_type.clone())
    }

    async fn send(&self, msg: SignalMessage) {
        debug!(kind = msg.body.kind(), to = %msg.to, "sending message");
        if let Err(e) = self.sender.send_message(&msg).await {
            warn!(error = %e, "relay send failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::engine::{EngineSession, StreamInfo};
    use crate::ice::IceServerEntry;

    #[derive(Default)]
    struct EngineLog {
        streams_created: Mutex<u32>,
        sessions: Mutex<Vec<Vec<IceServerEntry>>>,
        local_descriptions: Mutex<Vec<Sdp>>,
        remote_descriptions: Mutex<Vec<Sdp>>,
        candidates: Mutex<Vec<CandidateInit>>,
        closed: Mutex<u32>,
        fail_offer: AtomicBool,
    }

    struct MockEngine {
        log: Arc<EngineLog>,
    }

    struct MockSession {
        log: Arc<EngineLog>,
    }

    #[async_trait]
    impl NegotiationEngine for MockEngine {
        async fn create_local_stream(&self) -> Result<StreamInfo, EngineError> {
            *self.log.streams_created.lock().unwrap() += 1;
            Ok(StreamInfo { id: "local-stream".into() })
        }

        async fn create_session(
            &self,
            _epoch: u64,
            servers: Vec<IceServerEntry>,
            _events: mpsc::UnboundedSender<EngineEvent>,
        ) -> Result<Box<dyn EngineSession>, EngineError> {
            self.log.sessions.lock().unwrap().push(servers);
            Ok(Box::new(MockSession {
                log: Arc::clone(&self.log),
            }))
        }
    }

    #[async_trait]
    impl EngineSession for MockSession {
        async fn create_offer(&self) -> Result<Sdp, EngineError> {
            if self.log.fail_offer.load(Ordering::SeqCst) {
                return Err(EngineError::Media("no capabilities".into()));
            }
            Ok(Sdp {
                kind: SdpKind::Offer,
                sdp: "local offer sdp".into(),
            })
        }

        async fn create_answer(&self) -> Result<Sdp, EngineError> {
            Ok(Sdp {
                kind: SdpKind::Answer,
                sdp: "local answer sdp".into(),
            })
        }

        async fn set_local_description(&self, sdp: Sdp) -> Result<(), EngineError> {
            self.log.local_descriptions.lock().unwrap().push(sdp);
            Ok(())
        }

        async fn set_remote_description(&self, sdp: Sdp) -> Result<(), EngineError> {
            self.log.remote_descriptions.lock().unwrap().push(sdp);
            Ok(())
        }

        async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<(), EngineError> {
            self.log.candidates.lock().unwrap().push(candidate);
            Ok(())
        }

        async fn close(&self) {
            *self.log.closed.lock().unwrap() += 1;
        }
    }

    #[derive(Default)]
    struct MockSender {
        joins: Mutex<Vec<String>>,
        messages: Mutex<Vec<SignalMessage>>,
    }

    #[async_trait]
    impl SignalSender for MockSender {
        async fn send_join(&self, room: &str) -> Result<(), SignalError> {
            self.joins.lock().unwrap().push(room.to_string());
            Ok(())
        }

        async fn send_message(&self, msg: &SignalMessage) -> Result<(), SignalError> {
            self.messages.lock().unwrap().push(msg.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockListener {
        local: Mutex<Vec<StreamInfo>>,
        remote: Mutex<Vec<StreamInfo>>,
    }

    impl CallListener for MockListener {
        fn local_stream_added(&self, stream: &StreamInfo) {
            self.local.lock().unwrap().push(stream.clone());
        }

        fn remote_stream_added(&self, stream: &StreamInfo) {
            self.remote.lock().unwrap().push(stream.clone());
        }
    }

    struct Fixture {
        coordinator: SessionCoordinator,
        log: Arc<EngineLog>,
        sender: Arc<MockSender>,
        listener: Arc<MockListener>,
    }

    fn fixture() -> Fixture {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let log = Arc::new(EngineLog::default());
        let sender = Arc::new(MockSender::default());
        let listener = Arc::new(MockListener::default());
        let engine = Arc::new(MockEngine {
            log: Arc::clone(&log),
        });
        let (coordinator, _handle) = SessionCoordinator::new(
            CallConfig::default(),
            engine,
            Arc::clone(&sender) as Arc<dyn SignalSender>,
            Arc::clone(&listener) as Arc<dyn CallListener>,
        );
        Fixture {
            coordinator,
            log,
            sender,
            listener,
        }
    }

    fn join_ack(clients: serde_json::Value) -> RelayEvent {
        RelayEvent::JoinAck(JoinAck::decode(json!({ "clients": clients })).unwrap())
    }

    fn inbound(msg: serde_json::Value) -> RelayEvent {
        match RelayEvent::decode("message", msg).unwrap() {
            Some(ev) => ev,
            None => panic!("test message was ignored"),
        }
    }

    fn offer_from(peer: &str, sid: &str) -> RelayEvent {
        inbound(json!({
            "type": "offer",
            "sid": sid,
            "from": peer,
            "payload": {"type": "offer", "sdp": "remote offer sdp"}
        }))
    }

    async fn established_as_callee(fx: &mut Fixture) {
        fx.coordinator.handle_relay_event(RelayEvent::Connected).await;
        fx.coordinator.handle_relay_event(offer_from("peerB", "s1")).await;
        assert_eq!(fx.coordinator.state(), NegotiationState::Connected);
    }

    #[tokio::test]
    async fn connect_creates_local_stream_and_joins() {
        let mut fx = fixture();
        fx.coordinator.handle_relay_event(RelayEvent::Connected).await;

        assert_eq!(fx.coordinator.state(), NegotiationState::Joining);
        assert_eq!(fx.sender.joins.lock().unwrap().as_slice(), ["lobby"]);
        assert_eq!(fx.listener.local.lock().unwrap().len(), 1);

        // Reconnect re-joins but the local stream is created once per
        // process and not announced again.
        fx.coordinator.handle_relay_event(RelayEvent::Connected).await;
        assert_eq!(*fx.log.streams_created.lock().unwrap(), 1);
        assert_eq!(fx.listener.local.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn join_ack_with_roster_sends_one_offer() {
        let mut fx = fixture();
        fx.coordinator.handle_relay_event(RelayEvent::Connected).await;
        fx.coordinator.handle_relay_event(join_ack(json!({"peerA": {}}))).await;

        assert_eq!(fx.coordinator.state(), NegotiationState::Offering);
        assert_eq!(fx.coordinator.peer_id(), Some("peerA"));

        let messages = fx.sender.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        let offer = &messages[0];
        assert_eq!(offer.to, "peerA");
        assert_eq!(offer.room_type, "video");
        assert!(!offer.sid.is_empty());
        match &offer.body {
            MessageBody::Offer(sdp) => assert_eq!(sdp.sdp, "local offer sdp"),
            other => panic!("expected offer, got {:?}", other),
        }

        // setLocalDescription completed before the message was sent.
        assert_eq!(fx.log.local_descriptions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_roster_waits_as_callee() {
        let mut fx = fixture();
        fx.coordinator.handle_relay_event(RelayEvent::Connected).await;
        fx.coordinator.handle_relay_event(join_ack(json!({}))).await;

        assert_eq!(fx.coordinator.state(), NegotiationState::Joining);
        assert!(fx.sender.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn engine_failure_abandons_the_offer_only() {
        let mut fx = fixture();
        fx.log.fail_offer.store(true, Ordering::SeqCst);
        fx.coordinator.handle_relay_event(RelayEvent::Connected).await;
        fx.coordinator.handle_relay_event(join_ack(json!({"peerA": {}}))).await;

        assert!(fx.sender.messages.lock().unwrap().is_empty());
        assert_eq!(fx.coordinator.state(), NegotiationState::Joining);

        // A fresh inbound offer still recovers the session.
        fx.coordinator.handle_relay_event(offer_from("peerA", "s9")).await;
        assert_eq!(fx.coordinator.state(), NegotiationState::Connected);
    }

    #[tokio::test]
    async fn inbound_offer_is_answered_with_echoed_sid() {
        let mut fx = fixture();
        fx.coordinator.handle_relay_event(RelayEvent::Connected).await;
        fx.coordinator.handle_relay_event(offer_from("peerB", "s1")).await;

        assert_eq!(fx.coordinator.state(), NegotiationState::Connected);
        assert_eq!(fx.coordinator.peer_id(), Some("peerB"));
        assert_eq!(fx.coordinator.sid(), Some("s1"));

        let remotes = fx.log.remote_descriptions.lock().unwrap();
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].kind, SdpKind::Offer);
        assert_eq!(remotes[0].sdp, "remote offer sdp");

        let messages = fx.sender.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sid, "s1");
        assert_eq!(messages[0].to, "peerB");
        assert!(matches!(messages[0].body, MessageBody::Answer(_)));
    }

    #[tokio::test]
    async fn answer_outside_offering_is_ignored() {
        let mut fx = fixture();
        fx.coordinator.handle_relay_event(RelayEvent::Connected).await;
        fx.coordinator
            .handle_relay_event(inbound(json!({
                "type": "answer",
                "sid": "s1",
                "payload": {"type": "answer", "sdp": "stale"}
            })))
            .await;

        assert_eq!(fx.coordinator.state(), NegotiationState::Joining);
        assert!(fx.log.remote_descriptions.lock().unwrap().is_empty());
        assert!(fx.sender.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn answer_while_offering_connects() {
        let mut fx = fixture();
        fx.coordinator.handle_relay_event(RelayEvent::Connected).await;
        fx.coordinator.handle_relay_event(join_ack(json!({"peerA": {}}))).await;
        fx.coordinator
            .handle_relay_event(inbound(json!({
                "type": "answer",
                "sid": "s1",
                "from": "peerA",
                "payload": {"type": "answer", "sdp": "remote answer sdp"}
            })))
            .await;

        assert_eq!(fx.coordinator.state(), NegotiationState::Connected);
        let remotes = fx.log.remote_descriptions.lock().unwrap();
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].kind, SdpKind::Answer);
    }

    #[tokio::test]
    async fn candidate_is_forwarded_exactly_once() {
        let mut fx = fixture();
        established_as_callee(&mut fx).await;

        fx.coordinator
            .handle_relay_event(inbound(json!({
                "type": "candidate",
                "sid": "s1",
                "from": "peerB",
                "payload": {"candidate": {
                    "candidate": "candidate:1 1 udp 2122 10.0.0.2 54321 typ host",
                    "sdpMLineIndex": 0,
                    "sdpMid": "audio"
                }}
            })))
            .await;

        let candidates = fx.log.candidates.lock().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].candidate,
            "candidate:1 1 udp 2122 10.0.0.2 54321 typ host"
        );
        assert_eq!(candidates[0].sdp_mline_index, Some(0));
        assert_eq!(candidates[0].sdp_mid.as_deref(), Some("audio"));
    }

    #[tokio::test]
    async fn candidate_before_offer_creates_the_session_lazily() {
        let mut fx = fixture();
        fx.coordinator.handle_relay_event(RelayEvent::Connected).await;
        fx.coordinator
            .handle_relay_event(inbound(json!({
                "type": "candidate",
                "sid": "s1",
                "from": "peerB",
                "payload": {"candidate": {"candidate": "c-early", "sdpMLineIndex": 0}}
            })))
            .await;

        assert_eq!(fx.log.sessions.lock().unwrap().len(), 1);
        assert_eq!(fx.log.candidates.lock().unwrap().len(), 1);

        // The offer that follows reuses the same engine session.
        fx.coordinator.handle_relay_event(offer_from("peerB", "s1")).await;
        assert_eq!(fx.log.sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn candidate_while_idle_is_dropped() {
        let mut fx = fixture();
        fx.coordinator
            .handle_relay_event(inbound(json!({
                "type": "candidate",
                "sid": "s1",
                "payload": {"candidate": {"candidate": "c1", "sdpMLineIndex": 0}}
            })))
            .await;

        assert_eq!(fx.coordinator.state(), NegotiationState::Idle);
        assert!(fx.log.sessions.lock().unwrap().is_empty());
        assert!(fx.log.candidates.lock().unwrap().is_empty());
        assert!(fx.sender.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_clears_the_session() {
        let mut fx = fixture();
        established_as_callee(&mut fx).await;

        fx.coordinator
            .handle_relay_event(RelayEvent::PeerRemoved { id: "peerB".into() })
            .await;

        assert_eq!(fx.coordinator.state(), NegotiationState::Idle);
        assert_eq!(fx.coordinator.peer_id(), None);
        assert_eq!(*fx.log.closed.lock().unwrap(), 1);

        // A late answer for the old session is now out of sequence.
        fx.coordinator
            .handle_relay_event(inbound(json!({
                "type": "answer",
                "sid": "s1",
                "payload": {"type": "answer", "sdp": "late"}
            })))
            .await;
        assert_eq!(fx.log.remote_descriptions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_of_another_peer_is_ignored() {
        let mut fx = fixture();
        established_as_callee(&mut fx).await;

        fx.coordinator
            .handle_relay_event(RelayEvent::PeerRemoved { id: "stranger".into() })
            .await;

        assert_eq!(fx.coordinator.state(), NegotiationState::Connected);
        assert_eq!(fx.coordinator.peer_id(), Some("peerB"));
        assert_eq!(*fx.log.closed.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn engine_candidate_is_sent_verbatim_with_session_sid() {
        let mut fx = fixture();
        established_as_callee(&mut fx).await;

        let candidate = CandidateInit {
            candidate: "candidate:9 1 udp 99 192.0.2.7 4242 typ srflx".into(),
            sdp_mline_index: Some(1),
            sdp_mid: Some("video".into()),
        };
        fx.coordinator
            .handle_engine_event(EngineEvent::Candidate {
                epoch: 1,
                candidate: candidate.clone(),
            })
            .await;

        let messages = fx.sender.messages.lock().unwrap();
        // [0] is the answer from establishment.
        assert_eq!(messages.len(), 2);
        let sent = &messages[1];
        assert_eq!(sent.sid, "s1");
        assert_eq!(sent.to, "peerB");
        match &sent.body {
            MessageBody::Candidate(p) => assert_eq!(p.candidate, candidate),
            other => panic!("expected candidate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stale_epoch_events_are_discarded() {
        let mut fx = fixture();
        established_as_callee(&mut fx).await;
        fx.coordinator
            .handle_relay_event(RelayEvent::PeerRemoved { id: "peerB".into() })
            .await;

        fx.coordinator
            .handle_engine_event(EngineEvent::Candidate {
                epoch: 1,
                candidate: CandidateInit {
                    candidate: "late".into(),
                    sdp_mline_index: Some(0),
                    sdp_mid: None,
                },
            })
            .await;
        fx.coordinator
            .handle_engine_event(EngineEvent::RemoteStream {
                epoch: 1,
                stream: StreamInfo { id: "ghost".into() },
            })
            .await;

        assert_eq!(fx.sender.messages.lock().unwrap().len(), 1);
        assert!(fx.listener.remote.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remote_stream_notifies_listener_without_state_change() {
        let mut fx = fixture();
        established_as_callee(&mut fx).await;

        fx.coordinator
            .handle_engine_event(EngineEvent::RemoteStream {
                epoch: 1,
                stream: StreamInfo { id: "remote-stream".into() },
            })
            .await;

        assert_eq!(fx.coordinator.state(), NegotiationState::Connected);
        let remote = fx.listener.remote.lock().unwrap();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].id, "remote-stream");
    }

    #[tokio::test]
    async fn announced_servers_reach_the_next_session_stun_first() {
        let mut fx = fixture();
        for (event, payload) in [
            ("turnservers", json!([{"urls": ["turn:relay.example.org"], "username": "u", "credential": "c"}])),
            ("stunservers", json!([{"urls": "stun:disco.example.org"}])),
        ] {
            let ev = RelayEvent::decode(event, payload).unwrap().unwrap();
            fx.coordinator.handle_relay_event(ev).await;
        }

        fx.coordinator.handle_relay_event(RelayEvent::Connected).await;
        fx.coordinator.handle_relay_event(join_ack(json!({"peerA": {}}))).await;

        let sessions = fx.log.sessions.lock().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].len(), 2);
        assert_eq!(sessions[0][0].urls, vec!["stun:disco.example.org"]);
        assert_eq!(sessions[0][1].urls, vec!["turn:relay.example.org"]);
        assert_eq!(sessions[0][1].username.as_deref(), Some("u"));
    }

    #[tokio::test]
    async fn offer_from_second_peer_tears_down_and_restarts() {
        let mut fx = fixture();
        established_as_callee(&mut fx).await;

        fx.coordinator.handle_relay_event(offer_from("peerC", "s2")).await;

        assert_eq!(*fx.log.closed.lock().unwrap(), 1);
        assert_eq!(fx.log.sessions.lock().unwrap().len(), 2);
        assert_eq!(fx.coordinator.peer_id(), Some("peerC"));
        assert_eq!(fx.coordinator.sid(), Some("s2"));
        assert_eq!(fx.coordinator.state(), NegotiationState::Connected);

        let messages = fx.sender.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].to, "peerC");
        assert_eq!(messages[1].sid, "s2");
    }

    #[tokio::test]
    async fn caller_sid_is_generated_once_and_reused() {
        let mut fx = fixture();
        fx.coordinator.handle_relay_event(RelayEvent::Connected).await;
        fx.coordinator.handle_relay_event(join_ack(json!({"peerA": {}}))).await;

        fx.coordinator
            .handle_engine_event(EngineEvent::Candidate {
                epoch: 1,
                candidate: CandidateInit {
                    candidate: "c1".into(),
                    sdp_mline_index: Some(0),
                    sdp_mid: None,
                },
            })
            .await;

        let messages = fx.sender.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(!messages[0].sid.is_empty());
        assert_eq!(messages[0].sid, messages[1].sid);
    }
}
