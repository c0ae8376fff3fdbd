//! Negotiation engine abstraction.
//!
//! The media engine (capture, codecs, transport establishment) is an
//! external collaborator. The coordinator only ever talks to these traits;
//! [`rtc::WebRtcEngine`] is the default implementation and tests substitute
//! their own.

pub mod adapter;
pub mod rtc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::ice::IceServerEntry;
use crate::message::{CandidateInit, Sdp};

/// Opaque handle to a media stream. The presentation layer resolves it to
/// something renderable; this crate only tracks identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub id: String,
}

/// Push events from the engine toward the coordinator.
///
/// Every event carries the epoch of the engine session that produced it, so
/// results of a superseded session can be discarded instead of mutating a
/// session they no longer belong to.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A local connectivity candidate was discovered.
    Candidate { epoch: u64, candidate: CandidateInit },
    /// A remote media stream became available.
    RemoteStream { epoch: u64, stream: StreamInfo },
}

impl EngineEvent {
    pub fn epoch(&self) -> u64 {
        match self {
            EngineEvent::Candidate { epoch, .. } => *epoch,
            EngineEvent::RemoteStream { epoch, .. } => *epoch,
        }
    }
}

/// Factory side of the engine.
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    /// Acquires the local capture stream. Idempotent: the same handle is
    /// returned for the lifetime of the engine.
    async fn create_local_stream(&self) -> Result<StreamInfo, EngineError>;

    /// Creates one negotiation session using the given assist-server
    /// snapshot. Events produced by the session are tagged with `epoch` and
    /// pushed into `events`.
    async fn create_session(
        &self,
        epoch: u64,
        servers: Vec<IceServerEntry>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Box<dyn EngineSession>, EngineError>;
}

/// One live negotiation session. All operations may suspend awaiting the
/// underlying engine.
#[async_trait]
pub trait EngineSession: Send + Sync {
    async fn create_offer(&self) -> Result<Sdp, EngineError>;

    /// Valid only after a remote offer has been set.
    async fn create_answer(&self) -> Result<Sdp, EngineError>;

    async fn set_local_description(&self, sdp: Sdp) -> Result<(), EngineError>;

    async fn set_remote_description(&self, sdp: Sdp) -> Result<(), EngineError>;

    /// Best effort: the engine buffers candidates that arrive before the
    /// remote description is in place.
    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<(), EngineError>;

    async fn close(&self);
}
