//! Negotiation Engine adapter.
//!
//! [`EnginePeer`] sits between the coordinator and a [`NegotiationEngine`]:
//! it creates the local stream once per process, creates the engine session
//! lazily from the assist-server snapshot it is handed, and tracks the
//! session epoch so stale engine results can be told apart from current
//! ones.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::EngineError;
use crate::ice::IceServerEntry;

use super::{EngineEvent, EngineSession, NegotiationEngine, StreamInfo};

pub struct EnginePeer {
    engine: Arc<dyn NegotiationEngine>,
    events: mpsc::UnboundedSender<EngineEvent>,
    local_stream: Option<StreamInfo>,
    session: Option<Box<dyn EngineSession>>,
    epoch: u64,
}

impl EnginePeer {
    pub fn new(
        engine: Arc<dyn NegotiationEngine>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        EnginePeer {
            engine,
            events,
            local_stream: None,
            session: None,
            epoch: 0,
        }
    }

    /// Creates the local stream on first call; later calls are no-ops.
    /// Returns the handle only when it was newly created, so the caller can
    /// notify the presentation listener exactly once.
    pub async fn ensure_local_stream(&mut self) -> Result<Option<StreamInfo>, EngineError> {
        if self.local_stream.is_some() {
            return Ok(None);
        }
        let stream = self.engine.create_local_stream().await?;
        self.local_stream = Some(stream.clone());
        Ok(Some(stream))
    }

    pub fn local_stream(&self) -> Option<&StreamInfo> {
        self.local_stream.as_ref()
    }

    /// Returns the current engine session, creating one from the given
    /// assist-server snapshot if none exists. Sessions already in progress
    /// are unaffected by later snapshot changes.
    pub async fn ensure_session(
        &mut self,
        servers: Vec<IceServerEntry>,
    ) -> Result<&dyn EngineSession, EngineError> {
        if self.session.is_none() {
            self.epoch += 1;
            debug!(epoch = self.epoch, servers = servers.len(), "creating engine session");
            let session = self
                .engine
                .create_session(self.epoch, servers, self.events.clone())
                .await?;
            self.session = Some(session);
        }
        match self.session.as_deref() {
            Some(s) => Ok(s),
            None => Err(EngineError::Session("session vanished during creation".into())),
        }
    }

    pub fn session(&self) -> Option<&dyn EngineSession> {
        self.session.as_deref()
    }

    /// True if `epoch` belongs to the currently active session.
    pub fn is_current_epoch(&self, epoch: u64) -> bool {
        self.session.is_some() && self.epoch == epoch
    }

    /// Tears down the active session, if any. The local stream survives; it
    /// is created once per process.
    pub async fn reset(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(epoch = self.epoch, "closing engine session");
            session.close().await;
        }
    }
}
