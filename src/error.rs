use thiserror::Error;

/// Errors surfaced by the signaling layer.
///
/// None of these are fatal to the process: the coordinator logs them,
/// abandons the in-flight operation and keeps its current state.
#[derive(Error, Debug)]
pub enum SignalError {
    /// Inbound payload was missing a required field or had the wrong shape.
    #[error("malformed `{event}` payload: {reason}")]
    Malformed { event: String, reason: String },

    /// A negotiation engine operation failed.
    #[error("engine {op} failed: {source}")]
    Engine {
        op: &'static str,
        #[source]
        source: EngineError,
    },

    /// The relay refused or failed to send an event.
    #[error("relay send failed: {0}")]
    Transport(String),

    /// JSON decoding error at the relay boundary.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the negotiation engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    #[error("no media capabilities: {0}")]
    Media(String),

    #[error("engine session not available: {0}")]
    Session(String),
}

impl From<webrtc::Error> for EngineError {
    fn from(e: webrtc::Error) -> Self {
        EngineError::WebRtc(e.to_string())
    }
}

impl SignalError {
    /// Wraps an engine failure with the name of the operation that caused it.
    pub fn engine(op: &'static str, source: EngineError) -> Self {
        SignalError::Engine { op, source }
    }

    pub fn malformed(event: impl Into<String>, reason: impl Into<String>) -> Self {
        SignalError::Malformed {
            event: event.into(),
            reason: reason.into(),
        }
    }
}
