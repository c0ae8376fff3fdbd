//! Two-party call signaling coordinator.
//!
//! `peercall` negotiates a single bidirectional audio/video session between
//! exactly two participants in a shared room. It owns the signaling state
//! machine and the typed message routing; the relay transport, the media
//! engine and the presentation layer are collaborators injected through
//! traits.
//!
//! A host process wires it up like this: decode each inbound relay event
//! with [`relay::RelayEvent::decode`], push it through the
//! [`coordinator::CoordinatorHandle`], and let
//! [`coordinator::SessionCoordinator::run`] drive everything else —
//! outbound messages go through your [`relay::SignalSender`], media events
//! come back through your [`listener::CallListener`].

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod ice;
pub mod listener;
pub mod message;
pub mod relay;
pub mod utils;

pub use config::CallConfig;
pub use coordinator::{CoordinatorHandle, NegotiationState, SessionCoordinator};
pub use engine::rtc::WebRtcEngine;
pub use engine::{EngineEvent, EngineSession, NegotiationEngine, StreamInfo};
pub use error::{EngineError, SignalError};
pub use ice::{IceServerEntry, IceServerKind, IceServerStore};
pub use listener::CallListener;
pub use message::{CandidateInit, MessageBody, Sdp, SdpKind, SignalMessage};
pub use relay::{JoinAck, RelayEvent, SignalSender};
