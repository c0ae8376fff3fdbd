//! Relay boundary: inbound event decoding and the outbound sender trait.
//!
//! The relay transport itself (socket lifecycle, reconnects, ack plumbing)
//! lives in the host process. The host decodes each named event with
//! [`RelayEvent::decode`] and pushes the result into the coordinator inbox;
//! malformed payloads are rejected here and never reach the state machine.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::SignalError;
use crate::ice::{IceServerKind, ServerAnnouncement};
use crate::message::SignalMessage;

/// Roster returned by the relay when acknowledging a `join` request.
///
/// `serde_json`'s map keeps keys ordered, so "first roster entry" is
/// deterministic.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct JoinAck {
    #[serde(default)]
    pub clients: serde_json::Map<String, Value>,
}

impl JoinAck {
    pub fn decode(data: Value) -> Result<Self, SignalError> {
        serde_json::from_value(data)
            .map_err(|e| SignalError::malformed("join", e.to_string()))
    }

    /// First peer id in the roster, if any.
    pub fn first_peer(&self) -> Option<&str> {
        self.clients.keys().next().map(String::as_str)
    }
}

/// One decoded inbound relay event.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// The relay connection is (re)established; the coordinator re-joins
    /// from scratch.
    Connected,
    /// Acknowledgment of the join request, with the current roster.
    JoinAck(JoinAck),
    /// A signaling message from the remote peer.
    Message(SignalMessage),
    /// A peer left the room.
    PeerRemoved { id: String },
    /// Assist-server announcement; `None` when the announced sequence was
    /// empty.
    AssistServers {
        kind: IceServerKind,
        server: Option<ServerAnnouncement>,
    },
}

impl RelayEvent {
    /// Decodes a named relay event. Returns `Ok(None)` for event names and
    /// message types this protocol does not know (they are ignored, not
    /// errors) and `Err` for payloads with a recognized type but the wrong
    /// shape.
    pub fn decode(event: &str, data: Value) -> Result<Option<RelayEvent>, SignalError> {
        match event {
            "message" => decode_message(data),
            "remove" => {
                #[derive(Deserialize)]
                struct Remove {
                    id: String,
                }
                let Remove { id } = serde_json::from_value(data)
                    .map_err(|e| SignalError::malformed("remove", e.to_string()))?;
                Ok(Some(RelayEvent::PeerRemoved { id }))
            }
            "stunservers" => decode_servers(IceServerKind::Stun, "stunservers", data),
            "turnservers" => decode_servers(IceServerKind::Turn, "turnservers", data),
            _ => Ok(None),
        }
    }
}

fn decode_message(data: Value) -> Result<Option<RelayEvent>, SignalError> {
    let kind = data.get("type").and_then(Value::as_str);
    match kind {
        Some("offer") | Some("answer") | Some("candidate") => {
            let msg: SignalMessage = serde_json::from_value(data)
                .map_err(|e| SignalError::malformed("message", e.to_string()))?;
            Ok(Some(RelayEvent::Message(msg)))
        }
        // Unknown message types are ignored without error.
        Some(_) => Ok(None),
        None => Err(SignalError::malformed("message", "missing `type` field")),
    }
}

fn decode_servers(
    kind: IceServerKind,
    event: &'static str,
    data: Value,
) -> Result<Option<RelayEvent>, SignalError> {
    let list: Vec<ServerAnnouncement> = serde_json::from_value(data)
        .map_err(|e| SignalError::malformed(event, e.to_string()))?;
    // Only the first announced server is consulted.
    Ok(Some(RelayEvent::AssistServers {
        kind,
        server: list.into_iter().next(),
    }))
}

/// Outbound side of the relay, implemented by the host transport.
#[async_trait]
pub trait SignalSender: Send + Sync {
    /// Emits a `join` event with the room name.
    async fn send_join(&self, room: &str) -> Result<(), SignalError>;

    /// Emits one `message` event with a signaling envelope.
    async fn send_message(&self, msg: &SignalMessage) -> Result<(), SignalError>;
}
