//! Typed wire model for the relay `message` event.
//!
//! Every signaling message travels as one JSON envelope:
//! `{type, sid, to, roomType, payload}`, with `from` added by the relay on
//! inbound traffic. The payload shape depends on `type`, so it is modeled as
//! a tagged union and validated here, before anything reaches the state
//! machine.

use serde::{Deserialize, Serialize};

/// Kind of a session description.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description as carried on the wire and handed to the engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Sdp {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

/// A connectivity candidate, wire shape and engine shape alike.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CandidatePayload {
    pub candidate: CandidateInit,
}

/// Payload union, dispatched on the envelope `type` field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum MessageBody {
    Offer(Sdp),
    Answer(Sdp),
    Candidate(CandidatePayload),
}

impl MessageBody {
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Offer(_) => "offer",
            MessageBody::Answer(_) => "answer",
            MessageBody::Candidate(_) => "candidate",
        }
    }
}

/// One signaling message envelope.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SignalMessage {
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(default)]
    pub sid: String,
    /// Target peer id; empty when the target is not known yet.
    #[serde(default)]
    pub to: String,
    /// Sender peer id, filled in by the relay on inbound messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(rename = "roomType", default)]
    pub room_type: String,
}

impl SignalMessage {
    /// Builds a fresh outbound envelope. Messages are never stored; one is
    /// constructed per send.
    pub fn outbound(body: MessageBody, sid: String, to: String, room_type: String) -> Self {
        SignalMessage {
            body,
            sid,
            to,
            from: None,
            room_type,
        }
    }
}
