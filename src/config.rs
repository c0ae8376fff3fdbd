use serde::Deserialize;

/// Call configuration supplied by the host process.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CallConfig {
    /// Room to join on relay connect.
    pub room: String,
    /// `roomType` field stamped on every outbound message.
    pub room_type: String,
    /// STUN urls used by the default engine while the relay has not
    /// announced any assist servers yet.
    pub fallback_stun: Vec<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        CallConfig {
            room: "lobby".into(),
            room_type: "video".into(),
            fallback_stun: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:stun1.l.google.com:19302".into(),
            ],
        }
    }
}
