use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Timestamp-based session id, generated when no sid has been established
/// yet. Not unique across rapid rejoin attempts; good enough to correlate
/// one negotiation exchange.
pub fn generate_sid() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

/// Prepends the protocol scheme to an assist-server URL if it is missing.
pub fn ensure_ice_url_scheme(url: &str, is_turn: bool) -> String {
    if url.starts_with("turn:") || url.starts_with("stun:") || url.starts_with("turns:") {
        url.to_owned()
    } else {
        let scheme = if is_turn { "turn:" } else { "stun:" };
        format!("{}{}", scheme, url)
    }
}
