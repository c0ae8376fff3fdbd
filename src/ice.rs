//! Relay Configuration Store.
//!
//! The relay announces assist servers (`stunservers` / `turnservers`) at its
//! own pace; each announcement replaces the descriptor for that kind. At most
//! one address-discovery and one relay descriptor are held, and only engine
//! sessions created after an update see the new set.

use serde::Deserialize;

use crate::utils::ensure_ice_url_scheme;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceServerKind {
    /// Address-discovery (STUN-like).
    Stun,
    /// Traffic relay with credentials (TURN-like).
    Turn,
}

/// One assist-server descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServerEntry {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// The `urls` field comes as either one string or a sequence of strings.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum UrlList {
    One(String),
    Many(Vec<String>),
}

/// Wire shape of one element of an assist-server announcement. Only the
/// first element of the announced sequence is consulted.
#[derive(Deserialize, Debug, Clone)]
pub struct ServerAnnouncement {
    pub urls: UrlList,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl ServerAnnouncement {
    pub fn into_entry(self, kind: IceServerKind) -> IceServerEntry {
        let is_turn = kind == IceServerKind::Turn;
        let urls = match self.urls {
            UrlList::One(u) => vec![ensure_ice_url_scheme(&u, is_turn)],
            UrlList::Many(us) => us
                .iter()
                .map(|u| ensure_ice_url_scheme(u, is_turn))
                .collect(),
        };
        IceServerEntry {
            urls,
            username: self.username,
            credential: self.credential,
        }
    }
}

/// Holds the currently known assist servers. Pure state replacement, no
/// error conditions.
#[derive(Debug, Default)]
pub struct IceServerStore {
    stun: Option<IceServerEntry>,
    turn: Option<IceServerEntry>,
}

impl IceServerStore {
    pub fn set(&mut self, kind: IceServerKind, entry: IceServerEntry) {
        match kind {
            IceServerKind::Stun => self.stun = Some(entry),
            IceServerKind::Turn => self.turn = Some(entry),
        }
    }

    /// Snapshot of the non-empty descriptors, address-discovery first.
    pub fn servers(&self) -> Vec<IceServerEntry> {
        [&self.stun, &self.turn]
            .into_iter()
            .filter_map(|s| s.clone())
            .collect()
    }
}
