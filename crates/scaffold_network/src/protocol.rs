//! Protocol ids and capability sets.
//!
//! An id has the form `namespace:name`, both segments non-empty and made of
//! `[a-z0-9_]`. Capability lists travel NUL-separated.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::NetworkError;

pub const PING: &str = "c:ping";
pub const PROTOCOLS: &str = "c:protocols";
pub const SERVER_PORT: &str = "c:server_port";
pub const PLAYER_PING: &str = "c:player_ping";
pub const PLAYER_PROFILES_LIST: &str = "c:player_profiles_list";

/// Every protocol the built-in server answers.
pub const STANDARD_PROTOCOLS: [&str; 5] = [
    PING,
    PROTOCOLS,
    SERVER_PORT,
    PLAYER_PING,
    PLAYER_PROFILES_LIST,
];

/// Whether `id` is a well-formed protocol id.
pub fn is_valid_protocol(id: &str) -> bool {
    let mut parts = id.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(ns), Some(name), None) => is_valid_segment(ns) && is_valid_segment(name),
        _ => false,
    }
}

/// Like [`is_valid_protocol`] but returns an error naming the id.
pub fn validate_protocol(id: &str) -> Result<(), NetworkError> {
    if is_valid_protocol(id) {
        Ok(())
    } else {
        Err(NetworkError::ProtocolMalformed(id.to_string()))
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// An ordered set of protocol ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolSet {
    ids: BTreeSet<String>,
}

impl ProtocolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five reserved `c:` protocols.
    pub fn standard() -> Self {
        STANDARD_PROTOCOLS.iter().copied().collect()
    }

    /// Add `id` if it is well-formed. Returns whether it was newly inserted.
    pub fn insert(&mut self, id: impl Into<String>) -> Result<bool, NetworkError> {
        let id = id.into();
        validate_protocol(&id)?;
        Ok(self.ids.insert(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Protocols present in both sets.
    pub fn intersection(&self, other: &ProtocolSet) -> ProtocolSet {
        ProtocolSet {
            ids: self.ids.intersection(&other.ids).cloned().collect(),
        }
    }

    /// NUL-joined wire form.
    pub fn encode(&self) -> Vec<u8> {
        let joined: Vec<&str> = self.iter().collect();
        joined.join("\0").into_bytes()
    }

    /// Parse a NUL-joined list. Empty and malformed entries are skipped.
    pub fn decode(body: &[u8]) -> Self {
        String::from_utf8_lossy(body)
            .split('\0')
            .filter(|id| is_valid_protocol(id))
            .collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for ProtocolSet {
    /// Collects well-formed ids, dropping the rest.
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter
                .into_iter()
                .filter(|id| is_valid_protocol(id.as_ref()))
                .map(|id| id.as_ref().to_string())
                .collect(),
        }
    }
}

impl fmt::Display for ProtocolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "[{}]", joined.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        for id in STANDARD_PROTOCOLS {
            assert!(is_valid_protocol(id), "{id}");
        }
        assert!(is_valid_protocol("mod_x:sync_v2"));
    }

    #[test]
    fn test_invalid_ids() {
        for id in ["", "c", ":ping", "c:", "c:ping:x", "C:ping", "c:pi-ng", "c: ping", "c:pïng"] {
            assert!(!is_valid_protocol(id), "{id:?}");
        }
    }

    #[test]
    fn test_encode_decode() {
        let set = ProtocolSet::standard();
        let body = set.encode();
        assert_eq!(body.iter().filter(|&&b| b == 0).count(), 4);
        assert_eq!(ProtocolSet::decode(&body), set);
    }

    #[test]
    fn test_decode_skips_garbage() {
        let set = ProtocolSet::decode(b"c:ping\0\0NOT VALID\0x:y");
        assert_eq!(set.len(), 2);
        assert!(set.contains("c:ping"));
        assert!(set.contains("x:y"));
        assert!(ProtocolSet::decode(b"").is_empty());
    }

    #[test]
    fn test_intersection() {
        let ours: ProtocolSet = ["c:ping", "c:server_port", "m:extra"].into_iter().collect();
        let common = ours.intersection(&ProtocolSet::standard());
        assert_eq!(common.iter().collect::<Vec<_>>(), vec!["c:ping", "c:server_port"]);

        let disjoint: ProtocolSet = ["z:z"].into_iter().collect();
        assert!(disjoint.intersection(&ProtocolSet::standard()).is_empty());
    }

    #[test]
    fn test_insert_validates() {
        let mut set = ProtocolSet::new();
        assert!(set.insert("a:b").unwrap());
        assert!(!set.insert("a:b").unwrap());
        assert!(matches!(set.insert("bad"), Err(NetworkError::ProtocolMalformed(_))));
    }
}
