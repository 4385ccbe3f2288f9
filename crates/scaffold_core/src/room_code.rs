//! Room codes: checksummed, human-shareable overlay network identities.
//!
//! A room code looks like `U/7RBQ-NETH-WMJ5-L22V`: the `U/` prefix followed
//! by four groups of four symbols from a 34-symbol alphabet (digits plus
//! upper-case letters without `I` and `O`). The first two groups name the
//! overlay network, the last two are its secret. The 16 symbols, read as a
//! base-34 number, must be divisible by 7.
//!
//! Generation takes an explicit random source so callers (and tests) decide
//! how codes are seeded.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};

use crate::error::CodeError;

/// The 34 symbols a room code may contain, in checksum order.
pub const ALPHABET: &[u8; 34] = b"0123456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Prefix every room code starts with.
pub const CODE_PREFIX: &str = "U/";

/// Prefix of the overlay network name derived from a room code.
pub const NETWORK_NAME_PREFIX: &str = "scaffolding-mc-";

/// Bound on whole-code attempts in [`RoomCode::generate`].
pub const MAX_GENERATE_ATTEMPTS: usize = 10_000;

/// Bound on first-three-group draws in [`RoomCode::generate_fast`].
pub const MAX_FAST_ATTEMPTS: usize = 1_000;

/// Bound on fourth-group draws per first-three-group draw.
pub const MAX_FOURTH_GROUP_ATTEMPTS: usize = 100;

const GROUP_LEN: usize = 4;
const BASE: i64 = 34;
const CHECKSUM_MODULUS: i64 = 7;

static ROOM_CODE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^U/([A-Z0-9]{4})-([A-Z0-9]{4})-([A-Z0-9]{4})-([A-Z0-9]{4})$")
        .expect("room code pattern compiles")
});

type Group = [u8; GROUP_LEN];

/// A validated room code. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode {
    groups: [Group; 4],
    full: String,
}

impl RoomCode {
    /// Return `true` if `text` is a well-formed room code with a zero checksum.
    pub fn validate(text: &str) -> bool {
        Self::parse(text).is_ok()
    }

    /// Parse and validate a room code.
    pub fn parse(text: &str) -> Result<Self, CodeError> {
        if text.is_empty() {
            return Err(CodeError::InvalidFormat("empty code".into()));
        }
        if !text.starts_with(CODE_PREFIX) {
            return Err(CodeError::InvalidFormat(format!(
                "missing {CODE_PREFIX} prefix"
            )));
        }

        let captures = ROOM_CODE_PATTERN.captures(text).ok_or_else(|| {
            CodeError::InvalidFormat("expected U/XXXX-XXXX-XXXX-XXXX".into())
        })?;

        let mut groups = [[0u8; GROUP_LEN]; 4];
        for (slot, group) in groups.iter_mut().enumerate() {
            let matched = captures
                .get(slot + 1)
                .map(|m| m.as_str())
                .unwrap_or_default();
            for (i, byte) in matched.bytes().enumerate() {
                if symbol_index(byte).is_none() {
                    return Err(CodeError::InvalidFormat(format!(
                        "symbol '{}' is not in the room code alphabet",
                        byte as char
                    )));
                }
                group[i] = byte;
            }
        }

        let symbols = concat_groups(&groups);
        if checksum(&symbols) != Some(0) {
            return Err(CodeError::InvalidFormat("checksum mismatch".into()));
        }

        Ok(Self::from_groups(groups))
    }

    /// Draw whole codes at random until one has a valid checksum.
    ///
    /// Roughly one draw in seven succeeds, so exhausting
    /// [`MAX_GENERATE_ATTEMPTS`] does not happen in practice.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Result<Self, CodeError> {
        for attempt in 1..=MAX_GENERATE_ATTEMPTS {
            let groups = [
                random_group(rng),
                random_group(rng),
                random_group(rng),
                random_group(rng),
            ];
            let candidate = Self::from_groups(groups);
            if Self::validate(&candidate.full) {
                debug!("Generated room code after {attempt} attempt(s)");
                return Ok(candidate);
            }
        }

        Err(CodeError::GenerationExhausted {
            attempts: MAX_GENERATE_ATTEMPTS,
        })
    }

    /// Draw the first three groups, then search only the fourth group for a
    /// valid checksum. Falls back to [`RoomCode::generate`] if the bounded
    /// search fails.
    pub fn generate_fast<R: Rng + ?Sized>(rng: &mut R) -> Result<Self, CodeError> {
        for attempt in 1..=MAX_FAST_ATTEMPTS {
            let head = [random_group(rng), random_group(rng), random_group(rng)];

            for _ in 0..MAX_FOURTH_GROUP_ATTEMPTS {
                let groups = [head[0], head[1], head[2], random_group(rng)];
                if checksum(&concat_groups(&groups)) == Some(0) {
                    debug!("Generated room code after {attempt} head draw(s)");
                    return Ok(Self::from_groups(groups));
                }
            }
        }

        warn!("Fast room code search exhausted, falling back to full random draws");
        Self::generate(rng)
    }

    /// Generate `count` codes with [`RoomCode::generate_fast`].
    pub fn generate_batch<R: Rng + ?Sized>(
        rng: &mut R,
        count: usize,
    ) -> Result<Vec<Self>, CodeError> {
        (0..count).map(|_| Self::generate_fast(rng)).collect()
    }

    /// The full textual code, e.g. `U/7RBQ-NETH-WMJ5-L22V`.
    pub fn full_code(&self) -> &str {
        &self.full
    }

    /// Groups one and two, dash-joined (`7RBQ-NETH`).
    pub fn n_part(&self) -> String {
        format!("{}-{}", group_str(&self.groups[0]), group_str(&self.groups[1]))
    }

    /// Groups three and four, dash-joined (`WMJ5-L22V`).
    pub fn s_part(&self) -> String {
        format!("{}-{}", group_str(&self.groups[2]), group_str(&self.groups[3]))
    }

    /// Overlay network name: `scaffolding-mc-<NPart>`.
    pub fn network_name(&self) -> String {
        format!("{NETWORK_NAME_PREFIX}{}", self.n_part())
    }

    /// Overlay network secret (the SPart).
    pub fn network_secret(&self) -> String {
        self.s_part()
    }

    /// The 16 checksummed symbols without prefix or separators.
    pub fn symbols(&self) -> String {
        concat_groups(&self.groups)
    }

    fn from_groups(groups: [Group; 4]) -> Self {
        let full = format!(
            "{CODE_PREFIX}{}-{}-{}-{}",
            group_str(&groups[0]),
            group_str(&groups[1]),
            group_str(&groups[2]),
            group_str(&groups[3]),
        );
        Self { groups, full }
    }
}

/// Base-34 checksum of `symbols`, modulo 7.
///
/// Symbols are weighted from the last one (weight 1) to the first. Total and
/// weight are both reduced modulo 7 whenever the next multiplication could
/// overflow an `i64`, which keeps the final residue unchanged. Returns `None`
/// if any symbol is outside [`ALPHABET`].
pub fn checksum(symbols: &str) -> Option<u8> {
    let bytes = symbols.as_bytes();
    let mut total: i64 = 0;
    let mut weight: i64 = 1;

    for i in (0..bytes.len()).rev() {
        let value = symbol_index(bytes[i])? as i64;
        total += value * weight;
        weight *= BASE;

        if weight > i64::MAX / BASE && i > 0 {
            total %= CHECKSUM_MODULUS;
            weight %= CHECKSUM_MODULUS;
        }
    }

    Some((total % CHECKSUM_MODULUS) as u8)
}

/// Position of `symbol` in [`ALPHABET`].
pub fn symbol_index(symbol: u8) -> Option<usize> {
    ALPHABET.iter().position(|&s| s == symbol)
}

fn random_group<R: Rng + ?Sized>(rng: &mut R) -> Group {
    let mut group = [0u8; GROUP_LEN];
    for slot in &mut group {
        *slot = ALPHABET[rng.random_range(0..ALPHABET.len())];
    }
    group
}

fn group_str(group: &Group) -> &str {
    // Groups only ever hold ALPHABET bytes, which are ASCII.
    std::str::from_utf8(group).unwrap_or_default()
}

fn concat_groups(groups: &[Group; 4]) -> String {
    groups.iter().map(group_str).collect()
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl FromStr for RoomCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RoomCode {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.full)
    }
}

impl<'de> Deserialize<'de> for RoomCode {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let text = String::deserialize(d)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
