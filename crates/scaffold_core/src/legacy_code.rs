//! Legacy online codes: the base-36 `id z key z port` invitation format.
//!
//! Older clients shared a room as three integers written in a base-36
//! alphabet whose last symbol is `$` instead of `z`, so that `z` can act as
//! the separator. Decoding is case-insensitive.

use crate::error::CodeError;

/// Base-36 digits used by legacy codes; `z` is reserved as the separator.
pub const LEGACY_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxy$";

/// Separator between the three encoded numbers.
pub const LEGACY_SEPARATOR: char = 'z';

/// Prefix of the overlay network name used with legacy codes.
pub const LEGACY_NETWORK_PREFIX: &str = "round-studio-online-mc-";

/// The numbers carried by a legacy online code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyCode {
    pub room_id: u32,
    pub key: u32,
    pub port: u16,
}

impl LegacyCode {
    /// Encode as `<id>z<key>z<port>`.
    pub fn encode(&self) -> String {
        format!(
            "{}{LEGACY_SEPARATOR}{}{LEGACY_SEPARATOR}{}",
            to_base36(u64::from(self.room_id)),
            to_base36(u64::from(self.key)),
            to_base36(u64::from(self.port)),
        )
    }

    /// Decode a legacy code.
    pub fn decode(text: &str) -> Result<Self, CodeError> {
        let lowered = text.trim().to_ascii_lowercase();
        let parts: Vec<&str> = lowered.split(LEGACY_SEPARATOR).collect();
        let [id, key, port] = parts.as_slice() else {
            return Err(CodeError::InvalidLegacyCode(format!(
                "expected 3 parts, found {}",
                parts.len()
            )));
        };

        let room_id = narrow(from_base36(id)?, "room id")?;
        let key = narrow(from_base36(key)?, "key")?;
        let port = narrow(from_base36(port)?, "port")?;

        Ok(Self { room_id, key, port })
    }

    /// Overlay network name for this code.
    pub fn network_name(&self) -> String {
        format!("{LEGACY_NETWORK_PREFIX}{}", self.encode())
    }
}

/// Write `num` in the legacy base-36 alphabet.
pub fn to_base36(mut num: u64) -> String {
    if num == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while num > 0 {
        digits.push(LEGACY_ALPHABET[(num % 36) as usize]);
        num /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Read a legacy base-36 number. Case-insensitive.
pub fn from_base36(text: &str) -> Result<u64, CodeError> {
    if text.is_empty() {
        return Err(CodeError::InvalidLegacyCode("empty number".into()));
    }

    let mut value: u64 = 0;
    for byte in text.bytes() {
        let lower = byte.to_ascii_lowercase();
        let digit = LEGACY_ALPHABET
            .iter()
            .position(|&d| d == lower)
            .ok_or_else(|| {
                CodeError::InvalidLegacyCode(format!("unknown symbol '{}'", byte as char))
            })?;
        value = value
            .checked_mul(36)
            .and_then(|v| v.checked_add(digit as u64))
            .ok_or_else(|| CodeError::InvalidLegacyCode("number too large".into()))?;
    }
    Ok(value)
}

fn narrow<T: TryFrom<u64>>(value: u64, what: &str) -> Result<T, CodeError> {
    T::try_from(value)
        .map_err(|_| CodeError::InvalidLegacyCode(format!("{what} out of range: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base36_digits() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "$");
        assert_eq!(to_base36(36), "10");
        assert_eq!(from_base36("10").unwrap(), 36);
        assert_eq!(from_base36("$").unwrap(), 35);
    }

    #[test]
    fn test_encode_decode() {
        let code = LegacyCode {
            room_id: 12_345_678,
            key: 42,
            port: 25565,
        };
        let text = code.encode();
        assert_eq!(text.matches('z').count(), 2);
        assert_eq!(LegacyCode::decode(&text).unwrap(), code);
        assert_eq!(LegacyCode::decode(&text.to_uppercase()).unwrap(), code);
    }

    #[test]
    fn test_network_name() {
        let code = LegacyCode {
            room_id: 1,
            key: 2,
            port: 3,
        };
        assert_eq!(code.network_name(), "round-studio-online-mc-1z2z3");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(LegacyCode::decode("1z2").is_err());
        assert!(LegacyCode::decode("1z2z3z4").is_err());
        assert!(LegacyCode::decode("1z!z3").is_err());
        assert!(LegacyCode::decode("1zz3").is_err());
        // 36^4 = 1_679_616 does not fit in a port.
        assert!(LegacyCode::decode("1z1z10000").is_err());
    }
}
