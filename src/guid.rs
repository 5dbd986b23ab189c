//! GlobalId helpers.
//!
//! IFC stores a UUID as a 22-character string over a 64-symbol alphabet: the
//! first character carries the top two bits, each following one six bits.

use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

const ALPHABET: &[u8; 64] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_$";

/// Length of a compressed GlobalId.
pub const GUID_LEN: usize = 22;

fn guid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-3][0-9A-Za-z_$]{21}$").expect("static pattern"))
}

/// A fresh random GlobalId.
#[must_use]
pub fn new_guid() -> String {
    compress(Uuid::new_v4())
}

/// Encodes a UUID in the 22-character form.
#[must_use]
pub fn compress(uuid: Uuid) -> String {
    let n = uuid.as_u128();
    let mut out = String::with_capacity(GUID_LEN);
    out.push(char::from(ALPHABET[(n >> 126) as usize]));
    for i in 1..GUID_LEN {
        let shift = 6 * (GUID_LEN - 1 - i);
        out.push(char::from(ALPHABET[((n >> shift) & 0x3f) as usize]));
    }
    out
}

/// Decodes a 22-character GlobalId. Returns `None` if it is not well formed.
#[must_use]
pub fn expand(guid: &str) -> Option<Uuid> {
    if !is_valid(guid) {
        return None;
    }
    let mut n: u128 = 0;
    for b in guid.bytes() {
        let digit = ALPHABET.iter().position(|&a| a == b)?;
        n = (n << 6) | digit as u128;
    }
    Some(Uuid::from_u128(n))
}

/// Whether `guid` has the shape of a compressed GlobalId.
#[must_use]
pub fn is_valid(guid: &str) -> bool {
    guid_pattern().is_match(guid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        let uuid = Uuid::parse_str("00000000-0000-0000-0000-000000000000").unwrap();
        assert_eq!(compress(uuid), "0000000000000000000000");

        let max = Uuid::from_u128(u128::MAX);
        assert_eq!(compress(max), "3$$$$$$$$$$$$$$$$$$$$$");
    }

    #[test]
    fn compress_expand_agree() {
        let uuid = Uuid::new_v4();
        let guid = compress(uuid);
        assert_eq!(guid.len(), GUID_LEN);
        assert_eq!(expand(&guid), Some(uuid));
    }

    #[test]
    fn malformed_guids_are_rejected() {
        assert!(expand("too-short").is_none());
        assert!(expand("4000000000000000000000").is_none());
        assert!(!is_valid("000000000000000000000!"));
        assert!(is_valid(&new_guid()));
    }
}
