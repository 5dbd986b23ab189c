//! Binary framing for stored records.
//!
//! Every record value is serialized with:
//! - JSON for data (reuses the serde derives on the record types)
//! - Length prefix for framing
//! - CRC32 checksum for corruption detection
//! - Version byte for forward compatibility

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Current codec version.
pub const CODEC_VERSION: u8 = 1;

/// Reject entries claiming more than this many payload bytes.
const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 1 + 4;
const TRAILER_LEN: usize = 4;

/// Why a stored value could not be decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported codec version {found} (expected {})", CODEC_VERSION)]
    UnsupportedVersion { found: u8 },

    #[error("truncated entry: {len} bytes")]
    Truncated { len: usize },

    #[error("entry size {0} exceeds maximum {}", MAX_ENTRY_SIZE)]
    TooLarge(usize),

    #[error("CRC mismatch: stored={stored:08x}, computed={computed:08x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Serializes a value with its checksum.
///
/// Format:
/// ```text
/// [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
/// ```
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let data = serde_json::to_vec(value)?;
    if data.len() > MAX_ENTRY_SIZE {
        return Err(CodecError::TooLarge(data.len()));
    }

    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + data.len() + TRAILER_LEN);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&data).to_le_bytes());
    Ok(out)
}

/// Decodes a value, verifying version, length and checksum.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let truncated = || CodecError::Truncated { len: bytes.len() };

    let (&version, rest) = bytes.split_first().ok_or_else(truncated)?;
    if version != CODEC_VERSION {
        return Err(CodecError::UnsupportedVersion { found: version });
    }

    let len_bytes: [u8; 4] = rest
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(truncated)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_ENTRY_SIZE {
        return Err(CodecError::TooLarge(len));
    }
    if rest.len() != 4 + len + TRAILER_LEN {
        return Err(truncated());
    }

    let data = &rest[4..4 + len];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&rest[4 + len..]);
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(data);
    if stored != computed {
        return Err(CodecError::ChecksumMismatch { stored, computed });
    }

    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::InstanceId;
    use crate::schema::TypeId;
    use crate::value::{Instance, Value};

    fn sample() -> Instance {
        Instance {
            id: InstanceId::new(12).unwrap(),
            type_id: TypeId::from_index(3),
            attributes: vec![
                Value::from("2O2Fr$t4X7Zf8NOew3FLOH"),
                Value::Null,
                Value::List(vec![Value::Ref(InstanceId::new(4).unwrap()), Value::Float(0.25)]),
                Value::Logical(None),
                Value::Enum("NOTDEFINED".into()),
            ],
        }
    }

    #[test]
    fn test_instance_record_survives_encoding() {
        let encoded = encode(&sample()).unwrap();
        assert_eq!(encoded[0], CODEC_VERSION);
        let decoded: Instance = decode(&encoded).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_detects_corruption() {
        let mut encoded = encode(&sample()).unwrap();
        encoded[10] ^= 0xFF;
        let err = decode::<Instance>(&encoded).unwrap_err();
        assert!(matches!(
            err,
            CodecError::ChecksumMismatch { .. } | CodecError::Json(_)
        ));
    }

    #[test]
    fn test_rejects_oversized_entry() {
        let mut bad = vec![CODEC_VERSION];
        bad.extend_from_slice(&200_000_000u32.to_le_bytes());
        let err = decode::<String>(&bad).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_rejects_truncated_and_foreign_versions() {
        assert!(matches!(decode::<String>(&[]), Err(CodecError::Truncated { .. })));

        let mut encoded = encode(&"x".to_string()).unwrap();
        encoded.pop();
        assert!(matches!(decode::<String>(&encoded), Err(CodecError::Truncated { .. })));

        encoded[0] = 9;
        assert!(matches!(
            decode::<String>(&encoded),
            Err(CodecError::UnsupportedVersion { found: 9 })
        ));
    }
}
