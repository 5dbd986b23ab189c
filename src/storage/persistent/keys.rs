//! Key layout of the `records` table.
//!
//! ```text
//! i | id:u32                          -> instance record (codec framed)
//! t | type:u16 | id:u32               -> empty
//! g | guid bytes                      -> id:u32
//! v | target:u32 | type:u16 | attr:u16 -> packed u32 LE source ids
//! d | id:u32                          -> empty (deleted id)
//! u | target:u32                      -> packed pending references
//! m | name                            -> metadata
//! ```
//!
//! Integers are big-endian so byte order equals numeric order and every index is
//! one contiguous key range.

use crate::error::{Result, StoreError};
use crate::id::InstanceId;
use crate::schema::TypeId;
use crate::storage::traits::InverseKey;
use crate::unresolved::PendingReference;

pub const INSTANCE: u8 = b'i';
pub const TYPE: u8 = b't';
pub const GUID: u8 = b'g';
pub const INVERSE: u8 = b'v';
pub const TOMBSTONE: u8 = b'd';
pub const PENDING: u8 = b'u';
pub const META: u8 = b'm';

/// Bytes per packed pending reference: source u32, type u16, attribute u16.
const PENDING_ENTRY: usize = 8;

pub const MANIFEST: &str = "manifest";
pub const HIGH_WATER: &str = "next_id";
pub const COUNT: &str = "count";

fn id_key(prefix: u8, id: InstanceId) -> [u8; 5] {
    let mut key = [prefix, 0, 0, 0, 0];
    key[1..].copy_from_slice(&id.get().to_be_bytes());
    key
}

pub fn instance(id: InstanceId) -> [u8; 5] {
    id_key(INSTANCE, id)
}

pub fn type_group(type_id: TypeId) -> [u8; 3] {
    let mut key = [TYPE, 0, 0];
    key[1..].copy_from_slice(&type_id.index().to_be_bytes());
    key
}

pub fn type_member(type_id: TypeId, id: InstanceId) -> [u8; 7] {
    let mut key = [0u8; 7];
    key[..3].copy_from_slice(&type_group(type_id));
    key[3..].copy_from_slice(&id.get().to_be_bytes());
    key
}

pub fn guid(guid: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + guid.len());
    key.push(GUID);
    key.extend_from_slice(guid.as_bytes());
    key
}

pub fn inverse_target(target: InstanceId) -> [u8; 5] {
    id_key(INVERSE, target)
}

pub fn inverse(key: &InverseKey) -> [u8; 9] {
    let mut out = [0u8; 9];
    out[..5].copy_from_slice(&inverse_target(key.target));
    out[5..7].copy_from_slice(&key.type_id.index().to_be_bytes());
    out[7..].copy_from_slice(&key.attribute.to_be_bytes());
    out
}

pub fn tombstone(id: InstanceId) -> [u8; 5] {
    id_key(TOMBSTONE, id)
}

pub fn pending(target: InstanceId) -> [u8; 5] {
    id_key(PENDING, target)
}

pub fn meta(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(META);
    key.extend_from_slice(name.as_bytes());
    key
}

/// The smallest key greater than every key starting with `prefix`.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return end;
        }
    }
    // All 0xff: no finite upper bound exists below the table end.
    vec![u8::MAX; prefix.len() + 1]
}

/// The smallest key strictly greater than `key`.
pub fn successor(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

fn read_u32(key: &[u8], at: usize) -> Option<u32> {
    key.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
}

fn read_u16(key: &[u8], at: usize) -> Option<u16> {
    key.get(at..at + 2)
        .and_then(|b| b.try_into().ok())
        .map(u16::from_be_bytes)
}

fn decode_id(key: &[u8], raw: Option<u32>) -> Result<InstanceId> {
    raw.and_then(InstanceId::new)
        .ok_or_else(|| StoreError::corrupt(key, "invalid instance id"))
}

fn expect_shape(key: &[u8], prefix: u8, len: usize) -> Result<()> {
    if key.first() != Some(&prefix) || key.len() != len {
        return Err(StoreError::corrupt(
            key,
            format!("expected {len}-byte '{}' key", char::from(prefix)),
        ));
    }
    Ok(())
}

pub fn decode_instance(key: &[u8]) -> Result<InstanceId> {
    expect_shape(key, INSTANCE, 5)?;
    decode_id(key, read_u32(key, 1))
}

pub fn decode_type_member(key: &[u8]) -> Result<(TypeId, InstanceId)> {
    expect_shape(key, TYPE, 7)?;
    let type_id = read_u16(key, 1)
        .map(TypeId::from_index)
        .ok_or_else(|| StoreError::corrupt(key, "missing type"))?;
    Ok((type_id, decode_id(key, read_u32(key, 3))?))
}

pub fn decode_inverse(key: &[u8]) -> Result<InverseKey> {
    expect_shape(key, INVERSE, 9)?;
    let target = decode_id(key, read_u32(key, 1))?;
    let (Some(type_id), Some(attribute)) = (read_u16(key, 5), read_u16(key, 7)) else {
        return Err(StoreError::corrupt(key, "truncated inverse key"));
    };
    Ok(InverseKey::new(target, TypeId::from_index(type_id), attribute))
}

pub fn decode_pending_target(key: &[u8]) -> Result<InstanceId> {
    expect_shape(key, PENDING, 5)?;
    decode_id(key, read_u32(key, 1))
}

/// Decodes a single big-endian id value stored under `key`.
pub fn decode_id_value(key: &[u8], value: &[u8]) -> Result<InstanceId> {
    if value.len() != 4 {
        return Err(StoreError::corrupt(key, "id value is not 4 bytes"));
    }
    decode_id(key, read_u32(value, 0))
}

pub fn decode_u32_value(key: &[u8], value: &[u8]) -> Result<u32> {
    if value.len() != 4 {
        return Err(StoreError::corrupt(key, "counter is not 4 bytes"));
    }
    read_u32(value, 0).ok_or_else(|| StoreError::corrupt(key, "counter is not 4 bytes"))
}

pub fn pack_ids(ids: &[InstanceId]) -> Vec<u8> {
    ids.iter().flat_map(|id| id.get().to_le_bytes()).collect()
}

pub fn unpack_ids(key: &[u8], value: &[u8]) -> Result<Vec<InstanceId>> {
    if value.len() % 4 != 0 {
        return Err(StoreError::corrupt(key, "inverse list length is not a multiple of 4"));
    }
    value
        .chunks_exact(4)
        .map(|chunk| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(chunk);
            InstanceId::new(u32::from_le_bytes(raw))
                .ok_or_else(|| StoreError::corrupt(key, "zero id in inverse list"))
        })
        .collect()
}

pub fn pack_pending(entries: &[PendingReference]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * PENDING_ENTRY);
    for entry in entries {
        out.extend_from_slice(&entry.source.get().to_le_bytes());
        out.extend_from_slice(&entry.source_type.index().to_le_bytes());
        out.extend_from_slice(&entry.attribute.to_le_bytes());
    }
    out
}

pub fn unpack_pending(key: &[u8], value: &[u8]) -> Result<Vec<PendingReference>> {
    let target = decode_pending_target(key)?;
    if value.len() % PENDING_ENTRY != 0 {
        return Err(StoreError::corrupt(key, "pending list length is not a multiple of 8"));
    }
    value
        .chunks_exact(PENDING_ENTRY)
        .map(|chunk| {
            let source = InstanceId::new(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .ok_or_else(|| StoreError::corrupt(key, "zero id in pending list"))?;
            Ok(PendingReference {
                source,
                source_type: TypeId::from_index(u16::from_le_bytes([chunk[4], chunk[5]])),
                attribute: u16::from_le_bytes([chunk[6], chunk[7]]),
                target,
            })
        })
        .collect()
}
