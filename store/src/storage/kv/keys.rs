//! Key and value layout of the embedded store
//!
//! ```text
//! meta     [0x40][service][0xFF][type][created_at ns, u64 BE][id, 16B] -> envelope(meta JSON)
//! service  [0x41][service]                                             -> envelope(empty)
//! profile  [0x80][id, 16B]                                             -> envelope(artifact)
//! ```
//!
//! `0xFF` never occurs in UTF-8, so one service name can never be a key
//! prefix of another. Every value is wrapped in an envelope carrying its
//! expiry in Unix seconds (`0` = never).

use aperture_shared::{ProfileId, ProfileType, PROFILE_ID_LEN};

pub const META_PREFIX: u8 = 0x40;
pub const SERVICE_INDEX_PREFIX: u8 = 0x41;
pub const PROFILE_PREFIX: u8 = 0x80;

const SERVICE_TERMINATOR: u8 = 0xFF;
const TIME_LEN: usize = 8;
/// Size of the expiry header in front of every value
pub const EXPIRY_LEN: usize = 8;

/// `[0x40][service][0xFF][type]`
pub fn meta_type_prefix(service: &str, profile_type: ProfileType) -> Vec<u8> {
    let mut key = Vec::with_capacity(service.len() + 3 + TIME_LEN + PROFILE_ID_LEN);
    key.push(META_PREFIX);
    key.extend_from_slice(service.as_bytes());
    key.push(SERVICE_TERMINATOR);
    key.push(profile_type.as_u8());
    key
}

/// First possible meta key at `created_at_ns`.
pub fn meta_time_lower(service: &str, profile_type: ProfileType, created_at_ns: u64) -> Vec<u8> {
    let mut key = meta_type_prefix(service, profile_type);
    key.extend_from_slice(&created_at_ns.to_be_bytes());
    key
}

/// Last possible meta key at `created_at_ns`.
pub fn meta_time_upper(service: &str, profile_type: ProfileType, created_at_ns: u64) -> Vec<u8> {
    let mut key = meta_time_lower(service, profile_type, created_at_ns);
    key.extend_from_slice(&[0xFF; PROFILE_ID_LEN]);
    key
}

pub fn meta_key(service: &str, profile_type: ProfileType, created_at_ns: u64, id: &ProfileId) -> Vec<u8> {
    let mut key = meta_time_lower(service, profile_type, created_at_ns);
    key.extend_from_slice(id.as_bytes());
    key
}

pub fn service_key(service: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(service.len() + 1);
    key.push(SERVICE_INDEX_PREFIX);
    key.extend_from_slice(service.as_bytes());
    key
}

/// Service name of a service index key.
pub fn service_from_key(key: &[u8]) -> Option<&str> {
    match key.split_first() {
        Some((&SERVICE_INDEX_PREFIX, name)) => std::str::from_utf8(name).ok(),
        _ => None,
    }
}

pub fn profile_key(id: &ProfileId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + PROFILE_ID_LEN);
    key.push(PROFILE_PREFIX);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Decoded fields of a meta key
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaKey<'a> {
    pub service: &'a str,
    pub profile_type: ProfileType,
    pub created_at_ns: u64,
    pub profile_id: ProfileId,
}

#[cfg(test)]
pub fn decode_meta_key(key: &[u8]) -> Option<MetaKey<'_>> {
    let rest = key.strip_prefix(&[META_PREFIX])?;
    let term = rest.iter().position(|&b| b == SERVICE_TERMINATOR)?;
    let service = std::str::from_utf8(&rest[..term]).ok()?;
    let rest = &rest[term + 1..];
    if rest.len() != 1 + TIME_LEN + PROFILE_ID_LEN {
        return None;
    }
    let (time, id) = rest[1..].split_at(TIME_LEN);
    Some(MetaKey {
        service,
        profile_type: ProfileType::from_u8(rest[0]),
        created_at_ns: u64::from_be_bytes(time.try_into().ok()?),
        profile_id: ProfileId::from_slice(id).ok()?,
    })
}

/// Wrap `payload` with its expiry.
pub fn seal(expires_at: u64, payload: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(EXPIRY_LEN + payload.len());
    value.extend_from_slice(&expires_at.to_be_bytes());
    value.extend_from_slice(payload);
    value
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stored value is {0} bytes, shorter than its expiry header")]
pub struct EnvelopeError(pub usize);

/// Split a stored value into its expiry and payload.
pub fn unseal(value: &[u8]) -> Result<(u64, &[u8]), EnvelopeError> {
    if value.len() < EXPIRY_LEN {
        return Err(EnvelopeError(value.len()));
    }
    let (expiry, payload) = value.split_at(EXPIRY_LEN);
    let mut buf = [0u8; EXPIRY_LEN];
    buf.copy_from_slice(expiry);
    Ok((u64::from_be_bytes(buf), payload))
}

pub fn is_expired(expires_at: u64, now_secs: u64) -> bool {
    expires_at != 0 && expires_at <= now_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_key_roundtrip() {
        let id = ProfileId::generate();
        let key = meta_key("api", ProfileType::Heap, 1_700_000_000_000_000_000, &id);
        let decoded = decode_meta_key(&key).unwrap();
        assert_eq!(decoded.service, "api");
        assert_eq!(decoded.profile_type, ProfileType::Heap);
        assert_eq!(decoded.created_at_ns, 1_700_000_000_000_000_000);
        assert_eq!(decoded.profile_id, id);

        assert!(decode_meta_key(&profile_key(&id)).is_none());
        assert!(decode_meta_key(&key[..key.len() - 1]).is_none());
    }

    #[test]
    fn test_meta_keys_sort_by_time() {
        let a = meta_key("api", ProfileType::Cpu, 5, &ProfileId::generate());
        let b = meta_key("api", ProfileType::Cpu, 256, &ProfileId::generate());
        assert!(a < b);
        assert!(meta_time_lower("api", ProfileType::Cpu, 5) <= a);
        assert!(a <= meta_time_upper("api", ProfileType::Cpu, 5));
        assert!(b > meta_time_upper("api", ProfileType::Cpu, 5));
    }

    #[test]
    fn test_service_prefixes_do_not_overlap() {
        let prefix = meta_type_prefix("api", ProfileType::Cpu);
        let other = meta_key("api-gw", ProfileType::Cpu, 1, &ProfileId::generate());
        assert!(!other.starts_with(&prefix));
    }

    #[test]
    fn test_service_key() {
        assert_eq!(service_from_key(&service_key("billing")), Some("billing"));
        assert_eq!(service_from_key(&[META_PREFIX, b'x']), None);
    }

    #[test]
    fn test_envelope() {
        let value = seal(42, b"payload");
        assert_eq!(unseal(&value).unwrap(), (42, &b"payload"[..]));
        assert_eq!(unseal(&seal(0, &[])).unwrap(), (0, &[][..]));
        assert_eq!(unseal(&[1, 2]), Err(EnvelopeError(2)));
    }

    #[test]
    fn test_expiry() {
        assert!(!is_expired(0, u64::MAX));
        assert!(!is_expired(100, 99));
        assert!(is_expired(100, 100));
    }
}
