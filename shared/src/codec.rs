//! Binary codec for profile artifacts.
//!
//! Profiles are stored as a bincode-encoded `(version, Profile)` pair. The
//! bincode options are fixed here (fixint encoding, bounded size, no trailing
//! bytes) so every writer and reader agrees on the byte layout regardless of
//! which crate serialized the value.

use crate::types::profile::Profile;
use bincode::Options;
use std::io::Write;

/// Codec version written in front of every profile
pub const CODEC_VERSION: u32 = 1;

/// Upper bound on the size of a single encoded profile
pub const MAX_PROFILE_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed profile: {0}")]
    Decode(#[source] bincode::Error),

    #[error("could not encode profile: {0}")]
    Encode(#[source] bincode::Error),

    #[error("unsupported codec version {0}, want {CODEC_VERSION}")]
    Version(u32),

    #[error("incompatible profiles: {0}")]
    Incompatible(String),

    #[error("no profiles to merge")]
    NoProfiles,
}

fn codec_bincode() -> impl bincode::Options {
    bincode::config::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_PROFILE_BYTES)
        .reject_trailing_bytes()
}

/// Parse a profile from its encoded bytes.
pub fn parse_profile(bytes: &[u8]) -> Result<Profile, CodecError> {
    let (version, profile): (u32, Profile) =
        codec_bincode().deserialize(bytes).map_err(CodecError::Decode)?;
    if version != CODEC_VERSION {
        return Err(CodecError::Version(version));
    }
    Ok(profile)
}

/// Serialize a profile into `dst`.
pub fn serialize_profile<W: Write>(profile: &Profile, dst: W) -> Result<(), CodecError> {
    codec_bincode()
        .serialize_into(dst, &(CODEC_VERSION, profile))
        .map_err(CodecError::Encode)
}

/// Serialize a profile into a fresh buffer.
pub fn profile_to_bytes(profile: &Profile) -> Result<Vec<u8>, CodecError> {
    codec_bincode()
        .serialize(&(CODEC_VERSION, profile))
        .map_err(CodecError::Encode)
}

/// Merge profiles sample-wise.
///
/// Sample counts of identical stacks are summed. The merged collection
/// window spans from the earliest recorded start to the latest end. All
/// inputs must share the same sampling period.
pub fn merge_profiles(profiles: Vec<Profile>) -> Result<Profile, CodecError> {
    let mut profiles = profiles.into_iter();
    let mut merged = profiles.next().ok_or(CodecError::NoProfiles)?;

    for profile in profiles {
        if profile.period_nanos != merged.period_nanos {
            return Err(CodecError::Incompatible(format!(
                "sampling period {}ns differs from {}ns",
                profile.period_nanos, merged.period_nanos
            )));
        }

        match (merged.time_nanos > 0, profile.time_nanos > 0) {
            (true, true) => {
                let start = merged.time_nanos.min(profile.time_nanos);
                let end = merged.end_nanos().max(profile.end_nanos());
                merged.time_nanos = start;
                merged.duration_nanos = u64::try_from(end - start).unwrap_or(0);
            }
            (false, true) => {
                merged.time_nanos = profile.time_nanos;
                merged.duration_nanos = profile.duration_nanos;
            }
            _ => {}
        }

        for (stack, count) in profile.samples {
            merged.add_sample(stack, count);
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::profile::Stack;

    fn cpu_profile(time_nanos: i64, stacks: &[(&[&str], u64)]) -> Profile {
        let mut profile = Profile::new(time_nanos, 10_000_000);
        profile.duration_nanos = 1_000_000_000;
        for (functions, count) in stacks {
            profile.add_sample(Stack::from_functions(functions), *count);
        }
        profile
    }

    #[test]
    fn test_roundtrip() {
        let profile = cpu_profile(1_000, &[(&["main"], 3), (&["work", "main"], 2)]);
        let mut buf = Vec::new();
        serialize_profile(&profile, &mut buf).unwrap();
        assert_eq!(buf, profile_to_bytes(&profile).unwrap());
        assert_eq!(parse_profile(&buf).unwrap(), profile);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_profile(b"definitely not a profile"), Err(CodecError::Decode(_))));
        assert!(matches!(parse_profile(&[]), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_parse_rejects_trailing_bytes() {
        let mut buf = profile_to_bytes(&cpu_profile(1, &[(&["main"], 1)])).unwrap();
        buf.push(0);
        assert!(parse_profile(&buf).is_err());
    }

    #[test]
    fn test_parse_rejects_other_version() {
        let buf = codec_bincode().serialize(&(7u32, Profile::default())).unwrap();
        assert!(matches!(parse_profile(&buf), Err(CodecError::Version(7))));
    }

    #[test]
    fn test_merge_sums_samples() {
        let a = cpu_profile(1_000_000_000, &[(&["main"], 3), (&["work", "main"], 2)]);
        let b = cpu_profile(3_000_000_000, &[(&["main"], 1), (&["io", "main"], 4)]);

        let merged = merge_profiles(vec![a, b]).unwrap();
        assert_eq!(merged.total_samples(), 10);
        assert_eq!(merged.samples[&Stack::from_functions(&["main"])], 4);
        assert_eq!(merged.samples[&Stack::from_functions(&["io", "main"])], 4);
        assert_eq!(merged.time_nanos, 1_000_000_000);
        assert_eq!(merged.duration_nanos, 3_000_000_000);
    }

    #[test]
    fn test_merge_saturates_sample_counts() {
        let a = cpu_profile(1_000, &[(&["main"], u64::MAX)]);
        let b = cpu_profile(2_000, &[(&["main"], 7), (&["idle"], 1)]);

        let merged = merge_profiles(vec![a, b]).unwrap();
        assert_eq!(merged.samples[&Stack::from_functions(&["main"])], u64::MAX);
        assert_eq!(merged.total_samples(), u64::MAX);
        assert!(!merged.is_empty());
    }

    #[test]
    fn test_merge_single_is_identity() {
        let a = cpu_profile(5, &[(&["main"], 3)]);
        assert_eq!(merge_profiles(vec![a.clone()]).unwrap(), a);
    }

    #[test]
    fn test_merge_empty_input() {
        assert!(matches!(merge_profiles(vec![]), Err(CodecError::NoProfiles)));
    }

    #[test]
    fn test_merge_rejects_mixed_periods() {
        let a = cpu_profile(1, &[(&["main"], 1)]);
        let mut b = cpu_profile(2, &[(&["main"], 1)]);
        b.period_nanos = 1;
        assert!(matches!(merge_profiles(vec![a, b]), Err(CodecError::Incompatible(_))));
    }
}
