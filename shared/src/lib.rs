//! Shared types and utilities for Aperture
//!
//! This crate contains the profile model used across the store and the CLI:
//! label sets, profile types, stored-profile metadata, the in-memory profile
//! artifact and the codec that moves it to and from bytes.

pub mod codec;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use codec::{merge_profiles, parse_profile, serialize_profile, CodecError};
pub use types::{labels::*, meta::*, profile::*, profile_type::*};
