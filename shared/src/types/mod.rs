//! Profile model types

pub mod labels;
pub mod meta;
pub mod profile;
pub mod profile_type;
