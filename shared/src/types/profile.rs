//! Profile data structures
//!
//! A [`Profile`] is one profiling snapshot: sample counts keyed by call
//! stack, plus the timing information recorded by the agent that produced
//! it. The store treats it as opaque apart from its embedded timestamp and
//! its sample count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single frame in a stack trace
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Frame {
    /// Function name
    pub function: String,

    /// Source file (if available)
    pub file: Option<String>,

    /// Line number (if available)
    pub line: Option<u32>,
}

impl Frame {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            file: None,
            line: None,
        }
    }
}

/// A call stack, innermost frame first
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Stack {
    pub frames: Vec<Frame>,
}

impl Stack {
    /// Create a stack from function names, innermost first
    pub fn from_functions(functions: &[&str]) -> Self {
        Self {
            frames: functions.iter().map(|f| Frame::new(*f)).collect(),
        }
    }
}

/// One profiling snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Collection start, nanoseconds since the Unix epoch (0 = not recorded)
    pub time_nanos: i64,

    /// Length of the collection window in nanoseconds
    pub duration_nanos: u64,

    /// Sampling period in nanoseconds
    pub period_nanos: u64,

    /// Sample counts per stack trace
    pub samples: HashMap<Stack, u64>,
}

impl Profile {
    /// Create a new empty profile
    pub fn new(time_nanos: i64, period_nanos: u64) -> Self {
        Self {
            time_nanos,
            period_nanos,
            ..Default::default()
        }
    }

    /// Add `count` samples for `stack`
    pub fn add_sample(&mut self, stack: Stack, count: u64) {
        if count == 0 {
            return;
        }
        let total = self.samples.entry(stack).or_insert(0);
        *total = total.saturating_add(count);
    }

    /// Total number of samples across all stacks, saturating at `u64::MAX`
    pub fn total_samples(&self) -> u64 {
        self.samples.values().copied().fold(0u64, u64::saturating_add)
    }

    /// A profile without samples carries nothing to show
    pub fn is_empty(&self) -> bool {
        self.total_samples() == 0
    }

    /// Timestamp embedded by the producer, if it recorded one
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        if self.time_nanos <= 0 {
            return None;
        }
        Some(DateTime::from_timestamp_nanos(self.time_nanos))
    }

    /// End of the collection window in nanoseconds since the epoch
    pub fn end_nanos(&self) -> i64 {
        self.time_nanos
            .saturating_add(i64::try_from(self.duration_nanos).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_add_sample() {
        let mut profile = Profile::new(0, 10_000_000);

        let stack = Stack::from_functions(&["compute", "main"]);
        profile.add_sample(stack.clone(), 1);
        profile.add_sample(stack.clone(), 2);
        profile.add_sample(stack.clone(), 0);

        assert_eq!(profile.total_samples(), 3);
        assert_eq!(profile.samples.len(), 1);
        assert_eq!(profile.samples[&stack], 3);
    }

    #[test]
    fn test_profile_multiple_unique_stacks() {
        let mut profile = Profile::new(0, 10_000_000);

        profile.add_sample(Stack::from_functions(&["a"]), 1);
        profile.add_sample(Stack::from_functions(&["b"]), 1);
        profile.add_sample(Stack::from_functions(&["a"]), 1);

        assert_eq!(profile.total_samples(), 3);
        assert_eq!(profile.samples.len(), 2);
        assert_eq!(profile.samples[&Stack::from_functions(&["a"])], 2);
    }

    #[test]
    fn test_profile_sample_counts_saturate() {
        let mut profile = Profile::new(0, 10_000_000);
        let a = Stack::from_functions(&["a"]);

        profile.add_sample(a.clone(), u64::MAX);
        profile.add_sample(Stack::from_functions(&["b"]), 1);
        assert_eq!(profile.total_samples(), u64::MAX);
        assert!(!profile.is_empty());

        profile.add_sample(a.clone(), 5);
        assert_eq!(profile.samples[&a], u64::MAX);
    }

    #[test]
    fn test_profile_empty() {
        assert!(Profile::new(1, 1).is_empty());
    }

    #[test]
    fn test_profile_created_at() {
        assert!(Profile::new(0, 0).created_at().is_none());
        let profile = Profile::new(1_700_000_000_500_000_000, 0);
        let at = profile.created_at().unwrap();
        assert_eq!(at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_stack_from_functions() {
        let stack = Stack::from_functions(&["leaf", "mid", "root"]);
        assert_eq!(stack.frames.len(), 3);
        assert_eq!(stack.frames[0].function, "leaf");
        assert_eq!(stack.frames[2].function, "root");
        assert!(stack.frames.iter().all(|f| f.file.is_none()));
    }
}
