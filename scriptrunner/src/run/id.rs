//! Run identifiers.
//!
//! Every submitted script run gets a numeric [`RunId`] drawn from a
//! [`RunIdGenerator`]. The generator is owned by the registry instance rather
//! than living in a process-wide static, so independent registries (and tests)
//! never share a sequence.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for one script run.
///
/// Ids are monotonically increasing within a generator and are never reused.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct RunId(u64);

impl RunId {
    /// Wraps a raw id value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw numeric value.
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunId({})", self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RunId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for RunId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

/// Atomic source of fresh [`RunId`]s.
#[derive(Debug)]
pub struct RunIdGenerator {
    next: AtomicU64,
}

impl Default for RunIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RunIdGenerator {
    /// Creates a generator whose first id is `1`.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a generator whose first id is `first`.
    ///
    /// Useful when a registry is restored next to previously persisted runs.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Returns a fresh id.
    pub fn next_id(&self) -> RunId {
        RunId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_generator_is_monotonic() {
        let generator = RunIdGenerator::new();
        let a = generator.next_id();
        let b = generator.next_id();
        assert_eq!(a, RunId::new(1));
        assert!(b > a);
    }

    #[test]
    fn test_generators_are_independent() {
        let first = RunIdGenerator::new();
        let second = RunIdGenerator::new();
        assert_eq!(first.next_id(), second.next_id());
    }

    #[test]
    fn test_starting_at() {
        let generator = RunIdGenerator::starting_at(42);
        assert_eq!(generator.next_id().value(), 42);
    }

    #[test]
    fn test_unique_across_threads() {
        let generator = Arc::new(RunIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || (0..100).map(|_| generator.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 400);
    }

    #[test]
    fn test_display_and_parse() {
        let id = RunId::new(17);
        assert_eq!(id.to_string(), "17");
        assert_eq!(" 17 ".parse::<RunId>().unwrap(), id);
        assert!("abc".parse::<RunId>().is_err());
    }
}
