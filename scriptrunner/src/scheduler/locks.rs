//! Resource-exclusion lock set.
//!
//! Owned by the executor loop and mutated only from it, so it needs no
//! internal synchronization. A run is admitted only if every service it
//! declares is free; its services stay held until the run completes.

use std::collections::BTreeSet;

/// Services held by currently running scripts.
#[derive(Debug, Default)]
pub struct ServiceLockSet {
    held: BTreeSet<String>,
}

impl ServiceLockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if none of `services` is held.
    pub fn is_available(&self, services: &BTreeSet<String>) -> bool {
        self.held.is_disjoint(services)
    }

    /// Services in `services` that are currently held.
    pub fn conflicts<'a>(&self, services: &'a BTreeSet<String>) -> Vec<&'a str> {
        services
            .iter()
            .filter(|s| self.held.contains(*s))
            .map(String::as_str)
            .collect()
    }

    /// Takes every service in `services`, or none of them.
    pub fn try_acquire(&mut self, services: &BTreeSet<String>) -> bool {
        if !self.is_available(services) {
            return false;
        }
        self.held.extend(services.iter().cloned());
        true
    }

    pub fn release(&mut self, services: &BTreeSet<String>) {
        for service in services {
            self.held.remove(service);
        }
    }

    pub fn held(&self) -> &BTreeSet<String> {
        &self.held
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}
