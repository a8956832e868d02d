//! Nested pass/conditional/fail aggregation for verification groups.
//!
//! A script reports [`Outcome`]s into named groups. A group is a set of
//! alternative ways to satisfy one check: it passes as soon as any member
//! completes without failing, and completing a group in which every attempted
//! member failed is an error.
//!
//! The collector is scoped to one run and is cleared at the start of each run.

use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Verdict of a single outcome or of a whole group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutcomeStatus {
    Passed,
    ConditionallyPassed,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "Passed"),
            Self::ConditionallyPassed => write!(f, "ConditionallyPassed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// A named verification result belonging to a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub group: String,
    pub name: String,
    pub status: OutcomeStatus,
}

impl Outcome {
    pub fn new(group: impl Into<String>, name: impl Into<String>, status: OutcomeStatus) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            status,
        }
    }
}

/// Errors raised by group queries and group completion.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutcomeError {
    /// Every attempted variant of the group failed.
    #[error("all outcomes of group '{group}' failed")]
    AllVariantsFailed { group: String },

    /// The group was never reported.
    #[error("unknown outcome group '{group}'")]
    UnknownGroup { group: String },
}

#[derive(Debug, Default)]
struct OutcomeGroup {
    passed: HashMap<String, u32>,
    conditionally_passed: HashMap<String, u32>,
    failed: HashMap<String, u32>,
    failed_names: HashSet<String>,
    defined: Vec<String>,
    display_name: Option<String>,
    group_passed: bool,
    group_conditionally_passed: bool,
    completed: Vec<String>,
}

impl OutcomeGroup {
    fn outcome_status(&self, name: &str) -> OutcomeStatus {
        if self.failed_names.contains(name) {
            OutcomeStatus::Failed
        } else if self.conditionally_passed.contains_key(name) {
            OutcomeStatus::ConditionallyPassed
        } else {
            OutcomeStatus::Passed
        }
    }

    fn status(&self) -> OutcomeStatus {
        if self.group_conditionally_passed {
            OutcomeStatus::ConditionallyPassed
        } else if self.group_passed {
            OutcomeStatus::Passed
        } else {
            OutcomeStatus::Failed
        }
    }
}

/// Counters for one outcome name inside a group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub passed: u32,
    pub conditionally_passed: u32,
    pub failed: u32,
}

/// Collects outcomes for one run and settles group verdicts.
#[derive(Debug, Default)]
pub struct OutcomeCollector {
    groups: HashMap<String, OutcomeGroup>,
    order: Vec<String>,
}

impl OutcomeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every group; called at the start of a run.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.order.clear();
    }

    /// Records an outcome, creating its group on first use.
    pub fn store_outcome(&mut self, outcome: Outcome) {
        let Outcome {
            group,
            name,
            status,
        } = outcome;

        if !self.groups.contains_key(&group) {
            self.order.push(group.clone());
        }
        let entry = self.groups.entry(group).or_default();

        let counters = match status {
            OutcomeStatus::Passed => &mut entry.passed,
            OutcomeStatus::ConditionallyPassed => &mut entry.conditionally_passed,
            OutcomeStatus::Failed => {
                entry.failed_names.insert(name.clone());
                &mut entry.failed
            }
        };
        *counters.entry(name).or_insert(0) += 1;
    }

    /// Settles the named outcome within its group.
    ///
    /// A non-failing outcome marks the group passed (or conditionally passed)
    /// and becomes the group's display name; the last one completed wins.
    pub fn on_outcome_complete(&mut self, group: &str, name: &str) {
        if !self.groups.contains_key(group) {
            self.order.push(group.to_string());
        }
        let entry = self.groups.entry(group.to_string()).or_default();

        match entry.outcome_status(name) {
            OutcomeStatus::Failed => return,
            OutcomeStatus::ConditionallyPassed => entry.group_conditionally_passed = true,
            OutcomeStatus::Passed => entry.group_passed = true,
        }
        if !entry.defined.iter().any(|d| d == name) {
            entry.defined.push(name.to_string());
        }
        entry.display_name = Some(name.to_string());
    }

    /// Completes one iteration of a group.
    ///
    /// Records the settled display name and clears the failed set so the group
    /// can be reused by a later iteration. Fails if no variant ever settled
    /// the group.
    pub fn on_group_complete(&mut self, group: &str) -> Result<(), OutcomeError> {
        let entry = self
            .groups
            .get_mut(group)
            .ok_or_else(|| OutcomeError::AllVariantsFailed {
                group: group.to_string(),
            })?;

        let settled = entry.group_passed || entry.group_conditionally_passed;
        if settled {
            let name = entry
                .display_name
                .clone()
                .unwrap_or_else(|| group.to_string());
            entry.completed.push(name);
        }
        entry.failed_names.clear();

        if settled {
            Ok(())
        } else {
            Err(OutcomeError::AllVariantsFailed {
                group: group.to_string(),
            })
        }
    }

    /// Status of one outcome. Unknown groups report `Passed`.
    pub fn outcome_status(&self, group: &str, name: &str) -> OutcomeStatus {
        self.groups
            .get(group)
            .map(|g| g.outcome_status(name))
            .unwrap_or(OutcomeStatus::Passed)
    }

    /// Settled status of a group.
    pub fn group_status(&self, group: &str) -> Result<OutcomeStatus, OutcomeError> {
        self.groups
            .get(group)
            .map(OutcomeGroup::status)
            .ok_or_else(|| OutcomeError::UnknownGroup {
                group: group.to_string(),
            })
    }

    /// Counters recorded for `name` in `group`.
    pub fn counts(&self, group: &str, name: &str) -> OutcomeCounts {
        let Some(entry) = self.groups.get(group) else {
            return OutcomeCounts::default();
        };
        let get = |map: &HashMap<String, u32>| map.get(name).copied().unwrap_or(0);
        OutcomeCounts {
            passed: get(&entry.passed),
            conditionally_passed: get(&entry.conditionally_passed),
            failed: get(&entry.failed),
        }
    }

    /// Non-failing outcome names that settled `group`, in completion order.
    pub fn defined_outcomes(&self, group: &str) -> &[String] {
        self.groups
            .get(group)
            .map(|g| g.defined.as_slice())
            .unwrap_or(&[])
    }

    /// Display names recorded by each completed iteration of `group`.
    pub fn completed_history(&self, group: &str) -> &[String] {
        self.groups
            .get(group)
            .map(|g| g.completed.as_slice())
            .unwrap_or(&[])
    }

    /// Group names in the order they were first reported.
    pub fn groups(&self) -> &[String] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector_with(outcomes: &[(&str, &str, OutcomeStatus)]) -> OutcomeCollector {
        let mut collector = OutcomeCollector::new();
        for (group, name, status) in outcomes {
            collector.store_outcome(Outcome::new(*group, *name, *status));
            collector.on_outcome_complete(group, name);
        }
        collector
    }

    #[test]
    fn test_one_passing_variant_settles_group() {
        let mut collector = collector_with(&[
            ("login", "A", OutcomeStatus::Failed),
            ("login", "B", OutcomeStatus::Passed),
        ]);
        assert_eq!(collector.on_group_complete("login"), Ok(()));
        assert_eq!(collector.group_status("login"), Ok(OutcomeStatus::Passed));
        assert_eq!(collector.completed_history("login"), ["B".to_string()]);
    }

    #[test]
    fn test_all_failed_group_raises() {
        let mut collector = collector_with(&[
            ("login", "A", OutcomeStatus::Failed),
            ("login", "B", OutcomeStatus::Failed),
        ]);
        assert_eq!(
            collector.on_group_complete("login"),
            Err(OutcomeError::AllVariantsFailed {
                group: "login".to_string()
            })
        );
        assert_eq!(collector.group_status("login"), Ok(OutcomeStatus::Failed));
    }

    #[test]
    fn test_conditional_precedence() {
        let collector = collector_with(&[
            ("g", "A", OutcomeStatus::Passed),
            ("g", "B", OutcomeStatus::ConditionallyPassed),
        ]);
        assert_eq!(collector.outcome_status("g", "A"), OutcomeStatus::Passed);
        assert_eq!(
            collector.outcome_status("g", "B"),
            OutcomeStatus::ConditionallyPassed
        );
        assert_eq!(
            collector.group_status("g"),
            Ok(OutcomeStatus::ConditionallyPassed)
        );
    }

    #[test]
    fn test_failed_takes_precedence_over_passes() {
        let mut collector = OutcomeCollector::new();
        collector.store_outcome(Outcome::new("g", "A", OutcomeStatus::Passed));
        collector.store_outcome(Outcome::new("g", "A", OutcomeStatus::Failed));
        assert_eq!(collector.outcome_status("g", "A"), OutcomeStatus::Failed);
        let counts = collector.counts("g", "A");
        assert_eq!(counts.passed, 1);
        assert_eq!(counts.failed, 1);
    }

    #[test]
    fn test_unknown_group_queries() {
        let collector = OutcomeCollector::new();
        assert_eq!(collector.outcome_status("nope", "x"), OutcomeStatus::Passed);
        assert!(matches!(
            collector.group_status("nope"),
            Err(OutcomeError::UnknownGroup { .. })
        ));
    }

    #[test]
    fn test_last_non_failing_name_wins() {
        let mut collector = collector_with(&[
            ("g", "A", OutcomeStatus::Passed),
            ("g", "B", OutcomeStatus::Passed),
        ]);
        collector.on_outcome_complete("g", "B");
        assert_eq!(collector.defined_outcomes("g"), ["A".to_string(), "B".to_string()]);
        collector.on_group_complete("g").unwrap();
        assert_eq!(collector.completed_history("g"), ["B".to_string()]);
    }

    #[test]
    fn test_group_reused_across_iterations() {
        let mut collector = collector_with(&[("loop", "A", OutcomeStatus::Failed)]);
        collector.store_outcome(Outcome::new("loop", "B", OutcomeStatus::Passed));
        collector.on_outcome_complete("loop", "B");
        collector.on_group_complete("loop").unwrap();

        // Failed set is cleared, so A can settle the next iteration.
        collector.store_outcome(Outcome::new("loop", "A", OutcomeStatus::Passed));
        collector.on_outcome_complete("loop", "A");
        collector.on_group_complete("loop").unwrap();
        assert_eq!(
            collector.completed_history("loop"),
            ["B".to_string(), "A".to_string()]
        );
    }

    #[test]
    fn test_group_order_and_clear() {
        let mut collector = collector_with(&[
            ("second", "x", OutcomeStatus::Passed),
            ("first", "y", OutcomeStatus::Passed),
            ("second", "z", OutcomeStatus::Passed),
        ]);
        assert_eq!(collector.groups(), ["second".to_string(), "first".to_string()]);
        collector.clear();
        assert!(collector.groups().is_empty());
    }

    #[test]
    fn test_completing_unknown_group_fails() {
        let mut collector = OutcomeCollector::new();
        assert!(collector.on_group_complete("ghost").is_err());
    }
}
