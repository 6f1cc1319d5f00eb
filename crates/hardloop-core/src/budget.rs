//! Per-phase retry budgets.
//!
//! Counters only ever go up during a run; they return to zero solely
//! through an explicit [`RetryBudget::reset`]. A phase is exhausted once
//! its count reaches its ceiling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::PhaseId;

/// Default ceiling applied to phases without an override.
pub const DEFAULT_RETRY_CEILING: u32 = 3;

/// Counter and ceiling for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetEntry {
    pub count: u32,
    pub ceiling: u32,
}

/// Retry counters keyed by phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    default_ceiling: u32,
    ceilings: BTreeMap<PhaseId, u32>,
    counts: BTreeMap<PhaseId, u32>,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_CEILING)
    }
}

impl RetryBudget {
    pub fn new(default_ceiling: u32) -> Self {
        Self {
            default_ceiling,
            ceilings: BTreeMap::new(),
            counts: BTreeMap::new(),
        }
    }

    /// Override the ceiling for one phase.
    pub fn with_ceiling(mut self, phase: impl Into<PhaseId>, ceiling: u32) -> Self {
        self.ceilings.insert(phase.into(), ceiling);
        self
    }

    /// Record one more attempt against `phase`; returns the new count.
    pub fn increment(&mut self, phase: &PhaseId) -> u32 {
        let count = self.counts.entry(phase.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Whether `phase` has used up its ceiling.
    pub fn exhausted(&self, phase: &PhaseId) -> bool {
        self.count(phase) >= self.ceiling(phase)
    }

    pub fn reset(&mut self, phase: &PhaseId) {
        self.counts.remove(phase);
    }

    pub fn count(&self, phase: &PhaseId) -> u32 {
        self.counts.get(phase).copied().unwrap_or(0)
    }

    pub fn ceiling(&self, phase: &PhaseId) -> u32 {
        self.ceilings
            .get(phase)
            .copied()
            .unwrap_or(self.default_ceiling)
    }

    /// Snapshot of every phase that has been charged at least once.
    pub fn entries(&self) -> BTreeMap<PhaseId, BudgetEntry> {
        self.counts
            .iter()
            .map(|(phase, count)| {
                (
                    phase.clone(),
                    BudgetEntry {
                        count: *count,
                        ceiling: self.ceiling(phase),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_tracks_increment_count() {
        let phase = PhaseId::from("execute");
        for n in 0..6u32 {
            let mut budget = RetryBudget::new(3);
            for _ in 0..n {
                budget.increment(&phase);
            }
            assert_eq!(budget.exhausted(&phase), n >= 3, "after {n} increments");
        }
    }

    #[test]
    fn test_increment_returns_new_count() {
        let mut budget = RetryBudget::default();
        let phase = PhaseId::from("validate");
        assert_eq!(budget.increment(&phase), 1);
        assert_eq!(budget.increment(&phase), 2);
        assert_eq!(budget.count(&phase), 2);
    }

    #[test]
    fn test_reset_clears_exhaustion() {
        let mut budget = RetryBudget::new(1);
        let phase = PhaseId::from("generate-attack");
        budget.increment(&phase);
        assert!(budget.exhausted(&phase));
        budget.reset(&phase);
        assert!(!budget.exhausted(&phase));
        assert_eq!(budget.count(&phase), 0);
    }

    #[test]
    fn test_phases_are_independent() {
        let mut budget = RetryBudget::new(2);
        let a = PhaseId::from("a");
        let b = PhaseId::from("b");
        budget.increment(&a);
        budget.increment(&a);
        assert!(budget.exhausted(&a));
        assert!(!budget.exhausted(&b));
    }

    #[test]
    fn test_per_phase_ceiling_override() {
        let mut budget = RetryBudget::new(3).with_ceiling("static", 1);
        let phase = PhaseId::from("static");
        assert_eq!(budget.ceiling(&phase), 1);
        budget.increment(&phase);
        assert!(budget.exhausted(&phase));
    }

    #[test]
    fn test_zero_ceiling_is_exhausted_immediately() {
        let budget = RetryBudget::new(0);
        assert!(budget.exhausted(&PhaseId::from("any")));
    }

    #[test]
    fn test_entries_snapshot() {
        let mut budget = RetryBudget::new(3).with_ceiling("b", 5);
        budget.increment(&PhaseId::from("b"));
        let entries = budget.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[&PhaseId::from("b")],
            BudgetEntry {
                count: 1,
                ceiling: 5
            }
        );
    }
}
