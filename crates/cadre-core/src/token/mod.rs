//! Token Tracker & Budget: tallies LLM token usage per issue, by phase and
//! by agent, and enforces warn/halt thresholds.
//!
//! Distinct from (and a replacement for) the teacher's HMAC CLI-auth-token
//! concept; this tracks LLM usage, not API credentials.

use crate::model::{PhaseId, TokenUsage};

/// Configured thresholds for token spend on a single issue.
#[derive(Debug, Clone, Copy)]
pub struct TokenBudget {
    pub warn_at: Option<u64>,
    pub halt_at: Option<u64>,
}

impl TokenBudget {
    pub fn unbounded() -> Self {
        Self {
            warn_at: None,
            halt_at: None,
        }
    }

    pub fn new(warn_at: Option<u64>, halt_at: Option<u64>) -> Self {
        Self { warn_at, halt_at }
    }
}

/// Outcome of recording a spend against the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    Ok,
    Warn,
    Halt,
}

/// Tracks cumulative token spend for one issue across phases and agents.
#[derive(Debug, Clone)]
pub struct TokenTracker {
    budget: TokenBudget,
    usage: TokenUsage,
}

impl TokenTracker {
    pub fn new(budget: TokenBudget) -> Self {
        Self {
            budget,
            usage: TokenUsage::default(),
        }
    }

    /// Resume tracking from a previously persisted [`TokenUsage`].
    pub fn from_usage(budget: TokenBudget, usage: TokenUsage) -> Self {
        Self { budget, usage }
    }

    pub fn usage(&self) -> &TokenUsage {
        &self.usage
    }

    /// Record `tokens` spent by `agent` during `phase`, returning the
    /// resulting budget status.
    pub fn record(&mut self, phase: PhaseId, agent: &str, tokens: u64) -> BudgetStatus {
        self.usage.total += tokens;
        *self.usage.by_phase.entry(phase.ordinal()).or_insert(0) += tokens;
        *self.usage.by_agent.entry(agent.to_string()).or_insert(0) += tokens;

        self.status()
    }

    pub fn status(&self) -> BudgetStatus {
        if let Some(halt_at) = self.budget.halt_at {
            if self.usage.total >= halt_at {
                return BudgetStatus::Halt;
            }
        }
        if let Some(warn_at) = self.budget.warn_at {
            if self.usage.total >= warn_at {
                return BudgetStatus::Warn;
            }
        }
        BudgetStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_total_and_breakdowns() {
        let mut tracker = TokenTracker::new(TokenBudget::unbounded());
        tracker.record(PhaseId::Analysis, "issue-analyst", 100);
        tracker.record(PhaseId::Planning, "task-planner", 50);
        tracker.record(PhaseId::Analysis, "issue-analyst", 25);

        let usage = tracker.usage();
        assert_eq!(usage.total, 175);
        assert_eq!(usage.by_phase[&PhaseId::Analysis.ordinal()], 125);
        assert_eq!(usage.by_phase[&PhaseId::Planning.ordinal()], 50);
        assert_eq!(usage.by_agent["issue-analyst"], 125);
    }

    #[test]
    fn unbounded_budget_never_warns_or_halts() {
        let mut tracker = TokenTracker::new(TokenBudget::unbounded());
        tracker.record(PhaseId::Analysis, "a", 1_000_000);
        assert_eq!(tracker.status(), BudgetStatus::Ok);
    }

    #[test]
    fn crossing_warn_threshold_reports_warn() {
        let mut tracker = TokenTracker::new(TokenBudget::new(Some(100), None));
        assert_eq!(tracker.record(PhaseId::Analysis, "a", 50), BudgetStatus::Ok);
        assert_eq!(tracker.record(PhaseId::Analysis, "a", 60), BudgetStatus::Warn);
    }

    #[test]
    fn crossing_halt_threshold_reports_halt_even_if_warn_also_set() {
        let mut tracker = TokenTracker::new(TokenBudget::new(Some(50), Some(100)));
        assert_eq!(tracker.record(PhaseId::Analysis, "a", 60), BudgetStatus::Warn);
        assert_eq!(tracker.record(PhaseId::Analysis, "a", 60), BudgetStatus::Halt);
    }

    #[test]
    fn resumes_from_persisted_usage() {
        let mut usage = TokenUsage::default();
        usage.total = 90;
        let mut tracker = TokenTracker::from_usage(TokenBudget::new(Some(100), None), usage);
        assert_eq!(tracker.status(), BudgetStatus::Ok);
        assert_eq!(tracker.record(PhaseId::Analysis, "a", 20), BudgetStatus::Warn);
    }
}
