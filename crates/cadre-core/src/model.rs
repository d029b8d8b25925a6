//! Core data types shared across the engine: issues, worktrees, checkpoint
//! state, tasks, gate results, and agent invocation results.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open/closed state of a tracker issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Open,
    Closed,
}

/// A single comment on an issue, in tracker order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Normalized tracker issue. Immutable input to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: BTreeSet<String>,
    pub assignees: Vec<String>,
    pub state: IssueState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub comments: Vec<Comment>,
}

/// A provisioned Git working directory tied to one issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    pub issue_number: u64,
    pub path: PathBuf,
    pub branch: String,
    pub base_commit: String,
    pub exists: bool,
}

/// One of the five ordered phases of issue processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PhaseId {
    Analysis = 1,
    Planning = 2,
    Implementation = 3,
    IntegrationVerification = 4,
    PullRequest = 5,
}

impl PhaseId {
    pub const ALL: [PhaseId; 5] = [
        PhaseId::Analysis,
        PhaseId::Planning,
        PhaseId::Implementation,
        PhaseId::IntegrationVerification,
        PhaseId::PullRequest,
    ];

    /// The 1-based ordinal used in checkpoint state and the spec's phase table.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(n: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.ordinal() == n)
    }

    pub fn next(self) -> Option<Self> {
        Self::from_ordinal(self.ordinal() + 1)
    }

    pub fn name(self) -> &'static str {
        match self {
            PhaseId::Analysis => "analysis",
            PhaseId::Planning => "planning",
            PhaseId::Implementation => "implementation",
            PhaseId::IntegrationVerification => "integration_verification",
            PhaseId::PullRequest => "pull_request",
        }
    }
}

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Outcome of a gate check. `Warn` and `Fail` may both carry warnings;
/// `Fail` may also carry errors. Consumers must check `status` first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GateStatus {
    Pass,
    Warn,
    Fail,
}

impl GateStatus {
    /// Severity order used by the merge rule in §4.5: fail > warn > pass.
    fn rank(self) -> u8 {
        match self {
            GateStatus::Pass => 0,
            GateStatus::Warn => 1,
            GateStatus::Fail => 2,
        }
    }
}

/// Result of one gate evaluation, with accumulated warnings and errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateResult {
    pub status: Option<GateStatus>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl GateResult {
    pub fn pass() -> Self {
        Self {
            status: Some(GateStatus::Pass),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(warnings: Vec<String>) -> Self {
        Self {
            status: Some(GateStatus::Warn),
            warnings,
            errors: Vec::new(),
        }
    }

    pub fn fail(errors: Vec<String>) -> Self {
        Self {
            status: Some(GateStatus::Fail),
            warnings: Vec::new(),
            errors,
        }
    }

    /// Merge several gate results into one, per §4.5's "Merged result rule":
    /// fail dominates warn dominates pass; warnings and errors concatenate.
    pub fn merge(results: &[GateResult]) -> GateResult {
        let mut merged = GateResult {
            status: Some(GateStatus::Pass),
            warnings: Vec::new(),
            errors: Vec::new(),
        };
        for r in results {
            if let Some(status) = r.status {
                let current = merged.status.unwrap_or(GateStatus::Pass);
                if status.rank() > current.rank() {
                    merged.status = Some(status);
                }
            }
            merged.warnings.extend(r.warnings.iter().cloned());
            merged.errors.extend(r.errors.iter().cloned());
        }
        merged
    }

    pub fn is_passable(&self) -> bool {
        matches!(self.status, Some(GateStatus::Pass) | Some(GateStatus::Warn))
    }
}

pub type TaskId = String;

/// A unit of work inside the implementation phase, as produced by planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub files: Vec<PathBuf>,
    pub dependencies: Vec<TaskId>,
    pub acceptance_criteria: Vec<String>,
    pub complexity: Option<String>,
}

/// Result of a single external agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInvocationResult {
    pub agent: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub token_usage: u64,
    pub output_path: PathBuf,
    pub output_exists: bool,
    pub error: Option<String>,
}

impl AgentInvocationResult {
    /// `success` requires exit 0, no timeout, and the output file present,
    /// per §6's Agent Launcher contract.
    pub fn derive_success(
        agent: impl Into<String>,
        exit_code: Option<i32>,
        timed_out: bool,
        duration_ms: u64,
        token_usage: u64,
        output_path: PathBuf,
        output_exists: bool,
        error: Option<String>,
    ) -> Self {
        let success = exit_code == Some(0) && !timed_out && output_exists;
        Self {
            agent: agent.into(),
            success,
            exit_code,
            timed_out,
            duration_ms,
            token_usage,
            output_path,
            output_exists,
            error,
        }
    }
}

/// Token usage tallied by agent and by phase; `total` must equal both sums
/// per the spec's invariant (d).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total: u64,
    pub by_phase: BTreeMap<u8, u64>,
    pub by_agent: BTreeMap<String, u64>,
}

/// Durable per-issue state. Mutated only through `CheckpointStore`'s narrow
/// API and persisted atomically after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub current_phase: u8,
    pub completed_phases: BTreeSet<u8>,
    pub completed_tasks: BTreeSet<TaskId>,
    pub blocked_tasks: BTreeSet<TaskId>,
    pub failed_tasks: BTreeSet<TaskId>,
    pub phase_outputs: BTreeMap<u8, PathBuf>,
    pub gate_results: BTreeMap<u8, GateResult>,
    pub token_usage: TokenUsage,
    pub worktree_path: Option<PathBuf>,
    pub branch_name: Option<String>,
    pub base_commit: Option<String>,
    /// Platform PR number once the Pull Request phase has opened one.
    /// Preserved across a review-response reset of phases 3..5 so that
    /// re-running the Pull Request phase updates the existing PR instead
    /// of opening a second one.
    pub pr_number: Option<u64>,
}

impl CheckpointState {
    /// Begin (or resume) `phase`. Rejects restarting a phase already marked
    /// complete -- a phase is only ever re-run via the retry-once path, and
    /// that path runs before `complete_phase` is ever called for it.
    pub fn start_phase(&mut self, phase: PhaseId) -> crate::error::Result<()> {
        if self.completed_phases.contains(&phase.ordinal()) {
            return Err(crate::error::CadreError::CheckpointInvariant(format!(
                "phase {phase} already completed, cannot restart"
            )));
        }
        self.current_phase = phase.ordinal();
        Ok(())
    }

    /// Mark `phase` complete. Enforces that its recorded gate result is
    /// passable and that `completed_phases` remains a prefix of `PhaseId::ALL`.
    pub fn complete_phase(&mut self, phase: PhaseId) -> crate::error::Result<()> {
        let gate = self.gate_results.get(&phase.ordinal()).ok_or_else(|| {
            crate::error::CadreError::CheckpointInvariant(format!(
                "phase {phase} has no recorded gate result"
            ))
        })?;
        if !gate.is_passable() {
            return Err(crate::error::CadreError::CheckpointInvariant(format!(
                "phase {phase} cannot complete with a failing gate result"
            )));
        }
        for p in PhaseId::ALL {
            if p.ordinal() < phase.ordinal() && !self.completed_phases.contains(&p.ordinal()) {
                return Err(crate::error::CadreError::CheckpointInvariant(format!(
                    "phase {phase} cannot complete before phase {p}"
                )));
            }
        }
        self.completed_phases.insert(phase.ordinal());
        if let Some(next) = phase.next() {
            self.current_phase = next.ordinal();
        }
        Ok(())
    }

    /// Record (or overwrite) a phase's gate result. Last writer wins, so a
    /// retried phase's second gate evaluation replaces the first.
    pub fn record_gate_result(&mut self, phase: PhaseId, result: GateResult) {
        self.gate_results.insert(phase.ordinal(), result);
    }

    /// Record the output artifact path produced by a phase.
    pub fn record_phase_output(&mut self, phase: PhaseId, path: PathBuf) {
        self.phase_outputs.insert(phase.ordinal(), path);
    }

    /// Begin a task. Only rejects tasks already resolved one way or the
    /// other; in-flight tracking itself lives in the task queue, not here.
    pub fn start_task(&mut self, task_id: &TaskId) -> crate::error::Result<()> {
        if self.completed_tasks.contains(task_id) || self.failed_tasks.contains(task_id) {
            return Err(crate::error::CadreError::CheckpointInvariant(format!(
                "task {task_id} already resolved, cannot restart"
            )));
        }
        Ok(())
    }

    /// Mark a task complete. Clears it from `failed_tasks`/`blocked_tasks`
    /// so `failed_tasks ∩ completed_tasks = ∅` always holds.
    pub fn complete_task(&mut self, task_id: TaskId) {
        self.failed_tasks.remove(&task_id);
        self.blocked_tasks.remove(&task_id);
        self.completed_tasks.insert(task_id);
    }

    /// Mark a task failed. Rejects a task already marked complete.
    pub fn fail_task(&mut self, task_id: TaskId) -> crate::error::Result<()> {
        if self.completed_tasks.contains(&task_id) {
            return Err(crate::error::CadreError::CheckpointInvariant(format!(
                "task {task_id} already completed, cannot fail"
            )));
        }
        self.blocked_tasks.remove(&task_id);
        self.failed_tasks.insert(task_id);
        Ok(())
    }

    /// Mark a task blocked (its dependencies failed). Rejects a task
    /// already marked complete.
    pub fn block_task(&mut self, task_id: TaskId) -> crate::error::Result<()> {
        if self.completed_tasks.contains(&task_id) {
            return Err(crate::error::CadreError::CheckpointInvariant(format!(
                "task {task_id} already completed, cannot block"
            )));
        }
        self.blocked_tasks.insert(task_id);
        Ok(())
    }

    /// Clear every unresolved task outcome, leaving `completed_tasks`
    /// untouched. Used when a phase-level retry re-runs the Implementation
    /// phase, so previously failed or blocked tasks get a fresh attempt
    /// instead of `start_task` rejecting them as already resolved.
    pub fn reset_unresolved_tasks(&mut self) {
        self.failed_tasks.clear();
        self.blocked_tasks.clear();
    }

    /// Clear `phases`' completion state, gate results, and outputs, plus the
    /// whole task ledger, so a later `start_phase` re-drives them from
    /// scratch. `pr_number` is left untouched -- the review-response cycle
    /// updates the existing PR rather than opening a new one.
    pub fn reset_phases_for_rerun(&mut self, phases: &[u8]) {
        for phase in phases {
            self.completed_phases.remove(phase);
            self.phase_outputs.remove(phase);
            self.gate_results.remove(phase);
        }
        self.completed_tasks.clear();
        self.failed_tasks.clear();
        self.blocked_tasks.clear();
    }

    /// Replace the tallied token usage, validating the spec's invariant
    /// that `total` equals both the per-phase and per-agent sums.
    pub fn record_token_usage(&mut self, usage: TokenUsage) -> crate::error::Result<()> {
        let by_phase_sum: u64 = usage.by_phase.values().sum();
        let by_agent_sum: u64 = usage.by_agent.values().sum();
        if usage.total != by_phase_sum || usage.total != by_agent_sum {
            return Err(crate::error::CadreError::CheckpointInvariant(format!(
                "token usage total {} does not match by_phase sum {} / by_agent sum {}",
                usage.total, by_phase_sum, by_agent_sum
            )));
        }
        self.token_usage = usage;
        Ok(())
    }
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self {
            current_phase: PhaseId::Analysis.ordinal(),
            completed_phases: BTreeSet::new(),
            completed_tasks: BTreeSet::new(),
            blocked_tasks: BTreeSet::new(),
            failed_tasks: BTreeSet::new(),
            phase_outputs: BTreeMap::new(),
            gate_results: BTreeMap::new(),
            token_usage: TokenUsage::default(),
            worktree_path: None,
            branch_name: None,
            base_commit: None,
            pr_number: None,
        }
    }
}

/// Normalized open/closed/merged PR state, regardless of source vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

/// A platform pull request, normalized across GitHub/Azure DevOps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub draft: bool,
    pub labels: Vec<String>,
    pub state: PrState,
}

/// A single review comment thread on a PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewThread {
    pub id: String,
    pub resolved: bool,
    pub outdated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_ordinals_round_trip() {
        for p in PhaseId::ALL {
            assert_eq!(PhaseId::from_ordinal(p.ordinal()), Some(p));
        }
    }

    #[test]
    fn phase_next_chains_through_all_five() {
        let mut p = PhaseId::Analysis;
        let mut count = 1;
        while let Some(n) = p.next() {
            p = n;
            count += 1;
        }
        assert_eq!(count, 5);
        assert_eq!(p, PhaseId::PullRequest);
    }

    #[test]
    fn gate_merge_fail_dominates_warn_and_pass() {
        let merged = GateResult::merge(&[
            GateResult::pass(),
            GateResult::warn(vec!["w1".into()]),
            GateResult::fail(vec!["e1".into()]),
        ]);
        assert_eq!(merged.status, Some(GateStatus::Fail));
        assert_eq!(merged.warnings, vec!["w1".to_string()]);
        assert_eq!(merged.errors, vec!["e1".to_string()]);
    }

    #[test]
    fn gate_merge_warn_dominates_pass() {
        let merged = GateResult::merge(&[GateResult::pass(), GateResult::warn(vec!["w".into()])]);
        assert_eq!(merged.status, Some(GateStatus::Warn));
    }

    #[test]
    fn gate_merge_empty_is_pass() {
        let merged = GateResult::merge(&[]);
        assert_eq!(merged.status, Some(GateStatus::Pass));
    }

    #[test]
    fn agent_result_success_requires_exit_zero_no_timeout_and_output() {
        let ok = AgentInvocationResult::derive_success(
            "issue-analyst",
            Some(0),
            false,
            10,
            5,
            PathBuf::from("/tmp/out.md"),
            true,
            None,
        );
        assert!(ok.success);

        let missing_output = AgentInvocationResult::derive_success(
            "issue-analyst",
            Some(0),
            false,
            10,
            5,
            PathBuf::from("/tmp/out.md"),
            false,
            None,
        );
        assert!(!missing_output.success);

        let timed_out = AgentInvocationResult::derive_success(
            "issue-analyst",
            None,
            true,
            10,
            5,
            PathBuf::from("/tmp/out.md"),
            false,
            Some("timed out".into()),
        );
        assert!(!timed_out.success);
    }

    #[test]
    fn checkpoint_state_default_starts_at_phase_one_with_empty_sets() {
        let cp = CheckpointState::default();
        assert_eq!(cp.current_phase, 1);
        assert!(cp.completed_phases.is_empty());
        assert!(cp.completed_tasks.is_empty());
    }

    #[test]
    fn complete_phase_rejects_missing_gate_result() {
        let mut cp = CheckpointState::default();
        assert!(cp.complete_phase(PhaseId::Analysis).is_err());
    }

    #[test]
    fn complete_phase_rejects_failing_gate() {
        let mut cp = CheckpointState::default();
        cp.record_gate_result(PhaseId::Analysis, GateResult::fail(vec!["e".into()]));
        assert!(cp.complete_phase(PhaseId::Analysis).is_err());
    }

    #[test]
    fn complete_phase_rejects_out_of_order_completion() {
        let mut cp = CheckpointState::default();
        cp.record_gate_result(PhaseId::Planning, GateResult::pass());
        assert!(cp.complete_phase(PhaseId::Planning).is_err());
    }

    #[test]
    fn complete_phase_advances_current_phase_and_forms_prefix() {
        let mut cp = CheckpointState::default();
        cp.record_gate_result(PhaseId::Analysis, GateResult::pass());
        cp.complete_phase(PhaseId::Analysis).unwrap();
        assert_eq!(cp.current_phase, PhaseId::Planning.ordinal());
        assert_eq!(cp.completed_phases, [1].into_iter().collect());
    }

    #[test]
    fn start_phase_rejects_restarting_completed_phase() {
        let mut cp = CheckpointState::default();
        cp.record_gate_result(PhaseId::Analysis, GateResult::pass());
        cp.complete_phase(PhaseId::Analysis).unwrap();
        assert!(cp.start_phase(PhaseId::Analysis).is_err());
    }

    #[test]
    fn complete_task_clears_failed_and_blocked() {
        let mut cp = CheckpointState::default();
        cp.fail_task("t1".into()).unwrap();
        cp.complete_task("t1".into());
        assert!(cp.completed_tasks.contains("t1"));
        assert!(!cp.failed_tasks.contains("t1"));
    }

    #[test]
    fn fail_task_rejects_already_completed_task() {
        let mut cp = CheckpointState::default();
        cp.complete_task("t1".into());
        assert!(cp.fail_task("t1".into()).is_err());
    }

    #[test]
    fn record_token_usage_rejects_mismatched_total() {
        let mut cp = CheckpointState::default();
        let usage = TokenUsage {
            total: 100,
            by_phase: [(1, 40)].into_iter().collect(),
            by_agent: [("issue-analyst".to_string(), 40)].into_iter().collect(),
        };
        assert!(cp.record_token_usage(usage).is_err());
    }

    #[test]
    fn record_token_usage_accepts_matching_sums() {
        let mut cp = CheckpointState::default();
        let usage = TokenUsage {
            total: 40,
            by_phase: [(1, 40)].into_iter().collect(),
            by_agent: [("issue-analyst".to_string(), 40)].into_iter().collect(),
        };
        cp.record_token_usage(usage).unwrap();
        assert_eq!(cp.token_usage.total, 40);
    }
}
