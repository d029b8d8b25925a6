//! Issue Orchestrator: the per-issue phase state machine (§4.7).
//!
//! Drives one issue through the five ordered phases, persisting a
//! checkpoint after every phase transition so a crash or cancellation
//! resumes from the last completed phase rather than from the start.

pub mod config;
pub mod integration;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::checkpoint::CheckpointStore;
use crate::gate;
use crate::invariant::CommandSpec;
use crate::launcher::{AgentInvocation, LauncherRegistry};
use crate::model::{GateResult, Issue, PhaseId, PullRequest, Task, TokenUsage};
use crate::phases::{self, PhaseContext};
use crate::platform::PlatformProvider;
use crate::plan;
use crate::retry::retry;
use crate::token::{TokenBudget, TokenTracker};
use crate::worktree::WorktreeManager;

use tokio_util::sync::CancellationToken;

pub use config::OrchestratorConfig;
pub use integration::{BaselineResults, VerificationCommand};

/// Result of driving one issue to completion or to a halt.
#[derive(Debug, Clone)]
pub struct IssueOutcome {
    pub issue_number: u64,
    pub success: bool,
    pub error: Option<String>,
    /// True once phase 3 (Implementation) completed, regardless of whether
    /// a PR was ultimately opened -- mirrors the fleet's `codeDoneNoPR` set.
    pub code_complete: bool,
    pub branch_name: Option<String>,
    pub pull_request: Option<PullRequest>,
    pub token_usage: TokenUsage,
}

/// Drives a single issue through Analysis -> Planning -> Implementation ->
/// Integration Verification -> Pull Request.
pub struct IssueOrchestrator {
    launchers: Arc<LauncherRegistry>,
    platform: Arc<dyn PlatformProvider>,
    worktree_manager: WorktreeManager,
    checkpoints: CheckpointStore,
    config: OrchestratorConfig,
    verification_commands: Vec<VerificationCommand>,
}

impl IssueOrchestrator {
    pub fn new(
        launchers: Arc<LauncherRegistry>,
        platform: Arc<dyn PlatformProvider>,
        worktree_manager: WorktreeManager,
        checkpoints: CheckpointStore,
        config: OrchestratorConfig,
        verification_commands: Vec<VerificationCommand>,
    ) -> Self {
        Self {
            launchers,
            platform,
            worktree_manager,
            checkpoints,
            config,
            verification_commands,
        }
    }

    fn launcher(&self, name: &str) -> Result<&dyn crate::launcher::AgentLauncher> {
        self.launchers
            .get(name)
            .ok_or_else(|| anyhow!("no agent launcher registered for '{name}'"))
    }

    /// Look up a named agent launcher. Exposed crate-wide so the
    /// Review-Response Orchestrator can invoke `conflict-resolver` without
    /// duplicating the registry lookup.
    pub(crate) fn resolve_launcher(&self, name: &str) -> Result<&dyn crate::launcher::AgentLauncher> {
        self.launcher(name)
    }

    pub(crate) fn platform(&self) -> &Arc<dyn PlatformProvider> {
        &self.platform
    }

    pub(crate) fn worktree_manager(&self) -> &WorktreeManager {
        &self.worktree_manager
    }

    pub(crate) fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub(crate) fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run (or resume) `issue_number` to completion. Errors returned here
    /// represent infrastructure failures (platform unreachable, worktree
    /// could not be provisioned) -- the fleet maps these to a rejected
    /// entry. Business-logic failures (gate exhausted, ambiguity halt) are
    /// reported as `Ok(IssueOutcome { success: false, .. })`.
    pub async fn run_issue(&self, issue_number: u64, cancel: &CancellationToken) -> Result<IssueOutcome> {
        let issue = self
            .platform
            .fetch_issue(issue_number)
            .await
            .with_context(|| format!("fetching issue #{issue_number}"))?;

        let mut state = self
            .checkpoints
            .load(issue_number)
            .with_context(|| format!("loading checkpoint for issue #{issue_number}"))?
            .unwrap_or_default();

        let worktree = self
            .worktree_manager
            .provision(issue_number)
            .with_context(|| format!("provisioning worktree for issue #{issue_number}"))?;
        state.worktree_path = Some(worktree.path.clone());
        state.branch_name = Some(worktree.branch.clone());
        state.base_commit = Some(worktree.base_commit.clone());
        self.checkpoints.save(issue_number, &state)?;

        let progress_dir = worktree.path.join(".cadre-progress");
        std::fs::create_dir_all(&progress_dir).with_context(|| format!("creating {}", progress_dir.display()))?;

        let mut tracker = TokenTracker::from_usage(
            TokenBudget::new(self.config.token_warn_at, self.config.token_halt_at),
            state.token_usage.clone(),
        );
        let max_attempts = self.config.max_retries_per_task.max(1);
        // §4.7's state machine: RUN_PHASE -> GATE -> {pass|warn -> next |
        // fail -> RETRY_PHASE -> GATE -> {pass|warn -> next | fail -> ABORT}}.
        // Applied uniformly to all five phases: a phase gets one retry on a
        // failing gate before the run is aborted.
        const PHASE_ATTEMPTS: u32 = 2;

        let mut code_complete = false;
        let mut pull_request = None;

        let mut phase = resume_point(&state.completed_phases);
        while let Some(phase_id) = phase {
            // Cancellation is only honored at a phase boundary: the
            // checkpoint already reflects every phase completed so far, so
            // stopping here always leaves a resumable state.
            if cancel.is_cancelled() {
                return Ok(self.cancelled_outcome(issue_number, &tracker, &state, code_complete));
            }

            if self.config.invocation_delay > std::time::Duration::ZERO {
                tokio::time::sleep(self.config.invocation_delay).await;
            }

            state = self.checkpoints.start_phase(issue_number, phase_id)?;

            let gate = match phase_id {
                PhaseId::Analysis => {
                    let ctx = PhaseContext {
                        issue: &issue,
                        worktree_path: &worktree.path,
                        launcher: self.launcher("issue-analyst")?,
                        agent_timeout: self.config.agent_timeout,
                        progress_dir: progress_dir.clone(),
                    };
                    let scout_launcher = self.launcher("codebase-scout")?;

                    let mut gate = GateResult::fail(vec!["analysis never ran".into()]);
                    for attempt in 1..=PHASE_ATTEMPTS {
                        let outcome = retry(max_attempts, |_attempt| {
                            phases::run_analysis(
                                &ctx,
                                scout_launcher,
                                self.config.ambiguity_threshold,
                                self.config.halt_on_ambiguity,
                            )
                        })
                        .await
                        .map_err(|e| e.last_error)?;

                        if let Some(status) = self.record_tokens(
                            issue_number,
                            &mut tracker,
                            PhaseId::Analysis,
                            &outcome.agent_result.agent,
                            outcome.agent_result.token_usage,
                        )? {
                            return Ok(self.budget_exceeded_outcome(issue_number, &tracker, &state, status));
                        }
                        if let Some(status) = self.record_tokens(
                            issue_number,
                            &mut tracker,
                            PhaseId::Analysis,
                            &outcome.scout_result.agent,
                            outcome.scout_result.token_usage,
                        )? {
                            return Ok(self.budget_exceeded_outcome(issue_number, &tracker, &state, status));
                        }

                        let handoff_gate = gate::analysis_to_planning_gate(
                            &outcome.output_path,
                            &outcome.scout_report_path,
                        );
                        let merged = GateResult::merge(&[outcome.gate.clone(), handoff_gate]);

                        state = self
                            .checkpoints
                            .record_phase_output(issue_number, PhaseId::Analysis, outcome.output_path.clone())?;
                        state =
                            self.checkpoints
                                .record_gate_result(issue_number, PhaseId::Analysis, merged.clone())?;
                        gate = merged;

                        let markdown = std::fs::read_to_string(&outcome.output_path).unwrap_or_default();
                        let ambiguities = extract_ambiguities(&markdown);
                        self.platform
                            .post_comment(
                                issue_number,
                                &format!("analysis complete: {} ambiguities raised", ambiguities.len()),
                            )
                            .await
                            .ok();

                        if gate.is_passable() || attempt == PHASE_ATTEMPTS {
                            break;
                        }
                    }
                    gate
                }

                PhaseId::Planning => {
                    let analysis_path = state
                        .phase_outputs
                        .get(&PhaseId::Analysis.ordinal())
                        .cloned()
                        .ok_or_else(|| anyhow!("missing analysis output in checkpoint"))?;
                    let analysis_text = std::fs::read_to_string(&analysis_path).unwrap_or_default();

                    let ctx = PhaseContext {
                        issue: &issue,
                        worktree_path: &worktree.path,
                        launcher: self.launcher("task-planner")?,
                        agent_timeout: self.config.agent_timeout,
                        progress_dir: progress_dir.clone(),
                    };

                    let mut gate = GateResult::fail(vec!["planning never ran".into()]);
                    for attempt in 1..=PHASE_ATTEMPTS {
                        let outcome = retry(max_attempts, |_attempt| phases::run_planning(&ctx, &analysis_text))
                            .await
                            .map_err(|e| e.last_error)?;

                        if let Some(status) = self.record_tokens(
                            issue_number,
                            &mut tracker,
                            PhaseId::Planning,
                            &outcome.agent_result.agent,
                            outcome.agent_result.token_usage,
                        )? {
                            return Ok(self.budget_exceeded_outcome(issue_number, &tracker, &state, status));
                        }

                        let plan_gate = GateResult::merge(&[
                            outcome.gate.clone(),
                            gate::planning_to_implementation_gate(&outcome.queue.tasks(), &worktree.path),
                        ]);

                        state = self.checkpoints.record_phase_output(
                            issue_number,
                            PhaseId::Planning,
                            outcome.agent_result.output_path.clone(),
                        )?;
                        state =
                            self.checkpoints
                                .record_gate_result(issue_number, PhaseId::Planning, plan_gate.clone())?;
                        gate = plan_gate;

                        if gate.is_passable() || attempt == PHASE_ATTEMPTS {
                            break;
                        }
                    }
                    gate
                }

                PhaseId::Implementation => {
                    let plan_path = state
                        .phase_outputs
                        .get(&PhaseId::Planning.ordinal())
                        .cloned()
                        .ok_or_else(|| anyhow!("missing plan output in checkpoint"))?;
                    let markdown = std::fs::read_to_string(&plan_path)?;

                    let mut gate = GateResult::fail(vec!["implementation never ran".into()]);
                    for attempt in 1..=PHASE_ATTEMPTS {
                        // A retry gives previously failed/blocked tasks a
                        // fresh attempt rather than repeating the failure.
                        state = self.checkpoints.reset_unresolved_tasks(issue_number)?;
                        let mut queue = plan::parse_plan(&markdown)?;
                        queue.restore_state(state.completed_tasks.clone(), Default::default(), Default::default());

                        loop {
                            if queue.is_complete() {
                                break;
                            }
                            // Never cancel a batch mid-flight: only refuse to
                            // start the *next* one. The agents already
                            // dispatched below are always joined via
                            // `join_all` before this loop iterates again.
                            if cancel.is_cancelled() {
                                return Ok(self.cancelled_outcome(issue_number, &tracker, &state, code_complete));
                            }
                            let batch = queue.next_batch(self.config.max_parallel_agents.max(1));
                            if batch.is_empty() {
                                break;
                            }
                            for id in &batch {
                                queue.mark_in_flight(id);
                                state = self.checkpoints.start_task(issue_number, id)?;
                            }

                            let batch_tasks: Vec<Task> = batch
                                .iter()
                                .map(|id| queue.task(id).expect("batch member exists").clone())
                                .collect();
                            let futures = batch_tasks
                                .iter()
                                .map(|task| self.implement_task(&issue, &worktree.path, &progress_dir, task));
                            let results = futures::future::join_all(futures).await;

                            for (id, result) in batch.iter().zip(results) {
                                match result {
                                    Ok((task_gate, tokens_by_agent)) if task_gate.is_passable() => {
                                        for (agent, tokens) in tokens_by_agent {
                                            if let Some(status) = self.record_tokens(
                                                issue_number,
                                                &mut tracker,
                                                PhaseId::Implementation,
                                                &agent,
                                                tokens,
                                            )? {
                                                return Ok(self.budget_exceeded_outcome(
                                                    issue_number,
                                                    &tracker,
                                                    &state,
                                                    status,
                                                ));
                                            }
                                        }
                                        queue.mark_completed(id);
                                        state = self.checkpoints.complete_task(issue_number, id.clone())?;
                                    }
                                    Ok((_, tokens_by_agent)) => {
                                        for (agent, tokens) in tokens_by_agent {
                                            if let Some(status) = self.record_tokens(
                                                issue_number,
                                                &mut tracker,
                                                PhaseId::Implementation,
                                                &agent,
                                                tokens,
                                            )? {
                                                return Ok(self.budget_exceeded_outcome(
                                                    issue_number,
                                                    &tracker,
                                                    &state,
                                                    status,
                                                ));
                                            }
                                        }
                                        queue.mark_failed(id);
                                        state = self.checkpoints.fail_task(issue_number, id.clone())?;
                                    }
                                    Err(_) => {
                                        queue.mark_failed(id);
                                        state = self.checkpoints.fail_task(issue_number, id.clone())?;
                                    }
                                }
                            }
                            for blocked in queue.blocked() {
                                state = self.checkpoints.block_task(issue_number, blocked.clone())?;
                            }
                        }

                        gate = if queue.has_unrecoverable_failure() {
                            GateResult::fail(vec![format!(
                                "{} task(s) failed, {} blocked",
                                queue.failed().len(),
                                queue.blocked().len()
                            )])
                        } else {
                            GateResult::pass()
                        };
                        state =
                            self.checkpoints
                                .record_gate_result(issue_number, PhaseId::Implementation, gate.clone())?;
                        code_complete = true;

                        if gate.is_passable() || attempt == PHASE_ATTEMPTS {
                            break;
                        }
                    }
                    gate
                }

                PhaseId::IntegrationVerification => {
                    let baseline_path = integration::baseline_path(self.checkpoints_root());
                    let baseline = BaselineResults::load(&baseline_path).unwrap_or_default();
                    let fix_surgeon = self.launcher("fix-surgeon")?;

                    let mut gate = GateResult::fail(vec!["integration verification never ran".into()]);
                    for attempt in 1..=PHASE_ATTEMPTS {
                        let (run_gate, report) = integration::run_integration_phase(
                            &worktree.path,
                            &self.verification_commands,
                            &baseline,
                            fix_surgeon,
                            &progress_dir,
                            self.config.max_integration_fix_rounds,
                        )
                        .await?;

                        let diff_gate = state
                            .base_commit
                            .as_deref()
                            .map(|base| gate::implementation_to_integration_gate(&worktree.path, base))
                            .unwrap_or_else(GateResult::pass);

                        let report_path = progress_dir.join("integration-report.md");
                        std::fs::write(&report_path, &report)
                            .with_context(|| format!("writing {}", report_path.display()))?;

                        state = self.checkpoints.record_phase_output(
                            issue_number,
                            PhaseId::IntegrationVerification,
                            report_path,
                        )?;
                        let merged = GateResult::merge(&[diff_gate, run_gate]);
                        state = self.checkpoints.record_gate_result(
                            issue_number,
                            PhaseId::IntegrationVerification,
                            merged.clone(),
                        )?;
                        gate = merged;

                        if gate.is_passable() || self.config.skip_validation || attempt == PHASE_ATTEMPTS {
                            break;
                        }
                    }
                    gate
                }

                PhaseId::PullRequest => {
                    if self.config.dry_run {
                        state = self.checkpoints.record_gate_result(
                            issue_number,
                            PhaseId::PullRequest,
                            GateResult::pass(),
                        )?;
                        state = self.checkpoints.complete_phase(issue_number, PhaseId::PullRequest)?;
                        break;
                    }

                    let ctx = PhaseContext {
                        issue: &issue,
                        worktree_path: &worktree.path,
                        launcher: self.launcher("pr-writer")?,
                        agent_timeout: self.config.agent_timeout,
                        progress_dir: progress_dir.clone(),
                    };

                    let mut gate = GateResult::fail(vec!["pull request draft never ran".into()]);
                    for attempt in 1..=PHASE_ATTEMPTS {
                        let draft = retry(max_attempts, |_attempt| phases::run_pull_request(&ctx))
                            .await
                            .map_err(|e| e.last_error)?;

                        if let Some(status) = self.record_tokens(
                            issue_number,
                            &mut tracker,
                            PhaseId::PullRequest,
                            &draft.agent_result.agent,
                            draft.agent_result.token_usage,
                        )? {
                            return Ok(self.budget_exceeded_outcome(issue_number, &tracker, &state, status));
                        }

                        state =
                            self.checkpoints
                                .record_gate_result(issue_number, PhaseId::PullRequest, draft.gate.clone())?;
                        gate = draft.gate.clone();

                        if gate.is_passable() {
                            // A review-response cycle re-runs this phase
                            // against an already-open PR (`pr_number`
                            // survives the reset of phases 3..5): update its
                            // description rather than opening a second PR.
                            if let Some(pr_number) = state.pr_number {
                                self.platform
                                    .update_pull_request(pr_number, &draft.title, &draft.body)
                                    .await
                                    .context("updating pull request")?;
                            } else {
                                let pr = self
                                    .platform
                                    .open_pull_request(
                                        issue_number,
                                        &draft.title,
                                        &draft.body,
                                        &worktree.branch,
                                        "main",
                                        false,
                                    )
                                    .await
                                    .context("opening pull request")?;
                                state.pr_number = Some(pr.number);
                                self.checkpoints.save(issue_number, &state)?;
                                pull_request = Some(pr);
                            }
                            break;
                        }

                        if attempt == PHASE_ATTEMPTS {
                            break;
                        }
                    }
                    gate
                }
            };

            if !gate.is_passable() {
                return Ok(IssueOutcome {
                    issue_number,
                    success: false,
                    error: Some(format!(
                        "{phase_id} phase failed after retry: {}",
                        gate.errors.join("; ")
                    )),
                    code_complete,
                    branch_name: state.branch_name.clone(),
                    pull_request: None,
                    token_usage: tracker.usage().clone(),
                });
            }

            state = self.checkpoints.complete_phase(issue_number, phase_id)?;
            phase = resume_point(&state.completed_phases);
        }

        Ok(IssueOutcome {
            issue_number,
            success: true,
            error: None,
            code_complete,
            branch_name: state.branch_name.clone(),
            pull_request,
            token_usage: tracker.usage().clone(),
        })
    }

    /// `.cadre` root shared by the checkpoint store, used to locate the
    /// sibling `baseline-results.json`.
    fn checkpoints_root(&self) -> &std::path::Path {
        self.checkpoints.root()
    }

    /// Record an agent's token spend against the tracker and the checkpoint.
    /// Returns `Some(Halt)` when the run must abort for budget reasons; a
    /// `Warn` status is logged and otherwise ignored.
    fn record_tokens(
        &self,
        issue_number: u64,
        tracker: &mut TokenTracker,
        phase: PhaseId,
        agent: &str,
        tokens: u64,
    ) -> Result<Option<crate::token::BudgetStatus>> {
        let status = tracker.record(phase, agent, tokens);
        self.checkpoints.record_token_usage(issue_number, tracker.usage().clone())?;
        match status {
            crate::token::BudgetStatus::Halt => Ok(Some(status)),
            crate::token::BudgetStatus::Warn => {
                tracing::warn!(
                    issue = issue_number,
                    total = tracker.usage().total,
                    "token budget warn threshold crossed"
                );
                Ok(None)
            }
            crate::token::BudgetStatus::Ok => Ok(None),
        }
    }

    /// Build the `IssueOutcome` for a run stopped at a phase boundary by
    /// external cancellation. The checkpoint already reflects the last
    /// completed phase, so a later `run_issue` call resumes cleanly.
    fn cancelled_outcome(
        &self,
        issue_number: u64,
        tracker: &TokenTracker,
        state: &crate::model::CheckpointState,
        code_complete: bool,
    ) -> IssueOutcome {
        IssueOutcome {
            issue_number,
            success: false,
            error: Some("cancelled".to_string()),
            code_complete,
            branch_name: state.branch_name.clone(),
            pull_request: None,
            token_usage: tracker.usage().clone(),
        }
    }

    /// Build the aborted `IssueOutcome` for a crossed halt threshold.
    fn budget_exceeded_outcome(
        &self,
        issue_number: u64,
        tracker: &TokenTracker,
        state: &crate::model::CheckpointState,
        _status: crate::token::BudgetStatus,
    ) -> IssueOutcome {
        let err = crate::error::CadreError::TokenBudgetExceeded {
            used: tracker.usage().total,
            limit: self.config.token_halt_at.unwrap_or(tracker.usage().total),
        };
        IssueOutcome {
            issue_number,
            success: false,
            error: Some(err.to_string()),
            code_complete: state.completed_phases.contains(&PhaseId::Implementation.ordinal()),
            branch_name: state.branch_name.clone(),
            pull_request: None,
            token_usage: tracker.usage().clone(),
        }
    }

    /// Runs one task's implementation sub-pipeline: `code-writer`, then
    /// `test-writer`, an optional bounded build-fix loop, then
    /// `code-reviewer`. Returns the merged gate and each agent's token
    /// spend for the caller to record against the tracker.
    async fn implement_task(
        &self,
        issue: &Issue,
        worktree_path: &std::path::Path,
        progress_dir: &std::path::Path,
        task: &Task,
    ) -> Result<(GateResult, Vec<(String, u64)>)> {
        let mut gates = Vec::new();
        let mut tokens = Vec::new();

        let writer_ctx = PhaseContext {
            issue,
            worktree_path,
            launcher: self.launcher("code-writer")?,
            agent_timeout: self.config.agent_timeout,
            progress_dir: progress_dir.to_path_buf(),
        };
        let write_outcome = phases::run_implementation_task(&writer_ctx, task).await?;
        tokens.push((write_outcome.agent_result.agent.clone(), write_outcome.agent_result.token_usage));
        gates.push(write_outcome.gate);

        let tester_ctx = PhaseContext {
            issue,
            worktree_path,
            launcher: self.launcher("test-writer")?,
            agent_timeout: self.config.agent_timeout,
            progress_dir: progress_dir.to_path_buf(),
        };
        let test_outcome = phases::run_implementation_task(&tester_ctx, task).await?;
        tokens.push((test_outcome.agent_result.agent.clone(), test_outcome.agent_result.token_usage));
        gates.push(test_outcome.gate);

        if self.config.per_task_build_check {
            let build = CommandSpec::new("build", "cargo", vec!["build".into(), "--workspace".into()]);
            let mut round = 0;
            loop {
                let result = crate::invariant::run_command(&build, worktree_path).await?;
                if result.passed || round >= self.config.max_build_fix_rounds {
                    gates.push(gate::command_gate("per-task build", &result));
                    break;
                }
                round += 1;
                let fix_surgeon = self.launcher("fix-surgeon")?;
                let invocation = AgentInvocation {
                    prompt: format!(
                        "Task '{}' broke the build:\n\n{}\n{}",
                        task.name, result.stdout, result.stderr
                    ),
                    working_dir: worktree_path.to_path_buf(),
                    output_path: progress_dir.join(format!("fix-surgeon-task-{}-{round}.md", task.id)),
                    timeout: self.config.agent_timeout,
                };
                let fix_result = fix_surgeon.invoke(&invocation).await?;
                tokens.push((fix_result.agent.clone(), fix_result.token_usage));
                if !fix_result.success {
                    break;
                }
            }
        }

        let reviewer_ctx = PhaseContext {
            issue,
            worktree_path,
            launcher: self.launcher("code-reviewer")?,
            agent_timeout: self.config.agent_timeout,
            progress_dir: progress_dir.to_path_buf(),
        };
        let review_outcome = phases::run_implementation_task(&reviewer_ctx, task).await?;
        tokens.push((review_outcome.agent_result.agent.clone(), review_outcome.agent_result.token_usage));
        gates.push(review_outcome.gate);

        if review_outcome.agent_result.success {
            let verdict = std::fs::read_to_string(&review_outcome.agent_result.output_path).unwrap_or_default();
            if verdict.to_lowercase().contains("request-changes") {
                gates.push(GateResult::fail(vec![format!("code-reviewer requested changes on task {}", task.id)]));
            }
        }

        Ok((GateResult::merge(&gates), tokens))
    }
}

/// Extract bullet items between a `## Ambiguities` heading and the next
/// `## ` heading (or end of document).
fn extract_ambiguities(markdown: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut in_section = false;

    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if trimmed.to_lowercase().starts_with("## ambiguities") {
            in_section = true;
            continue;
        }
        if in_section && trimmed.starts_with("## ") {
            break;
        }
        if in_section && (trimmed.starts_with("- ") || trimmed.starts_with("* ")) {
            items.push(trimmed.trim_start_matches(['-', '*']).trim().to_string());
        }
    }

    items
}

/// The smallest phase not yet in `completed_phases`, or `None` if all five
/// are complete.
fn resume_point(completed_phases: &std::collections::BTreeSet<u8>) -> Option<PhaseId> {
    PhaseId::ALL.into_iter().find(|p| !completed_phases.contains(&p.ordinal()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{ScriptedLauncher, ScriptedResponse};
    use crate::model::{Issue, IssueState};
    use crate::platform::FakePlatformProvider;
    use chrono::Utc;
    use std::process::Command;
    use tempfile::TempDir;

    fn issue(number: u64) -> Issue {
        Issue {
            number,
            title: "Add widget".into(),
            body: "We need a widget".into(),
            labels: Default::default(),
            assignees: vec![],
            state: IssueState::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            comments: vec![],
        }
    }

    fn init_repo(dir: &std::path::Path) {
        let run = |args: &[&str]| {
            Command::new("git").args(args).current_dir(dir).output().expect("git")
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@cadre.dev"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.join("README.md"), "hello").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "init"]);
    }

    fn registry_for_happy_path() -> LauncherRegistry {
        let mut registry = LauncherRegistry::new();
        registry.register(ScriptedLauncher::new(
            "issue-analyst",
            vec![ScriptedResponse::success("# Analysis\n\n## Summary\n\nNo ambiguities.\n")],
        ));
        registry.register(ScriptedLauncher::new(
            "codebase-scout",
            vec![ScriptedResponse::success("- src/auth.ts\n")],
        ));
        registry.register(ScriptedLauncher::new(
            "task-planner",
            vec![ScriptedResponse::success(
                r#"```json
{"tasks":[{"id":"session-001","name":"Add auth","description":"d","files":["src/auth.ts"],"dependencies":[],"acceptance_criteria":[],"complexity":"small"}]}
```"#,
            )],
        ));
        registry.register(ScriptedLauncher::always_succeeds("code-writer"));
        registry.register(ScriptedLauncher::always_succeeds("test-writer"));
        registry.register(ScriptedLauncher::new(
            "code-reviewer",
            vec![ScriptedResponse::success("verdict: pass")],
        ));
        registry.register(ScriptedLauncher::always_succeeds("fix-surgeon"));
        registry.register(ScriptedLauncher::new(
            "pr-writer",
            vec![ScriptedResponse::success("Add the widget feature\n\nCloses #42.")],
        ));
        registry
    }

    #[tokio::test]
    async fn happy_path_one_task_completes_all_phases_and_opens_pr() {
        let repo_dir = TempDir::new().unwrap();
        init_repo(repo_dir.path());
        let checkpoints_dir = TempDir::new().unwrap();

        let launchers = Arc::new(registry_for_happy_path());
        let platform = Arc::new(FakePlatformProvider::new());
        platform.seed_issue(issue(42));

        let worktree_manager = WorktreeManager::new(repo_dir.path(), None).unwrap();
        let checkpoints = CheckpointStore::new(checkpoints_dir.path());
        let config = OrchestratorConfig {
            max_retries_per_task: 3,
            ..OrchestratorConfig::default()
        };

        let orchestrator = IssueOrchestrator::new(
            launchers,
            platform.clone(),
            worktree_manager,
            checkpoints,
            config,
            vec![VerificationCommand::new(CommandSpec::new("build", "true", vec![]), true)],
        );

        let outcome = orchestrator.run_issue(42, &CancellationToken::new()).await.unwrap();
        assert!(outcome.success, "expected success, got error: {:?}", outcome.error);
        assert!(outcome.code_complete);
        assert!(outcome.pull_request.is_some());
        assert_eq!(outcome.pull_request.unwrap().number, 1);
    }

    #[tokio::test]
    async fn ambiguity_halt_aborts_after_retry_exhausted() {
        let repo_dir = TempDir::new().unwrap();
        init_repo(repo_dir.path());
        let checkpoints_dir = TempDir::new().unwrap();

        let mut registry = LauncherRegistry::new();
        registry.register(ScriptedLauncher::new(
            "issue-analyst",
            vec![ScriptedResponse::success(
                "# Analysis\n\n## Ambiguities\n- which format?\n- which port?\n- which auth scheme?\n",
            )],
        ));
        registry.register(ScriptedLauncher::new(
            "codebase-scout",
            vec![ScriptedResponse::success("- src/auth.ts\n")],
        ));
        let launchers = Arc::new(registry);
        let platform = Arc::new(FakePlatformProvider::new());
        platform.seed_issue(issue(42));

        let worktree_manager = WorktreeManager::new(repo_dir.path(), None).unwrap();
        let checkpoints = CheckpointStore::new(checkpoints_dir.path());
        let config = OrchestratorConfig {
            ambiguity_threshold: 2,
            halt_on_ambiguity: true,
            ..OrchestratorConfig::default()
        };

        let orchestrator = IssueOrchestrator::new(launchers, platform, worktree_manager, checkpoints, config, vec![]);
        let outcome = orchestrator.run_issue(42, &CancellationToken::new()).await.unwrap();

        assert!(!outcome.success);
        let error = outcome.error.unwrap();
        assert!(error.contains('3'), "error should mention the count: {error}");
        assert!(error.contains('2'), "error should mention the threshold: {error}");
        assert!(outcome.pull_request.is_none());
    }

    #[test]
    fn resume_point_returns_smallest_incomplete_phase() {
        let mut completed = std::collections::BTreeSet::new();
        completed.insert(1);
        completed.insert(2);
        assert_eq!(resume_point(&completed), Some(PhaseId::Implementation));
    }

    #[test]
    fn resume_point_is_none_when_all_phases_complete() {
        let completed: std::collections::BTreeSet<u8> = (1..=5).collect();
        assert_eq!(resume_point(&completed), None);
    }

    #[test]
    fn extract_ambiguities_reads_bullets_under_heading() {
        let markdown = "# Analysis\n\n## Ambiguities\n- one\n- two\n\n## Risks\n- not this\n";
        let items = extract_ambiguities(markdown);
        assert_eq!(items, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn extract_ambiguities_empty_without_heading() {
        assert!(extract_ambiguities("# Analysis\n\nnothing here").is_empty());
    }
}
