//! Review-Response Orchestrator (§4.9): the alternate top-level loop that
//! handles issues whose open PR has unresolved review feedback.
//!
//! Rebases the PR's branch onto its base, resolving conflicts with a
//! `conflict-resolver` agent if needed, then resets phases 3..5 on the
//! issue's checkpoint and re-runs the [`IssueOrchestrator`] over just those
//! phases before force-pushing the rebased branch.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio_util::sync::CancellationToken;

use crate::launcher::AgentInvocation;
use crate::orchestrator::IssueOrchestrator;
use crate::worktree::{RebaseOutcome, WorktreeManager};

/// The phases reset and re-driven by a review-response cycle.
pub const REVIEW_RESPONSE_PHASES: [u8; 3] = [3, 4, 5];

/// Why an issue's review-response cycle did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoOpenPullRequest,
    NoUnresolvedFeedback,
}

/// Outcome of running one issue through the review-response cycle.
#[derive(Debug, Clone)]
pub enum ReviewResponseOutcome {
    Skipped { issue_number: u64, reason: SkipReason },
    Completed { issue_number: u64, pr_number: u64 },
    Failed { issue_number: u64, error: String },
}

/// Drives the review-response cycle for a pre-selected subset of issues.
pub struct ReviewResponseOrchestrator {
    orchestrator: Arc<IssueOrchestrator>,
    auto_reply_on_resolved: bool,
}

impl ReviewResponseOrchestrator {
    pub fn new(orchestrator: Arc<IssueOrchestrator>, auto_reply_on_resolved: bool) -> Self {
        Self {
            orchestrator,
            auto_reply_on_resolved,
        }
    }

    /// Run the review-response cycle for one issue. Like
    /// [`IssueOrchestrator::run_issue`], an `Err` here is an infrastructure
    /// failure; a skip or a business-logic failure is reported as `Ok`.
    pub async fn run_issue(&self, issue_number: u64, cancel: &CancellationToken) -> Result<ReviewResponseOutcome> {
        let branch = WorktreeManager::resolve_branch_name(issue_number);

        let pr = match self
            .orchestrator
            .platform()
            .find_open_pull_request(issue_number, &branch)
            .await
            .with_context(|| format!("looking up open pull request for issue #{issue_number}"))?
        {
            Some(pr) => pr,
            None => {
                return Ok(ReviewResponseOutcome::Skipped {
                    issue_number,
                    reason: SkipReason::NoOpenPullRequest,
                });
            }
        };

        let threads = self
            .orchestrator
            .platform()
            .list_review_threads(pr.number)
            .await
            .with_context(|| format!("listing review threads for pr #{}", pr.number))?;
        let has_unresolved_feedback = threads.iter().any(|t| !t.resolved && !t.outdated);
        if !has_unresolved_feedback {
            return Ok(ReviewResponseOutcome::Skipped {
                issue_number,
                reason: SkipReason::NoUnresolvedFeedback,
            });
        }

        let worktree = self
            .orchestrator
            .worktree_manager()
            .provision_from_branch(issue_number, &pr.head)
            .with_context(|| format!("provisioning review worktree for issue #{issue_number}"))?;

        if let Err(e) = self.rebase_onto_base(issue_number, &worktree.path, &pr.base).await {
            return Ok(ReviewResponseOutcome::Failed {
                issue_number,
                error: e.to_string(),
            });
        }

        self.reset_phases(issue_number)
            .with_context(|| format!("resetting checkpoint phases for issue #{issue_number}"))?;

        let outcome = self.orchestrator.run_issue(issue_number, cancel).await?;
        if !outcome.success {
            return Ok(ReviewResponseOutcome::Failed {
                issue_number,
                error: outcome.error.unwrap_or_else(|| "review-response re-run failed".into()),
            });
        }

        self.force_push(&worktree.path, &pr.head)
            .with_context(|| format!("force-pushing rebased branch for issue #{issue_number}"))?;

        if self.auto_reply_on_resolved {
            self.orchestrator
                .platform()
                .post_comment(issue_number, &format!("Review feedback addressed in #{}.", pr.number))
                .await
                .ok();
        }

        Ok(ReviewResponseOutcome::Completed {
            issue_number,
            pr_number: pr.number,
        })
    }

    async fn rebase_onto_base(&self, issue_number: u64, worktree_path: &Path, base: &str) -> Result<()> {
        let manager = self.orchestrator.worktree_manager();
        match manager.rebase_start(worktree_path, base)? {
            RebaseOutcome::Clean => Ok(()),
            RebaseOutcome::Conflict { files } => self.resolve_conflict(issue_number, worktree_path, files).await,
        }
    }

    async fn resolve_conflict(&self, issue_number: u64, worktree_path: &Path, files: Vec<String>) -> Result<()> {
        let manager = self.orchestrator.worktree_manager();
        let resolver = self.orchestrator.resolve_launcher("conflict-resolver")?;

        let invocation = AgentInvocation {
            prompt: format!(
                "Rebasing issue #{issue_number}'s branch hit conflicts in:\n{}\n\nResolve them in place and stage the result.",
                files.join("\n")
            ),
            working_dir: worktree_path.to_path_buf(),
            output_path: worktree_path.join(".cadre-progress").join("conflict-resolution.md"),
            timeout: self.orchestrator.config().agent_timeout,
        };

        let result = resolver.invoke(&invocation).await?;
        if !result.success {
            manager.rebase_abort(worktree_path)?;
            return Err(anyhow!(
                "conflict-resolver failed to resolve conflicts in {}",
                files.join(", ")
            ));
        }

        match manager.rebase_continue(worktree_path)? {
            RebaseOutcome::Clean => Ok(()),
            RebaseOutcome::Conflict { files } => {
                manager.rebase_abort(worktree_path)?;
                Err(anyhow!(
                    "rebase still conflicted after conflict-resolver ran: {}",
                    files.join(", ")
                ))
            }
        }
    }

    /// Clear phases 3..5's completion state, task sets, and outputs so the
    /// next [`IssueOrchestrator::run_issue`] call resumes at Implementation.
    /// `pr_number` is deliberately left untouched so the re-run's Pull
    /// Request phase updates this PR instead of opening a second one.
    fn reset_phases(&self, issue_number: u64) -> Result<()> {
        self.orchestrator
            .checkpoints()
            .reset_phases_for_rerun(issue_number, &REVIEW_RESPONSE_PHASES)?;
        Ok(())
    }

    fn force_push(&self, worktree_path: &Path, branch: &str) -> Result<()> {
        let output = std::process::Command::new("git")
            .args(["push", "--force-with-lease", "origin", branch])
            .current_dir(worktree_path)
            .output()
            .context("running git push")?;
        if !output.status.success() {
            return Err(anyhow!("git push failed: {}", String::from_utf8_lossy(&output.stderr)));
        }
        Ok(())
    }
}
