//! Fleet Orchestrator (§4.8): drives up to `max_parallel_issues`
//! [`IssueOrchestrator`]s concurrently and aggregates their outcomes.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::model::{PullRequest, TokenUsage};
use crate::orchestrator::IssueOrchestrator;

/// Fleet-level concurrency knob. Distinct from
/// [`crate::orchestrator::OrchestratorConfig::max_parallel_agents`], which
/// bounds concurrency *within* one issue's Implementation phase.
#[derive(Debug, Clone, Copy)]
pub struct FleetConfig {
    pub max_parallel_issues: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self { max_parallel_issues: 1 }
    }
}

/// An issue whose Implementation phase completed but which never reached a
/// successful Pull Request phase -- code exists on a branch with no PR.
#[derive(Debug, Clone)]
pub struct CodeDoneNoPr {
    pub issue_number: u64,
    pub branch_name: String,
}

/// An issue that failed outright, with the infrastructure error or
/// business-logic halt reason that stopped it.
#[derive(Debug, Clone)]
pub struct FailedIssue {
    pub issue_number: u64,
    pub error: String,
}

/// Aggregate result of running a fleet of issues.
#[derive(Debug, Clone, Default)]
pub struct FleetReport {
    pub success: bool,
    pub issues: Vec<u64>,
    pub prs_created: Vec<PullRequest>,
    pub failed_issues: Vec<FailedIssue>,
    pub code_done_no_pr: Vec<CodeDoneNoPr>,
    pub total_duration_ms: u64,
    pub token_usage: TokenUsage,
}

/// Drives a batch of issues through their individual [`IssueOrchestrator`]s,
/// bounded to `config.max_parallel_issues` concurrent runs.
pub struct FleetOrchestrator {
    orchestrator: Arc<IssueOrchestrator>,
    config: FleetConfig,
}

impl FleetOrchestrator {
    pub fn new(orchestrator: Arc<IssueOrchestrator>, config: FleetConfig) -> Self {
        Self { orchestrator, config }
    }

    /// Run every issue number in `issue_numbers`, honoring the configured
    /// concurrency cap. Each issue's result -- success, business failure, or
    /// infrastructure error -- is folded into the returned report; no single
    /// issue's failure aborts the others, mirroring a `Promise.allSettled`
    /// semantics over one `IssueOrchestrator::run_issue` call per issue.
    /// `cancel` is shared across every issue: once fired, each issue stops at
    /// its next phase boundary rather than being killed mid-phase.
    pub async fn run(&self, issue_numbers: Vec<u64>, cancel: CancellationToken) -> FleetReport {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_issues.max(1)));
        let start = std::time::Instant::now();

        let tasks = issue_numbers.into_iter().map(|issue_number| {
            let semaphore = Arc::clone(&semaphore);
            let orchestrator = Arc::clone(&self.orchestrator);
            let cancel = cancel.clone();
            async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                (issue_number, orchestrator.run_issue(issue_number, &cancel).await)
            }
        });

        let results = futures::future::join_all(tasks).await;

        let mut report = FleetReport {
            success: true,
            total_duration_ms: start.elapsed().as_millis() as u64,
            ..FleetReport::default()
        };

        for (issue_number, result) in results {
            report.issues.push(issue_number);
            match result {
                Ok(outcome) if outcome.success => {
                    if let Some(pr) = outcome.pull_request {
                        report.prs_created.push(pr);
                    }
                    report.token_usage.total += outcome.token_usage.total;
                }
                Ok(outcome) => {
                    report.success = false;
                    report.token_usage.total += outcome.token_usage.total;
                    if outcome.code_complete {
                        report.code_done_no_pr.push(CodeDoneNoPr {
                            issue_number,
                            branch_name: outcome.branch_name.unwrap_or_default(),
                        });
                    }
                    report.failed_issues.push(FailedIssue {
                        issue_number,
                        error: outcome.error.unwrap_or_else(|| "unknown failure".to_string()),
                    });
                }
                Err(e) => {
                    report.success = false;
                    report.failed_issues.push(FailedIssue {
                        issue_number,
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStore;
    use crate::launcher::{LauncherRegistry, ScriptedLauncher, ScriptedResponse};
    use crate::model::{Issue, IssueState};
    use crate::orchestrator::OrchestratorConfig;
    use crate::platform::FakePlatformProvider;
    use crate::worktree::WorktreeManager;
    use chrono::Utc;
    use std::process::Command;
    use tempfile::TempDir;

    fn issue(number: u64) -> Issue {
        Issue {
            number,
            title: format!("issue {number}"),
            body: "body".into(),
            labels: Default::default(),
            assignees: vec![],
            state: IssueState::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            comments: vec![],
        }
    }

    fn init_repo(dir: &std::path::Path) {
        let run = |args: &[&str]| Command::new("git").args(args).current_dir(dir).output().expect("git");
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@cadre.dev"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.join("README.md"), "hello").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "init"]);
    }

    #[tokio::test]
    async fn aggregates_one_success_and_one_ambiguity_halt() {
        let repo_dir = TempDir::new().unwrap();
        init_repo(repo_dir.path());
        let checkpoints_dir = TempDir::new().unwrap();

        let mut registry = LauncherRegistry::new();
        registry.register(ScriptedLauncher::new(
            "issue-analyst",
            vec![ScriptedResponse::success("# Analysis\n\n## Ambiguities\n- a\n- b\n- c\n")],
        ));
        let launchers = Arc::new(registry);

        let platform = Arc::new(FakePlatformProvider::new());
        platform.seed_issue(issue(1));
        platform.seed_issue(issue(2));

        let worktree_manager = WorktreeManager::new(repo_dir.path(), None).unwrap();
        let checkpoints = CheckpointStore::new(checkpoints_dir.path());
        let config = OrchestratorConfig {
            ambiguity_threshold: 1,
            halt_on_ambiguity: true,
            ..OrchestratorConfig::default()
        };

        let orchestrator = Arc::new(IssueOrchestrator::new(
            launchers,
            platform,
            worktree_manager,
            checkpoints,
            config,
            vec![],
        ));
        let fleet = FleetOrchestrator::new(orchestrator, FleetConfig { max_parallel_issues: 2 });

        let report = fleet.run(vec![1, 2], CancellationToken::new()).await;
        assert!(!report.success);
        assert_eq!(report.failed_issues.len(), 2);
        assert_eq!(report.issues.len(), 2);
    }
}
