//! The five ordered Phase Executors (§4.6): Analysis, Planning,
//! Implementation, Integration Verification, Pull Request. Each phase
//! builds a prompt, invokes an agent through [`AgentLauncher`], and
//! evaluates the phase's gates against the result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::gate;
use crate::invariant::{run_command, CommandResult, CommandSpec};
use crate::launcher::{AgentInvocation, AgentLauncher};
use crate::model::{AgentInvocationResult, GateResult, Issue, Task};
use crate::plan::{self, PlanParseError};
use crate::queue::TaskQueue;

/// Shared invocation parameters for a phase running in an issue's worktree.
pub struct PhaseContext<'a> {
    pub issue: &'a Issue,
    pub worktree_path: &'a Path,
    pub launcher: &'a dyn AgentLauncher,
    pub agent_timeout: Duration,
    /// `.cadre/issues/<n>/` directory where phase artifacts are written.
    pub progress_dir: PathBuf,
}

impl<'a> PhaseContext<'a> {
    fn output_path(&self, file_name: &str) -> PathBuf {
        self.progress_dir.join(file_name)
    }

    async fn invoke(&self, prompt: String, output_file: &str) -> Result<AgentInvocationResult> {
        let invocation = AgentInvocation {
            prompt,
            working_dir: self.worktree_path.to_path_buf(),
            output_path: self.output_path(output_file),
            timeout: self.agent_timeout,
        };
        self.launcher
            .invoke(&invocation)
            .await
            .with_context(|| format!("agent invocation failed for issue #{}", self.issue.number))
    }
}

/// Outcome of the Analysis phase: the analyst's and scout's artifacts plus a
/// count of open questions the analysis raised, gated against the ambiguity
/// threshold.
pub struct AnalysisOutcome {
    pub agent_result: AgentInvocationResult,
    pub scout_result: AgentInvocationResult,
    pub output_path: PathBuf,
    pub scout_report_path: PathBuf,
    pub open_questions: u32,
    pub gate: GateResult,
}

pub async fn run_analysis(
    ctx: &PhaseContext<'_>,
    scout_launcher: &dyn AgentLauncher,
    ambiguity_threshold: u32,
    halt_on_ambiguity: bool,
) -> Result<AnalysisOutcome> {
    let tree_path = ctx.output_path("repo-file-tree.txt");
    let file_tree = write_repo_file_tree(ctx.worktree_path, &tree_path)?;

    let prompt = format!(
        "Analyze issue #{}: {}\n\n{}\n\nWrite your analysis, including any open questions, to analysis.md.",
        ctx.issue.number, ctx.issue.title, ctx.issue.body
    );
    let agent_result = ctx.invoke(prompt, "analysis.md").await?;
    let invocation_gate = gate::agent_invocation_gate(&agent_result);

    let scout_invocation = AgentInvocation {
        prompt: format!(
            "Survey the repository for issue #{}: {}\n\nRepository file tree:\n{}\n\n\
             List the files relevant to this issue, one per bullet, in scout-report.md.",
            ctx.issue.number, ctx.issue.title, file_tree
        ),
        working_dir: ctx.worktree_path.to_path_buf(),
        output_path: ctx.output_path("scout-report.md"),
        timeout: ctx.agent_timeout,
    };
    let scout_result = scout_launcher
        .invoke(&scout_invocation)
        .await
        .with_context(|| format!("codebase-scout invocation failed for issue #{}", ctx.issue.number))?;
    let scout_gate = gate::agent_invocation_gate(&scout_result);

    let open_questions = if agent_result.success {
        count_open_questions(&agent_result.output_path)
    } else {
        0
    };
    let ambiguity_gate = gate::ambiguity_gate(open_questions, ambiguity_threshold, halt_on_ambiguity);

    Ok(AnalysisOutcome {
        gate: GateResult::merge(&[invocation_gate, scout_gate, ambiguity_gate]),
        output_path: agent_result.output_path.clone(),
        scout_report_path: scout_result.output_path.clone(),
        open_questions,
        agent_result,
        scout_result,
    })
}

/// Enumerate every file under `root` (excluding `.git` and `.cadre`),
/// writing one relative path per line to `dest`. Returns the rendered tree
/// so the caller can embed it directly in a prompt.
fn write_repo_file_tree(root: &Path, dest: &Path) -> Result<String> {
    let mut paths = Vec::new();
    collect_files(root, root, &mut paths)?;
    paths.sort();
    let rendered = paths.join("\n");
    std::fs::write(dest, &rendered).with_context(|| format!("writing {}", dest.display()))?;
    Ok(rendered)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if name == ".git" || name == ".cadre" {
            continue;
        }
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

fn count_open_questions(analysis_path: &Path) -> u32 {
    let Ok(content) = std::fs::read_to_string(analysis_path) else {
        return 0;
    };
    content
        .lines()
        .filter(|l| {
            let lower = l.to_lowercase();
            lower.contains("open question") || lower.trim_start().starts_with("- [ ]")
        })
        .count() as u32
}

/// Outcome of the Planning phase: a validated, cycle-checked task queue.
pub struct PlanningOutcome {
    pub agent_result: AgentInvocationResult,
    pub queue: TaskQueue,
    pub gate: GateResult,
}

/// Derive the planner's `maxTasksHint` from the `## Scope` section of the
/// analysis, per §4.6: `small -> 3`, `medium -> 6`, `large -> 10`. Defaults
/// to `medium` when the section is absent or doesn't name a size.
pub fn max_tasks_hint(analysis: &str) -> u32 {
    let mut in_scope = false;
    for line in analysis.lines() {
        let trimmed = line.trim_start();
        if trimmed.to_lowercase().starts_with("## scope") {
            in_scope = true;
            continue;
        }
        if in_scope && trimmed.starts_with("## ") {
            break;
        }
        if in_scope {
            let lower = trimmed.to_lowercase();
            if lower.contains("small") {
                return 3;
            }
            if lower.contains("large") {
                return 10;
            }
            if lower.contains("medium") {
                return 6;
            }
        }
    }
    6
}

pub async fn run_planning(ctx: &PhaseContext<'_>, analysis: &str) -> Result<PlanningOutcome> {
    let hint = max_tasks_hint(analysis);
    let prompt = format!(
        "Based on this analysis, write an implementation plan for issue #{} with at most {hint} tasks.\n\n{analysis}\n\n\
         Emit a fenced ```json code block with {{\"tasks\": [...]}} describing each task's id, \
         name, description, files, dependencies, acceptance_criteria, and complexity.",
        ctx.issue.number
    );
    let agent_result = ctx.invoke(prompt, "plan.md").await?;
    let invocation_gate = gate::agent_invocation_gate(&agent_result);

    if !agent_result.success {
        return Err(anyhow::anyhow!(
            "planning agent invocation failed for issue #{}",
            ctx.issue.number
        ));
    }

    let markdown = std::fs::read_to_string(&agent_result.output_path)
        .with_context(|| format!("failed to read plan output at {}", agent_result.output_path.display()))?;

    let queue = plan::parse_plan(&markdown).map_err(|e| match e {
        PlanParseError::NoJsonBlock => anyhow::anyhow!("planning output contained no JSON plan block"),
        other => anyhow::Error::new(other),
    })?;

    Ok(PlanningOutcome {
        gate: invocation_gate,
        agent_result,
        queue,
    })
}

/// Outcome of implementing a single task.
pub struct ImplementationOutcome {
    pub agent_result: AgentInvocationResult,
    pub gate: GateResult,
}

pub async fn run_implementation_task(ctx: &PhaseContext<'_>, task: &Task) -> Result<ImplementationOutcome> {
    let prompt = format!(
        "Implement task '{}' for issue #{}: {}\n\nFiles in scope: {:?}\nAcceptance criteria: {:?}",
        task.name, ctx.issue.number, task.description, task.files, task.acceptance_criteria
    );
    let output_file = format!("task-{}.md", task.id);
    let agent_result = ctx.invoke(prompt, &output_file).await?;
    let gate = gate::agent_invocation_gate(&agent_result);

    Ok(ImplementationOutcome { agent_result, gate })
}

/// Outcome of running the Integration Verification phase's command suite.
pub struct IntegrationOutcome {
    pub results: Vec<(CommandSpec, CommandResult)>,
    pub gate: GateResult,
}

pub async fn run_integration_verification(
    working_dir: &Path,
    commands: &[CommandSpec],
) -> Result<IntegrationOutcome> {
    let mut results = Vec::with_capacity(commands.len());
    let mut gates = Vec::with_capacity(commands.len());

    for spec in commands {
        let result = run_command(spec, working_dir)
            .await
            .with_context(|| format!("failed to run verification command '{}'", spec.name))?;
        gates.push(gate::command_gate(&spec.name, &result));
        results.push((spec.clone(), result));
    }

    Ok(IntegrationOutcome {
        gate: GateResult::merge(&gates),
        results,
    })
}

/// Outcome of the Pull Request phase: the drafted title/body, left for the
/// orchestrator to hand to a [`crate::platform::PlatformProvider`].
pub struct PullRequestDraft {
    pub agent_result: AgentInvocationResult,
    pub title: String,
    pub body: String,
    pub gate: GateResult,
}

pub async fn run_pull_request(ctx: &PhaseContext<'_>) -> Result<PullRequestDraft> {
    let prompt = format!(
        "Write a pull request title and body for issue #{}: {}. \
         Write the title as the first line and the body as the rest of pr.md.",
        ctx.issue.number, ctx.issue.title
    );
    let agent_result = ctx.invoke(prompt, "pr.md").await?;
    let gate = gate::agent_invocation_gate(&agent_result);

    let (title, body) = if agent_result.success {
        let content = std::fs::read_to_string(&agent_result.output_path).unwrap_or_default();
        let mut lines = content.lines();
        let title = lines.next().unwrap_or("").trim().to_string();
        let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
        (title, body)
    } else {
        (String::new(), String::new())
    };

    Ok(PullRequestDraft {
        agent_result,
        title,
        body,
        gate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{ScriptedLauncher, ScriptedResponse};
    use crate::model::{Issue, IssueState};
    use chrono::Utc;
    use tempfile::TempDir;

    fn issue() -> Issue {
        Issue {
            number: 7,
            title: "Add widget".into(),
            body: "We need a widget.".into(),
            labels: Default::default(),
            assignees: vec![],
            state: IssueState::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            comments: vec![],
        }
    }

    #[tokio::test]
    async fn analysis_counts_open_questions_and_applies_ambiguity_gate() {
        let dir = TempDir::new().unwrap();
        let issue = issue();
        let launcher = ScriptedLauncher::new(
            "claude-code",
            vec![ScriptedResponse::success(
                "# Analysis\n\nOpen questions:\n- [ ] which format?\n- [ ] which port?\n",
            )],
        );
        let ctx = PhaseContext {
            issue: &issue,
            worktree_path: dir.path(),
            launcher: &launcher,
            agent_timeout: Duration::from_secs(5),
            progress_dir: dir.path().to_path_buf(),
        };

        let scout = ScriptedLauncher::new("codebase-scout", vec![ScriptedResponse::success("- src/lib.rs\n")]);
        let outcome = run_analysis(&ctx, &scout, 5, true).await.unwrap();
        assert_eq!(outcome.open_questions, 2);
        assert!(outcome.gate.is_passable());
    }

    #[tokio::test]
    async fn analysis_fails_gate_at_ambiguity_threshold() {
        let dir = TempDir::new().unwrap();
        let issue = issue();
        let launcher = ScriptedLauncher::new(
            "claude-code",
            vec![ScriptedResponse::success("- [ ] q1\n- [ ] q2\n- [ ] q3\n")],
        );
        let ctx = PhaseContext {
            issue: &issue,
            worktree_path: dir.path(),
            launcher: &launcher,
            agent_timeout: Duration::from_secs(5),
            progress_dir: dir.path().to_path_buf(),
        };

        let scout = ScriptedLauncher::new("codebase-scout", vec![ScriptedResponse::success("- src/lib.rs\n")]);
        let outcome = run_analysis(&ctx, &scout, 3, true).await.unwrap();
        assert!(!outcome.gate.is_passable());
    }

    #[tokio::test]
    async fn analysis_only_warns_at_threshold_without_halt() {
        let dir = TempDir::new().unwrap();
        let issue = issue();
        let launcher = ScriptedLauncher::new(
            "claude-code",
            vec![ScriptedResponse::success("- [ ] q1\n- [ ] q2\n- [ ] q3\n")],
        );
        let ctx = PhaseContext {
            issue: &issue,
            worktree_path: dir.path(),
            launcher: &launcher,
            agent_timeout: Duration::from_secs(5),
            progress_dir: dir.path().to_path_buf(),
        };

        let scout = ScriptedLauncher::new("codebase-scout", vec![ScriptedResponse::success("- src/lib.rs\n")]);
        let outcome = run_analysis(&ctx, &scout, 3, false).await.unwrap();
        assert!(outcome.gate.is_passable());
    }

    #[test]
    fn max_tasks_hint_reads_scope_section() {
        assert_eq!(max_tasks_hint("## Scope\n\nsmall\n"), 3);
        assert_eq!(max_tasks_hint("## Scope\n\nlarge change\n"), 10);
        assert_eq!(max_tasks_hint("no scope section here"), 6);
    }

    #[tokio::test]
    async fn planning_parses_task_queue_from_agent_output() {
        let dir = TempDir::new().unwrap();
        let issue = issue();
        let plan_markdown = r#"```json
{"tasks":[{"id":"t1","name":"n","description":"d","files":[],"dependencies":[],"acceptance_criteria":[],"complexity":null}]}
```"#;
        let launcher = ScriptedLauncher::new("claude-code", vec![ScriptedResponse::success(plan_markdown)]);
        let ctx = PhaseContext {
            issue: &issue,
            worktree_path: dir.path(),
            launcher: &launcher,
            agent_timeout: Duration::from_secs(5),
            progress_dir: dir.path().to_path_buf(),
        };

        let outcome = run_planning(&ctx, "analysis text").await.unwrap();
        assert!(outcome.queue.task("t1").is_some());
    }

    #[tokio::test]
    async fn integration_verification_merges_gate_results() {
        let dir = TempDir::new().unwrap();
        let commands = vec![
            CommandSpec::new("build", "true", vec![]),
            CommandSpec::new("test", "false", vec![]),
        ];

        let outcome = run_integration_verification(dir.path(), &commands).await.unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert!(!outcome.gate.is_passable());
    }

    #[tokio::test]
    async fn pull_request_splits_title_and_body() {
        let dir = TempDir::new().unwrap();
        let issue = issue();
        let launcher = ScriptedLauncher::new(
            "claude-code",
            vec![ScriptedResponse::success("Add the widget feature\n\nThis closes #7.")],
        );
        let ctx = PhaseContext {
            issue: &issue,
            worktree_path: dir.path(),
            launcher: &launcher,
            agent_timeout: Duration::from_secs(5),
            progress_dir: dir.path().to_path_buf(),
        };

        let draft = run_pull_request(&ctx).await.unwrap();
        assert_eq!(draft.title, "Add the widget feature");
        assert!(draft.body.contains("closes #7"));
    }
}
