//! Phase Gate Library: pure validators that inspect progress-dir artifacts
//! and agent invocation results, returning a tagged pass/warn/fail result.
//! A phase's overall gate result is the merge of all its gates' results,
//! per the fail-dominates-warn-dominates-pass rule in [`crate::model::GateResult`].

use std::path::Path;

use crate::invariant::CommandResult;
use crate::model::{GateResult, Task};

/// Pure check over the outcome of running a verification command (build,
/// test, lint). Non-zero exit is a hard fail; this gate never warns.
pub fn command_gate(name: &str, result: &CommandResult) -> GateResult {
    if result.passed {
        GateResult::pass()
    } else {
        GateResult::fail(vec![format!(
            "{name} failed (exit {:?}): {}",
            result.exit_code,
            truncate(&result.stderr, 2000)
        )])
    }
}

/// Checks that a phase produced its required output artifact on disk.
pub fn artifact_exists_gate(name: &str, path: &Path) -> GateResult {
    if path.exists() {
        GateResult::pass()
    } else {
        GateResult::fail(vec![format!(
            "{name}: expected artifact missing at {}",
            path.display()
        )])
    }
}

/// Checks the number of open questions/ambiguities raised by analysis or
/// planning against the configured threshold. Meeting or exceeding the
/// threshold is only a fail when `halt_on_ambiguity` is enabled -- otherwise
/// it's surfaced as a warn so the pipeline can proceed without a human.
pub fn ambiguity_gate(open_questions: u32, threshold: u32, halt_on_ambiguity: bool) -> GateResult {
    if open_questions == 0 {
        GateResult::pass()
    } else if open_questions >= threshold && halt_on_ambiguity {
        GateResult::fail(vec![format!(
            "{open_questions} open questions meet or exceed the ambiguity threshold of {threshold}"
        )])
    } else {
        GateResult::warn(vec![format!(
            "{open_questions} open question(s) raised against a threshold of {threshold}"
        )])
    }
}

/// Analysis -> Planning gate (§4.5): `analysis.md` must exist and carry the
/// headings a plan depends on; `scout-report.md` must list at least one
/// repository file path.
pub fn analysis_to_planning_gate(analysis_path: &Path, scout_report_path: &Path) -> GateResult {
    let mut errors = Vec::new();

    match std::fs::read_to_string(analysis_path) {
        Ok(content) => {
            let lower = content.to_lowercase();
            if !lower.contains("## ") {
                errors.push("analysis.md has no section headings".to_string());
            }
        }
        Err(_) => errors.push(format!("missing {}", analysis_path.display())),
    }

    match std::fs::read_to_string(scout_report_path) {
        Ok(content) => {
            let file_paths = content
                .lines()
                .filter(|l| l.trim_start().starts_with("- ") || l.trim_start().starts_with("* "))
                .count();
            if file_paths == 0 {
                errors.push("scout-report.md lists no repository file paths".to_string());
            }
        }
        Err(_) => errors.push(format!("missing {}", scout_report_path.display())),
    }

    if errors.is_empty() {
        GateResult::pass()
    } else {
        GateResult::fail(errors)
    }
}

/// Planning -> Implementation gate (§4.5): every task needs a non-empty
/// description, at least one declared file, and acceptance criteria, and the
/// task graph must already be cycle-free (enforced by [`crate::queue::TaskQueue`]
/// construction). A task referencing a file that doesn't exist in the
/// worktree is a warn, not a fail -- the agent may be about to create it.
pub fn planning_to_implementation_gate(tasks: &[&Task], worktree_path: &Path) -> GateResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if tasks.is_empty() {
        errors.push("plan produced no tasks".to_string());
    }

    for task in tasks {
        if task.description.trim().is_empty() {
            errors.push(format!("task {} has no description", task.id));
        }
        if task.files.is_empty() {
            errors.push(format!("task {} declares no files", task.id));
        }
        if task.acceptance_criteria.is_empty() {
            errors.push(format!("task {} has no acceptance criteria", task.id));
        }
        for file in &task.files {
            if !worktree_path.join(file).exists() {
                warnings.push(format!("task {} references nonexistent file {}", task.id, file.display()));
            }
        }
    }

    GateResult {
        status: if !errors.is_empty() {
            Some(crate::model::GateStatus::Fail)
        } else if !warnings.is_empty() {
            Some(crate::model::GateStatus::Warn)
        } else {
            Some(crate::model::GateStatus::Pass)
        },
        warnings,
        errors,
    }
}

/// Implementation -> Integration Verification gate (§4.5): the worktree must
/// have a non-empty diff since `base_commit`. An empty diff means no task
/// actually changed anything, which fails the gate; a `git diff` command
/// error itself only warns, since the phase can still proceed to verification.
pub fn implementation_to_integration_gate(worktree_path: &Path, base_commit: &str) -> GateResult {
    let output = std::process::Command::new("git")
        .args(["diff", "--name-only", base_commit, "HEAD"])
        .current_dir(worktree_path)
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let changed = String::from_utf8_lossy(&output.stdout);
            if changed.trim().is_empty() {
                GateResult::fail(vec!["no changes since base commit".to_string()])
            } else {
                GateResult::pass()
            }
        }
        Ok(output) => GateResult::warn(vec![format!(
            "git diff against {base_commit} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )]),
        Err(e) => GateResult::warn(vec![format!("could not run git diff: {e}")]),
    }
}

/// Checks that a task's diff touches only files it declared, per the
/// Implementation phase's scope discipline. Files outside the declared set
/// are a warn, not a fail: the agent may have needed an adjacent edit.
pub fn scope_gate(declared_files: &[std::path::PathBuf], changed_files: &[String]) -> GateResult {
    let declared: std::collections::HashSet<&str> = declared_files
        .iter()
        .filter_map(|p| p.to_str())
        .collect();

    let out_of_scope: Vec<String> = changed_files
        .iter()
        .filter(|f| !declared.contains(f.as_str()))
        .cloned()
        .collect();

    if out_of_scope.is_empty() {
        GateResult::pass()
    } else {
        GateResult::warn(vec![format!(
            "changed files outside declared scope: {}",
            out_of_scope.join(", ")
        )])
    }
}

/// Checks that an agent invocation itself succeeded (exit 0, no timeout,
/// expected output present) before any downstream gate runs.
pub fn agent_invocation_gate(result: &crate::model::AgentInvocationResult) -> GateResult {
    if result.success {
        GateResult::pass()
    } else if result.timed_out {
        GateResult::fail(vec![format!("agent '{}' timed out", result.agent)])
    } else if !result.output_exists {
        GateResult::fail(vec![format!(
            "agent '{}' did not produce its expected output at {}",
            result.agent,
            result.output_path.display()
        )])
    } else {
        GateResult::fail(vec![format!(
            "agent '{}' exited with {:?}: {}",
            result.agent,
            result.exit_code,
            result.error.clone().unwrap_or_default()
        )])
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}... (truncated)", &s[..max])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentInvocationResult, GateStatus};
    use std::path::PathBuf;

    fn cmd(passed: bool, exit_code: Option<i32>) -> CommandResult {
        CommandResult {
            passed,
            exit_code,
            stdout: String::new(),
            stderr: "boom".into(),
            duration_ms: 1,
        }
    }

    #[test]
    fn command_gate_passes_on_success() {
        assert_eq!(command_gate("build", &cmd(true, Some(0))).status, Some(GateStatus::Pass));
    }

    #[test]
    fn command_gate_fails_on_nonzero_exit() {
        let result = command_gate("build", &cmd(false, Some(1)));
        assert_eq!(result.status, Some(GateStatus::Fail));
        assert!(result.errors[0].contains("build failed"));
    }

    #[test]
    fn artifact_exists_gate_fails_when_missing() {
        let result = artifact_exists_gate("analysis", Path::new("/nonexistent/path/xyz"));
        assert_eq!(result.status, Some(GateStatus::Fail));
    }

    #[test]
    fn ambiguity_gate_passes_with_no_questions() {
        assert_eq!(ambiguity_gate(0, 3, true).status, Some(GateStatus::Pass));
    }

    #[test]
    fn ambiguity_gate_warns_below_threshold() {
        assert_eq!(ambiguity_gate(1, 3, true).status, Some(GateStatus::Warn));
    }

    #[test]
    fn ambiguity_gate_fails_at_threshold_when_halting() {
        assert_eq!(ambiguity_gate(3, 3, true).status, Some(GateStatus::Fail));
    }

    #[test]
    fn ambiguity_gate_only_warns_at_threshold_without_halt() {
        assert_eq!(ambiguity_gate(3, 3, false).status, Some(GateStatus::Warn));
    }

    #[test]
    fn analysis_to_planning_gate_fails_on_missing_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = analysis_to_planning_gate(&dir.path().join("analysis.md"), &dir.path().join("scout-report.md"));
        assert_eq!(result.status, Some(GateStatus::Fail));
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn analysis_to_planning_gate_passes_with_sections_and_file_list() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("analysis.md"), "# Analysis\n\n## Summary\n\ndone\n").unwrap();
        std::fs::write(dir.path().join("scout-report.md"), "# Scout Report\n\n- src/lib.rs\n").unwrap();
        let result = analysis_to_planning_gate(&dir.path().join("analysis.md"), &dir.path().join("scout-report.md"));
        assert_eq!(result.status, Some(GateStatus::Pass));
    }

    fn sample_task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            name: "n".into(),
            description: "do the thing".into(),
            files: vec![PathBuf::from("src/a.rs")],
            dependencies: vec![],
            acceptance_criteria: vec!["works".into()],
            complexity: None,
        }
    }

    #[test]
    fn planning_to_implementation_gate_fails_on_empty_plan() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = planning_to_implementation_gate(&[], dir.path());
        assert_eq!(result.status, Some(GateStatus::Fail));
    }

    #[test]
    fn planning_to_implementation_gate_warns_on_missing_referenced_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let task = sample_task("t1");
        let result = planning_to_implementation_gate(&[&task], dir.path());
        assert_eq!(result.status, Some(GateStatus::Warn));
    }

    #[test]
    fn planning_to_implementation_gate_passes_when_files_exist() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "").unwrap();
        let task = sample_task("t1");
        let result = planning_to_implementation_gate(&[&task], dir.path());
        assert_eq!(result.status, Some(GateStatus::Pass));
    }

    #[test]
    fn scope_gate_passes_when_all_files_declared() {
        let declared = vec![PathBuf::from("src/a.rs")];
        let result = scope_gate(&declared, &["src/a.rs".to_string()]);
        assert_eq!(result.status, Some(GateStatus::Pass));
    }

    #[test]
    fn scope_gate_warns_on_undeclared_file() {
        let declared = vec![PathBuf::from("src/a.rs")];
        let result = scope_gate(&declared, &["src/a.rs".to_string(), "src/b.rs".to_string()]);
        assert_eq!(result.status, Some(GateStatus::Warn));
        assert!(result.warnings[0].contains("src/b.rs"));
    }

    #[test]
    fn agent_invocation_gate_fails_on_timeout() {
        let result = AgentInvocationResult {
            agent: "issue-analyst".into(),
            success: false,
            exit_code: None,
            timed_out: true,
            duration_ms: 1,
            token_usage: 0,
            output_path: PathBuf::from("/tmp/out"),
            output_exists: false,
            error: None,
        };
        assert_eq!(agent_invocation_gate(&result).status, Some(GateStatus::Fail));
    }
}
