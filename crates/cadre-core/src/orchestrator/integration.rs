//! Phase 4 (Integration Verification): runs the configured command suite in
//! order, diffs build/test failures against a stored baseline so
//! pre-existing failures are not mistaken for regressions, and drives
//! `fix-surgeon` against genuine regressions.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::invariant::{run_command, CommandResult, CommandSpec};
use crate::launcher::{AgentInvocation, AgentLauncher};
use crate::model::GateResult;

/// A single configured verification step. Lint steps are reported but never
/// drive a `fix-surgeon` retry, per the phase's verification contract.
#[derive(Debug, Clone)]
pub struct VerificationCommand {
    pub spec: CommandSpec,
    pub check_regression: bool,
}

impl VerificationCommand {
    pub fn new(spec: CommandSpec, check_regression: bool) -> Self {
        Self { spec, check_regression }
    }
}

/// The set of command names that were already failing before this run
/// began, persisted at `.cadre/baseline-results.json`. An absent file means
/// an empty baseline: every failure this run is a regression.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineResults {
    pub failing_commands: BTreeSet<String>,
}

impl BaselineResults {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).with_context(|| format!("reading baseline at {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing baseline at {}", path.display()))
    }
}

struct StepReport {
    command: VerificationCommand,
    result: CommandResult,
    is_regression: bool,
}

/// Run each verification command in order. For commands marked
/// `check_regression`, a failure not present in `baseline` triggers up to
/// `max_fix_rounds` `fix-surgeon` invocations, each followed by a single
/// re-run of that command. Returns the merged gate plus a rendered
/// integration report (written by the caller to `integration-report.md`).
pub async fn run_integration_phase(
    working_dir: &Path,
    commands: &[VerificationCommand],
    baseline: &BaselineResults,
    fix_surgeon: &dyn AgentLauncher,
    progress_dir: &Path,
    max_fix_rounds: u32,
) -> Result<(GateResult, String)> {
    let mut reports = Vec::with_capacity(commands.len());

    for command in commands {
        let mut result = run_command(&command.spec, working_dir)
            .await
            .with_context(|| format!("running verification command '{}'", command.spec.name))?;
        let mut is_regression = command.check_regression
            && !result.passed
            && !baseline.failing_commands.contains(&command.spec.name);

        let mut round = 0;
        while is_regression && round < max_fix_rounds {
            round += 1;
            let invocation = AgentInvocation {
                prompt: format!(
                    "Command '{}' regressed:\n\nstdout:\n{}\n\nstderr:\n{}\n\nFix the regression.",
                    command.spec.name, result.stdout, result.stderr
                ),
                working_dir: working_dir.to_path_buf(),
                output_path: progress_dir.join(format!("fix-surgeon-{}-{round}.md", command.spec.name)),
                timeout: std::time::Duration::from_secs(command.spec.timeout_secs),
            };
            let fix_result = fix_surgeon.invoke(&invocation).await?;
            if !fix_result.success {
                break;
            }
            result = run_command(&command.spec, working_dir).await?;
            is_regression = command.check_regression
                && !result.passed
                && !baseline.failing_commands.contains(&command.spec.name);
        }

        reports.push(StepReport {
            command: command.clone(),
            result,
            is_regression,
        });
    }

    let gate = merge_gate(&reports);
    let markdown = render_report(&reports);
    Ok((gate, markdown))
}

fn merge_gate(reports: &[StepReport]) -> GateResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for r in reports {
        if r.result.passed {
            continue;
        }
        if r.is_regression {
            errors.push(format!("{}: new regression", r.command.spec.name));
        } else if r.command.check_regression {
            warnings.push(format!("{}: pre-existing failure", r.command.spec.name));
        } else {
            warnings.push(format!("{}: lint failure", r.command.spec.name));
        }
    }

    if !errors.is_empty() {
        GateResult::fail(errors)
    } else if !warnings.is_empty() {
        GateResult::warn(warnings)
    } else {
        GateResult::pass()
    }
}

fn render_report(reports: &[StepReport]) -> String {
    let mut out = String::from("# Integration Report\n\n");
    let mut pre_existing = Vec::new();
    let mut regressions = Vec::new();

    for r in reports {
        let status = if r.result.passed { "pass" } else { "fail" };
        out.push_str(&format!("## {}\n\n**Status:** {status}\n\n", r.command.spec.name));
        if !r.result.passed {
            if r.is_regression {
                regressions.push(r.command.spec.name.clone());
            } else if r.command.check_regression {
                pre_existing.push(r.command.spec.name.clone());
            }
        }
    }

    out.push_str("## Pre-existing Failures\n\n");
    if pre_existing.is_empty() {
        out.push_str("_None_\n\n");
    } else {
        for name in &pre_existing {
            out.push_str(&format!("- {name}\n"));
        }
        out.push('\n');
    }

    out.push_str("## New Regressions\n\n");
    if regressions.is_empty() {
        out.push_str("_None_\n");
    } else {
        for name in &regressions {
            out.push_str(&format!("- {name}\n"));
        }
    }

    out
}

pub fn baseline_path(cadre_root: &Path) -> PathBuf {
    cadre_root.join("baseline-results.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::ScriptedLauncher;
    use tempfile::TempDir;

    #[tokio::test]
    async fn passing_commands_yield_pass_gate_and_empty_sections() {
        let dir = TempDir::new().unwrap();
        let commands = vec![VerificationCommand::new(CommandSpec::new("build", "true", vec![]), true)];
        let fix_surgeon = ScriptedLauncher::always_succeeds("fix-surgeon");

        let (gate, report) =
            run_integration_phase(dir.path(), &commands, &BaselineResults::default(), &fix_surgeon, dir.path(), 2)
                .await
                .unwrap();

        assert!(gate.is_passable());
        assert!(report.contains("_None_"));
    }

    #[tokio::test]
    async fn pre_existing_failure_is_reported_not_regressed() {
        let dir = TempDir::new().unwrap();
        let commands = vec![VerificationCommand::new(CommandSpec::new("test", "false", vec![]), true)];
        let mut baseline = BaselineResults::default();
        baseline.failing_commands.insert("test".to_string());
        let fix_surgeon = ScriptedLauncher::always_succeeds("fix-surgeon");

        let (gate, report) =
            run_integration_phase(dir.path(), &commands, &baseline, &fix_surgeon, dir.path(), 2)
                .await
                .unwrap();

        assert!(gate.is_passable());
        assert!(report.contains("Pre-existing Failures"));
        assert!(!report.contains("- test\n\n## New Regressions\n\n- test"));
    }

    #[tokio::test]
    async fn new_regression_without_fix_fails_gate() {
        let dir = TempDir::new().unwrap();
        let commands = vec![VerificationCommand::new(CommandSpec::new("test", "false", vec![]), true)];
        let fix_surgeon = crate::launcher::ScriptedLauncher::new(
            "fix-surgeon",
            vec![crate::launcher::ScriptedResponse::failure()],
        );

        let (gate, _) = run_integration_phase(dir.path(), &commands, &BaselineResults::default(), &fix_surgeon, dir.path(), 1)
            .await
            .unwrap();

        assert!(!gate.is_passable());
    }

    #[tokio::test]
    async fn lint_failure_never_triggers_fix_surgeon() {
        let dir = TempDir::new().unwrap();
        let commands = vec![VerificationCommand::new(CommandSpec::new("lint", "false", vec![]), false)];
        let fix_surgeon = crate::launcher::ScriptedLauncher::new(
            "fix-surgeon",
            vec![crate::launcher::ScriptedResponse::failure()],
        );

        let (gate, _) = run_integration_phase(dir.path(), &commands, &BaselineResults::default(), &fix_surgeon, dir.path(), 5)
            .await
            .unwrap();

        assert!(gate.is_passable());
        assert_eq!(fix_surgeon.call_count(), 0);
    }
}
