//! Checkpoint Store: crash-safe persistence of per-issue orchestration
//! state under `.cadre/issues/<n>/checkpoint.json`.
//!
//! Writes are atomic: the new state is serialized to a temp file in the
//! same directory, fsynced, then renamed over the real path. A reader
//! therefore only ever observes a fully-written file or the previous one,
//! never a partial write, even if the process is killed mid-write.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CadreError, Result};
use crate::model::{CheckpointState, GateResult, PhaseId, TaskId, TokenUsage};

const CHECKPOINT_FILENAME: &str = "checkpoint.json";
const TEMP_SUFFIX: &str = ".tmp";

/// On-disk envelope around [`CheckpointState`], versioned for forward
/// compatibility with future schema changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointEnvelope {
    version: u32,
    issue_number: u64,
    state: CheckpointState,
}

const CURRENT_VERSION: u32 = 1;

/// Manages the on-disk checkpoint for a single issue.
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// `root` is the repository-relative `.cadre` directory, e.g.
    /// `<repo>/.cadre`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The `.cadre` root this store writes beneath.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn issue_dir(&self, issue_number: u64) -> PathBuf {
        self.root.join("issues").join(issue_number.to_string())
    }

    fn checkpoint_path(&self, issue_number: u64) -> PathBuf {
        self.issue_dir(issue_number).join(CHECKPOINT_FILENAME)
    }

    fn temp_path(&self, issue_number: u64) -> PathBuf {
        self.issue_dir(issue_number)
            .join(format!("{CHECKPOINT_FILENAME}{TEMP_SUFFIX}"))
    }

    /// Load the checkpoint for an issue, or `None` if it has never been
    /// created.
    pub fn load(&self, issue_number: u64) -> Result<Option<CheckpointState>> {
        let path = self.checkpoint_path(issue_number);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&path).map_err(|e| CadreError::io(&path, e))?;
        let envelope: CheckpointEnvelope = serde_json::from_slice(&bytes).map_err(|e| {
            CadreError::CheckpointCorrupt {
                issue: issue_number,
                reason: e.to_string(),
            }
        })?;

        if envelope.issue_number != issue_number {
            return Err(CadreError::CheckpointCorrupt {
                issue: issue_number,
                reason: format!(
                    "checkpoint file belongs to issue #{}, expected #{issue_number}",
                    envelope.issue_number
                ),
            });
        }

        Ok(Some(envelope.state))
    }

    /// Persist `state` for an issue. Creates the issue directory if needed.
    /// The write is atomic: temp file + fsync + rename, all within the same
    /// directory so the rename is a metadata-only operation on any POSIX
    /// filesystem.
    pub fn save(&self, issue_number: u64, state: &CheckpointState) -> Result<()> {
        let dir = self.issue_dir(issue_number);
        fs::create_dir_all(&dir).map_err(|e| CadreError::io(&dir, e))?;

        let envelope = CheckpointEnvelope {
            version: CURRENT_VERSION,
            issue_number,
            state: state.clone(),
        };
        let bytes =
            serde_json::to_vec_pretty(&envelope).map_err(CadreError::Json)?;

        let temp_path = self.temp_path(issue_number);
        {
            let mut file = File::create(&temp_path).map_err(|e| CadreError::io(&temp_path, e))?;
            use std::io::Write;
            file.write_all(&bytes)
                .map_err(|e| CadreError::io(&temp_path, e))?;
            file.sync_all().map_err(|e| CadreError::io(&temp_path, e))?;
        }

        let final_path = self.checkpoint_path(issue_number);
        fs::rename(&temp_path, &final_path).map_err(|e| CadreError::io(&final_path, e))?;

        sync_dir_best_effort(&dir);

        Ok(())
    }

    /// Remove a checkpoint entirely, for the `reset` CLI command.
    pub fn clear(&self, issue_number: u64) -> Result<()> {
        let dir = self.issue_dir(issue_number);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| CadreError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Load the current state, apply `f`, then persist the result. This is
    /// the only way `CheckpointState` is mutated outside of tests -- every
    /// public method below is a thin wrapper around it, so every mutation
    /// is durable on disk before the caller sees it.
    fn mutate(
        &self,
        issue_number: u64,
        f: impl FnOnce(&mut CheckpointState) -> Result<()>,
    ) -> Result<CheckpointState> {
        let mut state = self.load(issue_number)?.unwrap_or_default();
        f(&mut state)?;
        self.save(issue_number, &state)?;
        Ok(state)
    }

    /// Begin (or resume) `phase` for an issue.
    pub fn start_phase(&self, issue_number: u64, phase: PhaseId) -> Result<CheckpointState> {
        self.mutate(issue_number, |state| state.start_phase(phase))
    }

    /// Mark `phase` complete for an issue. Fails if the phase's gate result
    /// is missing, failing, or if an earlier phase is still incomplete.
    pub fn complete_phase(&self, issue_number: u64, phase: PhaseId) -> Result<CheckpointState> {
        self.mutate(issue_number, |state| state.complete_phase(phase))
    }

    /// Record (or overwrite) a phase's gate result.
    pub fn record_gate_result(
        &self,
        issue_number: u64,
        phase: PhaseId,
        result: GateResult,
    ) -> Result<CheckpointState> {
        self.mutate(issue_number, |state| {
            state.record_gate_result(phase, result);
            Ok(())
        })
    }

    /// Record the output artifact path produced by a phase.
    pub fn record_phase_output(
        &self,
        issue_number: u64,
        phase: PhaseId,
        path: PathBuf,
    ) -> Result<CheckpointState> {
        self.mutate(issue_number, |state| {
            state.record_phase_output(phase, path);
            Ok(())
        })
    }

    /// Begin a task for an issue.
    pub fn start_task(&self, issue_number: u64, task_id: &TaskId) -> Result<CheckpointState> {
        self.mutate(issue_number, |state| state.start_task(task_id))
    }

    /// Mark a task complete for an issue.
    pub fn complete_task(&self, issue_number: u64, task_id: TaskId) -> Result<CheckpointState> {
        self.mutate(issue_number, |state| {
            state.complete_task(task_id);
            Ok(())
        })
    }

    /// Mark a task failed for an issue.
    pub fn fail_task(&self, issue_number: u64, task_id: TaskId) -> Result<CheckpointState> {
        self.mutate(issue_number, |state| state.fail_task(task_id))
    }

    /// Mark a task blocked for an issue.
    pub fn block_task(&self, issue_number: u64, task_id: TaskId) -> Result<CheckpointState> {
        self.mutate(issue_number, |state| state.block_task(task_id))
    }

    /// Clear every unresolved task outcome for an issue ahead of a
    /// phase-level retry of Implementation.
    pub fn reset_unresolved_tasks(&self, issue_number: u64) -> Result<CheckpointState> {
        self.mutate(issue_number, |state| {
            state.reset_unresolved_tasks();
            Ok(())
        })
    }

    /// Replace the tallied token usage for an issue.
    pub fn record_token_usage(&self, issue_number: u64, usage: TokenUsage) -> Result<CheckpointState> {
        self.mutate(issue_number, |state| state.record_token_usage(usage))
    }

    /// Reset `phases` and the whole task ledger ahead of a review-response
    /// re-run. Errors if the issue has no existing checkpoint -- there is
    /// nothing to reset.
    pub fn reset_phases_for_rerun(&self, issue_number: u64, phases: &[u8]) -> Result<CheckpointState> {
        let mut state = self.load(issue_number)?.ok_or_else(|| CadreError::CheckpointNotFound {
            issue: issue_number,
            path: self.checkpoint_path(issue_number),
        })?;
        state.reset_phases_for_rerun(phases);
        self.save(issue_number, &state)?;
        Ok(state)
    }

    /// List the issue numbers with an on-disk checkpoint.
    pub fn list_issues(&self) -> Result<Vec<u64>> {
        let issues_dir = self.root.join("issues");
        if !issues_dir.exists() {
            return Ok(Vec::new());
        }

        let mut issues = Vec::new();
        for entry in fs::read_dir(&issues_dir).map_err(|e| CadreError::io(&issues_dir, e))? {
            let entry = entry.map_err(|e| CadreError::io(&issues_dir, e))?;
            if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) {
                if entry.path().join(CHECKPOINT_FILENAME).exists() {
                    issues.push(n);
                }
            }
        }
        issues.sort_unstable();
        Ok(issues)
    }
}

/// Best-effort directory fsync so the rename itself is durable, not just
/// the file contents. Not all platforms support this; failures are
/// swallowed since the rename has already completed by this point.
#[cfg(unix)]
fn sync_dir_best_effort(dir: &Path) {
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir_best_effort(_dir: &Path) {}
