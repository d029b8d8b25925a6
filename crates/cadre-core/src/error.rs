//! Error kinds for the engine. `CadreError` is the typed surface callers can
//! match on; call sites that only need to propagate use `anyhow::Context`.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error kind produced by core engine operations.
#[derive(Debug, Error)]
pub enum CadreError {
    #[error("checkpoint for issue #{issue} is corrupt: {reason}")]
    CheckpointCorrupt { issue: u64, reason: String },

    #[error("checkpoint for issue #{issue} not found at {path}")]
    CheckpointNotFound { issue: u64, path: PathBuf },

    #[error("checkpoint invariant violated: {0}")]
    CheckpointInvariant(String),

    #[error("worktree for issue #{issue} already exists at {path}")]
    WorktreeAlreadyExists { issue: u64, path: PathBuf },

    #[error("worktree for issue #{issue} not found")]
    WorktreeNotFound { issue: u64 },

    #[error("git command failed: {command} (exit {exit_code:?}): {stderr}")]
    GitCommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("rebase for issue #{issue} has unresolved conflicts in: {}", .files.join(", "))]
    RebaseConflict { issue: u64, files: Vec<String> },

    #[error("task graph has a cycle involving: {}", .task_ids.join(" -> "))]
    TaskGraphCycle { task_ids: Vec<String> },

    #[error("task {task_id} depends on unknown task {dependency_id}")]
    UnknownDependency {
        task_id: String,
        dependency_id: String,
    },

    #[error("gate '{gate}' failed for phase {phase}: {}", .errors.join("; "))]
    GateFailed {
        phase: u8,
        gate: String,
        errors: Vec<String>,
    },

    #[error("phase {phase} exhausted its retry budget ({attempts} attempts)")]
    RetryBudgetExhausted { phase: u8, attempts: u32 },

    #[error("token budget exceeded: used {used}, limit {limit}")]
    TokenBudgetExceeded { used: u64, limit: u64 },

    #[error("agent '{agent}' invocation failed: {reason}")]
    AgentInvocationFailed { agent: String, reason: String },

    #[error("agent '{agent}' is not registered")]
    UnknownAgent { agent: String },

    #[error("ambiguity threshold crossed for issue #{issue}: {count} open questions")]
    AmbiguityHalt { issue: u64, count: u32 },

    #[error("platform operation failed: {operation}: {reason}")]
    PlatformError { operation: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CadreError>;

impl CadreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CadreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebase_conflict_lists_files_in_message() {
        let err = CadreError::RebaseConflict {
            issue: 42,
            files: vec!["src/lib.rs".into(), "Cargo.toml".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("src/lib.rs"));
        assert!(msg.contains("Cargo.toml"));
        assert!(msg.contains("#42"));
    }

    #[test]
    fn gate_failed_joins_errors() {
        let err = CadreError::GateFailed {
            phase: 4,
            gate: "build".into(),
            errors: vec!["compile error".into(), "missing dep".into()],
        };
        assert!(err.to_string().contains("compile error; missing dep"));
    }
}
