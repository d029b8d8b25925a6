//! The `AgentLauncher` trait -- the contract-only interface to external AI
//! coding agents, per §6. No concrete production adapter is in scope; only
//! the trait, a registry, and a scripted test double are implemented here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::AgentInvocationResult;

/// A single invocation request handed to an agent.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub output_path: PathBuf,
    pub timeout: Duration,
}

/// Adapter interface for spawning an external AI coding agent in a
/// worktree and waiting for it to produce a file-based result.
///
/// # Object Safety
///
/// Every method returns a concrete or boxed type, so `Box<dyn AgentLauncher>`
/// can be stored in [`super::registry::LauncherRegistry`].
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    /// Human-readable name for this launcher (e.g. "claude-code", "codex").
    fn name(&self) -> &str;

    /// Run the agent to completion (or timeout) and report the result.
    ///
    /// Implementations should:
    /// 1. Spawn the agent subprocess with `invocation.working_dir` as its
    ///    current directory.
    /// 2. Feed it `invocation.prompt`.
    /// 3. Enforce `invocation.timeout`, killing the process if exceeded.
    /// 4. Check for `invocation.output_path` to determine success.
    async fn invoke(&self, invocation: &AgentInvocation) -> Result<AgentInvocationResult>;
}

// Compile-time assertion: AgentLauncher must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn AgentLauncher) {}
};

/// Checks `output_path` exists on disk, for launchers whose subprocess
/// itself cannot report that reliably (e.g. it is a peer file write).
pub fn output_exists(path: &Path) -> bool {
    path.exists()
}
