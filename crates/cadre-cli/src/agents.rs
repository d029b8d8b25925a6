//! Concrete agent launcher: spawns a configured subprocess per named agent,
//! waits for it (with a timeout), and inspects `--output-path` for success.
//! This is the CLI-side "process launcher" the engine only specifies as a
//! contract (`cadre_core::launcher::AgentLauncher`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;

use cadre_core::launcher::{AgentInvocation, AgentLauncher};
use cadre_core::model::AgentInvocationResult;

/// One agent's subprocess template. `{prompt_path}` and `{output_path}` are
/// substituted into `args` before spawning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentsFile {
    pub agents: std::collections::BTreeMap<String, AgentDefinition>,
}

pub fn default_agents_path(repo_root: &std::path::Path) -> PathBuf {
    repo_root.join(".cadre").join("agents.toml")
}

pub fn load_agents_file(path: &std::path::Path) -> Result<AgentsFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read agents file at {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse agents file at {}", path.display()))
}

pub fn scaffold_agents_file() -> AgentsFile {
    let names = [
        "issue-analyst",
        "codebase-scout",
        "task-planner",
        "code-writer",
        "test-writer",
        "code-reviewer",
        "fix-surgeon",
        "pr-writer",
        "conflict-resolver",
    ];
    let mut agents = std::collections::BTreeMap::new();
    for name in names {
        agents.insert(
            name.to_string(),
            AgentDefinition {
                command: "echo".to_string(),
                args: vec!["replace me with a real agent CLI invocation".to_string()],
            },
        );
    }
    AgentsFile { agents }
}

/// Validate an agents file: every name required by the five phases plus the
/// review-response cycle must be present, and each command must resolve on
/// `PATH`.
pub fn validate_agents_file(file: &AgentsFile) -> Vec<String> {
    let required = [
        "issue-analyst",
        "codebase-scout",
        "task-planner",
        "code-writer",
        "test-writer",
        "code-reviewer",
        "fix-surgeon",
        "pr-writer",
    ];
    let mut problems = Vec::new();
    for name in required {
        if !file.agents.contains_key(name) {
            problems.push(format!("missing required agent '{name}'"));
        }
    }
    for (name, def) in &file.agents {
        if which(&def.command).is_none() {
            problems.push(format!("agent '{name}': command '{}' not found on PATH", def.command));
        }
    }
    problems
}

fn which(command: &str) -> Option<PathBuf> {
    if command.contains(std::path::MAIN_SEPARATOR) {
        return std::path::Path::new(command).exists().then(|| PathBuf::from(command));
    }
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(command))
            .find(|candidate| candidate.is_file())
    })
}

/// Spawns `definition.command` with `definition.args`, substituting
/// `{prompt_path}` and `{output_path}` placeholders, for one agent name.
pub struct ProcessAgentLauncher {
    name: String,
    definition: AgentDefinition,
}

impl ProcessAgentLauncher {
    pub fn new(name: impl Into<String>, definition: AgentDefinition) -> Self {
        Self {
            name: name.into(),
            definition,
        }
    }
}

#[async_trait]
impl AgentLauncher for ProcessAgentLauncher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, invocation: &AgentInvocation) -> Result<AgentInvocationResult> {
        let prompt_path = invocation.output_path.with_extension("prompt.md");
        std::fs::write(&prompt_path, &invocation.prompt)
            .with_context(|| format!("writing prompt file at {}", prompt_path.display()))?;

        let args: Vec<String> = self
            .definition
            .args
            .iter()
            .map(|arg| {
                arg.replace("{prompt_path}", &prompt_path.to_string_lossy())
                    .replace("{output_path}", &invocation.output_path.to_string_lossy())
            })
            .collect();

        let start = std::time::Instant::now();
        let mut child = Command::new(&self.definition.command)
            .args(&args)
            .current_dir(&invocation.working_dir)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning agent '{}'", self.name))?;

        let wait = timeout(invocation.timeout, child.wait()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (exit_code, timed_out) = match wait {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => return Err(anyhow::anyhow!("agent '{}' wait failed: {e}", self.name)),
            Err(_) => {
                let _ = child.start_kill();
                (None, true)
            }
        };

        let output_exists = invocation.output_path.exists();
        let error = if timed_out {
            Some(format!("agent '{}' timed out after {:?}", self.name, invocation.timeout))
        } else if exit_code != Some(0) {
            Some(format!("agent '{}' exited with {:?}", self.name, exit_code))
        } else if !output_exists {
            Some(format!("agent '{}' produced no output at {}", self.name, invocation.output_path.display()))
        } else {
            None
        };

        Ok(AgentInvocationResult::derive_success(
            self.name.clone(),
            exit_code,
            timed_out,
            duration_ms,
            0,
            invocation.output_path.clone(),
            output_exists,
            error,
        ))
    }
}

pub fn build_registry(file: &AgentsFile) -> cadre_core::launcher::LauncherRegistry {
    let mut registry = cadre_core::launcher::LauncherRegistry::new();
    for (name, definition) in &file.agents {
        registry.register(ProcessAgentLauncher::new(name.clone(), definition.clone()));
    }
    registry
}
