//! `ScriptedLauncher` -- a deterministic test double for [`AgentLauncher`],
//! used in place of a real agent CLI integration (out of scope per §6).

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::trait_def::{AgentInvocation, AgentLauncher};
use crate::model::AgentInvocationResult;

/// A single scripted response: whether to write the expected output file,
/// what exit code to report, and how many tokens to claim were spent.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub write_output: Option<String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub token_usage: u64,
}

impl ScriptedResponse {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            write_output: Some(content.into()),
            exit_code: Some(0),
            timed_out: false,
            token_usage: 100,
        }
    }

    pub fn failure() -> Self {
        Self {
            write_output: None,
            exit_code: Some(1),
            timed_out: false,
            token_usage: 10,
        }
    }

    pub fn timeout() -> Self {
        Self {
            write_output: None,
            exit_code: None,
            timed_out: true,
            token_usage: 0,
        }
    }
}

/// A launcher that replays a fixed script of responses, one per call, and
/// repeats the last response once the script is exhausted. Used by
/// integration tests to drive the orchestrator through specific scenarios
/// (ambiguity halt, gate fail then pass, agent timeout) without a real
/// agent CLI.
pub struct ScriptedLauncher {
    name: String,
    script: Mutex<Vec<ScriptedResponse>>,
    calls: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn new(name: impl Into<String>, script: Vec<ScriptedResponse>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always_succeeds(name: impl Into<String>) -> Self {
        Self::new(name, vec![ScriptedResponse::success("scripted output")])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentLauncher for ScriptedLauncher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, invocation: &AgentInvocation) -> Result<AgentInvocationResult> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let response = {
            let script = self.script.lock().expect("scripted launcher lock poisoned");
            let idx = index.min(script.len().saturating_sub(1));
            script[idx].clone()
        };

        if let Some(content) = &response.write_output {
            if let Some(parent) = invocation.output_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&invocation.output_path, content)?;
        }

        let output_exists = invocation.output_path.exists();

        Ok(AgentInvocationResult::derive_success(
            self.name.clone(),
            response.exit_code,
            response.timed_out,
            1,
            response.token_usage,
            invocation.output_path.clone(),
            output_exists,
            None,
        ))
    }
}
