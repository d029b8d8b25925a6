//! Launcher registry -- a named collection of available agent launchers.

use std::collections::HashMap;

use super::trait_def::AgentLauncher;

/// A collection of registered [`AgentLauncher`] implementations, keyed by
/// name, so the orchestrator can look one up by a task's configured agent.
#[derive(Default)]
pub struct LauncherRegistry {
    launchers: HashMap<String, Box<dyn AgentLauncher>>,
}

impl LauncherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a launcher. If one with the same name is already
    /// registered, it is replaced and the old one is returned.
    pub fn register(
        &mut self,
        launcher: impl AgentLauncher + 'static,
    ) -> Option<Box<dyn AgentLauncher>> {
        let name = launcher.name().to_string();
        self.launchers.insert(name, Box::new(launcher))
    }

    pub fn get(&self, name: &str) -> Option<&dyn AgentLauncher> {
        self.launchers.get(name).map(|b| b.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.launchers.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.launchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.launchers.is_empty()
    }
}

impl std::fmt::Debug for LauncherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LauncherRegistry")
            .field("launchers", &self.launchers.keys().collect::<Vec<_>>())
            .finish()
    }
}
