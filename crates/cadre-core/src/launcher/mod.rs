//! Agent Launcher: the contract-only interface to external AI coding
//! agents (§6), its registry, and a scripted test double.

pub mod registry;
pub mod scripted;
pub mod trait_def;

pub use registry::LauncherRegistry;
pub use scripted::{ScriptedLauncher, ScriptedResponse};
pub use trait_def::{AgentInvocation, AgentLauncher};
