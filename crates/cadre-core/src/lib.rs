//! cadre-core: the Issue Orchestration Engine.
//!
//! Drives tracker issues through five ordered phases -- Analysis, Planning,
//! Implementation, Integration Verification, Pull Request -- via external AI
//! coding agents running in isolated git worktrees, with gates, crash-safe
//! checkpoints, a task DAG, fleet-level concurrency, and a review-response
//! rebase cycle. See each module for the slice of the engine it owns.

pub mod checkpoint;
pub mod error;
pub mod fleet;
pub mod gate;
pub mod invariant;
pub mod launcher;
pub mod model;
pub mod orchestrator;
pub mod phases;
pub mod plan;
pub mod platform;
pub mod presets;
pub mod queue;
pub mod retry;
pub mod review;
pub mod token;
pub mod worktree;

pub use checkpoint::CheckpointStore;
pub use error::{CadreError, Result as CadreResult};
pub use fleet::{CodeDoneNoPr, FailedIssue, FleetConfig, FleetOrchestrator, FleetReport};
pub use launcher::{AgentInvocation, AgentLauncher, LauncherRegistry, ScriptedLauncher, ScriptedResponse};
pub use model::{
    AgentInvocationResult, CheckpointState, GateResult, GateStatus, Issue, IssueState, PhaseId, PrState,
    PullRequest, ReviewThread, Task, TaskId, TokenUsage, Worktree,
};
pub use orchestrator::{BaselineResults, IssueOrchestrator, IssueOutcome, OrchestratorConfig, VerificationCommand};
pub use platform::{FakePlatformProvider, PlatformProvider};
pub use queue::TaskQueue;
pub use review::{ReviewResponseOrchestrator, ReviewResponseOutcome, SkipReason, REVIEW_RESPONSE_PHASES};
pub use worktree::{DependencyBranch, RebaseOutcome, WorktreeError, WorktreeManager};
