//! Issue Orchestrator configuration: the engine's enumerated `options`
//! record. Unknown keys are rejected at the CLI's config-loading layer
//! (`#[serde(deny_unknown_fields)]` there); this struct is the resolved,
//! already-validated result.

use std::time::Duration;

/// Resolved run options for a single issue's orchestration. Fleet-level
/// concurrency (`maxParallelIssues`) lives on [`crate::fleet::FleetConfig`],
/// not here.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_parallel_agents: usize,
    pub max_retries_per_task: u32,
    pub dry_run: bool,
    pub invocation_delay: Duration,
    pub build_verification: bool,
    pub test_verification: bool,
    pub per_task_build_check: bool,
    pub max_build_fix_rounds: u32,
    pub max_integration_fix_rounds: u32,
    pub ambiguity_threshold: u32,
    pub halt_on_ambiguity: bool,
    pub skip_validation: bool,
    pub respond_to_reviews: bool,
    pub agent_timeout: Duration,
    /// Cumulative token spend at which the budget is reported as `Warn`.
    pub token_warn_at: Option<u64>,
    /// Cumulative token spend at which the issue is aborted with
    /// `CadreError::TokenBudgetExceeded`.
    pub token_halt_at: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: 2,
            max_retries_per_task: 3,
            dry_run: false,
            invocation_delay: Duration::from_millis(0),
            build_verification: true,
            test_verification: true,
            per_task_build_check: false,
            max_build_fix_rounds: 1,
            max_integration_fix_rounds: 2,
            ambiguity_threshold: 3,
            halt_on_ambiguity: false,
            skip_validation: false,
            respond_to_reviews: false,
            agent_timeout: Duration::from_secs(600),
            token_warn_at: None,
            token_halt_at: None,
        }
    }
}
