//! Configuration file management for cadre.
//!
//! Provides a TOML-based config file at `~/.config/cadre/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use cadre_core::fleet::FleetConfig;
use cadre_core::orchestrator::OrchestratorConfig;

/// The engine's enumerated `options` record, as persisted in a config file.
/// Every field has a default so an absent or partial config file still
/// resolves; unknown keys are rejected outright rather than silently
/// ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CadreOptions {
    pub max_parallel_issues: usize,
    pub max_parallel_agents: usize,
    pub max_retries_per_task: u32,
    pub dry_run: bool,
    pub invocation_delay_ms: u64,
    pub build_verification: bool,
    pub test_verification: bool,
    pub per_task_build_check: bool,
    pub max_build_fix_rounds: u32,
    pub max_integration_fix_rounds: u32,
    pub ambiguity_threshold: u32,
    pub halt_on_ambiguity: bool,
    pub skip_validation: bool,
    pub respond_to_reviews: bool,
    pub auto_reply_on_resolved: bool,
    pub agent_timeout_secs: u64,
    pub token_warn_at: Option<u64>,
    pub token_halt_at: Option<u64>,
}

impl Default for CadreOptions {
    fn default() -> Self {
        let orch = OrchestratorConfig::default();
        let fleet = FleetConfig::default();
        Self {
            max_parallel_issues: fleet.max_parallel_issues,
            max_parallel_agents: orch.max_parallel_agents,
            max_retries_per_task: orch.max_retries_per_task,
            dry_run: orch.dry_run,
            invocation_delay_ms: orch.invocation_delay.as_millis() as u64,
            build_verification: orch.build_verification,
            test_verification: orch.test_verification,
            per_task_build_check: orch.per_task_build_check,
            max_build_fix_rounds: orch.max_build_fix_rounds,
            max_integration_fix_rounds: orch.max_integration_fix_rounds,
            ambiguity_threshold: orch.ambiguity_threshold,
            halt_on_ambiguity: orch.halt_on_ambiguity,
            skip_validation: orch.skip_validation,
            respond_to_reviews: orch.respond_to_reviews,
            auto_reply_on_resolved: false,
            agent_timeout_secs: orch.agent_timeout.as_secs(),
            token_warn_at: orch.token_warn_at,
            token_halt_at: orch.token_halt_at,
        }
    }
}

impl CadreOptions {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_parallel_agents: self.max_parallel_agents,
            max_retries_per_task: self.max_retries_per_task,
            dry_run: self.dry_run,
            invocation_delay: Duration::from_millis(self.invocation_delay_ms),
            build_verification: self.build_verification,
            test_verification: self.test_verification,
            per_task_build_check: self.per_task_build_check,
            max_build_fix_rounds: self.max_build_fix_rounds,
            max_integration_fix_rounds: self.max_integration_fix_rounds,
            ambiguity_threshold: self.ambiguity_threshold,
            halt_on_ambiguity: self.halt_on_ambiguity,
            skip_validation: self.skip_validation,
            respond_to_reviews: self.respond_to_reviews,
            agent_timeout: Duration::from_secs(self.agent_timeout_secs),
            token_warn_at: self.token_warn_at,
            token_halt_at: self.token_halt_at,
        }
    }

    pub fn fleet_config(&self) -> FleetConfig {
        FleetConfig {
            max_parallel_issues: self.max_parallel_issues,
        }
    }
}

/// On-disk config file, a thin wrapper so future top-level sections (e.g.
/// platform credentials) can sit alongside `[options]` without touching the
/// options schema.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub options: CadreOptions,
}

/// Return the cadre config directory. Always XDG layout:
/// `$XDG_CONFIG_HOME/cadre` or `~/.config/cadre`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("cadre");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("cadre")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load and parse a config file from `path`, or return the default options
/// if no path is given and none exists at the default location.
pub fn load_config(path: Option<&PathBuf>) -> Result<ConfigFile> {
    let resolved_path = match path {
        Some(p) => p.clone(),
        None => default_config_path(),
    };

    if !resolved_path.exists() {
        if path.is_some() {
            anyhow::bail!("config file not found at {}", resolved_path.display());
        }
        return Ok(ConfigFile::default());
    }

    let contents = std::fs::read_to_string(&resolved_path)
        .with_context(|| format!("failed to read config file at {}", resolved_path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", resolved_path.display()))?;
    Ok(config)
}

pub fn save_config(config: &ConfigFile, path: &PathBuf) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents).with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

/// Apply CLI-flag overrides on top of a loaded config file's options,
/// implementing the CLI flag > env var > config file > default chain (the
/// env var tier sits inside [`load_config`]'s callers via `CADRE_*` vars
/// checked before falling back to the file).
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
    pub dry_run: Option<bool>,
    pub parallel: Option<usize>,
    pub no_pr: bool,
    pub respond_to_reviews: Option<bool>,
}

impl CadreOptions {
    pub fn with_overrides(mut self, overrides: &RunOverrides) -> Self {
        if let Some(dry_run) = overrides.dry_run {
            self.dry_run = dry_run;
        }
        if let Some(parallel) = overrides.parallel {
            self.max_parallel_issues = parallel;
        }
        if overrides.no_pr {
            self.dry_run = true;
        }
        if let Some(respond) = overrides.respond_to_reviews {
            self.respond_to_reviews = respond;
        }
        self
    }
}
