mod agents;
mod config;
mod platform;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use cadre_core::checkpoint::CheckpointStore;
use cadre_core::fleet::FleetOrchestrator;
use cadre_core::invariant::CommandSpec;
use cadre_core::orchestrator::{IssueOrchestrator, VerificationCommand};
use cadre_core::presets;
use cadre_core::review::ReviewResponseOrchestrator;
use cadre_core::worktree::WorktreeManager;

use agents::{build_registry, default_agents_path, load_agents_file, scaffold_agents_file, validate_agents_file};
use config::{load_config, CadreOptions, RunOverrides};
use platform::LocalPlatformProvider;

#[derive(Parser)]
#[command(name = "cadre", about = "Autonomous issue-to-pull-request orchestration engine")]
struct Cli {
    /// Path to the target repository (defaults to the current directory).
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestration engine over one or more issues.
    Run {
        /// Path to a cadre config file (defaults to the XDG config path).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Resume from the last checkpoint instead of starting fresh
        /// (this is the engine's only mode -- present for CLI-surface parity).
        #[arg(long)]
        resume: bool,
        /// Run every phase's side effects except opening/updating a PR.
        #[arg(long)]
        dry_run: bool,
        /// Issue numbers to run. Repeat the flag for more than one.
        #[arg(long = "issue", required = true)]
        issues: Vec<u64>,
        /// Fleet-level concurrency override.
        #[arg(long)]
        parallel: Option<usize>,
        /// Never open or update a pull request.
        #[arg(long)]
        no_pr: bool,
        /// After the run, also sweep open PRs for review responses.
        #[arg(long)]
        respond_to_reviews: bool,
    },
    /// Print the checkpoint phase and gate state for one or more issues.
    Status {
        /// Issue numbers to show. Omit to show every issue with a checkpoint.
        #[arg(long = "issue")]
        issues: Vec<u64>,
    },
    /// Delete the checkpoint for an issue so its next run starts from phase 1.
    Reset {
        #[arg(long = "issue", required = true)]
        issues: Vec<u64>,
    },
    /// List active worktrees under the repository's worktree base directory.
    Worktrees,
    /// Manage the agent launcher registry.
    Agents {
        #[command(subcommand)]
        command: AgentsCommand,
    },
}

#[derive(Subcommand)]
enum AgentsCommand {
    /// List configured agent launchers.
    List,
    /// Write a starter `agents.toml` with every required agent name stubbed out.
    Scaffold {
        #[arg(long)]
        force: bool,
    },
    /// Check that every required agent is present and its command resolves.
    Validate,
}

fn repo_root(cli_repo: Option<PathBuf>) -> Result<PathBuf> {
    let root = cli_repo.unwrap_or_else(|| PathBuf::from("."));
    root.canonicalize().with_context(|| format!("resolving repo path {}", root.display()))
}

fn cadre_dir(repo: &std::path::Path) -> PathBuf {
    repo.join(".cadre")
}

/// Derive the verification command suite for phase 4 from the configured
/// build/test flags plus whatever project type is auto-detected in `repo`.
fn verification_commands(repo: &std::path::Path, options: &CadreOptions) -> Vec<VerificationCommand> {
    let Some(project_type) = presets::detect_project_type(repo) else {
        return Vec::new();
    };
    let presets = presets::presets_for_project_type(&project_type);
    presets
        .into_iter()
        .filter(|preset| match preset.kind.as_str() {
            "test_suite" => options.test_verification,
            "typecheck" | "lint" | "coverage" | "custom" => options.build_verification,
            _ => options.build_verification,
        })
        .map(|preset| {
            let check_regression = preset.kind != "lint";
            VerificationCommand::new(
                CommandSpec::new(preset.name, preset.command, preset.args),
                check_regression,
            )
        })
        .collect()
}

async fn build_orchestrator(repo: &std::path::Path, options: &CadreOptions) -> Result<Arc<IssueOrchestrator>> {
    let cadre_dir = cadre_dir(repo);
    let agents_path = default_agents_path(repo);
    let agents_file = if agents_path.exists() {
        load_agents_file(&agents_path)?
    } else {
        scaffold_agents_file()
    };
    let launchers = Arc::new(build_registry(&agents_file));

    let platform = Arc::new(LocalPlatformProvider::new(&cadre_dir)?);
    let worktree_manager = WorktreeManager::new(repo, None).map_err(|e| anyhow::anyhow!("{e}"))?;
    let checkpoints = CheckpointStore::new(&cadre_dir);
    let commands = verification_commands(repo, options);

    Ok(Arc::new(IssueOrchestrator::new(
        launchers,
        platform,
        worktree_manager,
        checkpoints,
        options.orchestrator_config(),
        commands,
    )))
}

async fn run_command(
    repo: PathBuf,
    config_path: Option<PathBuf>,
    issues: Vec<u64>,
    overrides: RunOverrides,
    respond_to_reviews_pass: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let config = load_config(config_path.as_ref())?;
    let options = config.options.with_overrides(&overrides);

    let orchestrator = build_orchestrator(&repo, &options).await?;
    let fleet = FleetOrchestrator::new(Arc::clone(&orchestrator), options.fleet_config());

    let report = fleet.run(issues, cancel.clone()).await;

    println!("ran {} issue(s): {} succeeded, {} failed", report.issues.len(), report.prs_created.len(), report.failed_issues.len());
    for failed in &report.failed_issues {
        eprintln!("issue #{}: {}", failed.issue_number, failed.error);
    }
    for pr in &report.prs_created {
        println!("issue pr #{}: {}", pr.number, pr.title);
    }
    for stuck in &report.code_done_no_pr {
        eprintln!("issue #{}: code complete on branch {} but no PR opened", stuck.issue_number, stuck.branch_name);
    }

    if (respond_to_reviews_pass || options.respond_to_reviews) && !cancel.is_cancelled() {
        let review_orchestrator = ReviewResponseOrchestrator::new(orchestrator, options.auto_reply_on_resolved);
        for issue_number in &report.issues {
            match review_orchestrator.run_issue(*issue_number, &cancel).await {
                Ok(outcome) => println!("issue #{issue_number} review response: {outcome:?}"),
                Err(e) => eprintln!("issue #{issue_number} review response failed: {e:#}"),
            }
        }
    }

    if !report.success {
        anyhow::bail!("one or more issues did not complete successfully");
    }
    Ok(())
}

fn status_command(repo: &std::path::Path, issues: Vec<u64>) -> Result<()> {
    let checkpoints = CheckpointStore::new(cadre_dir(repo));
    let issues = if issues.is_empty() { checkpoints.list_issues()? } else { issues };

    for issue_number in issues {
        match checkpoints.load(issue_number)? {
            Some(state) => {
                println!(
                    "issue #{issue_number}: phase {} (completed: {:?})",
                    state.current_phase, state.completed_phases
                );
            }
            None => println!("issue #{issue_number}: no checkpoint"),
        }
    }
    Ok(())
}

fn reset_command(repo: &std::path::Path, issues: Vec<u64>) -> Result<()> {
    let checkpoints = CheckpointStore::new(cadre_dir(repo));
    for issue_number in issues {
        checkpoints.clear(issue_number)?;
        println!("issue #{issue_number}: checkpoint cleared");
    }
    Ok(())
}

fn worktrees_command(repo: &std::path::Path) -> Result<()> {
    let manager = WorktreeManager::new(repo, None).map_err(|e| anyhow::anyhow!("{e}"))?;
    let active = manager.list_active().map_err(|e| anyhow::anyhow!("{e}"))?;
    if active.is_empty() {
        println!("no active worktrees");
    }
    for worktree in active {
        println!("issue #{}: {} at {}", worktree.issue_number, worktree.branch, worktree.path.display());
    }
    Ok(())
}

fn agents_command(repo: &std::path::Path, command: AgentsCommand) -> Result<()> {
    let path = default_agents_path(repo);
    match command {
        AgentsCommand::List => {
            let file = load_agents_file(&path)?;
            for (name, definition) in &file.agents {
                println!("{name}: {} {}", definition.command, definition.args.join(" "));
            }
        }
        AgentsCommand::Scaffold { force } => {
            if path.exists() && !force {
                anyhow::bail!("agents file already exists at {} (pass --force to overwrite)", path.display());
            }
            let file = scaffold_agents_file();
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&path, toml::to_string_pretty(&file)?)?;
            println!("wrote starter agents file to {}", path.display());
        }
        AgentsCommand::Validate => {
            let file = load_agents_file(&path)?;
            let problems = validate_agents_file(&file);
            if problems.is_empty() {
                println!("agents file is valid");
            } else {
                for problem in &problems {
                    eprintln!("{problem}");
                }
                anyhow::bail!("{} problem(s) found in agents file", problems.len());
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let repo = repo_root(cli.repo)?;

    // Graceful shutdown: first Ctrl+C asks in-flight phases to stop at their
    // next boundary and joins them; a second Ctrl+C force-exits.
    let cancel = CancellationToken::new();
    let cancel_for_run = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);
    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nforce exit");
                std::process::exit(130);
            }
            eprintln!("\ninterrupted, finishing in-flight work (Ctrl+C again to force)...");
            cancel.cancel();
        }
    });

    let result = match cli.command {
        Commands::Run {
            config,
            resume: _,
            dry_run,
            issues,
            parallel,
            no_pr,
            respond_to_reviews,
        } => {
            let overrides = RunOverrides {
                dry_run: dry_run.then_some(true),
                parallel,
                no_pr,
                respond_to_reviews: respond_to_reviews.then_some(true),
            };
            run_command(repo, config, issues, overrides, respond_to_reviews, cancel_for_run).await
        }
        Commands::Status { issues } => status_command(&repo, issues),
        Commands::Reset { issues } => reset_command(&repo, issues),
        Commands::Worktrees => worktrees_command(&repo),
        Commands::Agents { command } => agents_command(&repo, command),
    };

    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
    if got_first_signal.load(Ordering::SeqCst) {
        std::process::exit(130);
    }
    Ok(())
}
