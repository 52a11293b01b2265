//! Quorum CLI - multi-agent orchestration over git worktrees
//!
//! Usage:
//!   quorum init [path]              Write a default .quorum/config.toml
//!   quorum run <description>        Run a task to completion
//!   quorum status <task-id>         Show a persisted task
//!   quorum sweep                    Tear down leftover environments

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quorum_core::{QuorumConfig, TaskId, TaskStatus};
use quorum_orchestrator::{
    default_worktree_root, install_termination_handlers, FileTaskStore, LifecycleRegistry,
    Orchestrator, Task, TaskStore, WorktreeProvisioner,
};
use quorum_vcs::{GitBackend, GitCommand, GitExecutor, VersionControl};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "quorum")]
#[command(author, version, about = "Multi-agent orchestration over git worktrees")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Init {
        /// Repository path (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run a task
    Run {
        /// What the agents should do
        description: String,

        /// Repository path
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Maximum subtasks running at once
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Branch subtasks are cut from
        #[arg(long)]
        base: Option<String>,
    },

    /// Show a persisted task
    Status {
        /// Task ID
        task_id: String,

        /// Repository path
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Tear down environments left behind by interrupted runs
    Sweep {
        /// Environment name prefix (defaults to the configured prefix)
        #[arg(long)]
        prefix: Option<String>,

        /// Repository path
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::Run {
            description,
            repo,
            max_concurrency,
            base,
        } => cmd_run(description, repo, max_concurrency, base).await,
        Commands::Status { task_id, repo, json } => cmd_status(task_id, repo, json).await,
        Commands::Sweep { prefix, repo } => cmd_sweep(prefix, repo).await,
    }
}

fn cmd_init(path: PathBuf) -> Result<()> {
    info!("Initializing Quorum in {:?}", path);
    QuorumConfig::write_default(&path).context("Failed to write config")?;

    println!("Initialized Quorum in {:?}", path);
    println!("Created:");
    println!("  .quorum/config.toml");
    Ok(())
}

async fn cmd_run(
    description: String,
    repo: PathBuf,
    max_concurrency: Option<usize>,
    base: Option<String>,
) -> Result<()> {
    let workspace = Workspace::open(&repo).await?;
    let mut config = QuorumConfig::load_or_default(&workspace.root).context("Failed to load config")?;
    if let Some(n) = max_concurrency {
        config.orchestration.max_concurrency = n;
    }
    if let Some(base) = base {
        config.orchestration.base_branch = base;
    }

    let orchestrator = Orchestrator::open(
        config,
        &workspace.root,
        workspace.vcs.clone(),
        workspace.registry.clone(),
    )
    .context("Invalid configuration")?;
    install_termination_handlers(workspace.registry.clone(), orchestrator.cancellation_token())
        .context("Failed to install signal handlers")?;

    let task = orchestrator.run(&description).await;
    print_task(&task);

    if task.status() != TaskStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_status(task_id: String, repo: PathBuf, json: bool) -> Result<()> {
    let root = repo_root(&repo).await;
    let store = FileTaskStore::for_repo(&root);

    let Some(task) = store.load(&TaskId::new(&task_id)).await? else {
        anyhow::bail!("No task {} in {:?}", task_id, root);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        print_task(&task);
        println!("\nHistory:");
        for record in task.history() {
            println!(
                "  {} {} -> {}{}",
                record.at.format("%H:%M:%S"),
                record.from,
                record.to,
                record.note.as_deref().map(|n| format!(" ({})", n)).unwrap_or_default()
            );
        }
    }
    Ok(())
}

async fn cmd_sweep(prefix: Option<String>, repo: PathBuf) -> Result<()> {
    let workspace = Workspace::open(&repo).await?;
    let config = QuorumConfig::load_or_default(&workspace.root)?;
    let prefix = prefix.unwrap_or_else(|| format!("{}-", config.orchestration.environment_prefix));

    let report = workspace.registry.force_release_by_owner_prefix(&prefix).await;
    println!("Released {} environment(s)", report.released_count);
    for failure in &report.failures {
        println!("  failed {}: {}", failure.environment, failure.error);
    }

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

/// A git repository with the one registry every environment in it goes through
struct Workspace {
    root: PathBuf,
    vcs: Arc<dyn VersionControl>,
    registry: Arc<LifecycleRegistry>,
}

impl Workspace {
    async fn open(path: &Path) -> Result<Self> {
        let git = GitCommand::detect(path).await.context("Not a git repository")?;
        let root = git.repo_root().clone();
        let vcs: Arc<dyn VersionControl> = Arc::new(GitBackend::new(git));
        let provisioner = Arc::new(WorktreeProvisioner::new(vcs.clone(), default_worktree_root(&root)));

        Ok(Self {
            registry: Arc::new(LifecycleRegistry::new(provisioner)),
            root,
            vcs,
        })
    }
}

/// Repository root for `path`, or `path` itself outside git
async fn repo_root(path: &Path) -> PathBuf {
    match GitCommand::detect(path).await {
        Ok(git) => git.repo_root().clone(),
        Err(_) => path.to_path_buf(),
    }
}

fn print_task(task: &Task) {
    println!("Task {}: {}", task.id, task.status());
    println!("  {}", task.description);
    if let Some(mode) = task.mode {
        println!("  mode: {:?}, subtasks: {}", mode, task.subtasks.len());
    }
    if task.rounds > 0 {
        println!("  rounds: {}", task.rounds);
    }
    for dialogue in &task.dialogues {
        println!(
            "  dialogue {} -> {}: {} round(s), consensus: {}",
            dialogue.asker, dialogue.addressee, dialogue.rounds, dialogue.consensus
        );
    }
    for result in &task.subtask_results {
        println!(
            "  subtask {} [{}] on {}{}",
            result.index,
            result.status,
            result.branch_name,
            result.reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default()
        );
    }
    if let Some(merge) = &task.merge_result {
        println!("  merge: {}", merge.summary());
    }
    println!("  tokens: {}", task.usage.total());
    if let Some(reason) = &task.terminal_reason {
        println!("  reason: {}", reason);
    }
}
