//! branchwise command-line tool.
//!
//! Inspect how a branch relates to the integration branch, get merge-vs-rebase
//! advice, predict conflicts, synchronize, and clean up merged branches.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use dialoguer::Confirm;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use branchwise_core::config::{SyncStrategy, REPO_CONFIG_FILE};
use branchwise_core::{
    BranchManager, BranchwiseConfig, ConflictDetector, ConflictReport, RepositoryGateway,
    StrategyAdvisor, SyncManager, SyncState, WorkflowError,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Git branch-workflow assistant.
#[derive(Parser, Debug)]
#[command(
    name = "branchwise",
    version,
    about = "Keep branches in step with the integration branch"
)]
struct Cli {
    /// Repository to operate on.
    #[arg(short = 'C', long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Extra configuration file applied on top of the layered configuration.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug). Also shows error causes.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show how a branch relates to the integration branch.
    Status {
        /// Branch to inspect (default: current branch).
        #[arg(short, long)]
        branch: Option<String>,

        /// Include tracking, merge state and the full branch list.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Bring a branch up to date with the integration branch.
    Sync {
        #[arg(short, long)]
        branch: Option<String>,

        /// Integration strategy (default: sync.default_strategy).
        #[arg(short, long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Skip the conflict pre-check.
        #[arg(short, long)]
        force: bool,
    },

    /// Recommend merge or rebase for a branch.
    Advice {
        #[arg(short, long)]
        branch: Option<String>,

        /// Branch to integrate into (default: general.main_branch).
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Predict conflicts between a branch and its target.
    CheckConflicts {
        #[arg(short, long)]
        branch: Option<String>,

        #[arg(short, long)]
        target: Option<String>,
    },

    /// Delete branches already merged into the integration branch.
    Clean {
        /// Also consider and delete remote branches.
        #[arg(short, long)]
        remote: bool,

        /// Only list what would be deleted.
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,

        /// Additional branches to keep.
        #[arg(short, long, num_args = 1..)]
        exclude: Vec<String>,
    },

    /// Inspect or create configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a commented default configuration file.
    Init {
        /// Output path (default: <repo>/.branchwise.toml).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file without asking.
        #[arg(short, long)]
        force: bool,
    },
    /// Load and validate the effective configuration.
    Validate,
    /// Print the effective configuration.
    Show,
    /// Print one value, e.g. `advice.rebase_threshold`.
    Get { key: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Merge,
    Rebase,
    Auto,
}

impl From<StrategyArg> for SyncStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Merge => SyncStrategy::Merge,
            StrategyArg::Rebase => SyncStrategy::Rebase,
            StrategyArg::Auto => SyncStrategy::Auto,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            report_error(&e, cli.verbose > 0);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

/// Message and suggestions always; the cause chain only when verbose.
fn report_error(err: &anyhow::Error, verbose: bool) {
    eprintln!("{}", style::error(&err.to_string()));

    if let Some(workflow) = err.chain().find_map(|c| c.downcast_ref::<WorkflowError>()) {
        if workflow.to_string() != err.to_string() {
            eprintln!("  {}", workflow);
        }
        let suggestions = workflow.suggestions();
        if !suggestions.is_empty() {
            eprintln!();
            eprintln!("{}", style::header("Suggestions:"));
            for suggestion in &suggestions {
                eprintln!("{}", style::bullet(suggestion));
            }
        }
        if verbose {
            eprintln!();
            eprintln!("{}", style::dim(&format!("kind: {}", workflow.kind())));
        }
    }

    if verbose {
        for cause in err.chain().skip(1) {
            eprintln!("{}", style::dim(&format!("caused by: {}", cause)));
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    if let Commands::Config { action } = &cli.command {
        return cmd_config(cli, action).map(|()| ExitCode::SUCCESS);
    }

    let (gateway, config) = open_repository(cli)?;
    match &cli.command {
        Commands::Status { branch, detailed } => {
            cmd_status(cli, gateway, &config, branch.as_deref(), *detailed)
        }
        Commands::Sync {
            branch,
            strategy,
            force,
        } => cmd_sync(
            cli,
            gateway,
            &config,
            branch.as_deref(),
            strategy.map(SyncStrategy::from),
            *force,
        ),
        Commands::Advice { branch, target } => {
            cmd_advice(cli, gateway, &config, branch.as_deref(), target.as_deref())
        }
        Commands::CheckConflicts { branch, target } => {
            cmd_check_conflicts(cli, gateway, &config, branch.as_deref(), target.as_deref())
        }
        Commands::Clean {
            remote,
            dry_run,
            yes,
            exclude,
        } => cmd_clean(cli, gateway, &config, *remote, *dry_run, *yes, exclude),
        Commands::Config { .. } => Ok(ExitCode::SUCCESS),
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli, repo_root: Option<&Path>) -> Result<BranchwiseConfig> {
    let mut config = BranchwiseConfig::load_layered(repo_root)
        .context("failed to load configuration")?;
    if let Some(path) = &cli.config {
        if !path.exists() {
            anyhow::bail!("configuration file not found: {}", path.display());
        }
        config
            .merge_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        config.validate().context("invalid configuration")?;
    }
    Ok(config)
}

fn open_repository(cli: &Cli) -> Result<(RepositoryGateway, BranchwiseConfig)> {
    let gateway = RepositoryGateway::open(&cli.repo)?;
    let config = load_config(cli, Some(gateway.root()))?;
    debug!(root = %gateway.root().display(), main = %config.general.main_branch, "repository opened");
    let gateway = gateway.with_remote(config.general.remote.clone());
    Ok((gateway, config))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("failed to encode JSON")?);
    Ok(())
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_status(
    cli: &Cli,
    gateway: RepositoryGateway,
    config: &BranchwiseConfig,
    branch: Option<&str>,
    detailed: bool,
) -> Result<ExitCode> {
    let sync = SyncManager::new(gateway.clone(), config);
    let status = sync.check_sync_status(branch)?;

    if !detailed {
        if cli.json {
            print_json(&status)?;
        } else if status.is_synced {
            println!("{}", style::success(&status.message));
        } else {
            println!("{}", style::warn(&status.message));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let manager = BranchManager::new(gateway, config);
    let details = manager.branch_status(Some(&status.branch))?;
    let branches = manager.list_branches(true)?;
    if cli.json {
        print_json(&serde_json::json!({
            "status": status,
            "branch": details,
            "branches": branches,
        }))?;
        return Ok(ExitCode::SUCCESS);
    }

    println!();
    println!("{}", style::header(&format!("Branch {}", details.name)));
    println!();
    println!("  Target      : {}", status.target);
    println!("  Ahead       : {}", details.ahead);
    println!("  Behind      : {}", details.behind);
    println!("  Merged      : {}", if details.is_merged { "yes" } else { "no" });
    println!(
        "  Tracking    : {}",
        details.tracking.as_deref().unwrap_or("none")
    );
    println!(
        "  Last commit : {}",
        details
            .last_commit_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!();

    let mut table = new_table(vec!["Branch", "Location", "Last commit", "Merged", "Tracking"]);
    for b in &branches {
        let name = if b.is_main {
            Cell::new(format!("{} (main)", b.name)).fg(Color::Cyan)
        } else {
            Cell::new(&b.name)
        };
        table.add_row(vec![
            name,
            Cell::new(if b.is_remote { "remote" } else { "local" }),
            Cell::new(b.last_commit_label()),
            if b.is_merged {
                Cell::new("✓ merged").fg(Color::Green)
            } else {
                Cell::new("—")
            },
            Cell::new(b.tracking.as_deref().unwrap_or("—")),
        ]);
    }
    println!("{}", table);
    println!();
    println!("{}", status.message);

    Ok(ExitCode::SUCCESS)
}

fn cmd_sync(
    cli: &Cli,
    gateway: RepositoryGateway,
    config: &BranchwiseConfig,
    branch: Option<&str>,
    strategy: Option<SyncStrategy>,
    force: bool,
) -> Result<ExitCode> {
    let mut sync = SyncManager::new(gateway, config);
    let outcome = sync
        .sync_with_main(branch, strategy, force)
        .context("synchronization failed")?;

    if cli.json {
        print_json(&outcome)?;
    } else {
        match outcome.status {
            SyncState::UpToDate | SyncState::Synchronized => {
                println!("{}", style::success(&outcome.message))
            }
            SyncState::ConflictsDetected | SyncState::ConflictOccurred => {
                println!("{}", style::error(&outcome.message))
            }
        }
        if let Some(strategy) = outcome.strategy {
            println!("  Strategy: {}", style::strategy(strategy));
        }
        if let Some(report) = &outcome.conflicts {
            print_conflicts(report);
        }
        if outcome.stashed && outcome.pending_stash.is_none() {
            println!("{}", style::dim("  Local changes were stashed and restored."));
        }
        if let Some(stash) = &outcome.pending_stash {
            println!(
                "{}",
                style::warn(&format!(
                    "Local changes are still stashed ({}). Restore them with `git stash apply`.",
                    stash
                ))
            );
        }
    }

    Ok(match outcome.status {
        SyncState::UpToDate | SyncState::Synchronized => ExitCode::SUCCESS,
        SyncState::ConflictsDetected | SyncState::ConflictOccurred => ExitCode::from(2),
    })
}

fn cmd_advice(
    cli: &Cli,
    gateway: RepositoryGateway,
    config: &BranchwiseConfig,
    branch: Option<&str>,
    target: Option<&str>,
) -> Result<ExitCode> {
    let branch = match branch {
        Some(b) => b.to_string(),
        None => gateway.current_branch()?,
    };
    let target = target.unwrap_or(&config.general.main_branch).to_string();
    let advisor = StrategyAdvisor::new(gateway, config);
    let advice = advisor.get_strategy_advice(&branch, &target);

    if cli.json {
        print_json(&advice)?;
        return Ok(ExitCode::SUCCESS);
    }

    println!();
    println!(
        "{} {} into {}: {}",
        style::header("Integrate"),
        branch,
        target,
        style::strategy(advice.strategy)
    );
    println!("  {}", advice.reason);
    if let Some(pattern) = &advice.forced_by {
        println!("{}", style::dim(&format!("  forced by pattern '{}'", pattern)));
    }
    if !advice.rebase_factors.is_empty() {
        println!();
        println!("{}", style::header("Favouring rebase:"));
        for factor in &advice.rebase_factors {
            println!("{}", style::bullet(factor));
        }
    }
    if !advice.merge_factors.is_empty() {
        println!();
        println!("{}", style::header("Favouring merge:"));
        for factor in &advice.merge_factors {
            println!("{}", style::bullet(factor));
        }
    }
    if let Some(details) = &advice.details {
        println!();
        let mut table = new_table(vec!["Signal", "Value"]);
        table.add_row(vec![Cell::new("Ahead / behind"), Cell::new(format!("{} / {}", details.ahead, details.behind))]);
        table.add_row(vec![Cell::new("Age (days)"), Cell::new(details.age_days)]);
        table.add_row(vec![Cell::new("Commits"), Cell::new(details.total_commits)]);
        table.add_row(vec![Cell::new("Naming pattern"), Cell::new(details.pattern)]);
        table.add_row(vec![
            Cell::new("Files (code/config/doc/test/other)"),
            Cell::new(format!(
                "{}/{}/{}/{}/{}",
                details.files.code,
                details.files.config,
                details.files.doc,
                details.files.test,
                details.files.other
            )),
        ]);
        table.add_row(vec![
            Cell::new("Conflicts (high/medium/low)"),
            Cell::new(if details.conflicts_inconclusive {
                "unknown".to_string()
            } else {
                format!(
                    "{} ({}/{}/{})",
                    details.conflict_count,
                    details.severity.high,
                    details.severity.medium,
                    details.severity.low
                )
            }),
        ]);
        println!("{}", table);
    }
    println!();

    Ok(ExitCode::SUCCESS)
}

fn cmd_check_conflicts(
    cli: &Cli,
    gateway: RepositoryGateway,
    config: &BranchwiseConfig,
    branch: Option<&str>,
    target: Option<&str>,
) -> Result<ExitCode> {
    let branch = match branch {
        Some(b) => b.to_string(),
        None => gateway.current_branch()?,
    };
    let target = target.unwrap_or(&config.general.main_branch).to_string();
    let detector = ConflictDetector::new(gateway, config);
    let report = detector.detect_conflicts(&branch, &target);

    if cli.json {
        print_json(&report)?;
    } else if report.has_conflicts {
        print_conflicts(&report);
    } else {
        println!(
            "{}",
            style::success(&format!("'{}' merges cleanly into '{}'", branch, target))
        );
        for suggestion in &report.suggestions {
            println!("{}", style::bullet(suggestion));
        }
    }

    Ok(if report.has_conflicts {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn print_conflicts(report: &ConflictReport) {
    println!();
    if let Some(error) = &report.error {
        println!("{}", style::warn(&format!("Conflicts could not be ruled out: {}", error)));
    } else {
        println!(
            "{}",
            style::header(&format!(
                "Conflicts merging {} into {} ({})",
                report.source,
                report.target,
                report.conflicting_files.len()
            ))
        );
        println!();
        let mut table = new_table(vec!["File", "Type", "Severity", "Lines"]);
        for c in &report.conflicting_files {
            table.add_row(vec![
                Cell::new(&c.file_path),
                Cell::new(c.conflict_type),
                Cell::new(c.severity).fg(style::severity_color(c.severity)),
                Cell::new(c.modified_lines),
            ]);
        }
        println!("{}", table);
        for c in &report.conflicting_files {
            if let Some(diff) = &c.diff {
                println!();
                println!("{}", style::dim(&c.file_path));
                println!("{}", diff);
            }
        }
    }

    if !report.suggestions.is_empty() {
        println!();
        println!("{}", style::header("Suggestions:"));
        for suggestion in &report.suggestions {
            println!("{}", style::bullet(suggestion));
        }
    }
    println!();
}

fn cmd_clean(
    cli: &Cli,
    gateway: RepositoryGateway,
    config: &BranchwiseConfig,
    remote: bool,
    dry_run: bool,
    yes: bool,
    exclude: &[String],
) -> Result<ExitCode> {
    let manager = BranchManager::new(gateway, config);
    let mut excluded = config.clean.exclude_branches.clone();
    excluded.extend(exclude.iter().cloned());

    let candidates = manager.find_merged_branches(remote, Some(&excluded))?;
    if candidates.is_empty() {
        if cli.json {
            print_json(&candidates)?;
        } else {
            println!("{}", style::success("No merged branches to clean."));
        }
        return Ok(ExitCode::SUCCESS);
    }

    if cli.json {
        if dry_run {
            print_json(&candidates)?;
        }
    } else {
        let mut table = new_table(vec!["Branch", "Location", "Last commit"]);
        for b in &candidates {
            table.add_row(vec![
                Cell::new(&b.name),
                Cell::new(if b.is_remote { "remote" } else { "local" }),
                Cell::new(b.last_commit_label()),
            ]);
        }
        println!();
        println!(
            "{}",
            style::header(&format!("Merged into {} ({})", manager.main_branch(), candidates.len()))
        );
        println!("{}", table);
    }
    if dry_run {
        return Ok(ExitCode::SUCCESS);
    }

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete {} branch(es)?", candidates.len()))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !confirmed {
            println!("{}", style::warn("Cleanup cancelled. No branches were deleted."));
            return Ok(ExitCode::SUCCESS);
        }
    }

    let report = manager.clean_merged_branches(&candidates, remote);
    if cli.json {
        print_json(&report)?;
    } else {
        for name in &report.cleaned {
            println!("{}", style::success(&format!("deleted {}", name)));
        }
        for failure in &report.failed {
            println!(
                "{}",
                style::error(&format!("{}: {}", failure.branch, failure.reason))
            );
        }
    }

    Ok(if report.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_config(cli: &Cli, action: &ConfigAction) -> Result<()> {
    // Configuration commands also work outside a repository.
    let repo_root = RepositoryGateway::open(&cli.repo)
        .ok()
        .map(|g| g.root().to_path_buf());

    match action {
        ConfigAction::Init { output, force } => {
            let path = match (output, &repo_root) {
                (Some(path), _) => path.clone(),
                (None, Some(root)) => root.join(REPO_CONFIG_FILE),
                (None, None) => cli.repo.join(REPO_CONFIG_FILE),
            };

            if path.exists() && !force {
                let overwrite = Confirm::new()
                    .with_prompt(format!("{} already exists. Overwrite?", path.display()))
                    .default(false)
                    .interact()
                    .context("failed to read confirmation")?;
                if !overwrite {
                    println!(
                        "{}",
                        style::warn("Init cancelled. Existing file was not modified.")
                    );
                    return Ok(());
                }
            }

            std::fs::write(&path, BranchwiseConfig::default_toml())
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "{}",
                style::success(&format!("Default configuration written to {}", path.display()))
            );
            Ok(())
        }

        ConfigAction::Validate => {
            let config = load_config(cli, repo_root.as_deref())?;
            println!("{}", style::success("Configuration is valid"));
            println!();
            println!("  Main branch      : {}", config.general.main_branch);
            println!("  Remote           : {}", config.general.remote);
            println!("  Default strategy : {}", config.sync.default_strategy);
            println!("  Rebase threshold : {}", config.advice.rebase_threshold);
            println!(
                "  Excluded branches: {}",
                config.clean.exclude_branches.join(", ")
            );
            Ok(())
        }

        ConfigAction::Show => {
            let config = load_config(cli, repo_root.as_deref())?;
            if cli.json {
                print_json(&config)
            } else {
                print!("{}", config.to_toml_string()?);
                Ok(())
            }
        }

        ConfigAction::Get { key } => {
            let config = load_config(cli, repo_root.as_deref())?;
            let value = config
                .get_value(key)
                .ok_or_else(|| anyhow::anyhow!("unknown configuration key '{}'", key))?;
            match value {
                toml::Value::String(s) => println!("{}", s),
                other => println!("{}", other),
            }
            Ok(())
        }
    }
}
