use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gerrit_backup::config::{self, Config};
use gerrit_backup::context::{Action, CommandName, Locality, RunContext};
use gerrit_backup::managers::logging::{self, LoggingConfig};
use gerrit_backup::managers::remote::{check_wire_version, exit_code_for, RemoteBridge};
use gerrit_backup::managers::tasks::TaskScheduler;
use gerrit_backup::managers::workflow::{self, Collaborators};
use gerrit_backup::storage::build_targets;
use gerrit_backup::utils::executor::{CommandExecutor, RealExecutor};
use gerrit_backup::utils::gerrit_api::GerritApi;
use gerrit_backup::utils::locker::RunLock;
use gerrit_backup::utils::{repo_list, tools};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Parser)]
#[command(name = "gerrit-backup")]
#[command(about = "Backup and restore of Gerrit repositories and the review database", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "gerrit-backup.toml")]
    config: PathBuf,

    /// Show what would be done without making changes
    #[arg(long, global = true)]
    dry_run: bool,

    /// Debug output on the console
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Repository list to use instead of the configured one
    #[arg(long, global = true)]
    repo_list: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Part {
    Database,
    Repos,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up the database and repositories on this host
    Backup {
        /// Only back up one part
        #[arg(long, value_enum)]
        only: Option<Part>,
    },

    /// Restore the database and repositories on this host
    Restore {
        /// Only restore one part
        #[arg(long, value_enum)]
        only: Option<Part>,
    },

    /// Show disk usage of each repository
    DiskUsage,

    /// List stored versions of each backup unit
    Versions,

    /// Run the pre-tasks only
    PreTasksOnly,

    /// Run the post-tasks only
    PostTasksOnly,

    /// Run actions on the configured Gerrit host over SSH
    Remote {
        /// Run each action in a detached screen session
        #[arg(long)]
        use_screen: bool,

        /// Actions to run remotely (all for the same command)
        #[arg(required = true, value_enum)]
        actions: Vec<Action>,
    },

    /// Fetch the project list from the Gerrit REST API into the repository list
    GetRepoList,

    /// Validate configuration file
    Validate,

    /// Entry point for remote runs
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        wire_version: u32,

        #[arg(value_enum)]
        action: Action,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("✗ {:#}", e);
        std::process::exit(exit_code_for(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    // A mismatched control host must be told before anything else happens
    if let Commands::Worker { wire_version, .. } = &cli.command {
        check_wire_version(*wire_version)?;
    }

    if let Commands::Validate = cli.command {
        logging::init_console_logging(cli.verbose);
        let config = config::load_config(&cli.config)?;
        print_validation(&config);
        return Ok(());
    }

    let config = config::load_config(&cli.config)?;

    // Setup logging with file rotation (must keep guard alive)
    let logging_config = LoggingConfig::from_config(&config.global, cli.verbose);
    let _log_guard = logging::init_logging(&logging_config)?;

    let _lock = RunLock::acquire(&config.global.hostname)?;
    let started = Instant::now();

    let executor: Arc<dyn CommandExecutor> = Arc::new(RealExecutor::new());
    let repo_list = cli.repo_list.clone();
    let context = |command: CommandName, locality: Locality| {
        RunContext::new(command, locality, cli.dry_run, cli.verbose, repo_list.clone())
    };

    match cli.command {
        Commands::Backup { only } => {
            let action = match only {
                None => Action::Backup,
                Some(Part::Database) => Action::BackupDatabase,
                Some(Part::Repos) => Action::BackupRepos,
            };
            run_direct(&config, action, executor, &context(CommandName::Backup, Locality::TargetHost))?;
            println!("✓ Backup completed successfully");
        }

        Commands::Restore { only } => {
            let action = match only {
                None => Action::Restore,
                Some(Part::Database) => Action::RestoreDatabase,
                Some(Part::Repos) => Action::RestoreRepos,
            };
            run_direct(&config, action, executor, &context(CommandName::Restore, Locality::TargetHost))?;
            println!("✓ Restore completed successfully");
        }

        Commands::DiskUsage => {
            run_direct(
                &config,
                Action::DiskUsage,
                executor,
                &context(CommandName::DiskUsage, Locality::TargetHost),
            )?;
        }

        Commands::Versions => {
            run_direct(
                &config,
                Action::GetVersions,
                executor,
                &context(CommandName::GetVersions, Locality::TargetHost),
            )?;
        }

        Commands::PreTasksOnly => {
            run_direct(
                &config,
                Action::PreTasksOnly,
                executor,
                &context(CommandName::PreTasksOnly, Locality::TargetHost),
            )?;
            println!("✓ Pre-tasks completed");
        }

        Commands::PostTasksOnly => {
            run_direct(
                &config,
                Action::PostTasksOnly,
                executor,
                &context(CommandName::PostTasksOnly, Locality::TargetHost),
            )?;
            println!("✓ Post-tasks completed");
        }

        Commands::Remote { use_screen, actions } => {
            let first = *actions
                .first()
                .ok_or_else(|| anyhow!("No remote action given"))?;
            let ctx = context(first.command_name(), Locality::ControlHost);

            if !ctx.dry_run() {
                ensure_tools(&tools::remote_tools())?;
            }

            let binary = std::env::current_exe().context("Failed to locate the running binary")?;
            let bridge = RemoteBridge::new(config.clone(), cli.config.clone(), binary).with_screen(use_screen);
            let transport = workflow::open_transport(&config, first, executor.clone())?;
            let deps = Collaborators::real(&config, executor)?;

            workflow::run_remote(&config, &actions, &bridge, transport, &deps, &ctx)?;
            println!("✓ Remote {} completed successfully", first.command_name());
        }

        Commands::GetRepoList => {
            let ctx = context(CommandName::GetRepoList, Locality::TargetHost);
            let repos = fetch_repo_list(&config, executor, &ctx)?;
            println!("✓ {} repositories", repos);
        }

        Commands::Worker { action, .. } => {
            run_direct(&config, action, executor, &context(action.command_name(), Locality::TargetHost))?;
        }

        Commands::Validate => unreachable!("Validate is handled before config loading"),
    }

    info!("Processing time: {:.1}s", started.elapsed().as_secs_f64());
    Ok(())
}

/// Run `action` on this host: tool check, targets, then the workflow
fn run_direct(
    config: &Config,
    action: Action,
    executor: Arc<dyn CommandExecutor>,
    ctx: &RunContext,
) -> Result<()> {
    if !ctx.dry_run() {
        ensure_tools(&tools::required_tools(action))?;
    }

    let targets = build_targets(config)?;
    let deps = Collaborators::real(config, executor)?;

    workflow::run_local(config, action, targets, &deps, ctx)
}

fn ensure_tools(required: &[&str]) -> Result<()> {
    let missing = tools::missing_tools(required);
    if !missing.is_empty() {
        bail!("Required tools not found in PATH: {}", missing.join(", "));
    }
    Ok(())
}

/// Query the Gerrit REST API and write the sorted project list
fn fetch_repo_list(config: &Config, executor: Arc<dyn CommandExecutor>, ctx: &RunContext) -> Result<usize> {
    let api = config
        .api
        .as_ref()
        .ok_or_else(|| anyhow!("[api] section with the Gerrit URL is required for get-repo-list"))?;

    let path = ctx
        .repo_list_override()
        .map(PathBuf::from)
        .unwrap_or_else(|| config.global.repo_list_file.clone());

    let deps = Collaborators::real(config, executor)?;
    let scheduler = TaskScheduler::new(config.clone(), deps.executor.clone(), deps.jobs.clone());

    let mut count = 0;
    workflow::with_tasks(&scheduler, ctx, || {
        let mut repos = GerritApi::new(&api.url, api.verify_ssl)?.fetch_projects()?;
        repos.sort();
        count = repos.len();

        if ctx.dry_run() {
            info!("[DRY RUN] Would write {} repositories to {:?}", repos.len(), path);
        } else {
            repo_list::write_repo_list(&path, &repos)?;
            info!("Wrote {} repositories to {:?}", repos.len(), path);
        }
        Ok(())
    })?;

    Ok(count)
}

fn print_validation(config: &Config) {
    println!("Configuration is valid!");
    println!("Hostname: {}", config.global.hostname);
    println!("Gerrit site: {}", config.gerrit.site_path.display());
    if let Some(folder) = &config.backup_folder {
        println!("Folder backup: {}", folder.path.display());
    }
    if let Some(s3) = &config.backup_s3 {
        println!("S3 backup: {} ({})", s3.bucket, s3.region);
    }
    println!("Repository list: {}", config.global.repo_list_file.display());
    println!("Pre-tasks: {}", config.pre_tasks.len());
    println!("Post-tasks: {}", config.post_tasks.len());
    for (label, host) in [("backup", &config.remote.backup), ("restore", &config.remote.restore)] {
        if let Some(host) = host {
            println!("Remote {} host: {}", label, host.destination());
        }
    }
}
