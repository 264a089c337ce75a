//! Backup manager - orchestrates backup and restore across every target

use crate::config::{Config, ConfigError};
use crate::context::{Action, RunContext};
use crate::storage::{BackupTarget, Direction, FanOutError};
use crate::utils::archive::Archiver;
use crate::utils::database::Database;
use crate::utils::executor::CommandExecutor;
use crate::utils::repo_list::{check_repo_id, merge_repo_lists, parse_repo_list};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// One or more units (database, repositories) failed during a run
#[derive(Debug, thiserror::Error)]
#[error("{} of {} unit(s) failed: {}", .failed.len(), .total, .failed.join(", "))]
pub struct UnitsFailed {
    pub total: usize,
    pub failed: Vec<String>,
    /// Error of the first failed unit
    #[source]
    pub first: anyhow::Error,
}

#[derive(Debug, thiserror::Error)]
#[error("No backup target could supply the repository list")]
pub struct RepoListUnavailable;

/// `[index/total] pct%`
pub fn progress(index: usize, total: usize) -> String {
    let pct = if total == 0 { 100.0 } else { index as f64 / total as f64 * 100.0 };
    format!("[{}/{}] {:.0}%", index, total, pct)
}

/// Collects unit failures so the run can continue and fail at the end
#[derive(Default)]
struct UnitTracker {
    total: usize,
    failed: Vec<String>,
    first: Option<anyhow::Error>,
}

impl UnitTracker {
    fn record(&mut self, unit: &str, result: Result<()>) {
        self.total += 1;
        if let Err(e) = result {
            error!("{} failed: {:#}", unit, e);
            self.failed.push(unit.to_string());
            if self.first.is_none() {
                self.first = Some(e);
            }
        }
    }

    fn finish(self) -> Result<()> {
        match self.first {
            None => Ok(()),
            Some(first) => Err(UnitsFailed {
                total: self.total,
                failed: self.failed,
                first,
            }
            .into()),
        }
    }
}

pub struct BackupManager {
    config: Config,
    targets: Vec<BackupTarget>,
    executor: Arc<dyn CommandExecutor>,
    archiver: Archiver,
    database: Database,
}

impl BackupManager {
    /// Create new backup manager. At least one target is required.
    pub fn new(
        config: Config,
        targets: Vec<BackupTarget>,
        executor: Arc<dyn CommandExecutor>,
    ) -> std::result::Result<Self, ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        let timeout = Duration::from_secs(config.global.default_timeout_seconds);
        let archiver = Archiver::new(executor.clone(), timeout);
        let database = Database::new(executor.clone(), config.database.clone(), timeout);

        Ok(Self {
            config,
            targets,
            executor,
            archiver,
            database,
        })
    }

    pub fn targets(&self) -> &[BackupTarget] {
        &self.targets
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.global.default_timeout_seconds)
    }

    /// Run the workflow for `action`. Task-only actions do nothing here.
    pub fn execute(&self, action: Action, ctx: &RunContext) -> Result<()> {
        match action {
            Action::Backup | Action::BackupDatabase | Action::BackupRepos => self.backup(action, ctx),
            Action::Restore | Action::RestoreDatabase | Action::RestoreRepos => self.restore(action, ctx),
            Action::DiskUsage => {
                let repos = self.local_repos(ctx)?;
                self.disk_usage(&repos, ctx).map(|_| ())
            }
            Action::GetVersions => {
                let repos = self.local_repos(ctx)?;
                for repo in &repos {
                    self.report_versions(repo, ctx);
                }
                Ok(())
            }
            Action::PreTasksOnly | Action::PostTasksOnly => Ok(()),
        }
    }

    /// Repository list on this host: the explicit override or the configured file
    pub fn repo_list_file(&self, ctx: &RunContext) -> PathBuf {
        ctx.repo_list_override()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.global.repo_list_file.clone())
    }

    pub fn local_repos(&self, ctx: &RunContext) -> Result<Vec<String>> {
        let path = self.repo_list_file(ctx);
        let repos = parse_repo_list(&path)?;
        info!("Loaded {} repositories from {:?}", repos.len(), path);
        Ok(repos)
    }

    // ---- fan-out ----

    /// Upload `local` to every target; each target is attempted independently
    pub fn fan_out_upload<F>(&self, label: &str, key: F, local: &Path, ctx: &RunContext) -> std::result::Result<(), FanOutError>
    where
        F: Fn(&BackupTarget) -> String,
    {
        let mut failures = Vec::new();
        for target in &self.targets {
            let path = key(target);
            if let Err(e) = target.upload(&path, local, ctx) {
                error!("Upload of {} to {} failed: {}", label, target.description(), e);
                failures.push((target.description(), e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FanOutError {
                label: label.to_string(),
                direction: Direction::Upload,
                failures,
            })
        }
    }

    /// Download from the first target that succeeds; returns its description
    pub fn download_first<F>(&self, label: &str, key: F, dest: &Path, ctx: &RunContext) -> std::result::Result<String, FanOutError>
    where
        F: Fn(&BackupTarget) -> String,
    {
        let mut failures = Vec::new();
        for target in &self.targets {
            let path = key(target);
            match target.download(&path, dest, ctx) {
                Ok(()) => {
                    info!("Fetched {} from {}", label, target.description());
                    return Ok(target.description());
                }
                Err(e) => {
                    warn!("Could not fetch {} from {}: {}", label, target.description(), e);
                    failures.push((target.description(), e));
                }
            }
        }

        Err(FanOutError {
            label: label.to_string(),
            direction: Direction::Download,
            failures,
        })
    }

    // ---- backup ----

    pub fn backup(&self, action: Action, ctx: &RunContext) -> Result<()> {
        let mut units = UnitTracker::default();

        if action.backs_up_database() {
            units.record("database", self.backup_database(ctx));
        }

        if action.backs_up_repos() {
            match self.local_repos(ctx) {
                Ok(repos) => {
                    let list_file = self.repo_list_file(ctx);
                    units.record("repository list", self.backup_repo_list(&list_file, ctx));

                    let total = repos.len();
                    for (i, repo) in repos.iter().enumerate() {
                        info!("{} Backing up repository {}", progress(i + 1, total), repo);
                        units.record(repo, self.backup_repo(repo, ctx));
                    }
                }
                Err(e) => units.record("repository list", Err(e)),
            }
        }

        units.finish()
    }

    /// Dump, archive and upload the database. Local files are kept if any target fails.
    pub fn backup_database(&self, ctx: &RunContext) -> Result<()> {
        let dump = self.database.dump(&self.config.dump_path(), ctx)?;
        let archive = self.archiver.create(&dump, ctx)?;

        self.fan_out_upload("database dump", |t| t.resolve_database_path(), &archive, ctx)?;

        remove_local(&dump, ctx);
        remove_local(&archive, ctx);
        Ok(())
    }

    pub fn backup_repo(&self, repo: &str, ctx: &RunContext) -> Result<()> {
        let path = self.config.repo_path(repo);
        if !ctx.dry_run() && !path.is_dir() {
            bail!("Repository {} not found at {:?}", repo, path);
        }

        let archive = self.archiver.create(&path, ctx)?;
        self.fan_out_upload(repo, |t| t.resolve_repo_path(repo), &archive, ctx)?;

        remove_local(&archive, ctx);
        Ok(())
    }

    pub fn backup_repo_list(&self, list_file: &Path, ctx: &RunContext) -> Result<()> {
        self.fan_out_upload("repository list", |t| t.resolve_repo_list_path(), list_file, ctx)?;
        Ok(())
    }

    // ---- restore ----

    pub fn restore(&self, action: Action, ctx: &RunContext) -> Result<()> {
        let mut units = UnitTracker::default();

        if action.restores_database() {
            units.record("database", self.restore_database(ctx));
        }

        if action.restores_repos() {
            let repos = self.discover_repos(ctx)?;
            let total = repos.len();
            for (i, repo) in repos.iter().enumerate() {
                info!("{} Restoring repository {}", progress(i + 1, total), repo);
                units.record(repo, self.restore_repo(repo, ctx));
            }
        }

        units.finish()
    }

    /// Union of the repository lists held by every target
    ///
    /// An explicit override skips discovery. A target without a list is skipped;
    /// discovery fails only when no target has one.
    pub fn discover_repos(&self, ctx: &RunContext) -> Result<Vec<String>> {
        if let Some(path) = ctx.repo_list_override() {
            info!("Using repository list {:?}", path);
            return parse_repo_list(path);
        }

        if ctx.dry_run() {
            for target in &self.targets {
                info!(
                    "[DRY RUN] Would fetch repository list {} from {}",
                    target.resolve_repo_list_path(),
                    target.description()
                );
            }
            let local = &self.config.global.repo_list_file;
            return Ok(if local.is_file() { parse_repo_list(local)? } else { Vec::new() });
        }

        let mut lists = Vec::new();
        for (i, target) in self.targets.iter().enumerate() {
            let dest = self
                .config
                .global
                .work_directory
                .join(format!("gerrit-backup-repo-list-{}.txt", i));
            let fetched = target
                .download(&target.resolve_repo_list_path(), &dest, ctx)
                .map_err(anyhow::Error::from)
                .and_then(|_| parse_repo_list(&dest));
            let _ = fs::remove_file(&dest);

            match fetched {
                Ok(repos) => {
                    info!("{} lists {} repositories", target.description(), repos.len());
                    lists.push(repos);
                }
                Err(e) => warn!("Skipping repository list from {}: {:#}", target.description(), e),
            }
        }

        if lists.is_empty() {
            return Err(RepoListUnavailable.into());
        }

        let merged = merge_repo_lists(lists);
        info!("Discovered {} repositories", merged.len());
        Ok(merged)
    }

    pub fn restore_database(&self, ctx: &RunContext) -> Result<()> {
        let dump = self.config.dump_path();
        let archive = crate::utils::archive::archive_path_for(&dump)?;
        remove_local(&archive, ctx);

        self.download_first("database dump", |t| t.resolve_database_path(), &archive, ctx)?;
        self.chown(&archive, false, ctx)?;
        self.archiver.extract(&archive, ctx)?;
        self.chown(&dump, false, ctx)?;
        self.database.restore_file(&dump, ctx)?;

        remove_local(&archive, ctx);
        Ok(())
    }

    pub fn restore_repo(&self, repo: &str, ctx: &RunContext) -> Result<()> {
        check_repo_id(repo)?;
        let path = self.config.repo_path(repo);
        let archive = crate::utils::archive::archive_path_for(&path)?;

        if path.exists() || ctx.dry_run() {
            self.privileged(&["rm", "-rf", &path.to_string_lossy()], ctx)
                .with_context(|| format!("Failed to remove existing repository {:?}", path))?;
        }

        self.download_first(repo, |t| t.resolve_repo_path(repo), &archive, ctx)?;
        self.chown(&archive, false, ctx)?;
        self.archiver.extract(&archive, ctx)?;
        self.chown(&path, true, ctx)?;

        remove_local(&archive, ctx);
        Ok(())
    }

    // ---- reporting ----

    /// `du -sh` of each repository
    pub fn disk_usage(&self, repos: &[String], ctx: &RunContext) -> Result<Vec<(String, String)>> {
        let mut usage = Vec::new();
        for repo in repos {
            let path = self.config.repo_path(repo);
            let path_arg = path.to_string_lossy();

            if ctx.dry_run() {
                info!("[DRY RUN] Would run: du -sh {}", path_arg);
                continue;
            }

            let stdout = self
                .executor
                .run_command_stdout("du", &["-sh", &path_arg], None, Some(self.timeout()))
                .with_context(|| format!("du failed for {}", repo))?;
            let size = stdout.split_whitespace().next().unwrap_or("?").to_string();
            info!("{}: {}", repo, size);
            usage.push((repo.clone(), size));
        }
        Ok(usage)
    }

    /// Version history of a repository archive on each target
    pub fn report_versions(&self, repo: &str, ctx: &RunContext) -> Vec<(String, Vec<String>)> {
        let mut report = Vec::new();
        for target in &self.targets {
            let path = target.resolve_repo_path(repo);
            match target.list_versions(&path, ctx) {
                Ok(versions) => {
                    info!("{} on {}: {} version(s) {}", repo, target.description(), versions.len(), versions.join(", "));
                    report.push((target.description(), versions));
                }
                Err(e) => warn!("Could not list versions of {} on {}: {}", repo, target.description(), e),
            }
        }
        report
    }

    // ---- helpers ----

    fn privileged(&self, args: &[&str], ctx: &RunContext) -> Result<()> {
        let (program, rest) = if self.config.global.use_sudo {
            ("sudo", args)
        } else {
            (args[0], &args[1..])
        };

        if ctx.dry_run() {
            info!("[DRY RUN] Would run: {} {}", program, rest.join(" "));
            return Ok(());
        }

        self.executor
            .run_command(program, rest, None, Some(self.timeout()))
            .map(|_| ())
    }

    fn chown(&self, path: &Path, recursive: bool, ctx: &RunContext) -> Result<()> {
        let owner = format!("{}:{}", self.config.gerrit.owner_user, self.config.gerrit.owner_group);
        let path_arg = path.to_string_lossy();
        let mut args = vec!["chown"];
        if recursive {
            args.push("-R");
        }
        args.push(&owner);
        args.push(&path_arg);
        self.privileged(&args, ctx)
            .with_context(|| format!("Failed to change ownership of {:?}", path))
    }
}

fn remove_local(path: &Path, ctx: &RunContext) {
    if ctx.dry_run() || !path.exists() {
        return;
    }
    if let Err(e) = fs::remove_file(path) {
        warn!("Failed to remove {:?}: {}", path, e);
    }
}
