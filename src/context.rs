//! Invocation-wide run context
//!
//! A [`RunContext`] is built once from the command line and handed by
//! reference to every component. Nothing mutates it after construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Command names that task rules can be gated on (`run_for_commands`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandName {
    Backup,
    Restore,
    DiskUsage,
    GetVersions,
    GetRepoList,
    PreTasksOnly,
    PostTasksOnly,
}

impl CommandName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::Backup => "backup",
            CommandName::Restore => "restore",
            CommandName::DiskUsage => "disk-usage",
            CommandName::GetVersions => "get-versions",
            CommandName::GetRepoList => "get-repo-list",
            CommandName::PreTasksOnly => "pre-tasks-only",
            CommandName::PostTasksOnly => "post-tasks-only",
        }
    }

    /// The tasks-only pseudo-commands run every rule regardless of `run_for_commands`
    pub fn is_tasks_only(&self) -> bool {
        matches!(self, CommandName::PreTasksOnly | CommandName::PostTasksOnly)
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single invocation does, on whichever host it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Action {
    Backup,
    BackupDatabase,
    BackupRepos,
    Restore,
    RestoreDatabase,
    RestoreRepos,
    DiskUsage,
    GetVersions,
    PreTasksOnly,
    PostTasksOnly,
}

impl Action {
    pub fn command_name(&self) -> CommandName {
        match self {
            Action::Backup | Action::BackupDatabase | Action::BackupRepos => CommandName::Backup,
            Action::Restore | Action::RestoreDatabase | Action::RestoreRepos => {
                CommandName::Restore
            }
            Action::DiskUsage => CommandName::DiskUsage,
            Action::GetVersions => CommandName::GetVersions,
            Action::PreTasksOnly => CommandName::PreTasksOnly,
            Action::PostTasksOnly => CommandName::PostTasksOnly,
        }
    }

    /// Argument spelling used on the worker command line
    pub fn as_arg(&self) -> &'static str {
        match self {
            Action::Backup => "backup",
            Action::BackupDatabase => "backup-database",
            Action::BackupRepos => "backup-repos",
            Action::Restore => "restore",
            Action::RestoreDatabase => "restore-database",
            Action::RestoreRepos => "restore-repos",
            Action::DiskUsage => "disk-usage",
            Action::GetVersions => "get-versions",
            Action::PreTasksOnly => "pre-tasks-only",
            Action::PostTasksOnly => "post-tasks-only",
        }
    }

    pub fn backs_up_database(&self) -> bool {
        matches!(self, Action::Backup | Action::BackupDatabase)
    }

    pub fn backs_up_repos(&self) -> bool {
        matches!(self, Action::Backup | Action::BackupRepos)
    }

    pub fn restores_database(&self) -> bool {
        matches!(self, Action::Restore | Action::RestoreDatabase)
    }

    pub fn restores_repos(&self) -> bool {
        matches!(self, Action::Restore | Action::RestoreRepos)
    }

    pub fn is_restore(&self) -> bool {
        self.command_name() == CommandName::Restore
    }

    /// Whether the action walks the repository list
    pub fn visits_repos(&self) -> bool {
        self.backs_up_repos()
            || self.restores_repos()
            || matches!(self, Action::DiskUsage | Action::GetVersions)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// Which side of a remote run the current process is on.
///
/// `ControlHost` drives a remote run and fires rules with `run_remotely = false`.
/// `TargetHost` is the Gerrit server itself (run directly or through the worker)
/// and fires rules with `run_remotely = true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    ControlHost,
    TargetHost,
}

impl Locality {
    pub fn runs_remotely(self) -> bool {
        matches!(self, Locality::TargetHost)
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locality::ControlHost => f.write_str("control host"),
            Locality::TargetHost => f.write_str("target host"),
        }
    }
}

/// Immutable snapshot of invocation-wide flags and mode
#[derive(Debug, Clone)]
pub struct RunContext {
    dry_run: bool,
    verbose: bool,
    command: CommandName,
    locality: Locality,
    repo_list_override: Option<PathBuf>,
}

impl RunContext {
    pub fn new(
        command: CommandName,
        locality: Locality,
        dry_run: bool,
        verbose: bool,
        repo_list_override: Option<PathBuf>,
    ) -> Self {
        Self {
            dry_run,
            verbose,
            command,
            locality,
            repo_list_override,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn command(&self) -> CommandName {
        self.command
    }

    pub fn locality(&self) -> Locality {
        self.locality
    }

    /// Repository list given explicitly on the command line
    pub fn repo_list_override(&self) -> Option<&Path> {
        self.repo_list_override.as_deref()
    }
}
