//! Remote execution bridge
//!
//! Mirrors this binary, its configuration and the repository list to the
//! Gerrit host, then re-invokes the binary there through the hidden `worker`
//! subcommand. Every remote action is a single command:
//!
//! ```text
//! <dir>/gerrit-backup --config <dir>/<config> [--dry-run] [--verbose] \
//!     [--repo-list <path>] worker --wire-version 1 <action>
//! ```
//!
//! The worker exits with one of the codes in [`exit_codes`], which the
//! control host maps back to a typed error.

use crate::config::{Config, ConfigError};
use crate::context::{Action, RunContext};
use crate::managers::backup::RepoListUnavailable;
use crate::storage::{FanOutError, TransferError};
use crate::utils::archive::ArchiveError;
use crate::utils::format::{shell_join, shell_quote};
use crate::utils::jenkins::JobControlError;
use crate::utils::screen::ScreenSession;
use crate::utils::ssh::{RemoteOutput, RemoteTransport, TransportError};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Version of the worker command line and exit codes
pub const WIRE_VERSION: u32 = 1;

pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const ARCHIVE: i32 = 3;
    pub const TRANSFER: i32 = 4;
    pub const JOB_CONTROL: i32 = 5;
    pub const WIRE_MISMATCH: i32 = 6;
}

pub fn describe_exit_code(code: i32) -> &'static str {
    match code {
        exit_codes::SUCCESS => "success",
        exit_codes::CONFIG => "configuration error",
        exit_codes::ARCHIVE => "archive failure",
        exit_codes::TRANSFER => "transfer failure",
        exit_codes::JOB_CONTROL => "job-control failure",
        exit_codes::WIRE_MISMATCH => "wire-version mismatch",
        _ => "failure",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Unsupported worker wire version {got} (this build speaks {expected})")]
    WireMismatch { got: u32, expected: u32 },

    #[error("Remote worker on {host} exited with code {code}: {stderr}")]
    WorkerFailed { host: String, code: i32, stderr: String },

    #[error("No remote host configured for {0}")]
    NoHost(Action),

    #[error("Provisioning command failed on {host} with code {code}: {stderr}")]
    ProvisionFailed { host: String, code: i32, stderr: String },
}

/// Exit code for an error, from the first recognized cause in its chain
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.is::<ConfigError>() {
            return exit_codes::CONFIG;
        }
        if cause.is::<ArchiveError>() {
            return exit_codes::ARCHIVE;
        }
        if cause.is::<TransferError>() || cause.is::<FanOutError>() || cause.is::<RepoListUnavailable>() {
            return exit_codes::TRANSFER;
        }
        if cause.is::<JobControlError>() {
            return exit_codes::JOB_CONTROL;
        }
        if let Some(remote) = cause.downcast_ref::<RemoteError>() {
            match remote {
                RemoteError::WireMismatch { .. } => return exit_codes::WIRE_MISMATCH,
                RemoteError::WorkerFailed { code, .. } => return *code,
                _ => {}
            }
        }
        if let Some(TransportError::Copy { .. }) = cause.downcast_ref::<TransportError>() {
            return exit_codes::TRANSFER;
        }
    }
    exit_codes::GENERAL
}

/// Reject a worker invocation from a different build
pub fn check_wire_version(got: u32) -> std::result::Result<(), RemoteError> {
    if got != WIRE_VERSION {
        return Err(RemoteError::WireMismatch {
            got,
            expected: WIRE_VERSION,
        });
    }
    Ok(())
}

/// Files copied to the remote directory before the first remote action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPlan {
    pub remote_dir: String,
    pub binary: PathBuf,
    pub config: PathBuf,
    pub repo_list: Option<PathBuf>,
}

impl MirrorPlan {
    fn remote_path(&self, local: &Path) -> String {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        format!("{}/{}", self.remote_dir.trim_end_matches('/'), name)
    }

    pub fn remote_binary(&self) -> String {
        self.remote_path(&self.binary)
    }

    pub fn remote_config(&self) -> String {
        self.remote_path(&self.config)
    }

    pub fn remote_repo_list(&self) -> Option<String> {
        self.repo_list.as_deref().map(|p| self.remote_path(p))
    }

    /// (local, remote) pairs in copy order
    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        let mut files = vec![
            (self.binary.clone(), self.remote_binary()),
            (self.config.clone(), self.remote_config()),
        ];
        if let Some(ref list) = self.repo_list {
            files.push((list.clone(), self.remote_path(list)));
        }
        files
    }
}

/// One open transport plus the once-per-invocation mirror and provisioning flags
pub struct RemoteSession {
    transport: Box<dyn RemoteTransport>,
    open: bool,
    mirrored: bool,
    provisioned: bool,
}

impl RemoteSession {
    pub fn new(transport: Box<dyn RemoteTransport>) -> Self {
        Self {
            transport,
            open: false,
            mirrored: false,
            provisioned: false,
        }
    }

    pub fn host(&self) -> &str {
        self.transport.host()
    }

    pub fn open(&mut self) -> Result<()> {
        if !self.open {
            info!("Opening SSH session to {}", self.host());
            self.transport.connect()?;
            self.open = true;
        }
        Ok(())
    }

    fn exec_checked(&mut self, command: &str) -> Result<RemoteOutput> {
        let output = self.transport.exec(command)?;
        if !output.success() {
            anyhow::bail!(
                "Remote command failed on {} with code {}: {}",
                self.host(),
                output.exit_code,
                output.stderr.trim()
            );
        }
        Ok(output)
    }

    /// Copy the plan's files. Happens at most once per session.
    pub fn ensure_mirrored(&mut self, plan: &MirrorPlan) -> Result<()> {
        if self.mirrored {
            debug!("Remote directory already mirrored");
            return Ok(());
        }

        info!("Mirroring gerrit-backup to {}:{}", self.host(), plan.remote_dir);
        self.exec_checked(&format!("mkdir -p {}", shell_quote(&plan.remote_dir)))?;
        for (local, remote) in plan.uploads() {
            self.transport.copy_file(&local, &remote)?;
        }
        self.exec_checked(&format!("chmod +x {}", shell_quote(&plan.remote_binary())))?;

        self.mirrored = true;
        Ok(())
    }

    /// Run the provisioning command once, before the first worker invocation
    pub fn ensure_provisioned(&mut self, command: Option<&str>) -> Result<()> {
        if self.provisioned {
            return Ok(());
        }
        if let Some(command) = command {
            info!("Provisioning {}", self.host());
            let output = self.transport.exec(command)?;
            if !output.success() {
                return Err(RemoteError::ProvisionFailed {
                    host: self.host().to_string(),
                    code: output.exit_code,
                    stderr: output.stderr.trim().to_string(),
                }
                .into());
            }
        }
        self.provisioned = true;
        Ok(())
    }

    /// Run a worker command and map a non-zero exit to [`RemoteError::WorkerFailed`]
    pub fn run_worker(&mut self, command: &str) -> Result<RemoteOutput> {
        info!("Running on {}: {}", self.host(), command);
        let output = self.transport.exec_unbounded(command)?;
        for line in output.stdout.lines() {
            info!("[{}] {}", self.host(), line);
        }
        if !output.success() {
            warn!(
                "Worker on {} reported {}",
                self.host(),
                describe_exit_code(output.exit_code)
            );
            return Err(RemoteError::WorkerFailed {
                host: self.host().to_string(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(output)
    }

    pub fn transport_mut(&mut self) -> &mut dyn RemoteTransport {
        self.transport.as_mut()
    }

    /// Close the session if it is open. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        info!("Closing SSH session to {}", self.host());
        self.transport.close()?;
        Ok(())
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close SSH session: {:#}", e);
        }
    }
}

pub struct RemoteBridge {
    config: Config,
    config_path: PathBuf,
    binary: PathBuf,
    use_screen: bool,
}

impl RemoteBridge {
    pub fn new(config: Config, config_path: PathBuf, binary: PathBuf) -> Self {
        Self {
            config,
            config_path,
            binary,
            use_screen: false,
        }
    }

    /// Run workers inside detached `screen` sessions
    pub fn with_screen(mut self, use_screen: bool) -> Self {
        self.use_screen = use_screen;
        self
    }

    pub fn mirror_plan(&self, ctx: &RunContext) -> MirrorPlan {
        let list = ctx
            .repo_list_override()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.global.repo_list_file.clone());

        let repo_list = if list.is_file() {
            Some(list)
        } else {
            debug!("Repository list {:?} not found locally, not mirrored", list);
            None
        };

        MirrorPlan {
            remote_dir: self.config.remote.remote_directory.clone(),
            binary: self.binary.clone(),
            config: self.config_path.clone(),
            repo_list,
        }
    }

    /// Worker command line for `action`
    ///
    /// Restores only pass `--repo-list` for an explicit override so the worker
    /// discovers repositories from the targets otherwise.
    pub fn worker_command(&self, plan: &MirrorPlan, action: Action, ctx: &RunContext) -> String {
        let mut args: Vec<String> = Vec::new();
        if self.config.remote.use_sudo {
            args.push("sudo".to_string());
        }
        args.push(plan.remote_binary());
        args.push("--config".to_string());
        args.push(plan.remote_config());
        if ctx.dry_run() {
            args.push("--dry-run".to_string());
        }
        if ctx.verbose() {
            args.push("--verbose".to_string());
        }

        let pass_list = if action.is_restore() {
            ctx.repo_list_override().is_some()
        } else {
            action.visits_repos()
        };
        if pass_list {
            if let Some(list) = plan.remote_repo_list() {
                args.push("--repo-list".to_string());
                args.push(list);
            }
        }

        args.push("worker".to_string());
        args.push("--wire-version".to_string());
        args.push(WIRE_VERSION.to_string());
        args.push(action.as_arg().to_string());

        shell_join(&args)
    }

    /// Run `actions` on the remote host over `transport`
    ///
    /// The session is opened once and closed exactly once, even on failure.
    /// In dry-run mode the worker commands are only logged.
    pub fn run(&self, actions: &[Action], transport: Box<dyn RemoteTransport>, ctx: &RunContext) -> Result<()> {
        let plan = self.mirror_plan(ctx);

        if ctx.dry_run() {
            for action in actions {
                info!(
                    "[DRY RUN] Would run on {}: {}",
                    transport.host(),
                    self.worker_command(&plan, *action, ctx)
                );
            }
            return Ok(());
        }

        let mut session = RemoteSession::new(transport);
        let result = self.run_in_session(&mut session, &plan, actions, ctx);
        let closed = session.close();

        result?;
        closed.context("Failed to close SSH session")
    }

    fn run_in_session(
        &self,
        session: &mut RemoteSession,
        plan: &MirrorPlan,
        actions: &[Action],
        ctx: &RunContext,
    ) -> Result<()> {
        session.open()?;
        session.ensure_mirrored(plan)?;
        session.ensure_provisioned(self.config.remote.provision_command.as_deref())?;

        for action in actions {
            let command = self.worker_command(plan, *action, ctx);
            if self.use_screen {
                let mut screen = ScreenSession::new(&format!("gerrit-backup-{}", action.as_arg()));
                let id = screen.run_detached(session.transport_mut(), &command)?;
                info!("{} running detached in screen session {} on {}", action, id, session.host());
            } else {
                session
                    .run_worker(&command)
                    .with_context(|| format!("Remote {} failed", action))?;
            }
        }

        Ok(())
    }
}
