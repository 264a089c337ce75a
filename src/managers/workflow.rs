//! Top-level run sequencing: pre-tasks, the action, post-tasks
//!
//! Post-tasks always run, even when a pre-task aborted or the action failed.

use crate::config::Config;
use crate::context::{Action, RunContext};
use crate::managers::backup::BackupManager;
use crate::managers::remote::{RemoteBridge, RemoteError};
use crate::managers::tasks::TaskScheduler;
use crate::storage::BackupTarget;
use crate::utils::executor::CommandExecutor;
use crate::utils::jenkins::{JenkinsClient, JobController};
use crate::utils::ssh::{OpenSshTransport, RemoteTransport};
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// External collaborators shared by the scheduler and the orchestrator
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn CommandExecutor>,
    pub jobs: Arc<dyn JobController>,
}

impl Collaborators {
    pub fn real(config: &Config, executor: Arc<dyn CommandExecutor>) -> Result<Self> {
        let (username, api_token) = config
            .jenkins
            .as_ref()
            .map(|j| (j.username.clone(), j.api_token.clone()))
            .unwrap_or((None, None));
        Ok(Self {
            executor,
            jobs: Arc::new(JenkinsClient::new(username, api_token)?),
        })
    }
}

/// Run pre-tasks, then `body` unless a pre-task aborted, then post-tasks
///
/// The first error wins; a post-task error after a failed body is only logged.
pub fn with_tasks<F>(scheduler: &TaskScheduler, ctx: &RunContext, body: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let main = match scheduler.run_pre_tasks(ctx) {
        Ok(_) => body(),
        Err(e) => Err(e.into()),
    };

    let post = scheduler.run_post_tasks(ctx);

    match (main, post) {
        (Ok(()), Ok(_)) => Ok(()),
        (Ok(()), Err(post_err)) => Err(post_err.into()),
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(post_err)) => {
            error!("Post-tasks also failed: {}", post_err);
            Err(e)
        }
    }
}

/// Run `action` on this host
pub fn run_local(
    config: &Config,
    action: Action,
    targets: Vec<BackupTarget>,
    deps: &Collaborators,
    ctx: &RunContext,
) -> Result<()> {
    let scheduler = TaskScheduler::new(config.clone(), deps.executor.clone(), deps.jobs.clone());

    match action {
        Action::PreTasksOnly => {
            scheduler.run_pre_tasks(ctx)?;
            Ok(())
        }
        Action::PostTasksOnly => {
            scheduler.run_post_tasks(ctx)?;
            Ok(())
        }
        _ => {
            let manager = BackupManager::new(config.clone(), targets, deps.executor.clone())?;
            with_tasks(&scheduler, ctx, || manager.execute(action, ctx))
        }
    }
}

/// SSH transport for the host configured for `action`
pub fn open_transport(
    config: &Config,
    action: Action,
    executor: Arc<dyn CommandExecutor>,
) -> Result<Box<dyn RemoteTransport>> {
    let host = config
        .remote_host(action)
        .ok_or(RemoteError::NoHost(action))?;
    let timeout = Duration::from_secs(config.global.default_timeout_seconds);
    Ok(Box::new(
        OpenSshTransport::new(executor, host.clone()).with_command_timeout(timeout),
    ))
}

/// Drive `actions` on the remote host; control-host rules fire around them
pub fn run_remote(
    config: &Config,
    actions: &[Action],
    bridge: &RemoteBridge,
    transport: Box<dyn RemoteTransport>,
    deps: &Collaborators,
    ctx: &RunContext,
) -> Result<()> {
    let Some(first) = actions.first() else {
        bail!("No remote action given");
    };
    if actions.iter().any(|a| a.command_name() != first.command_name()) {
        bail!("Remote actions must all belong to the same command");
    }

    let scheduler = TaskScheduler::new(config.clone(), deps.executor.clone(), deps.jobs.clone());

    match first {
        Action::PreTasksOnly => {
            scheduler.run_pre_tasks(ctx)?;
            bridge.run(actions, transport, ctx)
        }
        Action::PostTasksOnly => {
            bridge.run(actions, transport, ctx)?;
            scheduler.run_post_tasks(ctx)?;
            Ok(())
        }
        _ => with_tasks(&scheduler, ctx, || bridge.run(actions, transport, ctx)),
    }
}
