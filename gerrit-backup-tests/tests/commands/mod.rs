//! Command tests for gerrit-backup
//!
//! These drive whole commands in-process against a folder backend, with
//! `tar` passed through to the real tool and everything else mocked.

mod backup;
mod restore;
mod tasks_only;

use gerrit_backup::managers::workflow::{run_local, Collaborators};
use gerrit_backup::storage::build_targets;
use std::sync::Arc;
use test_utils::{Action, CommandName, Config, Locality, MockExecutor, MockJobController, RunContext};

/// Executor running `tar` for real and recording everything else
pub fn executor() -> MockExecutor {
    MockExecutor::new().passthrough("tar")
}

pub fn run(config: &Config, action: Action, executor: &MockExecutor, dry_run: bool) -> anyhow::Result<()> {
    run_with(config, action, executor, RunContext::new(command_for(action), Locality::TargetHost, dry_run, false, None))
}

pub fn run_with(config: &Config, action: Action, executor: &MockExecutor, ctx: RunContext) -> anyhow::Result<()> {
    let deps = Collaborators {
        executor: Arc::new(executor.clone()),
        jobs: Arc::new(MockJobController::new()),
    };
    let targets = build_targets(config)?;
    run_local(config, action, targets, &deps, &ctx)
}

fn command_for(action: Action) -> CommandName {
    action.command_name()
}
