//! Remote runs driven from the control host

use gerrit_backup::config::ConfigError;
use gerrit_backup::managers::remote::{describe_exit_code, exit_code_for, exit_codes, RemoteBridge};
use gerrit_backup::managers::workflow::{run_remote, Collaborators};
use gerrit_backup::storage::TransferError;
use gerrit_backup::utils::jenkins::JobControlError;
use gerrit_backup::utils::ssh::RemoteOutput;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{
    stop_job_task, Action, CommandName, ConfigBuilder, Locality, MockExecutor, MockJobController, MockTransport,
    RunContext, TestContext, TransportEvent,
};

fn control(command: CommandName, dry_run: bool) -> RunContext {
    RunContext::new(command, Locality::ControlHost, dry_run, false, None)
}

fn bridge(ctx: &TestContext) -> RemoteBridge {
    RemoteBridge::new(
        ctx.config(),
        ctx.config_path().to_path_buf(),
        PathBuf::from("/usr/local/bin/gerrit-backup"),
    )
}

#[test]
fn test_control_host_job_rules_wrap_remote_worker() {
    let ctx = TestContext::from_builder(
        ConfigBuilder::minimal()
            .with_remote_host("gerrit.example.com")
            .add_pre_task("stop-ci", stop_job_task())
            .add_post_task(
                "start-ci",
                "kind = \"start_job\"\njob = \"gerrit-replication\"\njenkins_url = \"https://ci.example.com\"",
            ),
    );
    ctx.write_repo_list(&["teamA/app"]);
    let executor = MockExecutor::new();
    let jobs = MockJobController::new();
    let deps = Collaborators {
        executor: Arc::new(executor.clone()),
        jobs: Arc::new(jobs.clone()),
    };
    let transport = MockTransport::new();

    run_remote(
        &ctx.config(),
        &[Action::Backup],
        &bridge(&ctx),
        Box::new(transport.clone()),
        &deps,
        &control(CommandName::Backup, false),
    )
    .unwrap();

    let ops = jobs.operations();
    assert_eq!(ops.first().map(String::as_str), Some("disable gerrit-replication"));
    assert_eq!(ops.last().map(String::as_str), Some("enable gerrit-replication"));

    // binary, config and the repository list
    let copies = transport
        .get_events()
        .into_iter()
        .filter(|e| matches!(e, TransportEvent::Copy { .. }))
        .count();
    assert_eq!(copies, 3);
    assert!(transport
        .commands()
        .iter()
        .any(|c| c.contains("--repo-list gerrit-backup/repos.txt worker --wire-version 1 backup")));
    assert!(executor.get_calls().is_empty());
}

#[test]
fn test_remote_failure_still_runs_post_tasks() {
    let ctx = TestContext::from_builder(
        ConfigBuilder::minimal()
            .with_remote_host("gerrit.example.com")
            .add_post_task("notify", "kind = \"shell_command\"\ncommand = \"echo finished\""),
    );
    let executor = MockExecutor::new();
    let deps = Collaborators {
        executor: Arc::new(executor.clone()),
        jobs: Arc::new(MockJobController::new()),
    };
    let transport = MockTransport::new().respond(
        " worker ",
        RemoteOutput {
            stdout: String::new(),
            stderr: "nothing uploaded".to_string(),
            exit_code: exit_codes::TRANSFER,
        },
    );

    let err = run_remote(
        &ctx.config(),
        &[Action::Restore],
        &bridge(&ctx),
        Box::new(transport.clone()),
        &deps,
        &control(CommandName::Restore, false),
    )
    .unwrap_err();

    assert_eq!(exit_code_for(&err), exit_codes::TRANSFER);
    assert_eq!(transport.count(&TransportEvent::Close), 1);
    let lines: Vec<String> = executor.get_calls().iter().map(|c| c.command_line()).collect();
    assert_eq!(lines, vec!["sh -c echo finished"]);
}

#[test]
fn test_dry_run_remote_has_no_side_effects() {
    let ctx = TestContext::from_builder(
        ConfigBuilder::minimal()
            .with_remote_host("gerrit.example.com")
            .add_shell_pre_task("local", "echo local", &[])
            .add_pre_task("stop-ci", stop_job_task()),
    );
    let executor = MockExecutor::new();
    let jobs = MockJobController::new();
    let deps = Collaborators {
        executor: Arc::new(executor.clone()),
        jobs: Arc::new(jobs.clone()),
    };
    let transport = MockTransport::new();

    run_remote(
        &ctx.config(),
        &[Action::DiskUsage],
        &bridge(&ctx),
        Box::new(transport.clone()),
        &deps,
        &control(CommandName::DiskUsage, true),
    )
    .unwrap();

    assert!(transport.get_events().is_empty());
    assert!(executor.get_calls().is_empty());
    assert!(jobs.get_calls().is_empty());
}

#[test]
fn test_exit_codes_follow_error_kind() {
    let config: anyhow::Error = ConfigError::NoBackends.into();
    assert_eq!(exit_code_for(&config), exit_codes::CONFIG);

    let transfer: anyhow::Error = TransferError::NotFound {
        target: "Folder Backup (/mnt)".to_string(),
        key: "gerrit/database/reviewdb.sql.tar.gz".to_string(),
    }
    .into();
    assert_eq!(exit_code_for(&transfer.context("Restore failed")), exit_codes::TRANSFER);

    let jobs: anyhow::Error = JobControlError::Timeout {
        job: "verify".to_string(),
        waited: Duration::from_secs(5),
    }
    .into();
    assert_eq!(exit_code_for(&jobs), exit_codes::JOB_CONTROL);

    assert_eq!(describe_exit_code(exit_codes::TRANSFER), "transfer failure");
}
