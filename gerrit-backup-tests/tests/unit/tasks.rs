//! Task rule selection and phase execution

use gerrit_backup::config::{TaskAction, TaskRule};
use gerrit_backup::managers::tasks::{should_run, TaskError, TaskScheduler};
use rstest::rstest;
use std::sync::Arc;
use test_utils::{
    db_command_task, stop_job_task, CommandName, ConfigBuilder, Locality, MockExecutor, MockJobController,
    MockResponse, RunContext,
};

fn rule(run_for: &[CommandName], run_remotely: bool) -> TaskRule {
    TaskRule {
        name: "rule".to_string(),
        action: TaskAction::ShellCommand {
            command: "true".to_string(),
            working_dir: None,
        },
        run_for_commands: run_for.to_vec(),
        run_remotely,
        sleep_seconds: None,
        on_failure: None,
    }
}

fn context(command: CommandName, locality: Locality, dry_run: bool) -> RunContext {
    RunContext::new(command, locality, dry_run, false, None)
}

#[rstest]
#[case(&[CommandName::Backup], CommandName::Backup, true)]
#[case(&[CommandName::Backup], CommandName::Restore, false)]
#[case(&[CommandName::Backup, CommandName::Restore], CommandName::Restore, true)]
#[case(&[], CommandName::DiskUsage, true)]
#[case(&[CommandName::Restore], CommandName::GetVersions, false)]
#[case(&[CommandName::Restore], CommandName::PreTasksOnly, true)]
#[case(&[CommandName::Backup], CommandName::PostTasksOnly, true)]
fn test_command_predicate(#[case] run_for: &[CommandName], #[case] command: CommandName, #[case] fires: bool) {
    let rule = rule(run_for, true);
    assert_eq!(should_run(&rule, &context(command, Locality::TargetHost, false)), fires);
}

#[rstest]
#[case(true, Locality::TargetHost, true)]
#[case(true, Locality::ControlHost, false)]
#[case(false, Locality::ControlHost, true)]
#[case(false, Locality::TargetHost, false)]
fn test_locality_predicate(#[case] run_remotely: bool, #[case] locality: Locality, #[case] fires: bool) {
    let rule = rule(&[], run_remotely);
    assert_eq!(should_run(&rule, &context(CommandName::Backup, locality, false)), fires);
}

fn scheduler(builder: ConfigBuilder, executor: &MockExecutor, jobs: &MockJobController) -> TaskScheduler {
    TaskScheduler::new(builder.build(), Arc::new(executor.clone()), Arc::new(jobs.clone()))
}

#[test]
fn test_rules_run_in_declaration_order() {
    let executor = MockExecutor::new();
    let jobs = MockJobController::new();
    let builder = ConfigBuilder::minimal()
        .add_shell_pre_task("one", "echo one", &[])
        .add_shell_pre_task("restore-only", "echo skipped", &["restore"])
        .add_shell_pre_task("two", "echo two", &["backup"]);

    let report = scheduler(builder, &executor, &jobs)
        .run_pre_tasks(&context(CommandName::Backup, Locality::TargetHost, false))
        .unwrap();

    assert_eq!(report.ran, vec!["one", "two"]);
    assert_eq!(report.skipped, vec!["restore-only"]);
    let lines: Vec<String> = executor.get_calls().iter().map(|c| c.command_line()).collect();
    assert_eq!(lines, vec!["sh -c echo one", "sh -c echo two"]);
}

#[test]
fn test_continue_policy_records_failure() {
    let executor = MockExecutor::new().expect_with("sh", "broken", MockResponse::fail(3, "boom"));
    let jobs = MockJobController::new();
    let builder = ConfigBuilder::minimal()
        .add_shell_post_task("broken", "broken-command", &[])
        .add_shell_post_task("after", "echo after", &[]);

    let report = scheduler(builder, &executor, &jobs)
        .run_post_tasks(&context(CommandName::Restore, Locality::TargetHost, false))
        .unwrap();

    assert!(!report.is_clean());
    assert_eq!(report.failed[0].0, "broken");
    assert_eq!(report.ran, vec!["after"]);
}

#[test]
fn test_abort_policy_stops_the_phase() {
    let executor = MockExecutor::new().expect("mysql", MockResponse::fail(1, "access denied"));
    let jobs = MockJobController::new();
    let builder = ConfigBuilder::minimal()
        .add_pre_task("flush", db_command_task())
        .add_shell_pre_task("never", "echo never", &[]);

    let err = scheduler(builder, &executor, &jobs)
        .run_pre_tasks(&context(CommandName::Backup, Locality::TargetHost, false))
        .unwrap_err();

    let TaskError::Aborted { name, .. } = err;
    assert_eq!(name, "flush");
    assert!(!executor.was_called("sh"));
}

#[test]
fn test_abort_names_cause_once() {
    let executor = MockExecutor::new().expect("mysql", MockResponse::fail(1, "access denied"));
    let jobs = MockJobController::new();
    let builder = ConfigBuilder::minimal().add_pre_task("flush", db_command_task());

    let err = scheduler(builder, &executor, &jobs)
        .run_pre_tasks(&context(CommandName::Backup, Locality::TargetHost, false))
        .unwrap_err();

    let rendered = format!("{:#}", anyhow::Error::from(err));
    assert!(rendered.starts_with("pre-task 'flush' failed: "));
    assert_eq!(rendered.matches("access denied").count(), 1);
}

#[test]
fn test_db_command_runs_through_mysql() {
    let executor = MockExecutor::new();
    let jobs = MockJobController::new();
    let builder = ConfigBuilder::minimal().add_pre_task("flush", db_command_task());

    scheduler(builder, &executor, &jobs)
        .run_pre_tasks(&context(CommandName::Backup, Locality::TargetHost, false))
        .unwrap();

    let call = &executor.calls_to("mysql")[0];
    assert!(call.has_arg("--password=secret"));
    assert!(call.args.iter().any(|a| a.contains("FLUSH TABLES")));
}

#[test]
fn test_job_rule_runs_on_control_host() {
    let executor = MockExecutor::new();
    let jobs = MockJobController::new();
    let builder = ConfigBuilder::minimal().add_pre_task("stop-ci", stop_job_task());
    let scheduler = scheduler(builder, &executor, &jobs);

    let on_target = scheduler
        .run_pre_tasks(&context(CommandName::Backup, Locality::TargetHost, false))
        .unwrap();
    assert_eq!(on_target.skipped, vec!["stop-ci"]);
    assert!(jobs.get_calls().is_empty());

    scheduler
        .run_pre_tasks(&context(CommandName::Backup, Locality::ControlHost, false))
        .unwrap();
    assert_eq!(jobs.operations()[0], "disable gerrit-replication");
    assert_eq!(jobs.get_calls()[0].base_url, "https://ci.example.com");
}

#[test]
fn test_dry_run_has_no_side_effects() {
    let executor = MockExecutor::new();
    let jobs = MockJobController::new();
    let builder = ConfigBuilder::minimal()
        .add_shell_pre_task("shell", "rm -rf /srv/gerrit", &[])
        .add_pre_task("flush", db_command_task())
        .add_pre_task("stop-ci", &stop_job_task().replace("run_remotely = false", "run_remotely = true"));

    let report = scheduler(builder, &executor, &jobs)
        .run_pre_tasks(&context(CommandName::Backup, Locality::TargetHost, true))
        .unwrap();

    assert_eq!(report.ran.len(), 3);
    assert!(executor.get_calls().is_empty());
    assert!(jobs.get_calls().is_empty());
}
