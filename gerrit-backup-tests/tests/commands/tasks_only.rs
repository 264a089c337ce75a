//! Tests for the 'pre-tasks-only' and 'post-tasks-only' commands

use super::run;
use test_utils::{Action, ConfigBuilder, MockExecutor, TestContext};

fn context() -> TestContext {
    TestContext::from_builder(
        ConfigBuilder::minimal()
            .add_shell_pre_task("backup-only", "echo pre-backup", &["backup"])
            .add_shell_pre_task("restore-only", "echo pre-restore", &["restore"])
            .add_shell_post_task("any", "echo post", &[]),
    )
}

fn lines(executor: &MockExecutor) -> Vec<String> {
    executor.get_calls().iter().map(|c| c.command_line()).collect()
}

#[test]
fn test_pre_tasks_only_ignores_command_filter() {
    let ctx = context();
    let executor = MockExecutor::new();

    run(&ctx.config(), Action::PreTasksOnly, &executor, false).unwrap();

    assert_eq!(lines(&executor), vec!["sh -c echo pre-backup", "sh -c echo pre-restore"]);
}

#[test]
fn test_post_tasks_only_runs_post_phase() {
    let ctx = context();
    let executor = MockExecutor::new();

    run(&ctx.config(), Action::PostTasksOnly, &executor, false).unwrap();

    assert_eq!(lines(&executor), vec!["sh -c echo post"]);
}

#[test]
fn test_tasks_only_dry_run() {
    let ctx = context();
    let executor = MockExecutor::new();

    run(&ctx.config(), Action::PreTasksOnly, &executor, true).unwrap();

    assert!(executor.get_calls().is_empty());
}
