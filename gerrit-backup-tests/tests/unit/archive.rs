//! Archive service: tar invocation, round trip and dry-run

use gerrit_backup::utils::archive::{archive_path_for, ArchiveError, Archiver};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{create_sample_tree, target_context, CommandName, MockExecutor, MockResponse, TestContext};

fn archiver(executor: &MockExecutor) -> Archiver {
    Archiver::new(Arc::new(executor.clone()), Duration::from_secs(60))
}

#[test]
fn test_round_trip_restores_identical_tree() {
    let ctx = TestContext::new();
    let tree = create_sample_tree(ctx.temp_dir());
    let executor = MockExecutor::new().passthrough("tar");
    let archiver = archiver(&executor);
    let run = target_context(CommandName::Backup, false);

    let archive = archiver.create(&tree, &run).unwrap();
    assert_eq!(archive, ctx.temp_dir().join("tree.tar.gz"));
    assert!(archive.is_file());

    fs::remove_dir_all(&tree).unwrap();
    let dir = archiver.extract(&archive, &run).unwrap();

    assert_eq!(dir, ctx.temp_dir());
    assert_eq!(fs::read_to_string(tree.join("top.txt")).unwrap(), "top level\n");
    assert_eq!(fs::read_to_string(tree.join("nested/middle.txt")).unwrap(), "middle\n");
    assert_eq!(fs::read(tree.join("nested/deeper/bottom.bin")).unwrap(), vec![0u8, 1, 2, 3, 255]);
}

#[test]
fn test_create_runs_tar_in_parent_directory() {
    let ctx = TestContext::new();
    let executor = MockExecutor::new();
    let path = ctx.temp_dir().join("app.git");

    archiver(&executor).create(&path, &target_context(CommandName::Backup, false)).unwrap();

    let calls = executor.calls_to("tar");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args, vec!["-czf", "app.git.tar.gz", "app.git"]);
    let expected_dir = ctx.temp_dir().display().to_string();
    assert_eq!(calls[0].working_dir.as_deref(), Some(expected_dir.as_str()));
}

#[test]
fn test_tar_failure_is_an_archive_error() {
    let ctx = TestContext::new();
    let executor = MockExecutor::new().expect("tar", MockResponse::fail(2, "Cannot stat"));

    let err = archiver(&executor)
        .create(&ctx.temp_dir().join("missing"), &target_context(CommandName::Backup, false))
        .unwrap_err();

    match err {
        ArchiveError::Failed { exit_code, stderr, .. } => {
            assert_eq!(exit_code, Some(2));
            assert!(stderr.contains("Cannot stat"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_dry_run_returns_same_path_without_running_tar() {
    let ctx = TestContext::new();
    let executor = MockExecutor::new();
    let path = ctx.temp_dir().join("teamA/app.git");

    let archive = archiver(&executor)
        .create(&path, &target_context(CommandName::Backup, true))
        .unwrap();

    assert_eq!(archive, archive_path_for(&path).unwrap());
    assert!(executor.get_calls().is_empty());
}
