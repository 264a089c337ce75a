//! Tests for the 'restore' command

use super::{executor, run, run_with};
use gerrit_backup::managers::remote::{exit_code_for, exit_codes};
use std::fs;
use test_utils::{create_repo, Action, CommandName, Locality, RunContext, TestContext};

fn backed_up() -> TestContext {
    let ctx = TestContext::with_minimal_config();
    ctx.write_repo_list(&["teamA/app", "teamB/lib"]);
    let site = ctx.temp_dir().join("site");
    create_repo(&site, "teamA/app");
    create_repo(&site, "teamB/lib");
    run(&ctx.config(), Action::BackupRepos, &executor(), false).unwrap();
    ctx
}

#[test]
fn test_restore_discovers_repositories_from_targets() {
    let ctx = backed_up();
    fs::remove_dir_all(ctx.temp_dir().join("site/git")).unwrap();
    // The local list is gone too; discovery reads the stored one
    fs::remove_file(ctx.temp_dir().join("repos.txt")).unwrap();
    let executor = executor();

    run(&ctx.config(), Action::RestoreRepos, &executor, false).unwrap();

    let head = ctx.read_file("site/git/teamA/app.git/HEAD").unwrap();
    assert_eq!(head, "ref: refs/heads/master\n");
    assert!(ctx.file_exists("site/git/teamB/lib.git/config"));
    assert!(!ctx.file_exists("site/git/teamA/app.git.tar.gz"));

    let chowns: Vec<String> = executor.calls_to("chown").iter().map(|c| c.command_line()).collect();
    assert!(chowns.iter().any(|c| c.starts_with("chown -R gerrit:gerrit") && c.ends_with("teamA/app.git")));
}

#[test]
fn test_restore_replaces_existing_repository() {
    let ctx = backed_up();
    let executor = executor();

    run(&ctx.config(), Action::RestoreRepos, &executor, false).unwrap();

    let removals = executor.calls_to("rm");
    assert_eq!(removals.len(), 2);
    assert!(removals[0].has_arg("-rf"));
}

#[test]
fn test_repo_list_override_limits_restore() {
    let ctx = backed_up();
    let subset = ctx.create_file("subset.txt", "teamB/lib\n");
    fs::remove_dir_all(ctx.temp_dir().join("site/git")).unwrap();
    let executor = executor();
    let run_ctx = RunContext::new(CommandName::Restore, Locality::TargetHost, false, false, Some(subset));

    run_with(&ctx.config(), Action::RestoreRepos, &executor, run_ctx).unwrap();

    assert!(ctx.file_exists("site/git/teamB/lib.git/HEAD"));
    assert!(!ctx.file_exists("site/git/teamA/app.git"));
}

#[test]
fn test_restore_without_any_backup_is_a_transfer_failure() {
    let ctx = TestContext::with_minimal_config();

    let err = run(&ctx.config(), Action::RestoreRepos, &executor(), false).unwrap_err();

    assert_eq!(exit_code_for(&err), exit_codes::TRANSFER);
}

#[test]
fn test_database_restore_replays_dump() {
    let ctx = TestContext::with_minimal_config();
    let work = ctx.temp_dir().join("work");
    fs::write(work.join("reviewdb.sql"), "CREATE TABLE changes (id INT);\n").unwrap();
    run(&ctx.config(), Action::BackupDatabase, &executor(), false).unwrap();
    assert!(!work.join("reviewdb.sql").exists());

    let executor = executor();
    run(&ctx.config(), Action::RestoreDatabase, &executor, false).unwrap();

    assert_eq!(
        fs::read_to_string(work.join("reviewdb.sql")).unwrap(),
        "CREATE TABLE changes (id INT);\n"
    );
    let mysql = executor.calls_to("mysql");
    assert_eq!(mysql.len(), 1);
    assert!(mysql[0].command_line().contains("source "));
}
