//! Tests for the 'backup' command

use super::{executor, run};
use gerrit_backup::managers::backup::UnitsFailed;
use gerrit_backup::managers::remote::{exit_code_for, exit_codes};
use test_utils::{create_repo, Action, ConfigBuilder, MockResponse, TestContext};

fn context() -> TestContext {
    let ctx = TestContext::with_minimal_config();
    ctx.write_repo_list(&["teamA/app", "teamB/lib"]);
    // What mysqldump would have written
    ctx.create_file("work/reviewdb.sql", "CREATE TABLE changes (id INT);\n");
    let site = ctx.temp_dir().join("site");
    create_repo(&site, "teamA/app");
    create_repo(&site, "teamB/lib");
    ctx
}

#[test]
fn test_backup_uploads_every_unit() {
    let ctx = context();
    let executor = executor();

    run(&ctx.config(), Action::Backup, &executor, false).unwrap();

    let stored = ctx.temp_dir().join("backups/gerrit-test");
    assert!(stored.join("repos/teamA/app.git.tar.gz").is_file());
    assert!(stored.join("repos/teamB/lib.git.tar.gz").is_file());
    assert!(stored.join("repos_list/repos.txt").is_file());
    assert!(stored.join("database/reviewdb.sql.tar.gz").is_file());
    assert!(!ctx.file_exists("work/reviewdb.sql.tar.gz"));

    let dump = executor.calls_to("mysqldump");
    assert_eq!(dump.len(), 1);
    assert!(dump[0].has_arg("--databases"));
}

#[test]
fn test_missing_repository_fails_the_run_but_not_the_others() {
    let ctx = context();
    ctx.write_repo_list(&["teamA/app", "ghost/repo", "teamB/lib"]);
    let executor = executor();

    let err = run(&ctx.config(), Action::BackupRepos, &executor, false).unwrap_err();

    let units = err.downcast_ref::<UnitsFailed>().expect("aggregated unit failure");
    assert_eq!(units.failed, vec!["ghost/repo"]);
    let stored = ctx.temp_dir().join("backups/gerrit-test/repos");
    assert!(stored.join("teamA/app.git.tar.gz").is_file());
    assert!(stored.join("teamB/lib.git.tar.gz").is_file());
}

#[test]
fn test_dump_failure_maps_to_general_exit_code() {
    let ctx = context();
    let executor = executor().expect("mysqldump", MockResponse::fail(2, "Access denied"));

    let err = run(&ctx.config(), Action::BackupDatabase, &executor, false).unwrap_err();

    assert_eq!(exit_code_for(&err), exit_codes::GENERAL);
    assert!(!ctx.file_exists("backups/gerrit-test/database/reviewdb.sql.tar.gz"));
}

#[test]
fn test_dry_run_backup_leaves_no_trace() {
    let ctx = context();
    let executor = executor();

    run(&ctx.config(), Action::Backup, &executor, true).unwrap();

    assert!(executor.get_calls().is_empty());
    assert!(!ctx.file_exists("backups/gerrit-test"));
    assert!(!ctx.file_exists("site/git/teamA/app.git.tar.gz"));
}

#[test]
fn test_missing_repo_list_is_reported() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal());
    let err = run(&ctx.config(), Action::BackupRepos, &executor(), false).unwrap_err();
    assert!(format!("{:#}", err).contains("repos.txt"));
}
