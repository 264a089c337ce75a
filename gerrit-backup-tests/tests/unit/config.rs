//! Configuration loading through the public API

use gerrit_backup::config::{load_config, parse_config, ConfigError, OnFailure, TaskAction};
use gerrit_backup::context::Action;
use test_utils::{db_command_task, stop_job_task, stop_services_task, ConfigBuilder, ResultAssertions, TestContext};

#[test]
fn test_minimal_builder_config_loads() {
    let ctx = TestContext::with_minimal_config();
    let config = load_config(ctx.config_path()).assert_ok();

    assert_eq!(config.global.hostname, "gerrit-test");
    assert_eq!(config.backup_structure.repos_folder, "repos");
    assert_eq!(config.database.dump_file, "reviewdb.sql");
}

#[test]
fn test_config_without_backend_is_rejected() {
    let builder = ConfigBuilder::new();
    let err = parse_config(&builder.to_toml()).unwrap_err();
    assert!(matches!(err, ConfigError::NoBackends));
}

#[test]
fn test_every_task_kind_parses() {
    let config = ConfigBuilder::minimal()
        .add_pre_task("stop-services", stop_services_task())
        .add_pre_task("flush", db_command_task())
        .add_post_task("shell", "kind = \"shell_command\"\ncommand = \"true\"")
        .build();

    assert_eq!(config.pre_tasks.len(), 2);
    assert_eq!(
        config.pre_tasks[0].action,
        TaskAction::StopServices {
            services: vec!["gerrit".to_string(), "apache2".to_string()]
        }
    );
    assert_eq!(config.pre_tasks[1].failure_policy(), OnFailure::Abort);
    assert_eq!(config.post_tasks[0].failure_policy(), OnFailure::Continue);
}

#[test]
fn test_job_rule_needs_a_jenkins_url() {
    let body = stop_job_task().replace("jenkins_url = \"https://ci.example.com\"\n", "");
    let builder = ConfigBuilder::minimal().add_pre_task("stop-ci", &body);

    parse_config(&builder.to_toml()).assert_err_contains("jenkins");
}

#[test]
fn test_job_rule_always_aborts() {
    let config = ConfigBuilder::minimal()
        .add_pre_task("stop-ci", &format!("{}\non_failure = \"continue\"", stop_job_task()))
        .build();

    assert_eq!(config.pre_tasks[0].failure_policy(), OnFailure::Abort);
}

#[test]
fn test_duplicate_task_names_are_rejected() {
    let builder = ConfigBuilder::minimal()
        .add_shell_pre_task("same", "echo one", &[])
        .add_shell_pre_task("same", "echo two", &[]);

    let err = parse_config(&builder.to_toml()).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateTask { .. }));
}

#[test]
fn test_unknown_command_name_is_rejected() {
    let builder = ConfigBuilder::minimal().add_shell_pre_task("bad", "echo", &["deploy"]);
    assert!(parse_config(&builder.to_toml()).is_err());
}

#[test]
fn test_restore_host_falls_back_to_backup_host() {
    let config = ConfigBuilder::minimal().with_remote_host("gerrit.example.com").build();

    let backup = config.remote_host(Action::Backup).unwrap();
    let restore = config.remote_host(Action::RestoreRepos).unwrap();
    assert_eq!(backup.hostname, restore.hostname);
    assert_eq!(backup.port, 22);
}

#[test]
fn test_repo_path_below_site() {
    let builder = ConfigBuilder::minimal();
    let config = builder.build();

    assert_eq!(
        config.repo_path("teamA/app"),
        builder.site_path().join("git").join("teamA/app.git")
    );
}
