//! Test fixtures and sample data
//!
//! Provides pre-built repository layouts and config snippets for testing.

use std::fs;
use std::path::{Path, PathBuf};

/// Repository list with comments and blank lines mixed in
pub fn sample_repo_list() -> &'static str {
    "# Gerrit repositories\n\nteamA/app\n  # indented comment\nteamB/lib\n\nAll-Projects\n"
}

/// Repositories named by [`sample_repo_list`], in file order
pub fn sample_repos() -> Vec<String> {
    vec!["teamA/app".to_string(), "teamB/lib".to_string(), "All-Projects".to_string()]
}

/// Create a bare-looking repository below `<site>/git/<name>.git`
pub fn create_repo(site: &Path, name: &str) -> PathBuf {
    let repo = site.join("git").join(format!("{}.git", name));
    fs::create_dir_all(repo.join("refs/heads")).expect("Failed to create repo dir");
    fs::write(repo.join("HEAD"), "ref: refs/heads/master\n").expect("Failed to write HEAD");
    fs::write(repo.join("config"), format!("[core]\n\tbare = true\n# {}\n", name))
        .expect("Failed to write repo config");
    fs::write(repo.join("refs/heads/master"), "0123456789abcdef0123456789abcdef01234567\n")
        .expect("Failed to write ref");
    repo
}

/// Directory tree with nested files for archive tests
pub fn create_sample_tree(root: &Path) -> PathBuf {
    let tree = root.join("tree");
    fs::create_dir_all(tree.join("nested/deeper")).expect("Failed to create tree");
    fs::write(tree.join("top.txt"), "top level\n").expect("Failed to write file");
    fs::write(tree.join("nested/middle.txt"), "middle\n").expect("Failed to write file");
    fs::write(tree.join("nested/deeper/bottom.bin"), [0u8, 1, 2, 3, 255]).expect("Failed to write file");
    tree
}

/// Task rule bodies for every kind, used with `ConfigBuilder::add_pre_task`
pub fn stop_services_task() -> &'static str {
    r#"kind = "stop_services"
services = ["gerrit", "apache2"]
run_remotely = true
run_for_commands = ["backup", "restore"]"#
}

pub fn db_command_task() -> &'static str {
    r#"kind = "db_command"
command = "FLUSH TABLES"
run_remotely = true
on_failure = "abort""#
}

pub fn stop_job_task() -> &'static str {
    r#"kind = "stop_job"
job = "gerrit-replication"
jenkins_url = "https://ci.example.com"
run_remotely = false"#
}
