use crate::context::CommandName;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub global: GlobalConfig,
    pub gerrit: GerritConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backup_structure: BackupStructure,

    /// Filesystem destination
    #[serde(default)]
    pub backup_folder: Option<FolderBackendConfig>,

    /// Object-store destination
    #[serde(default)]
    pub backup_s3: Option<S3BackendConfig>,

    /// Defaults for job-control task rules
    #[serde(default)]
    pub jenkins: Option<JenkinsConfig>,

    #[serde(default)]
    pub remote: RemoteConfig,

    /// Gerrit REST API used to build the repository list
    #[serde(default)]
    pub api: Option<ApiConfig>,

    #[serde(default)]
    pub pre_tasks: Vec<TaskRule>,
    #[serde(default)]
    pub post_tasks: Vec<TaskRule>,
}

/// Global configuration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// First path segment of every backup key
    pub hostname: String,

    /// One repository identifier per line. Relative paths resolve against the config file.
    #[serde(default = "default_repo_list_file")]
    pub repo_list_file: PathBuf,

    /// Where the database dump is written
    #[serde(default = "default_work_directory")]
    pub work_directory: PathBuf,

    /// Run ownership fixups, service control and repo removal through sudo
    #[serde(default = "default_true")]
    pub use_sudo: bool,

    /// Timeout for external tools
    #[serde(default = "default_timeout")]
    pub default_timeout_seconds: u64,

    /// Logging configuration
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_max_files")]
    pub log_max_files: u32,
    #[serde(default = "default_log_max_size_mb")]
    pub log_max_size_mb: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GerritConfig {
    /// Gerrit site directory; repositories live under `<site_path>/git`
    pub site_path: PathBuf,
    #[serde(default = "default_owner")]
    pub owner_user: String,
    #[serde(default = "default_owner")]
    pub owner_group: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_databases")]
    pub databases: Vec<String>,
    /// File name of the dump inside `work_directory`
    #[serde(default = "default_dump_file")]
    pub dump_file: String,
}

/// Folder layout below `<hostname>/` shared by every destination
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackupStructure {
    #[serde(default = "default_database_folder")]
    pub database_folder: String,
    #[serde(default = "default_repos_folder")]
    pub repos_folder: String,
    #[serde(default = "default_repos_list_folder")]
    pub repos_list_folder: String,
}

impl Default for BackupStructure {
    fn default() -> Self {
        Self {
            database_folder: default_database_folder(),
            repos_folder: default_repos_folder(),
            repos_list_folder: default_repos_list_folder(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FolderBackendConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3BackendConfig {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible stores; AWS is used when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Tag uploaded objects with the s3cmd gpg marker
    #[serde(default)]
    pub encrypt_files: bool,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_s3_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JenkinsConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// Mirror directory on the remote host, relative to the login directory
    #[serde(default = "default_remote_directory")]
    pub remote_directory: String,

    /// Run once on the remote host before the first worker invocation
    #[serde(default)]
    pub provision_command: Option<String>,

    /// Prefix the worker command with sudo
    #[serde(default = "default_true")]
    pub use_sudo: bool,

    #[serde(default)]
    pub backup: Option<SshHostConfig>,

    /// Falls back to `backup` when unset
    #[serde(default)]
    pub restore: Option<SshHostConfig>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            remote_directory: default_remote_directory(),
            provision_command: None,
            use_sudo: true,
            backup: None,
            restore: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshHostConfig {
    pub hostname: String,
    pub username: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl SshHostConfig {
    /// `user@host` destination string
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.hostname)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    pub url: String,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
}

/// Declarative pre/post maintenance action
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskRule {
    pub name: String,

    #[serde(flatten)]
    pub action: TaskAction,

    /// Commands this rule applies to; empty means every command
    #[serde(default)]
    pub run_for_commands: Vec<CommandName>,

    /// Fire on the Gerrit host (true) or on the machine driving a remote run (false)
    #[serde(default)]
    pub run_remotely: bool,

    /// Pause before the action runs
    #[serde(default)]
    pub sleep_seconds: Option<u64>,

    #[serde(default)]
    pub on_failure: Option<OnFailure>,
}

impl TaskRule {
    /// Effective failure policy. Disabling a job is always fatal.
    pub fn failure_policy(&self) -> OnFailure {
        match self.action {
            TaskAction::StopJob { .. } => OnFailure::Abort,
            _ => self.on_failure.unwrap_or(OnFailure::Continue),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskAction {
    StopJob {
        job: String,
        #[serde(default)]
        jenkins_url: Option<String>,
    },
    StartJob {
        job: String,
        #[serde(default)]
        jenkins_url: Option<String>,
    },
    StopServices {
        services: Vec<String>,
    },
    StartServices {
        services: Vec<String>,
    },
    ShellCommand {
        command: String,
        #[serde(default)]
        working_dir: Option<PathBuf>,
    },
    DbCommand {
        command: String,
    },
}

impl TaskAction {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskAction::StopJob { .. } => "stop_job",
            TaskAction::StartJob { .. } => "start_job",
            TaskAction::StopServices { .. } => "stop_services",
            TaskAction::StartServices { .. } => "start_services",
            TaskAction::ShellCommand { .. } => "shell_command",
            TaskAction::DbCommand { .. } => "db_command",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    Continue,
    Abort,
}

// Default value functions

fn default_true() -> bool { true }
fn default_repo_list_file() -> PathBuf { PathBuf::from("gerrit_backup_repos.txt") }
fn default_work_directory() -> PathBuf { PathBuf::from("/tmp") }
fn default_timeout() -> u64 { 3600 }
fn default_log_directory() -> PathBuf { PathBuf::from("~/logs") }
fn default_log_level() -> String { "info".to_string() }
fn default_log_max_files() -> u32 { 10 }
fn default_log_max_size_mb() -> u64 { 10 }
fn default_owner() -> String { "gerrit".to_string() }
fn default_db_host() -> String { "localhost".to_string() }
fn default_databases() -> Vec<String> { vec!["reviewdb".to_string()] }
fn default_dump_file() -> String { "reviewdb.sql".to_string() }
fn default_database_folder() -> String { "database".to_string() }
fn default_repos_folder() -> String { "repos".to_string() }
fn default_repos_list_folder() -> String { "repos_list".to_string() }
fn default_region() -> String { "us-east-1".to_string() }
fn default_content_type() -> String { "application/tar+gzip".to_string() }
fn default_s3_timeout() -> u64 { 600 }
fn default_poll_interval() -> u64 { 5 }
fn default_remote_directory() -> String { "gerrit-backup".to_string() }
fn default_ssh_port() -> u16 { 22 }
fn default_connect_timeout() -> u64 { 30 }
