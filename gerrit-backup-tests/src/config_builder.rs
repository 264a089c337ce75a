//! Fluent API for building test configurations
//!
//! The builder renders a TOML document so the same configuration can be
//! parsed in-process or written to disk for the CLI binary.

use gerrit_backup::config::{parse_config, Config};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builder for creating test configurations
pub struct ConfigBuilder {
    temp_dir: TempDir,
    hostname: String,
    use_sudo: bool,
    folder_backend: Option<PathBuf>,
    s3_bucket: Option<String>,
    remote_host: Option<String>,
    api_url: Option<String>,
    pre_tasks: Vec<String>,
    post_tasks: Vec<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder without any backend
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        for dir in ["logs", "work", "site/git"] {
            fs::create_dir_all(temp_dir.path().join(dir)).expect("Failed to create test directory");
        }

        Self {
            temp_dir,
            hostname: "gerrit-test".to_string(),
            use_sudo: false,
            folder_backend: None,
            s3_bucket: None,
            remote_host: None,
            api_url: None,
            pre_tasks: Vec::new(),
            post_tasks: Vec::new(),
        }
    }

    /// Create a minimal config with a folder backend inside the temp dir
    pub fn minimal() -> Self {
        let builder = Self::new();
        let backup_path = builder.temp_dir.path().join("backups");
        fs::create_dir_all(&backup_path).expect("Failed to create backup dir");
        builder.with_folder_backend(&backup_path)
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = hostname.to_string();
        self
    }

    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    pub fn with_folder_backend(mut self, path: &Path) -> Self {
        self.folder_backend = Some(path.to_path_buf());
        self
    }

    pub fn with_s3_backend(mut self, bucket: &str) -> Self {
        self.s3_bucket = Some(bucket.to_string());
        self
    }

    /// Remote host used for both backup and restore
    pub fn with_remote_host(mut self, hostname: &str) -> Self {
        self.remote_host = Some(hostname.to_string());
        self
    }

    pub fn with_api(mut self, url: &str) -> Self {
        self.api_url = Some(url.to_string());
        self
    }

    /// Add a pre-task from the TOML lines that follow `name`
    pub fn add_pre_task(mut self, name: &str, body: &str) -> Self {
        self.pre_tasks.push(task_table("pre_tasks", name, body));
        self
    }

    /// Add a post-task from the TOML lines that follow `name`
    pub fn add_post_task(mut self, name: &str, body: &str) -> Self {
        self.post_tasks.push(task_table("post_tasks", name, body));
        self
    }

    /// Add a shell pre-task limited to `commands` (empty means every command)
    pub fn add_shell_pre_task(self, name: &str, command: &str, commands: &[&str]) -> Self {
        let body = shell_body(command, commands);
        self.add_pre_task(name, &body)
    }

    /// Add a shell post-task limited to `commands` (empty means every command)
    pub fn add_shell_post_task(self, name: &str, command: &str, commands: &[&str]) -> Self {
        let body = shell_body(command, commands);
        self.add_post_task(name, &body)
    }

    /// Get the temp directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Repository list file referenced by the config
    pub fn repo_list_path(&self) -> PathBuf {
        self.temp_dir.path().join("repos.txt")
    }

    /// Gerrit site directory referenced by the config
    pub fn site_path(&self) -> PathBuf {
        self.temp_dir.path().join("site")
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> String {
        let root = self.temp_dir.path();
        let mut out = format!(
            r#"[global]
hostname = "{hostname}"
repo_list_file = "{repo_list}"
work_directory = "{work}"
use_sudo = {use_sudo}
default_timeout_seconds = 60
log_directory = "{logs}"
log_level = "debug"
log_max_files = 3

[gerrit]
site_path = "{site}"

[database]
username = "gerrit"
password = "secret"
databases = ["reviewdb"]
"#,
            hostname = self.hostname,
            repo_list = toml_path(&self.repo_list_path()),
            work = toml_path(&root.join("work")),
            use_sudo = self.use_sudo,
            logs = toml_path(&root.join("logs")),
            site = toml_path(&self.site_path()),
        );

        if let Some(path) = &self.folder_backend {
            out.push_str(&format!("\n[backup_folder]\npath = \"{}\"\n", toml_path(path)));
        }

        if let Some(bucket) = &self.s3_bucket {
            out.push_str(&format!(
                "\n[backup_s3]\naccess_key = \"AKIDEXAMPLE\"\nsecret_key = \"example-secret\"\nbucket = \"{}\"\nregion = \"eu-west-1\"\n",
                bucket
            ));
        }

        if let Some(api) = &self.api_url {
            out.push_str(&format!("\n[api]\nurl = \"{}\"\n", api));
        }

        out.push_str(&format!("\n[remote]\nuse_sudo = {}\n", self.use_sudo));
        if let Some(host) = &self.remote_host {
            out.push_str(&format!(
                "\n[remote.backup]\nhostname = \"{}\"\nusername = \"backup\"\n",
                host
            ));
        }

        for table in self.pre_tasks.iter().chain(self.post_tasks.iter()) {
            out.push('\n');
            out.push_str(table);
        }

        out
    }

    /// Parse the configuration
    pub fn build(&self) -> Config {
        parse_config(&self.to_toml()).expect("Test configuration should be valid")
    }

    /// Write the configuration to `gerrit-backup.toml` in the temp dir
    pub fn write(&self) -> PathBuf {
        let path = self.temp_dir.path().join("gerrit-backup.toml");
        fs::write(&path, self.to_toml()).expect("Failed to write config file");
        path
    }

    /// Write the config and keep the temp directory (don't delete on drop)
    pub fn persist(self) -> (PathBuf, TempDir) {
        let path = self.write();
        (path, self.temp_dir)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn task_table(section: &str, name: &str, body: &str) -> String {
    format!("[[{}]]\nname = \"{}\"\n{}\n", section, name, body.trim())
}

fn shell_body(command: &str, commands: &[&str]) -> String {
    let mut body = format!("kind = \"shell_command\"\ncommand = \"{}\"\nrun_remotely = true", command);
    if !commands.is_empty() {
        let quoted: Vec<String> = commands.iter().map(|c| format!("\"{}\"", c)).collect();
        body.push_str(&format!("\nrun_for_commands = [{}]", quoted.join(", ")));
    }
    body
}

/// Forward slashes keep Windows paths valid inside TOML strings
fn toml_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
