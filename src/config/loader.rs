use super::types::*;
use crate::context::Action;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("No backup destination configured (need [backup_folder] and/or [backup_s3])")]
    NoBackends,

    #[error("Invalid {phase} task '{name}': {reason}")]
    InvalidTask {
        phase: &'static str,
        name: String,
        reason: String,
    },

    #[error("Duplicate {phase} task name '{name}'")]
    DuplicateTask { phase: &'static str, name: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
///
/// A relative `repo_list_file` is resolved against the directory holding the config.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let mut config = parse_config(&contents)?;

    if config.global.repo_list_file.is_relative() {
        if let Some(dir) = path.parent() {
            config.global.repo_list_file = dir.join(&config.global.repo_list_file);
        }
    }

    Ok(config)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate the configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.global.hostname.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "global.hostname must not be empty".to_string(),
        ));
    }

    if config.backup_folder.is_none() && config.backup_s3.is_none() {
        return Err(ConfigError::NoBackends);
    }

    if let Some(ref s3) = config.backup_s3 {
        if s3.bucket.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backup_s3.bucket must not be empty".to_string(),
            ));
        }
    }

    if config.database.databases.is_empty() {
        return Err(ConfigError::ValidationError(
            "database.databases must list at least one database".to_string(),
        ));
    }

    validate_tasks("pre", &config.pre_tasks, config)?;
    validate_tasks("post", &config.post_tasks, config)?;

    Ok(())
}

fn validate_tasks(phase: &'static str, rules: &[TaskRule], config: &Config) -> Result<()> {
    let mut seen = HashSet::new();

    for rule in rules {
        if rule.name.trim().is_empty() {
            return Err(ConfigError::InvalidTask {
                phase,
                name: rule.name.clone(),
                reason: "name must not be empty".to_string(),
            });
        }

        if !seen.insert(rule.name.as_str()) {
            return Err(ConfigError::DuplicateTask {
                phase,
                name: rule.name.clone(),
            });
        }

        let invalid = |reason: &str| ConfigError::InvalidTask {
            phase,
            name: rule.name.clone(),
            reason: reason.to_string(),
        };

        match &rule.action {
            TaskAction::StopJob { job, jenkins_url } | TaskAction::StartJob { job, jenkins_url } => {
                if job.trim().is_empty() {
                    return Err(invalid("job must not be empty"));
                }
                if jenkins_url.is_none() && config.jenkins.is_none() {
                    return Err(invalid("no jenkins_url on the task and no [jenkins] section"));
                }
            }
            TaskAction::StopServices { services } | TaskAction::StartServices { services } => {
                if services.is_empty() || services.iter().any(|s| s.trim().is_empty()) {
                    return Err(invalid("services must be a non-empty list of names"));
                }
            }
            TaskAction::ShellCommand { command, .. } | TaskAction::DbCommand { command } => {
                if command.trim().is_empty() {
                    return Err(invalid("command must not be empty"));
                }
            }
        }
    }

    Ok(())
}

impl Config {
    /// SSH host for a remote action. Restores use `[remote.restore]` when set.
    pub fn remote_host(&self, action: Action) -> Option<&SshHostConfig> {
        if action.is_restore() {
            self.remote.restore.as_ref().or(self.remote.backup.as_ref())
        } else {
            self.remote.backup.as_ref()
        }
    }

    /// Jenkins base URL for a job rule
    pub fn jenkins_url_for<'a>(&'a self, task_url: Option<&'a str>) -> Option<&'a str> {
        task_url.or_else(|| self.jenkins.as_ref().map(|j| j.url.as_str()))
    }

    /// Local path of a repository below the Gerrit site
    pub fn repo_path(&self, repo: &str) -> std::path::PathBuf {
        self.gerrit
            .site_path
            .join("git")
            .join(format!("{}.git", repo.trim_matches('/')))
    }

    /// Local path of the database dump
    pub fn dump_path(&self) -> std::path::PathBuf {
        self.global.work_directory.join(&self.database.dump_file)
    }
}
