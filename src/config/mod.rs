//! Configuration module for gerrit-backup
//!
//! This module handles loading and validating configuration from TOML files.
//! Validation is eager: a malformed task rule or a config without any backup
//! destination is rejected before anything runs.
//!
//! ## Example Usage
//!
//! ```no_run
//! use gerrit_backup::config;
//!
//! let config = config::load_config("gerrit-backup.toml")?;
//! println!("Host: {}, pre-tasks: {}", config.global.hostname, config.pre_tasks.len());
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{load_config, parse_config, ConfigError, Result};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
