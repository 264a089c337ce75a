//! Gerrit Backup Library
//!
//! Backs up and restores Gerrit repositories and the review database to
//! folder and S3 targets, locally or on a remote host over SSH.

pub mod config;
pub mod context;
pub mod managers;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, Config};
pub use context::{Action, CommandName, Locality, RunContext};
pub use managers::backup::BackupManager;
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
pub use managers::remote::{exit_code_for, RemoteBridge, WIRE_VERSION};
pub use managers::tasks::TaskScheduler;
pub use storage::{build_targets, BackupTarget};
