pub mod archive;
pub mod command;
pub mod database;
pub mod format;
pub mod gerrit_api;
pub mod jenkins;
pub mod locker;
pub mod repo_list;
pub mod screen;
pub mod ssh;
pub mod tools;

// Trait-based abstractions for testability
pub mod executor;

// Re-export commonly used types and traits (used by test crate)
#[allow(unused_imports)]
pub use executor::{CommandExecutor, RealExecutor};
#[allow(unused_imports)]
pub use jenkins::{JenkinsClient, JobController};
#[allow(unused_imports)]
pub use ssh::{OpenSshTransport, RemoteTransport};
