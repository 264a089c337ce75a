//! Test utilities for gerrit-backup
//!
//! This crate provides shared test utilities, config builders and
//! fixtures for testing the gerrit-backup application.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{ConfigBuilder, TestContext};
//!
//! #[test]
//! fn my_test() {
//!     let ctx = TestContext::from_builder(
//!         ConfigBuilder::minimal().add_shell_pre_task("announce", "echo hi", &[]),
//!     );
//!     ctx.write_repo_list(&["teamA/app"]);
//!     // ... test code
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod test_context;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use test_context::{OptionAssertions, ResultAssertions, TestContext};

// Re-export types from the main crate for convenience
pub use gerrit_backup::config::{Config, OnFailure, TaskAction, TaskRule};
pub use gerrit_backup::context::{Action, CommandName, Locality, RunContext};

// Re-export mock implementations from the main crate
pub use gerrit_backup::storage::object_store::mock::{MockObjectStore, StoreCall};
pub use gerrit_backup::utils::executor::mock::{MockExecutor, MockResponse};
pub use gerrit_backup::utils::executor::CommandExecutor;
pub use gerrit_backup::utils::jenkins::mock::MockJobController;
pub use gerrit_backup::utils::ssh::mock::{MockTransport, TransportEvent};

/// Common test result type
pub type TestResult<T = ()> = anyhow::Result<T>;

/// Run context for a direct run on the Gerrit host
pub fn target_context(command: CommandName, dry_run: bool) -> RunContext {
    RunContext::new(command, Locality::TargetHost, dry_run, false, None)
}
