//! MySQL dump and restore through `mysqldump` / `mysql`

use crate::config::DatabaseConfig;
use crate::context::RunContext;
use crate::utils::executor::CommandExecutor;
use crate::utils::format::redact_credentials;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Database {
    executor: Arc<dyn CommandExecutor>,
    config: DatabaseConfig,
    timeout: Duration,
}

impl Database {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: DatabaseConfig, timeout: Duration) -> Self {
        Self {
            executor,
            config,
            timeout,
        }
    }

    fn credentials(&self) -> Vec<String> {
        vec![
            format!("--host={}", self.config.host),
            format!("--user={}", self.config.username),
            format!("--password={}", self.config.password),
        ]
    }

    /// `mysqldump` arguments writing every configured database to `dest`
    pub fn dump_args(&self, dest: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["--opt", "--quote-names", "--single-transaction", "--quick"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.credentials());
        args.push(format!("--result-file={}", dest.display()));
        args.push("--databases".to_string());
        args.extend(self.config.databases.iter().cloned());
        args
    }

    /// Dump the databases into `dest`
    pub fn dump(&self, dest: &Path, ctx: &RunContext) -> Result<PathBuf> {
        let args = self.dump_args(dest);
        let line = redact_credentials(&format!("mysqldump {}", args.join(" ")));

        if ctx.dry_run() {
            info!("[DRY RUN] Would run: {}", line);
            return Ok(dest.to_path_buf());
        }

        info!("Dumping database(s) {} to {:?}", self.config.databases.join(", "), dest);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.executor
            .run_command("mysqldump", &args, None, Some(self.timeout))
            .context("mysqldump failed")?;

        Ok(dest.to_path_buf())
    }

    /// Run one SQL statement through the `mysql` client
    pub fn run_sql(&self, sql: &str, ctx: &RunContext) -> Result<()> {
        let mut args = self.credentials();
        args.push("-e".to_string());
        args.push(sql.to_string());
        let line = redact_credentials(&format!("mysql {}", args.join(" ")));

        if ctx.dry_run() {
            info!("[DRY RUN] Would run: {}", line);
            return Ok(());
        }

        info!("Running: {}", line);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.executor
            .run_command("mysql", &args, None, Some(self.timeout))
            .with_context(|| format!("SQL statement failed: {}", sql))?;

        Ok(())
    }

    /// Replay a dump file produced by [`Database::dump`]
    pub fn restore_file(&self, dump: &Path, ctx: &RunContext) -> Result<()> {
        info!("Restoring database from {:?}", dump);
        self.run_sql(&format!("source {}", dump.display()), ctx)
            .context("Database restore failed")
    }
}
