//! Pre/post maintenance task scheduler
//!
//! Rules are evaluated against the [`RunContext`] and the survivors run in
//! declaration order. A rule fires at most once per phase.

use crate::config::{Config, OnFailure, TaskAction, TaskRule};
use crate::context::RunContext;
use crate::utils::database::Database;
use crate::utils::executor::CommandExecutor;
use crate::utils::format::redact_credentials;
use crate::utils::jenkins::{disable_job_and_wait, JobController};
use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_POLL_INTERVAL: u64 = 5;
const DEFAULT_JOB_TIMEOUT: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pre => f.write_str("pre-task"),
            Phase::Post => f.write_str("post-task"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{phase} '{name}' failed")]
    Aborted {
        phase: Phase,
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Outcome of one phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseReport {
    pub ran: Vec<String>,
    pub skipped: Vec<String>,
    /// (rule name, error) for rules whose failure policy is `continue`
    pub failed: Vec<(String, String)>,
}

impl PhaseReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Whether `rule` fires for this invocation
pub fn should_run(rule: &TaskRule, ctx: &RunContext) -> bool {
    let command_matches = ctx.command().is_tasks_only()
        || rule.run_for_commands.is_empty()
        || rule.run_for_commands.contains(&ctx.command());

    command_matches && rule.run_remotely == ctx.locality().runs_remotely()
}

/// Human-readable description of an action, credentials masked
pub fn describe(action: &TaskAction) -> String {
    match action {
        TaskAction::StopJob { job, .. } => format!("disable Jenkins job '{}' and wait for its build", job),
        TaskAction::StartJob { job, .. } => format!("enable Jenkins job '{}'", job),
        TaskAction::StopServices { services } => format!("stop services: {}", services.join(", ")),
        TaskAction::StartServices { services } => format!("start services: {}", services.join(", ")),
        TaskAction::ShellCommand { command, working_dir } => match working_dir {
            Some(dir) => format!("shell command in {:?}: {}", dir, redact_credentials(command)),
            None => format!("shell command: {}", redact_credentials(command)),
        },
        TaskAction::DbCommand { command } => format!("SQL: {}", command),
    }
}

pub struct TaskScheduler {
    config: Config,
    executor: Arc<dyn CommandExecutor>,
    jobs: Arc<dyn JobController>,
    database: Database,
}

impl TaskScheduler {
    pub fn new(config: Config, executor: Arc<dyn CommandExecutor>, jobs: Arc<dyn JobController>) -> Self {
        let database = Database::new(
            executor.clone(),
            config.database.clone(),
            Duration::from_secs(config.global.default_timeout_seconds),
        );
        Self {
            config,
            executor,
            jobs,
            database,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.global.default_timeout_seconds)
    }

    pub fn run_pre_tasks(&self, ctx: &RunContext) -> std::result::Result<PhaseReport, TaskError> {
        self.run_phase(Phase::Pre, &self.config.pre_tasks, ctx)
    }

    pub fn run_post_tasks(&self, ctx: &RunContext) -> std::result::Result<PhaseReport, TaskError> {
        self.run_phase(Phase::Post, &self.config.post_tasks, ctx)
    }

    pub fn run_phase(
        &self,
        phase: Phase,
        rules: &[TaskRule],
        ctx: &RunContext,
    ) -> std::result::Result<PhaseReport, TaskError> {
        let mut report = PhaseReport::default();

        for rule in rules {
            if !should_run(rule, ctx) {
                debug!(
                    "Skipping {} '{}' (command {}, {})",
                    phase,
                    rule.name,
                    ctx.command(),
                    ctx.locality()
                );
                report.skipped.push(rule.name.clone());
                continue;
            }

            info!("Running {} '{}'", phase, rule.name);
            match self.run_rule(rule, ctx) {
                Ok(()) => report.ran.push(rule.name.clone()),
                Err(e) => match rule.failure_policy() {
                    OnFailure::Abort => {
                        error!("{} '{}' failed, aborting: {:#}", phase, rule.name, e);
                        return Err(TaskError::Aborted {
                            phase,
                            name: rule.name.clone(),
                            source: e,
                        });
                    }
                    OnFailure::Continue => {
                        warn!("{} '{}' failed, continuing: {:#}", phase, rule.name, e);
                        report.failed.push((rule.name.clone(), format!("{:#}", e)));
                    }
                },
            }
        }

        info!(
            "{}s: {} ran, {} skipped, {} failed",
            phase,
            report.ran.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn run_rule(&self, rule: &TaskRule, ctx: &RunContext) -> Result<()> {
        if ctx.dry_run() {
            info!("[DRY RUN] Would {}", describe(&rule.action));
            return Ok(());
        }

        if let Some(secs) = rule.sleep_seconds.filter(|s| *s > 0) {
            info!("Sleeping {}s before '{}'", secs, rule.name);
            std::thread::sleep(Duration::from_secs(secs));
        }

        match &rule.action {
            TaskAction::StopJob { job, jenkins_url } => {
                let url = self.jenkins_url(jenkins_url.as_deref())?;
                let (poll, timeout) = self.job_timing();
                disable_job_and_wait(self.jobs.as_ref(), url, job, poll, timeout)?;
            }
            TaskAction::StartJob { job, jenkins_url } => {
                let url = self.jenkins_url(jenkins_url.as_deref())?;
                info!("Enabling Jenkins job '{}'", job);
                self.jobs.enable_job(url, job)?;
            }
            TaskAction::StopServices { services } => {
                for service in services {
                    self.service(service, "stop")?;
                }
            }
            TaskAction::StartServices { services } => {
                for service in services {
                    self.service(service, "start")?;
                }
            }
            TaskAction::ShellCommand { command, working_dir } => {
                self.executor
                    .run_shell_command(command, working_dir.as_deref(), Some(self.timeout()))?;
            }
            TaskAction::DbCommand { command } => {
                self.database.run_sql(command, ctx)?;
            }
        }

        Ok(())
    }

    fn jenkins_url<'a>(&'a self, task_url: Option<&'a str>) -> Result<&'a str> {
        self.config
            .jenkins_url_for(task_url)
            .context("No Jenkins URL configured for job rule")
    }

    fn job_timing(&self) -> (Duration, Duration) {
        let (poll, timeout) = self
            .config
            .jenkins
            .as_ref()
            .map(|j| (j.poll_interval_seconds, j.timeout_seconds))
            .unwrap_or((DEFAULT_POLL_INTERVAL, DEFAULT_JOB_TIMEOUT));
        (Duration::from_secs(poll), Duration::from_secs(timeout))
    }

    fn service(&self, name: &str, operation: &str) -> Result<()> {
        info!("Service {}: {}", operation, name);
        let result = if self.config.global.use_sudo {
            self.executor
                .run_command("sudo", &["service", name, operation], None, Some(self.timeout()))
        } else {
            self.executor
                .run_command("service", &[name, operation], None, Some(self.timeout()))
        };
        result
            .map(|_| ())
            .with_context(|| format!("Failed to {} service {}", operation, name))
    }
}
