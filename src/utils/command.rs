//! Utilities for running commands with proper error handling and timeouts

use super::format::redact_credentials;
use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::{debug, error, info};

/// Run a command with optional timeout and return its output whatever the exit status
pub fn run_command_unchecked(
    program: &str,
    args: &[&str],
    working_dir: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    debug!(
        "Running command: {}",
        redact_credentials(&format!("{} {}", program, args.join(" ")))
    );

    let output = if let Some(timeout_duration) = timeout {
        // Use tokio for timeout support
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start runtime for command timeout")?;

        runtime.block_on(async {
            let mut cmd = tokio::process::Command::from(cmd);
            cmd.kill_on_drop(true);
            let result = tokio::time::timeout(timeout_duration, cmd.output()).await;

            match result {
                Ok(output) => output.context(format!("Failed to execute {}", program)),
                Err(_) => Err(anyhow::anyhow!(
                    "{} timed out after {:?}",
                    program,
                    timeout_duration
                )),
            }
        })?
    } else {
        cmd.output()
            .context(format!("Failed to execute {}", program))?
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.is_empty() {
        debug!("Command output: {}", stdout.trim_end());
    }

    Ok(output)
}

/// Turn a non-zero exit status into an error carrying stderr
pub fn check_status(program: &str, args: &[&str], output: Output) -> Result<Output> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(
            "Command failed: {}",
            redact_credentials(&format!("{} {}", program, args.join(" ")))
        );
        error!("Stderr: {}", stderr.trim_end());
        anyhow::bail!(
            "Command failed with exit code {:?}: {}",
            output.status.code(),
            stderr.trim_end()
        );
    }

    Ok(output)
}

/// Run a command with optional timeout, failing on a non-zero exit
pub fn run_command(
    program: &str,
    args: &[&str],
    working_dir: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<Output> {
    let output = run_command_unchecked(program, args, working_dir, timeout)?;
    check_status(program, args, output)
}

/// Run a shell command (task rules, remote provisioning)
pub fn run_shell_command(
    command: &str,
    working_dir: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<Output> {
    info!("Running shell command: {}", redact_credentials(command));
    run_command("sh", &["-c", command], working_dir, timeout)
}
