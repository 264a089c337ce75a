//! Command execution abstraction for testability
//!
//! Every external tool (`tar`, `mysqldump`, `sudo`, `ssh`, `screen`, ...) is
//! started through a [`CommandExecutor`], so tests can swap in the recording
//! [`mock::MockExecutor`].

use anyhow::Result;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

/// Abstraction for command execution, enabling mocking in tests
pub trait CommandExecutor: Send + Sync {
    /// Run a command and return its output without judging the exit status
    fn output(
        &self,
        program: &str,
        args: &[&str],
        working_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<Output>;

    /// Run a command, failing on a non-zero exit
    fn run_command(
        &self,
        program: &str,
        args: &[&str],
        working_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<Output> {
        let output = self.output(program, args, working_dir, timeout)?;
        super::command::check_status(program, args, output)
    }

    /// Run a command and return stdout as string
    fn run_command_stdout(
        &self,
        program: &str,
        args: &[&str],
        working_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let output = self.run_command(program, args, working_dir, timeout)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run a shell command through `sh -c`
    fn run_shell_command(
        &self,
        command: &str,
        working_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<Output> {
        tracing::info!(
            "Running shell command: {}",
            super::format::redact_credentials(command)
        );
        self.run_command("sh", &["-c", command], working_dir, timeout)
    }
}

/// Default implementation using real subprocess calls
#[derive(Debug, Clone, Default)]
pub struct RealExecutor;

impl RealExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealExecutor {
    fn output(
        &self,
        program: &str,
        args: &[&str],
        working_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<Output> {
        super::command::run_command_unchecked(program, args, working_dir, timeout)
    }
}

/// A mock executor for testing that records calls and returns configured responses
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::{Arc, Mutex};

    /// Recorded command invocation
    #[derive(Clone, Debug)]
    pub struct CommandCall {
        pub program: String,
        pub args: Vec<String>,
        pub working_dir: Option<String>,
        pub timeout: Option<Duration>,
    }

    impl CommandCall {
        /// Program and arguments joined by spaces
        pub fn command_line(&self) -> String {
            std::iter::once(self.program.as_str())
                .chain(self.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ")
        }

        pub fn has_arg(&self, arg: &str) -> bool {
            self.args.iter().any(|a| a == arg)
        }
    }

    /// Response configuration for mock
    #[derive(Clone, Debug)]
    pub enum MockResponse {
        Success { stdout: String, stderr: String },
        Failure { stderr: String, exit_code: i32 },
        Timeout,
    }

    impl MockResponse {
        pub fn ok(stdout: &str) -> Self {
            MockResponse::Success {
                stdout: stdout.to_string(),
                stderr: String::new(),
            }
        }

        pub fn fail(exit_code: i32, stderr: &str) -> Self {
            MockResponse::Failure {
                stderr: stderr.to_string(),
                exit_code,
            }
        }
    }

    impl Default for MockResponse {
        fn default() -> Self {
            MockResponse::Success {
                stdout: String::new(),
                stderr: String::new(),
            }
        }
    }

    #[derive(Clone, Debug)]
    struct Expectation {
        program: String,
        /// Only match when the joined command line contains this text
        needle: Option<String>,
        response: MockResponse,
    }

    /// Mock executor for testing
    #[derive(Clone, Default)]
    pub struct MockExecutor {
        /// Recorded command invocations
        pub calls: Arc<Mutex<Vec<CommandCall>>>,
        /// Pre-configured responses, most specific first
        expectations: Arc<Mutex<Vec<Expectation>>>,
        /// Default response when no specific response is configured
        default_response: Arc<Mutex<MockResponse>>,
        /// Programs handed to the real executor (still recorded)
        passthrough: Arc<Mutex<HashSet<String>>>,
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Configure a response for a specific program
        pub fn expect(self, program: &str, response: MockResponse) -> Self {
            self.expectations.lock().unwrap().push(Expectation {
                program: program.to_string(),
                needle: None,
                response,
            });
            self
        }

        /// Configure a response for a program whose command line contains `needle`
        pub fn expect_with(self, program: &str, needle: &str, response: MockResponse) -> Self {
            self.expectations.lock().unwrap().insert(
                0,
                Expectation {
                    program: program.to_string(),
                    needle: Some(needle.to_string()),
                    response,
                },
            );
            self
        }

        /// Set the default response for unconfigured programs
        pub fn with_default_response(self, response: MockResponse) -> Self {
            *self.default_response.lock().unwrap() = response;
            self
        }

        /// Run `program` for real (e.g. `tar` in round-trip tests)
        pub fn passthrough(self, program: &str) -> Self {
            self.passthrough.lock().unwrap().insert(program.to_string());
            self
        }

        /// Get all recorded calls
        pub fn get_calls(&self) -> Vec<CommandCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Recorded calls to a specific program
        pub fn calls_to(&self, program: &str) -> Vec<CommandCall> {
            self.get_calls()
                .into_iter()
                .filter(|c| c.program == program)
                .collect()
        }

        /// Check if a program was called
        pub fn was_called(&self, program: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .any(|c| c.program == program)
        }

        /// Get number of calls to a specific program
        pub fn call_count(&self, program: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.program == program)
                .count()
        }

        fn record_call(
            &self,
            program: &str,
            args: &[&str],
            working_dir: Option<&Path>,
            timeout: Option<Duration>,
        ) -> CommandCall {
            let call = CommandCall {
                program: program.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                working_dir: working_dir.map(|p| p.display().to_string()),
                timeout,
            };
            self.calls.lock().unwrap().push(call.clone());
            call
        }

        fn get_response(&self, call: &CommandCall) -> MockResponse {
            let line = call.command_line();
            self.expectations
                .lock()
                .unwrap()
                .iter()
                .find(|e| {
                    e.program == call.program
                        && e.needle.as_ref().map_or(true, |n| line.contains(n.as_str()))
                })
                .map(|e| e.response.clone())
                .unwrap_or_else(|| self.default_response.lock().unwrap().clone())
        }

        fn execute_response(&self, response: MockResponse) -> Result<Output> {
            match response {
                MockResponse::Success { stdout, stderr } => Ok(Output {
                    status: ExitStatus::from_raw(0),
                    stdout: stdout.into_bytes(),
                    stderr: stderr.into_bytes(),
                }),
                MockResponse::Failure { stderr, exit_code } => Ok(Output {
                    status: ExitStatus::from_raw(exit_code << 8),
                    stdout: Vec::new(),
                    stderr: stderr.into_bytes(),
                }),
                MockResponse::Timeout => {
                    anyhow::bail!("Command timed out")
                }
            }
        }
    }

    impl CommandExecutor for MockExecutor {
        fn output(
            &self,
            program: &str,
            args: &[&str],
            working_dir: Option<&Path>,
            timeout: Option<Duration>,
        ) -> Result<Output> {
            let call = self.record_call(program, args, working_dir, timeout);

            if self.passthrough.lock().unwrap().contains(program) {
                return RealExecutor::new().output(program, args, working_dir, timeout);
            }

            let response = self.get_response(&call);
            self.execute_response(response)
        }
    }
}
