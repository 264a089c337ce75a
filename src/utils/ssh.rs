//! Persistent secure session to the Gerrit host
//!
//! [`OpenSshTransport`] opens one OpenSSH control master per invocation and
//! routes every later `ssh` command and `scp` copy through its socket.

use crate::config::SshHostConfig;
use crate::utils::executor::CommandExecutor;
use crate::utils::format::redact_credentials;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Could not open SSH session to {host}: {reason}")]
    Auth { host: String, reason: String },

    #[error("Remote command on {host} could not be run: {reason}")]
    Exec { host: String, reason: String },

    #[error("Copying {local:?} to {host}:{remote} failed: {reason}")]
    Copy {
        host: String,
        local: PathBuf,
        remote: String,
        reason: String,
    },

    #[error("SSH session to {0} is not open")]
    NotConnected(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Secure remote transport, enabling mocking in tests
pub trait RemoteTransport: Send {
    /// `user@host` this transport talks to
    fn host(&self) -> &str;
    fn connect(&mut self) -> Result<()>;
    fn exec(&mut self, command: &str) -> Result<RemoteOutput>;
    /// Like [`exec`](Self::exec) but never bounded by the command timeout
    fn exec_unbounded(&mut self, command: &str) -> Result<RemoteOutput> {
        self.exec(command)
    }
    fn copy_file(&mut self, local: &Path, remote: &str) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// OpenSSH control-master transport driven through a [`CommandExecutor`]
pub struct OpenSshTransport {
    executor: Arc<dyn CommandExecutor>,
    host: SshHostConfig,
    destination: String,
    control_path: PathBuf,
    command_timeout: Option<Duration>,
    connected: bool,
}

impl OpenSshTransport {
    pub fn new(executor: Arc<dyn CommandExecutor>, host: SshHostConfig) -> Self {
        let control_path =
            std::env::temp_dir().join(format!("gerrit-backup-ssh-{}.ctl", std::process::id()));
        Self {
            executor,
            destination: host.destination(),
            host,
            control_path,
            command_timeout: None,
            connected: false,
        }
    }

    /// Bound remote commands and copies; `exec_unbounded` is never bounded
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    fn control_path(&self) -> String {
        self.control_path.display().to_string()
    }

    /// Arguments that open the control master in the background
    pub fn master_args(&self) -> Vec<String> {
        let mut args = vec![
            "-M".to_string(),
            "-S".to_string(),
            self.control_path(),
            "-f".to_string(),
            "-N".to_string(),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.host.connect_timeout_seconds),
            "-p".to_string(),
            self.host.port.to_string(),
        ];
        if let Some(ref key) = self.host.key_file {
            args.push("-i".to_string());
            args.push(crate::config::expand_tilde(key).display().to_string());
        }
        args.push(self.destination.clone());
        args
    }

    fn run_remote(&self, command: &str, timeout: Option<Duration>) -> Result<RemoteOutput> {
        self.ensure_connected()?;
        debug!("[{}] $ {}", self.destination, redact_credentials(command));

        let control = self.control_path();
        let port = self.host.port.to_string();
        let args = ["-S", &control, "-p", &port, &self.destination, "--", command];

        let output = self
            .executor
            .output("ssh", &args, None, timeout)
            .map_err(|e| TransportError::Exec {
                host: self.destination.clone(),
                reason: format!("{:#}", e),
            })?;

        Ok(RemoteOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected {
            return Err(TransportError::NotConnected(self.destination.clone()));
        }
        Ok(())
    }
}

impl RemoteTransport for OpenSshTransport {
    fn host(&self) -> &str {
        &self.destination
    }

    fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }

        info!("Opening SSH session to {}:{}", self.destination, self.host.port);
        let args = self.master_args();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let timeout = Duration::from_secs(self.host.connect_timeout_seconds + 5);

        let output = self
            .executor
            .output("ssh", &args, None, Some(timeout))
            .map_err(|e| TransportError::Auth {
                host: self.destination.clone(),
                reason: format!("{:#}", e),
            })?;

        if !output.status.success() {
            return Err(TransportError::Auth {
                host: self.destination.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        self.connected = true;
        Ok(())
    }

    fn exec(&mut self, command: &str) -> Result<RemoteOutput> {
        self.run_remote(command, self.command_timeout)
    }

    fn exec_unbounded(&mut self, command: &str) -> Result<RemoteOutput> {
        self.run_remote(command, None)
    }

    fn copy_file(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.ensure_connected()?;
        info!("Copying {:?} to {}:{}", local, self.destination, remote);

        let control = format!("ControlPath={}", self.control_path());
        let port = self.host.port.to_string();
        let local_arg = local.display().to_string();
        let target = format!("{}:{}", self.destination, remote);
        let args = ["-o", &control, "-P", &port, "-p", &local_arg, &target];

        let copy_err = |reason: String| TransportError::Copy {
            host: self.destination.clone(),
            local: local.to_path_buf(),
            remote: remote.to_string(),
            reason,
        };

        let output = self
            .executor
            .output("scp", &args, None, self.command_timeout)
            .map_err(|e| copy_err(format!("{:#}", e)))?;

        if !output.status.success() {
            return Err(copy_err(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        info!("Closing SSH session to {}", self.destination);
        let control = self.control_path();
        let args = ["-S", control.as_str(), "-O", "exit", self.destination.as_str()];
        let output = self
            .executor
            .output("ssh", &args, None, Some(Duration::from_secs(30)))
            .map_err(|e| TransportError::Exec {
                host: self.destination.clone(),
                reason: format!("{:#}", e),
            })?;

        if !output.status.success() {
            debug!(
                "ssh -O exit reported: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// A mock transport for testing
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum TransportEvent {
        Connect,
        Exec(String),
        Copy { local: PathBuf, remote: String },
        Close,
    }

    #[derive(Clone, Default)]
    pub struct MockTransport {
        pub events: Arc<Mutex<Vec<TransportEvent>>>,
        /// (needle, output) pairs; first match wins, otherwise success
        responses: Arc<Mutex<Vec<(String, RemoteOutput)>>>,
        fail_connect: bool,
        fail_copy: bool,
        connected: bool,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_connect(mut self) -> Self {
            self.fail_connect = true;
            self
        }

        pub fn failing_copy(mut self) -> Self {
            self.fail_copy = true;
            self
        }

        /// Answer commands containing `needle` with `output`.
        /// Repeated calls for one needle queue successive answers.
        pub fn respond(self, needle: &str, output: RemoteOutput) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push((needle.to_string(), output));
            self
        }

        pub fn get_events(&self) -> Vec<TransportEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn commands(&self) -> Vec<String> {
            self.get_events()
                .into_iter()
                .filter_map(|e| match e {
                    TransportEvent::Exec(c) => Some(c),
                    _ => None,
                })
                .collect()
        }

        pub fn count(&self, event: &TransportEvent) -> usize {
            self.get_events().iter().filter(|e| *e == event).count()
        }

        fn push(&self, event: TransportEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl RemoteTransport for MockTransport {
        fn host(&self) -> &str {
            "mock@gerrit"
        }

        fn connect(&mut self) -> Result<()> {
            self.push(TransportEvent::Connect);
            if self.fail_connect {
                return Err(TransportError::Auth {
                    host: self.host().to_string(),
                    reason: "Permission denied (publickey)".to_string(),
                });
            }
            self.connected = true;
            Ok(())
        }

        fn exec(&mut self, command: &str) -> Result<RemoteOutput> {
            if !self.connected {
                return Err(TransportError::NotConnected(self.host().to_string()));
            }
            self.push(TransportEvent::Exec(command.to_string()));
            let mut responses = self.responses.lock().unwrap();
            let Some(index) = responses
                .iter()
                .position(|(needle, _)| command.contains(needle.as_str()))
            else {
                return Ok(RemoteOutput::default());
            };
            let needle = responses[index].0.clone();
            let queued = responses.iter().filter(|(n, _)| *n == needle).count();
            // Answers for the same needle are consumed in order; the last one repeats
            if queued > 1 {
                Ok(responses.remove(index).1)
            } else {
                Ok(responses[index].1.clone())
            }
        }

        fn copy_file(&mut self, local: &Path, remote: &str) -> Result<()> {
            if !self.connected {
                return Err(TransportError::NotConnected(self.host().to_string()));
            }
            self.push(TransportEvent::Copy {
                local: local.to_path_buf(),
                remote: remote.to_string(),
            });
            if self.fail_copy {
                return Err(TransportError::Copy {
                    host: self.host().to_string(),
                    local: local.to_path_buf(),
                    remote: remote.to_string(),
                    reason: "No space left on device".to_string(),
                });
            }
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.push(TransportEvent::Close);
            self.connected = false;
            Ok(())
        }
    }
}
