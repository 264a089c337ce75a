//! Detached GNU `screen` sessions on the remote host
//!
//! A long remote run is typed into a named screen session and left detached,
//! so it survives the SSH session closing.

use crate::utils::format::shell_quote;
use crate::utils::ssh::RemoteTransport;
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// One entry of `screen -ls`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenInfo {
    /// `<pid>.<name>`
    pub id: String,
    pub time: String,
    pub state: String,
}

/// Parse `screen -ls`. Session lines are tab-indented; everything else is ignored.
pub fn parse_screen_ls(output: &str) -> Vec<ScreenInfo> {
    output
        .lines()
        .filter(|line| line.starts_with('\t'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.trim().split('\t').collect();
            let id = fields.first()?.trim();
            if id.is_empty() {
                return None;
            }
            let strip = |s: Option<&&str>| {
                s.map(|v| v.trim().trim_start_matches('(').trim_end_matches(')').to_string())
                    .unwrap_or_default()
            };
            // Older screen versions print only the state
            let (time, state) = match fields.len() {
                0 | 1 => (String::new(), String::new()),
                2 => (String::new(), strip(fields.get(1))),
                _ => (strip(fields.get(1)), strip(fields.get(2))),
            };
            Some(ScreenInfo {
                id: id.to_string(),
                time,
                state,
            })
        })
        .collect()
}

pub struct ScreenSession {
    name: String,
    id: Option<String>,
    pause: Duration,
}

impl ScreenSession {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: None,
            pause: Duration::from_secs(1),
        }
    }

    /// Delay after each injected command; screen needs a moment to process input
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// All sessions on the remote host, keyed by id
    pub fn list(transport: &mut dyn RemoteTransport) -> Result<HashMap<String, ScreenInfo>> {
        // `screen -ls` exits non-zero when it prints sessions, so the exit code is ignored
        let output = transport.exec("screen -ls")?;
        Ok(parse_screen_ls(&output.stdout)
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect())
    }

    /// Start a detached session and learn its id by diffing `screen -ls`
    pub fn create(&mut self, transport: &mut dyn RemoteTransport) -> Result<String> {
        let before = Self::list(transport)?;

        let output = transport.exec(&format!("screen -dmU {}", shell_quote(&self.name)))?;
        if !output.success() {
            bail!(
                "Failed to start screen session '{}': {}",
                self.name,
                output.stderr.trim()
            );
        }

        let after = Self::list(transport)?;
        let mut created: Vec<String> = after
            .into_keys()
            .filter(|id| !before.contains_key(id))
            .collect();

        if created.len() != 1 {
            bail!(
                "Expected one new screen session named '{}', found {}",
                self.name,
                created.len()
            );
        }

        let id = created.remove(0);
        info!("Created screen session {}", id);
        self.id = Some(id.clone());
        Ok(id)
    }

    fn session_command(&self, command: &str) -> Result<String> {
        let id = self
            .id
            .as_deref()
            .context("Screen session has not been created")?;
        Ok(format!("screen -x {} -X {}", shell_quote(id), command))
    }

    fn run(&self, transport: &mut dyn RemoteTransport, command: &str) -> Result<()> {
        let line = self.session_command(command)?;
        let output = transport.exec(&line)?;
        if !output.success() {
            bail!("screen command failed: {}", output.stderr.trim());
        }
        if !self.pause.is_zero() {
            std::thread::sleep(self.pause);
        }
        Ok(())
    }

    /// Type `text` into the session without pressing Enter
    pub fn send_text(&self, transport: &mut dyn RemoteTransport, text: &str) -> Result<()> {
        self.run(transport, &format!("stuff {}", shell_quote(text)))
    }

    /// Press Enter (keypad enter, `\015`)
    pub fn press_enter(&self, transport: &mut dyn RemoteTransport) -> Result<()> {
        self.run(transport, r#"eval "stuff \015""#)
    }

    /// Create the session if needed, type `command` and leave it running detached
    pub fn run_detached(&mut self, transport: &mut dyn RemoteTransport, command: &str) -> Result<String> {
        if self.id.is_none() {
            self.create(transport)?;
        }
        self.send_text(transport, command)?;
        self.press_enter(transport)?;

        let id = self.id.clone().unwrap_or_default();
        info!(
            "Command running in screen session {}; attach with `screen -r {}`",
            id, id
        );
        Ok(id)
    }

    pub fn exists(&self, transport: &mut dyn RemoteTransport) -> Result<bool> {
        match self.id {
            Some(ref id) => Ok(Self::list(transport)?.contains_key(id)),
            None => {
                warn!("Screen session '{}' was never created", self.name);
                Ok(false)
            }
        }
    }

    pub fn quit(&mut self, transport: &mut dyn RemoteTransport) -> Result<()> {
        self.run(transport, "quit")?;
        self.id = None;
        Ok(())
    }
}
