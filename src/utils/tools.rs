//! Presence checks for the external tools a command needs

use crate::context::Action;

/// Tools a local run of `action` shells out to
pub fn required_tools(action: Action) -> Vec<&'static str> {
    let mut tools = Vec::new();
    if action.backs_up_database() || action.backs_up_repos() || action.restores_database() || action.restores_repos() {
        tools.push("tar");
    }
    if action.backs_up_database() {
        tools.push("mysqldump");
    }
    if action.restores_database() {
        tools.push("mysql");
    }
    if action == Action::DiskUsage {
        tools.push("du");
    }
    tools
}

/// Tools for a remote run driven from this host (`screen` runs remotely)
pub fn remote_tools() -> Vec<&'static str> {
    vec!["ssh", "scp"]
}

/// Names from `tools` that are not on `PATH`
pub fn missing_tools(tools: &[&str]) -> Vec<String> {
    tools
        .iter()
        .filter(|tool| which::which(tool).is_err())
        .map(|tool| tool.to_string())
        .collect()
}
