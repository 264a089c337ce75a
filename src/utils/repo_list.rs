//! Repository list files: one repository identifier per line

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path};

/// Parse list contents. Blank lines and `#` comments are skipped.
pub fn parse_repo_list_str(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Read a list file, rejecting identifiers that would resolve outside the site
pub fn parse_repo_list(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read repository list {:?}", path))?;
    let repos = parse_repo_list_str(&contents);
    for repo in &repos {
        check_repo_id(repo).with_context(|| format!("Invalid repository list {:?}", path))?;
    }
    Ok(repos)
}

/// Identifiers must be relative paths made only of normal components
pub fn check_repo_id(repo: &str) -> Result<()> {
    let mut components = Path::new(repo).components().peekable();
    if components.peek().is_none() {
        bail!("Empty repository identifier");
    }
    if !components.all(|c| matches!(c, Component::Normal(_))) {
        bail!("Repository identifier {:?} must be a relative path without '..'", repo);
    }
    Ok(())
}

/// Union of several lists without duplicates, in first-seen order
pub fn merge_repo_lists<I, L>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = L>,
    L: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for repo in lists.into_iter().flatten() {
        if seen.insert(repo.clone()) {
            merged.push(repo);
        }
    }
    merged
}

/// Write a sorted list, one identifier per line
pub fn write_repo_list(path: &Path, repos: &[String]) -> Result<()> {
    let mut sorted = repos.to_vec();
    sorted.sort();
    sorted.dedup();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }

    let mut contents = sorted.join("\n");
    contents.push('\n');
    fs::write(path, contents)
        .with_context(|| format!("Failed to write repository list {:?}", path))
}
