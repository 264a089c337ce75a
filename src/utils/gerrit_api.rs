//! Gerrit REST API client for building the repository list

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tracing::{debug, info};

const MAGIC_PREFIX: &str = ")]}'";

/// Project names from a `/projects/` response body
pub fn parse_projects_response(body: &str) -> Result<Vec<String>> {
    let body = body.trim_start();
    let json = body.strip_prefix(MAGIC_PREFIX).unwrap_or(body);
    let projects: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(json).context("Gerrit API returned invalid JSON")?;
    Ok(projects.into_iter().map(|(name, _)| name).collect())
}

pub struct GerritApi {
    url: String,
    client: reqwest::blocking::Client,
}

impl GerritApi {
    pub fn new(url: &str, verify_ssl: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn projects_url(&self) -> String {
        format!("{}/projects/?t", self.url)
    }

    /// Every project visible to the API
    pub fn fetch_projects(&self) -> Result<Vec<String>> {
        let url = self.projects_url();
        info!("Getting Gerrit repositories via API");
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("Gerrit API request to {} failed", url))?;

        if response.status() != reqwest::StatusCode::OK {
            bail!("Gerrit API returned {} for {}", response.status(), url);
        }

        let body = response.text().context("Failed to read Gerrit API response")?;
        let projects = parse_projects_response(&body)?;
        info!("Repo count: {}", projects.len());
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_magic_prefix() {
        let body = ")]}'\n{\"All-Projects\":{\"id\":\"All-Projects\"},\"teamA/app\":{\"id\":\"teamA%2Fapp\"}}";
        let mut projects = parse_projects_response(body).unwrap();
        projects.sort();
        assert_eq!(projects, vec!["All-Projects", "teamA/app"]);
    }

    #[test]
    fn test_parse_without_prefix() {
        assert_eq!(parse_projects_response("{\"x\":{}}").unwrap(), vec!["x"]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_projects_response(")]}'\n<html>").is_err());
    }

    #[test]
    fn test_projects_url() {
        let api = GerritApi::new("https://review.example.com/", true).unwrap();
        assert_eq!(api.projects_url(), "https://review.example.com/projects/?t");
    }
}
