//! Jenkins job control over the HTTP API
//!
//! Used by the `stop_job` / `start_job` task rules. Disabling a job waits for
//! the build that was running at that moment to finish.

use chrono::{Local, TimeZone};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum JobControlError {
    #[error("Jenkins request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("Timed out after {waited:?} waiting for Jenkins job '{job}' to finish")]
    Timeout { job: String, waited: Duration },

    #[error("Jenkins job '{job}' build #{number} finished with FAILURE; fix the job before trying again")]
    BuildFailed { job: String, number: u64 },
}

pub type Result<T> = std::result::Result<T, JobControlError>;

/// Subset of `job/<name>/lastBuild/api/json`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BuildStatus {
    pub number: u64,
    #[serde(default)]
    pub building: bool,
    #[serde(default)]
    pub result: Option<String>,
    /// Start time, milliseconds since the epoch
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, rename = "estimatedDuration")]
    pub estimated_duration: i64,
}

impl BuildStatus {
    pub fn failed(&self) -> bool {
        self.result.as_deref() == Some("FAILURE")
    }
}

/// Abstraction over the CI controller, enabling mocking in tests
pub trait JobController: Send + Sync {
    fn disable_job(&self, base_url: &str, job: &str) -> Result<()>;
    fn enable_job(&self, base_url: &str, job: &str) -> Result<()>;
    /// `None` when the job has never been built
    fn last_build(&self, base_url: &str, job: &str) -> Result<Option<BuildStatus>>;
}

fn job_url(base_url: &str, job: &str, task: &str) -> String {
    format!("{}/job/{}/{}", base_url.trim_end_matches('/'), job, task)
}

/// Real client using blocking reqwest
pub struct JenkinsClient {
    client: reqwest::blocking::Client,
    username: Option<String>,
    api_token: Option<String>,
}

impl JenkinsClient {
    pub fn new(username: Option<String>, api_token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            username,
            api_token,
        })
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match self.username {
            Some(ref user) => request.basic_auth(user, self.api_token.as_ref()),
            None => request,
        }
    }

    fn post(&self, url: String) -> Result<()> {
        debug!("POST {}", url);
        let response = self
            .authorize(self.client.post(&url))
            .send()
            .map_err(|e| JobControlError::Http {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(JobControlError::Http {
                url,
                reason: format!("HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}

impl JobController for JenkinsClient {
    fn disable_job(&self, base_url: &str, job: &str) -> Result<()> {
        info!("Disabling Jenkins job '{}'", job);
        self.post(job_url(base_url, job, "disable"))
    }

    fn enable_job(&self, base_url: &str, job: &str) -> Result<()> {
        info!("Enabling Jenkins job '{}'", job);
        self.post(job_url(base_url, job, "enable"))
    }

    fn last_build(&self, base_url: &str, job: &str) -> Result<Option<BuildStatus>> {
        let url = job_url(base_url, job, "lastBuild/api/json");
        let http_err = |reason: String| JobControlError::Http {
            url: url.clone(),
            reason,
        };

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .map_err(|e| http_err(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(http_err(format!("HTTP {}", response.status())));
        }

        response
            .json::<BuildStatus>()
            .map(Some)
            .map_err(|e| http_err(e.to_string()))
    }
}

/// Disable `job`, then poll until the build that was running has stopped
///
/// Fails with [`JobControlError::BuildFailed`] when that build ends in `FAILURE`
/// and with [`JobControlError::Timeout`] when it is still building after `timeout`.
pub fn disable_job_and_wait(
    controller: &dyn JobController,
    base_url: &str,
    job: &str,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<Option<BuildStatus>> {
    controller.disable_job(base_url, job)?;

    let Some(mut data) = controller.last_build(base_url, job)? else {
        info!("Jenkins job '{}' has no builds", job);
        return Ok(None);
    };

    let current = data.number;
    if let Some(started) = Local.timestamp_millis_opt(data.timestamp).single() {
        info!("Job started at: {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    let start = Instant::now();
    while data.building && data.number == current {
        let waited = start.elapsed();
        if waited >= timeout {
            return Err(JobControlError::Timeout {
                job: job.to_string(),
                waited,
            });
        }

        let running_ms = chrono::Utc::now().timestamp_millis() - data.timestamp;
        if data.estimated_duration > 0 {
            info!(
                "Building: #{} {}s {:.2}%",
                data.number,
                running_ms / 1000,
                running_ms as f64 / data.estimated_duration as f64 * 100.0
            );
        } else {
            info!("Building: #{} {}s", data.number, running_ms / 1000);
        }

        std::thread::sleep(poll_interval);

        match controller.last_build(base_url, job)? {
            Some(next) => data = next,
            None => {
                warn!("Jenkins job '{}' lost its last build while waiting", job);
                break;
            }
        }
    }

    info!(
        "Jenkins job '{}' build #{} result: {}",
        job,
        data.number,
        data.result.as_deref().unwrap_or("UNKNOWN")
    );

    if data.failed() {
        return Err(JobControlError::BuildFailed {
            job: job.to_string(),
            number: data.number,
        });
    }

    Ok(Some(data))
}

/// A mock job controller for testing
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Recorded call, e.g. `disable verify-job`
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct JobCall {
        pub operation: String,
        pub base_url: String,
        pub job: String,
    }

    #[derive(Clone, Default)]
    pub struct MockJobController {
        pub calls: Arc<Mutex<Vec<JobCall>>>,
        /// Successive `last_build` answers; the final one repeats
        builds: Arc<Mutex<VecDeque<Option<BuildStatus>>>>,
        fail_requests: bool,
    }

    impl MockJobController {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_builds(self, builds: Vec<Option<BuildStatus>>) -> Self {
            *self.builds.lock().unwrap() = builds.into();
            self
        }

        /// Every request fails with an HTTP error
        pub fn unreachable(mut self) -> Self {
            self.fail_requests = true;
            self
        }

        pub fn get_calls(&self) -> Vec<JobCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn operations(&self) -> Vec<String> {
            self.get_calls()
                .into_iter()
                .map(|c| format!("{} {}", c.operation, c.job))
                .collect()
        }

        fn record(&self, operation: &str, base_url: &str, job: &str) -> Result<()> {
            self.calls.lock().unwrap().push(JobCall {
                operation: operation.to_string(),
                base_url: base_url.to_string(),
                job: job.to_string(),
            });
            if self.fail_requests {
                return Err(JobControlError::Http {
                    url: job_url(base_url, job, operation),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(())
        }
    }

    impl JobController for MockJobController {
        fn disable_job(&self, base_url: &str, job: &str) -> Result<()> {
            self.record("disable", base_url, job)
        }

        fn enable_job(&self, base_url: &str, job: &str) -> Result<()> {
            self.record("enable", base_url, job)
        }

        fn last_build(&self, base_url: &str, job: &str) -> Result<Option<BuildStatus>> {
            self.record("last_build", base_url, job)?;
            let mut builds = self.builds.lock().unwrap();
            if builds.len() > 1 {
                Ok(builds.pop_front().flatten())
            } else {
                Ok(builds.front().cloned().flatten())
            }
        }
    }

    pub fn build(number: u64, building: bool, result: Option<&str>) -> BuildStatus {
        BuildStatus {
            number,
            building,
            result: result.map(str::to_string),
            timestamp: chrono::Utc::now().timestamp_millis(),
            estimated_duration: 60_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    const URL: &str = "https://ci.example.com/";

    #[test]
    fn test_job_url() {
        assert_eq!(
            job_url(URL, "verify", "lastBuild/api/json"),
            "https://ci.example.com/job/verify/lastBuild/api/json"
        );
    }

    #[test]
    fn test_build_status_parse() {
        let json = r#"{"number": 42, "building": false, "result": "SUCCESS",
                       "timestamp": 1700000000000, "estimatedDuration": 120000, "url": "x"}"#;
        let status: BuildStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.number, 42);
        assert_eq!(status.estimated_duration, 120_000);
        assert!(!status.failed());
    }

    #[test]
    fn test_waits_until_build_finishes() {
        let controller = MockJobController::new().with_builds(vec![
            Some(build(7, true, None)),
            Some(build(7, true, None)),
            Some(build(7, false, Some("SUCCESS"))),
        ]);

        let last = disable_job_and_wait(&controller, URL, "verify", Duration::ZERO, Duration::from_secs(5))
            .unwrap()
            .unwrap();

        assert_eq!(last.result.as_deref(), Some("SUCCESS"));
        assert_eq!(controller.operations()[0], "disable verify");
        assert_eq!(
            controller.operations().iter().filter(|o| o.starts_with("last_build")).count(),
            3
        );
    }

    #[test]
    fn test_new_build_number_stops_waiting() {
        let controller = MockJobController::new().with_builds(vec![
            Some(build(7, true, None)),
            Some(build(8, true, None)),
        ]);

        let last = disable_job_and_wait(&controller, URL, "verify", Duration::ZERO, Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(last.number, 8);
    }

    #[test]
    fn test_failure_result_is_error() {
        let controller =
            MockJobController::new().with_builds(vec![Some(build(3, false, Some("FAILURE")))]);

        let err = disable_job_and_wait(&controller, URL, "verify", Duration::ZERO, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, JobControlError::BuildFailed { number: 3, .. }));
    }

    #[test]
    fn test_timeout() {
        let controller = MockJobController::new().with_builds(vec![Some(build(3, true, None))]);

        let err = disable_job_and_wait(&controller, URL, "verify", Duration::from_millis(5), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, JobControlError::Timeout { .. }));
    }

    #[test]
    fn test_never_built_job() {
        let controller = MockJobController::new();
        let result =
            disable_job_and_wait(&controller, URL, "fresh", Duration::ZERO, Duration::from_secs(1)).unwrap();
        assert!(result.is_none());
    }
}
