//! Job domain types

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised when a job description is not runnable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("job {0} has an empty repository url")]
    MissingRepository(u64),

    #[error("job {0} has an empty target reference")]
    MissingRef(u64),

    #[error("job {0} has a zero timeout")]
    ZeroTimeout(u64),
}

/// A single CI job
///
/// Immutable description of the work. Run state (lifecycle, trace) lives
/// in the runner for the duration of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub project_id: u64,
    pub repo_url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub ref_name: Option<String>,
    #[serde(default)]
    pub before_sha: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub opts: JobOptions,
    /// Timeout override in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Per-job execution options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Run user commands inside a container image chain instead of on the host
    #[serde(default)]
    pub use_docker: bool,

    /// Reuse an existing checkout via `git fetch` instead of a fresh clone
    #[serde(default)]
    pub allow_git_fetch: bool,
}

impl Job {
    /// Creates a bare-mode job with no options set
    pub fn new(
        id: u64,
        project_id: u64,
        repo_url: impl Into<String>,
        git_ref: impl Into<String>,
        commands: Vec<String>,
    ) -> Self {
        Self {
            id,
            project_id,
            repo_url: repo_url.into(),
            git_ref: git_ref.into(),
            ref_name: None,
            before_sha: None,
            commands,
            opts: JobOptions::default(),
            timeout: None,
        }
    }

    pub fn with_docker(mut self) -> Self {
        self.opts.use_docker = true;
        self
    }

    pub fn with_git_fetch(mut self) -> Self {
        self.opts.allow_git_fetch = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.as_secs());
        self
    }

    /// Effective timeout, falling back to the runner default
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.map(Duration::from_secs).unwrap_or(default)
    }

    /// Name of the directory the project is checked out into
    pub fn project_dir_name(&self) -> String {
        format!("project-{}", self.project_id)
    }

    /// Checks that the job can be run at all
    pub fn validate(&self) -> Result<(), JobError> {
        if self.repo_url.trim().is_empty() {
            return Err(JobError::MissingRepository(self.id));
        }
        if self.git_ref.trim().is_empty() {
            return Err(JobError::MissingRef(self.id));
        }
        if self.timeout == Some(0) {
            return Err(JobError::ZeroTimeout(self.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Job {
        Job::new(9312, 7, "https://example.com/repo.git", "2e008a7", vec!["make".into()])
    }

    #[test]
    fn test_deserialize_job_record() {
        let job: Job = serde_json::from_value(serde_json::json!({
            "id": 9313,
            "project_id": 1,
            "repo_url": "https://example.com/coderunner",
            "ref": "11e6cc68",
            "ref_name": "master",
            "commands": ["echo hello world"],
            "opts": { "use_docker": true }
        }))
        .unwrap();

        assert_eq!(job.git_ref, "11e6cc68");
        assert_eq!(job.ref_name.as_deref(), Some("master"));
        assert!(job.opts.use_docker);
        assert!(!job.opts.allow_git_fetch);
        assert_eq!(job.before_sha, None);
        assert_eq!(job.timeout, None);
    }

    #[test]
    fn test_timeout_override() {
        let default = Duration::from_secs(7200);
        assert_eq!(sample().timeout_or(default), default);

        let job = sample().with_timeout(Duration::from_secs(30));
        assert_eq!(job.timeout_or(default), Duration::from_secs(30));
    }

    #[test]
    fn test_validate() {
        assert!(sample().validate().is_ok());

        let mut job = sample();
        job.repo_url = " ".to_string();
        assert_eq!(job.validate(), Err(JobError::MissingRepository(9312)));

        let mut job = sample();
        job.git_ref = String::new();
        assert_eq!(job.validate(), Err(JobError::MissingRef(9312)));

        let mut job = sample();
        job.timeout = Some(0);
        assert_eq!(job.validate(), Err(JobError::ZeroTimeout(9312)));
    }

    #[test]
    fn test_project_dir_name() {
        assert_eq!(sample().project_dir_name(), "project-7");
    }
}
