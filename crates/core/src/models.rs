use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Logs are cut to this many characters before analysis and storage.
pub const MAX_LOG_CHARS: usize = 30_000;

/// Conclusion of a workflow run or job as reported by GitHub.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
    Stale,
    StartupFailure,
    #[serde(other)]
    Unknown,
}

/// Payload of a `workflow_run` webhook delivery. Only the fields we consume are modeled.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunEvent {
    pub action: String,
    pub workflow_run: WorkflowRun,
    pub repository: EventRepository,
    #[serde(default)]
    pub installation: Option<EventInstallation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub conclusion: Option<Conclusion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRepository {
    pub id: u64,
    pub full_name: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EventInstallation {
    pub id: u64,
}

/// Owner and name of a repository, split from `owner/repo`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn from_full_name(full_name: &str) -> Option<Self> {
        let (owner, repo) = full_name.split_once('/')?;
        if owner.is_empty() || repo.is_empty() {
            return None;
        }
        Some(Self { owner: owner.to_string(), repo: repo.to_string() })
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub conclusion: Option<Conclusion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobList {
    pub total_count: u64,
    pub jobs: Vec<Job>,
}

/// Root cause and suggested fix as produced by the model.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct AnalysisResult {
    pub conclusion: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    #[default]
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
        }
    }
}

impl FromStr for AnalysisStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A stored analysis. Created once per analyzed job, never updated.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: u64,
    pub repo_id: u64,
    pub repo_full_name: String,
    pub github_run_id: u64,
    pub status: AnalysisStatus,
    pub conclusion: String,
    pub suggestion: String,
    pub raw_log: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Record contents before the store assigns `id` and `created_at`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewAnalysisRecord {
    pub repo_id: u64,
    pub repo_full_name: String,
    pub github_run_id: u64,
    pub status: AnalysisStatus,
    pub conclusion: String,
    pub suggestion: String,
    pub raw_log: String,
}

impl NewAnalysisRecord {
    pub fn into_record(self, id: u64, created_at: OffsetDateTime) -> AnalysisRecord {
        AnalysisRecord {
            id,
            repo_id: self.repo_id,
            repo_full_name: self.repo_full_name,
            github_run_id: self.github_run_id,
            status: self.status,
            conclusion: self.conclusion,
            suggestion: self.suggestion,
            raw_log: self.raw_log,
            created_at,
        }
    }
}
