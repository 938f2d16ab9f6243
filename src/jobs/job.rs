use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The three external scrapers this server knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Postcode,
    Gmb,
    Email,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Postcode, JobKind::Gmb, JobKind::Email];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Postcode => "postcode",
            JobKind::Gmb => "gmb",
            JobKind::Email => "email",
        }
    }

    /// Accepts both the singular names and the plural aliases older clients send.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "postcode" | "postcodes" => Some(JobKind::Postcode),
            "gmb" => Some(JobKind::Gmb),
            "email" | "emails" => Some(JobKind::Email),
            _ => None,
        }
    }

    pub fn default_script(&self) -> &'static str {
        match self {
            JobKind::Postcode => "postcodesscraper.py",
            JobKind::Gmb => "gmbscraper.py",
            JobKind::Email => "emailsdcraper.py",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            JobKind::Postcode => "Postcode",
            JobKind::Gmb => "GMB",
            JobKind::Email => "Email",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a launched scraper: `running -> {completed | failed | cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Errors returned by the job manager.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{} scraper is already running", .0.display_name())]
    AlreadyRunning(JobKind),

    #[error("{} scraper is not running", .0.display_name())]
    NotRunning(JobKind),

    #[error("Task {0} is not running")]
    TaskNotRunning(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Failed to start {kind} scraper: {source}")]
    Spawn {
        kind: JobKind,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("Job watcher failed: {0}")]
    Watcher(String),
}
