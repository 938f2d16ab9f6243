use crate::jobs::{JobKind, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record of one scraper run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub log_path: String,
    pub params: serde_json::Value,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

/// Terminal transition applied to a running task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFinish {
    pub status: JobStatus,
    pub end_time: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn apply_finish(&mut self, finish: &TaskFinish) {
        self.status = finish.status;
        self.end_time = Some(finish.end_time);
        self.exit_code = finish.exit_code;
        self.error = finish.error.clone();
    }
}
