use super::{TaskFinish, TaskRecord, TaskStore};
use crate::jobs::{JobKind, JobStatus};
use crate::server::metrics;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bson::{doc, Bson};
use futures::TryStreamExt;
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Shape of a task in the `tasks` collection.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    status: String,
    start_time: bson::DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_time: Option<bson::DateTime>,
    #[serde(default)]
    log_path: String,
    #[serde(default)]
    params: Bson,
    #[serde(default)]
    pid: Option<i64>,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    error: Option<String>,
}

impl TaskDocument {
    const COLLECTION: &'static str = "tasks";

    fn from_record(task: &TaskRecord) -> Result<Self> {
        Ok(Self {
            id: task.id.clone(),
            kind: task.kind.as_str().to_string(),
            status: task.status.as_str().to_string(),
            start_time: bson::DateTime::from_chrono(task.start_time),
            end_time: task.end_time.map(bson::DateTime::from_chrono),
            log_path: task.log_path.clone(),
            params: bson::to_bson(&task.params).context("Failed to encode task params")?,
            pid: task.pid.map(i64::from),
            exit_code: task.exit_code,
            error: task.error.clone(),
        })
    }

    fn into_record(self) -> Result<TaskRecord> {
        let kind = JobKind::parse(&self.kind)
            .ok_or_else(|| anyhow!("Task {} has unknown type {:?}", self.id, self.kind))?;
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("Task {} has unknown status {:?}", self.id, self.status))?;
        Ok(TaskRecord {
            id: self.id,
            kind,
            status,
            start_time: self.start_time.to_chrono(),
            end_time: self.end_time.map(|t| t.to_chrono()),
            log_path: self.log_path,
            params: self.params.into_relaxed_extjson(),
            pid: self.pid.and_then(|p| u32::try_from(p).ok()),
            exit_code: self.exit_code,
            error: self.error,
        })
    }
}

/// Task history persisted in MongoDB (`<tasks_db>.tasks`).
pub struct MongoTaskStore {
    tasks: Collection<TaskDocument>,
}

impl MongoTaskStore {
    pub fn new(client: &Client, db_name: &str) -> Self {
        Self {
            tasks: client
                .database(db_name)
                .collection::<TaskDocument>(TaskDocument::COLLECTION),
        }
    }

    async fn collect(&self, cursor: mongodb::Cursor<TaskDocument>) -> Result<Vec<TaskRecord>> {
        let docs: Vec<TaskDocument> = cursor.try_collect().await?;
        docs.into_iter().map(TaskDocument::into_record).collect()
    }
}

#[async_trait]
impl TaskStore for MongoTaskStore {
    async fn record_task_start(&self, task: &TaskRecord) -> Result<()> {
        let start = Instant::now();
        let doc = TaskDocument::from_record(task)?;
        self.tasks
            .insert_one(doc)
            .await
            .with_context(|| format!("Failed to record start of task {}", task.id))?;
        metrics::record_db_query("task_insert", start.elapsed());
        Ok(())
    }

    async fn record_task_finish(&self, task_id: &str, finish: &TaskFinish) -> Result<bool> {
        let start = Instant::now();
        let mut set = doc! {
            "status": finish.status.as_str(),
            "endTime": bson::DateTime::from_chrono(finish.end_time),
        };
        if let Some(code) = finish.exit_code {
            set.insert("exitCode", code);
        }
        if let Some(error) = &finish.error {
            set.insert("error", error.as_str());
        }
        let result = self
            .tasks
            .update_one(
                doc! { "_id": task_id, "status": JobStatus::Running.as_str() },
                doc! { "$set": set },
            )
            .await
            .with_context(|| format!("Failed to record finish of task {}", task_id))?;
        metrics::record_db_query("task_update", start.elapsed());
        Ok(result.modified_count > 0)
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let start = Instant::now();
        let doc = self.tasks.find_one(doc! { "_id": task_id }).await?;
        metrics::record_db_query("task_get", start.elapsed());
        doc.map(TaskDocument::into_record).transpose()
    }

    async fn list_recent_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        let start = Instant::now();
        let cursor = self
            .tasks
            .find(doc! {})
            .sort(doc! { "startTime": -1 })
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await?;
        let tasks = self.collect(cursor).await?;
        metrics::record_db_query("task_list", start.elapsed());
        Ok(tasks)
    }

    async fn get_running_tasks(&self) -> Result<Vec<TaskRecord>> {
        let cursor = self
            .tasks
            .find(doc! { "status": JobStatus::Running.as_str() })
            .await?;
        self.collect(cursor).await
    }

    async fn mark_stale_tasks_failed(&self, reason: &str) -> Result<usize> {
        let result = self
            .tasks
            .update_many(
                doc! { "status": JobStatus::Running.as_str() },
                doc! { "$set": {
                    "status": JobStatus::Failed.as_str(),
                    "endTime": bson::DateTime::now(),
                    "error": reason,
                } },
            )
            .await?;
        Ok(result.modified_count as usize)
    }
}
