use super::{TaskFinish, TaskRecord, TaskStore};
use crate::jobs::JobStatus;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;

/// Task store kept in process memory, used in demo mode and tests.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<Vec<TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn record_task_start(&self, task: &TaskRecord) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.iter().any(|t| t.id == task.id) {
            bail!("Task {} already exists", task.id);
        }
        tasks.push(task.clone());
        Ok(())
    }

    async fn record_task_finish(&self, task_id: &str, finish: &TaskFinish) -> Result<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks
            .iter_mut()
            .find(|t| t.id == task_id && t.status == JobStatus::Running)
        {
            Some(task) => {
                task.apply_finish(finish);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks.iter().find(|t| t.id == task_id).cloned())
    }

    async fn list_recent_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        let mut tasks = self.tasks.lock().unwrap().clone();
        tasks.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn get_running_tasks(&self) -> Result<Vec<TaskRecord>> {
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks
            .iter()
            .filter(|t| t.status == JobStatus::Running)
            .cloned()
            .collect())
    }

    async fn mark_stale_tasks_failed(&self, reason: &str) -> Result<usize> {
        let mut tasks = self.tasks.lock().unwrap();
        let finish = TaskFinish {
            status: JobStatus::Failed,
            end_time: Utc::now(),
            exit_code: None,
            error: Some(reason.to_string()),
        };
        let mut count = 0;
        for task in tasks.iter_mut().filter(|t| t.status == JobStatus::Running) {
            task.apply_finish(&finish);
            count += 1;
        }
        Ok(count)
    }
}
