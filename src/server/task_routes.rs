//! Task history routes.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::jobs::{JobManager, JobStatus};
use crate::task_store::RECENT_TASKS_LIMIT;

use super::error::{ApiError, ApiResult};
use super::state::{GuardedTaskStore, ServerState};

async fn list_tasks(State(task_store): State<GuardedTaskStore>) -> ApiResult<Json<Value>> {
    let tasks = task_store.list_recent_tasks(RECENT_TASKS_LIMIT).await?;
    Ok(Json(json!({ "tasks": tasks })))
}

async fn get_task(
    State(task_store): State<GuardedTaskStore>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    match task_store.get_task(&id).await? {
        Some(task) => Ok(Json(json!({ "task": task }))),
        None => Err(ApiError::not_found("Task not found")),
    }
}

async fn cancel_task(
    State(task_store): State<GuardedTaskStore>,
    State(job_manager): State<JobManager>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let task = task_store
        .get_task(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Task not found"))?;
    if task.status != JobStatus::Running {
        return Err(ApiError::bad_request(format!(
            "Task is not running (status: {})",
            task.status.as_str()
        )));
    }

    job_manager.stop_task(&id).await?;

    let task = task_store
        .get_task(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Task not found"))?;
    Ok(Json(json!({
        "success": true,
        "message": "Task cancelled",
        "task": task,
    })))
}

pub(super) fn make_task_routes(state: ServerState) -> Router {
    Router::new()
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .with_state(state)
}
