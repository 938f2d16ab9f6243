//! `/api/scraper`: starting, stopping and watching the scrapers.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

use crate::jobs::{JobKind, JobManager, JobParams};
use crate::log_tail::clamp_lines;

use super::error::{ApiError, ApiJson, ApiQuery, ApiResult};
use super::state::{GuardedBusinessStore, GuardedLogReader, ServerState};

#[derive(Debug, Deserialize)]
struct ScraperQuery {
    action: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    lines: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScraperCommand {
    action: String,
    #[serde(default)]
    params: Option<Value>,
}

/// `start_gmb_scraper` -> gmb
fn start_action_kind(action: &str) -> Option<JobKind> {
    action
        .strip_prefix("start_")?
        .strip_suffix("_scraper")
        .and_then(JobKind::parse)
}

async fn get_scraper(
    State(job_manager): State<JobManager>,
    State(business_store): State<GuardedBusinessStore>,
    State(log_reader): State<GuardedLogReader>,
    WithRejection(Query(query), _): ApiQuery<ScraperQuery>,
) -> ApiResult<Json<Value>> {
    match query.action.as_deref() {
        Some("status") => {
            let running = job_manager.running_flags().await;
            let jobs = job_manager.snapshot().await;
            let db_stats = match business_store.db_counts().await {
                Ok(counts) => json!(counts),
                Err(e) => {
                    warn!("Could not read database counts: {}", e);
                    json!({ "error": e.to_string() })
                }
            };
            Ok(Json(json!({
                "running": running,
                "jobs": jobs,
                "dbStats": db_stats,
                "timestamp": Utc::now(),
            })))
        }
        Some("logs") => {
            let lines = clamp_lines(query.lines.as_deref().and_then(|l| l.trim().parse().ok()));
            let logs = match query.kind.as_deref().unwrap_or("all") {
                "all" => {
                    let current: HashMap<JobKind, PathBuf> = job_manager
                        .snapshot()
                        .await
                        .into_iter()
                        .map(|job| (job.kind, PathBuf::from(job.log_path)))
                        .collect();
                    log_reader.tail_all(lines, &current).await?
                }
                other => {
                    let kind = JobKind::parse(other)
                        .ok_or_else(|| ApiError::bad_request("Invalid scraper type"))?;
                    let current = job_manager.get(kind).await.map(|job| PathBuf::from(job.log_path));
                    log_reader
                        .tail_for_kind(kind, lines, current.as_deref())
                        .await?
                }
            };
            Ok(Json(json!({ "logs": logs, "timestamp": Utc::now() })))
        }
        _ => Err(ApiError::bad_request("Invalid action")),
    }
}

async fn post_scraper(
    State(job_manager): State<JobManager>,
    WithRejection(Json(command), _): ApiJson<ScraperCommand>,
) -> ApiResult<Json<Value>> {
    if command.action == "stop_scraper" {
        return stop_scraper(&job_manager, command.params).await;
    }

    let kind = start_action_kind(&command.action)
        .ok_or_else(|| ApiError::bad_request("Invalid action"))?;
    let params = JobParams::from_json(kind, command.params)?;
    let job = job_manager.try_start(params).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("{} scraper started", kind.display_name()),
        "taskId": job.task_id,
        "pid": job.pid,
        "params": job.params,
    })))
}

async fn stop_scraper(job_manager: &JobManager, params: Option<Value>) -> ApiResult<Json<Value>> {
    let requested = params
        .as_ref()
        .and_then(|p| p.get("type"))
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::bad_request("Missing scraper type"))?;

    if requested == "all" {
        let stopped = job_manager.stop_all().await?;
        let kinds: Vec<JobKind> = stopped.iter().map(|job| job.snapshot.kind).collect();
        let message = if kinds.is_empty() {
            "No scrapers were running".to_string()
        } else {
            format!("Stopped {} scraper(s)", kinds.len())
        };
        return Ok(Json(json!({
            "success": true,
            "message": message,
            "stopped": kinds,
        })));
    }

    let kind =
        JobKind::parse(requested).ok_or_else(|| ApiError::bad_request("Invalid scraper type"))?;
    let stopped = job_manager.stop(kind).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("{} scraper stopped", kind.display_name()),
        "task": stopped,
    })))
}

pub(super) fn make_scraper_routes(state: ServerState) -> Router {
    Router::new()
        .route("/api/scraper", get(get_scraper).post(post_scraper))
        .with_state(state)
}
