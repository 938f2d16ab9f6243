use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::log_tail::clamp_lines;

use super::error::{ApiQuery, ApiResult};
use super::state::{GuardedLogReader, ServerState};

#[derive(Debug, Deserialize)]
struct LogsQuery {
    path: Option<String>,
    lines: Option<String>,
}

/// Lists log files, or tails one when `path` is given.
async fn get_logs(
    State(log_reader): State<GuardedLogReader>,
    WithRejection(Query(query), _): ApiQuery<LogsQuery>,
) -> ApiResult<Json<Value>> {
    match query.path.as_deref().filter(|p| !p.trim().is_empty()) {
        None => {
            let files = log_reader.list_files().await?;
            Ok(Json(json!({ "success": true, "files": files })))
        }
        Some(path) => {
            let lines = clamp_lines(query.lines.as_deref().and_then(|l| l.trim().parse().ok()));
            let tail = log_reader.read_file(path, lines).await?;
            Ok(Json(json!({
                "success": true,
                "content": tail.content,
                "totalLines": tail.total_lines,
            })))
        }
    }
}

pub(super) fn make_log_routes(state: ServerState) -> Router {
    Router::new()
        .route("/api/logs", get(get_logs))
        .with_state(state)
}
