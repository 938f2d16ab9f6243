//! `/api/scrape`: full scrape of a city, one run per city.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::jobs::{normalize_city, CityPipeline, PipelineStart};

use super::error::{ApiError, ApiJson, ApiQuery, ApiResult};
use super::state::ServerState;

#[derive(Debug, Deserialize)]
struct ScrapeCommand {
    #[serde(default)]
    city: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeQuery {
    city: Option<String>,
}

fn given_city(city: Option<String>) -> Option<String> {
    city.map(|c| c.trim().to_string()).filter(|c| !c.is_empty())
}

async fn post_scrape(
    State(pipeline): State<CityPipeline>,
    WithRejection(Json(command), _): ApiJson<ScrapeCommand>,
) -> ApiResult<Json<Value>> {
    let city =
        given_city(command.city).ok_or_else(|| ApiError::bad_request("City name is required"))?;
    match pipeline.start(&city)? {
        PipelineStart::Started => Ok(Json(json!({
            "success": true,
            "message": format!("Scraping job started for {}", city),
            "inProgress": true,
        }))),
        PipelineStart::AlreadyRunning => Ok(Json(json!({
            "message": format!("A scraping job is already running for {}", city),
            "inProgress": true,
        }))),
    }
}

async fn get_scrape(
    State(pipeline): State<CityPipeline>,
    WithRejection(Query(query), _): ApiQuery<ScrapeQuery>,
) -> ApiResult<Json<Value>> {
    let city =
        given_city(query.city).ok_or_else(|| ApiError::bad_request("City parameter is required"))?;
    Ok(Json(json!({
        "city": normalize_city(&city),
        "inProgress": pipeline.is_active(&city),
    })))
}

pub(super) fn make_pipeline_routes(state: ServerState) -> Router {
    Router::new()
        .route("/api/scrape", get(get_scrape).post(post_scrape))
        .with_state(state)
}
