//! `/api/data`: listings, statistics, exports and maintenance actions.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::business_store::{BusinessQuery, SubsectorFilter, DEFAULT_PAGE_SIZE};
use crate::export::{ExportData, ExportFormat, ExportKind};

use super::error::{ApiError, ApiJson, ApiQuery, ApiResult};
use super::state::{GuardedBusinessStore, GuardedExportWriter, ServerState};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataQuery {
    action: Option<String>,
    page: Option<String>,
    limit: Option<String>,
    subsector: Option<String>,
    email_status: Option<String>,
    search: Option<String>,
    status: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataCommand {
    action: String,
    #[serde(default)]
    params: Option<Map<String, Value>>,
}

/// Lenient numeric query parameter: anything unparsable falls back to `default`.
pub(super) fn number_param(value: Option<&str>, default: u64) -> u64 {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub(super) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn get_data(
    State(business_store): State<GuardedBusinessStore>,
    State(export_writer): State<GuardedExportWriter>,
    WithRejection(Query(query), _): ApiQuery<DataQuery>,
) -> ApiResult<Json<Value>> {
    match query.action.as_deref() {
        Some("businesses") => {
            let business_query = BusinessQuery {
                search: non_blank(query.search),
                page: number_param(query.page.as_deref(), 1),
                limit: number_param(query.limit.as_deref(), DEFAULT_PAGE_SIZE),
                subsector: non_blank(query.subsector),
                email_status: non_blank(query.email_status),
                ..Default::default()
            };
            let page = business_store.find_businesses(&business_query).await?;
            Ok(Json(json!({
                "businesses": page.businesses,
                "pagination": {
                    "page": business_query.page(),
                    "limit": business_query.limit(),
                    "total": page.total,
                    "pages": business_query.pages(page.total),
                },
            })))
        }
        Some("subsectors") => {
            let filter = SubsectorFilter::parse(query.status.as_deref().unwrap_or("all"))
                .ok_or_else(|| ApiError::bad_request("Invalid status filter"))?;
            let subsectors = business_store.list_subsectors(filter).await?;
            Ok(Json(json!({ "subsectors": subsectors })))
        }
        Some("stats") => {
            let stats = business_store.stats().await?;
            Ok(Json(json!({ "stats": stats })))
        }
        Some("export") => {
            let kind = ExportKind::parse(query.kind.as_deref().unwrap_or_default())?;
            let format = ExportFormat::parse(query.format.as_deref().unwrap_or("json"))?;
            let subsector = non_blank(query.subsector);

            let data = match kind {
                ExportKind::Businesses => ExportData::Businesses(
                    business_store
                        .find_all(&BusinessQuery {
                            subsector: subsector.clone(),
                            ..Default::default()
                        })
                        .await?,
                ),
                ExportKind::Emails => ExportData::Emails(
                    business_store
                        .find_all(&BusinessQuery {
                            subsector: subsector.clone(),
                            email_status: Some("found".to_string()),
                            ..Default::default()
                        })
                        .await?,
                ),
                ExportKind::Subsectors => {
                    ExportData::Subsectors(business_store.list_subsectors(SubsectorFilter::All).await?)
                }
            };

            let exported = export_writer
                .write(&kind.file_stem(subsector.as_deref()), format, &data)
                .await?;
            Ok(Json(json!({
                "success": true,
                "message": format!("Data exported successfully to {}", exported.path.display()),
                "filename": exported.filename,
                "count": exported.count,
            })))
        }
        _ => Err(ApiError::bad_request("Invalid action")),
    }
}

async fn post_data(
    State(business_store): State<GuardedBusinessStore>,
    WithRejection(Json(command), _): ApiJson<DataCommand>,
) -> ApiResult<Json<Value>> {
    match command.action.as_str() {
        "reset_email_status" => {
            let count = business_store.reset_email_status().await?;
            info!("Reset email status for {} businesses", count);
            Ok(Json(json!({
                "success": true,
                "message": format!("Email status reset for {} businesses", count),
                "count": count,
            })))
        }
        "update_business" => {
            let mut fields = command.params.unwrap_or_default();
            let id = match fields.remove("id") {
                Some(Value::String(id)) if !id.trim().is_empty() => id,
                _ => return Err(ApiError::bad_request("Missing business ID")),
            };
            let modified = business_store.update_business(&id, fields).await?;
            Ok(Json(json!({
                "success": true,
                "message": "Business updated successfully",
                "modifiedCount": modified,
            })))
        }
        _ => Err(ApiError::bad_request("Invalid action")),
    }
}

pub(super) fn make_data_routes(state: ServerState) -> Router {
    Router::new()
        .route("/api/data", get(get_data).post(post_data))
        .with_state(state)
}
