//! Browsing routes over the scraped collections, the restaurant CSV download
//! and city autocomplete.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::business_store::{BusinessQuery, SortField, SortOrder};
use crate::export::{businesses_csv, restaurants_csv_filename};

use super::data_routes::{non_blank, number_param};
use super::error::{ApiError, ApiQuery, ApiResult};
use super::state::{GuardedBusinessStore, GuardedCityCache, ServerState};

const COLLECTION_PAGE_SIZE: u64 = 50;
const RESTAURANTS_PAGE_SIZE: u64 = 12;

#[derive(Debug, Deserialize)]
struct CollectionQuery {
    page: Option<String>,
    limit: Option<String>,
    search: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestaurantsQuery {
    search: Option<String>,
    sort_by: Option<String>,
    sort_order: Option<String>,
    page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    search: Option<String>,
    query: Option<String>,
}

async fn get_collections(
    State(business_store): State<GuardedBusinessStore>,
) -> ApiResult<Json<Value>> {
    let collections = business_store.list_collections().await?;
    Ok(Json(json!({ "collections": collections })))
}

async fn get_collection_businesses(
    State(business_store): State<GuardedBusinessStore>,
    Path(collection): Path<String>,
    WithRejection(Query(query), _): ApiQuery<CollectionQuery>,
) -> ApiResult<Json<Value>> {
    let business_query = BusinessQuery {
        collection,
        search: non_blank(query.search),
        page: number_param(query.page.as_deref(), 1),
        limit: number_param(query.limit.as_deref(), COLLECTION_PAGE_SIZE),
        require_email: true,
        ..Default::default()
    };
    let page = business_store.find_businesses(&business_query).await?;
    let stats = business_store
        .collection_stats(&business_query.collection)
        .await?;
    Ok(Json(json!({
        "data": page.businesses,
        "pagination": {
            "total": page.total,
            "page": business_query.page(),
            "limit": business_query.limit(),
            "totalPages": business_query.pages(page.total),
        },
        "stats": stats,
    })))
}

async fn get_restaurants(
    State(business_store): State<GuardedBusinessStore>,
    WithRejection(Query(query), _): ApiQuery<RestaurantsQuery>,
) -> ApiResult<Json<Value>> {
    let sort_by = match non_blank(query.sort_by) {
        Some(field) => SortField::parse(&field)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid sort field: {}", field)))?,
        None => SortField::default(),
    };
    let sort_order = match non_blank(query.sort_order) {
        Some(order) => SortOrder::parse(&order)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid sort order: {}", order)))?,
        None => SortOrder::default(),
    };

    let business_query = BusinessQuery {
        search: non_blank(query.search),
        sort_by,
        sort_order,
        page: number_param(query.page.as_deref(), 1),
        limit: RESTAURANTS_PAGE_SIZE,
        require_email: true,
        ..Default::default()
    };
    let page = business_store.find_businesses(&business_query).await?;
    Ok(Json(json!({
        "restaurants": page.businesses,
        "totalPages": business_query.pages(page.total),
        "currentPage": business_query.page(),
    })))
}

async fn export_restaurants_csv(
    State(business_store): State<GuardedBusinessStore>,
    WithRejection(Query(query), _): ApiQuery<SearchQuery>,
) -> ApiResult<Response> {
    let records = business_store
        .find_all(&BusinessQuery {
            search: non_blank(query.search),
            require_email: true,
            ..Default::default()
        })
        .await?;
    if records.is_empty() {
        return Err(ApiError::not_found("No restaurants found with emails"));
    }

    let csv = businesses_csv(&records)?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        restaurants_csv_filename(Utc::now().date_naive())
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

async fn search_cities(
    State(city_cache): State<GuardedCityCache>,
    WithRejection(Query(query), _): ApiQuery<SearchQuery>,
) -> ApiResult<Json<Value>> {
    let text = query.search.or(query.query).unwrap_or_default();
    let cities = city_cache.search(&text).await?;
    Ok(Json(json!(cities)))
}

pub(super) fn make_business_routes(state: ServerState) -> Router {
    Router::new()
        .route("/api/collections", get(get_collections))
        .route("/api/businesses/{collection}", get(get_collection_businesses))
        .route("/api/restaurants", get(get_restaurants))
        .route("/api/export-csv", get(export_restaurants_csv))
        .route("/api/cities", get(search_cities))
        .with_state(state)
}
