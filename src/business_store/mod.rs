mod demo_data;
mod memory_business_store;
mod models;
mod mongo_business_store;
mod query;

pub use demo_data::demo_business_store;
pub use memory_business_store::InMemoryBusinessStore;
pub use models::*;
pub use mongo_business_store::MongoBusinessStore;
pub use query::{
    validate_collection_name, BusinessQuery, QueryMatcher, SortField, SortOrder,
    DEFAULT_COLLECTION, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub const SUBSECTOR_QUEUE_COLLECTION: &str = "subsector_queue";
pub const CITIES_COLLECTION: &str = "cities";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid business ID: {0}")]
    InvalidId(String),

    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Business not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read and maintenance operations over scraped businesses and the
/// reference collections next to them.
#[async_trait]
pub trait BusinessStore: Send + Sync {
    /// One page of `query.collection`.
    async fn find_businesses(&self, query: &BusinessQuery) -> StoreResult<BusinessPage>;

    /// Every match for `query`, in query order, ignoring pagination.
    async fn find_all(&self, query: &BusinessQuery) -> StoreResult<Vec<BusinessRecord>>;

    /// Sorted by subsector code.
    async fn list_subsectors(&self, filter: SubsectorFilter) -> StoreResult<Vec<SubsectorEntry>>;

    /// Queue entries in the postcode area `prefix`, scraped or not.
    async fn count_queued_subsectors(&self, prefix: &str) -> StoreResult<u64>;

    async fn stats(&self) -> StoreResult<BusinessStats>;

    async fn db_counts(&self) -> StoreResult<DbCounts>;

    async fn collection_stats(&self, collection: &str) -> StoreResult<CollectionStats>;

    /// Collection names, always including the default one and never
    /// `system.*` collections.
    async fn list_collections(&self) -> StoreResult<Vec<String>>;

    /// Cities whose `area_covered` starts with `search`, falling back to a
    /// substring match when nothing starts with it.
    async fn search_cities(&self, search: &str, limit: usize) -> StoreResult<Vec<CityEntry>>;

    /// Puts every business with a usable website back in the email queue.
    async fn reset_email_status(&self) -> StoreResult<u64>;

    /// Sets `fields` on the business; returns the modified count.
    async fn update_business(&self, id: &str, fields: Map<String, Value>) -> StoreResult<u64>;
}

/// Shared checks for `update_business` arguments.
pub(crate) fn validate_update(id: &str, fields: &Map<String, Value>) -> StoreResult<bson::oid::ObjectId> {
    let oid = bson::oid::ObjectId::parse_str(id).map_err(|_| StoreError::InvalidId(id.to_string()))?;
    if fields.is_empty() {
        return Err(StoreError::InvalidUpdate("no fields to update".to_string()));
    }
    if let Some(field) = fields
        .keys()
        .find(|k| k.as_str() == "_id" || k.starts_with('$') || k.contains('.'))
    {
        return Err(StoreError::InvalidUpdate(format!(
            "field {:?} cannot be modified",
            field
        )));
    }
    Ok(oid)
}

/// Whether `subsector` lies in the postcode area `prefix`. "LS1 1" is in LS
/// but not in L.
pub(crate) fn in_postcode_area(subsector: &str, prefix: &str) -> bool {
    let subsector = subsector.trim();
    let Some(head) = subsector.get(..prefix.len()) else {
        return false;
    };
    head.eq_ignore_ascii_case(prefix)
        && subsector[prefix.len()..].starts_with(|c: char| c.is_ascii_digit())
}

/// Case-insensitive prefix then substring match over city names.
pub(crate) fn city_matches(entries: &[CityEntry], search: &str, limit: usize) -> Vec<CityEntry> {
    let needle = search.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    let pick = |pred: &dyn Fn(&str) -> bool| -> Vec<CityEntry> {
        let mut found: Vec<CityEntry> = entries
            .iter()
            .filter(|c| pred(&c.area_covered.to_lowercase()))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.area_covered.cmp(&b.area_covered));
        found.truncate(limit);
        found
    };
    let prefixed = pick(&|name| name.starts_with(&needle));
    if !prefixed.is_empty() {
        return prefixed;
    }
    pick(&|name| name.contains(&needle))
}
