use super::{
    validate_collection_name, validate_update, BusinessCounts, BusinessPage,
    BusinessQuery, BusinessRecord, BusinessStats, BusinessStore, CityEntry, CollectionStats,
    DbCounts, StoreError, StoreResult, SubsectorCounts, SubsectorEntry, SubsectorFilter,
    CITIES_COLLECTION, DEFAULT_COLLECTION, SUBSECTOR_QUEUE_COLLECTION,
};
use crate::server::metrics;
use anyhow::Context;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::{Client, Collection, Database};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

fn email_present() -> Document {
    doc! { "$exists": true, "$nin": [[], "", Bson::Null] }
}

fn website_present() -> Document {
    doc! { "$exists": true, "$nin": ["", Bson::Null, "N/A"] }
}

fn as_f64(value: Option<&Bson>) -> f64 {
    match value {
        Some(Bson::Double(d)) => *d,
        Some(Bson::Int32(n)) => f64::from(*n),
        Some(Bson::Int64(n)) => *n as f64,
        _ => 0.0,
    }
}

fn as_u64(value: Option<&Bson>) -> u64 {
    match value {
        Some(Bson::Int32(n)) => u64::try_from(*n).unwrap_or(0),
        Some(Bson::Int64(n)) => u64::try_from(*n).unwrap_or(0),
        Some(Bson::Double(d)) if *d > 0.0 => *d as u64,
        _ => 0,
    }
}

/// Businesses and reference data in one MongoDB database.
///
/// The client is created once at startup; the driver pools connections.
pub struct MongoBusinessStore {
    db: Database,
}

impl MongoBusinessStore {
    pub fn new(client: &Client, db_name: &str) -> Self {
        Self {
            db: client.database(db_name),
        }
    }

    fn collection(&self, name: &str) -> StoreResult<Collection<Document>> {
        validate_collection_name(name)?;
        Ok(self.db.collection::<Document>(name))
    }

    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        let start = Instant::now();
        let count = self.collection(collection)?.count_documents(filter).await?;
        metrics::record_db_query("count", start.elapsed());
        Ok(count)
    }

    async fn find_records(
        &self,
        query: &BusinessQuery,
        page: Option<(u64, u64)>,
    ) -> StoreResult<Vec<BusinessRecord>> {
        let collection = self.collection(&query.collection)?;
        let mut find = collection
            .find(query.to_filter())
            .sort(query.sort_document());
        if let Some((skip, limit)) = page {
            find = find.skip(skip).limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        let docs: Vec<Document> = find.await?.try_collect().await?;
        Ok(docs.iter().map(BusinessRecord::from_document).collect())
    }
}

#[async_trait]
impl BusinessStore for MongoBusinessStore {
    async fn find_businesses(&self, query: &BusinessQuery) -> StoreResult<BusinessPage> {
        let start = Instant::now();
        let total = self
            .collection(&query.collection)?
            .count_documents(query.to_filter())
            .await?;
        let businesses = self
            .find_records(query, Some((query.skip(), query.limit())))
            .await?;
        metrics::record_db_query("find_businesses", start.elapsed());
        debug!(
            "{} page {} -> {} of {} businesses",
            query.collection,
            query.page(),
            businesses.len(),
            total
        );
        Ok(BusinessPage { businesses, total })
    }

    async fn find_all(&self, query: &BusinessQuery) -> StoreResult<Vec<BusinessRecord>> {
        let start = Instant::now();
        let records = self.find_records(query, None).await?;
        metrics::record_db_query("find_all", start.elapsed());
        Ok(records)
    }

    async fn list_subsectors(&self, filter: SubsectorFilter) -> StoreResult<Vec<SubsectorEntry>> {
        let start = Instant::now();
        let mongo_filter = match filter {
            SubsectorFilter::All => doc! {},
            SubsectorFilter::Completed => doc! { "scrapedsuccessfully": true },
            SubsectorFilter::Pending => doc! { "scrapedsuccessfully": { "$ne": true } },
        };
        let docs: Vec<Document> = self
            .collection(SUBSECTOR_QUEUE_COLLECTION)?
            .find(mongo_filter)
            .sort(doc! { "subsector": 1, "_id": 1 })
            .await?
            .try_collect()
            .await?;
        metrics::record_db_query("list_subsectors", start.elapsed());
        Ok(docs.iter().map(SubsectorEntry::from_document).collect())
    }

    async fn count_queued_subsectors(&self, prefix: &str) -> StoreResult<u64> {
        let pattern = format!("^{}[0-9]", regex::escape(prefix));
        self.count(
            SUBSECTOR_QUEUE_COLLECTION,
            doc! { "subsector": { "$regex": pattern, "$options": "i" } },
        )
        .await
    }

    async fn stats(&self) -> StoreResult<BusinessStats> {
        let total = self.count(SUBSECTOR_QUEUE_COLLECTION, doc! {}).await?;
        let completed = self
            .count(SUBSECTOR_QUEUE_COLLECTION, doc! { "scrapedsuccessfully": true })
            .await?;
        let businesses_total = self.count(DEFAULT_COLLECTION, doc! {}).await?;

        let start = Instant::now();
        let groups: Vec<Document> = self
            .collection(DEFAULT_COLLECTION)?
            .aggregate(vec![doc! {
                "$group": { "_id": "$emailstatus", "count": { "$sum": 1 } }
            }])
            .await?
            .try_collect()
            .await?;
        metrics::record_db_query("email_status_groups", start.elapsed());

        let mut by_email_status = BTreeMap::new();
        for group in &groups {
            let status = match group.get("_id") {
                Some(Bson::String(s)) => s.clone(),
                _ => "unknown".to_string(),
            };
            *by_email_status.entry(status).or_insert(0) += as_u64(group.get("count"));
        }

        Ok(BusinessStats {
            subsectors: SubsectorCounts {
                total,
                completed,
                pending: total.saturating_sub(completed),
            },
            businesses: BusinessCounts {
                total: businesses_total,
                by_email_status,
            },
        })
    }

    async fn db_counts(&self) -> StoreResult<DbCounts> {
        Ok(DbCounts {
            subsector_queue: self.count(SUBSECTOR_QUEUE_COLLECTION, doc! {}).await?,
            restaurants: self.count(DEFAULT_COLLECTION, doc! {}).await?,
            pending_emails: self
                .count(DEFAULT_COLLECTION, doc! { "emailstatus": "pending" })
                .await?,
        })
    }

    async fn collection_stats(&self, collection: &str) -> StoreResult<CollectionStats> {
        let total_records = self.count(collection, doc! {}).await?;
        let records_with_email = self
            .count(collection, doc! { "email": email_present() })
            .await?;
        let records_with_website = self
            .count(collection, doc! { "website": website_present() })
            .await?;

        let start = Instant::now();
        let coll = self.collection(collection)?;
        let subsectors = coll.distinct("subsector", doc! {}).await?;
        let unique_subsectors = subsectors
            .iter()
            .filter(|s| matches!(s, Bson::String(v) if !v.is_empty()))
            .count() as u64;

        let averages: Vec<Document> = coll
            .aggregate(vec![
                doc! { "$project": { "value": { "$convert": {
                    "input": "$stars", "to": "double", "onError": Bson::Null, "onNull": Bson::Null
                } } } },
                doc! { "$match": { "value": { "$ne": Bson::Null } } },
                doc! { "$group": { "_id": Bson::Null, "sum": { "$sum": "$value" }, "count": { "$sum": 1 } } },
            ])
            .await?
            .try_collect()
            .await?;
        metrics::record_db_query("collection_stats", start.elapsed());

        let (sum, count) = averages
            .first()
            .map(|d| (as_f64(d.get("sum")), as_u64(d.get("count"))))
            .unwrap_or((0.0, 0));

        Ok(CollectionStats {
            total_records,
            records_with_email,
            records_with_website,
            unique_subsectors,
            avg_stars: CollectionStats::format_avg_stars(sum, count),
        })
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let start = Instant::now();
        let mut names: Vec<String> = self
            .db
            .list_collection_names()
            .await?
            .into_iter()
            .filter(|name| !name.starts_with("system."))
            .collect();
        metrics::record_db_query("list_collections", start.elapsed());
        if !names.iter().any(|n| n == DEFAULT_COLLECTION) {
            names.push(DEFAULT_COLLECTION.to_string());
        }
        names.sort();
        Ok(names)
    }

    async fn search_cities(&self, search: &str, limit: usize) -> StoreResult<Vec<CityEntry>> {
        let needle = search.trim();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let escaped = regex::escape(needle);
        let collection = self.collection(CITIES_COLLECTION)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut found = Vec::new();
        for pattern in [format!("^{}", escaped), escaped] {
            let docs: Vec<Document> = collection
                .find(doc! { "area_covered": { "$regex": pattern, "$options": "i" } })
                .sort(doc! { "area_covered": 1 })
                .limit(limit)
                .await?
                .try_collect()
                .await?;
            found = docs.iter().filter_map(CityEntry::from_document).collect();
            if !found.is_empty() {
                break;
            }
        }
        metrics::record_db_query("search_cities", start.elapsed());
        Ok(found)
    }

    async fn reset_email_status(&self) -> StoreResult<u64> {
        let start = Instant::now();
        let result = self
            .collection(DEFAULT_COLLECTION)?
            .update_many(
                doc! { "website": website_present() },
                doc! {
                    "$set": { "emailstatus": "pending", "email": [], "social_profiles": {} },
                    "$unset": { "emailscraped_at": "" },
                },
            )
            .await?;
        metrics::record_db_query("reset_email_status", start.elapsed());
        Ok(result.modified_count)
    }

    async fn update_business(&self, id: &str, fields: Map<String, Value>) -> StoreResult<u64> {
        let oid = validate_update(id, &fields)?;
        let set = bson::to_document(&fields).context("Failed to encode business update")?;
        let start = Instant::now();
        let result = self
            .collection(DEFAULT_COLLECTION)?
            .update_one(doc! { "_id": oid }, doc! { "$set": set })
            .await?;
        metrics::record_db_query("update_business", start.elapsed());
        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(result.modified_count)
    }
}
