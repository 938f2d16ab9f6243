use super::{
    city_matches, in_postcode_area, validate_collection_name, validate_update, BusinessCounts, BusinessPage,
    BusinessQuery, BusinessRecord, BusinessStats, BusinessStore, CityEntry, CollectionStats,
    DbCounts, StoreError, StoreResult, SubsectorCounts, SubsectorEntry, SubsectorFilter,
    CITIES_COLLECTION, DEFAULT_COLLECTION, SUBSECTOR_QUEUE_COLLECTION,
};
use anyhow::Context;
use async_trait::async_trait;
use bson::{Bson, Document};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Documents grouped by collection, kept in process memory.
///
/// Backs demo mode and tests. Queries go through the same
/// [`BusinessQuery`] rules as the MongoDB store.
#[derive(Default)]
pub struct InMemoryBusinessStore {
    collections: Mutex<BTreeMap<String, Vec<Document>>>,
}

impl InMemoryBusinessStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, doc: Document) {
        let mut collections = self.collections.lock().unwrap();
        collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    fn records(&self, collection: &str) -> StoreResult<Vec<BusinessRecord>> {
        validate_collection_name(collection)?;
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().map(BusinessRecord::from_document).collect())
            .unwrap_or_default())
    }

    fn matching(&self, query: &BusinessQuery) -> StoreResult<Vec<BusinessRecord>> {
        let matcher = query.matcher()?;
        let mut records: Vec<BusinessRecord> = self
            .records(&query.collection)?
            .into_iter()
            .filter(|r| matcher.matches(r))
            .collect();
        records.sort_by(|a, b| query.compare(a, b));
        Ok(records)
    }

    fn subsectors(&self) -> Vec<SubsectorEntry> {
        let collections = self.collections.lock().unwrap();
        collections
            .get(SUBSECTOR_QUEUE_COLLECTION)
            .map(|docs| docs.iter().map(SubsectorEntry::from_document).collect())
            .unwrap_or_default()
    }
}

fn website_present(doc: &Document) -> bool {
    matches!(doc.get("website"), Some(Bson::String(w)) if !w.is_empty() && w != "N/A")
}

#[async_trait]
impl BusinessStore for InMemoryBusinessStore {
    async fn find_businesses(&self, query: &BusinessQuery) -> StoreResult<BusinessPage> {
        let records = self.matching(query)?;
        let total = records.len() as u64;
        let skip = usize::try_from(query.skip()).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.limit()).unwrap_or(usize::MAX);
        Ok(BusinessPage {
            businesses: records.into_iter().skip(skip).take(limit).collect(),
            total,
        })
    }

    async fn find_all(&self, query: &BusinessQuery) -> StoreResult<Vec<BusinessRecord>> {
        self.matching(query)
    }

    async fn list_subsectors(&self, filter: SubsectorFilter) -> StoreResult<Vec<SubsectorEntry>> {
        let mut entries: Vec<SubsectorEntry> = self
            .subsectors()
            .into_iter()
            .filter(|e| filter.accepts(e))
            .collect();
        entries.sort_by(|a, b| a.subsector.cmp(&b.subsector).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn count_queued_subsectors(&self, prefix: &str) -> StoreResult<u64> {
        Ok(self
            .subsectors()
            .iter()
            .filter(|e| in_postcode_area(&e.subsector, prefix))
            .count() as u64)
    }

    async fn stats(&self) -> StoreResult<BusinessStats> {
        let subsectors = self.subsectors();
        let completed = subsectors.iter().filter(|s| s.scrapedsuccessfully).count() as u64;
        let total = subsectors.len() as u64;

        let businesses = self.records(DEFAULT_COLLECTION)?;
        let mut by_email_status = BTreeMap::new();
        for record in &businesses {
            let status = record
                .emailstatus
                .as_ref()
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            *by_email_status.entry(status).or_insert(0) += 1;
        }

        Ok(BusinessStats {
            subsectors: SubsectorCounts {
                total,
                completed,
                pending: total - completed,
            },
            businesses: BusinessCounts {
                total: businesses.len() as u64,
                by_email_status,
            },
        })
    }

    async fn db_counts(&self) -> StoreResult<DbCounts> {
        let businesses = self.records(DEFAULT_COLLECTION)?;
        Ok(DbCounts {
            subsector_queue: self.subsectors().len() as u64,
            restaurants: businesses.len() as u64,
            pending_emails: businesses
                .iter()
                .filter(|r| r.emailstatus.as_ref().map(|s| s.as_str()) == Some("pending"))
                .count() as u64,
        })
    }

    async fn collection_stats(&self, collection: &str) -> StoreResult<CollectionStats> {
        let records = self.records(collection)?;
        let unique: BTreeSet<&str> = records
            .iter()
            .filter_map(|r| r.subsector.as_deref())
            .filter(|s| !s.is_empty())
            .collect();
        let stars: Vec<f64> = records.iter().filter_map(|r| r.stars_value()).collect();
        Ok(CollectionStats {
            total_records: records.len() as u64,
            records_with_email: records.iter().filter(|r| r.has_email()).count() as u64,
            records_with_website: records.iter().filter(|r| r.has_website()).count() as u64,
            unique_subsectors: unique.len() as u64,
            avg_stars: CollectionStats::format_avg_stars(stars.iter().sum(), stars.len() as u64),
        })
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let collections = self.collections.lock().unwrap();
        let mut names: BTreeSet<String> = collections.keys().cloned().collect();
        names.insert(DEFAULT_COLLECTION.to_string());
        Ok(names.into_iter().collect())
    }

    async fn search_cities(&self, search: &str, limit: usize) -> StoreResult<Vec<CityEntry>> {
        let cities: Vec<CityEntry> = {
            let collections = self.collections.lock().unwrap();
            collections
                .get(CITIES_COLLECTION)
                .map(|docs| docs.iter().filter_map(CityEntry::from_document).collect())
                .unwrap_or_default()
        };
        Ok(city_matches(&cities, search, limit))
    }

    async fn reset_email_status(&self) -> StoreResult<u64> {
        let mut collections = self.collections.lock().unwrap();
        let Some(docs) = collections.get_mut(DEFAULT_COLLECTION) else {
            return Ok(0);
        };
        let mut count = 0;
        for doc in docs.iter_mut().filter(|d| website_present(d)) {
            doc.insert("emailstatus", "pending");
            doc.insert("email", Bson::Array(Vec::new()));
            doc.insert("social_profiles", Document::new());
            doc.remove("emailscraped_at");
            count += 1;
        }
        Ok(count)
    }

    async fn update_business(&self, id: &str, fields: Map<String, Value>) -> StoreResult<u64> {
        let oid = validate_update(id, &fields)?;
        let set = bson::to_document(&fields).context("Failed to encode business update")?;

        let mut collections = self.collections.lock().unwrap();
        let doc = collections
            .get_mut(DEFAULT_COLLECTION)
            .and_then(|docs| {
                docs.iter_mut()
                    .find(|d| d.get_object_id("_id").ok() == Some(oid))
            })
            .ok_or(StoreError::NotFound)?;

        let mut modified = false;
        for (key, value) in set {
            if doc.get(&key) != Some(&value) {
                doc.insert(key, value);
                modified = true;
            }
        }
        Ok(u64::from(modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::business_store::{EmailStatus, SortField, SortOrder};
    use bson::{doc, oid::ObjectId};
    use serde_json::json;

    fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 12];
        bytes[11] = n;
        ObjectId::from_bytes(bytes)
    }

    fn store() -> InMemoryBusinessStore {
        let store = InMemoryBusinessStore::new();
        let rows = [
            ("Alpha Grill", "LS1 1", "4.5", Some("a@alpha.example"), "found"),
            ("Bravo Bistro", "LS1 1", "3.0", None, "pending"),
            ("Charlie Cafe", "LS2 7", "N/A", Some("c@charlie.example"), "checked"),
            ("Delta Diner", "LS2 7", "5", None, "pending"),
            ("Echo Eatery", "LS6 2", "4", None, "failed"),
        ];
        for (i, (name, subsector, stars, email, status)) in rows.into_iter().enumerate() {
            let website = if i % 2 == 0 { "https://example.com" } else { "" };
            let mut d = doc! {
                "_id": oid(i as u8 + 1),
                "businessname": name,
                "subsector": subsector,
                "stars": stars,
                "phonenumber": 1130000000_i64 + i as i64,
                "website": website,
                "emailstatus": status,
                "emailscraped_at": bson::DateTime::now(),
            };
            if let Some(email) = email {
                d.insert("email", vec![email]);
            }
            store.insert(DEFAULT_COLLECTION, d);
        }
        store.insert(
            SUBSECTOR_QUEUE_COLLECTION,
            doc! { "_id": oid(50), "subsector": "LS2 7", "scrapedsuccessfully": true, "totalrecordsfound": 2 },
        );
        store.insert(
            SUBSECTOR_QUEUE_COLLECTION,
            doc! { "_id": oid(51), "subsector": "LS1 1", "scrapedsuccessfully": false },
        );
        store
    }

    #[tokio::test]
    async fn consecutive_pages_are_disjoint_and_ordered() {
        let store = store();
        let mut seen = Vec::new();
        for page in 1..=3 {
            let query = BusinessQuery {
                page,
                limit: 2,
                sort_by: SortField::Subsector,
                sort_order: SortOrder::Desc,
                ..Default::default()
            };
            let result = store.find_businesses(&query).await.unwrap();
            assert_eq!(result.total, 5);
            seen.extend(result.businesses.into_iter().map(|b| b.id));
        }
        let unique: BTreeSet<&String> = seen.iter().collect();
        assert_eq!(seen.len(), 5);
        assert_eq!(unique.len(), 5);
        // LS6 2 first, then the two LS2 7 rows in id order
        assert_eq!(seen[0], oid(5).to_hex());
        assert_eq!(seen[1], oid(3).to_hex());
        assert_eq!(seen[2], oid(4).to_hex());
    }

    #[tokio::test]
    async fn numeric_search_matches_phone_exactly() {
        let store = store();
        let query = BusinessQuery {
            search: Some("1130000002".to_string()),
            ..Default::default()
        };
        let page = store.find_businesses(&query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.businesses[0].businessname.as_deref(), Some("Charlie Cafe"));

        let query = BusinessQuery {
            search: Some("113000000".to_string()),
            ..Default::default()
        };
        assert_eq!(store.find_businesses(&query).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn subsectors_are_filtered_and_sorted() {
        let store = store();
        let all = store.list_subsectors(SubsectorFilter::All).await.unwrap();
        let codes: Vec<&str> = all.iter().map(|s| s.subsector.as_str()).collect();
        assert_eq!(codes, vec!["LS1 1", "LS2 7"]);

        let pending = store.list_subsectors(SubsectorFilter::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].subsector, "LS1 1");
    }

    #[tokio::test]
    async fn queued_subsectors_are_counted_per_area() {
        let store = store();
        assert_eq!(store.count_queued_subsectors("LS").await.unwrap(), 2);
        assert_eq!(store.count_queued_subsectors("L").await.unwrap(), 0);
        assert_eq!(store.count_queued_subsectors("M").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stats_group_email_statuses() {
        let store = store();
        store.insert(DEFAULT_COLLECTION, doc! { "_id": oid(9), "businessname": "No Status" });
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.subsectors.total, 2);
        assert_eq!(stats.subsectors.completed, 1);
        assert_eq!(stats.subsectors.pending, 1);
        assert_eq!(stats.businesses.total, 6);
        assert_eq!(stats.businesses.by_email_status.get("pending"), Some(&2));
        assert_eq!(stats.businesses.by_email_status.get("unknown"), Some(&1));

        let counts = store.db_counts().await.unwrap();
        assert_eq!(counts.pending_emails, 2);
        assert_eq!(counts.subsector_queue, 2);
    }

    #[tokio::test]
    async fn collection_stats_skip_unrated() {
        let store = store();
        let stats = store.collection_stats(DEFAULT_COLLECTION).await.unwrap();
        assert_eq!(stats.total_records, 5);
        assert_eq!(stats.records_with_email, 2);
        assert_eq!(stats.records_with_website, 3);
        assert_eq!(stats.unique_subsectors, 3);
        // (4.5 + 3.0 + 5 + 4) / 4
        assert_eq!(stats.avg_stars, "4.1");
    }

    #[tokio::test]
    async fn reset_only_touches_records_with_websites() {
        let store = store();
        assert_eq!(store.reset_email_status().await.unwrap(), 3);

        let all = store
            .find_all(&BusinessQuery::default())
            .await
            .unwrap();
        let alpha = &all[0];
        assert_eq!(alpha.emailstatus, Some(EmailStatus::Pending));
        assert!(alpha.email.is_empty());
        assert!(alpha.emailscraped_at.is_none());
        let bravo = &all[1];
        assert_eq!(bravo.emailstatus, Some(EmailStatus::Pending));
        assert!(bravo.emailscraped_at.is_some());
    }

    #[tokio::test]
    async fn update_business_reports_modifications() {
        let store = store();
        let id = oid(2).to_hex();
        let fields = json!({"emailstatus": "checked"}).as_object().cloned().unwrap();
        assert_eq!(store.update_business(&id, fields.clone()).await.unwrap(), 1);
        assert_eq!(store.update_business(&id, fields.clone()).await.unwrap(), 0);

        let missing = oid(99).to_hex();
        assert!(matches!(
            store.update_business(&missing, fields).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn collections_always_include_default() {
        let store = InMemoryBusinessStore::new();
        assert_eq!(store.list_collections().await.unwrap(), vec!["restaurants"]);
        assert!(matches!(
            store.collection_stats("system.users").await,
            Err(StoreError::InvalidCollection(_))
        ));
    }
}
