//! City autocomplete with an in-process cache.

use crate::business_store::{BusinessStore, CityEntry, StoreResult};
use crate::config::CitySettings;
use crate::server::metrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

struct CachedCities {
    cities: Vec<CityEntry>,
    fetched_at: Instant,
}

/// Caches city search results per normalized search text.
///
/// Entries older than the TTL are refetched. Expired entries are purged
/// whenever a new result is stored, and the oldest entry is evicted when the
/// cache is full.
pub struct CityCache {
    store: Arc<dyn BusinessStore>,
    ttl: Duration,
    max_results: usize,
    max_entries: usize,
    entries: Mutex<HashMap<String, CachedCities>>,
}

pub fn normalize_search(search: &str) -> String {
    search.trim().to_lowercase()
}

impl CityCache {
    pub fn new(store: Arc<dyn BusinessStore>, settings: &CitySettings) -> Self {
        Self {
            store,
            ttl: settings.cache_ttl,
            max_results: settings.max_results,
            max_entries: settings.max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn search(&self, search: &str) -> StoreResult<Vec<CityEntry>> {
        let key = normalize_search(search);
        if key.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(cities) = self.cached(&key) {
            metrics::record_city_cache_lookup(true);
            return Ok(cities);
        }
        metrics::record_city_cache_lookup(false);

        let cities = self.store.search_cities(&key, self.max_results).await?;
        debug!("Fetched {} cities for {:?}", cities.len(), key);

        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| now.duration_since(entry.fetched_at) < self.ttl);
        while entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.fetched_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(oldest) => entries.remove(&oldest),
                None => break,
            };
        }
        entries.insert(
            key,
            CachedCities {
                cities: cities.clone(),
                fetched_at: now,
            },
        );
        Ok(cities)
    }

    fn cached(&self, key: &str) -> Option<Vec<CityEntry>> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.cities.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::business_store::{InMemoryBusinessStore, CITIES_COLLECTION};
    use bson::doc;

    fn store_with(cities: &[(&str, &str)]) -> Arc<InMemoryBusinessStore> {
        let store = Arc::new(InMemoryBusinessStore::new());
        for (area, postcode) in cities {
            store.insert(
                CITIES_COLLECTION,
                doc! { "area_covered": *area, "postcode_area": *postcode },
            );
        }
        store
    }

    fn settings(ttl: Duration) -> CitySettings {
        CitySettings {
            cache_ttl: ttl,
            max_results: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn blank_search_skips_store() {
        let cache = CityCache::new(store_with(&[("Leeds", "LS")]), &settings(Duration::from_secs(60)));
        assert!(cache.search("   ").await.unwrap().is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn results_are_cached_by_normalized_text() {
        let store = store_with(&[("Leeds", "LS")]);
        let cache = CityCache::new(store.clone(), &settings(Duration::from_secs(60)));

        assert_eq!(cache.search(" LEEDS").await.unwrap().len(), 1);
        // Added after the first lookup; the cached answer still wins.
        store.insert(CITIES_COLLECTION, doc! { "area_covered": "Leeds Bradford", "postcode_area": "LS" });
        assert_eq!(cache.search("leeds ").await.unwrap().len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn distinct_searches_are_capped() {
        let store = store_with(&[("Leeds", "LS"), ("Leicester", "LE")]);
        let cache = CityCache::new(
            store,
            &CitySettings {
                max_entries: 3,
                ..settings(Duration::from_secs(60))
            },
        );

        for i in 0..20 {
            cache.search(&format!("le{}", i)).await.unwrap();
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);

        // The most recent search survives eviction
        assert!(cache.cached("le19").is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let store = store_with(&[("Leeds", "LS")]);
        let cache = CityCache::new(store.clone(), &settings(Duration::ZERO));

        assert_eq!(cache.search("leeds").await.unwrap().len(), 1);
        store.insert(CITIES_COLLECTION, doc! { "area_covered": "Leeds Bradford", "postcode_area": "LS" });
        assert_eq!(cache.search("leeds").await.unwrap().len(), 2);
    }
}
