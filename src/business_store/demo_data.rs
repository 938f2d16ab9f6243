//! Deterministic sample data for `--demo-mode`.

use super::{InMemoryBusinessStore, CITIES_COLLECTION, DEFAULT_COLLECTION, SUBSECTOR_QUEUE_COLLECTION};
use bson::{doc, oid::ObjectId, Bson};
use chrono::{Duration, TimeZone, Utc};

const NAMES: &[&str] = &[
    "Aire Street Kitchen",
    "Briggate Bistro",
    "Call Lane Cantina",
    "Dark Arches Diner",
    "Eastgate Eatery",
    "Flying Pig Pizzeria",
    "Granary Wharf Grill",
    "Headrow House",
    "Kirkgate Kitchen",
    "Merrion Noodle Bar",
    "Northern Quarter Tapas",
    "Otley Road Oven",
];

const CUISINES: &[&str] = &["Restaurant", "Cafe", "Takeaway"];

const SUBSECTORS: &[(&str, bool, i64)] = &[
    ("LS1 1", true, 14),
    ("LS1 2", true, 9),
    ("LS1 3", false, 0),
    ("LS2 7", true, 11),
    ("LS2 8", false, 0),
    ("LS6 1", false, 0),
];

const CITIES: &[(&str, &str)] = &[
    ("Belfast", "BT"),
    ("Birmingham", "B"),
    ("Bradford", "BD"),
    ("Cardiff", "CF"),
    ("Edinburgh", "EH"),
    ("Glasgow", "G"),
    ("Leeds", "LS"),
    ("Leicester", "LE"),
    ("Lincoln", "LN"),
    ("Liverpool", "L"),
    ("London", "SW"),
    ("Manchester", "M"),
    ("Newcastle upon Tyne", "NE"),
    ("Wakefield", "WF"),
];

fn object_id(collection: u8, n: usize) -> ObjectId {
    let mut bytes = [0u8; 12];
    bytes[0] = 0x65;
    bytes[3] = collection;
    bytes[8..].copy_from_slice(&(n as u32).to_be_bytes());
    ObjectId::from_bytes(bytes)
}

/// A store pre-filled with businesses, a subsector queue and cities.
/// Every call produces the same content.
pub fn demo_business_store() -> InMemoryBusinessStore {
    let store = InMemoryBusinessStore::new();
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).single().unwrap_or_else(Utc::now);

    let completed: Vec<&(&str, bool, i64)> = SUBSECTORS.iter().filter(|s| s.1).collect();
    let mut n = 0;
    for (s, (subsector, _, found)) in completed.iter().enumerate() {
        for i in 0..*found as usize {
            let name = NAMES[(n + s) % NAMES.len()];
            let kind = CUISINES[n % CUISINES.len()];
            let scraped_at = base + Duration::hours(n as i64 * 7);
            let slug: String = name
                .to_lowercase()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect();
            let website = match n % 4 {
                0 => Bson::String(format!("https://{}.example", slug)),
                1 => Bson::String(format!("https://www.{}-leeds.example", slug)),
                2 => Bson::String(String::new()),
                _ => Bson::String("N/A".to_string()),
            };
            let (email, status) = match n % 5 {
                0 | 1 => (
                    Bson::Array(vec![Bson::String(format!("hello@{}.example", slug))]),
                    "found",
                ),
                2 => (Bson::Array(Vec::new()), "checked"),
                3 => (Bson::Array(Vec::new()), "pending"),
                _ => (Bson::Array(Vec::new()), "failed"),
            };
            let phone = if n % 3 == 0 {
                Bson::Int64(1132_000_000 + n as i64 * 37)
            } else {
                Bson::String(format!("0113 496 {:04}", n * 37 % 10_000))
            };

            store.insert(
                DEFAULT_COLLECTION,
                doc! {
                    "_id": object_id(1, n),
                    "businessname": format!("{} {}", name, kind),
                    "address": format!("{} {} Street, Leeds {}", i + 1, name.split(' ').next().unwrap_or(""), subsector),
                    "phonenumber": phone,
                    "website": website,
                    "email": email,
                    "stars": format!("{:.1}", 3.0 + (n % 5) as f64 * 0.5),
                    "numberofreviews": (n as i64 * 13) % 400 + 5,
                    "subsector": *subsector,
                    "scraped_at": bson::DateTime::from_chrono(scraped_at),
                    "emailstatus": status,
                },
            );
            n += 1;
        }
    }

    for (i, (subsector, done, found)) in SUBSECTORS.iter().enumerate() {
        store.insert(
            SUBSECTOR_QUEUE_COLLECTION,
            doc! {
                "_id": object_id(2, i),
                "subsector": *subsector,
                "scrapedsuccessfully": *done,
                "totalrecordsfound": *found,
            },
        );
    }

    for (i, (area, postcode)) in CITIES.iter().enumerate() {
        store.insert(
            CITIES_COLLECTION,
            doc! {
                "_id": object_id(3, i),
                "area_covered": *area,
                "postcode_area": *postcode,
            },
        );
    }

    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::business_store::{BusinessQuery, BusinessStore, SubsectorFilter};

    #[tokio::test]
    async fn demo_store_is_deterministic() {
        let a = demo_business_store();
        let b = demo_business_store();
        let query = BusinessQuery {
            limit: 100,
            ..Default::default()
        };
        let page_a = a.find_businesses(&query).await.unwrap();
        let page_b = b.find_businesses(&query).await.unwrap();
        assert_eq!(page_a, page_b);
        assert_eq!(page_a.total, 34);
    }

    #[tokio::test]
    async fn demo_store_covers_every_listing() {
        let store = demo_business_store();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.subsectors.total, 6);
        assert_eq!(stats.subsectors.completed, 3);

        let pending = store.list_subsectors(SubsectorFilter::Pending).await.unwrap();
        assert_eq!(pending.len(), 3);

        let leeds = store.search_cities("lee", 10).await.unwrap();
        assert_eq!(leeds.len(), 1);
        assert_eq!(leeds[0].postcode_area, "LS");

        let with_email = store
            .find_businesses(&BusinessQuery {
                require_email: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(with_email.total > 0);
        assert!(with_email.businesses.iter().all(|b| b.has_email()));
    }
}
