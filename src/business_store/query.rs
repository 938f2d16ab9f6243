//! Filter, sort and pagination for business listings.
//!
//! A [`BusinessQuery`] renders to a MongoDB filter and sort document and also
//! evaluates directly against decoded records, so the in-memory store pages
//! exactly like the database does.

use super::models::BusinessRecord;
use super::StoreError;
use bson::{doc, Bson, Document};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;

pub const DEFAULT_COLLECTION: &str = "restaurants";
pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;
/// Highest page whose offset still fits the database's signed 64-bit skip.
pub const MAX_PAGE: u64 = i64::MAX as u64 / MAX_PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "1" => Some(SortOrder::Asc),
            "desc" | "-1" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    fn direction(&self) -> i32 {
        match self {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        }
    }
}

/// Fields a listing may be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    BusinessName,
    Stars,
    NumberOfReviews,
    ScrapedAt,
    Subsector,
    EmailStatus,
    Address,
}

impl SortField {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "businessname" => Some(SortField::BusinessName),
            "stars" => Some(SortField::Stars),
            "numberofreviews" => Some(SortField::NumberOfReviews),
            "scraped_at" => Some(SortField::ScrapedAt),
            "subsector" => Some(SortField::Subsector),
            "emailstatus" => Some(SortField::EmailStatus),
            "address" => Some(SortField::Address),
            _ => None,
        }
    }

    pub fn field_name(&self) -> &'static str {
        match self {
            SortField::BusinessName => "businessname",
            SortField::Stars => "stars",
            SortField::NumberOfReviews => "numberofreviews",
            SortField::ScrapedAt => "scraped_at",
            SortField::Subsector => "subsector",
            SortField::EmailStatus => "emailstatus",
            SortField::Address => "address",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BusinessQuery {
    pub collection: String,
    pub search: Option<String>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub page: u64,
    pub limit: u64,
    pub subsector: Option<String>,
    pub email_status: Option<String>,
    /// Only records with at least one email address.
    pub require_email: bool,
}

impl Default for BusinessQuery {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            search: None,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            subsector: None,
            email_status: None,
            require_email: false,
        }
    }
}

impl BusinessQuery {
    pub fn page(&self) -> u64 {
        self.page.clamp(1, MAX_PAGE)
    }

    pub fn limit(&self) -> u64 {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn skip(&self) -> u64 {
        (self.page() - 1).saturating_mul(self.limit())
    }

    pub fn pages(&self, total: u64) -> u64 {
        total.div_ceil(self.limit())
    }

    fn search_text(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// The search text as a phone number, when it is made only of digits.
    pub fn numeric_search(&self) -> Option<i64> {
        let text = self.search_text()?;
        if text.bytes().all(|b| b.is_ascii_digit()) {
            text.parse().ok()
        } else {
            None
        }
    }

    pub fn to_filter(&self) -> Document {
        let mut clauses: Vec<Document> = Vec::new();

        if self.require_email {
            clauses.push(doc! { "email": { "$exists": true, "$nin": [[], "", Bson::Null] } });
        }
        if let Some(subsector) = &self.subsector {
            clauses.push(doc! { "subsector": subsector.as_str() });
        }
        if let Some(status) = &self.email_status {
            clauses.push(doc! { "emailstatus": status.as_str() });
        }
        if let Some(text) = self.search_text() {
            let pattern = regex::escape(text);
            let mut alternatives: Vec<Bson> = ["businessname", "email", "address"]
                .iter()
                .map(|field| {
                    let mut clause = Document::new();
                    clause.insert(*field, doc! { "$regex": pattern.as_str(), "$options": "i" });
                    Bson::Document(clause)
                })
                .collect();
            if let Some(number) = self.numeric_search() {
                alternatives.push(Bson::Document(doc! { "phonenumber": number }));
            }
            clauses.push(doc! { "$or": alternatives });
        }

        match clauses.len() {
            0 => Document::new(),
            1 => clauses.remove(0),
            _ => doc! { "$and": clauses },
        }
    }

    /// Requested order with `_id` as tie-break so pages never overlap.
    pub fn sort_document(&self) -> Document {
        let mut sort = Document::new();
        sort.insert(self.sort_by.field_name(), self.sort_order.direction());
        sort.insert("_id", 1);
        sort
    }

    pub fn matcher(&self) -> Result<QueryMatcher<'_>, StoreError> {
        let search = match self.search_text() {
            Some(text) => Some(
                RegexBuilder::new(&regex::escape(text))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| StoreError::InvalidQuery(e.to_string()))?,
            ),
            None => None,
        };
        Ok(QueryMatcher {
            query: self,
            search,
            phone: self.numeric_search(),
        })
    }

    pub fn compare(&self, a: &BusinessRecord, b: &BusinessRecord) -> Ordering {
        let ordering = match self.sort_by {
            SortField::BusinessName => a.businessname.cmp(&b.businessname),
            SortField::Stars => a.stars.cmp(&b.stars),
            SortField::NumberOfReviews => a.numberofreviews.cmp(&b.numberofreviews),
            SortField::ScrapedAt => a.scraped_at.cmp(&b.scraped_at),
            SortField::Subsector => a.subsector.cmp(&b.subsector),
            SortField::EmailStatus => a
                .emailstatus
                .as_ref()
                .map(|s| s.as_str())
                .cmp(&b.emailstatus.as_ref().map(|s| s.as_str())),
            SortField::Address => a.address.cmp(&b.address),
        };
        let ordering = match self.sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    }
}

/// A query compiled for in-memory evaluation.
pub struct QueryMatcher<'a> {
    query: &'a BusinessQuery,
    search: Option<Regex>,
    phone: Option<i64>,
}

impl QueryMatcher<'_> {
    pub fn matches(&self, record: &BusinessRecord) -> bool {
        if self.query.require_email && !record.has_email() {
            return false;
        }
        if let Some(subsector) = &self.query.subsector {
            if record.subsector.as_ref() != Some(subsector) {
                return false;
            }
        }
        if let Some(status) = &self.query.email_status {
            if record.emailstatus.as_ref().map(|s| s.as_str()) != Some(status.as_str()) {
                return false;
            }
        }
        match &self.search {
            None => true,
            Some(re) => {
                let text_hit = record.businessname.as_deref().is_some_and(|s| re.is_match(s))
                    || record.address.as_deref().is_some_and(|s| re.is_match(s))
                    || record.email.iter().any(|e| re.is_match(e));
                let phone_hit = self.phone.is_some()
                    && record.phonenumber.as_ref().and_then(|p| p.as_number()) == self.phone;
                text_hit || phone_hit
            }
        }
    }
}

/// Collection names come from the URL; only plain identifiers are accepted.
pub fn validate_collection_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && !name.starts_with("system")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidCollection(name.to_string()))
    }
}
