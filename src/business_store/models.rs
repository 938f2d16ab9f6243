use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Phone numbers are stored either as numbers or as free text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PhoneNumber {
    Number(i64),
    Text(String),
}

impl PhoneNumber {
    pub fn as_number(&self) -> Option<i64> {
        match self {
            PhoneNumber::Number(n) => Some(*n),
            PhoneNumber::Text(_) => None,
        }
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhoneNumber::Number(n) => write!(f, "{}", n),
            PhoneNumber::Text(s) => f.write_str(s),
        }
    }
}

/// Progress of the email scraper on a business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailStatus {
    Pending,
    Found,
    Checked,
    Failed,
    Other(String),
}

impl EmailStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => EmailStatus::Pending,
            "found" => EmailStatus::Found,
            "checked" => EmailStatus::Checked,
            "failed" => EmailStatus::Failed,
            other => EmailStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Found => "found",
            EmailStatus::Checked => "checked",
            EmailStatus::Failed => "failed",
            EmailStatus::Other(s) => s,
        }
    }
}

impl Serialize for EmailStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A scraped business. Every field except the id is optional because the
/// scrapers write whatever they managed to extract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusinessRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub businessname: Option<String>,
    pub address: Option<String>,
    pub phonenumber: Option<PhoneNumber>,
    pub website: Option<String>,
    pub email: Vec<String>,
    pub stars: Option<String>,
    pub numberofreviews: Option<i64>,
    pub subsector: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
    pub emailstatus: Option<EmailStatus>,
    pub emailscraped_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social_profiles: Option<serde_json::Value>,
}

impl BusinessRecord {
    /// Decodes whatever shape the document has; unknown field types become
    /// `None` or empty rather than failing.
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.get("_id").map(id_string).unwrap_or_default(),
            businessname: text(doc.get("businessname")),
            address: text(doc.get("address")),
            phonenumber: phone(doc.get("phonenumber")),
            website: text(doc.get("website")),
            email: emails(doc.get("email")),
            stars: stars(doc.get("stars")),
            numberofreviews: integer(doc.get("numberofreviews")),
            subsector: text(doc.get("subsector")),
            scraped_at: timestamp(doc.get("scraped_at")),
            emailstatus: text(doc.get("emailstatus")).map(|s| EmailStatus::parse(&s)),
            emailscraped_at: timestamp(doc.get("emailscraped_at")),
            social_profiles: match doc.get("social_profiles") {
                None | Some(Bson::Null) => None,
                Some(value) => Some(value.clone().into_relaxed_extjson()),
            },
        }
    }

    pub fn has_email(&self) -> bool {
        !self.email.is_empty()
    }

    pub fn has_website(&self) -> bool {
        self.website
            .as_deref()
            .is_some_and(|w| !w.is_empty() && w != "N/A")
    }

    /// Star rating as a number, when the stored text is one.
    pub fn stars_value(&self) -> Option<f64> {
        self.stars
            .as_deref()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }
}

/// `_id` rendered the way clients send it back: hex for ObjectIds.
pub fn id_string(value: &Bson) -> String {
    match value {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn text(value: Option<&Bson>) -> Option<String> {
    match value? {
        Bson::String(s) => Some(s.clone()),
        Bson::Int32(n) => Some(n.to_string()),
        Bson::Int64(n) => Some(n.to_string()),
        Bson::Double(d) => Some(d.to_string()),
        _ => None,
    }
}

fn integer(value: Option<&Bson>) -> Option<i64> {
    match value? {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(d) if d.fract() == 0.0 && d.is_finite() => Some(*d as i64),
        Bson::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn phone(value: Option<&Bson>) -> Option<PhoneNumber> {
    match value? {
        Bson::Int32(n) => Some(PhoneNumber::Number(i64::from(*n))),
        Bson::Int64(n) => Some(PhoneNumber::Number(*n)),
        Bson::Double(d) if d.fract() == 0.0 && d.is_finite() => {
            Some(PhoneNumber::Number(*d as i64))
        }
        Bson::String(s) if !s.is_empty() => Some(PhoneNumber::Text(s.clone())),
        _ => None,
    }
}

fn emails(value: Option<&Bson>) -> Vec<String> {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };
    match value {
        Some(Bson::String(s)) => non_empty(s).into_iter().collect(),
        Some(Bson::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Bson::String(s) => non_empty(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn stars(value: Option<&Bson>) -> Option<String> {
    match value? {
        Bson::String(s) if !s.is_empty() => Some(s.clone()),
        Bson::Double(d) => Some(d.to_string()),
        Bson::Int32(n) => Some(n.to_string()),
        Bson::Int64(n) => Some(n.to_string()),
        _ => None,
    }
}

fn timestamp(value: Option<&Bson>) -> Option<DateTime<Utc>> {
    match value? {
        Bson::DateTime(dt) => Some(dt.to_chrono()),
        Bson::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|naive| naive.and_utc())
            })
            .ok(),
        _ => None,
    }
}

/// One unit of GMB scraping work from `subsector_queue`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsectorEntry {
    #[serde(rename = "_id")]
    pub id: String,
    pub subsector: String,
    pub scrapedsuccessfully: bool,
    pub totalrecordsfound: i64,
}

impl SubsectorEntry {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.get("_id").map(id_string).unwrap_or_default(),
            subsector: text(doc.get("subsector")).unwrap_or_default(),
            scrapedsuccessfully: matches!(doc.get("scrapedsuccessfully"), Some(Bson::Boolean(true))),
            totalrecordsfound: integer(doc.get("totalrecordsfound")).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsectorFilter {
    All,
    Completed,
    Pending,
}

impl SubsectorFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(SubsectorFilter::All),
            "completed" => Some(SubsectorFilter::Completed),
            "pending" => Some(SubsectorFilter::Pending),
            _ => None,
        }
    }

    pub fn accepts(&self, entry: &SubsectorEntry) -> bool {
        match self {
            SubsectorFilter::All => true,
            SubsectorFilter::Completed => entry.scrapedsuccessfully,
            SubsectorFilter::Pending => !entry.scrapedsuccessfully,
        }
    }
}

/// Reference row used by the city autocomplete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CityEntry {
    pub area_covered: String,
    pub postcode_area: String,
}

impl CityEntry {
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            area_covered: text(doc.get("area_covered"))?,
            postcode_area: text(doc.get("postcode_area")).unwrap_or_default(),
        })
    }
}

/// One page of businesses plus the size of the whole result set.
#[derive(Debug, Clone, PartialEq)]
pub struct BusinessPage {
    pub businesses: Vec<BusinessRecord>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubsectorCounts {
    pub total: u64,
    pub completed: u64,
    pub pending: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessCounts {
    pub total: u64,
    /// Missing statuses are reported as `unknown`.
    pub by_email_status: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BusinessStats {
    pub subsectors: SubsectorCounts,
    pub businesses: BusinessCounts,
}

/// Queue sizes reported alongside scraper status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DbCounts {
    pub subsector_queue: u64,
    pub restaurants: u64,
    pub pending_emails: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub total_records: u64,
    pub records_with_email: u64,
    pub records_with_website: u64,
    pub unique_subsectors: u64,
    /// One decimal place, `"0.0"` when nothing is rated.
    pub avg_stars: String,
}

impl CollectionStats {
    pub fn format_avg_stars(sum: f64, count: u64) -> String {
        if count == 0 {
            "0.0".to_string()
        } else {
            format!("{:.1}", sum / count as f64)
        }
    }
}
