//! Typed start parameters for each scraper and their argv rendering.
//!
//! Every user-supplied value becomes its own argv element; nothing is ever
//! passed through a shell.

use super::job::{JobError, JobKind};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Postcode prefixes for the cities the postcode scraper has been run against.
pub const CITY_PREFIXES: &[(&str, &str)] = &[
    ("leeds", "LS"),
    ("manchester", "M"),
    ("london", "SW"),
    ("birmingham", "B"),
    ("liverpool", "L"),
    ("newcastle", "NE"),
    ("edinburgh", "EH"),
    ("glasgow", "G"),
    ("cardiff", "CF"),
    ("belfast", "BT"),
    ("lincoln", "LN"),
];

pub fn prefix_for_city(city: &str) -> Option<&'static str> {
    let city = city.trim().to_lowercase();
    CITY_PREFIXES
        .iter()
        .find(|(name, _)| *name == city)
        .map(|(_, prefix)| *prefix)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostcodeParams {
    #[serde(deserialize_with = "lenient::string")]
    pub prefix: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub city: Option<String>,
    #[serde(skip_serializing, deserialize_with = "lenient::string")]
    pub mongo_uri: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::number"
    )]
    pub workers: Option<u32>,
    #[serde(deserialize_with = "lenient::flag")]
    pub headless: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GmbParams {
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::string"
    )]
    pub subsector: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::number"
    )]
    pub start: Option<u32>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::number"
    )]
    pub end: Option<u32>,
    #[serde(deserialize_with = "lenient::flag")]
    pub headless: bool,
    #[serde(deserialize_with = "lenient::flag")]
    pub debug: bool,
    #[serde(deserialize_with = "lenient::flag")]
    pub fast: bool,
    #[serde(skip_serializing, deserialize_with = "lenient::string")]
    pub mongo_uri: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailParams {
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::number"
    )]
    pub threads: Option<u32>,
    #[serde(deserialize_with = "lenient::flag")]
    pub headless: bool,
    #[serde(deserialize_with = "lenient::flag")]
    pub debug: bool,
    #[serde(skip_serializing, deserialize_with = "lenient::string")]
    pub mongo_uri: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::string"
    )]
    pub db_name: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::string"
    )]
    pub collection: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::number"
    )]
    pub max_sites: Option<u32>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::string"
    )]
    pub export_csv: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobParams {
    Postcode(PostcodeParams),
    Gmb(GmbParams),
    Email(EmailParams),
}

impl JobParams {
    /// Builds validated parameters for `kind` from the JSON bag of a start request.
    /// A missing or null bag is treated as empty.
    pub fn from_json(kind: JobKind, value: Option<Value>) -> Result<Self, JobError> {
        let value = match value {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(v @ Value::Object(_)) => v,
            Some(_) => {
                return Err(JobError::InvalidParams(
                    "params must be a JSON object".to_string(),
                ))
            }
        };
        let invalid = |e: serde_json::Error| JobError::InvalidParams(e.to_string());

        let params = match kind {
            JobKind::Postcode => {
                let mut p: PostcodeParams = serde_json::from_value(value).map_err(invalid)?;
                if p.prefix.is_none() {
                    p.prefix = p
                        .city
                        .as_deref()
                        .and_then(prefix_for_city)
                        .map(str::to_string);
                }
                if p.prefix.is_none() || p.city.is_none() {
                    return Err(JobError::InvalidParams(
                        "Missing required parameters: prefix and city".to_string(),
                    ));
                }
                JobParams::Postcode(p)
            }
            JobKind::Gmb => {
                let p: GmbParams = serde_json::from_value(value).map_err(invalid)?;
                if let (Some(start), Some(end)) = (p.start, p.end) {
                    if start > end {
                        return Err(JobError::InvalidParams(format!(
                            "start ({}) must not be greater than end ({})",
                            start, end
                        )));
                    }
                }
                JobParams::Gmb(p)
            }
            JobKind::Email => JobParams::Email(serde_json::from_value(value).map_err(invalid)?),
        };

        params.check_values()?;
        Ok(params)
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Postcode(_) => JobKind::Postcode,
            JobParams::Gmb(_) => JobKind::Gmb,
            JobParams::Email(_) => JobKind::Email,
        }
    }

    /// Command line arguments for the scraper script, excluding the script path.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = ArgsBuilder::default();
        match self {
            JobParams::Postcode(p) => {
                args.value("--prefix", &p.prefix);
                args.value("--city", &p.city);
                args.value("--mongo-uri", &p.mongo_uri);
                args.number("--workers", p.workers);
                args.flag("--headless", p.headless);
            }
            JobParams::Gmb(p) => {
                args.value("--subsector", &p.subsector);
                args.number("--start", p.start);
                args.number("--end", p.end);
                args.flag("--headless", p.headless);
                args.flag("--debug", p.debug);
                args.flag("--fast", p.fast);
                args.value("--mongo-uri", &p.mongo_uri);
            }
            JobParams::Email(p) => {
                args.number("--threads", p.threads);
                args.flag("--headless", p.headless);
                args.flag("--debug", p.debug);
                args.value("--mongo-uri", &p.mongo_uri);
                args.value("--db-name", &p.db_name);
                args.value("--collection", &p.collection);
                args.number("--max-sites", p.max_sites);
                args.value("--export-csv", &p.export_csv);
            }
        }
        args.0
    }

    /// The parameters echoed back to clients and stored with the task.
    /// Connection strings are never included.
    pub fn summary(&self) -> Value {
        let value = match self {
            JobParams::Postcode(p) => serde_json::to_value(p),
            JobParams::Gmb(p) => serde_json::to_value(p),
            JobParams::Email(p) => serde_json::to_value(p),
        };
        value.unwrap_or(Value::Null)
    }

    /// Rejects values the script's argument parser would read as options.
    fn check_values(&self) -> Result<(), JobError> {
        let values: Vec<(&str, &Option<String>)> = match self {
            JobParams::Postcode(p) => vec![
                ("prefix", &p.prefix),
                ("city", &p.city),
                ("mongoUri", &p.mongo_uri),
            ],
            JobParams::Gmb(p) => vec![("subsector", &p.subsector), ("mongoUri", &p.mongo_uri)],
            JobParams::Email(p) => vec![
                ("mongoUri", &p.mongo_uri),
                ("dbName", &p.db_name),
                ("collection", &p.collection),
                ("exportCsv", &p.export_csv),
            ],
        };
        for (name, value) in values {
            if let Some(v) = value {
                if v.starts_with('-') {
                    return Err(JobError::InvalidParams(format!(
                        "{} must not start with '-'",
                        name
                    )));
                }
                if v.contains('\0') {
                    return Err(JobError::InvalidParams(format!(
                        "{} contains a NUL byte",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct ArgsBuilder(Vec<String>);

impl ArgsBuilder {
    fn value(&mut self, name: &str, value: &Option<String>) {
        if let Some(v) = value {
            self.0.push(name.to_string());
            self.0.push(v.clone());
        }
    }

    fn number(&mut self, name: &str, value: Option<u32>) {
        if let Some(v) = value {
            self.0.push(name.to_string());
            self.0.push(v.to_string());
        }
    }

    fn flag(&mut self, name: &str, set: bool) {
        if set {
            self.0.push(name.to_string());
        }
    }
}

/// Form-submitted values arrive as strings, numbers or booleans interchangeably.
mod lenient {
    use super::*;
    use serde::de::Error;

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Null => None,
            Value::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            other => return Err(D::Error::custom(format!("expected a string, got {}", other))),
        })
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("expected a positive integer, got {}", n))),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("expected a positive integer, got {:?}", s))),
            other => Err(D::Error::custom(format!(
                "expected a positive integer, got {}",
                other
            ))),
        }
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Null => false,
            Value::Bool(b) => b,
            Value::String(s) => matches!(s.trim(), "true" | "1" | "on" | "yes"),
            Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
            other => return Err(D::Error::custom(format!("expected a boolean, got {}", other))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn postcode_requires_prefix_and_city() {
        let err = JobParams::from_json(JobKind::Postcode, Some(json!({"prefix": "LS"})))
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidParams(_)));
        assert!(err.to_string().contains("prefix and city"));

        let err = JobParams::from_json(JobKind::Postcode, None).unwrap_err();
        assert!(matches!(err, JobError::InvalidParams(_)));
    }

    #[test]
    fn postcode_prefix_defaults_from_known_city() {
        let params =
            JobParams::from_json(JobKind::Postcode, Some(json!({"city": "Leeds"}))).unwrap();
        assert_eq!(
            params.to_args(),
            vec!["--prefix", "LS", "--city", "Leeds"]
        );

        let err = JobParams::from_json(JobKind::Postcode, Some(json!({"city": "Atlantis"})))
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidParams(_)));
    }

    #[test]
    fn postcode_args_keep_values_as_single_elements() {
        let params = JobParams::from_json(
            JobKind::Postcode,
            Some(json!({
                "prefix": "LS",
                "city": "Leeds\"; rm -rf / #",
                "workers": "4",
                "headless": true,
                "mongoUri": "mongodb://db:27017"
            })),
        )
        .unwrap();

        assert_eq!(
            params.to_args(),
            vec![
                "--prefix",
                "LS",
                "--city",
                "Leeds\"; rm -rf / #",
                "--mongo-uri",
                "mongodb://db:27017",
                "--workers",
                "4",
                "--headless"
            ]
        );
    }

    #[test]
    fn gmb_args_from_typical_request() {
        let params = JobParams::from_json(
            JobKind::Gmb,
            Some(json!({"subsector": "LS1 1", "start": 0, "end": 10, "fast": "true", "debug": false})),
        )
        .unwrap();
        assert_eq!(params.kind(), JobKind::Gmb);
        assert_eq!(
            params.to_args(),
            vec!["--subsector", "LS1 1", "--start", "0", "--end", "10", "--fast"]
        );
    }

    #[test]
    fn gmb_rejects_inverted_range() {
        let err = JobParams::from_json(JobKind::Gmb, Some(json!({"start": 5, "end": 2})))
            .unwrap_err();
        assert!(err.to_string().contains("start (5)"));
    }

    #[test]
    fn email_args_and_empty_params() {
        let params = JobParams::from_json(JobKind::Email, None).unwrap();
        assert!(params.to_args().is_empty());

        let params = JobParams::from_json(
            JobKind::Email,
            Some(json!({
                "threads": 8,
                "headless": 1,
                "dbName": "Leeds",
                "collection": "restaurants",
                "maxSites": "",
                "exportCsv": "out.csv"
            })),
        )
        .unwrap();
        assert_eq!(
            params.to_args(),
            vec![
                "--threads",
                "8",
                "--headless",
                "--db-name",
                "Leeds",
                "--collection",
                "restaurants",
                "--export-csv",
                "out.csv"
            ]
        );
    }

    #[test]
    fn rejects_option_like_values() {
        let err = JobParams::from_json(JobKind::Gmb, Some(json!({"subsector": "--debug"})))
            .unwrap_err();
        assert!(err.to_string().contains("subsector"));
    }

    #[test]
    fn rejects_malformed_numbers_and_bags() {
        assert!(JobParams::from_json(JobKind::Email, Some(json!({"threads": -1}))).is_err());
        assert!(JobParams::from_json(JobKind::Email, Some(json!({"threads": "many"}))).is_err());
        assert!(JobParams::from_json(JobKind::Email, Some(json!(["--threads", "2"]))).is_err());
    }

    #[test]
    fn summary_omits_connection_string() {
        let params = JobParams::from_json(
            JobKind::Gmb,
            Some(json!({"subsector": "LS6 2", "mongoUri": "mongodb://secret@db"})),
        )
        .unwrap();
        let summary = params.summary();
        assert_eq!(summary["subsector"], "LS6 2");
        assert!(summary.get("mongoUri").is_none());
        assert_eq!(summary["headless"], false);
    }
}
