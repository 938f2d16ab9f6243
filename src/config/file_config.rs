use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub mongodb_uri: Option<String>,
    pub mongodb_db: Option<String>,
    pub tasks_db: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub scripts_dir: Option<String>,
    pub logs_dir: Option<String>,
    pub exports_dir: Option<String>,
    pub python: Option<String>,
    pub frontend_dir_path: Option<String>,
    pub demo_mode: Option<bool>,

    // Nested tables
    pub scrapers: Option<ScrapersConfig>,
    pub cities: Option<CitiesConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ScrapersConfig {
    pub postcode_script: Option<String>,
    pub gmb_script: Option<String>,
    pub email_script: Option<String>,
    /// Seconds between SIGTERM and SIGKILL when stopping a scraper.
    pub stop_grace_period_secs: Option<u64>,
    /// Stop running scrapers when the server shuts down.
    pub stop_jobs_on_shutdown: Option<bool>,
    /// What to do with tasks left "running" by a previous server process:
    /// "mark_failed" or "terminate".
    pub reconcile_orphans: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CitiesConfig {
    pub cache_ttl_secs: Option<u64>,
    pub max_results: Option<usize>,
    pub max_entries: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
mongodb_db = "Manchester"
port = 4000

[scrapers]
gmb_script = "gmb_v2.py"
stop_grace_period_secs = 2

[cities]
cache_ttl_secs = 60
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.mongodb_db.as_deref(), Some("Manchester"));
        assert_eq!(config.port, Some(4000));
        assert!(config.mongodb_uri.is_none());

        let scrapers = config.scrapers.unwrap();
        assert_eq!(scrapers.gmb_script.as_deref(), Some("gmb_v2.py"));
        assert_eq!(scrapers.stop_grace_period_secs, Some(2));
        assert!(scrapers.postcode_script.is_none());

        assert_eq!(config.cities.unwrap().cache_ttl_secs, Some(60));
    }

    #[test]
    fn reports_parse_errors_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();

        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
