mod file_config;

pub use file_config::{CitiesConfig, FileConfig, ScrapersConfig};

use crate::jobs::JobKind;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Values taken from the command line, before the TOML file is applied.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub mongodb_uri: Option<String>,
    pub mongodb_db: String,
    pub tasks_db: String,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub scripts_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub exports_dir: PathBuf,
    pub python: String,
    pub frontend_dir_path: Option<String>,
    pub demo_mode: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub mongodb_uri: Option<String>,
    pub mongodb_db: String,
    pub tasks_db: String,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub exports_dir: PathBuf,
    pub frontend_dir_path: Option<String>,
    pub demo_mode: bool,

    // Scraper and city lookup settings
    pub scrapers: ScraperSettings,
    pub cities: CitySettings,
}

/// What happens at startup to tasks a previous server process left in "running".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    /// Record the task as failed and leave the process alone.
    #[default]
    MarkFailed,
    /// SIGTERM the recorded pid if it is still alive, then record the task as failed.
    Terminate,
}

impl OrphanPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mark_failed" => Some(OrphanPolicy::MarkFailed),
            "terminate" => Some(OrphanPolicy::Terminate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperSettings {
    pub python: String,
    pub scripts_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub postcode_script: String,
    pub gmb_script: String,
    pub email_script: String,
    pub stop_grace_period: Duration,
    pub stop_jobs_on_shutdown: bool,
    pub reconcile_orphans: OrphanPolicy,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            scripts_dir: PathBuf::from("scripts"),
            logs_dir: PathBuf::from("logs"),
            postcode_script: JobKind::Postcode.default_script().to_string(),
            gmb_script: JobKind::Gmb.default_script().to_string(),
            email_script: JobKind::Email.default_script().to_string(),
            stop_grace_period: Duration::from_secs(5),
            stop_jobs_on_shutdown: false,
            reconcile_orphans: OrphanPolicy::MarkFailed,
        }
    }
}

impl ScraperSettings {
    pub fn script_path(&self, kind: JobKind) -> PathBuf {
        let script = match kind {
            JobKind::Postcode => &self.postcode_script,
            JobKind::Gmb => &self.gmb_script,
            JobKind::Email => &self.email_script,
        };
        self.scripts_dir.join(script)
    }
}

#[derive(Debug, Clone)]
pub struct CitySettings {
    pub cache_ttl: Duration,
    pub max_results: usize,
    /// Cached search texts kept at once.
    pub max_entries: usize,
}

impl Default for CitySettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30 * 60),
            max_results: 10,
            max_entries: 1000,
        }
    }
}

impl AppConfig {
    /// Merges the command line with the optional TOML file; the file wins
    /// for every key it sets.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let demo_mode = file.demo_mode.unwrap_or(cli.demo_mode);

        let mongodb_uri = file
            .mongodb_uri
            .or_else(|| cli.mongodb_uri.clone())
            .filter(|uri| !uri.trim().is_empty());
        if mongodb_uri.is_none() && !demo_mode {
            bail!(
                "mongodb_uri must be specified via --mongodb-uri, MONGODB_URI or in config file \
                 (or run with --demo-mode)"
            );
        }

        let mongodb_db = file.mongodb_db.unwrap_or_else(|| cli.mongodb_db.clone());
        let tasks_db = file.tasks_db.unwrap_or_else(|| cli.tasks_db.clone());
        if mongodb_db.is_empty() || tasks_db.is_empty() {
            bail!("Database names must not be empty");
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let scripts_dir = file
            .scripts_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.scripts_dir.clone());
        let logs_dir = file
            .logs_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.logs_dir.clone());
        let exports_dir = file
            .exports_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.exports_dir.clone());

        // Created on demand, but must not collide with a regular file
        ensure_dir_or_absent(&logs_dir, "logs_dir")?;
        ensure_dir_or_absent(&exports_dir, "exports_dir")?;

        let python = file.python.unwrap_or_else(|| cli.python.clone());
        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());

        // Scraper settings - merge file config with defaults
        let defaults = ScraperSettings::default();
        let scrapers_file = file.scrapers.unwrap_or_default();
        let reconcile_orphans = match scrapers_file.reconcile_orphans {
            Some(value) => match OrphanPolicy::parse(&value) {
                Some(policy) => policy,
                None => bail!(
                    "Invalid scrapers.reconcile_orphans value {:?} (expected mark_failed or terminate)",
                    value
                ),
            },
            None => defaults.reconcile_orphans,
        };
        let scrapers = ScraperSettings {
            python,
            scripts_dir,
            logs_dir,
            postcode_script: scrapers_file
                .postcode_script
                .unwrap_or(defaults.postcode_script),
            gmb_script: scrapers_file.gmb_script.unwrap_or(defaults.gmb_script),
            email_script: scrapers_file.email_script.unwrap_or(defaults.email_script),
            stop_grace_period: scrapers_file
                .stop_grace_period_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.stop_grace_period),
            stop_jobs_on_shutdown: scrapers_file
                .stop_jobs_on_shutdown
                .unwrap_or(defaults.stop_jobs_on_shutdown),
            reconcile_orphans,
        };

        let cities_file = file.cities.unwrap_or_default();
        let city_defaults = CitySettings::default();
        let cities = CitySettings {
            cache_ttl: cities_file
                .cache_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(city_defaults.cache_ttl),
            max_results: cities_file
                .max_results
                .unwrap_or(city_defaults.max_results)
                .max(1),
            max_entries: cities_file
                .max_entries
                .unwrap_or(city_defaults.max_entries)
                .max(1),
        };

        Ok(Self {
            mongodb_uri,
            mongodb_db,
            tasks_db,
            port,
            metrics_port,
            logging_level,
            exports_dir,
            frontend_dir_path,
            demo_mode,
            scrapers,
            cities,
        })
    }

    pub fn logs_dir(&self) -> &Path {
        &self.scrapers.logs_dir
    }
}

fn ensure_dir_or_absent(path: &Path, name: &str) -> Result<()> {
    if path.exists() && !path.is_dir() {
        bail!("{} is not a directory: {:?}", name, path);
    }
    Ok(())
}

/// Case-insensitive, same names as `--logging-level`.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
