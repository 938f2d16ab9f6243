use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scrape_control_server::business_store::{demo_business_store, MongoBusinessStore};
use scrape_control_server::config::{AppConfig, CliConfig, FileConfig};
use scrape_control_server::jobs::JobManager;
use scrape_control_server::server::{self, run_server, RequestsLoggingLevel, ServerConfig};
use scrape_control_server::task_store::{InMemoryTaskStore, MongoTaskStore, TaskStore};
use scrape_control_server::BusinessStore;

/// Absolute form of a CLI path. Paths that don't exist yet are kept as
/// given and joined onto the working directory.
fn parse_path(s: &str) -> Result<PathBuf> {
    let path = PathBuf::from(s);
    let resolved = match path.canonicalize() {
        Ok(canonical) => canonical,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => path,
        Err(e) => return Err(e).with_context(|| format!("Cannot resolve path {:?}", s)),
    };
    if resolved.is_absolute() {
        Ok(resolved)
    } else {
        Ok(std::env::current_dir()?.join(resolved))
    }
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// MongoDB connection string.
    #[clap(long, env = "MONGODB_URI", hide_env_values = true)]
    pub mongodb_uri: Option<String>,

    /// Database holding the scraped businesses, subsector queue and cities.
    #[clap(long, env = "MONGODB_DB", default_value = "Leeds")]
    pub mongodb_db: String,

    /// Database holding the task history.
    #[clap(long, default_value = "scraper_tasks")]
    pub tasks_db: String,

    /// HTTP API port.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// Port of the Prometheus `/metrics` listener.
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// How much of each HTTP request to log.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Directory containing the scraper scripts.
    #[clap(long, default_value = "scripts", value_parser = parse_path)]
    pub scripts_dir: PathBuf,

    /// Directory scraper logs are written to.
    #[clap(long, default_value = "logs", value_parser = parse_path)]
    pub logs_dir: PathBuf,

    /// Directory export files are written to.
    #[clap(long, default_value = "exports", value_parser = parse_path)]
    pub exports_dir: PathBuf,

    /// Interpreter used to run the scraper scripts.
    #[clap(long, default_value = "python3")]
    pub python: String,

    /// Static frontend build to serve instead of the JSON home route.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// Serve seeded sample data from memory instead of MongoDB.
    #[clap(long)]
    pub demo_mode: bool,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            mongodb_uri: self.mongodb_uri.clone(),
            mongodb_db: self.mongodb_db.clone(),
            tasks_db: self.tasks_db.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            scripts_dir: self.scripts_dir.clone(),
            logs_dir: self.logs_dir.clone(),
            exports_dir: self.exports_dir.clone(),
            python: self.python.clone(),
            frontend_dir_path: self.frontend_dir_path.clone(),
            demo_mode: self.demo_mode,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    server::metrics::init_metrics();

    let (task_store, business_store): (Arc<dyn TaskStore>, Arc<dyn BusinessStore>) =
        if config.demo_mode {
            warn!("DEMO MODE: serving seeded sample data from memory, MongoDB is not used");
            (
                Arc::new(InMemoryTaskStore::new()),
                Arc::new(demo_business_store()),
            )
        } else {
            let Some(uri) = config.mongodb_uri.as_deref() else {
                bail!("mongodb_uri is required outside demo mode");
            };
            info!("Connecting to MongoDB (database {:?})...", config.mongodb_db);
            let client = mongodb::Client::with_uri_str(uri)
                .await
                .context("Failed to create MongoDB client")?;
            (
                Arc::new(MongoTaskStore::new(&client, &config.tasks_db)),
                Arc::new(MongoBusinessStore::new(&client, &config.mongodb_db)),
            )
        };

    let job_manager = JobManager::new(config.scrapers.clone(), task_store);
    job_manager
        .reconcile_orphans(config.scrapers.reconcile_orphans)
        .await
        .context("Failed to reconcile tasks left by a previous run")?;

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        metrics_port: config.metrics_port,
        frontend_dir_path: config.frontend_dir_path.clone(),
        demo_mode: config.demo_mode,
    };

    info!("Ready to serve at port {}!", config.port);
    info!("Metrics available at port {}!", config.metrics_port);
    let result = run_server(
        server_config,
        job_manager.clone(),
        business_store,
        config.cities.clone(),
        config.exports_dir.clone(),
        shutdown_signal(),
    )
    .await;

    job_manager.shutdown().await;
    result
}
