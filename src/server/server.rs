use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::cities::CityCache;
use crate::config::CitySettings;
use crate::export::ExportWriter;
use crate::jobs::{CityPipeline, JobManager};
use crate::log_tail::LogTailReader;

use super::business_routes::make_business_routes;
use super::data_routes::make_data_routes;
use super::log_routes::make_log_routes;
use super::metrics::metrics_handler;
use super::pipeline_routes::make_pipeline_routes;
use super::scraper_routes::make_scraper_routes;
use super::task_routes::make_task_routes;
use super::{log_requests, state::*, ServerConfig};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub demo_mode: bool,
    pub version: &'static str,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        demo_mode: state.config.demo_mode,
        version: env!("CARGO_PKG_VERSION"),
    };
    Json(stats)
}

impl ServerState {
    fn new(
        config: ServerConfig,
        job_manager: JobManager,
        business_store: GuardedBusinessStore,
        city_settings: &CitySettings,
        exports_dir: PathBuf,
    ) -> ServerState {
        let task_store = job_manager.task_store().clone();
        let log_reader = LogTailReader::new(job_manager.settings().logs_dir.clone());
        let city_cache = CityCache::new(business_store.clone(), city_settings);
        let city_pipeline = CityPipeline::new(job_manager.clone(), business_store.clone());
        ServerState {
            config,
            start_time: Instant::now(),
            job_manager,
            city_pipeline,
            task_store,
            business_store,
            city_cache: Arc::new(city_cache),
            log_reader: Arc::new(log_reader),
            export_writer: Arc::new(ExportWriter::new(exports_dir)),
        }
    }
}

pub fn make_app(
    config: ServerConfig,
    job_manager: JobManager,
    business_store: GuardedBusinessStore,
    city_settings: &CitySettings,
    exports_dir: PathBuf,
) -> Result<Router> {
    let state = ServerState::new(
        config.clone(),
        job_manager,
        business_store,
        city_settings,
        exports_dir,
    );

    let home_router: Router = match config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    let app: Router = home_router
        .merge(make_scraper_routes(state.clone()))
        .merge(make_task_routes(state.clone()))
        .merge(make_log_routes(state.clone()))
        .merge(make_data_routes(state.clone()))
        .merge(make_business_routes(state.clone()))
        .merge(make_pipeline_routes(state.clone()))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests));

    Ok(app)
}

/// Serves the API until `shutdown` resolves, with Prometheus metrics on a
/// separate port.
pub async fn run_server(
    config: ServerConfig,
    job_manager: JobManager,
    business_store: GuardedBusinessStore,
    city_settings: CitySettings,
    exports_dir: PathBuf,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let app = make_app(config, job_manager, business_store, &city_settings, exports_dir)?;

    let metrics_listener = TcpListener::bind(("0.0.0.0", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;
    let metrics_app = Router::new().route("/metrics", get(metrics_handler));
    let metrics_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            error!("Metrics server failed: {}", e);
        }
    });

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    metrics_server.abort();
    info!("Server stopped");
    Ok(())
}
