use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use prometheus::{
    core::Collector, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;
use tracing::{debug, error, info};

const PREFIX: &str = "scrape_control";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Scraper Job Metrics
    pub static ref JOBS_STARTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_started_total"), "Scraper processes launched"),
        &["kind"]
    ).expect("Failed to create jobs_started_total metric");

    pub static ref JOBS_FINISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_finished_total"), "Scraper processes that reached a terminal state"),
        &["kind", "status"]
    ).expect("Failed to create jobs_finished_total metric");

    pub static ref JOBS_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_jobs_running"), "Whether a scraper of each kind is running"),
        &["kind"]
    ).expect("Failed to create jobs_running metric");

    // Database Metrics
    pub static ref DB_QUERY_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_db_query_duration_seconds"),
            "Database query duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["operation"]
    ).expect("Failed to create db_query_duration_seconds metric");

    // City autocomplete cache
    pub static ref CITY_CACHE_LOOKUPS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_city_cache_lookups_total"), "City search cache lookups"),
        &["result"]
    ).expect("Failed to create city_cache_lookups_total metric");

    pub static ref HTTP_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_errors_total"), "Error responses by class and endpoint"),
        &["class", "endpoint"]
    ).expect("Failed to create http_errors_total metric");

    pub static ref RESIDENT_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_resident_memory_bytes"),
        "Resident set size of the server process"
    ).expect("Failed to create resident_memory_bytes metric");
}

/// Registers every collector. Safe to call more than once.
pub fn init_metrics() {
    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()),
        Box::new(HTTP_ERRORS_TOTAL.clone()),
        Box::new(JOBS_STARTED_TOTAL.clone()),
        Box::new(JOBS_FINISHED_TOTAL.clone()),
        Box::new(JOBS_RUNNING.clone()),
        Box::new(DB_QUERY_DURATION_SECONDS.clone()),
        Box::new(CITY_CACHE_LOOKUPS_TOTAL.clone()),
        Box::new(RESIDENT_MEMORY_BYTES.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            debug!("Metric already registered: {}", e);
        }
    }
    info!("Metrics registered under the {} prefix", PREFIX);
}

/// Collapses ids and collection names so label cardinality stays bounded.
pub fn categorize_endpoint(path: &str) -> &'static str {
    let path = path.split('?').next().unwrap_or(path);
    match path {
        "/" => "home",
        "/api/scraper" => "scraper",
        "/api/scrape" => "scrape",
        "/api/data" => "data",
        "/api/logs" => "logs",
        "/api/cities" => "cities",
        "/api/collections" => "collections",
        "/api/restaurants" => "restaurants",
        "/api/export-csv" => "export_csv",
        "/api/tasks" => "tasks",
        p if p.starts_with("/api/tasks/") => "task",
        p if p.starts_with("/api/businesses/") => "businesses",
        _ => "other",
    }
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let endpoint = categorize_endpoint(path);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(duration.as_secs_f64());
}

pub fn record_job_started(kind: &str) {
    JOBS_STARTED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_job_finished(kind: &str, status: &str) {
    JOBS_FINISHED_TOTAL.with_label_values(&[kind, status]).inc();
}

pub fn set_job_running(kind: &str, running: bool) {
    JOBS_RUNNING
        .with_label_values(&[kind])
        .set(if running { 1.0 } else { 0.0 });
}

pub fn record_db_query(operation: &str, duration: Duration) {
    DB_QUERY_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

pub fn record_city_cache_lookup(hit: bool) {
    CITY_CACHE_LOOKUPS_TOTAL
        .with_label_values(&[if hit { "hit" } else { "miss" }])
        .inc();
}

/// `class` is `client_error` or `server_error`.
pub fn record_error(class: &str, endpoint: &str) {
    HTTP_ERRORS_TOTAL.with_label_values(&[class, endpoint]).inc();
}

fn resident_memory_kib() -> Option<f64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    line.split_whitespace().nth(1)?.parse().ok()
}

pub async fn metrics_handler() -> Response {
    if let Some(kib) = resident_memory_kib() {
        RESIDENT_MEMORY_BYTES.set(kib * 1024.0);
    }

    let mut body = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut body) {
        error!("Could not encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    (
        [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
        body,
    )
        .into_response()
}
