//! One method per API call, so route and payload shapes live in one place.

use super::constants::*;
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

pub struct TestClient {
    /// For requests the helpers below don't cover.
    pub client: reqwest::Client,
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build the test client");
        Self { client, base_url }
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await
            .expect("Request failed")
    }

    async fn post(&self, path: &str, body: Value) -> Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .expect("Request failed")
    }

    // ----------------------------------------------------------------------
    // Scraper Endpoints
    // ----------------------------------------------------------------------

    pub async fn get_status(&self) -> Response {
        self.get("/api/scraper", &[("action", "status")]).await
    }

    /// The `running` flags of the status endpoint.
    pub async fn running(&self) -> Value {
        let status: Value = self.get_status().await.json().await.unwrap();
        status["running"].clone()
    }

    /// Polls the status endpoint until `running.<kind>` equals `expected`.
    pub async fn wait_for_running(&self, kind: &str, expected: bool) {
        let start = std::time::Instant::now();
        while self.running().await[kind] != expected {
            if start.elapsed() > Duration::from_millis(JOB_STATE_TIMEOUT_MS) {
                panic!("{} scraper did not reach running == {}", kind, expected);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn start_scraper(&self, kind: &str, params: Value) -> Response {
        self.post(
            "/api/scraper",
            json!({ "action": format!("start_{}_scraper", kind), "params": params }),
        )
        .await
    }

    pub async fn stop_scraper(&self, kind: &str) -> Response {
        self.post(
            "/api/scraper",
            json!({ "action": "stop_scraper", "params": { "type": kind } }),
        )
        .await
    }

    pub async fn get_scraper_logs(&self, kind: &str, lines: u32) -> Response {
        self.get(
            "/api/scraper",
            &[("action", "logs"), ("type", kind), ("lines", lines.to_string().as_str())],
        )
        .await
    }

    // ----------------------------------------------------------------------
    // City Pipeline Endpoints
    // ----------------------------------------------------------------------

    pub async fn start_city_scrape(&self, body: Value) -> Response {
        self.post("/api/scrape", body).await
    }

    pub async fn city_scrape_status(&self, city: &str) -> Response {
        self.get("/api/scrape", &[("city", city)]).await
    }

    /// Polls the pipeline status until `inProgress` equals `expected`.
    pub async fn wait_for_city_scrape(&self, city: &str, expected: bool) {
        let start = std::time::Instant::now();
        loop {
            let body: Value = self.city_scrape_status(city).await.json().await.unwrap();
            if body["inProgress"] == expected {
                return;
            }
            if start.elapsed() > Duration::from_millis(JOB_STATE_TIMEOUT_MS) {
                panic!("scrape of {} did not reach inProgress == {}", city, expected);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    // ----------------------------------------------------------------------
    // Task Endpoints
    // ----------------------------------------------------------------------

    pub async fn list_tasks(&self) -> Response {
        self.get("/api/tasks", &[]).await
    }

    pub async fn get_task(&self, id: &str) -> Response {
        self.get(&format!("/api/tasks/{}", id), &[]).await
    }

    pub async fn cancel_task(&self, id: &str) -> Response {
        self.post(&format!("/api/tasks/{}/cancel", id), json!({})).await
    }

    // ----------------------------------------------------------------------
    // Log Endpoints
    // ----------------------------------------------------------------------

    pub async fn list_log_files(&self) -> Response {
        self.get("/api/logs", &[]).await
    }

    pub async fn read_log(&self, path: &str, lines: u32) -> Response {
        self.get("/api/logs", &[("path", path), ("lines", lines.to_string().as_str())])
            .await
    }

    // ----------------------------------------------------------------------
    // Data Endpoints
    // ----------------------------------------------------------------------

    pub async fn get_data(&self, action: &str, query: &[(&str, &str)]) -> Response {
        let mut params = vec![("action", action)];
        params.extend_from_slice(query);
        self.get("/api/data", &params).await
    }

    pub async fn post_data(&self, action: &str, params: Value) -> Response {
        self.post("/api/data", json!({ "action": action, "params": params }))
            .await
    }

    pub async fn get_collections(&self) -> Response {
        self.get("/api/collections", &[]).await
    }

    pub async fn get_collection(&self, collection: &str, query: &[(&str, &str)]) -> Response {
        self.get(&format!("/api/businesses/{}", collection), query)
            .await
    }

    pub async fn get_restaurants(&self, query: &[(&str, &str)]) -> Response {
        self.get("/api/restaurants", query).await
    }

    pub async fn export_csv(&self, search: &str) -> Response {
        self.get("/api/export-csv", &[("search", search)]).await
    }

    pub async fn search_cities(&self, search: &str) -> Response {
        self.get("/api/cities", &[("search", search)]).await
    }
}
