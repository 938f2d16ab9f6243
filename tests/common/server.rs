//! A real app instance per test.
//!
//! Every server owns a temp directory with fake scraper scripts, its own logs
//! and exports directories, a fresh in-memory task history and the demo data.

use super::constants::*;
use scrape_control_server::business_store::demo_business_store;
use scrape_control_server::config::{CitySettings, ScraperSettings};
use scrape_control_server::jobs::JobManager;
use scrape_control_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use scrape_control_server::task_store::InMemoryTaskStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Dropping it shuts the server down and removes the temp directory.
pub struct TestServer {
    /// `http://127.0.0.1:<port>`
    pub base_url: String,

    pub port: u16,

    /// Job manager shared with the server, for direct inspection in tests
    pub job_manager: JobManager,

    /// Directory scraper logs are written to
    pub logs_dir: PathBuf,

    /// Directory export files are written to
    pub exports_dir: PathBuf,

    // held until drop
    _temp_dir: TempDir,
    _stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Writes the fake scrapers (run with `sh`), serves the app on an
    /// ephemeral port and returns once `/` answers.
    pub async fn spawn() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let scripts_dir = temp_dir.path().join("scripts");
        let logs_dir = temp_dir.path().join("logs");
        let exports_dir = temp_dir.path().join("exports");
        std::fs::create_dir_all(&scripts_dir).expect("Failed to create scripts dir");

        let settings = ScraperSettings {
            python: "sh".to_string(),
            scripts_dir: scripts_dir.clone(),
            logs_dir: logs_dir.clone(),
            stop_grace_period: Duration::from_secs(1),
            ..Default::default()
        };
        for (script, content) in [
            (&settings.gmb_script, LONG_RUNNING_SCRIPT),
            (&settings.email_script, QUICK_SCRIPT),
            (&settings.postcode_script, FAILING_SCRIPT),
        ] {
            std::fs::write(scripts_dir.join(script), content).expect("Failed to write script");
        }

        let job_manager = JobManager::new(settings, Arc::new(InMemoryTaskStore::new()));

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("Failed to bind an ephemeral port");
        let port = listener.local_addr().expect("No local address").port();
        let base_url = format!("http://127.0.0.1:{port}");

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            demo_mode: true,
            ..Default::default()
        };

        let app = make_app(
            config,
            job_manager.clone(),
            Arc::new(demo_business_store()),
            &CitySettings::default(),
            exports_dir.clone(),
        )
        .expect("Failed to build the app");

        tokio::spawn(async move {
            let stopped = async move {
                let _ = stop_rx.await;
            };
            axum::serve(listener, app)
                .with_graceful_shutdown(stopped)
                .await
                .expect("Test server crashed");
        });

        let server = Self {
            base_url,
            port,
            job_manager,
            logs_dir,
            exports_dir,
            _temp_dir: temp_dir,
            _stop_tx: Some(stop_tx),
        };

        server.wait_for_ready().await;

        server
    }

    async fn wait_for_ready(&self) {
        let ready_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build readiness client");
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        while tokio::time::Instant::now() < deadline {
            let answered = ready_client
                .get(format!("{}/", self.base_url))
                .send()
                .await
                .is_ok_and(|r| r.status().is_success());
            if answered {
                return;
            }
            tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
        }
        panic!("Test server at {} never became ready", self.base_url);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(stop) = self._stop_tx.take() {
            let _ = stop.send(());
        }
    }
}
