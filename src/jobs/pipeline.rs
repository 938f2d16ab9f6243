//! Full scrape of one city: postcodes, then GMB listings, then emails.
//!
//! Each step is an ordinary job started through the [`JobManager`], so it
//! shows up in the status endpoint, the task history and the logs like a
//! manually started scraper. A step that does not complete ends the run.

use super::job::{JobError, JobKind, JobStatus};
use super::manager::JobManager;
use super::params::{prefix_for_city, EmailParams, GmbParams, JobParams, PostcodeParams};
use crate::business_store::{BusinessStore, StoreError, DEFAULT_COLLECTION};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{error, info};

const POSTCODE_WORKERS: u32 = 4;
const EMAIL_THREADS: u32 = 5;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("City prefix not found for {0}")]
    UnknownCity(String),

    #[error("{} scraper did not complete: {detail}", .kind.display_name())]
    StepFailed { kind: JobKind, detail: String },

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Whether a start request launched a new run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStart {
    Started,
    AlreadyRunning,
}

/// Clears the city's in-progress mark when its run ends, however it ends.
struct ActiveCity {
    active: Arc<Mutex<HashSet<String>>>,
    city: String,
}

impl Drop for ActiveCity {
    fn drop(&mut self) {
        self.active.lock().unwrap().remove(&self.city);
    }
}

/// Runs city pipelines in the background, at most one per city.
#[derive(Clone)]
pub struct CityPipeline {
    jobs: JobManager,
    business_store: Arc<dyn BusinessStore>,
    active: Arc<Mutex<HashSet<String>>>,
}

pub fn normalize_city(city: &str) -> String {
    city.trim().to_lowercase()
}

impl CityPipeline {
    pub fn new(jobs: JobManager, business_store: Arc<dyn BusinessStore>) -> Self {
        Self {
            jobs,
            business_store,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_active(&self, city: &str) -> bool {
        self.active.lock().unwrap().contains(&normalize_city(city))
    }

    /// Cities with a run in progress, sorted.
    pub fn active_cities(&self) -> Vec<String> {
        let mut cities: Vec<String> = self.active.lock().unwrap().iter().cloned().collect();
        cities.sort();
        cities
    }

    /// Starts a background run for `city` unless one is already going.
    pub fn start(&self, city: &str) -> Result<PipelineStart, PipelineError> {
        let city = normalize_city(city);
        let prefix =
            prefix_for_city(&city).ok_or_else(|| PipelineError::UnknownCity(city.clone()))?;

        if !self.active.lock().unwrap().insert(city.clone()) {
            return Ok(PipelineStart::AlreadyRunning);
        }
        let guard = ActiveCity {
            active: self.active.clone(),
            city: city.clone(),
        };

        let pipeline = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            info!("Starting scraping process for {} ({})", city, prefix);
            match pipeline.run(&city, prefix).await {
                Ok(()) => info!("Scraping completed successfully for {}", city),
                Err(e) => error!("Error processing {}: {}", city, e),
            }
        });
        Ok(PipelineStart::Started)
    }

    async fn run(&self, city: &str, prefix: &str) -> Result<(), PipelineError> {
        let queued = self.business_store.count_queued_subsectors(prefix).await?;
        if queued == 0 {
            self.run_step(JobParams::Postcode(PostcodeParams {
                prefix: Some(prefix.to_string()),
                city: Some(city.to_string()),
                workers: Some(POSTCODE_WORKERS),
                headless: true,
                ..Default::default()
            }))
            .await?;
        } else {
            info!(
                "{} subsectors already queued for {}, skipping postcode scraping",
                queued, city
            );
        }

        self.run_step(JobParams::Gmb(GmbParams {
            headless: true,
            fast: true,
            ..Default::default()
        }))
        .await?;

        self.run_step(JobParams::Email(EmailParams {
            threads: Some(EMAIL_THREADS),
            headless: true,
            collection: Some(DEFAULT_COLLECTION.to_string()),
            ..Default::default()
        }))
        .await
    }

    async fn run_step(&self, params: JobParams) -> Result<(), PipelineError> {
        let kind = params.kind();
        let snapshot = self.jobs.try_start(params).await?;
        info!("Running {} scraper as task {}", kind, snapshot.task_id);
        let outcome = self.jobs.wait(&snapshot.task_id).await?;
        match outcome.status {
            JobStatus::Completed => Ok(()),
            status => Err(PipelineError::StepFailed {
                kind,
                detail: outcome
                    .error
                    .unwrap_or_else(|| status.as_str().to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::business_store::{InMemoryBusinessStore, SUBSECTOR_QUEUE_COLLECTION};
    use crate::config::ScraperSettings;
    use crate::task_store::{InMemoryTaskStore, TaskStore};
    use bson::doc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        pipeline: CityPipeline,
        tasks: Arc<InMemoryTaskStore>,
        store: Arc<InMemoryBusinessStore>,
    }

    /// Every scraper echoes its arguments; `overrides` replaces single scripts.
    fn fixture(overrides: &[(JobKind, &str)]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let scripts_dir = dir.path().join("scripts");
        std::fs::create_dir_all(&scripts_dir).unwrap();
        for kind in JobKind::ALL {
            let script = overrides
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, s)| s.to_string())
                .unwrap_or_else(|| format!("echo \"{} $*\"\n", kind));
            std::fs::write(scripts_dir.join(kind.default_script()), script).unwrap();
        }
        let settings = ScraperSettings {
            python: "sh".to_string(),
            scripts_dir,
            logs_dir: dir.path().join("logs"),
            stop_grace_period: Duration::from_secs(1),
            ..Default::default()
        };
        let tasks = Arc::new(InMemoryTaskStore::new());
        let store = Arc::new(InMemoryBusinessStore::new());
        let jobs = JobManager::new(settings, tasks.clone());
        Fixture {
            dir,
            pipeline: CityPipeline::new(jobs, store.clone()),
            tasks,
            store,
        }
    }

    async fn wait_until_idle(pipeline: &CityPipeline, city: &str) {
        for _ in 0..200 {
            if !pipeline.is_active(city) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("pipeline for {} never finished", city);
    }

    /// Kinds in the order they were started.
    async fn started_kinds(tasks: &InMemoryTaskStore) -> Vec<JobKind> {
        let mut recent = tasks.list_recent_tasks(10).await.unwrap();
        recent.sort_by_key(|t| t.start_time);
        recent.iter().map(|t| t.kind).collect()
    }

    #[tokio::test]
    async fn runs_every_step_in_order() {
        let f = fixture(&[]);
        assert_eq!(f.pipeline.start(" Leeds ").unwrap(), PipelineStart::Started);
        assert!(f.pipeline.is_active("leeds"));
        wait_until_idle(&f.pipeline, "leeds").await;

        assert_eq!(
            started_kinds(&f.tasks).await,
            vec![JobKind::Postcode, JobKind::Gmb, JobKind::Email]
        );
        let tasks = f.tasks.list_recent_tasks(10).await.unwrap();
        assert!(tasks.iter().all(|t| t.status == JobStatus::Completed));

        let postcode = tasks.iter().find(|t| t.kind == JobKind::Postcode).unwrap();
        let log = std::fs::read_to_string(&postcode.log_path).unwrap();
        assert!(log.contains("--prefix LS --city leeds --workers 4 --headless"));
        let email = tasks.iter().find(|t| t.kind == JobKind::Email).unwrap();
        let log = std::fs::read_to_string(&email.log_path).unwrap();
        assert!(log.contains("--threads 5 --headless --collection restaurants"));
        assert!(f.dir.path().join("logs").is_dir());
    }

    #[tokio::test]
    async fn queued_subsectors_skip_postcode_step() {
        let f = fixture(&[]);
        f.store.insert(
            SUBSECTOR_QUEUE_COLLECTION,
            doc! { "subsector": "M1 1", "scrapedsuccessfully": false },
        );
        f.pipeline.start("manchester").unwrap();
        wait_until_idle(&f.pipeline, "manchester").await;

        assert_eq!(
            started_kinds(&f.tasks).await,
            vec![JobKind::Gmb, JobKind::Email]
        );
    }

    #[tokio::test]
    async fn failed_step_ends_the_run() {
        let f = fixture(&[(JobKind::Gmb, "exit 2\n")]);
        f.pipeline.start("leeds").unwrap();
        wait_until_idle(&f.pipeline, "leeds").await;

        assert_eq!(
            started_kinds(&f.tasks).await,
            vec![JobKind::Postcode, JobKind::Gmb]
        );
        // The city can be started again once the failed run is over
        assert_eq!(f.pipeline.start("leeds").unwrap(), PipelineStart::Started);
        wait_until_idle(&f.pipeline, "leeds").await;
    }

    #[tokio::test]
    async fn one_run_per_city() {
        let f = fixture(&[(JobKind::Postcode, "sleep 0.5\n")]);
        assert_eq!(f.pipeline.start("leeds").unwrap(), PipelineStart::Started);
        assert_eq!(
            f.pipeline.start("LEEDS").unwrap(),
            PipelineStart::AlreadyRunning
        );
        assert_eq!(f.pipeline.active_cities(), vec!["leeds".to_string()]);
        wait_until_idle(&f.pipeline, "leeds").await;
        assert!(f.pipeline.active_cities().is_empty());
    }

    #[tokio::test]
    async fn unknown_city_is_rejected() {
        let f = fixture(&[]);
        assert!(matches!(
            f.pipeline.start("Atlantis"),
            Err(PipelineError::UnknownCity(city)) if city == "atlantis"
        ));
        assert!(!f.pipeline.is_active("atlantis"));
    }
}
