//! Registry of running scrapers.
//!
//! At most one process per [`JobKind`]. Every state change happens under the
//! registry lock, so two concurrent start requests for the same kind can never
//! both spawn. Each launched process gets a watcher task that owns the child,
//! records the terminal state in the task store and deregisters the job.

use super::job::{JobError, JobKind, JobStatus};
use super::launcher::{self, LaunchedProcess};
use super::params::JobParams;
use crate::config::{OrphanPolicy, ScraperSettings};
use crate::server::metrics;
use crate::task_store::{TaskFinish, TaskRecord, TaskStore};
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use serde::Serialize;
use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const ORPHAN_REASON: &str = "Task was interrupted (server restart)";

/// Public view of a running job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub task_id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub log_path: String,
    pub params: serde_json::Value,
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl JobOutcome {
    fn from_exit(result: std::io::Result<ExitStatus>) -> Self {
        match result {
            Ok(status) if status.success() => JobOutcome {
                status: JobStatus::Completed,
                exit_code: Some(0),
                error: None,
            },
            Ok(status) => JobOutcome {
                status: JobStatus::Failed,
                exit_code: status.code(),
                error: Some(describe_exit(&status)),
            },
            Err(e) => JobOutcome {
                status: JobStatus::Failed,
                exit_code: None,
                error: Some(format!("Failed to wait for process: {}", e)),
            },
        }
    }

    fn log_line(&self) -> String {
        match (self.status, self.exit_code) {
            (JobStatus::Cancelled, Some(code)) => {
                format!("Process stopped by request (exit code {})", code)
            }
            (JobStatus::Cancelled, None) => "Process stopped by request".to_string(),
            (_, Some(code)) => format!("Process exited with code {}", code),
            (_, None) => format!(
                "Process ended: {}",
                self.error.as_deref().unwrap_or("unknown reason")
            ),
        }
    }
}

fn describe_exit(status: &ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exited with code {}", code),
        (None, Some(sig)) => format!("terminated by signal {}", sig),
        (None, None) => "exited abnormally".to_string(),
    }
}

/// A job removed from the registry by a stop request.
#[derive(Debug, Clone, Serialize)]
pub struct StoppedJob {
    #[serde(flatten)]
    pub snapshot: JobSnapshot,
    pub outcome: JobOutcome,
}

/// Which kinds are running, in the shape the status endpoint reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunningFlags {
    pub postcode: bool,
    pub gmb: bool,
    pub email: bool,
}

struct RunningJob {
    snapshot: JobSnapshot,
    stop_token: CancellationToken,
    watcher: JoinHandle<JobOutcome>,
    done: watch::Receiver<Option<JobOutcome>>,
}

struct Inner {
    settings: ScraperSettings,
    task_store: Arc<dyn TaskStore>,
    jobs: Mutex<HashMap<JobKind, RunningJob>>,
}

/// Handle to the scraper registry. Cheap to clone.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(settings: ScraperSettings, task_store: Arc<dyn TaskStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                task_store,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> &ScraperSettings {
        &self.inner.settings
    }

    pub fn task_store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.task_store
    }

    /// Launches the scraper described by `params` unless one of the same kind
    /// is already registered.
    pub async fn try_start(&self, params: JobParams) -> Result<JobSnapshot, JobError> {
        let kind = params.kind();
        let mut jobs = self.inner.jobs.lock().await;
        if jobs.contains_key(&kind) {
            return Err(JobError::AlreadyRunning(kind));
        }

        let LaunchedProcess {
            mut child,
            pid,
            log_path,
            command_line,
        } = launcher::launch(&self.inner.settings, &params).await?;

        let snapshot = JobSnapshot {
            task_id: Uuid::new_v4().to_string(),
            kind,
            pid,
            start_time: Utc::now(),
            log_path: log_path.to_string_lossy().into_owned(),
            params: params.summary(),
        };

        let record = TaskRecord {
            id: snapshot.task_id.clone(),
            kind,
            status: JobStatus::Running,
            start_time: snapshot.start_time,
            end_time: None,
            log_path: snapshot.log_path.clone(),
            params: snapshot.params.clone(),
            pid: Some(pid),
            exit_code: None,
            error: None,
        };
        if let Err(e) = self.inner.task_store.record_task_start(&record).await {
            error!(
                "Could not record {} task start, killing pid {}: {:#}",
                kind, pid, e
            );
            let _ = launcher::signal_group(pid, Signal::SIGKILL);
            let _ = child.wait().await;
            return Err(JobError::Store(e));
        }

        let stop_token = CancellationToken::new();
        let (done_tx, done) = watch::channel(None);
        let watcher = tokio::spawn(watch_job(
            self.inner.clone(),
            snapshot.clone(),
            child,
            stop_token.clone(),
            done_tx,
        ));
        jobs.insert(
            kind,
            RunningJob {
                snapshot: snapshot.clone(),
                stop_token,
                watcher,
                done,
            },
        );

        metrics::record_job_started(kind.as_str());
        metrics::set_job_running(kind.as_str(), true);
        info!(
            "Started {} scraper (task {}, pid {}): {}",
            kind, snapshot.task_id, pid, command_line
        );
        Ok(snapshot)
    }

    /// Stops the scraper of `kind` and waits until its process has exited.
    pub async fn stop(&self, kind: JobKind) -> Result<StoppedJob, JobError> {
        let job = self
            .inner
            .jobs
            .lock()
            .await
            .remove(&kind)
            .ok_or(JobError::NotRunning(kind))?;
        self.finish_stop(job).await
    }

    /// Stops the live job that belongs to `task_id`.
    pub async fn stop_task(&self, task_id: &str) -> Result<StoppedJob, JobError> {
        let job = {
            let mut jobs = self.inner.jobs.lock().await;
            let kind = jobs
                .iter()
                .find(|(_, job)| job.snapshot.task_id == task_id)
                .map(|(kind, _)| *kind);
            kind.and_then(|kind| jobs.remove(&kind))
        };
        match job {
            Some(job) => self.finish_stop(job).await,
            None => Err(JobError::TaskNotRunning(task_id.to_string())),
        }
    }

    /// Stops every running scraper, returning what was stopped.
    pub async fn stop_all(&self) -> Result<Vec<StoppedJob>, JobError> {
        let drained: Vec<RunningJob> = {
            let mut jobs = self.inner.jobs.lock().await;
            let mut drained: Vec<RunningJob> = jobs.drain().map(|(_, job)| job).collect();
            drained.sort_by_key(|job| job.snapshot.kind);
            drained
        };
        let mut stopped = Vec::with_capacity(drained.len());
        for job in drained {
            stopped.push(self.finish_stop(job).await?);
        }
        Ok(stopped)
    }

    async fn finish_stop(&self, job: RunningJob) -> Result<StoppedJob, JobError> {
        info!(
            "Stopping {} scraper (task {}, pid {})",
            job.snapshot.kind, job.snapshot.task_id, job.snapshot.pid
        );
        job.stop_token.cancel();
        let outcome = job
            .watcher
            .await
            .map_err(|e| JobError::Watcher(e.to_string()))?;
        Ok(StoppedJob {
            snapshot: job.snapshot,
            outcome,
        })
    }

    /// Waits for the task to reach a terminal state. Tasks that already
    /// finished are answered from the task store.
    pub async fn wait(&self, task_id: &str) -> Result<JobOutcome, JobError> {
        let done = {
            let jobs = self.inner.jobs.lock().await;
            jobs.values()
                .find(|job| job.snapshot.task_id == task_id)
                .map(|job| job.done.clone())
        };
        if let Some(mut done) = done {
            let outcome = done
                .wait_for(Option::is_some)
                .await
                .map_err(|_| JobError::Watcher(format!("watcher of task {} went away", task_id)))?;
            if let Some(outcome) = outcome.clone() {
                return Ok(outcome);
            }
        }

        let task = self
            .inner
            .task_store
            .get_task(task_id)
            .await?
            .ok_or_else(|| JobError::TaskNotRunning(task_id.to_string()))?;
        if task.status == JobStatus::Running {
            return Err(JobError::TaskNotRunning(task_id.to_string()));
        }
        Ok(JobOutcome {
            status: task.status,
            exit_code: task.exit_code,
            error: task.error,
        })
    }

    pub async fn get(&self, kind: JobKind) -> Option<JobSnapshot> {
        let jobs = self.inner.jobs.lock().await;
        jobs.get(&kind).map(|job| job.snapshot.clone())
    }

    pub async fn is_running(&self, kind: JobKind) -> bool {
        self.inner.jobs.lock().await.contains_key(&kind)
    }

    /// Running jobs ordered by kind.
    pub async fn snapshot(&self) -> Vec<JobSnapshot> {
        let jobs = self.inner.jobs.lock().await;
        let mut snapshots: Vec<JobSnapshot> =
            jobs.values().map(|job| job.snapshot.clone()).collect();
        snapshots.sort_by_key(|s| s.kind);
        snapshots
    }

    pub async fn running_flags(&self) -> RunningFlags {
        let jobs = self.inner.jobs.lock().await;
        RunningFlags {
            postcode: jobs.contains_key(&JobKind::Postcode),
            gmb: jobs.contains_key(&JobKind::Gmb),
            email: jobs.contains_key(&JobKind::Email),
        }
    }

    /// Settles tasks a previous server process left marked as running.
    /// Must run before the first job is started.
    pub async fn reconcile_orphans(&self, policy: OrphanPolicy) -> anyhow::Result<usize> {
        let orphans = self.inner.task_store.get_running_tasks().await?;
        for task in &orphans {
            let Some(pid) = task.pid.filter(|pid| launcher::is_alive(*pid)) else {
                continue;
            };
            match policy {
                OrphanPolicy::Terminate => {
                    warn!(
                        "Terminating orphaned {} scraper (task {}, pid {})",
                        task.kind, task.id, pid
                    );
                    if let Err(e) = launcher::signal_group(pid, Signal::SIGTERM) {
                        warn!("Could not signal pid {}: {}", pid, e);
                    }
                }
                OrphanPolicy::MarkFailed => {
                    warn!(
                        "Orphaned {} scraper may still be running (task {}, pid {}); \
                         it is no longer tracked",
                        task.kind, task.id, pid
                    );
                }
            }
        }
        let count = self
            .inner
            .task_store
            .mark_stale_tasks_failed(ORPHAN_REASON)
            .await?;
        if count > 0 {
            info!("Marked {} interrupted task(s) as failed", count);
        }
        Ok(count)
    }

    /// Called once the HTTP server has stopped.
    pub async fn shutdown(&self) {
        if !self.inner.settings.stop_jobs_on_shutdown {
            let running = self.snapshot().await;
            if !running.is_empty() {
                info!(
                    "Leaving {} scraper(s) running; they will be reconciled at next startup",
                    running.len()
                );
            }
            return;
        }
        match self.stop_all().await {
            Ok(stopped) => {
                for job in stopped {
                    info!("Stopped {} scraper on shutdown", job.snapshot.kind);
                }
            }
            Err(e) => error!("Failed to stop scrapers on shutdown: {}", e),
        }
    }
}

async fn watch_job(
    inner: Arc<Inner>,
    snapshot: JobSnapshot,
    mut child: Child,
    stop_token: CancellationToken,
    done: watch::Sender<Option<JobOutcome>>,
) -> JobOutcome {
    let exited = tokio::select! {
        result = child.wait() => Some(result),
        _ = stop_token.cancelled() => None,
    };
    let outcome = match exited {
        Some(result) => JobOutcome::from_exit(result),
        None => terminate(&mut child, snapshot.pid, inner.settings.stop_grace_period).await,
    };

    append_log_line(Path::new(&snapshot.log_path), &outcome.log_line()).await;

    let finish = TaskFinish {
        status: outcome.status,
        end_time: Utc::now(),
        exit_code: outcome.exit_code,
        error: outcome.error.clone(),
    };
    if let Err(e) = inner
        .task_store
        .record_task_finish(&snapshot.task_id, &finish)
        .await
    {
        error!(
            "Failed to record finish of task {}: {:#}",
            snapshot.task_id, e
        );
    }

    {
        let mut jobs = inner.jobs.lock().await;
        if release(&mut jobs, &snapshot) {
            metrics::set_job_running(snapshot.kind.as_str(), false);
        }
    }

    metrics::record_job_finished(snapshot.kind.as_str(), outcome.status.as_str());
    done.send_replace(Some(outcome.clone()));
    info!(
        "{} scraper finished (task {}): {}",
        snapshot.kind.display_name(),
        snapshot.task_id,
        outcome.log_line()
    );
    outcome
}

/// Drops the entry for `snapshot` if it is still the registered job of its
/// kind. Returns whether the kind is left without a job.
fn release(jobs: &mut HashMap<JobKind, RunningJob>, snapshot: &JobSnapshot) -> bool {
    match jobs.get(&snapshot.kind) {
        Some(job) if job.snapshot.task_id == snapshot.task_id => {
            jobs.remove(&snapshot.kind);
            true
        }
        Some(_) => false,
        None => true,
    }
}

/// SIGTERM the process group, escalating to SIGKILL after `grace`.
async fn terminate(child: &mut Child, pid: u32, grace: Duration) -> JobOutcome {
    if let Err(e) = launcher::signal_group(pid, Signal::SIGTERM) {
        debug!("SIGTERM to process group {} failed: {}", pid, e);
        let _ = child.start_kill();
    }
    let result = match tokio::time::timeout(grace, child.wait()).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "Process {} did not exit within {:?}, sending SIGKILL",
                pid, grace
            );
            if launcher::signal_group(pid, Signal::SIGKILL).is_err() {
                let _ = child.start_kill();
            }
            child.wait().await
        }
    };
    JobOutcome {
        status: JobStatus::Cancelled,
        exit_code: result.as_ref().ok().and_then(|s| s.code()),
        error: result.err().map(|e| format!("Failed to wait for process: {}", e)),
    }
}

async fn append_log_line(path: &Path, line: &str) {
    let file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .await;
    let result = match file {
        Ok(mut file) => file.write_all(format!("\n{}\n", line).as_bytes()).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!("Could not append to log {:?}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_store::InMemoryTaskStore;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        manager: JobManager,
        store: Arc<InMemoryTaskStore>,
    }

    /// Scripts are run by `sh`; `script` becomes the body of every scraper.
    fn fixture(script: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let scripts_dir = dir.path().join("scripts");
        std::fs::create_dir_all(&scripts_dir).unwrap();
        for kind in JobKind::ALL {
            std::fs::write(scripts_dir.join(kind.default_script()), script).unwrap();
        }
        let settings = ScraperSettings {
            python: "sh".to_string(),
            scripts_dir,
            logs_dir: dir.path().join("logs"),
            stop_grace_period: Duration::from_secs(2),
            ..Default::default()
        };
        let store = Arc::new(InMemoryTaskStore::new());
        let manager = JobManager::new(settings, store.clone());
        Fixture {
            _dir: dir,
            manager,
            store,
        }
    }

    fn gmb_params() -> JobParams {
        JobParams::from_json(JobKind::Gmb, Some(json!({"subsector": "LS1 1"}))).unwrap()
    }

    async fn wait_until_stopped(manager: &JobManager, kind: JobKind) {
        for _ in 0..100 {
            if !manager.is_running(kind).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("{} job never finished", kind);
    }

    #[tokio::test]
    async fn start_registers_and_second_start_conflicts() {
        let f = fixture("sleep 30\n");

        let snapshot = f.manager.try_start(gmb_params()).await.unwrap();
        assert_eq!(snapshot.kind, JobKind::Gmb);
        assert!(f.manager.is_running(JobKind::Gmb).await);
        assert_eq!(
            f.manager.running_flags().await,
            RunningFlags {
                postcode: false,
                gmb: true,
                email: false
            }
        );

        let err = f.manager.try_start(gmb_params()).await.unwrap_err();
        assert!(matches!(err, JobError::AlreadyRunning(JobKind::Gmb)));
        assert_eq!(f.manager.snapshot().await.len(), 1);
        assert_eq!(f.store.list_recent_tasks(10).await.unwrap().len(), 1);

        f.manager.stop(JobKind::Gmb).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_starts_spawn_once() {
        let f = fixture("sleep 30\n");

        let (a, b) = tokio::join!(
            f.manager.try_start(gmb_params()),
            f.manager.try_start(gmb_params())
        );
        assert!(a.is_ok() != b.is_ok());
        assert_eq!(f.store.list_recent_tasks(10).await.unwrap().len(), 1);

        f.manager.stop(JobKind::Gmb).await.unwrap();
    }

    #[tokio::test]
    async fn stop_cancels_and_deregisters() {
        let f = fixture("sleep 30\n");
        let snapshot = f.manager.try_start(gmb_params()).await.unwrap();

        let stopped = f.manager.stop(JobKind::Gmb).await.unwrap();
        assert_eq!(stopped.snapshot.task_id, snapshot.task_id);
        assert_eq!(stopped.outcome.status, JobStatus::Cancelled);
        assert!(!f.manager.is_running(JobKind::Gmb).await);

        let task = f.store.get_task(&snapshot.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, JobStatus::Cancelled);
        assert!(task.end_time.is_some());

        let log = std::fs::read_to_string(&snapshot.log_path).unwrap();
        assert!(log.contains("Process stopped by request"));
    }

    fn registered(task_id: &str) -> RunningJob {
        let (_, done) = watch::channel(None);
        RunningJob {
            snapshot: JobSnapshot {
                task_id: task_id.to_string(),
                kind: JobKind::Gmb,
                pid: 1,
                start_time: Utc::now(),
                log_path: "logs/gmb.log".to_string(),
                params: json!({}),
            },
            stop_token: CancellationToken::new(),
            watcher: tokio::spawn(async {
                JobOutcome {
                    status: JobStatus::Completed,
                    exit_code: Some(0),
                    error: None,
                }
            }),
            done,
        }
    }

    #[tokio::test]
    async fn late_watcher_keeps_newer_job_registered() {
        let old = registered("old").snapshot;
        let newer = registered("newer");
        let newer_snapshot = newer.snapshot.clone();
        let mut jobs = HashMap::new();
        jobs.insert(JobKind::Gmb, newer);

        // A watcher of a job that was stopped and replaced must not clear it
        assert!(!release(&mut jobs, &old));
        assert!(jobs.contains_key(&JobKind::Gmb));

        assert!(release(&mut jobs, &newer_snapshot));
        assert!(jobs.is_empty());
        assert!(release(&mut jobs, &old));
    }

    #[tokio::test]
    async fn wait_returns_outcome_of_running_and_finished_tasks() {
        let f = fixture("sleep 0.3\nexit 4\n");
        let snapshot = f.manager.try_start(gmb_params()).await.unwrap();

        let outcome = f.manager.wait(&snapshot.task_id).await.unwrap();
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.exit_code, Some(4));

        // Answered from the task store once deregistered
        wait_until_stopped(&f.manager, JobKind::Gmb).await;
        let again = f.manager.wait(&snapshot.task_id).await.unwrap();
        assert_eq!(again, outcome);

        assert!(matches!(
            f.manager.wait("unknown").await,
            Err(JobError::TaskNotRunning(_))
        ));
    }

    #[tokio::test]
    async fn stop_when_idle_is_not_running() {
        let f = fixture("sleep 30\n");
        let err = f.manager.stop(JobKind::Email).await.unwrap_err();
        assert!(matches!(err, JobError::NotRunning(JobKind::Email)));
    }

    #[tokio::test]
    async fn natural_exit_completes_task() {
        let f = fixture("echo scraped 12 records\n");
        let snapshot = f.manager.try_start(gmb_params()).await.unwrap();
        wait_until_stopped(&f.manager, JobKind::Gmb).await;

        let task = f.store.get_task(&snapshot.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, JobStatus::Completed);
        assert_eq!(task.exit_code, Some(0));

        let log = std::fs::read_to_string(&snapshot.log_path).unwrap();
        assert!(log.contains("scraped 12 records"));
        assert!(log.contains("Process exited with code 0"));

        // The kind is free again
        f.manager.try_start(gmb_params()).await.unwrap();
    }

    #[tokio::test]
    async fn failing_script_marks_task_failed() {
        let f = fixture("exit 3\n");
        let snapshot = f.manager.try_start(gmb_params()).await.unwrap();
        wait_until_stopped(&f.manager, JobKind::Gmb).await;

        let task = f.store.get_task(&snapshot.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, JobStatus::Failed);
        assert_eq!(task.exit_code, Some(3));
        assert_eq!(task.error.as_deref(), Some("exited with code 3"));
    }

    #[tokio::test]
    async fn term_ignoring_script_is_killed_after_grace() {
        let f = fixture("trap '' TERM\nsleep 30\n");
        f.manager.try_start(gmb_params()).await.unwrap();
        // give sh a moment to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stopped = f.manager.stop(JobKind::Gmb).await.unwrap();
        assert_eq!(stopped.outcome.status, JobStatus::Cancelled);
        assert!(!f.manager.is_running(JobKind::Gmb).await);
    }

    #[tokio::test]
    async fn stop_all_and_stop_task() {
        let f = fixture("sleep 30\n");
        let gmb = f.manager.try_start(gmb_params()).await.unwrap();
        f.manager
            .try_start(JobParams::from_json(JobKind::Email, None).unwrap())
            .await
            .unwrap();
        f.manager
            .try_start(
                JobParams::from_json(JobKind::Postcode, Some(json!({"city": "Leeds"}))).unwrap(),
            )
            .await
            .unwrap();

        let stopped = f.manager.stop_task(&gmb.task_id).await.unwrap();
        assert_eq!(stopped.snapshot.kind, JobKind::Gmb);
        assert!(matches!(
            f.manager.stop_task(&gmb.task_id).await,
            Err(JobError::TaskNotRunning(_))
        ));

        let stopped = f.manager.stop_all().await.unwrap();
        let kinds: Vec<JobKind> = stopped.iter().map(|s| s.snapshot.kind).collect();
        assert_eq!(kinds, vec![JobKind::Postcode, JobKind::Email]);
        assert!(f.manager.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_leaves_registry_empty() {
        let f = fixture("sleep 30\n");
        let manager = JobManager::new(
            ScraperSettings {
                python: "/nonexistent/python".to_string(),
                ..f.manager.settings().clone()
            },
            f.store.clone(),
        );
        let err = manager.try_start(gmb_params()).await.unwrap_err();
        assert!(matches!(err, JobError::Spawn { .. }));
        assert!(!manager.is_running(JobKind::Gmb).await);
        assert!(f.store.list_recent_tasks(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconcile_marks_orphans_failed() {
        let f = fixture("sleep 30\n");
        f.store
            .record_task_start(&TaskRecord {
                id: "left-over".to_string(),
                kind: JobKind::Email,
                status: JobStatus::Running,
                start_time: Utc::now(),
                end_time: None,
                log_path: "logs/email.log".to_string(),
                params: json!({}),
                pid: None,
                exit_code: None,
                error: None,
            })
            .await
            .unwrap();

        let count = f
            .manager
            .reconcile_orphans(OrphanPolicy::MarkFailed)
            .await
            .unwrap();
        assert_eq!(count, 1);
        let task = f.store.get_task("left-over").await.unwrap().unwrap();
        assert_eq!(task.status, JobStatus::Failed);
        assert_eq!(task.error.as_deref(), Some(ORPHAN_REASON));
    }

    #[tokio::test]
    async fn reconcile_terminates_live_orphan() {
        let f = fixture("sleep 30\n");
        let mut command = std::process::Command::new("sleep");
        command.arg("30");
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        let mut orphan = tokio::process::Command::from(command).spawn().unwrap();
        let pid = orphan.id().unwrap();
        f.store
            .record_task_start(&TaskRecord {
                id: "orphan".to_string(),
                kind: JobKind::Gmb,
                status: JobStatus::Running,
                start_time: Utc::now(),
                end_time: None,
                log_path: "logs/gmb.log".to_string(),
                params: json!({}),
                pid: Some(pid),
                exit_code: None,
                error: None,
            })
            .await
            .unwrap();

        f.manager
            .reconcile_orphans(OrphanPolicy::Terminate)
            .await
            .unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), orphan.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
    }
}
