//! Spawning scraper processes and signalling them.

use super::job::{JobError, JobKind};
use super::params::JobParams;
use crate::config::ScraperSettings;
use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// A freshly spawned scraper process.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub child: Child,
    pub pid: u32,
    pub log_path: PathBuf,
    pub command_line: String,
}

/// `<kind>-<UTC timestamp>.log`, sortable by name in start order.
pub fn log_file_name(kind: JobKind, at: DateTime<Utc>) -> String {
    format!(
        "{}-{}.log",
        kind.as_str(),
        at.format("%Y-%m-%dT%H-%M-%S%.3fZ")
    )
}

/// Starts `<python> <script> <args...>` with stdout and stderr appended to a
/// fresh log file under the logs directory.
///
/// The child leads its own process group so a stop request also reaches any
/// browser processes the scraper started.
pub async fn launch(
    settings: &ScraperSettings,
    params: &JobParams,
) -> Result<LaunchedProcess, JobError> {
    let kind = params.kind();
    tokio::fs::create_dir_all(&settings.logs_dir).await?;

    let script = settings.script_path(kind);
    let log_path = settings.logs_dir.join(log_file_name(kind, Utc::now()));

    let stdout_log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let stderr_log = stdout_log.try_clone()?;

    let mut argv = vec![
        settings.python.clone(),
        script.to_string_lossy().into_owned(),
    ];
    argv.extend(params.to_args());
    let command_line =
        shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" "));

    let mut std_command = std::process::Command::new(&argv[0]);
    std_command
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_log))
        .stderr(Stdio::from(stderr_log))
        .process_group(0);
    let mut command = Command::from(std_command);

    debug!("Spawning {}", command_line);
    let child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            let _ = tokio::fs::remove_file(&log_path).await;
            return Err(JobError::Spawn { kind, source });
        }
    };

    let pid = match child.id() {
        Some(pid) => pid,
        None => {
            return Err(JobError::Spawn {
                kind,
                source: std::io::Error::other("process exited before its pid was read"),
            })
        }
    };

    Ok(LaunchedProcess {
        child,
        pid,
        log_path,
        command_line,
    })
}

fn as_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
}

/// Sends `sig` to the process group led by `pid`.
pub fn signal_group(pid: u32, sig: Signal) -> nix::Result<()> {
    match as_pid(pid) {
        Some(pid) => signal::killpg(pid, sig),
        None => Err(nix::errno::Errno::ESRCH),
    }
}

/// True while a process with this pid exists.
pub fn is_alive(pid: u32) -> bool {
    as_pid(pid).is_some_and(|pid| signal::kill(pid, None).is_ok())
}
