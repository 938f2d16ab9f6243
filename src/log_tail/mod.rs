//! Bounded reads of scraper log files.
//!
//! Every path handed in by a client is confined to the logs directory after
//! symlinks and `..` are resolved. Tails are read backwards from the end of
//! the file in fixed-size blocks so large logs are never loaded whole.

use crate::jobs::JobKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub const DEFAULT_TAIL_LINES: usize = 100;
pub const MIN_TAIL_LINES: usize = 10;
pub const MAX_TAIL_LINES: usize = 1000;

const BLOCK_SIZE: u64 = 8 * 1024;

/// Requested line counts outside [10, 1000] are pulled into range.
pub fn clamp_lines(requested: Option<i64>) -> usize {
    match requested {
        None => DEFAULT_TAIL_LINES,
        Some(n) if n < MIN_TAIL_LINES as i64 => MIN_TAIL_LINES,
        Some(n) if n > MAX_TAIL_LINES as i64 => MAX_TAIL_LINES,
        Some(n) => n as usize,
    }
}

#[derive(Debug, Error)]
pub enum LogTailError {
    #[error("Invalid log file path")]
    InvalidPath(String),

    #[error("Log file not found")]
    NotFound(String),

    #[error("No log file found for {} scraper", .0.display_name())]
    NoLogs(JobKind),

    #[error("Failed to read log: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogFileInfo {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFileTail {
    pub content: String,
    pub total_lines: usize,
}

#[derive(Debug, Clone)]
pub struct LogTailReader {
    logs_dir: PathBuf,
}

impl LogTailReader {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Maps a client supplied `logs/<name>` or `<name>` to a file inside the
    /// logs directory.
    pub async fn resolve(&self, requested: &str) -> Result<PathBuf, LogTailError> {
        let invalid = || LogTailError::InvalidPath(requested.to_string());

        let relative = Path::new(requested);
        let relative = relative.strip_prefix("logs").unwrap_or(relative);
        let mut components = relative.components();
        let name = match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => name,
            _ => return Err(invalid()),
        };
        if Path::new(name).extension().and_then(|e| e.to_str()) != Some("log") {
            return Err(invalid());
        }

        let dir = match tokio::fs::canonicalize(&self.logs_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LogTailError::NotFound(requested.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let resolved = match tokio::fs::canonicalize(dir.join(name)).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LogTailError::NotFound(requested.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if !resolved.starts_with(&dir) {
            return Err(invalid());
        }
        if !tokio::fs::metadata(&resolved).await?.is_file() {
            return Err(LogTailError::NotFound(requested.to_string()));
        }
        Ok(resolved)
    }

    /// Every `*.log` file in the logs directory, newest first.
    pub async fn list_files(&self) -> Result<Vec<LogFileInfo>, LogTailError> {
        let mut entries = match tokio::fs::read_dir(&self.logs_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".log") {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::from)
                .unwrap_or_else(|_| Utc::now());
            files.push(LogFileInfo {
                path: format!("logs/{}", name),
                name,
                size: metadata.len(),
                modified,
            });
        }
        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(files)
    }

    /// Newest log written by scrapers of `kind`.
    pub async fn latest_log(&self, kind: JobKind) -> Result<Option<PathBuf>, LogTailError> {
        let prefixes = [format!("{}-", kind.as_str()), format!("{}_", kind.as_str())];
        let latest = self
            .list_files()
            .await?
            .into_iter()
            .find(|f| prefixes.iter().any(|p| f.name.starts_with(p.as_str())));
        Ok(latest.map(|f| self.logs_dir.join(f.name)))
    }

    /// The live job's log when it exists, otherwise the newest on disk.
    async fn log_for_kind(
        &self,
        kind: JobKind,
        current: Option<&Path>,
    ) -> Result<Option<PathBuf>, LogTailError> {
        if let Some(path) = current {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Ok(Some(path.to_path_buf()));
            }
        }
        self.latest_log(kind).await
    }

    /// Last `lines` lines of the log for `kind`. `current` is the log of the
    /// live job, if any.
    pub async fn tail_for_kind(
        &self,
        kind: JobKind,
        lines: usize,
        current: Option<&Path>,
    ) -> Result<Vec<String>, LogTailError> {
        let path = self
            .log_for_kind(kind, current)
            .await?
            .ok_or(LogTailError::NoLogs(kind))?;
        Ok(read_tail(&path, lines).await?)
    }

    /// Each kind's log under an `=== <file> ===` header.
    pub async fn tail_all(
        &self,
        lines: usize,
        current: &HashMap<JobKind, PathBuf>,
    ) -> Result<Vec<String>, LogTailError> {
        let mut out = Vec::new();
        for kind in JobKind::ALL {
            let live = current.get(&kind).map(PathBuf::as_path);
            let Some(path) = self.log_for_kind(kind, live).await? else {
                continue;
            };
            let tail = read_tail(&path, lines).await?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| kind.to_string());
            if !out.is_empty() {
                out.push(String::new());
            }
            out.push(format!("=== {} ===", name));
            out.extend(tail);
        }
        Ok(out)
    }

    /// Tail of a client-named log file plus its total line count.
    pub async fn read_file(
        &self,
        requested: &str,
        lines: usize,
    ) -> Result<LogFileTail, LogTailError> {
        let path = self.resolve(requested).await?;
        let tail = read_tail(&path, lines).await?;
        let total_lines = count_lines(&path).await?;
        Ok(LogFileTail {
            content: tail.join("\n"),
            total_lines,
        })
    }
}

/// Reads backwards block by block until `lines` complete lines are buffered.
pub async fn read_tail(path: &Path, lines: usize) -> std::io::Result<Vec<String>> {
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();

    let mut pos = len;
    let mut buffer: Vec<u8> = Vec::new();
    let mut newlines = 0usize;
    while pos > 0 && newlines <= lines {
        let size = BLOCK_SIZE.min(pos);
        pos -= size;
        file.seek(SeekFrom::Start(pos)).await?;
        let mut block = vec![0u8; size as usize];
        file.read_exact(&mut block).await?;
        newlines += block.iter().filter(|b| **b == b'\n').count();
        block.extend_from_slice(&buffer);
        buffer = block;
    }

    let text = String::from_utf8_lossy(&buffer);
    let mut all: Vec<&str> = text.lines().collect();
    if pos > 0 && !all.is_empty() {
        // starts mid-line
        all.remove(0);
    }
    let skip = all.len().saturating_sub(lines);
    Ok(all[skip..].iter().map(|s| s.to_string()).collect())
}

async fn count_lines(path: &Path) -> std::io::Result<usize> {
    let mut file = File::open(path).await?;
    let mut block = vec![0u8; BLOCK_SIZE as usize];
    let mut count = 0;
    let mut last = None;
    loop {
        let read = file.read(&mut block).await?;
        if read == 0 {
            break;
        }
        count += block[..read].iter().filter(|b| **b == b'\n').count();
        last = Some(block[read - 1]);
    }
    // an unterminated last line still counts
    if matches!(last, Some(b) if b != b'\n') {
        count += 1;
    }
    Ok(count)
}
