//! Newline-delimited JSON event log for analyze requests.
//!
//! One line is written per analyze outcome and per failed history write.
//! Lines go to an optional size-rotated file; write failures are counted
//! and logged but never reach the request path.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

pub const EVENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_bytes: None,
            keep: 1,
            compress: false,
        }
    }
}

/// Append-only writer that rolls `<path>` to `<path>.1 .. <path>.N` once the
/// active file reaches `max_bytes`.  With `compress` set the newest backup is
/// gzipped to `<path>.1.gz`, on the blocking pool when a tokio runtime is
/// running and inline otherwise.
pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    rotation: RotationConfig,
    rotations: u64,
}

impl RotatingWriter {
    pub fn open(path: &str, rotation: RotationConfig) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            file,
            rotation,
            rotations: 0,
        })
    }

    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.rotation.max_bytes {
            if self.current_size().is_some_and(|len| len >= limit) {
                self.rotate()?;
            }
        }
        writeln!(self.file, "{}", line)
    }

    pub fn current_size(&self) -> Option<u64> {
        self.path.metadata().ok().map(|m| m.len())
    }

    fn backup_path(&self, idx: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", idx));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        let keep = self.rotation.keep;
        if keep > 0 {
            for idx in (1..keep).rev() {
                let from = self.backup_path(idx);
                if from.exists() {
                    fs::rename(&from, self.backup_path(idx + 1))?;
                }
            }
            if self.rotation.compress {
                self.rotations += 1;
                let mut staged = self.path.clone().into_os_string();
                staged.push(format!(".rotating-{}", self.rotations));
                let staged = PathBuf::from(staged);
                fs::rename(&self.path, &staged)?;
                let newest = self.backup_path(1);
                // Gzip off the async workers; the writer lock is held here.
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn_blocking(move || compress_backup(&staged, &newest));
                    }
                    Err(_) => compress_backup(&staged, &newest),
                }
            } else {
                fs::rename(&self.path, self.backup_path(1))?;
            }
        }
        self.file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }
}

/// Gzip `staged` into `<newest>.gz` and drop it.  If compression fails the
/// rotated lines are kept uncompressed at `newest`.
fn compress_backup(staged: &Path, newest: &Path) {
    let compressed = fs::read(staged).and_then(|data| {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&data)?;
        gz.finish()
    });
    let mut gz_name = newest.as_os_str().to_owned();
    gz_name.push(".gz");
    match compressed.and_then(|buf| fs::write(PathBuf::from(gz_name), buf)) {
        Ok(()) => {
            let _ = fs::remove_file(staged);
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to compress rotated event log");
            let _ = fs::rename(staged, newest);
        }
    }
}

/// Outcome label recorded on each analyze event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzeOutcome {
    Success,
    Unauthenticated,
    AuthUnavailable,
    Rejected,
    ProviderFailed,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeEvent<'a> {
    pub user_id: Option<&'a str>,
    pub outcome: AnalyzeOutcome,
    pub file_count: usize,
    pub total_bytes: usize,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<&'a str>,
}

#[derive(Clone, Default)]
pub struct EventLog {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    log_stdout: bool,
    lines_total: Arc<AtomicU64>,
    write_errors_total: Arc<AtomicU64>,
    file_size_bytes: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new(writer: Option<RotatingWriter>, log_stdout: bool) -> Self {
        Self {
            writer: writer.map(|w| Arc::new(Mutex::new(w))),
            log_stdout,
            ..Self::default()
        }
    }

    pub fn analyze(&self, event: &AnalyzeEvent<'_>) {
        let line = envelope("analyze", event);
        self.write(&line);
        if self.log_stdout {
            tracing::info!(
                target: "events",
                event = "analyze",
                userId = ?event.user_id,
                outcome = ?event.outcome,
                fileCount = event.file_count,
                totalBytes = event.total_bytes,
                latencyMs = event.latency_ms
            );
        }
    }

    pub fn persistence_failure(&self, user_id: &str, error: &str) {
        let line = envelope(
            "history_write_failed",
            &serde_json::json!({ "userId": user_id, "error": error }),
        );
        self.write(&line);
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total.load(Ordering::Relaxed)
    }

    pub fn file_size_bytes(&self) -> u64 {
        self.file_size_bytes.load(Ordering::Relaxed)
    }

    fn write(&self, line: &str) {
        let Some(writer) = &self.writer else {
            return;
        };
        let Ok(mut guard) = writer.lock() else {
            self.write_errors_total.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match guard.write_line(line) {
            Ok(()) => {
                self.lines_total.fetch_add(1, Ordering::Relaxed);
                if let Some(size) = guard.current_size() {
                    self.file_size_bytes.store(size, Ordering::Relaxed);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to write event log line");
                self.write_errors_total.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn envelope<T: Serialize>(kind: &str, body: &T) -> String {
    let mut value = serde_json::to_value(body).unwrap_or(serde_json::Value::Null);
    if let Some(map) = value.as_object_mut() {
        map.insert("schemaVersion".into(), EVENT_SCHEMA_VERSION.into());
        map.insert("ts".into(), chrono::Utc::now().to_rfc3339().into());
        map.insert("event".into(), kind.into());
    }
    value.to_string()
}
