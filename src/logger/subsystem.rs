//! Per-subsystem buffered logger.
//!
//! `log_request` is synchronous and never touches the filesystem; a
//! background writer task owns the buffer and the per-day file handles
//! and flushes on a size threshold or interval tick. Rotation is a
//! coarse periodic date check.

use chrono::{Local, NaiveDate};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::entry::{LogEntry, RequestData};
use super::retention;
use crate::config::LoggingConfig;

/// Rotation date check granularity
const ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Log file classes written per day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogClass {
    Requests,
    Errors,
    Combined,
}

impl LogClass {
    pub fn prefix(&self) -> &'static str {
        match self {
            LogClass::Requests => "requests",
            LogClass::Errors => "errors",
            LogClass::Combined => "combined",
        }
    }

    /// File name for this class on a given day
    pub fn file_name(&self, date: NaiveDate) -> String {
        format!("{}-{}.log", self.prefix(), date.format("%Y-%m-%d"))
    }
}

/// Per-subsystem logger settings
#[derive(Debug, Clone)]
pub struct SubsystemConfig {
    /// Buffered entries before an asynchronous flush is triggered
    pub buffer_size: usize,
    /// Max time before flushing a partial buffer
    pub flush_interval: Duration,
    pub retention_days: u32,
    pub compress: bool,
    /// Emit entry events for real-time streaming
    pub realtime: bool,
}

impl Default for SubsystemConfig {
    fn default() -> Self {
        Self {
            buffer_size: 50,
            flush_interval: Duration::from_secs(5),
            retention_days: 14,
            compress: true,
            realtime: true,
        }
    }
}

impl SubsystemConfig {
    pub fn from_logging(config: &LoggingConfig) -> Self {
        Self {
            buffer_size: config.buffer_size.max(1),
            flush_interval: Duration::from_secs(config.flush_interval_secs.max(1)),
            retention_days: config.retention_days,
            compress: config.compress,
            realtime: config.realtime,
        }
    }
}

/// Typed lifecycle events emitted by a subsystem logger
#[derive(Debug, Clone)]
pub enum LoggerEvent {
    /// A new entry was accepted (emitted only when realtime is enabled)
    Entry(Arc<LogEntry>),
    /// A flush cycle failed; the batch was dropped
    FlushError {
        subsystem: String,
        message: String,
        dropped: usize,
    },
    /// The daily rotation advanced to a new date
    Rotated { subsystem: String, date: NaiveDate },
    /// The logger flushed and closed its files
    Shutdown { subsystem: String },
}

enum WriterCommand {
    Entry(Arc<LogEntry>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsystemStats {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_bytes: u64,
    pub uptime_secs: u64,
    pub requests_per_second: f64,
    /// None when no requests have been logged yet
    pub error_rate: Option<f64>,
    pub buffer_size: usize,
    pub open_file_handles: usize,
}

pub struct SubsystemLogger {
    name: String,
    dir: PathBuf,
    config: SubsystemConfig,
    tx: mpsc::UnboundedSender<WriterCommand>,
    events: broadcast::Sender<LoggerEvent>,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    total_bytes: AtomicU64,
    buffered: Arc<AtomicUsize>,
    open_handles: Arc<AtomicUsize>,
    started: Instant,
    retention_task: tokio::task::JoinHandle<()>,
}

impl SubsystemLogger {
    pub fn new(name: &str, log_root: &Path, config: SubsystemConfig) -> std::io::Result<Arc<Self>> {
        let dir = log_root.join(name);
        std::fs::create_dir_all(&dir)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(1024);
        let buffered = Arc::new(AtomicUsize::new(0));
        let open_handles = Arc::new(AtomicUsize::new(0));

        tokio::spawn(writer_task(
            name.to_string(),
            dir.clone(),
            config.clone(),
            rx,
            events.clone(),
            buffered.clone(),
            open_handles.clone(),
        ));

        let retention_task = retention::spawn_retention_task(
            name.to_string(),
            dir.clone(),
            config.retention_days,
            config.compress,
        );

        Ok(Arc::new(Self {
            name: name.to_string(),
            dir,
            config,
            tx,
            events,
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            buffered,
            open_handles,
            started: Instant::now(),
            retention_task,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Append a constructed entry to the buffer and return its id.
    ///
    /// Never performs I/O on the calling path; the writer task flushes
    /// asynchronously once the buffer reaches the configured threshold.
    pub fn log_request(&self, data: RequestData) -> String {
        let entry = Arc::new(LogEntry::from_request(&self.name, data));
        let id = entry.id.clone();

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_bytes
            .fetch_add(entry.response_size, Ordering::Relaxed);
        if entry.is_error() {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }

        if self.config.realtime {
            let _ = self.events.send(LoggerEvent::Entry(entry.clone()));
        }

        self.buffered.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(WriterCommand::Entry(entry)).is_err() {
            self.buffered.fetch_sub(1, Ordering::Relaxed);
            tracing::error!(subsystem = %self.name, "Writer task gone, entry not persisted");
        }

        id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoggerEvent> {
        self.events.subscribe()
    }

    /// Force a flush of the current buffer and wait for it to complete.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriterCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Flush remaining entries, close file handles, stop maintenance.
    pub async fn shutdown(&self) {
        self.retention_task.abort();
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriterCommand::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn stats(&self) -> SubsystemStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        let uptime_secs = self.started.elapsed().as_secs();

        SubsystemStats {
            total_requests,
            total_errors,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            uptime_secs,
            requests_per_second: total_requests as f64 / uptime_secs.max(1) as f64,
            error_rate: if total_requests == 0 {
                None
            } else {
                Some(total_errors as f64 / total_requests as f64)
            },
            buffer_size: self.buffered.load(Ordering::Relaxed),
            open_file_handles: self.open_handles.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SubsystemLogger {
    fn drop(&mut self) {
        // A replaced registry entry must not leave its daily sweep running
        self.retention_task.abort();
    }
}

/// Open per-day file handles, cached until rotation
struct FileSet {
    dir: PathBuf,
    date: NaiveDate,
    handles: HashMap<LogClass, File>,
    open_handles: Arc<AtomicUsize>,
}

impl FileSet {
    fn new(dir: PathBuf, date: NaiveDate, open_handles: Arc<AtomicUsize>) -> Self {
        Self {
            dir,
            date,
            handles: HashMap::new(),
            open_handles,
        }
    }

    async fn handle(&mut self, class: LogClass) -> std::io::Result<&mut File> {
        use std::collections::hash_map::Entry;

        match self.handles.entry(class) {
            Entry::Occupied(occupied) => Ok(occupied.into_mut()),
            Entry::Vacant(vacant) => {
                let path = self.dir.join(class.file_name(self.date));
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await?;
                self.open_handles.fetch_add(1, Ordering::Relaxed);
                Ok(vacant.insert(file))
            }
        }
    }

    async fn close_all(&mut self) {
        for (_, mut file) in self.handles.drain() {
            let _ = file.flush().await;
        }
        self.open_handles.store(0, Ordering::Relaxed);
    }
}

async fn writer_task(
    subsystem: String,
    dir: PathBuf,
    config: SubsystemConfig,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    events: broadcast::Sender<LoggerEvent>,
    buffered: Arc<AtomicUsize>,
    open_handles: Arc<AtomicUsize>,
) {
    let mut buffer: Vec<Arc<LogEntry>> = Vec::with_capacity(config.buffer_size);
    let mut files = FileSet::new(dir, Local::now().date_naive(), open_handles);

    let mut flush_timer = tokio::time::interval(config.flush_interval);
    flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut rotation_timer = tokio::time::interval(ROTATION_CHECK_INTERVAL);
    rotation_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(WriterCommand::Entry(entry)) => {
                    buffer.push(entry);
                    if buffer.len() >= config.buffer_size {
                        flush_batch(&subsystem, &mut files, &mut buffer, &events, &buffered).await;
                    }
                }
                Some(WriterCommand::Flush(ack)) => {
                    flush_batch(&subsystem, &mut files, &mut buffer, &events, &buffered).await;
                    let _ = ack.send(());
                }
                Some(WriterCommand::Shutdown(ack)) => {
                    flush_batch(&subsystem, &mut files, &mut buffer, &events, &buffered).await;
                    files.close_all().await;
                    let _ = events.send(LoggerEvent::Shutdown { subsystem: subsystem.clone() });
                    let _ = ack.send(());
                    break;
                }
                None => {
                    flush_batch(&subsystem, &mut files, &mut buffer, &events, &buffered).await;
                    files.close_all().await;
                    break;
                }
            },

            _ = flush_timer.tick() => {
                if !buffer.is_empty() {
                    flush_batch(&subsystem, &mut files, &mut buffer, &events, &buffered).await;
                }
            }

            _ = rotation_timer.tick() => {
                let today = Local::now().date_naive();
                if today != files.date {
                    flush_batch(&subsystem, &mut files, &mut buffer, &events, &buffered).await;
                    files.close_all().await;
                    files.date = today;
                    tracing::info!(subsystem = %subsystem, date = %today, "Rotated log files");
                    let _ = events.send(LoggerEvent::Rotated { subsystem: subsystem.clone(), date: today });
                }
            }
        }
    }

    tracing::debug!(subsystem = %subsystem, "Log writer task stopped");
}

/// Flush the buffered batch. Failure drops the batch for this cycle
/// and reports a `FlushError` event; there is no retry queue.
async fn flush_batch(
    subsystem: &str,
    files: &mut FileSet,
    buffer: &mut Vec<Arc<LogEntry>>,
    events: &broadcast::Sender<LoggerEvent>,
    buffered: &AtomicUsize,
) {
    if buffer.is_empty() {
        return;
    }

    let count = buffer.len();
    match write_batch(files, buffer).await {
        Ok(bytes) => {
            tracing::debug!(
                subsystem = %subsystem,
                count = count,
                bytes = bytes,
                "Flushed log batch"
            );
        }
        Err(e) => {
            tracing::error!(
                subsystem = %subsystem,
                error = %e,
                dropped = count,
                "Failed to flush log batch"
            );
            let _ = events.send(LoggerEvent::FlushError {
                subsystem: subsystem.to_string(),
                message: e.to_string(),
                dropped: count,
            });
        }
    }

    buffer.clear();
    buffered.fetch_sub(count, Ordering::Relaxed);
}

/// Partition the batch into errors and the remainder, then append each
/// entry as one NDJSON line to its per-day files (insertion order kept).
async fn write_batch(files: &mut FileSet, entries: &[Arc<LogEntry>]) -> std::io::Result<u64> {
    let mut requests_buf = String::new();
    let mut errors_buf = String::new();
    let mut combined_buf = String::new();

    for entry in entries {
        let mut line = serde_json::to_string(entry.as_ref())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');

        combined_buf.push_str(&line);
        if entry.is_error() {
            errors_buf.push_str(&line);
        } else {
            requests_buf.push_str(&line);
        }
    }

    let mut written = 0u64;
    for (class, buf) in [
        (LogClass::Requests, &requests_buf),
        (LogClass::Errors, &errors_buf),
        (LogClass::Combined, &combined_buf),
    ] {
        if buf.is_empty() {
            continue;
        }
        let file = files.handle(class).await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        written += buf.len() as u64;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::entry::ErrorInfo;
    use tempfile::TempDir;

    fn request(status: u16) -> RequestData {
        RequestData {
            method: "GET".to_string(),
            url: format!("/asset-{}", status),
            path: format!("/asset-{}", status),
            client_ip: "203.0.113.9".to_string(),
            user_agent: "curl/8.0".to_string(),
            status_code: status,
            response_size: 100,
            execution_time_ms: 5,
            ..Default::default()
        }
    }

    fn test_config() -> SubsystemConfig {
        SubsystemConfig {
            buffer_size: 100,
            flush_interval: Duration::from_secs(3600),
            retention_days: 14,
            compress: false,
            realtime: true,
        }
    }

    async fn read_lines(path: &Path) -> Vec<LogEntry> {
        let contents = tokio::fs::read_to_string(path).await.unwrap();
        contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_flush_preserves_order_and_partitions_errors() {
        let tmp = TempDir::new().unwrap();
        let logger = SubsystemLogger::new("cache", tmp.path(), test_config()).unwrap();

        let id_a = logger.log_request(request(200));
        let id_b = logger.log_request(request(500));
        let id_c = logger.log_request(request(304));
        logger.flush().await;

        let date = Local::now().date_naive();
        let dir = tmp.path().join("cache");

        let combined = read_lines(&dir.join(LogClass::Combined.file_name(date))).await;
        assert_eq!(
            combined.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
            vec![id_a.clone(), id_b.clone(), id_c.clone()]
        );

        let errors = read_lines(&dir.join(LogClass::Errors.file_name(date))).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].id, id_b);

        let requests = read_lines(&dir.join(LogClass::Requests.file_name(date))).await;
        assert_eq!(
            requests.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
            vec![id_a, id_c]
        );

        logger.shutdown().await;
    }

    #[tokio::test]
    async fn test_error_entry_without_error_status() {
        let tmp = TempDir::new().unwrap();
        let logger = SubsystemLogger::new("proxy", tmp.path(), test_config()).unwrap();

        let mut data = request(200);
        data.error = Some(ErrorInfo {
            message: "upstream refused".to_string(),
            kind: Some("connect".to_string()),
            code: None,
            stack: None,
        });
        let id = logger.log_request(data);
        logger.flush().await;

        let date = Local::now().date_naive();
        let errors =
            read_lines(&tmp.path().join("proxy").join(LogClass::Errors.file_name(date))).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].id, id);

        logger.shutdown().await;
    }

    #[tokio::test]
    async fn test_stats_counters() {
        let tmp = TempDir::new().unwrap();
        let logger = SubsystemLogger::new("cache", tmp.path(), test_config()).unwrap();

        logger.log_request(request(200));
        logger.log_request(request(200));
        logger.log_request(request(500));

        let stats = logger.stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.total_bytes, 300);
        assert!((stats.error_rate.unwrap() - 1.0 / 3.0).abs() < 1e-9);

        logger.shutdown().await;
    }

    #[tokio::test]
    async fn test_error_rate_undefined_when_empty() {
        let tmp = TempDir::new().unwrap();
        let logger = SubsystemLogger::new("idle", tmp.path(), test_config()).unwrap();
        assert!(logger.stats().error_rate.is_none());
        logger.shutdown().await;
    }

    #[tokio::test]
    async fn test_threshold_triggers_flush() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config();
        config.buffer_size = 2;
        let logger = SubsystemLogger::new("cache", tmp.path(), config).unwrap();

        logger.log_request(request(200));
        logger.log_request(request(200));

        // Writer task flushes on its own once the threshold is hit
        tokio::time::sleep(Duration::from_millis(200)).await;

        let date = Local::now().date_naive();
        let combined =
            read_lines(&tmp.path().join("cache").join(LogClass::Combined.file_name(date))).await;
        assert_eq!(combined.len(), 2);
        assert_eq!(logger.stats().buffer_size, 0);

        logger.shutdown().await;
    }

    #[tokio::test]
    async fn test_realtime_event_emission() {
        let tmp = TempDir::new().unwrap();
        let logger = SubsystemLogger::new("cache", tmp.path(), test_config()).unwrap();
        let mut events = logger.subscribe();

        let id = logger.log_request(request(200));
        match events.recv().await.unwrap() {
            LoggerEvent::Entry(entry) => assert_eq!(entry.id, id),
            other => panic!("unexpected event: {:?}", other),
        }

        logger.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remaining() {
        let tmp = TempDir::new().unwrap();
        let logger = SubsystemLogger::new("cache", tmp.path(), test_config()).unwrap();

        logger.log_request(request(200));
        logger.shutdown().await;

        let date = Local::now().date_naive();
        let combined =
            read_lines(&tmp.path().join("cache").join(LogClass::Combined.file_name(date))).await;
        assert_eq!(combined.len(), 1);
    }
}
