//! Daily retention sweep: files past the retention horizon are gzip
//! compressed in place, already-compressed files are removed.

use chrono::Timelike;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const DAY: Duration = Duration::from_secs(86_400);

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub compressed: usize,
    pub removed: usize,
}

/// Schedule the daily sweep: first run at the next local midnight,
/// then every 24 hours. I/O errors are reported and the cycle retried
/// at the next schedule.
pub fn spawn_retention_task(
    subsystem: String,
    dir: PathBuf,
    retention_days: u32,
    compress: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let elapsed_today = chrono::Local::now().time().num_seconds_from_midnight() as u64;
        let until_midnight = DAY.as_secs().saturating_sub(elapsed_today).max(1);
        tokio::time::sleep(Duration::from_secs(until_midnight)).await;

        let mut timer = tokio::time::interval(DAY);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            timer.tick().await;
            run_sweep(&subsystem, &dir, retention_days, compress).await;
        }
    })
}

async fn run_sweep(subsystem: &str, dir: &Path, retention_days: u32, compress: bool) {
    let horizon = SystemTime::now() - DAY * retention_days;
    let dir = dir.to_path_buf();
    let subsystem_name = subsystem.to_string();

    let result =
        tokio::task::spawn_blocking(move || sweep_dir(&dir, horizon, compress)).await;

    match result {
        Ok(Ok(outcome)) => {
            if outcome.compressed > 0 || outcome.removed > 0 {
                tracing::info!(
                    subsystem = %subsystem_name,
                    compressed = outcome.compressed,
                    removed = outcome.removed,
                    "Retention sweep completed"
                );
            }
        }
        Ok(Err(e)) => {
            tracing::error!(subsystem = %subsystem_name, error = %e, "Retention sweep failed");
        }
        Err(e) => {
            tracing::error!(subsystem = %subsystem_name, error = %e, "Retention sweep panicked");
        }
    }
}

/// Walk one subsystem's log directory and age out files older than the
/// horizon. Compression and removal of the original are two separate
/// steps; a crash between them can leave both forms present.
pub fn sweep_dir(dir: &Path, horizon: SystemTime, compress: bool) -> std::io::Result<SweepOutcome> {
    let mut outcome = SweepOutcome::default();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(file = ?path, error = %e, "Skipping file without mtime");
                continue;
            }
        };
        if modified >= horizon {
            continue;
        }

        let is_compressed = path
            .extension()
            .map(|ext| ext == "gz")
            .unwrap_or(false);

        if is_compressed || !compress {
            match fs::remove_file(&path) {
                Ok(()) => outcome.removed += 1,
                Err(e) => tracing::warn!(file = ?path, error = %e, "Failed to remove aged log file"),
            }
        } else {
            match compress_file(&path) {
                Ok(gz_path) => {
                    tracing::debug!(file = ?path, target = ?gz_path, "Compressed aged log file");
                    if let Err(e) = fs::remove_file(&path) {
                        tracing::warn!(file = ?path, error = %e, "Failed to remove original after compression");
                    }
                    outcome.compressed += 1;
                }
                Err(e) => tracing::warn!(file = ?path, error = %e, "Failed to compress aged log file"),
            }
        }
    }

    Ok(outcome)
}

fn compress_file(path: &Path) -> std::io::Result<PathBuf> {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);

    let input = fs::File::open(path)?;
    let output = fs::File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut BufReader::new(input), &mut encoder)?;
    encoder.finish()?.flush()?;

    Ok(gz_path)
}
