//! Event log file writer
//!
//! A dedicated task drains formatted event lines from an mpsc channel and
//! appends them to the on-disk log file. Submission never blocks a session:
//! the channel is bounded and full-channel sends are counted as drops.

use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Bounded channel capacity for pending event lines
pub(super) const CHANNEL_CAPACITY: usize = 1024;

/// Open the log file and spawn the writer task
///
/// The file is created under `dir` with a startup-timestamped name so
/// successive runs never clobber each other.
pub(super) async fn spawn_writer(
    dir: &Path,
) -> std::io::Result<(PathBuf, mpsc::Sender<String>, JoinHandle<()>)> {
    tokio::fs::create_dir_all(dir).await?;

    let file_name = format!("proxy_log_{}.txt", Local::now().format("%Y%m%d_%H%M%S"));
    let path = dir.join(file_name);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task_path = path.clone();
    let handle = tokio::spawn(async move {
        write_loop(file, rx, task_path).await;
    });

    Ok((path, tx, handle))
}

/// Drain lines until every sender is dropped, then flush and exit
async fn write_loop(mut file: File, mut rx: mpsc::Receiver<String>, path: PathBuf) {
    debug!("Event log writer started for {:?}", path);

    while let Some(line) = rx.recv().await {
        if let Err(e) = file.write_all(line.as_bytes()).await {
            warn!("Failed to write event log line to {:?}: {}", path, e);
            continue;
        }
        if let Err(e) = file.write_all(b"\n").await {
            warn!("Failed to write event log line to {:?}: {}", path, e);
        }
    }

    if let Err(e) = file.flush().await {
        warn!("Failed to flush event log {:?}: {}", path, e);
    }

    debug!("Event log writer stopped for {:?}", path);
}
