//! Polling watcher for the local `uploads` folder.
//!
//! Each poll lists the folder, compares modification times against the
//! previous snapshot, and reports files that are new or newer. The snapshot is
//! replaced wholesale after every poll.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::app::BackendEvent;
use crate::transcript::{FilePreview, PreviewKind};
use crate::tui::AppEvent;

/// The only folder name the watcher agrees to monitor.
pub const UPLOADS_FOLDER_NAME: &str = "uploads";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WatchError {
    #[error("{} is not an accessible folder", .0.display())]
    Unavailable(PathBuf),
    #[error("only a folder named \"uploads\" can be watched (got \"{0}\")")]
    WrongName(String),
}

/// Check that `dir` exists and is the uploads folder.
pub fn check_folder(dir: &Path) -> Result<(), WatchError> {
    if !dir.is_dir() {
        return Err(WatchError::Unavailable(dir.to_path_buf()));
    }
    // Resolve "." and friends so the name check sees the real folder name
    let resolved = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let name = resolved
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name != UPLOADS_FOLDER_NAME {
        return Err(WatchError::WrongName(name));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

impl FileEntry {
    pub fn preview(&self) -> Option<FilePreview> {
        PreviewKind::for_path(&self.path).map(|kind| FilePreview {
            name: self.name.clone(),
            kind,
            size: self.size,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub kind: ChangeKind,
    pub entry: FileEntry,
}

impl FileChange {
    /// Text of the system message announcing this change
    pub fn message(&self) -> String {
        match self.kind {
            ChangeKind::Added => format!("New file in uploads: {}", self.entry.name),
            ChangeKind::Modified => format!("File updated in uploads: {}", self.entry.name),
        }
    }
}

/// File name to last-modified time, as of the previous poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderSnapshot {
    files: HashMap<String, SystemTime>,
}

impl FolderSnapshot {
    pub fn from_entries(entries: &[FileEntry]) -> Self {
        Self {
            files: entries
                .iter()
                .map(|entry| (entry.name.clone(), entry.modified))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<SystemTime> {
        self.files.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Files in `current` that `previous` has not seen, or has seen with an older
/// timestamp. Files that vanished are not reported.
pub fn diff(previous: &FolderSnapshot, current: &[FileEntry]) -> Vec<FileChange> {
    current
        .iter()
        .filter_map(|entry| {
            let kind = match previous.get(&entry.name) {
                None => ChangeKind::Added,
                Some(seen) if seen < entry.modified => ChangeKind::Modified,
                Some(_) => return None,
            };
            Some(FileChange {
                kind,
                entry: entry.clone(),
            })
        })
        .collect()
}

/// List the regular files directly inside `dir`, sorted by name.
pub async fn scan_folder(dir: &Path) -> io::Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(item) = read_dir.next_entry().await? {
        let metadata = match item.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!(
                    path = %item.path().display(),
                    error = %e,
                    "skipping unreadable entry"
                );
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        entries.push(FileEntry {
            name: item.file_name().to_string_lossy().into_owned(),
            path: item.path(),
            modified: metadata.modified()?,
            size: metadata.len(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

pub struct FolderWatcher {
    dir: PathBuf,
    interval: Duration,
    snapshot: FolderSnapshot,
}

impl FolderWatcher {
    pub fn new(dir: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            interval,
            snapshot: FolderSnapshot::default(),
        }
    }

    pub fn snapshot(&self) -> &FolderSnapshot {
        &self.snapshot
    }

    /// Run one poll cycle. On error the previous snapshot is kept.
    pub async fn poll(&mut self) -> io::Result<Vec<FileChange>> {
        let entries = scan_folder(&self.dir).await?;
        let changes = diff(&self.snapshot, &entries);
        self.snapshot = FolderSnapshot::from_entries(&entries);
        Ok(changes)
    }

    /// Poll on a fixed interval in the background, forwarding every change to
    /// the UI event channel. The first poll happens one interval after start.
    pub fn spawn(mut self, tx: mpsc::UnboundedSender<AppEvent>) -> WatchHandle {
        let dir = self.dir.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let changes = match self.poll().await {
                    Ok(changes) => changes,
                    Err(e) => {
                        tracing::warn!(dir = %self.dir.display(), error = %e, "folder poll failed");
                        continue;
                    }
                };
                for change in changes {
                    tracing::debug!(
                        file = %change.entry.name,
                        kind = ?change.kind,
                        "uploads folder change"
                    );
                    if tx
                        .send(AppEvent::Backend(BackendEvent::FolderChange(change)))
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
        WatchHandle { dir, task }
    }
}

/// Handle to a running folder poll. Dropping it stops the task.
pub struct WatchHandle {
    dir: PathBuf,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
