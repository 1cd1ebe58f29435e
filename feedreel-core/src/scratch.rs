use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Marker kept inside the scratch directory while it is owned by a run.
pub const RUN_STATE_FILE: &str = ".run-state";

#[derive(Debug, Error)]
pub enum ScratchError {
    #[error("io error at {path}: {source}")]
    Io {
        source: io::Error,
        path: PathBuf,
    },
    #[error("failed to encode run marker: {0}")]
    Marker(#[from] serde_json::Error),
}

pub type ScratchResult<T> = Result<T, ScratchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMarker {
    pub run_id: Uuid,
    pub channel: String,
    pub state: RunState,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// What `prepare` found before taking over the directory.
#[derive(Debug, Clone, PartialEq)]
pub enum PriorRun {
    None,
    /// Stale content was purged. The marker is absent when the directory had
    /// none or it could not be parsed.
    Leftover(Option<RunMarker>),
}

/// Exclusive handle on the shared scratch directory for one channel run.
#[derive(Debug)]
pub struct ScratchDir {
    root: PathBuf,
    marker: RunMarker,
}

impl ScratchDir {
    /// Creates (or purges and recreates) `root` and writes a `running` marker.
    pub async fn prepare(root: impl Into<PathBuf>, channel: &str) -> ScratchResult<(Self, PriorRun)> {
        let root = root.into();
        let prior = match fs::metadata(&root).await {
            Ok(_) => {
                let marker = read_marker(&root).await;
                match &marker {
                    Some(found) if found.state == RunState::Failed => warn!(
                        path = %root.display(),
                        channel = %found.channel,
                        reason = found.reason.as_deref().unwrap_or(""),
                        "purging scratch directory left by a failed run"
                    ),
                    Some(found) => warn!(
                        path = %root.display(),
                        channel = %found.channel,
                        "purging scratch directory left by an interrupted run"
                    ),
                    None => debug!(path = %root.display(), "purging stale scratch directory"),
                }
                remove_tree(&root).await?;
                PriorRun::Leftover(marker)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => PriorRun::None,
            Err(source) => return Err(ScratchError::Io { source, path: root }),
        };

        fs::create_dir_all(&root)
            .await
            .map_err(|source| ScratchError::Io {
                source,
                path: root.clone(),
            })?;
        let scratch = Self {
            root,
            marker: RunMarker {
                run_id: Uuid::new_v4(),
                channel: channel.to_string(),
                state: RunState::Running,
                updated_at: Utc::now(),
                reason: None,
            },
        };
        scratch.write_marker().await?;
        Ok((scratch, prior))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn marker(&self) -> &RunMarker {
        &self.marker
    }

    /// Keeps the directory for inspection and flags it as failed.
    pub async fn mark_failed(&mut self, reason: &str) -> ScratchResult<()> {
        self.marker.state = RunState::Failed;
        self.marker.updated_at = Utc::now();
        self.marker.reason = Some(reason.to_string());
        self.write_marker().await?;
        warn!(path = %self.root.display(), reason, "scratch directory kept after failure");
        Ok(())
    }

    /// Removes the directory and everything in it.
    pub async fn discard(self) -> ScratchResult<()> {
        remove_tree(&self.root).await?;
        info!(path = %self.root.display(), run_id = %self.marker.run_id, "scratch directory removed");
        Ok(())
    }

    async fn write_marker(&self) -> ScratchResult<()> {
        let path = self.root.join(RUN_STATE_FILE);
        let payload = serde_json::to_vec_pretty(&self.marker)?;
        fs::write(&path, payload)
            .await
            .map_err(|source| ScratchError::Io { source, path })
    }
}

pub async fn read_marker(root: &Path) -> Option<RunMarker> {
    let bytes = fs::read(root.join(RUN_STATE_FILE)).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(marker) => Some(marker),
        Err(err) => {
            debug!(path = %root.display(), error = %err, "ignoring unreadable run marker");
            None
        }
    }
}

async fn remove_tree(root: &Path) -> ScratchResult<()> {
    match fs::remove_dir_all(root).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ScratchError::Io {
            source,
            path: root.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn prepare_creates_directory_with_running_marker() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("images");

        let (scratch, prior) = ScratchDir::prepare(&root, "testsub").await.unwrap();
        assert_eq!(prior, PriorRun::None);
        assert!(root.is_dir());

        let marker = read_marker(&root).await.unwrap();
        assert_eq!(marker.state, RunState::Running);
        assert_eq!(marker.channel, "testsub");
        assert_eq!(&marker, scratch.marker());
    }

    #[tokio::test]
    async fn prepare_purges_leftovers() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("images");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("img1.jpg"), b"stale").unwrap();
        std::fs::write(root.join("img7.png"), b"stale").unwrap();

        let (_scratch, prior) = ScratchDir::prepare(&root, "memes").await.unwrap();
        assert_eq!(prior, PriorRun::Leftover(None));
        let names: Vec<String> = std::fs::read_dir(&root)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![RUN_STATE_FILE.to_string()]);
    }

    #[tokio::test]
    async fn failed_marker_is_reported_on_next_prepare() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("images");

        let (mut scratch, _) = ScratchDir::prepare(&root, "memes").await.unwrap();
        scratch.mark_failed("ffmpeg exited with 1").await.unwrap();
        let failed_run = scratch.marker().run_id;
        drop(scratch);

        let (_scratch, prior) = ScratchDir::prepare(&root, "dankmemes").await.unwrap();
        match prior {
            PriorRun::Leftover(Some(marker)) => {
                assert_eq!(marker.run_id, failed_run);
                assert_eq!(marker.state, RunState::Failed);
                assert_eq!(marker.reason.as_deref(), Some("ffmpeg exited with 1"));
            }
            other => panic!("unexpected prior run {other:?}"),
        }
    }

    #[tokio::test]
    async fn discard_removes_everything() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("images");
        let (scratch, _) = ScratchDir::prepare(&root, "memes").await.unwrap();
        std::fs::write(root.join("img1.jpg"), b"x").unwrap();

        scratch.discard().await.unwrap();
        assert!(!root.exists());
    }
}
