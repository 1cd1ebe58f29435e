use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};

use super::models::{ProducedVideoRecord, StoredVideo};
use super::{StoreError, StoreResult, VideoSink};

const VIDEO_SCHEMA: &str = include_str!("../../../sql/videos.sql");

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n",
    )
}

#[derive(Debug, Clone)]
pub struct SqliteVideoStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteVideoStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteVideoStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<SqliteVideoStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteVideoStore {
            path,
            flags,
            read_only: self.read_only,
        })
    }
}

/// Catalog of produced videos. Each call opens its own connection.
#[derive(Debug, Clone)]
pub struct SqliteVideoStore {
    path: PathBuf,
    flags: OpenFlags,
    read_only: bool,
}

impl SqliteVideoStore {
    pub fn builder() -> SqliteVideoStoreBuilder {
        SqliteVideoStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        SqliteVideoStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        if !self.read_only {
            configure_connection(&conn).map_err(|source| StoreError::OpenDatabase {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(VIDEO_SCHEMA)?;
        Ok(())
    }

    pub fn insert(&self, record: &ProducedVideoRecord) -> StoreResult<i64> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO videos (
                channel, filename, path, created_at, ordering, image_duration, fps,
                duration_seconds, size_bytes, post_count, placeholder
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                &record.channel,
                &record.filename,
                record.path.to_string_lossy().into_owned(),
                record.created_at,
                record.ordering.as_str(),
                record.image_duration,
                record.fps,
                record.duration_seconds,
                record.size_bytes as i64,
                record.post_count,
                if record.placeholder { 1 } else { 0 },
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest first, optionally restricted to one channel.
    pub fn list_recent(&self, channel: Option<&str>, limit: usize) -> StoreResult<Vec<StoredVideo>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM videos
             WHERE (?1 IS NULL OR channel = ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map((channel, limit as i64), |row| StoredVideo::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count(&self) -> StoreResult<u64> {
        let conn = self.open()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM videos", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl VideoSink for SqliteVideoStore {
    async fn record(&self, video: &ProducedVideoRecord) -> StoreResult<()> {
        let store = self.clone();
        let video = video.clone();
        tokio::task::spawn_blocking(move || store.insert(&video))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::OrderingMode;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn record(channel: &str, minute: u32) -> ProducedVideoRecord {
        ProducedVideoRecord {
            channel: channel.to_string(),
            filename: format!("{channel}_reel.mp4"),
            path: PathBuf::from(format!("output_{channel}_20240101_0000{minute:02}/{channel}_reel.mp4")),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
            ordering: OrderingMode::Top,
            image_duration: 3.0,
            fps: 30,
            duration_seconds: 9.0,
            size_bytes: 4096,
            post_count: 10,
            placeholder: false,
        }
    }

    #[test]
    fn list_recent_filters_and_orders() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVideoStore::new(dir.path().join("videos.sqlite")).unwrap();
        store.initialize().unwrap();

        store.insert(&record("memes", 1)).unwrap();
        store.insert(&record("dankmemes", 2)).unwrap();
        let mut latest = record("memes", 3);
        latest.created_at += Duration::seconds(5);
        store.insert(&latest).unwrap();

        let memes = store.list_recent(Some("memes"), 10).unwrap();
        assert_eq!(memes.len(), 2);
        assert_eq!(memes[0].record, latest);

        let everything = store.list_recent(None, 2).unwrap();
        assert_eq!(everything.len(), 2);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn builder_requires_path() {
        let err = SqliteVideoStore::builder().build().unwrap_err();
        assert!(matches!(err, StoreError::MissingStore));
    }
}
