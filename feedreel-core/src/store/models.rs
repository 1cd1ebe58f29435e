use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::feed::OrderingMode;

/// One finished video, as handed to the sink after a successful channel run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducedVideoRecord {
    pub channel: String,
    pub filename: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub ordering: OrderingMode,
    pub image_duration: f64,
    pub fps: u32,
    pub duration_seconds: f64,
    pub size_bytes: u64,
    pub post_count: u32,
    pub placeholder: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredVideo {
    pub id: i64,
    #[serde(flatten)]
    pub record: ProducedVideoRecord,
}

impl StoredVideo {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let ordering: String = row.get("ordering")?;
        let path: String = row.get("path")?;
        Ok(Self {
            id: row.get("id")?,
            record: ProducedVideoRecord {
                channel: row.get("channel")?,
                filename: row.get("filename")?,
                path: PathBuf::from(path),
                created_at: row.get("created_at")?,
                ordering: OrderingMode::from_name(&ordering),
                image_duration: row.get("image_duration")?,
                fps: row.get("fps")?,
                duration_seconds: row.get("duration_seconds")?,
                size_bytes: row.get::<_, i64>("size_bytes")?.max(0) as u64,
                post_count: row.get("post_count")?,
                placeholder: row.get::<_, i64>("placeholder")? != 0,
            },
        })
    }
}
