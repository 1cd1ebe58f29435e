use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("http client unavailable: {0}")]
    Client(String),
    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },
    #[error("could not normalize {path}: {reason}")]
    Encoding { path: PathBuf, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl MediaError {
    pub(crate) fn download(url: &str, reason: impl ToString) -> Self {
        MediaError::Download {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn encoding(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        MediaError::Encoding {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Per-post failures are skipped; anything touching the scratch directory
    /// itself ends the channel run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MediaError::Io { .. } | MediaError::Client(_))
    }
}

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum PlaceholderError {
    #[error("failed to write placeholder {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}
