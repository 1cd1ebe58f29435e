use thiserror::Error;

pub type FeedResult<T> = Result<T, FeedError>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("missing feed credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),
    #[error("feed authentication rejected: {0}")]
    Authentication(String),
    #[error("invalid channel name {0:?}")]
    InvalidChannel(String),
    #[error("feed request failed: {0}")]
    Network(String),
    #[error("feed returned status {status} for r/{channel}")]
    Status { channel: String, status: u16 },
    #[error("unexpected feed payload: {0}")]
    Decode(String),
}

impl FeedError {
    /// Credential problems are fatal for the whole process, everything else
    /// only for the channel being fetched.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            FeedError::MissingCredentials(_) | FeedError::Authentication(_)
        )
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            FeedError::Decode(error.to_string())
        } else {
            FeedError::Network(error.to_string())
        }
    }
}
