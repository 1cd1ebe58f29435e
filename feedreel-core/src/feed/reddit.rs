use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::{FeedError, FeedResult};
use super::types::{CandidatePost, OrderingMode};
use super::FeedSource;

pub const DEFAULT_AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
pub const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";

/// Reddit refuses listings larger than this in a single page.
pub const MAX_LISTING_LIMIT: u32 = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct FeedCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

impl FeedCredentials {
    pub const CLIENT_ID_VAR: &'static str = "ID";
    pub const CLIENT_SECRET_VAR: &'static str = "SECRET";
    pub const USER_AGENT_VAR: &'static str = "AGENT";

    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            user_agent: user_agent.into(),
        }
    }

    pub fn from_env() -> FeedResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> FeedResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = Self::new(
            lookup(Self::CLIENT_ID_VAR).unwrap_or_default(),
            lookup(Self::CLIENT_SECRET_VAR).unwrap_or_default(),
            lookup(Self::USER_AGENT_VAR).unwrap_or_default(),
        );
        credentials.ensure_complete()?;
        Ok(credentials)
    }

    fn ensure_complete(&self) -> FeedResult<()> {
        let missing: Vec<&'static str> = [
            (Self::CLIENT_ID_VAR, &self.client_id),
            (Self::CLIENT_SECRET_VAR, &self.client_secret),
            (Self::USER_AGENT_VAR, &self.user_agent),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FeedError::MissingCredentials(missing))
        }
    }
}

impl fmt::Debug for FeedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct FeedEndpoints {
    pub auth_url: String,
    pub api_base: String,
}

impl Default for FeedEndpoints {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: ListingPost,
}

#[derive(Debug, Deserialize)]
struct ListingPost {
    id: String,
    url: Option<String>,
}

/// OAuth (application-only) client for subreddit listings.
pub struct RedditFeedClient {
    http: Client,
    credentials: FeedCredentials,
    endpoints: FeedEndpoints,
    token: Mutex<Option<AccessToken>>,
}

impl fmt::Debug for RedditFeedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditFeedClient")
            .field("credentials", &self.credentials)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl RedditFeedClient {
    /// Validates the credentials by performing the token exchange up front, so a
    /// bad configuration fails at startup instead of on the first scheduled run.
    pub async fn connect(credentials: FeedCredentials, endpoints: FeedEndpoints) -> FeedResult<Self> {
        credentials.ensure_complete()?;
        let http = Client::builder()
            .user_agent(credentials.user_agent.clone())
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| FeedError::Network(err.to_string()))?;
        let client = Self {
            http,
            credentials,
            endpoints,
            token: Mutex::new(None),
        };
        let token = client.request_token().await?;
        client.store_token(Some(token));
        info!(api = %client.endpoints.api_base, "connected to feed source");
        Ok(client)
    }

    async fn request_token(&self) -> FeedResult<AccessToken> {
        let response = self
            .http
            .post(&self.endpoints.auth_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(FeedError::Authentication(format!(
                "token endpoint answered {status}"
            )));
        }
        if !status.is_success() {
            return Err(FeedError::Network(format!(
                "token endpoint answered {status}"
            )));
        }
        let body: TokenResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(FeedError::Authentication(error));
        }
        let value = body
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| FeedError::Authentication("no access token issued".to_string()))?;
        Ok(AccessToken {
            value,
            expires_at: token_expiry(Instant::now(), body.expires_in),
        })
    }

    async fn bearer_token(&self) -> FeedResult<String> {
        let cached = self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .filter(|token| token.is_fresh())
            .map(|token| token.value.clone());
        if let Some(value) = cached {
            return Ok(value);
        }
        debug!("refreshing feed access token");
        let token = self.request_token().await?;
        let value = token.value.clone();
        self.store_token(Some(token));
        Ok(value)
    }

    fn store_token(&self, token: Option<AccessToken>) {
        *self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    fn listing_url(&self, channel: &str, ordering: OrderingMode) -> String {
        format!(
            "{}/r/{}/{}",
            self.endpoints.api_base.trim_end_matches('/'),
            channel,
            ordering.as_str()
        )
    }
}

/// Absurd lifetimes that overflow the clock fall back to the default one.
fn token_expiry(now: Instant, expires_in: Option<u64>) -> Instant {
    let lifetime = expires_in.map_or(DEFAULT_TOKEN_LIFETIME, Duration::from_secs);
    now.checked_add(lifetime)
        .unwrap_or(now + DEFAULT_TOKEN_LIFETIME)
}

fn validate_channel(channel: &str) -> FeedResult<()> {
    let valid = !channel.is_empty()
        && channel
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(FeedError::InvalidChannel(channel.to_string()))
    }
}

#[async_trait]
impl FeedSource for RedditFeedClient {
    async fn list_posts(
        &self,
        channel: &str,
        ordering: OrderingMode,
        limit: u32,
    ) -> FeedResult<Vec<CandidatePost>> {
        validate_channel(channel)?;
        let limit = if limit > MAX_LISTING_LIMIT {
            warn!(limit, max = MAX_LISTING_LIMIT, "post limit capped");
            MAX_LISTING_LIMIT
        } else {
            limit
        };
        let token = self.bearer_token().await?;

        let mut query = vec![("limit", limit.to_string()), ("raw_json", "1".to_string())];
        if ordering == OrderingMode::Top {
            query.push(("t", "all".to_string()));
        }
        let response = self
            .http
            .get(self.listing_url(channel, ordering))
            .bearer_auth(token)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.store_token(None);
            return Err(FeedError::Authentication(format!(
                "listing for r/{channel} answered {status}"
            )));
        }
        if !status.is_success() {
            return Err(FeedError::Status {
                channel: channel.to_string(),
                status: status.as_u16(),
            });
        }

        let listing: Listing = response.json().await?;
        let posts: Vec<CandidatePost> = listing
            .data
            .children
            .into_iter()
            .filter_map(|child| match child.data.url {
                Some(url) => Some(CandidatePost::new(child.data.id, url)),
                None => {
                    debug!(post = %child.data.id, "post without url skipped");
                    None
                }
            })
            .collect();
        info!(
            channel,
            ordering = %ordering,
            posts = posts.len(),
            "listed feed posts"
        );
        Ok(posts)
    }
}
