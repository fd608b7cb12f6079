//! push-relay GitHub infrastructure adapter.
//!
//! Implements [`relay::FeedClient`] over the GitHub REST endpoint
//! `GET /repos/{owner}/{repo}/events`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. Request
//! headers, conditional requests (`If-None-Match` / `ETag`), authentication and
//! rate-limit header handling live here; the [`relay`] crate only sees
//! [`relay::FeedPage`] and [`relay::FeedError`].
//!
//! Only the first page (100 records) is requested. GitHub keeps roughly the
//! last 90 days / 300 events per repository, so a poller that falls more than
//! a page behind can miss records; one repository polled every minute stays
//! far below that.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, ETAG, IF_NONE_MATCH, RETRY_AFTER, USER_AGENT,
};
use reqwest::StatusCode;
use thiserror::Error;

use relay::{parse_page, CacheToken, FeedClient, FeedError, FeedPage, RepositoryId};

/// Public GitHub REST API origin.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Records requested per fetch. Only the first page is ever read.
pub const PAGE_SIZE: u32 = 100;

const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";
const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";

/// Longest error body kept in a [`FeedError::Status`].
const MAX_ERROR_BODY: usize = 2048;

/// Construction-time failure of [`GitHubFeedClient`].
#[derive(Debug, Error)]
pub enum GitHubClientError {
    /// The HTTP client could not be built (TLS backend initialisation).
    #[error("failed to build HTTP client")]
    Build(#[from] reqwest::Error),

    /// The auth token or user agent contains characters not allowed in a header.
    #[error("{0} is not a valid HTTP header value")]
    InvalidHeader(&'static str),
}

/// Settings for [`GitHubFeedClient`].
#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// API origin without a trailing slash, e.g. [`DEFAULT_API_URL`].
    pub api_url: String,
    /// Bearer token; anonymous requests get a much lower rate limit.
    pub token: Option<String>,
    /// Per-request timeout; `None` keeps the HTTP client's default.
    pub timeout: Option<Duration>,
    /// `User-Agent` header (GitHub rejects requests without one).
    pub user_agent: String,
}

/// [`FeedClient`] backed by the GitHub repository events API.
#[derive(Clone)]
pub struct GitHubFeedClient {
    http: reqwest::Client,
    api_url: String,
    authorization: Option<HeaderValue>,
}

impl GitHubFeedClient {
    /// Builds a client from `config`.
    pub fn new(config: FeedClientConfig) -> Result<Self, GitHubClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_MEDIA_TYPE));
        headers.insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|_| GitHubClientError::InvalidHeader("user agent"))?,
        );

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let authorization = config
            .token
            .as_deref()
            .map(|token| {
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| GitHubClientError::InvalidHeader("GitHub token"))?;
                value.set_sensitive(true);
                Ok::<_, GitHubClientError>(value)
            })
            .transpose()?;

        Ok(Self {
            http: builder.build()?,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            authorization,
        })
    }

    /// Returns the events URL for `repository`, including the page size.
    pub fn events_url(&self, repository: &RepositoryId) -> String {
        format!(
            "{}/repos/{}/{}/events?per_page={PAGE_SIZE}",
            self.api_url,
            repository.owner(),
            repository.name()
        )
    }

    /// Builds the conditional request without sending it.
    pub fn build_request(
        &self,
        repository: &RepositoryId,
        cache_token: Option<&CacheToken>,
    ) -> Result<reqwest::Request, reqwest::Error> {
        let mut request = self.http.get(self.events_url(repository));
        if let Some(token) = cache_token {
            request = request.header(IF_NONE_MATCH, token.as_str());
        }
        if let Some(authorization) = &self.authorization {
            request = request.header(AUTHORIZATION, authorization.clone());
        }
        request.build()
    }
}

impl std::fmt::Debug for GitHubFeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubFeedClient")
            .field("api_url", &self.api_url)
            .field("authenticated", &self.authorization.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FeedClient for GitHubFeedClient {
    async fn fetch(
        &self,
        repository: &RepositoryId,
        cache_token: Option<&CacheToken>,
    ) -> Result<FeedPage, FeedError> {
        let request = self
            .build_request(repository, cache_token)
            .map_err(transport_error)?;
        tracing::debug!(url = %request.url(), conditional = cache_token.is_some(), "fetching activity feed");

        let response = self.http.execute(request).await.map_err(transport_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport_error)?;

        let page = interpret_response(status, &headers, &body, unix_now())?;
        if let FeedPage::Modified { records, .. } = &page {
            tracing::debug!(records = records.len(), "received activity page");
        }
        Ok(page)
    }
}

/// Maps a feed response to a [`FeedPage`] or [`FeedError`].
///
/// `now` is the current Unix time in seconds, used to turn an
/// `x-ratelimit-reset` timestamp into a delay.
pub fn interpret_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
    now: u64,
) -> Result<FeedPage, FeedError> {
    if status == StatusCode::NOT_MODIFIED {
        return Ok(FeedPage::NotModified);
    }
    if status == StatusCode::OK {
        let records = parse_page(body)?;
        let cache_token = headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .and_then(CacheToken::new);
        return Ok(FeedPage::Modified {
            records,
            cache_token,
        });
    }

    let body = String::from_utf8_lossy(body);
    Err(FeedError::Status {
        status: status.as_u16(),
        body: truncate(&body, MAX_ERROR_BODY).to_string(),
        retry_after: retry_delay(headers, now),
    })
}

/// Delay the server asked for, from `Retry-After` (seconds) or, when the rate
/// limit is exhausted, from `x-ratelimit-reset` (Unix seconds).
pub fn retry_delay(headers: &HeaderMap, now: u64) -> Option<Duration> {
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    if let Some(secs) = header_u64(RETRY_AFTER.as_str()) {
        return Some(Duration::from_secs(secs));
    }
    if header_u64("x-ratelimit-remaining") == Some(0) {
        return header_u64("x-ratelimit-reset")
            .map(|reset| Duration::from_secs(reset.saturating_sub(now)));
    }
    None
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn transport_error(err: reqwest::Error) -> FeedError {
    FeedError::Transport {
        message: error_chain(&err),
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
