//! push-relay webhook dispatcher adapter.
//!
//! Implements [`relay::Dispatcher`] as one `POST` of the JSON-serialised
//! [`relay::PushNotification`] to a fixed URL, with the headers a GitHub
//! webhook receiver expects:
//!
//! - `Content-Type: application/json`
//! - `X-GitHub-Event: push`
//!
//! Any 2xx response is a success. Everything else is a
//! [`relay::DispatchError::Rejected`] carrying status and body. There is no
//! retry here: a failed delivery fails the cycle, and the scheduler decides
//! whether to run it again.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Serialisation and transport only; the [`relay`] crate
//! sees only [`relay::Dispatcher`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use thiserror::Error;

use relay::{DispatchError, Dispatcher, PushNotification};

/// Header naming the kind of notification being delivered.
pub const EVENT_HEADER: &str = "x-github-event";

/// Value of [`EVENT_HEADER`] for push notifications.
pub const PUSH_EVENT: &str = "push";

/// Longest response body kept in a [`DispatchError::Rejected`].
const MAX_ERROR_BODY: usize = 2048;

/// Construction-time failure of [`WebhookDispatcher`].
#[derive(Debug, Error)]
pub enum WebhookClientError {
    /// The destination is not an absolute http(s) URL.
    #[error("invalid webhook URL '{url}': {reason}")]
    InvalidUrl {
        /// The rejected value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client")]
    Build(#[source] reqwest::Error),

    /// The user agent contains characters not allowed in a header.
    #[error("user agent is not a valid HTTP header value")]
    InvalidUserAgent,
}

/// Settings for [`WebhookDispatcher`].
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Receiver URL.
    pub url: String,
    /// Per-request timeout; `None` keeps the HTTP client's default.
    pub timeout: Option<Duration>,
    /// `User-Agent` header.
    pub user_agent: String,
}

/// [`Dispatcher`] that POSTs each notification to one URL.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    http: reqwest::Client,
    url: reqwest::Url,
}

impl WebhookDispatcher {
    /// Builds a dispatcher from `config`.
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookClientError> {
        let invalid = |reason: String| WebhookClientError::InvalidUrl {
            url: config.url.clone(),
            reason,
        };
        let url = reqwest::Url::parse(&config.url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|_| WebhookClientError::InvalidUserAgent)?,
        );
        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build().map_err(WebhookClientError::Build)?,
            url,
        })
    }

    /// Destination URL.
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    /// Serialises `notification` and builds the delivery request without
    /// sending it.
    pub fn build_request(
        &self,
        notification: &PushNotification,
    ) -> Result<reqwest::Request, DispatchError> {
        let body = serde_json::to_vec(notification).map_err(DispatchError::Serialize)?;
        self.http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, PUSH_EVENT)
            .body(body)
            .build()
            .map_err(transport_error)
    }
}

#[async_trait]
impl Dispatcher for WebhookDispatcher {
    async fn dispatch(&self, notification: &PushNotification) -> Result<(), DispatchError> {
        let request = self.build_request(notification)?;
        let response = self.http.execute(request).await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = status.as_u16(), "webhook accepted notification");
            return Ok(());
        }

        // The body is diagnostics only; an unreadable body must not hide the status.
        let body = response.text().await.unwrap_or_default();
        Err(rejection(status, &body))
    }
}

/// Builds the error for a non-2xx response.
pub fn rejection(status: StatusCode, body: &str) -> DispatchError {
    let mut end = body.len().min(MAX_ERROR_BODY);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    DispatchError::Rejected {
        status: status.as_u16(),
        body: body[..end].to_string(),
    }
}

fn transport_error(err: reqwest::Error) -> DispatchError {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    DispatchError::Transport { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay::{normalize_push, parse_page, RetryPolicy};

    fn dispatcher() -> WebhookDispatcher {
        WebhookDispatcher::new(WebhookConfig {
            url: "https://hooks.example.test/github".into(),
            timeout: None,
            user_agent: "push-relay/test".into(),
        })
        .unwrap()
    }

    fn notification() -> PushNotification {
        let body = serde_json::json!([{
            "id": "42",
            "type": "PushEvent",
            "actor": { "id": 1, "login": "octocat", "url": "u", "avatar_url": "a" },
            "repo": { "id": 2, "name": "owner/repo", "url": "r" },
            "payload": {
                "ref": "refs/heads/main",
                "before": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "head": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                "commits": []
            }
        }]);
        let records = parse_page(body.to_string().as_bytes()).unwrap();
        normalize_push(records[0].as_push().unwrap())
    }

    #[test]
    fn request_is_a_json_push_post() {
        let request = dispatcher().build_request(&notification()).unwrap();

        assert_eq!(*request.method(), reqwest::Method::POST);
        assert_eq!(request.url().as_str(), "https://hooks.example.test/github");
        assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(request.headers()[EVENT_HEADER], "push");

        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(json["ref"], "refs/heads/main");
        assert_eq!(json["repository"]["full_name"], "owner/repo");
    }

    #[test]
    fn rejects_relative_urls() {
        let err = WebhookDispatcher::new(WebhookConfig {
            url: "/not/absolute".into(),
            timeout: None,
            user_agent: "push-relay/test".into(),
        })
        .unwrap_err();
        assert!(matches!(err, WebhookClientError::InvalidUrl { .. }));
    }

    #[test]
    fn rejects_non_http_schemes() {
        let err = WebhookDispatcher::new(WebhookConfig {
            url: "ftp://hooks.example.test/".into(),
            timeout: None,
            user_agent: "push-relay/test".into(),
        })
        .unwrap_err();
        assert!(err.to_string().contains("unsupported scheme 'ftp'"));
    }

    #[test]
    fn rejection_keeps_status_and_body() {
        let err = rejection(StatusCode::UNPROCESSABLE_ENTITY, "bad payload");
        match &err {
            DispatchError::Rejected { status, body } => {
                assert_eq!(*status, 422);
                assert_eq!(body, "bad payload");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.retry_policy(), RetryPolicy::NonRetryable);
    }

    #[test]
    fn server_side_rejection_is_retryable() {
        assert!(rejection(StatusCode::SERVICE_UNAVAILABLE, "")
            .retry_policy()
            .is_retryable());
    }
}
