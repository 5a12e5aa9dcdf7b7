//! REST implementation of the backend traits.
//!
//! Requires the `http` feature. Uses reqwest.
//!
//! ## Routes
//!
//! - `GET  {base}/feed?filter=..&sort=..&search=..&cursor=..&limit=..`
//! - `POST | DELETE {base}/{quotes|reviews|posts}/{id}/like`
//! - `POST | DELETE {base}/{quotes|reviews|posts}/{id}/save`
//! - `GET  {base}/notifications/unread-count`, `{base}/messages/unread-count`
//!
//! Non-2xx answers become [`FeedError::Backend`] carrying the body's
//! `message` (or `error`) field.

use async_trait::async_trait;
use reqwest::{Client, Method, Response, Url};
use serde_json::Value;
use tracing::debug;

use super::{ContentBackend, CounterSource, InteractionCounters, RawPage, UnreadCounts};
use crate::config::FeedConfig;
use crate::envelope::ContentKey;
use crate::error::{ConfigError, DecodeError, FeedError};
use crate::query::{Cursor, QueryKey};

/// HTTP client for the platform's content API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base: Url,
    client: Client,
}

impl HttpBackend {
    /// Create a backend for `base_url` with a default reqwest client.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Self::with_client(base_url, Client::new())
    }

    /// Create a backend reusing a preconfigured client (auth headers, proxies).
    pub fn with_client(base_url: &str, client: Client) -> Result<Self, ConfigError> {
        let base = Url::parse(base_url).map_err(|e| ConfigError::Invalid {
            key: "base_url",
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ConfigError::Invalid {
                key: "base_url",
                reason: format!("{} cannot carry a path", base_url),
            });
        }
        Ok(Self { base, client })
    }

    pub fn from_config(config: &FeedConfig) -> Result<Self, ConfigError> {
        Self::new(&config.base_url)
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // cannot_be_a_base was rejected in the constructor
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn interaction(
        &self,
        key: &ContentKey,
        action: &str,
        on: bool,
    ) -> Result<InteractionCounters, FeedError> {
        let method = if on { Method::POST } else { Method::DELETE };
        let url = self.url(&[key.kind.collection(), key.id.as_str(), action]);
        debug!(%url, %method, "interaction request");

        let response = self
            .client
            .request(method, url)
            .send()
            .await
            .map_err(transport)?;
        let body = handle_response(response).await?;
        match body {
            None => Ok(InteractionCounters::default()),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| DecodeError::invalid("body", e.to_string()).into()),
        }
    }

    async fn count(&self, segments: &[&str]) -> Result<u32, FeedError> {
        let response = self
            .client
            .get(self.url(segments))
            .send()
            .await
            .map_err(transport)?;
        let body = handle_response(response).await?.unwrap_or(Value::Null);
        let count = match &body {
            Value::Number(n) => n.as_u64(),
            Value::Object(obj) => obj.get("count").and_then(Value::as_u64),
            _ => None,
        }
        .ok_or(DecodeError::MissingField("count"))?;
        u32::try_from(count).map_err(|_| DecodeError::invalid("count", "overflows u32").into())
    }
}

#[async_trait]
impl ContentBackend for HttpBackend {
    async fn fetch_page(
        &self,
        key: &QueryKey,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> Result<RawPage, FeedError> {
        let mut params: Vec<(&str, String)> = vec![
            ("filter", key.filter().as_str().to_string()),
            ("sort", key.sort().as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        if !key.search().is_empty() {
            params.push(("search", key.search().to_string()));
        }
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.as_str().to_string()));
        }

        let response = self
            .client
            .get(self.url(&["feed"]))
            .query(&params)
            .send()
            .await
            .map_err(transport)?;
        let body = handle_response(response)
            .await?
            .ok_or(DecodeError::MissingField("items"))?;
        Ok(RawPage::from_json(&body)?)
    }

    async fn set_liked(
        &self,
        key: &ContentKey,
        liked: bool,
    ) -> Result<InteractionCounters, FeedError> {
        self.interaction(key, "like", liked).await
    }

    async fn set_saved(
        &self,
        key: &ContentKey,
        saved: bool,
    ) -> Result<InteractionCounters, FeedError> {
        self.interaction(key, "save", saved).await
    }
}

#[async_trait]
impl CounterSource for HttpBackend {
    async fn unread_counts(&self) -> Result<UnreadCounts, FeedError> {
        let notifications = self.count(&["notifications", "unread-count"]).await?;
        let messages = self.count(&["messages", "unread-count"]).await?;
        Ok(UnreadCounts {
            notifications,
            messages,
        })
    }
}

fn transport(err: reqwest::Error) -> FeedError {
    FeedError::Network(err.to_string())
}

/// Check the status and read the body. `Ok(None)` for an empty 2xx body.
async fn handle_response(response: Response) -> Result<Option<Value>, FeedError> {
    let status = response.status();
    let text = response.text().await.map_err(transport)?;

    if !status.is_success() {
        return Err(FeedError::Backend {
            status: status.as_u16(),
            message: backend_message(&text, status.canonical_reason()),
        });
    }

    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| DecodeError::invalid("body", e.to_string()).into())
}

fn backend_message(body: &str, reason: Option<&str>) -> String {
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) {
        if let Some(message) = ["message", "error"]
            .iter()
            .find_map(|name| obj.get(*name).and_then(Value::as_str))
        {
            return message.to_string();
        }
    }
    let body = body.trim();
    if body.is_empty() {
        reason.unwrap_or("request failed").to_string()
    } else {
        body.to_string()
    }
}
