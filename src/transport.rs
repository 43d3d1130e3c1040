//! Outbound HTTP primitive.
//!
//! [`Transport::open`] issues exactly one request and hands back the still-open
//! response body, or a classified [`RelayError`]. Every suspension point selects
//! on the caller's [`CancellationToken`], so a disconnected client unblocks the
//! upstream call instead of leaving it hanging.

use crate::error::{RelayError, Result};
use crate::providers::Credential;

use bytes::{Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Upstream response body, errors already classified.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Body handed to the HTTP surface.
pub type BodyStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send>>;

/// Provider error bodies are kept up to this many bytes.
const MAX_ERROR_BODY: usize = 4 * 1024;

pub enum Payload {
    Empty,
    Json(serde_json::Value),
    Multipart(reqwest::multipart::Form),
}

/// A response whose status was below 400 and whose body is still unread.
pub struct Opened {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl Opened {
    /// Read the whole body.
    pub async fn bytes(mut self, cancel: &CancellationToken) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RelayError::transport("request cancelled while reading upstream body"));
                }
                next = self.body.next() => next,
            };
            match next {
                Some(chunk) => buf.extend_from_slice(&chunk?),
                None => return Ok(buf.freeze()),
            }
        }
    }

    pub async fn json<T: DeserializeOwned>(self, cancel: &CancellationToken) -> Result<T> {
        let bytes = self.bytes(cancel).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            RelayError::decode(format!(
                "unexpected upstream body ({e}): {}",
                truncate(&String::from_utf8_lossy(&bytes), 300)
            ))
        })
    }

    /// Forward the body unchanged; the stream ends when `cancel` fires.
    pub fn into_body(self, cancel: CancellationToken) -> BodyStream {
        let body = self
            .body
            .take_until(cancel.cancelled_owned())
            .map(|chunk| chunk.map_err(std::io::Error::other));
        Box::pin(body)
    }
}

/// Shared connection pool; cloning is cheap.
#[derive(Clone)]
pub struct Transport {
    client: reqwest::Client,
}

impl Transport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn open(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        payload: Payload,
        cancel: &CancellationToken,
    ) -> Result<Opened> {
        let mut builder = self.client.request(method.clone(), url).headers(headers);
        builder = match payload {
            Payload::Empty => builder,
            Payload::Json(value) => builder.json(&value),
            Payload::Multipart(form) => builder.multipart(form),
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RelayError::transport("request cancelled before upstream responded"));
            }
            sent = builder.send() => sent.map_err(|e| {
                if e.is_timeout() {
                    RelayError::Timeout(format!("{method} {url}: {e}"))
                } else {
                    RelayError::transport(format!("{method} {url}: {e}"))
                }
            })?,
        };

        let status = response.status().as_u16();
        if status >= 400 {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => String::new(),
                text = response.text() => text.unwrap_or_default(),
            };
            tracing::debug!(%status, %url, "upstream rejected request");
            return Err(RelayError::UpstreamStatus {
                status,
                body: truncate(&body, MAX_ERROR_BODY).to_string(),
            });
        }

        let headers = response.headers().clone();
        let body = response.bytes_stream().map(|r| r.map_err(RelayError::from));

        Ok(Opened {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

/// A provider API root plus the credential stamped on every call to it.
#[derive(Clone)]
pub struct HttpEndpoint {
    transport: Transport,
    base_url: String,
    credential: Credential,
}

impl HttpEndpoint {
    pub fn new(transport: Transport, base_url: impl Into<String>, credential: Credential) -> Self {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        Self {
            transport,
            base_url,
            credential,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Same transport and credential, different API root.
    #[must_use]
    pub fn with_base_url(&self, base_url: impl Into<String>) -> Self {
        Self::new(self.transport.clone(), base_url, self.credential.clone())
    }

    fn headers(&self, content_type: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        self.credential.stamp(&mut headers);
        headers
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        cancel: &CancellationToken,
    ) -> Result<Opened> {
        let value = serde_json::to_value(body)?;
        self.transport
            .open(
                Method::POST,
                &self.url(path),
                self.headers(Some("application/json")),
                Payload::Json(value),
                cancel,
            )
            .await
    }

    pub async fn post_form(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
        cancel: &CancellationToken,
    ) -> Result<Opened> {
        self.transport
            .open(
                Method::POST,
                &self.url(path),
                self.headers(None),
                Payload::Multipart(form),
                cancel,
            )
            .await
    }

    pub async fn get(&self, path: &str, cancel: &CancellationToken) -> Result<Opened> {
        self.transport
            .open(Method::GET, &self.url(path), self.headers(None), Payload::Empty, cancel)
            .await
    }

    /// GET an absolute URL on the provider's own hosts (queue status links).
    pub async fn get_absolute(&self, url: &str, cancel: &CancellationToken) -> Result<Opened> {
        self.transport
            .open(Method::GET, url, self.headers(None), Payload::Empty, cancel)
            .await
    }

    /// GET an absolute URL, without the provider credential (result files on a CDN).
    pub async fn fetch_public(&self, url: &str, cancel: &CancellationToken) -> Result<Opened> {
        self.transport
            .open(Method::GET, url, HeaderMap::new(), Payload::Empty, cancel)
            .await
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character.
pub fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
