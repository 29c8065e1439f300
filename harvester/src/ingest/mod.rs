pub mod http_source;
pub mod limiter;

use async_trait::async_trait;
use bytes::Bytes;
use harvest_core::Result;
use reqwest::header::HeaderMap;

/// Raw reply from the origin, before any classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True when the content type announces a JSON payload.
    pub fn is_structured(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET with the given extra headers. Non-success statuses are
    /// returned as responses, not errors.
    async fn get(&self, url: &str, headers: HeaderMap) -> Result<RawResponse>;

    /// Get the transport identifier
    fn source_id(&self) -> &str;
}

pub use http_source::HttpTransport;
pub use limiter::DomainLimiter;
