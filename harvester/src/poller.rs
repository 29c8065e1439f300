use harvest_core::{Error, Result};
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use tracing::info;

use crate::ingest::{DomainLimiter, RawResponse, Transport};
use crate::model::Cursor;
use crate::session::Session;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const REQUESTED_WITH_HEADER: &str = "x-requested-with";
pub const AJAX_MARKER: &str = "XMLHttpRequest";

/// What a pagination request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTarget {
    /// Newest page, no cursor.
    Initial,
    /// Page strictly older than the cursor.
    Continuation(Cursor),
}

impl RequestTarget {
    pub fn cursor(&self) -> Option<Cursor> {
        match self {
            RequestTarget::Initial => None,
            RequestTarget::Continuation(cursor) => Some(*cursor),
        }
    }

    pub fn url(&self, base_url: &str, stream_id: u64) -> String {
        match self {
            RequestTarget::Initial => format!(
                "{}/streams/stream?stream=symbol&stream_id={}&substream=all&username=undefined&symbol=undefined",
                base_url, stream_id
            ),
            RequestTarget::Continuation(max) => format!(
                "{}/streams/poll?stream=symbol&stream_id={}&substream=all&max={}",
                base_url, stream_id, max
            ),
        }
    }
}

/// Issues single page requests. Retry policy lives with the caller.
pub struct Poller {
    transport: Arc<dyn Transport>,
    limiter: DomainLimiter,
    session: Arc<Session>,
    base_url: String,
}

impl Poller {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: DomainLimiter,
        session: Arc<Session>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            limiter,
            session,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Waits for session readiness and the fixed delay, then sends one GET
    /// carrying the anti-forgery token and the ajax marker.
    pub async fn poll(&self, target: RequestTarget) -> Result<RawResponse> {
        self.session.wait_ready().await;
        tokio::time::sleep(self.session.delay()).await;

        let auth = self.session.auth()?;
        let url = target.url(&self.base_url, auth.stream_id);
        let headers = pagination_headers(&auth.csrf_token)?;

        let _permit = self.limiter.acquire().await?;
        info!("URL    : {}", url);
        counter!("harvester_requests_total", "source" => self.transport.source_id().to_string())
            .increment(1);

        let response = self.transport.get(&url, headers).await?;
        if !response.is_success() {
            return Err(Error::Status {
                url,
                status: response.status,
            });
        }
        Ok(response)
    }
}

pub fn pagination_headers(csrf_token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let token = HeaderValue::from_str(csrf_token)
        .map_err(|_| Error::MissingAuth("csrf token is not a valid header value".into()))?;
    headers.insert(HeaderName::from_static(CSRF_HEADER), token);
    headers.insert(
        HeaderName::from_static(REQUESTED_WITH_HEADER),
        HeaderValue::from_static(AJAX_MARKER),
    );
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builds_both_url_shapes() {
        assert_eq!(
            RequestTarget::Initial.url("https://stocktwits.com", 686),
            "https://stocktwits.com/streams/stream?stream=symbol&stream_id=686&substream=all&username=undefined&symbol=undefined"
        );
        assert_eq!(
            RequestTarget::Continuation(Cursor(190_000_123)).url("https://stocktwits.com", 686),
            "https://stocktwits.com/streams/poll?stream=symbol&stream_id=686&substream=all&max=190000123"
        );
    }

    #[test]
    fn attaches_token_and_ajax_marker() {
        let headers = pagination_headers("tok==").unwrap();
        assert_eq!(headers.get(CSRF_HEADER).unwrap(), "tok==");
        assert_eq!(headers.get(REQUESTED_WITH_HEADER).unwrap(), "XMLHttpRequest");
    }

    #[test]
    fn rejects_tokens_that_cannot_be_headers() {
        assert!(pagination_headers("bad\ntoken").is_err());
    }
}
