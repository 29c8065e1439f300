//! Session bootstrap: fetch the symbol's landing page once and pull the
//! anti-forgery token and stream id out of its markup.

use futures::future;
use harvest_core::retry::{retry_with_budget, RetryBudget};
use harvest_core::{Error, Result};
use once_cell::sync::Lazy;
use reqwest::header::HeaderMap;
use scraper::{Html, Selector};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::ingest::{RawResponse, Transport};
use crate::session::Session;

static CSRF_META: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[name="csrf-token"]"#).expect("Invalid CSS selector: csrf meta")
});
static STREAM_LIST: Lazy<Selector> =
    Lazy::new(|| Selector::parse("ol.stream-list").expect("Invalid CSS selector: stream list"));

pub fn extract_csrf_token(markup: &str) -> Result<String> {
    let document = Html::parse_document(markup);
    document
        .select(&CSRF_META)
        .find_map(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::MissingAuth("csrf token not found".into()))
}

pub fn extract_stream_id(markup: &str) -> Result<u64> {
    let document = Html::parse_document(markup);
    let raw = document
        .select(&STREAM_LIST)
        .find_map(|el| el.value().attr("stream-id"))
        .ok_or_else(|| Error::MissingAuth("stream id not found".into()))?;

    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::MissingAuth(format!("stream id {:?} is not a number", raw)))
}

pub struct Bootstrapper {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl Bootstrapper {
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn landing_url(&self, symbol: &str) -> String {
        format!("{}/symbol/{}", self.base_url, symbol)
    }

    /// Fetches the landing page and runs one observer per fragment. Each
    /// observer releases one unit of the session's readiness latch when its
    /// fragment is stored. Any missing fragment fails the bootstrap.
    #[instrument(skip_all, fields(symbol = %session.symbol()))]
    pub async fn bootstrap(&self, session: &Arc<Session>, budget: &Mutex<RetryBudget>) -> Result<()> {
        let url = self.landing_url(session.symbol());
        info!(url = %url, "URL    : landing page");

        let response = retry_with_budget(budget, || self.fetch_landing(&url), "landing").await?;
        let markup: Arc<str> = Arc::from(response.text());

        let token_observer: JoinHandle<Result<()>> = tokio::spawn({
            let session = Arc::clone(session);
            let markup = Arc::clone(&markup);
            async move {
                let token = extract_csrf_token(&markup)?;
                info!(token_len = token.len(), "csrf token resolved");
                session.set_csrf_token(token)
            }
        });

        let stream_observer: JoinHandle<Result<()>> = tokio::spawn({
            let session = Arc::clone(session);
            async move {
                let stream_id = extract_stream_id(&markup)?;
                info!(stream_id, "stream id resolved");
                session.set_stream_id(stream_id)
            }
        });

        let (token, stream) = future::join(token_observer, stream_observer).await;
        for outcome in [token, stream] {
            outcome.map_err(|e| Error::Internal(format!("bootstrap observer panicked: {}", e)))??;
        }

        Ok(())
    }

    async fn fetch_landing(&self, url: &str) -> Result<RawResponse> {
        let response = self.transport.get(url, HeaderMap::new()).await?;
        if !response.is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LANDING: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta name="csrf-token" content="abc123==" />
  <title>AAPL</title>
</head>
<body>
  <ol class="stream-list show-conversation" stream-id="686"></ol>
</body>
</html>"#;

    #[test]
    fn extracts_both_fragments() {
        assert_eq!(extract_csrf_token(LANDING).unwrap(), "abc123==");
        assert_eq!(extract_stream_id(LANDING).unwrap(), 686);
    }

    #[test]
    fn missing_token_is_missing_auth() {
        let markup = r#"<html><body><ol class="stream-list" stream-id="1"></ol></body></html>"#;
        assert!(matches!(extract_csrf_token(markup), Err(Error::MissingAuth(_))));

        let empty = r#"<html><head><meta name="csrf-token" content=" "></head></html>"#;
        assert!(matches!(extract_csrf_token(empty), Err(Error::MissingAuth(_))));
    }

    #[test]
    fn malformed_stream_id_is_missing_auth() {
        let markup = r#"<html><body><ol class="stream-list" stream-id="abc"></ol></body></html>"#;
        assert!(matches!(extract_stream_id(markup), Err(Error::MissingAuth(_))));

        let absent = r#"<html><body><ol class="other"></ol></body></html>"#;
        assert!(matches!(extract_stream_id(absent), Err(Error::MissingAuth(_))));
    }
}
