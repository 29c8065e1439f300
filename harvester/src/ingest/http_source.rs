use super::{RawResponse, Transport};
use async_trait::async_trait;
use harvest_core::config::OriginConfig;
use harvest_core::Result;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

/// `reqwest`-backed transport. Keeps cookies so the pagination requests ride
/// on the same session as the landing page.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &OriginConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, headers))]
    async fn get(&self, url: &str, headers: HeaderMap) -> Result<RawResponse> {
        let response = self.client.get(url).headers(headers).send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response.bytes().await?;

        debug!(
            status,
            content_type = ?content_type,
            bytes = body.len(),
            "Received response"
        );

        Ok(RawResponse {
            url: url.to_string(),
            status,
            content_type,
            body,
        })
    }

    fn source_id(&self) -> &str {
        "http"
    }
}
