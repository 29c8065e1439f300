//! Shared harvest session: immutable settings plus the write-once
//! authentication material discovered while bootstrapping.

use harvest_core::{Error, Result};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Bootstrap fragments that must be known before the first page request.
pub const BOOTSTRAP_PARTIES: usize = 2;

/// Countdown latch: `wait` resolves once `release` has been called `parties` times.
#[derive(Debug)]
pub struct ReadinessLatch {
    remaining: watch::Sender<usize>,
}

impl ReadinessLatch {
    pub fn new(parties: usize) -> Self {
        let (remaining, _) = watch::channel(parties);
        Self { remaining }
    }

    pub fn release(&self) {
        self.remaining.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub fn is_open(&self) -> bool {
        *self.remaining.borrow() == 0
    }

    pub async fn wait(&self) {
        let mut rx = self.remaining.subscribe();
        // The sender lives in `self`, so the channel cannot close underneath us.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMaterial {
    pub csrf_token: String,
    pub stream_id: u64,
}

#[derive(Debug)]
pub struct Session {
    symbol: String,
    delay: Duration,
    csrf_token: OnceLock<String>,
    stream_id: OnceLock<u64>,
    ready: ReadinessLatch,
}

impl Session {
    pub fn new(symbol: impl Into<String>, delay: Duration) -> Self {
        Self {
            symbol: symbol.into(),
            delay,
            csrf_token: OnceLock::new(),
            stream_id: OnceLock::new(),
            ready: ReadinessLatch::new(BOOTSTRAP_PARTIES),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn set_csrf_token(&self, token: String) -> Result<()> {
        self.csrf_token
            .set(token)
            .map_err(|_| Error::Internal("csrf token already set for this session".into()))?;
        debug!(symbol = %self.symbol, "csrf token resolved");
        self.ready.release();
        Ok(())
    }

    pub fn set_stream_id(&self, stream_id: u64) -> Result<()> {
        self.stream_id
            .set(stream_id)
            .map_err(|_| Error::Internal("stream id already set for this session".into()))?;
        debug!(symbol = %self.symbol, stream_id, "stream id resolved");
        self.ready.release();
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_open()
    }

    /// Blocks until both bootstrap fragments are known.
    pub async fn wait_ready(&self) {
        self.ready.wait().await;
    }

    pub fn auth(&self) -> Result<AuthMaterial> {
        let csrf_token = self
            .csrf_token
            .get()
            .cloned()
            .ok_or_else(|| Error::MissingAuth("csrf token".into()))?;
        let stream_id = *self
            .stream_id
            .get()
            .ok_or_else(|| Error::MissingAuth("stream id".into()))?;
        Ok(AuthMaterial {
            csrf_token,
            stream_id,
        })
    }
}
