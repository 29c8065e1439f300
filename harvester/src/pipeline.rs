use futures::future::{BoxFuture, FutureExt};
use harvest_core::retry::{retry_with_budget, RetryBudget};
use harvest_core::{Config, Error, Result};
use metrics::gauge;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, instrument, warn};

use crate::bootstrap::Bootstrapper;
use crate::gate::{CompletionGate, Termination};
use crate::ingest::{DomainLimiter, Transport};
use crate::model::Cursor;
use crate::poller::{Poller, RequestTarget};
use crate::processor::{Continuation, PageProcessor, PageStep, ProcessedPage};
use crate::session::Session;
use crate::sink::RecordSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestSummary {
    pub symbol: String,
    pub pages: u64,
    pub messages: u64,
    pub lowest_cursor: Option<Cursor>,
    pub termination: Termination,
    pub elapsed: Duration,
}

/// One harvest run for one symbol. Pages are fetched newest to oldest; each
/// page's continuation is spawned before the page is written out.
pub struct Pipeline {
    session: Arc<Session>,
    bootstrapper: Bootstrapper,
    poller: Poller,
    processor: PageProcessor,
    retry: Mutex<RetryBudget>,
    sink: AsyncMutex<Box<dyn RecordSink>>,
    gate: CompletionGate,
    resume: Option<Cursor>,
    pages: AtomicU64,
    messages: AtomicU64,
    lowest_cursor: AtomicU64,
}

impl Pipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Box<dyn RecordSink>,
        config: &Config,
    ) -> Self {
        let harvest = &config.harvest;
        let session = Arc::new(Session::new(harvest.symbol.clone(), harvest.delay()));

        let bootstrapper = Bootstrapper::new(Arc::clone(&transport), config.origin.base_url.clone());
        let poller = Poller::new(
            transport,
            DomainLimiter::from_config(&config.origin),
            Arc::clone(&session),
            config.origin.base_url.clone(),
        );

        Self {
            session,
            bootstrapper,
            poller,
            processor: PageProcessor::new(harvest.boundary()),
            retry: Mutex::new(RetryBudget::new(harvest.retry_limit(), harvest.retry_pause())),
            sink: AsyncMutex::new(sink),
            gate: CompletionGate::new(),
            resume: harvest.resume_id.filter(|id| *id != 0).map(Cursor),
            pages: AtomicU64::new(0),
            messages: AtomicU64::new(0),
            lowest_cursor: AtomicU64::new(u64::MAX),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Runs until a terminal page (empty, or older than the boundary) has
    /// been written and no page is still in flight, or until a fatal error.
    #[instrument(skip(self), fields(symbol = %self.session.symbol()))]
    pub async fn run(self: Arc<Self>) -> Result<HarvestSummary> {
        let started = Instant::now();
        let first = match self.resume {
            Some(cursor) => RequestTarget::Continuation(cursor),
            None => RequestTarget::Initial,
        };

        info!(
            start = ?first,
            boundary = %self.boundary_display(),
            "🚀 Starting harvest"
        );

        // The gate starts with one unit held for this first page; it waits
        // on session readiness before sending anything.
        tokio::spawn(Arc::clone(&self).process_target(first));

        if let Err(e) = self.bootstrapper.bootstrap(&self.session, &self.retry).await {
            error!(error = %e, "Bootstrap failed");
            self.gate.fail(e);
        }

        let outcome = self.gate.wait().await;

        let flushed = self.sink.lock().await.flush();
        let termination = outcome?;
        flushed?;

        let summary = HarvestSummary {
            symbol: self.session.symbol().to_string(),
            pages: self.pages.load(Ordering::SeqCst),
            messages: self.messages.load(Ordering::SeqCst),
            lowest_cursor: match self.lowest_cursor.load(Ordering::SeqCst) {
                u64::MAX => None,
                id => Some(Cursor(id)),
            },
            termination,
            elapsed: started.elapsed(),
        };

        info!(
            "✨ Harvest completed! {} | Pages: {} | Messages: {} | Lowest id: {} | Elapsed: {:.1}s",
            summary.termination,
            summary.pages,
            summary.messages,
            summary
                .lowest_cursor
                .map(|c| c.to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            summary.elapsed.as_secs_f64()
        );

        Ok(summary)
    }

    /// Owns one gate unit for the lifetime of the page. Boxed because page
    /// tasks spawn their own continuations.
    fn process_target(self: Arc<Self>, target: RequestTarget) -> BoxFuture<'static, ()> {
        async move {
            if let Err(e) = self.handle_target(target).await {
                error!(error = %e, target = ?target, "Fatal error while paging");
                self.gate.fail(e);
            }
            self.gate.leave();
        }
        .boxed()
    }

    async fn handle_target(self: &Arc<Self>, target: RequestTarget) -> Result<()> {
        let response = retry_with_budget(&self.retry, || self.poller.poll(target), "poll").await?;

        match self.processor.process(&response, target.cursor())? {
            PageStep::Ignored => {
                warn!(url = %response.url, "Response was not a data page, chain ends here");
            }
            PageStep::Exhausted => {
                self.gate.finish(Termination::EmptyPage {
                    cursor: target.cursor(),
                });
            }
            PageStep::Page(page) => {
                self.pages.fetch_add(1, Ordering::SeqCst);
                self.note_cursor(page.bounds.max);

                if let Continuation::Next(cursor) = page.continuation {
                    self.dispatch(RequestTarget::Continuation(cursor));
                }
                self.emit(&page).await?;

                if let Continuation::Stop(termination) = page.continuation {
                    info!(%termination, "Reached requested history depth");
                    self.gate.finish(termination);
                }
            }
        }

        Ok(())
    }

    fn dispatch(self: &Arc<Self>, target: RequestTarget) {
        if self.gate.is_finished() {
            return;
        }
        self.gate.enter();
        tokio::spawn(Arc::clone(self).process_target(target));
    }

    /// Writes one page while holding the sink for the whole page.
    async fn emit(&self, page: &ProcessedPage) -> Result<()> {
        let mut sink = self.sink.lock().await;
        let written = sink.append(&page.records)?;
        if written != page.records.len() {
            return Err(Error::Internal(format!(
                "sink accepted {} of {} records",
                written,
                page.records.len()
            )));
        }
        self.messages.fetch_add(written as u64, Ordering::SeqCst);
        Ok(())
    }

    fn note_cursor(&self, cursor: Cursor) {
        let previous = self.lowest_cursor.fetch_min(cursor.0, Ordering::SeqCst);
        gauge!("harvester_cursor").set(previous.min(cursor.0) as f64);
    }

    fn boundary_display(&self) -> String {
        self.processor.boundary().format("%Y-%m-%d").to_string()
    }
}
