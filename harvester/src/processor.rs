use chrono::{DateTime, Utc};
use harvest_core::{Error, Result};
use metrics::counter;
use tracing::{debug, info};

use crate::gate::Termination;
use crate::ingest::RawResponse;
use crate::model::{Cursor, Page, PageBounds, Record};

/// Outcome of handling one response.
#[derive(Debug)]
pub enum PageStep {
    /// Not a data response; nothing to emit, nothing to follow.
    Ignored,
    /// Zero messages: history for the symbol is exhausted.
    Exhausted,
    Page(ProcessedPage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    Next(Cursor),
    Stop(Termination),
}

#[derive(Debug)]
pub struct ProcessedPage {
    pub bounds: PageBounds,
    /// In the order the page lists them, newest first.
    pub records: Vec<Record>,
    pub continuation: Continuation,
}

pub struct PageProcessor {
    boundary: DateTime<Utc>,
}

impl PageProcessor {
    pub fn new(boundary: DateTime<Utc>) -> Self {
        Self { boundary }
    }

    pub fn boundary(&self) -> DateTime<Utc> {
        self.boundary
    }

    /// Classifies and decodes a response. `requested` is the cursor the
    /// page was asked for, if any.
    pub fn process(&self, response: &RawResponse, requested: Option<Cursor>) -> Result<PageStep> {
        if !response.is_structured() {
            debug!(
                url = %response.url,
                content_type = ?response.content_type,
                "Ignoring non-data response"
            );
            counter!("harvester_ignored_responses_total").increment(1);
            return Ok(PageStep::Ignored);
        }

        let page: Page = serde_json::from_slice(&response.body)?;
        self.process_page(page, requested)
    }

    pub fn process_page(&self, page: Page, requested: Option<Cursor>) -> Result<PageStep> {
        if page.messages.is_empty() {
            info!("receiving 0 messages, exit...");
            return Ok(PageStep::Exhausted);
        }

        let bounds = page
            .bounds()
            .ok_or_else(|| Error::Internal("non-empty page without bounds".into()))?;

        if let Some(requested) = requested {
            if bounds.max >= requested {
                return Err(Error::Protocol(format!(
                    "page requested below {} reports max {}, cursor would not move back",
                    requested, bounds.max
                )));
            }
        }

        info!(
            more = page.more,
            "Response got {} messages, {} - {}",
            page.messages.len(),
            bounds.since,
            bounds.max
        );
        counter!("harvester_pages_total").increment(1);

        let records = page
            .messages
            .iter()
            .map(Record::try_from)
            .collect::<Result<Vec<_>>>()?;

        let continuation = match records.last() {
            Some(oldest) if oldest.created_at < self.boundary => {
                Continuation::Stop(Termination::TimeBoundary {
                    oldest: oldest.created_at,
                })
            }
            _ => Continuation::Next(bounds.max),
        };

        Ok(PageStep::Page(ProcessedPage {
            bounds,
            records,
            continuation,
        }))
    }
}
