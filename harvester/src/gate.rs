use chrono::{DateTime, Utc};
use harvest_core::{Error, Result};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use crate::model::Cursor;

/// Why a run stopped paging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The origin returned a page with no messages.
    EmptyPage { cursor: Option<Cursor> },
    /// The oldest message of a page predates the configured boundary.
    TimeBoundary { oldest: DateTime<Utc> },
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::EmptyPage { cursor: Some(c) } => write!(f, "empty page below {}", c),
            Termination::EmptyPage { cursor: None } => write!(f, "empty first page"),
            Termination::TimeBoundary { oldest } => {
                write!(f, "time boundary reached at {}", oldest.to_rfc3339())
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct GateState {
    in_flight: usize,
    terminal: Option<Termination>,
    failed: bool,
}

/// Tracks pages still being processed. The run completes once the count is
/// back to zero after a terminal condition, or immediately on failure. A
/// count that drains with no terminal condition is itself a failure.
#[derive(Debug)]
pub struct CompletionGate {
    state: watch::Sender<GateState>,
    failure: Mutex<Option<Error>>,
}

impl CompletionGate {
    /// Starts holding one unit on behalf of the first page.
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState {
            in_flight: 1,
            ..GateState::default()
        });
        Self {
            state,
            failure: Mutex::new(None),
        }
    }

    pub fn enter(&self) {
        self.state.send_modify(|s| s.in_flight += 1);
    }

    pub fn leave(&self) {
        self.state
            .send_modify(|s| s.in_flight = s.in_flight.saturating_sub(1));
    }

    pub fn in_flight(&self) -> usize {
        self.state.borrow().in_flight
    }

    /// Records a terminal condition. The first one wins.
    pub fn finish(&self, termination: Termination) {
        self.state.send_if_modified(|s| {
            if s.terminal.is_some() {
                return false;
            }
            debug!(%termination, "terminal condition signaled");
            s.terminal = Some(termination);
            true
        });
    }

    pub fn is_finished(&self) -> bool {
        let state = self.state.borrow();
        state.terminal.is_some() || state.failed
    }

    /// Records a fatal error. Only the first failure is kept.
    pub fn fail(&self, error: Error) {
        {
            let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
            if failure.is_some() {
                return;
            }
            *failure = Some(error);
        }
        self.state.send_modify(|s| s.failed = true);
    }

    pub async fn wait(&self) -> Result<Termination> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|s| s.failed || s.in_flight == 0)
            .await
            .map_err(|_| Error::Internal("completion gate closed".into()))?
            .clone();

        if state.failed {
            let failure = self
                .failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            return Err(failure.unwrap_or_else(|| Error::Internal("run failed".into())));
        }

        state.terminal.ok_or_else(|| {
            Error::Protocol(
                "paging chain ended without an empty page or the time boundary".into(),
            )
        })
    }
}

impl Default for CompletionGate {
    fn default() -> Self {
        Self::new()
    }
}
