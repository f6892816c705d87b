//! One-shot completion handle for a traceroute session

use crate::traceroute::{TraceResult, TracerouteError};
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

struct Outcome {
    result: TraceResult,
    error: Option<TracerouteError>,
}

struct Inner {
    outcome: OnceLock<Outcome>,
    notify: Notify,
}

/// Eventual outcome of a traceroute session
///
/// Cloning is cheap; every clone observes the same completion. Readers
/// that wait before completion are woken together once the session ends,
/// and readers that arrive afterwards return immediately.
#[derive(Clone)]
pub struct TraceFuture {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TraceFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceFuture")
            .field("done", &self.is_done())
            .finish()
    }
}

impl TraceFuture {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                outcome: OnceLock::new(),
                notify: Notify::new(),
            }),
        }
    }

    async fn outcome(&self) -> &Outcome {
        loop {
            // Register before checking so a completion in between is not missed
            let notified = self.inner.notify.notified();
            if let Some(outcome) = self.inner.outcome.get() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Wait for completion and return the aggregated result.
    ///
    /// The result is returned even when the session ended with an error;
    /// it then holds whatever was aggregated before the error.
    pub async fn result(&self) -> &TraceResult {
        &self.outcome().await.result
    }

    /// Wait for completion and return the terminal error, if any
    pub async fn error(&self) -> Option<&TracerouteError> {
        self.outcome().await.error.as_ref()
    }

    /// Wait for completion and return both result and error
    pub async fn wait(&self) -> (&TraceResult, Option<&TracerouteError>) {
        let outcome = self.outcome().await;
        (&outcome.result, outcome.error.as_ref())
    }

    /// The result if the session already completed
    pub fn try_result(&self) -> Option<&TraceResult> {
        self.inner.outcome.get().map(|o| &o.result)
    }

    /// Whether the session has completed
    pub fn is_done(&self) -> bool {
        self.inner.outcome.get().is_some()
    }

    /// Whether two handles refer to the same session
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Complete the future and wake every waiter.
    ///
    /// Only the first call has effect; later calls are ignored and return
    /// `false`.
    pub(crate) fn complete(&self, result: TraceResult, error: Option<TracerouteError>) -> bool {
        if self.inner.outcome.set(Outcome { result, error }).is_err() {
            return false;
        }
        self.inner.notify.notify_waiters();
        true
    }
}
