use std::future::Future;

use error_stack::{Report, Result};
use escrow_core::{Address, EventKind, RawEvent};
use exponential_backoff::Backoff;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{metrics::IndexerMetrics, IndexerError};

use super::LedgerClient;

/// Retries ledger requests with exponential backoff.
///
/// Requests return `Ok(None)` when cancelled while waiting for a retry.
pub struct RetryingLedgerClient<C: LedgerClient> {
    inner: C,
    backoff: Backoff,
    metrics: IndexerMetrics,
}

impl<C: LedgerClient> RetryingLedgerClient<C> {
    pub fn new(inner: C, backoff: Backoff) -> Self {
        Self {
            inner,
            backoff,
            metrics: IndexerMetrics::default(),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub async fn head(&self, ct: &CancellationToken) -> Result<Option<u64>, IndexerError> {
        self.with_retry("ledger_headHeight", ct, || self.inner.head()).await
    }

    pub async fn events(
        &self,
        contract: &Address,
        from_block: u64,
        to_block: u64,
        kinds: &[EventKind],
        ct: &CancellationToken,
    ) -> Result<Option<Vec<RawEvent>>, IndexerError> {
        self.with_retry("ledger_getEvents", ct, || {
            self.inner.events(contract, from_block, to_block, kinds)
        })
        .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        method: &str,
        ct: &CancellationToken,
        request: F,
    ) -> Result<Option<T>, IndexerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut last_error: Option<Report<IndexerError>> = None;

        for (attempt, duration) in (&self.backoff).into_iter().enumerate() {
            match request().await {
                Ok(value) => return Ok(Some(value)),
                Err(err) => {
                    warn!(
                        method,
                        attempt = attempt + 1,
                        delay = ?duration,
                        err = ?err,
                        "ledger request failed, retrying"
                    );
                    self.metrics.fetch_retries.add(1, &[]);
                    last_error = Some(err);

                    if ct.is_cancelled() {
                        return Ok(None);
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {},
                        _ = ct.cancelled() => {
                            return Ok(None);
                        }
                    };
                }
            }
        }

        let err = match last_error {
            Some(err) => err.change_context(IndexerError::Fetch),
            None => Report::new(IndexerError::Fetch),
        };

        Err(err.attach_printable(format!("{method} failed after retry")))
    }
}
