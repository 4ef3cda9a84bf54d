use std::time::Instant;

use error_stack::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    checkpoint::{CheckpointManager, CheckpointStore},
    client::{LedgerClient, RetryingLedgerClient},
    configuration::SyncConfiguration,
    metrics::{contract_attributes, IndexerMetrics},
    projection::ProjectionStore,
    IndexerError,
};

use super::dispatch::{DispatchCounts, Dispatcher};

/// Follows the ledger head and applies confirmed windows of blocks.
pub struct LiveSync<C, S, K>
where
    C: LedgerClient,
    S: ProjectionStore,
    K: CheckpointStore,
{
    client: RetryingLedgerClient<C>,
    dispatcher: Dispatcher<S>,
    checkpoint: CheckpointManager<K>,
    configuration: SyncConfiguration,
    metrics: IndexerMetrics,
}

impl<C, S, K> LiveSync<C, S, K>
where
    C: LedgerClient,
    S: ProjectionStore,
    K: CheckpointStore,
{
    pub fn new(
        client: RetryingLedgerClient<C>,
        dispatcher: Dispatcher<S>,
        checkpoint: CheckpointManager<K>,
        configuration: SyncConfiguration,
    ) -> Self {
        Self {
            client,
            dispatcher,
            checkpoint,
            configuration,
            metrics: IndexerMetrics::default(),
        }
    }

    /// Runs until cancelled, until the ending block is indexed, or until fetching
    /// fails after retrying.
    pub async fn run(mut self, ct: CancellationToken) -> Result<(), IndexerError> {
        if !self.checkpoint.acquire(&ct).await? {
            return Ok(());
        }

        info!(
            contract = %self.configuration.contract,
            confirmation_depth = self.configuration.confirmation_depth,
            chunk_size = self.configuration.chunk_size,
            poll_interval = ?self.configuration.poll_interval,
            ending_block = ?self.configuration.ending_block,
            "starting live sync"
        );

        let result = self.run_loop(&ct).await;
        let released = self.checkpoint.release().await;
        result?;
        released
    }

    async fn run_loop(&mut self, ct: &CancellationToken) -> Result<(), IndexerError> {
        loop {
            if ct.is_cancelled() {
                return Ok(());
            }

            self.checkpoint.renew().await?;
            let checkpoint = self.checkpoint.get().await?;

            if let Some(ending_block) = self.configuration.ending_block {
                if checkpoint >= ending_block {
                    info!(ending_block, "reached ending block");
                    return Ok(());
                }
            }

            let Some(head) = self.client.head(ct).await? else {
                return Ok(());
            };
            self.metrics
                .head
                .record(head, &contract_attributes(&self.configuration.contract));

            let mut safe = head.saturating_sub(self.configuration.confirmation_depth);
            if let Some(ending_block) = self.configuration.ending_block {
                safe = safe.min(ending_block);
            }

            if safe <= checkpoint {
                debug!(head, safe, checkpoint, "waiting for confirmed blocks");
                if self.wait(ct).await {
                    return Ok(());
                }
                continue;
            }

            let from_block = checkpoint + 1;
            let to_block = checkpoint.saturating_add(self.configuration.chunk_size).min(safe);

            let committed = match self.sync_window(from_block, to_block, ct).await {
                Ok(None) => return Ok(()),
                Ok(Some(counts)) => self.checkpoint.commit(to_block).await.map(|_| counts),
                Err(err) => Err(err),
            };

            match committed {
                Ok(counts) => {
                    info!(
                        from_block,
                        to_block,
                        head,
                        applied = counts.applied,
                        duplicates = counts.duplicates,
                        orphans = counts.orphans,
                        decode_failures = counts.decode_failures,
                        "indexed window"
                    );
                }
                Err(err) if matches!(err.current_context(), IndexerError::Fetch) => {
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        from_block,
                        to_block,
                        err = ?err,
                        "window failed, retrying from checkpoint"
                    );
                    if self.wait(ct).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Fetches and applies the events of blocks `from_block..=to_block`.
    ///
    /// Returns `None` if cancelled.
    #[instrument(skip(self, ct), err(Debug))]
    async fn sync_window(
        &mut self,
        from_block: u64,
        to_block: u64,
        ct: &CancellationToken,
    ) -> Result<Option<DispatchCounts>, IndexerError> {
        let started = Instant::now();

        let Some(mut events) = self
            .client
            .events(&self.configuration.contract, from_block, to_block, &[], ct)
            .await?
        else {
            return Ok(None);
        };
        events.sort_by_key(|event| (event.block_number, event.log_index));

        let mut counts = DispatchCounts::default();
        for event in &events {
            let outcome = self.dispatcher.dispatch(event).await?;
            counts.record(outcome);
        }

        self.metrics.window_duration.record(
            started.elapsed().as_secs_f64(),
            &contract_attributes(&self.configuration.contract),
        );

        Ok(Some(counts))
    }

    /// Sleeps for the poll interval. Returns `true` if cancelled.
    async fn wait(&self, ct: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.configuration.poll_interval) => false,
            _ = ct.cancelled() => true,
        }
    }
}
