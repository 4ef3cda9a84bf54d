use std::collections::BTreeMap;

use error_stack::Result;
use escrow_core::EventKind;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::{
    checkpoint::{CheckpointManager, CheckpointStore},
    client::{LedgerClient, RetryingLedgerClient},
    configuration::BackfillConfiguration,
    projection::ProjectionStore,
    IndexerError,
};

use super::dispatch::{DispatchCounts, Dispatcher};

/// Result of a backfill run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    pub from_block: u64,
    pub to_block: u64,
    /// Outcomes for each event kind, in replay order.
    pub kinds: BTreeMap<EventKind, DispatchCounts>,
    /// Whether the checkpoint was moved to `to_block`.
    pub checkpoint_advanced: bool,
}

impl BackfillSummary {
    pub fn total(&self) -> DispatchCounts {
        let mut total = DispatchCounts::default();
        for counts in self.kinds.values() {
            total += *counts;
        }
        total
    }
}

/// Replays a range of blocks one event kind at a time.
///
/// Kinds are replayed parents first, so that every event finds the rows it
/// references.
pub struct Backfill<C, S, K>
where
    C: LedgerClient,
    S: ProjectionStore,
    K: CheckpointStore,
{
    client: RetryingLedgerClient<C>,
    dispatcher: Dispatcher<S>,
    checkpoint: CheckpointManager<K>,
    configuration: BackfillConfiguration,
}

impl<C, S, K> Backfill<C, S, K>
where
    C: LedgerClient,
    S: ProjectionStore,
    K: CheckpointStore,
{
    pub fn new(
        client: RetryingLedgerClient<C>,
        dispatcher: Dispatcher<S>,
        checkpoint: CheckpointManager<K>,
        configuration: BackfillConfiguration,
    ) -> Self {
        Self {
            client,
            dispatcher,
            checkpoint,
            configuration,
        }
    }

    /// Replays the configured range. Returns `None` if cancelled.
    pub async fn run(
        mut self,
        ct: CancellationToken,
    ) -> Result<Option<BackfillSummary>, IndexerError> {
        if !self.checkpoint.acquire(&ct).await? {
            return Ok(None);
        }

        let result = self.replay(&ct).await;
        let released = self.checkpoint.release().await;
        let summary = result?;
        released?;
        Ok(summary)
    }

    async fn replay(
        &mut self,
        ct: &CancellationToken,
    ) -> Result<Option<BackfillSummary>, IndexerError> {
        let from_block = self.configuration.from_block;
        let to_block = match self.configuration.to_block {
            Some(to_block) => to_block,
            None => {
                let Some(head) = self.client.head(ct).await? else {
                    return Ok(None);
                };
                head.saturating_sub(self.configuration.confirmation_depth)
            }
        };

        let mut summary = BackfillSummary {
            from_block,
            to_block,
            kinds: BTreeMap::new(),
            checkpoint_advanced: false,
        };

        if to_block < from_block {
            info!(from_block, to_block, "nothing to backfill");
            return Ok(Some(summary));
        }

        info!(
            contract = %self.configuration.contract,
            from_block,
            to_block,
            chunk_size = self.configuration.chunk_size,
            "starting backfill"
        );

        for kind in EventKind::ALL {
            let mut counts = DispatchCounts::default();
            let mut start = from_block;

            loop {
                let end = start
                    .saturating_add(self.configuration.chunk_size - 1)
                    .min(to_block);

                self.checkpoint.renew().await?;
                let Some(chunk) = self.replay_chunk(kind, start, end, ct).await? else {
                    return Ok(None);
                };
                counts += chunk;

                if end >= to_block {
                    break;
                }
                start = end + 1;
            }

            info!(
                event = %kind,
                seen = counts.seen,
                applied = counts.applied,
                duplicates = counts.duplicates,
                orphans = counts.orphans,
                decode_failures = counts.decode_failures,
                "replayed events"
            );
            summary.kinds.insert(kind, counts);
        }

        let checkpoint = self.checkpoint.get().await?;
        if from_block <= checkpoint.saturating_add(1) && to_block > checkpoint {
            self.checkpoint.commit(to_block).await?;
            summary.checkpoint_advanced = true;
            info!(checkpoint = to_block, "advanced checkpoint");
        } else {
            info!(checkpoint, "checkpoint not contiguous with backfill, left unchanged");
        }

        Ok(Some(summary))
    }

    #[instrument(skip(self, ct), err(Debug))]
    async fn replay_chunk(
        &mut self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
        ct: &CancellationToken,
    ) -> Result<Option<DispatchCounts>, IndexerError> {
        let Some(mut events) = self
            .client
            .events(&self.configuration.contract, from_block, to_block, &[kind], ct)
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

        Ok(Some(counts))
    }
}
