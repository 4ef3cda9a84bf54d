use std::ops::AddAssign;

use error_stack::Result;
use escrow_core::{decode_event, EventKind, RawEvent};
use tracing::warn;

use crate::{
    metrics::{event_attributes, IndexerMetrics},
    projection::{ApplyOutcome, ProjectionStore},
    IndexerError,
};

/// What happened to a raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    Duplicate,
    Orphan,
    /// The event could not be decoded and was skipped.
    DecodeFailed,
}

impl From<ApplyOutcome> for DispatchOutcome {
    fn from(outcome: ApplyOutcome) -> Self {
        match outcome {
            ApplyOutcome::Applied => DispatchOutcome::Applied,
            ApplyOutcome::Duplicate => DispatchOutcome::Duplicate,
            ApplyOutcome::Orphan => DispatchOutcome::Orphan,
        }
    }
}

/// Counts of dispatch outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    pub seen: u64,
    pub applied: u64,
    pub duplicates: u64,
    pub orphans: u64,
    pub decode_failures: u64,
}

impl DispatchCounts {
    pub fn record(&mut self, outcome: DispatchOutcome) {
        self.seen += 1;
        match outcome {
            DispatchOutcome::Applied => self.applied += 1,
            DispatchOutcome::Duplicate => self.duplicates += 1,
            DispatchOutcome::Orphan => self.orphans += 1,
            DispatchOutcome::DecodeFailed => self.decode_failures += 1,
        }
    }
}

impl AddAssign for DispatchCounts {
    fn add_assign(&mut self, other: Self) {
        self.seen += other.seen;
        self.applied += other.applied;
        self.duplicates += other.duplicates;
        self.orphans += other.orphans;
        self.decode_failures += other.decode_failures;
    }
}

/// Decodes raw events and applies them to the projection.
///
/// Shared by the live loop and the backfill runner.
pub struct Dispatcher<S: ProjectionStore> {
    store: S,
    metrics: IndexerMetrics,
}

impl<S: ProjectionStore> Dispatcher<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            metrics: IndexerMetrics::default(),
        }
    }

    /// Decodes and applies one event.
    ///
    /// Decode failures are logged and skipped. Store errors are returned.
    pub async fn dispatch(&mut self, raw: &RawEvent) -> Result<DispatchOutcome, IndexerError> {
        let envelope = match decode_event(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    block = raw.block_number,
                    tx = %raw.transaction_hash,
                    log_index = raw.log_index,
                    event = %raw.event,
                    err = %err,
                    "failed to decode event"
                );
                let attributes = raw
                    .event
                    .parse::<EventKind>()
                    .map(|kind| event_attributes(kind).to_vec())
                    .unwrap_or_default();
                self.metrics.decode_failures.add(1, &attributes);
                return Ok(DispatchOutcome::DecodeFailed);
            }
        };

        let outcome = self.store.apply_event(&envelope).await?;

        let attributes = event_attributes(envelope.event.kind());
        match outcome {
            ApplyOutcome::Applied => self.metrics.events_applied.add(1, &attributes),
            ApplyOutcome::Duplicate => self.metrics.events_duplicate.add(1, &attributes),
            ApplyOutcome::Orphan => self.metrics.events_orphan.add(1, &attributes),
        }

        Ok(outcome.into())
    }
}
