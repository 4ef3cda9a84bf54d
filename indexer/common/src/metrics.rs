use escrow_core::{Address, EventKind};
use escrow_observability::{Counter, Gauge, Histogram, KeyValue};

#[derive(Debug, Clone)]
pub struct IndexerMetrics {
    pub events_applied: Counter<u64>,
    pub events_duplicate: Counter<u64>,
    pub events_orphan: Counter<u64>,
    pub decode_failures: Counter<u64>,
    pub fetch_retries: Counter<u64>,
    pub checkpoint: Gauge<u64>,
    pub head: Gauge<u64>,
    pub window_duration: Histogram<f64>,
}

impl Default for IndexerMetrics {
    fn default() -> Self {
        let meter = escrow_observability::meter("escrow_indexer");

        Self {
            events_applied: meter
                .u64_counter("escrow.indexer.events.applied")
                .with_description("events applied to the projection")
                .build(),
            events_duplicate: meter
                .u64_counter("escrow.indexer.events.duplicate")
                .with_description("events already present in the projection")
                .build(),
            events_orphan: meter
                .u64_counter("escrow.indexer.events.orphan")
                .with_description("events skipped because their parent is not projected")
                .build(),
            decode_failures: meter
                .u64_counter("escrow.indexer.events.decode_failure")
                .with_description("raw events that failed to decode")
                .build(),
            fetch_retries: meter
                .u64_counter("escrow.indexer.fetch.retries")
                .with_description("ledger requests retried after an error")
                .build(),
            checkpoint: meter
                .u64_gauge("escrow.indexer.checkpoint")
                .with_description("last fully processed block")
                .with_unit("{block}")
                .build(),
            head: meter
                .u64_gauge("escrow.indexer.head")
                .with_description("ledger head block")
                .with_unit("{block}")
                .build(),
            window_duration: meter
                .f64_histogram("escrow.indexer.window.duration")
                .with_description("time to fetch and apply a window of blocks")
                .with_unit("s")
                .with_boundaries(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
                ])
                .build(),
        }
    }
}

pub fn event_attributes(kind: EventKind) -> [KeyValue; 1] {
    [KeyValue::new("event", kind.as_str())]
}

pub fn contract_attributes(contract: &Address) -> [KeyValue; 1] {
    [KeyValue::new("contract", contract.to_string())]
}
