use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Result;
use escrow_core::{Address, EventKind, RawEvent};
use escrow_ledger::LocalChain;
use tokio::sync::Mutex;

use crate::{IndexerError, IndexerErrorResultExt};

use super::LedgerClient;

/// Reads events from an in-process [LocalChain].
#[derive(Clone)]
pub struct LocalLedgerClient {
    chain: Arc<Mutex<LocalChain>>,
}

impl LocalLedgerClient {
    pub fn new(chain: Arc<Mutex<LocalChain>>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl LedgerClient for LocalLedgerClient {
    async fn head(&self) -> Result<u64, IndexerError> {
        Ok(self.chain.lock().await.head())
    }

    async fn events(
        &self,
        contract: &Address,
        from_block: u64,
        to_block: u64,
        kinds: &[EventKind],
    ) -> Result<Vec<RawEvent>, IndexerError> {
        let chain = self.chain.lock().await;
        if chain.address() != contract {
            return Ok(Vec::new());
        }

        chain
            .events(from_block, to_block, kinds)
            .iter()
            .map(|envelope| envelope.to_raw().fatal("failed to encode local event"))
            .collect()
    }
}
