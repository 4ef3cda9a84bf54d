//! Clients to read events from the ledger.
mod local;
mod retry;
mod rpc;

use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Result;
use escrow_core::{Address, EventKind, RawEvent};

use crate::IndexerError;

pub use self::local::LocalLedgerClient;
pub use self::retry::RetryingLedgerClient;
pub use self::rpc::JsonRpcLedgerClient;

/// Read access to the ledger's event log.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Returns the latest block height.
    async fn head(&self) -> Result<u64, IndexerError>;

    /// Returns the events emitted by `contract` in blocks `from_block..=to_block`,
    /// ordered by block and log index.
    ///
    /// An empty `kinds` returns events of all kinds.
    async fn events(
        &self,
        contract: &Address,
        from_block: u64,
        to_block: u64,
        kinds: &[EventKind],
    ) -> Result<Vec<RawEvent>, IndexerError>;
}

#[async_trait]
impl<C> LedgerClient for Arc<C>
where
    C: LedgerClient + ?Sized,
{
    async fn head(&self) -> Result<u64, IndexerError> {
        (**self).head().await
    }

    async fn events(
        &self,
        contract: &Address,
        from_block: u64,
        to_block: u64,
        kinds: &[EventKind],
    ) -> Result<Vec<RawEvent>, IndexerError> {
        (**self).events(contract, from_block, to_block, kinds).await
    }
}

#[async_trait]
impl<C> LedgerClient for Box<C>
where
    C: LedgerClient + ?Sized,
{
    async fn head(&self) -> Result<u64, IndexerError> {
        (**self).head().await
    }

    async fn events(
        &self,
        contract: &Address,
        from_block: u64,
        to_block: u64,
        kinds: &[EventKind],
    ) -> Result<Vec<RawEvent>, IndexerError> {
        (**self).events(contract, from_block, to_block, kinds).await
    }
}
