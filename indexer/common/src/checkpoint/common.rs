use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use error_stack::Result;
use escrow_core::Address;
use serde::{Deserialize, Serialize};

use crate::IndexerError;

/// Stores the last fully processed block of each contract.
#[async_trait]
pub trait CheckpointStore: Send {
    /// Returns the last processed block, creating the checkpoint at 0 if missing.
    async fn get(&mut self, contract: &Address) -> Result<u64, IndexerError>;

    /// Advances the checkpoint. Lower heights are ignored.
    async fn set(&mut self, contract: &Address, height: u64) -> Result<(), IndexerError>;

    /// Moves the checkpoint to `height`, even backwards.
    async fn reset(&mut self, contract: &Address, height: u64) -> Result<(), IndexerError>;

    /// Acquires or renews the lease on the checkpoint.
    ///
    /// Returns `false` if another owner holds an unexpired lease.
    async fn lock(
        &mut self,
        contract: &Address,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, IndexerError>;

    /// Releases the lease, if held by `owner`.
    async fn unlock(&mut self, contract: &Address, owner: &str) -> Result<(), IndexerError>;
}

/// A checkpoint together with its lease.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub last_processed_block: u64,
    pub lease: Option<Lease>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub owner: String,
    /// Unix timestamp, in seconds.
    pub expires_at: u64,
}

impl CheckpointRecord {
    pub fn advance(&mut self, height: u64) {
        self.last_processed_block = self.last_processed_block.max(height);
    }

    /// Takes the lease for `owner` unless someone else holds it.
    pub fn try_lease(&mut self, owner: &str, ttl: Duration, now: u64) -> bool {
        if let Some(lease) = &self.lease {
            if lease.owner != owner && lease.expires_at > now {
                return false;
            }
        }

        self.lease = Some(Lease {
            owner: owner.to_string(),
            expires_at: now + ttl.as_secs(),
        });

        true
    }

    pub fn release(&mut self, owner: &str) {
        if self
            .lease
            .as_ref()
            .map(|lease| lease.owner == owner)
            .unwrap_or(false)
        {
            self.lease = None;
        }
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[async_trait]
impl<S> CheckpointStore for Box<S>
where
    S: CheckpointStore + ?Sized + Send,
{
    async fn get(&mut self, contract: &Address) -> Result<u64, IndexerError> {
        (**self).get(contract).await
    }

    async fn set(&mut self, contract: &Address, height: u64) -> Result<(), IndexerError> {
        (**self).set(contract, height).await
    }

    async fn reset(&mut self, contract: &Address, height: u64) -> Result<(), IndexerError> {
        (**self).reset(contract, height).await
    }

    async fn lock(
        &mut self,
        contract: &Address,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, IndexerError> {
        (**self).lock(contract, owner, ttl).await
    }

    async fn unlock(&mut self, contract: &Address, owner: &str) -> Result<(), IndexerError> {
        (**self).unlock(contract, owner).await
    }
}
