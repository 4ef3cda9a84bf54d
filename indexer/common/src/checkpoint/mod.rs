//! Checkpoint stores and the lease that makes one indexer the only writer.
mod common;
mod fs;
mod memory;

pub use self::common::{unix_now, CheckpointRecord, CheckpointStore, Lease};
pub use self::fs::DirCheckpoint;
pub use self::memory::InMemoryCheckpoint;

use std::time::Duration;

use error_stack::Result;
use escrow_core::Address;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    configuration::{CheckpointOptions, LeaseConfiguration},
    metrics::{contract_attributes, IndexerMetrics},
    IndexerError,
};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Checkpoint store factory.
pub struct Checkpoint {
    options: CheckpointOptions,
}

impl Checkpoint {
    pub fn new_from_options(options: CheckpointOptions) -> Self {
        Self { options }
    }

    /// Returns the directory store, if a directory is configured.
    ///
    /// Backends that keep the checkpoint next to the projection are used otherwise.
    pub fn connect(&self) -> Result<Option<Box<dyn CheckpointStore>>, IndexerError> {
        let Some(dir_path) = &self.options.checkpoint_dir else {
            return Ok(None);
        };

        let checkpoint = DirCheckpoint::initialize(dir_path)?;
        Ok(Some(Box::new(checkpoint)))
    }
}

/// Owns the checkpoint of one contract on behalf of one lease owner.
pub struct CheckpointManager<S: CheckpointStore> {
    store: S,
    contract: Address,
    lease: LeaseConfiguration,
    metrics: IndexerMetrics,
}

impl<S: CheckpointStore> CheckpointManager<S> {
    pub fn new(store: S, contract: Address, lease: LeaseConfiguration) -> Self {
        Self {
            store,
            contract,
            lease,
            metrics: IndexerMetrics::default(),
        }
    }

    /// Waits for the lease, for at most one lease duration.
    ///
    /// Returns `false` if cancelled while waiting.
    pub async fn acquire(&mut self, ct: &CancellationToken) -> Result<bool, IndexerError> {
        info!(owner = %self.lease.owner, contract = %self.contract, "acquiring checkpoint lease");

        let deadline = tokio::time::Instant::now() + self.lease.ttl;
        loop {
            if self
                .store
                .lock(&self.contract, &self.lease.owner, self.lease.ttl)
                .await?
            {
                info!("checkpoint lease acquired");
                return Ok(true);
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(IndexerError::checkpoint(&format!(
                    "checkpoint of {} is leased by another indexer",
                    self.contract
                )));
            }

            tokio::select! {
                _ = tokio::time::sleep(LOCK_RETRY_INTERVAL) => {},
                _ = ct.cancelled() => {
                    return Ok(false);
                }
            }
        }
    }

    /// Extends the lease. Fails if another indexer took it over.
    pub async fn renew(&mut self) -> Result<(), IndexerError> {
        let renewed = self
            .store
            .lock(&self.contract, &self.lease.owner, self.lease.ttl)
            .await?;

        if !renewed {
            warn!(owner = %self.lease.owner, "checkpoint lease lost");
            return Err(IndexerError::checkpoint(
                "checkpoint lease was taken over by another indexer",
            ));
        }

        Ok(())
    }

    pub async fn release(&mut self) -> Result<(), IndexerError> {
        self.store.unlock(&self.contract, &self.lease.owner).await
    }

    pub async fn get(&mut self) -> Result<u64, IndexerError> {
        let height = self.store.get(&self.contract).await?;
        self.metrics
            .checkpoint
            .record(height, &contract_attributes(&self.contract));
        Ok(height)
    }

    /// Advances the checkpoint after a window committed.
    pub async fn commit(&mut self, height: u64) -> Result<(), IndexerError> {
        self.store.set(&self.contract, height).await?;
        self.metrics
            .checkpoint
            .record(height, &contract_attributes(&self.contract));
        Ok(())
    }

    pub async fn reset(&mut self, height: u64) -> Result<(), IndexerError> {
        warn!(contract = %self.contract, height, "resetting checkpoint");
        self.store.reset(&self.contract, height).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use escrow_core::Address;
    use tempdir::TempDir;
    use tokio_util::sync::CancellationToken;

    use super::{Checkpoint, CheckpointManager, CheckpointStore, InMemoryCheckpoint};
    use crate::{
        configuration::{CheckpointOptions, LeaseConfiguration},
        IndexerError,
    };

    fn lease(owner: &str, ttl: u64) -> LeaseConfiguration {
        LeaseConfiguration {
            owner: owner.to_string(),
            ttl: Duration::from_secs(ttl),
        }
    }

    #[tokio::test]
    pub async fn test_second_writer_is_rejected() {
        let contract = Address::from_low_u64_be(1);
        let store = InMemoryCheckpoint::default();
        let ct = CancellationToken::new();

        let mut first = CheckpointManager::new(store.clone(), contract.clone(), lease("a", 60));
        assert!(first.acquire(&ct).await.unwrap());

        let mut impatient = CheckpointManager::new(store.clone(), contract.clone(), lease("c", 1));
        let err = impatient.acquire(&ct).await.unwrap_err();
        assert_matches!(err.current_context(), IndexerError::Checkpoint);

        let mut second = CheckpointManager::new(store.clone(), contract.clone(), lease("b", 60));
        assert!(second.renew().await.is_err());

        first.release().await.unwrap();
        assert!(second.acquire(&ct).await.unwrap());
        assert!(first.renew().await.is_err());
    }

    #[tokio::test]
    pub async fn test_acquire_is_cancellable() {
        let contract = Address::from_low_u64_be(1);
        let store = InMemoryCheckpoint::default();
        let ct = CancellationToken::new();

        let mut first = CheckpointManager::new(store.clone(), contract.clone(), lease("a", 60));
        assert!(first.acquire(&ct).await.unwrap());

        let mut second = CheckpointManager::new(store, contract, lease("b", 60));
        ct.cancel();
        assert!(!second.acquire(&ct).await.unwrap());
    }

    #[tokio::test]
    pub async fn test_factory_uses_directory_when_configured() {
        let none = Checkpoint::new_from_options(CheckpointOptions::default())
            .connect()
            .unwrap();
        assert!(none.is_none());

        let dir = TempDir::new("checkpoint-factory").unwrap();
        let options = CheckpointOptions {
            checkpoint_dir: Some(dir.path().to_path_buf()),
            ..CheckpointOptions::default()
        };
        let contract = Address::from_low_u64_be(1);

        let mut store = Checkpoint::new_from_options(options.clone())
            .connect()
            .unwrap()
            .unwrap();
        store.set(&contract, 7).await.unwrap();

        let mut reopened = Checkpoint::new_from_options(options)
            .connect()
            .unwrap()
            .unwrap();
        assert_eq!(reopened.get(&contract).await.unwrap(), 7);
    }
}
