use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use error_stack::Result;
use escrow_core::Address;
use tokio::sync::Mutex;

use crate::IndexerError;

use super::common::{unix_now, CheckpointRecord, CheckpointStore};

/// A [CheckpointStore] that keeps checkpoints in memory.
///
/// Clones share the same checkpoints.
#[derive(Clone, Default)]
pub struct InMemoryCheckpoint {
    records: Arc<Mutex<HashMap<Address, CheckpointRecord>>>,
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpoint {
    async fn get(&mut self, contract: &Address) -> Result<u64, IndexerError> {
        let mut records = self.records.lock().await;
        let record = records.entry(contract.clone()).or_default();
        Ok(record.last_processed_block)
    }

    async fn set(&mut self, contract: &Address, height: u64) -> Result<(), IndexerError> {
        let mut records = self.records.lock().await;
        records.entry(contract.clone()).or_default().advance(height);
        Ok(())
    }

    async fn reset(&mut self, contract: &Address, height: u64) -> Result<(), IndexerError> {
        let mut records = self.records.lock().await;
        records.entry(contract.clone()).or_default().last_processed_block = height;
        Ok(())
    }

    async fn lock(
        &mut self,
        contract: &Address,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, IndexerError> {
        let mut records = self.records.lock().await;
        let record = records.entry(contract.clone()).or_default();
        Ok(record.try_lease(owner, ttl, unix_now()))
    }

    async fn unlock(&mut self, contract: &Address, owner: &str) -> Result<(), IndexerError> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(contract) {
            record.release(owner);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use escrow_core::Address;

    use super::InMemoryCheckpoint;
    use crate::checkpoint::CheckpointStore;

    #[tokio::test]
    pub async fn test_get_set_reset() {
        let contract = Address::from_low_u64_be(1);
        let mut checkpoint = InMemoryCheckpoint::default();

        assert_eq!(checkpoint.get(&contract).await.unwrap(), 0);
        checkpoint.set(&contract, 10).await.unwrap();
        checkpoint.set(&contract, 5).await.unwrap();
        assert_eq!(checkpoint.get(&contract).await.unwrap(), 10);

        checkpoint.reset(&contract, 3).await.unwrap();
        assert_eq!(checkpoint.get(&contract).await.unwrap(), 3);
    }

    #[tokio::test]
    pub async fn test_clones_share_lease() {
        let contract = Address::from_low_u64_be(1);
        let ttl = Duration::from_secs(60);
        let mut first = InMemoryCheckpoint::default();
        let mut second = first.clone();

        assert!(first.lock(&contract, "first", ttl).await.unwrap());
        assert!(!second.lock(&contract, "second", ttl).await.unwrap());

        first.unlock(&contract, "first").await.unwrap();
        assert!(second.lock(&contract, "second", ttl).await.unwrap());
    }
}
