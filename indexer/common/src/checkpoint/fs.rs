//! Persist checkpoints to a directory.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use error_stack::Result;
use escrow_core::Address;
use tracing::info;

use crate::{IndexerError, IndexerErrorResultExt};

use super::common::{unix_now, CheckpointRecord, CheckpointStore};

/// Stores one JSON file per contract.
pub struct DirCheckpoint {
    path: PathBuf,
}

impl DirCheckpoint {
    pub fn initialize(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref();

        fs::create_dir_all(path)
            .checkpoint(&format!("failed to create directory {:?}", path))?;

        info!(path = ?path, "checkpoint in a directory is not recommended for production usage");
        Ok(Self { path: path.into() })
    }

    pub fn checkpoint_file_path(&self, contract: &Address) -> PathBuf {
        self.path.join(format!("{}.checkpoint", contract))
    }

    fn read(&self, contract: &Address) -> Result<CheckpointRecord, IndexerError> {
        let path = self.checkpoint_file_path(contract);
        if !path.exists() {
            return Ok(CheckpointRecord::default());
        }

        let content = fs::read_to_string(&path)
            .checkpoint(&format!("failed to read checkpoint file {:?}", path))?;
        serde_json::from_str(&content).checkpoint("failed to deserialize checkpoint")
    }

    fn write(&self, contract: &Address, record: &CheckpointRecord) -> Result<(), IndexerError> {
        let serialized =
            serde_json::to_string(record).checkpoint("failed to serialize checkpoint")?;
        let path = self.checkpoint_file_path(contract);
        fs::write(&path, serialized)
            .checkpoint(&format!("failed to write checkpoint file {:?}", path))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for DirCheckpoint {
    async fn get(&mut self, contract: &Address) -> Result<u64, IndexerError> {
        let path = self.checkpoint_file_path(contract);
        let record = self.read(contract)?;
        if !path.exists() {
            self.write(contract, &record)?;
        }
        Ok(record.last_processed_block)
    }

    async fn set(&mut self, contract: &Address, height: u64) -> Result<(), IndexerError> {
        let mut record = self.read(contract)?;
        record.advance(height);
        self.write(contract, &record)
    }

    async fn reset(&mut self, contract: &Address, height: u64) -> Result<(), IndexerError> {
        let mut record = self.read(contract)?;
        record.last_processed_block = height;
        self.write(contract, &record)
    }

    async fn lock(
        &mut self,
        contract: &Address,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, IndexerError> {
        let mut record = self.read(contract)?;
        if !record.try_lease(owner, ttl, unix_now()) {
            return Ok(false);
        }
        self.write(contract, &record)?;
        Ok(true)
    }

    async fn unlock(&mut self, contract: &Address, owner: &str) -> Result<(), IndexerError> {
        let mut record = self.read(contract)?;
        record.release(owner);
        self.write(contract, &record)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use escrow_core::Address;
    use tempdir::TempDir;

    use super::DirCheckpoint;
    use crate::checkpoint::CheckpointStore;

    #[tokio::test]
    pub async fn test_get_set_reset_checkpoint() {
        let dir = TempDir::new("fs-checkpoint").unwrap();
        let contract = Address::from_low_u64_be(1);
        let mut checkpoint = DirCheckpoint::initialize(dir.path()).unwrap();

        assert_eq!(checkpoint.get(&contract).await.unwrap(), 0);
        assert!(checkpoint.checkpoint_file_path(&contract).exists());

        checkpoint.set(&contract, 42).await.unwrap();
        checkpoint.set(&contract, 7).await.unwrap();
        assert_eq!(checkpoint.get(&contract).await.unwrap(), 42);

        checkpoint.reset(&contract, 7).await.unwrap();
        assert_eq!(checkpoint.get(&contract).await.unwrap(), 7);
    }

    #[tokio::test]
    pub async fn test_lease_is_persisted() {
        let dir = TempDir::new("fs-checkpoint").unwrap();
        let contract = Address::from_low_u64_be(1);
        let ttl = Duration::from_secs(60);
        let mut first = DirCheckpoint::initialize(dir.path()).unwrap();
        let mut second = DirCheckpoint::initialize(dir.path()).unwrap();

        assert!(first.lock(&contract, "first", ttl).await.unwrap());
        assert!(!second.lock(&contract, "second", ttl).await.unwrap());

        first.unlock(&contract, "first").await.unwrap();
        assert!(second.lock(&contract, "second", ttl).await.unwrap());
    }

    #[tokio::test]
    pub async fn test_multiple_contracts() {
        let dir = TempDir::new("fs-checkpoint").unwrap();
        let first = Address::from_low_u64_be(1);
        let second = Address::from_low_u64_be(2);
        let mut checkpoint = DirCheckpoint::initialize(dir.path()).unwrap();

        checkpoint.set(&first, 10).await.unwrap();
        assert_eq!(checkpoint.get(&second).await.unwrap(), 0);
        checkpoint.set(&second, 20).await.unwrap();
        assert_eq!(checkpoint.get(&first).await.unwrap(), 10);
    }
}
