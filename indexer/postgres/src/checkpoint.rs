use std::time::Duration;

use async_trait::async_trait;
use error_stack::Result;
use escrow_core::Address;
use escrow_indexer_common::{checkpoint::CheckpointStore, IndexerError, IndexerErrorResultExt};
use tokio_postgres::Client;
use tracing::debug;

use crate::projection::to_i64;

/// Checkpoints stored in the `checkpoint` table, next to the projection.
///
/// The lease is a pair of columns updated with a single conditional upsert, so
/// only one owner can hold it at any time.
pub struct PostgresCheckpoint {
    client: Client,
}

impl PostgresCheckpoint {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpoint {
    async fn get(&mut self, contract: &Address) -> Result<u64, IndexerError> {
        self.client
            .execute(
                "INSERT INTO checkpoint (contract_address) VALUES ($1)
                ON CONFLICT (contract_address) DO NOTHING",
                &[&contract.as_str()],
            )
            .await
            .checkpoint("failed to create checkpoint")?;

        let row = self
            .client
            .query_one(
                "SELECT last_processed_block FROM checkpoint WHERE contract_address = $1",
                &[&contract.as_str()],
            )
            .await
            .checkpoint("failed to read checkpoint")?;

        let height: i64 = row
            .try_get("last_processed_block")
            .checkpoint("failed to read checkpoint height")?;
        u64::try_from(height).checkpoint("negative checkpoint height")
    }

    async fn set(&mut self, contract: &Address, height: u64) -> Result<(), IndexerError> {
        debug!(contract = %contract, height, "storing checkpoint");
        self.client
            .execute(
                "INSERT INTO checkpoint (contract_address, last_processed_block) VALUES ($1, $2)
                ON CONFLICT (contract_address) DO UPDATE
                SET last_processed_block = GREATEST(checkpoint.last_processed_block, EXCLUDED.last_processed_block),
                    updated_at = now()",
                &[&contract.as_str(), &to_i64(height)?],
            )
            .await
            .checkpoint("failed to store checkpoint")?;
        Ok(())
    }

    async fn reset(&mut self, contract: &Address, height: u64) -> Result<(), IndexerError> {
        self.client
            .execute(
                "INSERT INTO checkpoint (contract_address, last_processed_block) VALUES ($1, $2)
                ON CONFLICT (contract_address) DO UPDATE
                SET last_processed_block = EXCLUDED.last_processed_block, updated_at = now()",
                &[&contract.as_str(), &to_i64(height)?],
            )
            .await
            .checkpoint("failed to reset checkpoint")?;
        Ok(())
    }

    async fn lock(
        &mut self,
        contract: &Address,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, IndexerError> {
        let locked = self
            .client
            .execute(
                "INSERT INTO checkpoint (contract_address, lease_owner, lease_expires_at)
                VALUES ($1, $2, now() + make_interval(secs => $3))
                ON CONFLICT (contract_address) DO UPDATE
                SET lease_owner = EXCLUDED.lease_owner,
                    lease_expires_at = EXCLUDED.lease_expires_at,
                    updated_at = now()
                WHERE checkpoint.lease_owner IS NULL
                    OR checkpoint.lease_owner = EXCLUDED.lease_owner
                    OR checkpoint.lease_expires_at < now()",
                &[&contract.as_str(), &owner, &ttl.as_secs_f64()],
            )
            .await
            .checkpoint("failed to lock checkpoint")?;
        Ok(locked == 1)
    }

    async fn unlock(&mut self, contract: &Address, owner: &str) -> Result<(), IndexerError> {
        self.client
            .execute(
                "UPDATE checkpoint SET lease_owner = NULL, lease_expires_at = NULL, updated_at = now()
                WHERE contract_address = $1 AND lease_owner = $2",
                &[&contract.as_str(), &owner],
            )
            .await
            .checkpoint("failed to unlock checkpoint")?;
        Ok(())
    }
}
