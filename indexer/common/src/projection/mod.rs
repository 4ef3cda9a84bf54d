//! The relational projection of the ledger and the handlers that write it.
mod handlers;
mod memory;
mod model;

use async_trait::async_trait;
use error_stack::Result;
use escrow_core::{Address, EventEnvelope, MilestoneId, PledgeStatus, ProjectId, TxHash};

use crate::IndexerError;

pub use self::handlers::apply_event;
pub use self::memory::InMemoryProjection;
pub use self::model::{
    AccountRow, MilestoneRow, PledgeRow, ProjectRow, ProjectionSnapshot, RefundRow, ReleaseRow,
    VoteRow,
};

/// What applying an event did to the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event changed the projection.
    Applied,
    /// The event was already applied.
    Duplicate,
    /// The event references rows that are not projected yet.
    Orphan,
}

/// Reads and writes of the projection inside one transaction.
///
/// Insert methods return `false` when a row with the same primary key exists.
#[async_trait]
pub trait ProjectionTx: Send {
    async fn get_account(&mut self, address: &Address) -> Result<Option<AccountRow>, IndexerError>;
    async fn put_account(&mut self, row: &AccountRow) -> Result<(), IndexerError>;

    async fn get_project(
        &mut self,
        project_id: ProjectId,
    ) -> Result<Option<ProjectRow>, IndexerError>;
    async fn insert_project(&mut self, row: &ProjectRow) -> Result<bool, IndexerError>;
    async fn update_project(&mut self, row: &ProjectRow) -> Result<(), IndexerError>;

    async fn get_milestone(
        &mut self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<Option<MilestoneRow>, IndexerError>;
    async fn insert_milestone(&mut self, row: &MilestoneRow) -> Result<bool, IndexerError>;
    async fn update_milestone(&mut self, row: &MilestoneRow) -> Result<(), IndexerError>;

    async fn pledge_exists(&mut self, tx_hash: &TxHash) -> Result<bool, IndexerError>;
    async fn insert_pledge(&mut self, row: &PledgeRow) -> Result<bool, IndexerError>;
    async fn active_pledges(
        &mut self,
        project_id: ProjectId,
        backer: &Address,
    ) -> Result<Vec<PledgeRow>, IndexerError>;
    async fn set_pledge_status(
        &mut self,
        tx_hash: &TxHash,
        status: PledgeStatus,
    ) -> Result<(), IndexerError>;

    async fn get_vote(
        &mut self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
        backer: &Address,
    ) -> Result<Option<VoteRow>, IndexerError>;
    async fn insert_vote(&mut self, row: &VoteRow) -> Result<bool, IndexerError>;

    async fn release_exists(&mut self, tx_hash: &TxHash) -> Result<bool, IndexerError>;
    async fn milestone_release(
        &mut self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<Option<ReleaseRow>, IndexerError>;
    async fn insert_release(&mut self, row: &ReleaseRow) -> Result<bool, IndexerError>;

    async fn refund_exists(&mut self, tx_hash: &TxHash) -> Result<bool, IndexerError>;
    async fn insert_refund(&mut self, row: &RefundRow) -> Result<bool, IndexerError>;
}

/// A store of the projection.
///
/// Each call to `apply_event` is atomic: either all of the event's writes are
/// visible afterwards, or none is.
#[async_trait]
pub trait ProjectionStore: Send {
    async fn apply_event(
        &mut self,
        envelope: &EventEnvelope,
    ) -> Result<ApplyOutcome, IndexerError>;

    /// Reads the whole projection.
    async fn snapshot(&mut self) -> Result<ProjectionSnapshot, IndexerError>;

    /// Deletes every row of the projection.
    async fn truncate(&mut self) -> Result<(), IndexerError>;
}

#[async_trait]
impl<S> ProjectionStore for Box<S>
where
    S: ProjectionStore + ?Sized + Send,
{
    async fn apply_event(
        &mut self,
        envelope: &EventEnvelope,
    ) -> Result<ApplyOutcome, IndexerError> {
        (**self).apply_event(envelope).await
    }

    async fn snapshot(&mut self) -> Result<ProjectionSnapshot, IndexerError> {
        (**self).snapshot().await
    }

    async fn truncate(&mut self) -> Result<(), IndexerError> {
        (**self).truncate().await
    }
}
