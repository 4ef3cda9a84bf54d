use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use error_stack::Result;
use escrow_core::{Address, EventEnvelope, MilestoneId, PledgeStatus, ProjectId, TxHash};
use tokio::sync::Mutex;

use crate::IndexerError;

use super::{
    handlers::apply_event, AccountRow, ApplyOutcome, MilestoneRow, PledgeRow, ProjectRow,
    ProjectionSnapshot, ProjectionStore, ProjectionTx, RefundRow, ReleaseRow, VoteRow,
};

#[derive(Debug, Clone, Default)]
struct ProjectionState {
    accounts: BTreeMap<Address, AccountRow>,
    projects: BTreeMap<ProjectId, ProjectRow>,
    milestones: BTreeMap<(ProjectId, MilestoneId), MilestoneRow>,
    pledges: BTreeMap<TxHash, PledgeRow>,
    votes: BTreeMap<(ProjectId, MilestoneId, Address), VoteRow>,
    releases: BTreeMap<TxHash, ReleaseRow>,
    refunds: BTreeMap<(TxHash, TxHash), RefundRow>,
}

/// A projection kept in memory.
///
/// Each event is applied to a copy of the state that replaces it only if every
/// write succeeded. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProjection {
    state: Arc<Mutex<ProjectionState>>,
}

impl InMemoryProjection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectionStore for InMemoryProjection {
    async fn apply_event(
        &mut self,
        envelope: &EventEnvelope,
    ) -> Result<ApplyOutcome, IndexerError> {
        let mut state = self.state.lock().await;
        let mut tx = state.clone();
        let outcome = apply_event(&mut tx, envelope).await?;
        *state = tx;
        Ok(outcome)
    }

    async fn snapshot(&mut self) -> Result<ProjectionSnapshot, IndexerError> {
        let state = self.state.lock().await;
        let snapshot = ProjectionSnapshot {
            accounts: state.accounts.values().cloned().collect(),
            projects: state.projects.values().cloned().collect(),
            milestones: state.milestones.values().cloned().collect(),
            pledges: state.pledges.values().cloned().collect(),
            votes: state.votes.values().cloned().collect(),
            releases: state.releases.values().cloned().collect(),
            refunds: state.refunds.values().cloned().collect(),
        };
        Ok(snapshot.normalize())
    }

    async fn truncate(&mut self) -> Result<(), IndexerError> {
        *self.state.lock().await = ProjectionState::default();
        Ok(())
    }
}

fn insert_new<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: V) -> bool {
    if map.contains_key(&key) {
        return false;
    }
    map.insert(key, value);
    true
}

#[async_trait]
impl ProjectionTx for ProjectionState {
    async fn get_account(&mut self, address: &Address) -> Result<Option<AccountRow>, IndexerError> {
        Ok(self.accounts.get(address).cloned())
    }

    async fn put_account(&mut self, row: &AccountRow) -> Result<(), IndexerError> {
        self.accounts.insert(row.address.clone(), row.clone());
        Ok(())
    }

    async fn get_project(
        &mut self,
        project_id: ProjectId,
    ) -> Result<Option<ProjectRow>, IndexerError> {
        Ok(self.projects.get(&project_id).cloned())
    }

    async fn insert_project(&mut self, row: &ProjectRow) -> Result<bool, IndexerError> {
        Ok(insert_new(&mut self.projects, row.project_id, row.clone()))
    }

    async fn update_project(&mut self, row: &ProjectRow) -> Result<(), IndexerError> {
        self.projects.insert(row.project_id, row.clone());
        Ok(())
    }

    async fn get_milestone(
        &mut self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<Option<MilestoneRow>, IndexerError> {
        Ok(self.milestones.get(&(project_id, milestone_id)).cloned())
    }

    async fn insert_milestone(&mut self, row: &MilestoneRow) -> Result<bool, IndexerError> {
        let key = (row.project_id, row.milestone_id);
        Ok(insert_new(&mut self.milestones, key, row.clone()))
    }

    async fn update_milestone(&mut self, row: &MilestoneRow) -> Result<(), IndexerError> {
        self.milestones
            .insert((row.project_id, row.milestone_id), row.clone());
        Ok(())
    }

    async fn pledge_exists(&mut self, tx_hash: &TxHash) -> Result<bool, IndexerError> {
        Ok(self.pledges.contains_key(tx_hash))
    }

    async fn insert_pledge(&mut self, row: &PledgeRow) -> Result<bool, IndexerError> {
        Ok(insert_new(&mut self.pledges, row.tx_hash.clone(), row.clone()))
    }

    async fn active_pledges(
        &mut self,
        project_id: ProjectId,
        backer: &Address,
    ) -> Result<Vec<PledgeRow>, IndexerError> {
        let pledges = self
            .pledges
            .values()
            .filter(|pledge| {
                pledge.project_id == project_id
                    && &pledge.backer == backer
                    && pledge.status == PledgeStatus::Active
            })
            .cloned()
            .collect();
        Ok(pledges)
    }

    async fn set_pledge_status(
        &mut self,
        tx_hash: &TxHash,
        status: PledgeStatus,
    ) -> Result<(), IndexerError> {
        let Some(pledge) = self.pledges.get_mut(tx_hash) else {
            return Err(IndexerError::projection(&format!(
                "pledge {tx_hash} does not exist"
            )));
        };
        pledge.status = status;
        Ok(())
    }

    async fn get_vote(
        &mut self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
        backer: &Address,
    ) -> Result<Option<VoteRow>, IndexerError> {
        let key = (project_id, milestone_id, backer.clone());
        Ok(self.votes.get(&key).cloned())
    }

    async fn insert_vote(&mut self, row: &VoteRow) -> Result<bool, IndexerError> {
        let key = (row.project_id, row.milestone_id, row.backer.clone());
        Ok(insert_new(&mut self.votes, key, row.clone()))
    }

    async fn release_exists(&mut self, tx_hash: &TxHash) -> Result<bool, IndexerError> {
        Ok(self.releases.contains_key(tx_hash))
    }

    async fn milestone_release(
        &mut self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<Option<ReleaseRow>, IndexerError> {
        let release = self
            .releases
            .values()
            .find(|release| {
                release.project_id == project_id && release.milestone_id == milestone_id
            })
            .cloned();
        Ok(release)
    }

    async fn insert_release(&mut self, row: &ReleaseRow) -> Result<bool, IndexerError> {
        Ok(insert_new(&mut self.releases, row.tx_hash.clone(), row.clone()))
    }

    async fn refund_exists(&mut self, tx_hash: &TxHash) -> Result<bool, IndexerError> {
        Ok(self.refunds.keys().any(|(refund_tx, _)| refund_tx == tx_hash))
    }

    async fn insert_refund(&mut self, row: &RefundRow) -> Result<bool, IndexerError> {
        let key = (row.tx_hash.clone(), row.pledge_tx_hash.clone());
        Ok(insert_new(&mut self.refunds, key, row.clone()))
    }
}
