//! Rows of the relational projection.
use escrow_core::{
    Address, Amount, MilestoneId, MilestoneStatus, PledgeStatus, ProjectId, ProjectStatus, TxHash,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRow {
    pub address: Address,
    pub is_creator: bool,
    /// Sum of the account's active pledges.
    pub total_pledged: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRow {
    pub project_id: ProjectId,
    pub creator: Address,
    pub funding_goal: Amount,
    pub deadline: u64,
    /// Sum of the project's active pledges.
    pub cumulative_pledged: Amount,
    pub status: ProjectStatus,
    pub created_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneRow {
    pub project_id: ProjectId,
    pub milestone_id: MilestoneId,
    pub title: String,
    pub amount: Amount,
    pub status: MilestoneStatus,
    pub is_activated: bool,
    pub approve_weight: Amount,
    pub reject_weight: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PledgeRow {
    pub tx_hash: TxHash,
    pub project_id: ProjectId,
    pub backer: Address,
    pub amount: Amount,
    pub status: PledgeStatus,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRow {
    pub project_id: ProjectId,
    pub milestone_id: MilestoneId,
    pub backer: Address,
    pub approve: bool,
    pub weight: Amount,
    pub tx_hash: TxHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRow {
    pub tx_hash: TxHash,
    pub project_id: ProjectId,
    pub milestone_id: MilestoneId,
    pub amount: Amount,
    pub block_number: u64,
}

/// One refunded pledge. All rows of a refund share its transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRow {
    pub tx_hash: TxHash,
    pub pledge_tx_hash: TxHash,
    pub project_id: ProjectId,
    pub backer: Address,
    pub amount: Amount,
    pub block_number: u64,
}

/// The whole projection, with every table sorted by primary key.
///
/// Two stores that applied the same events produce equal snapshots, and equal
/// snapshots serialize to the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionSnapshot {
    pub accounts: Vec<AccountRow>,
    pub projects: Vec<ProjectRow>,
    pub milestones: Vec<MilestoneRow>,
    pub pledges: Vec<PledgeRow>,
    pub votes: Vec<VoteRow>,
    pub releases: Vec<ReleaseRow>,
    pub refunds: Vec<RefundRow>,
}

impl ProjectionSnapshot {
    /// Sorts every table by its primary key.
    pub fn normalize(mut self) -> Self {
        self.accounts.sort_by(|a, b| a.address.cmp(&b.address));
        self.projects.sort_by_key(|row| row.project_id);
        self.milestones.sort_by_key(|row| (row.project_id, row.milestone_id));
        self.pledges.sort_by(|a, b| a.tx_hash.cmp(&b.tx_hash));
        self.votes.sort_by(|a, b| {
            let left = (a.project_id, a.milestone_id, &a.backer);
            left.cmp(&(b.project_id, b.milestone_id, &b.backer))
        });
        self.releases.sort_by(|a, b| a.tx_hash.cmp(&b.tx_hash));
        self.refunds.sort_by(|a, b| {
            (&a.tx_hash, &a.pledge_tx_hash).cmp(&(&b.tx_hash, &b.pledge_tx_hash))
        });
        self
    }

    /// Checks the pledge totals against the active pledges.
    ///
    /// Returns a description of the first mismatch found.
    pub fn check_pledge_totals(&self) -> Option<String> {
        for project in &self.projects {
            let active = self
                .pledges
                .iter()
                .filter(|pledge| {
                    pledge.project_id == project.project_id && pledge.status == PledgeStatus::Active
                })
                .fold(Some(Amount::ZERO), |acc, pledge| {
                    acc.and_then(|acc| acc.checked_add(pledge.amount))
                });
            if active != Some(project.cumulative_pledged) {
                return Some(format!(
                    "project {} pledged {} but active pledges sum to {:?}",
                    project.project_id, project.cumulative_pledged, active
                ));
            }
        }

        for account in &self.accounts {
            let active = self
                .pledges
                .iter()
                .filter(|pledge| {
                    pledge.backer == account.address && pledge.status == PledgeStatus::Active
                })
                .fold(Some(Amount::ZERO), |acc, pledge| {
                    acc.and_then(|acc| acc.checked_add(pledge.amount))
                });
            if active != Some(account.total_pledged) {
                return Some(format!(
                    "account {} pledged {} but active pledges sum to {:?}",
                    account.address, account.total_pledged, active
                ));
            }
        }

        None
    }
}
