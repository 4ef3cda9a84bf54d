use std::str::FromStr;

use async_trait::async_trait;
use error_stack::{Context, Result};
use escrow_core::{Address, EventEnvelope, MilestoneId, PledgeStatus, ProjectId, TxHash};
use escrow_indexer_common::{
    projection::{
        apply_event, AccountRow, ApplyOutcome, MilestoneRow, PledgeRow, ProjectRow,
        ProjectionSnapshot, ProjectionStore, ProjectionTx, RefundRow, ReleaseRow, VoteRow,
    },
    IndexerError, IndexerErrorResultExt,
};
use tokio_postgres::{Client, Row, Transaction};

/// The projection stored in PostgreSQL.
///
/// Every event is applied in its own database transaction.
pub struct PostgresProjection {
    client: Client,
}

impl PostgresProjection {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProjectionStore for PostgresProjection {
    async fn apply_event(
        &mut self,
        envelope: &EventEnvelope,
    ) -> Result<ApplyOutcome, IndexerError> {
        let tx = self
            .client
            .transaction()
            .await
            .projection("failed to start transaction")?;
        let mut tx = PostgresTx { tx };

        let outcome = apply_event(&mut tx, envelope).await?;

        tx.tx
            .commit()
            .await
            .projection("failed to commit transaction")?;
        Ok(outcome)
    }

    async fn snapshot(&mut self) -> Result<ProjectionSnapshot, IndexerError> {
        let accounts = query_all(
            &self.client,
            "SELECT address, is_creator, total_pledged FROM accounts",
            account_from_row,
        )
        .await?;
        let projects = query_all(
            &self.client,
            "SELECT project_id, creator, funding_goal, deadline, cumulative_pledged, status, created_block FROM projects",
            project_from_row,
        )
        .await?;
        let milestones = query_all(
            &self.client,
            "SELECT project_id, milestone_id, title, amount, status, is_activated, approve_weight, reject_weight FROM milestones",
            milestone_from_row,
        )
        .await?;
        let pledges = query_all(
            &self.client,
            "SELECT tx_hash, project_id, backer, amount, status, block_number FROM pledges",
            pledge_from_row,
        )
        .await?;
        let votes = query_all(
            &self.client,
            "SELECT project_id, milestone_id, backer, approve, weight, tx_hash FROM votes",
            vote_from_row,
        )
        .await?;
        let releases = query_all(
            &self.client,
            "SELECT tx_hash, project_id, milestone_id, amount, block_number FROM releases",
            release_from_row,
        )
        .await?;
        let refunds = query_all(
            &self.client,
            "SELECT tx_hash, pledge_tx_hash, project_id, backer, amount, block_number FROM refunds",
            refund_from_row,
        )
        .await?;

        let snapshot = ProjectionSnapshot {
            accounts,
            projects,
            milestones,
            pledges,
            votes,
            releases,
            refunds,
        };

        Ok(snapshot.normalize())
    }

    async fn truncate(&mut self) -> Result<(), IndexerError> {
        self.client
            .batch_execute(
                "TRUNCATE accounts, projects, milestones, pledges, votes, releases, refunds",
            )
            .await
            .projection("failed to truncate projection")
    }
}

struct PostgresTx<'a> {
    tx: Transaction<'a>,
}

#[async_trait]
impl<'a> ProjectionTx for PostgresTx<'a> {
    async fn get_account(&mut self, address: &Address) -> Result<Option<AccountRow>, IndexerError> {
        let row = self
            .tx
            .query_opt(
                "SELECT address, is_creator, total_pledged FROM accounts WHERE address = $1 FOR UPDATE",
                &[&address.as_str()],
            )
            .await
            .projection("failed to read account")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn put_account(&mut self, row: &AccountRow) -> Result<(), IndexerError> {
        self.tx
            .execute(
                "INSERT INTO accounts (address, is_creator, total_pledged) VALUES ($1, $2, $3)
                ON CONFLICT (address) DO UPDATE
                SET is_creator = EXCLUDED.is_creator, total_pledged = EXCLUDED.total_pledged",
                &[
                    &row.address.as_str(),
                    &row.is_creator,
                    &row.total_pledged.to_string(),
                ],
            )
            .await
            .projection("failed to write account")?;
        Ok(())
    }

    async fn get_project(
        &mut self,
        project_id: ProjectId,
    ) -> Result<Option<ProjectRow>, IndexerError> {
        let row = self
            .tx
            .query_opt(
                "SELECT project_id, creator, funding_goal, deadline, cumulative_pledged, status, created_block
                FROM projects WHERE project_id = $1 FOR UPDATE",
                &[&to_i64(project_id)?],
            )
            .await
            .projection("failed to read project")?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn insert_project(&mut self, row: &ProjectRow) -> Result<bool, IndexerError> {
        let inserted = self
            .tx
            .execute(
                "INSERT INTO projects
                (project_id, creator, funding_goal, deadline, cumulative_pledged, status, created_block)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (project_id) DO NOTHING",
                &[
                    &to_i64(row.project_id)?,
                    &row.creator.as_str(),
                    &row.funding_goal.to_string(),
                    &to_i64(row.deadline)?,
                    &row.cumulative_pledged.to_string(),
                    &row.status.as_str(),
                    &to_i64(row.created_block)?,
                ],
            )
            .await
            .projection("failed to insert project")?;
        Ok(inserted == 1)
    }

    async fn update_project(&mut self, row: &ProjectRow) -> Result<(), IndexerError> {
        self.tx
            .execute(
                "UPDATE projects SET cumulative_pledged = $2, status = $3 WHERE project_id = $1",
                &[
                    &to_i64(row.project_id)?,
                    &row.cumulative_pledged.to_string(),
                    &row.status.as_str(),
                ],
            )
            .await
            .projection("failed to update project")?;
        Ok(())
    }

    async fn get_milestone(
        &mut self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<Option<MilestoneRow>, IndexerError> {
        let row = self
            .tx
            .query_opt(
                "SELECT project_id, milestone_id, title, amount, status, is_activated, approve_weight, reject_weight
                FROM milestones WHERE project_id = $1 AND milestone_id = $2 FOR UPDATE",
                &[&to_i64(project_id)?, &to_i64(milestone_id)?],
            )
            .await
            .projection("failed to read milestone")?;
        row.as_ref().map(milestone_from_row).transpose()
    }

    async fn insert_milestone(&mut self, row: &MilestoneRow) -> Result<bool, IndexerError> {
        let inserted = self
            .tx
            .execute(
                "INSERT INTO milestones
                (project_id, milestone_id, title, amount, status, is_activated, approve_weight, reject_weight)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (project_id, milestone_id) DO NOTHING",
                &[
                    &to_i64(row.project_id)?,
                    &to_i64(row.milestone_id)?,
                    &row.title,
                    &row.amount.to_string(),
                    &row.status.as_str(),
                    &row.is_activated,
                    &row.approve_weight.to_string(),
                    &row.reject_weight.to_string(),
                ],
            )
            .await
            .projection("failed to insert milestone")?;
        Ok(inserted == 1)
    }

    async fn update_milestone(&mut self, row: &MilestoneRow) -> Result<(), IndexerError> {
        self.tx
            .execute(
                "UPDATE milestones
                SET status = $3, is_activated = $4, approve_weight = $5, reject_weight = $6
                WHERE project_id = $1 AND milestone_id = $2",
                &[
                    &to_i64(row.project_id)?,
                    &to_i64(row.milestone_id)?,
                    &row.status.as_str(),
                    &row.is_activated,
                    &row.approve_weight.to_string(),
                    &row.reject_weight.to_string(),
                ],
            )
            .await
            .projection("failed to update milestone")?;
        Ok(())
    }

    async fn pledge_exists(&mut self, tx_hash: &TxHash) -> Result<bool, IndexerError> {
        let row = self
            .tx
            .query_opt("SELECT 1 FROM pledges WHERE tx_hash = $1", &[&tx_hash.as_str()])
            .await
            .projection("failed to read pledge")?;
        Ok(row.is_some())
    }

    async fn insert_pledge(&mut self, row: &PledgeRow) -> Result<bool, IndexerError> {
        let inserted = self
            .tx
            .execute(
                "INSERT INTO pledges (tx_hash, project_id, backer, amount, status, block_number)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (tx_hash) DO NOTHING",
                &[
                    &row.tx_hash.as_str(),
                    &to_i64(row.project_id)?,
                    &row.backer.as_str(),
                    &row.amount.to_string(),
                    &row.status.as_str(),
                    &to_i64(row.block_number)?,
                ],
            )
            .await
            .projection("failed to insert pledge")?;
        Ok(inserted == 1)
    }

    async fn active_pledges(
        &mut self,
        project_id: ProjectId,
        backer: &Address,
    ) -> Result<Vec<PledgeRow>, IndexerError> {
        let rows = self
            .tx
            .query(
                "SELECT tx_hash, project_id, backer, amount, status, block_number FROM pledges
                WHERE project_id = $1 AND backer = $2 AND status = 'active'
                ORDER BY block_number, tx_hash FOR UPDATE",
                &[&to_i64(project_id)?, &backer.as_str()],
            )
            .await
            .projection("failed to read active pledges")?;
        rows.iter().map(pledge_from_row).collect()
    }

    async fn set_pledge_status(
        &mut self,
        tx_hash: &TxHash,
        status: PledgeStatus,
    ) -> Result<(), IndexerError> {
        let updated = self
            .tx
            .execute(
                "UPDATE pledges SET status = $2 WHERE tx_hash = $1",
                &[&tx_hash.as_str(), &status.as_str()],
            )
            .await
            .projection("failed to update pledge")?;

        if updated != 1 {
            return Err(IndexerError::projection(&format!(
                "pledge {tx_hash} does not exist"
            )));
        }

        Ok(())
    }

    async fn get_vote(
        &mut self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
        backer: &Address,
    ) -> Result<Option<VoteRow>, IndexerError> {
        let row = self
            .tx
            .query_opt(
                "SELECT project_id, milestone_id, backer, approve, weight, tx_hash FROM votes
                WHERE project_id = $1 AND milestone_id = $2 AND backer = $3",
                &[&to_i64(project_id)?, &to_i64(milestone_id)?, &backer.as_str()],
            )
            .await
            .projection("failed to read vote")?;
        row.as_ref().map(vote_from_row).transpose()
    }

    async fn insert_vote(&mut self, row: &VoteRow) -> Result<bool, IndexerError> {
        let inserted = self
            .tx
            .execute(
                "INSERT INTO votes (project_id, milestone_id, backer, approve, weight, tx_hash)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (project_id, milestone_id, backer) DO NOTHING",
                &[
                    &to_i64(row.project_id)?,
                    &to_i64(row.milestone_id)?,
                    &row.backer.as_str(),
                    &row.approve,
                    &row.weight.to_string(),
                    &row.tx_hash.as_str(),
                ],
            )
            .await
            .projection("failed to insert vote")?;
        Ok(inserted == 1)
    }

    async fn release_exists(&mut self, tx_hash: &TxHash) -> Result<bool, IndexerError> {
        let row = self
            .tx
            .query_opt("SELECT 1 FROM releases WHERE tx_hash = $1", &[&tx_hash.as_str()])
            .await
            .projection("failed to read release")?;
        Ok(row.is_some())
    }

    async fn milestone_release(
        &mut self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<Option<ReleaseRow>, IndexerError> {
        let row = self
            .tx
            .query_opt(
                "SELECT tx_hash, project_id, milestone_id, amount, block_number FROM releases
                WHERE project_id = $1 AND milestone_id = $2",
                &[&to_i64(project_id)?, &to_i64(milestone_id)?],
            )
            .await
            .projection("failed to read release")?;
        row.as_ref().map(release_from_row).transpose()
    }

    async fn insert_release(&mut self, row: &ReleaseRow) -> Result<bool, IndexerError> {
        let inserted = self
            .tx
            .execute(
                "INSERT INTO releases (tx_hash, project_id, milestone_id, amount, block_number)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT DO NOTHING",
                &[
                    &row.tx_hash.as_str(),
                    &to_i64(row.project_id)?,
                    &to_i64(row.milestone_id)?,
                    &row.amount.to_string(),
                    &to_i64(row.block_number)?,
                ],
            )
            .await
            .projection("failed to insert release")?;
        Ok(inserted == 1)
    }

    async fn refund_exists(&mut self, tx_hash: &TxHash) -> Result<bool, IndexerError> {
        let row = self
            .tx
            .query_opt(
                "SELECT 1 FROM refunds WHERE tx_hash = $1 LIMIT 1",
                &[&tx_hash.as_str()],
            )
            .await
            .projection("failed to read refund")?;
        Ok(row.is_some())
    }

    async fn insert_refund(&mut self, row: &RefundRow) -> Result<bool, IndexerError> {
        let inserted = self
            .tx
            .execute(
                "INSERT INTO refunds (tx_hash, pledge_tx_hash, project_id, backer, amount, block_number)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (tx_hash, pledge_tx_hash) DO NOTHING",
                &[
                    &row.tx_hash.as_str(),
                    &row.pledge_tx_hash.as_str(),
                    &to_i64(row.project_id)?,
                    &row.backer.as_str(),
                    &row.amount.to_string(),
                    &to_i64(row.block_number)?,
                ],
            )
            .await
            .projection("failed to insert refund")?;
        Ok(inserted == 1)
    }
}

async fn query_all<T>(
    client: &Client,
    query: &str,
    from_row: fn(&Row) -> Result<T, IndexerError>,
) -> Result<Vec<T>, IndexerError> {
    let rows = client
        .query(query, &[])
        .await
        .projection("failed to read projection")?;
    rows.iter().map(from_row).collect()
}

pub(crate) fn to_i64(value: u64) -> Result<i64, IndexerError> {
    i64::try_from(value).projection(&format!("{value} does not fit in a BIGINT column"))
}

fn parsed<T>(row: &Row, column: &str) -> Result<T, IndexerError>
where
    T: FromStr,
    T::Err: Context,
{
    let value: String = row
        .try_get(column)
        .projection(&format!("failed to read column {column}"))?;
    value
        .parse()
        .projection(&format!("invalid value in column {column}"))
}

fn unsigned(row: &Row, column: &str) -> Result<u64, IndexerError> {
    let value: i64 = row
        .try_get(column)
        .projection(&format!("failed to read column {column}"))?;
    u64::try_from(value).projection(&format!("negative value in column {column}"))
}

fn flag(row: &Row, column: &str) -> Result<bool, IndexerError> {
    row.try_get(column)
        .projection(&format!("failed to read column {column}"))
}

fn account_from_row(row: &Row) -> Result<AccountRow, IndexerError> {
    Ok(AccountRow {
        address: parsed(row, "address")?,
        is_creator: flag(row, "is_creator")?,
        total_pledged: parsed(row, "total_pledged")?,
    })
}

fn project_from_row(row: &Row) -> Result<ProjectRow, IndexerError> {
    Ok(ProjectRow {
        project_id: unsigned(row, "project_id")?,
        creator: parsed(row, "creator")?,
        funding_goal: parsed(row, "funding_goal")?,
        deadline: unsigned(row, "deadline")?,
        cumulative_pledged: parsed(row, "cumulative_pledged")?,
        status: parsed(row, "status")?,
        created_block: unsigned(row, "created_block")?,
    })
}

fn milestone_from_row(row: &Row) -> Result<MilestoneRow, IndexerError> {
    let title: String = row
        .try_get("title")
        .projection("failed to read column title")?;

    Ok(MilestoneRow {
        project_id: unsigned(row, "project_id")?,
        milestone_id: unsigned(row, "milestone_id")?,
        title,
        amount: parsed(row, "amount")?,
        status: parsed(row, "status")?,
        is_activated: flag(row, "is_activated")?,
        approve_weight: parsed(row, "approve_weight")?,
        reject_weight: parsed(row, "reject_weight")?,
    })
}

fn pledge_from_row(row: &Row) -> Result<PledgeRow, IndexerError> {
    Ok(PledgeRow {
        tx_hash: parsed(row, "tx_hash")?,
        project_id: unsigned(row, "project_id")?,
        backer: parsed(row, "backer")?,
        amount: parsed(row, "amount")?,
        status: parsed(row, "status")?,
        block_number: unsigned(row, "block_number")?,
    })
}

fn vote_from_row(row: &Row) -> Result<VoteRow, IndexerError> {
    Ok(VoteRow {
        project_id: unsigned(row, "project_id")?,
        milestone_id: unsigned(row, "milestone_id")?,
        backer: parsed(row, "backer")?,
        approve: flag(row, "approve")?,
        weight: parsed(row, "weight")?,
        tx_hash: parsed(row, "tx_hash")?,
    })
}

fn release_from_row(row: &Row) -> Result<ReleaseRow, IndexerError> {
    Ok(ReleaseRow {
        tx_hash: parsed(row, "tx_hash")?,
        project_id: unsigned(row, "project_id")?,
        milestone_id: unsigned(row, "milestone_id")?,
        amount: parsed(row, "amount")?,
        block_number: unsigned(row, "block_number")?,
    })
}

fn refund_from_row(row: &Row) -> Result<RefundRow, IndexerError> {
    Ok(RefundRow {
        tx_hash: parsed(row, "tx_hash")?,
        pledge_tx_hash: parsed(row, "pledge_tx_hash")?,
        project_id: unsigned(row, "project_id")?,
        backer: parsed(row, "backer")?,
        amount: parsed(row, "amount")?,
        block_number: unsigned(row, "block_number")?,
    })
}
