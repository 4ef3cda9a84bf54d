//! Idempotent event handlers.
//!
//! Handlers check for an existing effect before writing, so applying the same
//! event twice, or replaying a range that was already indexed, changes nothing.
use error_stack::{Report, Result};
use escrow_core::{
    event::{
        FundsReleased, MilestoneActivated, MilestoneSubmitted, PledgeMade, ProjectClosed,
        ProjectCreated, RefundIssued, VoteCast, VotingClosed, VotingStarted,
    },
    Address, Amount, EventEnvelope, LedgerEvent, MilestoneStatus, PledgeStatus, ProjectStatus,
};
use tracing::{debug, info, warn};

use crate::IndexerError;

use super::{
    AccountRow, ApplyOutcome, MilestoneRow, PledgeRow, ProjectRow, ProjectionTx, RefundRow,
    ReleaseRow, VoteRow,
};

fn overflow(what: &str) -> Report<IndexerError> {
    IndexerError::projection(&format!("{what} overflows or goes below zero"))
}

fn inserted(inserted: bool) -> ApplyOutcome {
    if inserted {
        ApplyOutcome::Applied
    } else {
        ApplyOutcome::Duplicate
    }
}

/// Applies one event to the projection.
pub async fn apply_event<T>(
    tx: &mut T,
    envelope: &EventEnvelope,
) -> Result<ApplyOutcome, IndexerError>
where
    T: ProjectionTx + ?Sized,
{
    let outcome = match &envelope.event {
        LedgerEvent::ProjectCreated(ev) => project_created(tx, envelope, ev).await?,
        LedgerEvent::PledgeMade(ev) => pledge_made(tx, envelope, ev).await?,
        LedgerEvent::MilestoneSubmitted(ev) => milestone_submitted(tx, ev).await?,
        LedgerEvent::MilestoneActivated(ev) => milestone_activated(tx, ev).await?,
        LedgerEvent::VotingStarted(ev) => voting_started(tx, ev).await?,
        LedgerEvent::VoteCast(ev) => vote_cast(tx, envelope, ev).await?,
        LedgerEvent::VotingClosed(ev) => voting_closed(tx, ev).await?,
        LedgerEvent::FundsReleased(ev) => funds_released(tx, envelope, ev).await?,
        LedgerEvent::RefundIssued(ev) => refund_issued(tx, envelope, ev).await?,
        LedgerEvent::ProjectClosed(ev) => project_closed(tx, ev).await?,
    };

    debug!(
        event = %envelope.event.kind(),
        block = envelope.block_number,
        log_index = envelope.log_index,
        outcome = ?outcome,
        "applied event"
    );

    Ok(outcome)
}

async fn account_or_default<T>(tx: &mut T, address: &Address) -> Result<AccountRow, IndexerError>
where
    T: ProjectionTx + ?Sized,
{
    let account = tx.get_account(address).await?.unwrap_or_else(|| AccountRow {
        address: address.clone(),
        is_creator: false,
        total_pledged: Amount::ZERO,
    });
    Ok(account)
}

async fn project_created<T>(
    tx: &mut T,
    envelope: &EventEnvelope,
    ev: &ProjectCreated,
) -> Result<ApplyOutcome, IndexerError>
where
    T: ProjectionTx + ?Sized,
{
    let mut creator = account_or_default(tx, &ev.creator).await?;
    if !creator.is_creator {
        creator.is_creator = true;
        tx.put_account(&creator).await?;
    }

    let project = ProjectRow {
        project_id: ev.project_id,
        creator: ev.creator.clone(),
        funding_goal: ev.funding_goal,
        deadline: ev.deadline,
        cumulative_pledged: Amount::ZERO,
        status: ProjectStatus::Funding,
        created_block: envelope.block_number,
    };

    Ok(inserted(tx.insert_project(&project).await?))
}

async fn pledge_made<T>(
    tx: &mut T,
    envelope: &EventEnvelope,
    ev: &PledgeMade,
) -> Result<ApplyOutcome, IndexerError>
where
    T: ProjectionTx + ?Sized,
{
    let Some(mut project) = tx.get_project(ev.project_id).await? else {
        warn!(project_id = ev.project_id, tx = %envelope.tx_hash, "pledge for unknown project");
        return Ok(ApplyOutcome::Orphan);
    };

    if tx.pledge_exists(&envelope.tx_hash).await? {
        return Ok(ApplyOutcome::Duplicate);
    }

    let pledge = PledgeRow {
        tx_hash: envelope.tx_hash.clone(),
        project_id: ev.project_id,
        backer: ev.backer.clone(),
        amount: ev.amount,
        status: PledgeStatus::Active,
        block_number: envelope.block_number,
    };
    if !tx.insert_pledge(&pledge).await? {
        return Ok(ApplyOutcome::Duplicate);
    }

    project.cumulative_pledged = project
        .cumulative_pledged
        .checked_add(ev.amount)
        .ok_or_else(|| overflow("project pledged total"))?;
    tx.update_project(&project).await?;

    let mut backer = account_or_default(tx, &ev.backer).await?;
    backer.total_pledged = backer
        .total_pledged
        .checked_add(ev.amount)
        .ok_or_else(|| overflow("backer pledged total"))?;
    tx.put_account(&backer).await?;

    Ok(ApplyOutcome::Applied)
}

async fn milestone_submitted<T>(
    tx: &mut T,
    ev: &MilestoneSubmitted,
) -> Result<ApplyOutcome, IndexerError>
where
    T: ProjectionTx + ?Sized,
{
    if tx.get_project(ev.project_id).await?.is_none() {
        warn!(project_id = ev.project_id, "milestone for unknown project");
        return Ok(ApplyOutcome::Orphan);
    }

    let milestone = MilestoneRow {
        project_id: ev.project_id,
        milestone_id: ev.milestone_id,
        title: ev.title.clone(),
        amount: ev.amount,
        status: MilestoneStatus::Pending,
        is_activated: false,
        approve_weight: Amount::ZERO,
        reject_weight: Amount::ZERO,
    };

    Ok(inserted(tx.insert_milestone(&milestone).await?))
}

async fn milestone_activated<T>(
    tx: &mut T,
    ev: &MilestoneActivated,
) -> Result<ApplyOutcome, IndexerError>
where
    T: ProjectionTx + ?Sized,
{
    let Some(mut milestone) = tx.get_milestone(ev.project_id, ev.milestone_id).await? else {
        warn!(
            project_id = ev.project_id,
            milestone_id = ev.milestone_id,
            "activation of unknown milestone"
        );
        return Ok(ApplyOutcome::Orphan);
    };

    if milestone.is_activated {
        return Ok(ApplyOutcome::Duplicate);
    }

    milestone.is_activated = true;
    tx.update_milestone(&milestone).await?;
    Ok(ApplyOutcome::Applied)
}

async fn voting_started<T>(tx: &mut T, ev: &VotingStarted) -> Result<ApplyOutcome, IndexerError>
where
    T: ProjectionTx + ?Sized,
{
    let Some(mut milestone) = tx.get_milestone(ev.project_id, ev.milestone_id).await? else {
        warn!(
            project_id = ev.project_id,
            milestone_id = ev.milestone_id,
            "voting on unknown milestone"
        );
        return Ok(ApplyOutcome::Orphan);
    };

    if milestone.status.rank() >= MilestoneStatus::Voting.rank() {
        return Ok(ApplyOutcome::Duplicate);
    }

    milestone.status = MilestoneStatus::Voting;
    tx.update_milestone(&milestone).await?;
    Ok(ApplyOutcome::Applied)
}

async fn vote_cast<T>(
    tx: &mut T,
    envelope: &EventEnvelope,
    ev: &VoteCast,
) -> Result<ApplyOutcome, IndexerError>
where
    T: ProjectionTx + ?Sized,
{
    let Some(mut milestone) = tx.get_milestone(ev.project_id, ev.milestone_id).await? else {
        warn!(
            project_id = ev.project_id,
            milestone_id = ev.milestone_id,
            "vote on unknown milestone"
        );
        return Ok(ApplyOutcome::Orphan);
    };

    if tx
        .get_vote(ev.project_id, ev.milestone_id, &ev.backer)
        .await?
        .is_some()
    {
        return Ok(ApplyOutcome::Duplicate);
    }

    let pledged = tx
        .active_pledges(ev.project_id, &ev.backer)
        .await?
        .iter()
        .try_fold(Amount::ZERO, |acc, pledge| acc.checked_add(pledge.amount))
        .ok_or_else(|| overflow("backer pledged total"))?;

    if ev.weight > pledged {
        warn!(
            project_id = ev.project_id,
            milestone_id = ev.milestone_id,
            backer = %ev.backer,
            weight = %ev.weight,
            pledged = %pledged,
            "vote weight exceeds projected pledges"
        );
        return Ok(ApplyOutcome::Orphan);
    }

    let vote = VoteRow {
        project_id: ev.project_id,
        milestone_id: ev.milestone_id,
        backer: ev.backer.clone(),
        approve: ev.approve,
        weight: ev.weight,
        tx_hash: envelope.tx_hash.clone(),
    };
    if !tx.insert_vote(&vote).await? {
        return Ok(ApplyOutcome::Duplicate);
    }

    if ev.approve {
        milestone.approve_weight = milestone
            .approve_weight
            .checked_add(ev.weight)
            .ok_or_else(|| overflow("approve weight"))?;
    } else {
        milestone.reject_weight = milestone
            .reject_weight
            .checked_add(ev.weight)
            .ok_or_else(|| overflow("reject weight"))?;
    }
    tx.update_milestone(&milestone).await?;

    Ok(ApplyOutcome::Applied)
}

async fn voting_closed<T>(tx: &mut T, ev: &VotingClosed) -> Result<ApplyOutcome, IndexerError>
where
    T: ProjectionTx + ?Sized,
{
    let Some(mut milestone) = tx.get_milestone(ev.project_id, ev.milestone_id).await? else {
        warn!(
            project_id = ev.project_id,
            milestone_id = ev.milestone_id,
            "closing vote of unknown milestone"
        );
        return Ok(ApplyOutcome::Orphan);
    };

    if milestone.status.rank() >= MilestoneStatus::Approved.rank() {
        return Ok(ApplyOutcome::Duplicate);
    }

    milestone.status = if ev.approved {
        MilestoneStatus::Approved
    } else {
        MilestoneStatus::Rejected
    };
    tx.update_milestone(&milestone).await?;
    Ok(ApplyOutcome::Applied)
}

async fn funds_released<T>(
    tx: &mut T,
    envelope: &EventEnvelope,
    ev: &FundsReleased,
) -> Result<ApplyOutcome, IndexerError>
where
    T: ProjectionTx + ?Sized,
{
    if tx.release_exists(&envelope.tx_hash).await? {
        return Ok(ApplyOutcome::Duplicate);
    }

    let Some(mut milestone) = tx.get_milestone(ev.project_id, ev.milestone_id).await? else {
        warn!(
            project_id = ev.project_id,
            milestone_id = ev.milestone_id,
            "release of unknown milestone"
        );
        return Ok(ApplyOutcome::Orphan);
    };
    let Some(mut project) = tx.get_project(ev.project_id).await? else {
        warn!(project_id = ev.project_id, "release for unknown project");
        return Ok(ApplyOutcome::Orphan);
    };

    if tx
        .milestone_release(ev.project_id, ev.milestone_id)
        .await?
        .is_some()
    {
        return Ok(ApplyOutcome::Duplicate);
    }

    let release = ReleaseRow {
        tx_hash: envelope.tx_hash.clone(),
        project_id: ev.project_id,
        milestone_id: ev.milestone_id,
        amount: ev.amount,
        block_number: envelope.block_number,
    };
    if !tx.insert_release(&release).await? {
        return Ok(ApplyOutcome::Duplicate);
    }

    milestone.status = MilestoneStatus::Paid;
    tx.update_milestone(&milestone).await?;

    if project.status == ProjectStatus::Funding {
        project.status = ProjectStatus::Active;
        tx.update_project(&project).await?;
    }

    Ok(ApplyOutcome::Applied)
}

async fn refund_issued<T>(
    tx: &mut T,
    envelope: &EventEnvelope,
    ev: &RefundIssued,
) -> Result<ApplyOutcome, IndexerError>
where
    T: ProjectionTx + ?Sized,
{
    if tx.refund_exists(&envelope.tx_hash).await? {
        return Ok(ApplyOutcome::Duplicate);
    }

    let Some(mut project) = tx.get_project(ev.project_id).await? else {
        warn!(project_id = ev.project_id, tx = %envelope.tx_hash, "refund for unknown project");
        return Ok(ApplyOutcome::Orphan);
    };

    let pledges = tx.active_pledges(ev.project_id, &ev.backer).await?;
    if pledges.is_empty() {
        info!(
            project_id = ev.project_id,
            backer = %ev.backer,
            "refund without active pledges, nothing to do"
        );
        return Ok(ApplyOutcome::Duplicate);
    }

    let mut refunded = Amount::ZERO;
    for pledge in &pledges {
        let refund = RefundRow {
            tx_hash: envelope.tx_hash.clone(),
            pledge_tx_hash: pledge.tx_hash.clone(),
            project_id: ev.project_id,
            backer: ev.backer.clone(),
            amount: pledge.amount,
            block_number: envelope.block_number,
        };
        tx.insert_refund(&refund).await?;
        tx.set_pledge_status(&pledge.tx_hash, PledgeStatus::Refunded)
            .await?;
        refunded = refunded
            .checked_add(pledge.amount)
            .ok_or_else(|| overflow("refunded amount"))?;
    }

    if refunded != ev.amount {
        warn!(
            project_id = ev.project_id,
            backer = %ev.backer,
            refunded = %refunded,
            expected = %ev.amount,
            "refunded pledges do not match refund amount"
        );
    }

    project.cumulative_pledged = project
        .cumulative_pledged
        .checked_sub(refunded)
        .ok_or_else(|| overflow("project pledged total"))?;
    tx.update_project(&project).await?;

    let mut backer = account_or_default(tx, &ev.backer).await?;
    backer.total_pledged = backer
        .total_pledged
        .checked_sub(refunded)
        .ok_or_else(|| overflow("backer pledged total"))?;
    tx.put_account(&backer).await?;

    Ok(ApplyOutcome::Applied)
}

async fn project_closed<T>(tx: &mut T, ev: &ProjectClosed) -> Result<ApplyOutcome, IndexerError>
where
    T: ProjectionTx + ?Sized,
{
    let Some(mut project) = tx.get_project(ev.project_id).await? else {
        warn!(project_id = ev.project_id, "closing unknown project");
        return Ok(ApplyOutcome::Orphan);
    };

    if project.status == ProjectStatus::Closed {
        return Ok(ApplyOutcome::Duplicate);
    }

    debug!(project_id = ev.project_id, reason = %ev.reason, "project closed");
    project.status = ProjectStatus::Closed;
    tx.update_project(&project).await?;
    Ok(ApplyOutcome::Applied)
}
