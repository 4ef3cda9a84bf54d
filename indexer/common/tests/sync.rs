mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use escrow_core::{Address, EventKind, MilestoneStatus, PledgeStatus, ProjectStatus};
use escrow_indexer_common::{
    checkpoint::{CheckpointManager, CheckpointStore, InMemoryCheckpoint},
    client::LedgerClient,
    projection::{InMemoryProjection, ProjectionStore},
    sync::{DispatchOutcome, Dispatcher},
    IndexerError,
};
use escrow_ledger::ProtocolError;
use tokio_util::sync::CancellationToken;

use common::*;

#[tokio::test]
async fn test_live_sync_indexes_released_milestone() {
    let harness = Harness::new(released_milestone_chain());
    let mut projection = InMemoryProjection::new();
    let mut checkpoint = InMemoryCheckpoint::default();

    run_live(&harness, projection.clone(), checkpoint.clone()).await;

    let snapshot = projection.snapshot().await.unwrap();
    assert_eq!(snapshot.projects.len(), 1);
    assert_eq!(snapshot.projects[0].cumulative_pledged, native("0.2"));
    assert_eq!(snapshot.projects[0].status, ProjectStatus::Active);
    assert_eq!(snapshot.milestones.len(), 1);
    assert_eq!(snapshot.milestones[0].status, MilestoneStatus::Paid);
    assert_eq!(snapshot.milestones[0].approve_weight, native("0.2"));
    assert_eq!(snapshot.votes.len(), 1);
    assert_eq!(snapshot.releases.len(), 1);
    assert_eq!(snapshot.releases[0].amount, native("0.05"));
    assert!(snapshot.check_pledge_totals().is_none());

    let height = checkpoint.get(&harness.contract).await.unwrap();
    assert_eq!(height, harness.safe_head().await);
}

#[tokio::test]
async fn test_live_sync_indexes_refund() {
    let harness = Harness::new(refunded_project_chain());
    let mut projection = InMemoryProjection::new();

    run_live(&harness, projection.clone(), InMemoryCheckpoint::default()).await;

    let snapshot = projection.snapshot().await.unwrap();
    assert_eq!(snapshot.pledges.len(), 1);
    assert_eq!(snapshot.pledges[0].status, PledgeStatus::Refunded);
    assert_eq!(snapshot.refunds.len(), 1);
    assert_eq!(snapshot.refunds[0].amount, native("0.1"));
    assert_eq!(snapshot.refunds[0].pledge_tx_hash, snapshot.pledges[0].tx_hash);
    assert_eq!(snapshot.projects[0].status, ProjectStatus::Closed);
    assert!(snapshot.check_pledge_totals().is_none());

    // Seeing the refund again changes nothing.
    let refund = harness
        .client()
        .inner()
        .events(
            &harness.contract,
            0,
            harness.safe_head().await,
            &[EventKind::RefundIssued],
        )
        .await
        .unwrap();
    assert_eq!(refund.len(), 1);

    let mut dispatcher = Dispatcher::new(projection.clone());
    let outcome = dispatcher.dispatch(&refund[0]).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Duplicate);
    assert_eq!(projection.snapshot().await.unwrap(), snapshot);
}

#[tokio::test]
async fn test_vote_without_pledge_never_reaches_indexer() {
    let mut chain = released_milestone_chain();
    chain
        .execute(&creator(), |ledger, ctx| {
            ledger.submit_milestone(ctx, 0, "beta release", native("0.1"))
        })
        .unwrap();
    let head = chain.head();

    let rejected = chain.execute(&backer2(), |ledger, ctx| {
        ledger.vote_on_milestone(ctx, 0, 1, true)
    });
    assert_eq!(rejected.unwrap_err(), ProtocolError::NotBacker);
    assert_eq!(chain.head(), head);

    chain.mine_empty(1);

    let harness = Harness::new(chain);
    let mut projection = InMemoryProjection::new();
    run_live(&harness, projection.clone(), InMemoryCheckpoint::default()).await;

    let snapshot = projection.snapshot().await.unwrap();
    assert_eq!(snapshot.milestones.len(), 2);
    assert_eq!(snapshot.votes.len(), 1);
    assert_eq!(snapshot.votes[0].backer, backer1());
}

#[tokio::test]
async fn test_backfill_after_live_is_identical() {
    let harness = Harness::new(released_milestone_chain());
    let mut live = InMemoryProjection::new();
    let mut checkpoint = InMemoryCheckpoint::default();

    run_live(&harness, live.clone(), checkpoint.clone()).await;
    let before = serde_json::to_vec(&live.snapshot().await.unwrap()).unwrap();

    let summary = harness
        .backfill(live.clone(), checkpoint.clone(), 0, None)
        .run(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    let total = summary.total();
    assert!(total.seen > 0);
    assert_eq!(total.applied, 0);
    assert_eq!(total.duplicates, total.seen);
    assert!(!summary.checkpoint_advanced);

    let after = serde_json::to_vec(&live.snapshot().await.unwrap()).unwrap();
    assert_eq!(before, after);

    let height = checkpoint.get(&harness.contract).await.unwrap();
    assert_eq!(height, harness.safe_head().await);
}

#[tokio::test]
async fn test_backfill_from_scratch_matches_live() {
    let mut chain = released_milestone_chain();
    chain
        .execute(&backer2(), |ledger, ctx| ledger.pledge(ctx, 0, native("0.3")))
        .unwrap();
    chain
        .execute(&creator(), |ledger, ctx| {
            ledger.submit_milestone(ctx, 0, "beta release", native("0.1"))
        })
        .unwrap();
    chain
        .execute(&creator(), |ledger, ctx| ledger.open_voting(ctx, 0, 1))
        .unwrap();
    chain
        .execute(&backer2(), |ledger, ctx| {
            ledger.vote_on_milestone(ctx, 0, 1, false)
        })
        .unwrap();
    chain
        .execute(&creator(), |ledger, ctx| ledger.close_voting(ctx, 0, 1))
        .unwrap();
    chain.mine_empty(1);

    let harness = Harness::new(chain);

    let mut live = InMemoryProjection::new();
    run_live(&harness, live.clone(), InMemoryCheckpoint::default()).await;

    let mut replayed = InMemoryProjection::new();
    let mut checkpoint = InMemoryCheckpoint::default();
    let summary = harness
        .backfill(replayed.clone(), checkpoint.clone(), 0, None)
        .run(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.to_block, harness.safe_head().await);
    assert_eq!(summary.kinds.len(), EventKind::ALL.len());
    assert_eq!(summary.kinds[&EventKind::VoteCast].applied, 2);
    assert_eq!(summary.total().orphans, 0);
    assert!(summary.checkpoint_advanced);

    let live = live.snapshot().await.unwrap();
    let replayed = replayed.snapshot().await.unwrap();
    assert_eq!(replayed.milestones[1].status, MilestoneStatus::Rejected);
    assert_eq!(
        serde_json::to_vec(&live).unwrap(),
        serde_json::to_vec(&replayed).unwrap()
    );

    let height = checkpoint.get(&harness.contract).await.unwrap();
    assert_eq!(height, harness.safe_head().await);
}

#[tokio::test]
async fn test_backfill_leaves_gap_checkpoint_alone() {
    let harness = Harness::new(released_milestone_chain());
    let mut checkpoint = InMemoryCheckpoint::default();

    let summary = harness
        .backfill(InMemoryProjection::new(), checkpoint.clone(), 3, None)
        .run(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert!(!summary.checkpoint_advanced);
    assert_eq!(checkpoint.get(&harness.contract).await.unwrap(), 0);
    // Events before block 3 are missing, so their children are orphans.
    assert!(summary.total().orphans > 0);
}

#[tokio::test]
async fn test_backfill_waits_for_live_lease() {
    let harness = Harness::new(released_milestone_chain());
    let checkpoint = InMemoryCheckpoint::default();

    let mut live = CheckpointManager::new(
        checkpoint.clone(),
        harness.contract.clone(),
        harness.lease("live", Duration::from_secs(60)),
    );
    assert!(live.acquire(&CancellationToken::new()).await.unwrap());

    let result = harness
        .backfill(InMemoryProjection::new(), checkpoint.clone(), 0, None)
        .run(CancellationToken::new())
        .await;
    assert_matches!(
        result.unwrap_err().current_context(),
        IndexerError::Checkpoint
    );

    live.release().await.unwrap();
    let summary = harness
        .backfill(InMemoryProjection::new(), checkpoint, 0, None)
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert!(summary.is_some());
}

#[tokio::test]
async fn test_live_sync_ignores_other_contracts() {
    let mut harness = Harness::new(released_milestone_chain());
    harness.contract = Address::from_low_u64_be(0xdead);
    let mut projection = InMemoryProjection::new();
    let mut checkpoint = InMemoryCheckpoint::default();

    run_live(&harness, projection.clone(), checkpoint.clone()).await;

    assert_eq!(projection.snapshot().await.unwrap(), Default::default());
    let height = checkpoint.get(&harness.contract).await.unwrap();
    assert_eq!(height, harness.safe_head().await);
}
