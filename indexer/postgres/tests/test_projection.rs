use assert_matches::assert_matches;
use escrow_core::{
    event::{FundsReleased, VoteCast},
    Amount, EventEnvelope, EventKind, LedgerEvent, MilestoneStatus, PledgeStatus, ProjectStatus,
    TxHash,
};
use escrow_indexer_common::projection::{
    ApplyOutcome, InMemoryProjection, ProjectionSnapshot, ProjectionStore,
};
use escrow_indexer_postgres::{run_migrations, PostgresProjection, MIGRATIONS};
use testcontainers::clients;

mod common;
use crate::common::*;

#[tokio::test]
#[ignore]
async fn test_migrations_are_idempotent() {
    let docker = clients::Cli::default();
    let postgres = docker.run(new_postgres_image());
    let port = postgres.get_host_port_ipv4(5432);

    let mut client = new_client(port).await;
    let applied = run_migrations(&mut client).await.unwrap();
    assert_eq!(applied.len(), MIGRATIONS.len());

    let applied = run_migrations(&mut client).await.unwrap();
    assert!(applied.is_empty());

    let rows = client
        .query("SELECT version FROM schema_migrations ORDER BY version", &[])
        .await
        .unwrap();
    let versions: Vec<i32> = rows.iter().map(|row| row.get(0)).collect();
    assert_eq!(versions, vec![1, 2, 3]);
}

#[tokio::test]
#[ignore]
async fn test_projection_matches_in_memory() {
    let docker = clients::Cli::default();
    let postgres = docker.run(new_postgres_image());
    let port = postgres.get_host_port_ipv4(5432);

    let mut client = new_client(port).await;
    run_migrations(&mut client).await.unwrap();
    let mut projection = PostgresProjection::new(client);
    let mut reference = InMemoryProjection::new();

    let chain = two_projects_chain();
    let events = all_events(&chain);
    for envelope in &events {
        let outcome = projection.apply_event(envelope).await.unwrap();
        let expected = reference.apply_event(envelope).await.unwrap();
        assert_eq!(outcome, expected, "{:?}", envelope.event);
    }

    let snapshot = projection.snapshot().await.unwrap();
    assert_eq!(snapshot, reference.snapshot().await.unwrap());

    assert_eq!(snapshot.projects.len(), 2);
    assert_eq!(snapshot.projects[0].status, ProjectStatus::Active);
    assert_eq!(snapshot.projects[1].cumulative_pledged, Amount::ZERO);
    assert_eq!(snapshot.milestones[0].status, MilestoneStatus::Paid);
    assert_eq!(snapshot.releases.len(), 1);
    assert_eq!(snapshot.refunds.len(), 1);
    let refunded = snapshot
        .pledges
        .iter()
        .find(|pledge| pledge.backer == backer2())
        .unwrap();
    assert_eq!(refunded.status, PledgeStatus::Refunded);

    // Replaying every event is a no-op.
    for envelope in &events {
        let outcome = projection.apply_event(envelope).await.unwrap();
        assert_matches!(outcome, ApplyOutcome::Duplicate);
    }
    assert_eq!(projection.snapshot().await.unwrap(), snapshot);

    projection.truncate().await.unwrap();
    assert_eq!(
        projection.snapshot().await.unwrap(),
        ProjectionSnapshot::default()
    );
}

#[tokio::test]
#[ignore]
async fn test_orphan_event_is_not_written() {
    let docker = clients::Cli::default();
    let postgres = docker.run(new_postgres_image());
    let port = postgres.get_host_port_ipv4(5432);

    let mut client = new_client(port).await;
    run_migrations(&mut client).await.unwrap();
    let mut projection = PostgresProjection::new(client);

    let chain = two_projects_chain();
    // Skip project creation: every pledge references a missing project.
    let pledges = all_events(&chain)
        .into_iter()
        .filter(|envelope| envelope.event.kind() == EventKind::PledgeMade);
    for envelope in pledges {
        let outcome = projection.apply_event(&envelope).await.unwrap();
        assert_matches!(outcome, ApplyOutcome::Orphan);
    }

    assert_eq!(
        projection.snapshot().await.unwrap(),
        ProjectionSnapshot::default()
    );
}

#[tokio::test]
#[ignore]
async fn test_second_release_and_vote_are_dropped() {
    let docker = clients::Cli::default();
    let postgres = docker.run(new_postgres_image());
    let port = postgres.get_host_port_ipv4(5432);

    let mut client = new_client(port).await;
    run_migrations(&mut client).await.unwrap();
    let mut projection = PostgresProjection::new(client);

    let chain = two_projects_chain();
    for envelope in &all_events(&chain) {
        projection.apply_event(envelope).await.unwrap();
    }
    let snapshot = projection.snapshot().await.unwrap();

    let vote = EventEnvelope {
        block_number: chain.head() + 1,
        tx_hash: TxHash::from_low_u64_be(1_000),
        log_index: 0,
        event: LedgerEvent::VoteCast(VoteCast {
            project_id: 0,
            milestone_id: 0,
            backer: backer1(),
            approve: false,
            weight: native("0.2"),
        }),
    };
    let outcome = projection.apply_event(&vote).await.unwrap();
    assert_matches!(outcome, ApplyOutcome::Duplicate);

    let release = EventEnvelope {
        block_number: chain.head() + 2,
        tx_hash: TxHash::from_low_u64_be(1_001),
        log_index: 0,
        event: LedgerEvent::FundsReleased(FundsReleased {
            project_id: 0,
            milestone_id: 0,
            amount: native("0.05"),
        }),
    };
    let outcome = projection.apply_event(&release).await.unwrap();
    assert_matches!(outcome, ApplyOutcome::Duplicate);

    assert_eq!(projection.snapshot().await.unwrap(), snapshot);
}
