#![allow(dead_code)]

use escrow_core::{Address, Amount, EventEnvelope};
use escrow_indexer_postgres::{connect, PostgresConfiguration, PostgresOptions};
use escrow_ledger::LocalChain;
use testcontainers::{core::WaitFor, GenericImage};
use tokio_postgres::Client;

pub const NOW: u64 = 1_700_000_000;
pub const DAY: u64 = 86_400;

pub fn new_postgres_image() -> GenericImage {
    GenericImage::new("postgres", "15-alpine")
        .with_exposed_port(5432)
        .with_env_var("POSTGRES_DB", "postgres")
        .with_env_var("POSTGRES_HOST_AUTH_METHOD", "trust")
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
}

pub fn new_configuration(port: u16) -> PostgresConfiguration {
    let options = PostgresOptions {
        connection_string: Some(format!("postgresql://postgres@localhost:{}", port)),
        no_tls: Some(true),
        ..Default::default()
    };
    options.to_postgres_configuration().unwrap()
}

pub async fn new_client(port: u16) -> Client {
    connect(&new_configuration(port)).await.unwrap()
}

pub fn creator() -> Address {
    Address::from_low_u64_be(0xc0)
}

pub fn backer1() -> Address {
    Address::from_low_u64_be(0xb1)
}

pub fn backer2() -> Address {
    Address::from_low_u64_be(0xb2)
}

pub fn native(value: &str) -> Amount {
    Amount::from_native(value).unwrap()
}

/// Two projects: the first pays a milestone, the second is refunded.
pub fn two_projects_chain() -> LocalChain {
    let treasury = Address::from_low_u64_be(0x7e);
    let mut chain = LocalChain::new(creator(), treasury, NOW);
    let deadline = chain.now() + DAY;

    for _ in 0..2 {
        chain
            .execute(&creator(), |ledger, ctx| {
                ledger.create_project(ctx, native("1.0"), deadline)
            })
            .unwrap();
    }
    chain
        .execute(&backer1(), |ledger, ctx| ledger.pledge(ctx, 0, native("0.2")))
        .unwrap();
    chain
        .execute(&backer2(), |ledger, ctx| ledger.pledge(ctx, 1, native("0.1")))
        .unwrap();
    chain
        .execute(&creator(), |ledger, ctx| {
            ledger.submit_milestone(ctx, 0, "alpha release", native("0.05"))
        })
        .unwrap();
    chain
        .execute(&backer1(), |ledger, ctx| {
            ledger.vote_on_milestone(ctx, 0, 0, true)
        })
        .unwrap();
    chain
        .execute(&creator(), |ledger, ctx| ledger.release_funds(ctx, 0, 0))
        .unwrap();
    chain.advance_time(2 * DAY);
    chain
        .execute(&backer2(), |ledger, ctx| ledger.request_refund(ctx, 1))
        .unwrap();

    chain
}

pub fn all_events(chain: &LocalChain) -> Vec<EventEnvelope> {
    chain.events(0, chain.head(), &[])
}
