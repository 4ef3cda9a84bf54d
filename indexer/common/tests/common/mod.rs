#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use escrow_core::{Address, Amount};
use escrow_indexer_common::{
    checkpoint::{CheckpointManager, CheckpointStore, InMemoryCheckpoint},
    client::{LocalLedgerClient, RetryingLedgerClient},
    projection::ProjectionStore,
    sync::{Backfill, Dispatcher, LiveSync},
    BackfillConfiguration, LeaseConfiguration, SyncConfiguration,
};
use escrow_ledger::LocalChain;
use exponential_backoff::Backoff;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const NOW: u64 = 1_700_000_000;
pub const DAY: u64 = 86_400;

pub fn creator() -> Address {
    Address::from_low_u64_be(0xc0)
}

pub fn backer1() -> Address {
    Address::from_low_u64_be(0xb1)
}

pub fn backer2() -> Address {
    Address::from_low_u64_be(0xb2)
}

pub fn treasury() -> Address {
    Address::from_low_u64_be(0x7e)
}

pub fn native(value: &str) -> Amount {
    Amount::from_native(value).unwrap()
}

pub fn new_chain() -> LocalChain {
    LocalChain::new(creator(), treasury(), NOW)
}

/// A local ledger shared between the test and the indexer.
pub struct Harness {
    pub chain: Arc<Mutex<LocalChain>>,
    pub contract: Address,
}

impl Harness {
    pub fn new(chain: LocalChain) -> Self {
        let contract = chain.address().clone();
        Self {
            chain: Arc::new(Mutex::new(chain)),
            contract,
        }
    }

    /// Last block that is confirmed with a depth of one.
    pub async fn safe_head(&self) -> u64 {
        self.chain.lock().await.head().saturating_sub(1)
    }

    pub fn client(&self) -> RetryingLedgerClient<LocalLedgerClient> {
        let backoff = Backoff::new(2, Duration::from_millis(1), Some(Duration::from_millis(5)));
        RetryingLedgerClient::new(LocalLedgerClient::new(self.chain.clone()), backoff)
    }

    pub fn lease(&self, owner: &str, ttl: Duration) -> LeaseConfiguration {
        LeaseConfiguration {
            owner: owner.to_string(),
            ttl,
        }
    }

    pub fn live<S, K>(
        &self,
        store: S,
        checkpoint: K,
        ending_block: u64,
    ) -> LiveSync<LocalLedgerClient, S, K>
    where
        S: ProjectionStore,
        K: CheckpointStore,
    {
        let configuration = SyncConfiguration {
            contract: self.contract.clone(),
            poll_interval: Duration::from_millis(10),
            confirmation_depth: 1,
            chunk_size: 3,
            ending_block: Some(ending_block),
        };
        let checkpoint = CheckpointManager::new(
            checkpoint,
            self.contract.clone(),
            self.lease("live", Duration::from_secs(60)),
        );

        LiveSync::new(
            self.client(),
            Dispatcher::new(store),
            checkpoint,
            configuration,
        )
    }

    pub fn backfill<S, K>(
        &self,
        store: S,
        checkpoint: K,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Backfill<LocalLedgerClient, S, K>
    where
        S: ProjectionStore,
        K: CheckpointStore,
    {
        let configuration = BackfillConfiguration {
            contract: self.contract.clone(),
            from_block,
            to_block,
            chunk_size: 2,
            confirmation_depth: 1,
        };
        let checkpoint = CheckpointManager::new(
            checkpoint,
            self.contract.clone(),
            self.lease("backfill", Duration::from_secs(1)),
        );

        Backfill::new(
            self.client(),
            Dispatcher::new(store),
            checkpoint,
            configuration,
        )
    }
}

/// Runs the live loop until it indexed every confirmed block.
pub async fn run_live<S: ProjectionStore>(
    harness: &Harness,
    store: S,
    checkpoint: InMemoryCheckpoint,
) {
    let ending_block = harness.safe_head().await;
    harness
        .live(store, checkpoint, ending_block)
        .run(CancellationToken::new())
        .await
        .unwrap();
}

/// Project with a goal of 1.0 that received a 0.2 pledge and paid a 0.05 milestone.
pub fn released_milestone_chain() -> LocalChain {
    let mut chain = new_chain();
    let deadline = chain.now() + DAY;

    chain
        .execute(&creator(), |ledger, ctx| {
            ledger.create_project(ctx, native("1.0"), deadline)
        })
        .unwrap();
    chain
        .execute(&backer1(), |ledger, ctx| ledger.pledge(ctx, 0, native("0.2")))
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
    chain.mine_empty(1);

    chain
}

/// Project with a goal of 1.0 that received 0.1 and was refunded after its deadline.
pub fn refunded_project_chain() -> LocalChain {
    let mut chain = new_chain();
    let deadline = chain.now() + DAY;

    chain
        .execute(&creator(), |ledger, ctx| {
            ledger.create_project(ctx, native("1.0"), deadline)
        })
        .unwrap();
    chain
        .execute(&backer1(), |ledger, ctx| ledger.pledge(ctx, 0, native("0.1")))
        .unwrap();
    chain.advance_time(2 * DAY);
    chain
        .execute(&backer1(), |ledger, ctx| ledger.request_refund(ctx, 0))
        .unwrap();
    chain.mine_empty(1);

    chain
}
