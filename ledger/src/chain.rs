//! An in-process chain that mines one block per transaction.
use escrow_core::{Address, EventEnvelope, EventKind, LedgerEvent, TxHash};
use tracing::debug;

use crate::{
    error::ProtocolError,
    ledger::{CallContext, EscrowLedger},
};

/// Address the local chain reports for the escrow contract.
pub const LOCAL_CONTRACT_ADDRESS: u64 = 0xe5c0;

#[derive(Debug, Clone)]
pub struct Block {
    pub number: u64,
    pub timestamp: u64,
    pub events: Vec<EventEnvelope>,
}

/// Result of a successful transaction.
#[derive(Debug, Clone)]
pub struct Receipt<T> {
    pub block_number: u64,
    pub tx_hash: TxHash,
    pub value: T,
}

/// Wraps an [EscrowLedger] with a block clock.
///
/// Every successful call mines a new block one second after the previous one and
/// stamps the events it emitted with the block number, a deterministic
/// transaction hash and their log index. Rejected calls mine nothing.
#[derive(Debug, Clone)]
pub struct LocalChain {
    address: Address,
    ledger: EscrowLedger,
    blocks: Vec<Block>,
    now: u64,
    tx_count: u64,
}

impl LocalChain {
    /// Creates a chain with a genesis block at `genesis_timestamp`.
    pub fn new(owner: Address, treasury: Address, genesis_timestamp: u64) -> Self {
        let genesis = Block {
            number: 0,
            timestamp: genesis_timestamp,
            events: Vec::new(),
        };

        LocalChain {
            address: Address::from_low_u64_be(LOCAL_CONTRACT_ADDRESS),
            ledger: EscrowLedger::new(owner, treasury),
            blocks: vec![genesis],
            now: genesis_timestamp,
            tx_count: 0,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn ledger(&self) -> &EscrowLedger {
        &self.ledger
    }

    /// Latest mined block number.
    pub fn head(&self) -> u64 {
        self.blocks.len() as u64 - 1
    }

    /// Timestamp of the latest block, or later if time was advanced.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Runs `call` as `caller` in a new block.
    pub fn execute<T>(
        &mut self,
        caller: &Address,
        call: impl FnOnce(&mut EscrowLedger, &CallContext) -> Result<T, ProtocolError>,
    ) -> Result<Receipt<T>, ProtocolError> {
        let ctx = CallContext {
            caller: caller.clone(),
            timestamp: self.now + 1,
        };

        let value = match call(&mut self.ledger, &ctx) {
            Ok(value) => value,
            Err(err) => {
                self.ledger.take_events();
                debug!(caller = %caller, err = %err, "transaction reverted");
                return Err(err);
            }
        };

        self.tx_count += 1;
        let tx_hash = TxHash::from_low_u64_be(self.tx_count);
        let events = self.ledger.take_events();
        let block_number = self.mine(ctx.timestamp, Some(&tx_hash), events);

        Ok(Receipt {
            block_number,
            tx_hash,
            value,
        })
    }

    /// Moves the clock forward without mining.
    pub fn advance_time(&mut self, seconds: u64) {
        self.now += seconds;
    }

    /// Mines `count` blocks without transactions.
    pub fn mine_empty(&mut self, count: u64) {
        for _ in 0..count {
            let timestamp = self.now + 1;
            self.mine(timestamp, None, Vec::new());
        }
    }

    /// Events in blocks `from..=to`, in ledger order, optionally restricted to `kinds`.
    pub fn events(&self, from: u64, to: u64, kinds: &[EventKind]) -> Vec<EventEnvelope> {
        self.blocks
            .iter()
            .filter(|block| block.number >= from && block.number <= to)
            .flat_map(|block| block.events.iter())
            .filter(|envelope| kinds.is_empty() || kinds.contains(&envelope.event.kind()))
            .cloned()
            .collect()
    }

    pub fn block(&self, number: u64) -> Option<&Block> {
        self.blocks.get(number as usize)
    }

    fn mine(&mut self, timestamp: u64, tx_hash: Option<&TxHash>, events: Vec<LedgerEvent>) -> u64 {
        let number = self.blocks.len() as u64;
        let events: Vec<_> = match tx_hash {
            None => Vec::new(),
            Some(tx_hash) => events
                .into_iter()
                .enumerate()
                .map(|(log_index, event)| EventEnvelope {
                    block_number: number,
                    tx_hash: tx_hash.clone(),
                    log_index: log_index as u32,
                    event,
                })
                .collect(),
        };

        debug!(block = number, events = events.len(), "mined block");

        self.now = timestamp;
        self.blocks.push(Block {
            number,
            timestamp,
            events,
        });

        number
    }
}

#[cfg(test)]
mod tests {
    use escrow_core::{Address, Amount, EventKind};

    use super::LocalChain;
    use crate::error::ProtocolError;

    #[test]
    fn test_one_block_per_transaction() {
        let owner = Address::from_low_u64_be(1);
        let backer = Address::from_low_u64_be(2);
        let mut chain = LocalChain::new(owner.clone(), owner.clone(), 1_000);
        assert_eq!(chain.head(), 0);

        let deadline = chain.now() + 100;
        let created = chain
            .execute(&owner, |ledger, ctx| {
                ledger.create_project(ctx, Amount::from_units(10), deadline)
            })
            .unwrap();
        assert_eq!(created.block_number, 1);
        assert_eq!(created.value, 0);

        let rejected = chain.execute(&backer, |ledger, ctx| ledger.pledge(ctx, 0, Amount::ZERO));
        assert_eq!(rejected.unwrap_err(), ProtocolError::ZeroPledge);
        assert_eq!(chain.head(), 1);

        let pledged = chain
            .execute(&backer, |ledger, ctx| {
                ledger.pledge(ctx, 0, Amount::from_units(3))
            })
            .unwrap();
        assert_eq!(pledged.block_number, 2);
        assert_ne!(pledged.tx_hash, created.tx_hash);

        chain.mine_empty(3);
        assert_eq!(chain.head(), 5);

        let all = chain.events(0, chain.head(), &[]);
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].block_number, 2);
        assert_eq!(all[1].log_index, 0);

        let pledges = chain.events(2, 2, &[EventKind::PledgeMade]);
        assert_eq!(pledges.len(), 1);
        assert!(chain.events(3, 5, &[]).is_empty());
    }

    #[test]
    fn test_advance_time_moves_block_clock() {
        let owner = Address::from_low_u64_be(1);
        let mut chain = LocalChain::new(owner.clone(), owner.clone(), 1_000);
        let deadline = chain.now() + 10;
        chain
            .execute(&owner, |ledger, ctx| {
                ledger.create_project(ctx, Amount::from_units(10), deadline)
            })
            .unwrap();

        chain.advance_time(60);
        let late = chain.execute(&owner, |ledger, ctx| {
            ledger.pledge(ctx, 0, Amount::from_units(1))
        });
        assert_eq!(late.unwrap_err(), ProtocolError::FundingEnded);
        assert_eq!(chain.block(1).unwrap().timestamp, 1_001);
    }
}
