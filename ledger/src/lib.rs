//! Milestone escrow ledger.
//!
//! [EscrowLedger] holds pledged funds and releases them to project creators,
//! one milestone at a time, after a vote weighted by the backers' pledges.
//! [LocalChain] runs the ledger in-process and records its events in blocks.
mod chain;
mod error;
mod ledger;

pub use self::chain::{Block, LocalChain, Receipt, LOCAL_CONTRACT_ADDRESS};
pub use self::error::ProtocolError;
pub use self::ledger::{
    CallContext, EscrowLedger, Milestone, Project, DEFAULT_PLATFORM_FEE_BPS,
    MAX_PLATFORM_FEE_BPS,
};
