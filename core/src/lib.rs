//! Core types of the escrow ledger: amounts, identifiers, statuses and events.
mod address;
mod amount;
pub mod decode;
pub mod event;
mod status;

pub use self::address::{Address, HexIdError, TxHash};
pub use self::amount::{Amount, AmountParseError, NATIVE_DECIMALS};
pub use self::decode::{decode_event, DecodeError};
pub use self::event::{
    EventEnvelope, EventKind, LedgerEvent, MilestoneId, ProjectId, RawEvent, UnknownEventKind,
};
pub use self::status::{
    CloseReason, MilestoneStatus, PledgeStatus, ProjectStatus, UnknownStatusError,
};
