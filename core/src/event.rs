//! Events emitted by the escrow ledger.
//!
//! Every state transition of the ledger emits exactly one of these events. The
//! indexer consumes them, in ledger order, to rebuild its projection.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Address, Amount, CloseReason, TxHash};

pub type ProjectId = u64;
pub type MilestoneId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCreated {
    pub project_id: ProjectId,
    pub creator: Address,
    pub funding_goal: Amount,
    /// Unix timestamp, in seconds.
    pub deadline: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PledgeMade {
    pub project_id: ProjectId,
    pub backer: Address,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneSubmitted {
    pub project_id: ProjectId,
    pub milestone_id: MilestoneId,
    pub title: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneActivated {
    pub project_id: ProjectId,
    pub milestone_id: MilestoneId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingStarted {
    pub project_id: ProjectId,
    pub milestone_id: MilestoneId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCast {
    pub project_id: ProjectId,
    pub milestone_id: MilestoneId,
    pub backer: Address,
    pub approve: bool,
    pub weight: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingClosed {
    pub project_id: ProjectId,
    pub milestone_id: MilestoneId,
    pub approved: bool,
    pub approve_weight: Amount,
    pub reject_weight: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundsReleased {
    pub project_id: ProjectId,
    pub milestone_id: MilestoneId,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundIssued {
    pub project_id: ProjectId,
    pub backer: Address,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectClosed {
    pub project_id: ProjectId,
    pub reason: CloseReason,
}

/// A decoded ledger event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    ProjectCreated(ProjectCreated),
    PledgeMade(PledgeMade),
    MilestoneSubmitted(MilestoneSubmitted),
    MilestoneActivated(MilestoneActivated),
    VotingStarted(VotingStarted),
    VoteCast(VoteCast),
    VotingClosed(VotingClosed),
    FundsReleased(FundsReleased),
    RefundIssued(RefundIssued),
    ProjectClosed(ProjectClosed),
}

/// The kind of a [LedgerEvent], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ProjectCreated,
    PledgeMade,
    MilestoneSubmitted,
    MilestoneActivated,
    VotingStarted,
    VoteCast,
    VotingClosed,
    FundsReleased,
    RefundIssued,
    ProjectClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl EventKind {
    /// All event kinds, parents before children.
    ///
    /// Replaying kinds in this order means an event's parent rows are already
    /// projected when the event is applied.
    pub const ALL: [EventKind; 10] = [
        EventKind::ProjectCreated,
        EventKind::PledgeMade,
        EventKind::MilestoneSubmitted,
        EventKind::MilestoneActivated,
        EventKind::VotingStarted,
        EventKind::VoteCast,
        EventKind::VotingClosed,
        EventKind::FundsReleased,
        EventKind::RefundIssued,
        EventKind::ProjectClosed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProjectCreated => "ProjectCreated",
            EventKind::PledgeMade => "PledgeMade",
            EventKind::MilestoneSubmitted => "MilestoneSubmitted",
            EventKind::MilestoneActivated => "MilestoneActivated",
            EventKind::VotingStarted => "VotingStarted",
            EventKind::VoteCast => "VoteCast",
            EventKind::VotingClosed => "VotingClosed",
            EventKind::FundsReleased => "FundsReleased",
            EventKind::RefundIssued => "RefundIssued",
            EventKind::ProjectClosed => "ProjectClosed",
        }
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LedgerEvent::ProjectCreated(_) => EventKind::ProjectCreated,
            LedgerEvent::PledgeMade(_) => EventKind::PledgeMade,
            LedgerEvent::MilestoneSubmitted(_) => EventKind::MilestoneSubmitted,
            LedgerEvent::MilestoneActivated(_) => EventKind::MilestoneActivated,
            LedgerEvent::VotingStarted(_) => EventKind::VotingStarted,
            LedgerEvent::VoteCast(_) => EventKind::VoteCast,
            LedgerEvent::VotingClosed(_) => EventKind::VotingClosed,
            LedgerEvent::FundsReleased(_) => EventKind::FundsReleased,
            LedgerEvent::RefundIssued(_) => EventKind::RefundIssued,
            LedgerEvent::ProjectClosed(_) => EventKind::ProjectClosed,
        }
    }

    /// Serializes the event payload to its wire representation.
    pub fn args(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            LedgerEvent::ProjectCreated(ev) => serde_json::to_value(ev),
            LedgerEvent::PledgeMade(ev) => serde_json::to_value(ev),
            LedgerEvent::MilestoneSubmitted(ev) => serde_json::to_value(ev),
            LedgerEvent::MilestoneActivated(ev) => serde_json::to_value(ev),
            LedgerEvent::VotingStarted(ev) => serde_json::to_value(ev),
            LedgerEvent::VoteCast(ev) => serde_json::to_value(ev),
            LedgerEvent::VotingClosed(ev) => serde_json::to_value(ev),
            LedgerEvent::FundsReleased(ev) => serde_json::to_value(ev),
            LedgerEvent::RefundIssued(ev) => serde_json::to_value(ev),
            LedgerEvent::ProjectClosed(ev) => serde_json::to_value(ev),
        }
    }
}

/// A decoded event together with its position in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    pub block_number: u64,
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub event: LedgerEvent,
}

impl EventEnvelope {
    pub fn to_raw(&self) -> Result<RawEvent, serde_json::Error> {
        Ok(RawEvent {
            block_number: self.block_number,
            transaction_hash: self.tx_hash.to_string(),
            log_index: self.log_index,
            event: self.event.kind().as_str().to_string(),
            args: self.event.args()?,
        })
    }
}

/// An event as returned by the ledger node, before decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u32,
    pub event: String,
    #[serde(default)]
    pub args: serde_json::Value,
}
