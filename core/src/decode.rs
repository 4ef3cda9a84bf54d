//! Decode raw node events into typed ledger events.

use serde::de::DeserializeOwned;

use crate::{
    event::{
        FundsReleased, MilestoneActivated, MilestoneSubmitted, PledgeMade, ProjectClosed,
        ProjectCreated, RefundIssued, VoteCast, VotingClosed, VotingStarted,
    },
    EventEnvelope, EventKind, HexIdError, LedgerEvent, RawEvent, TxHash,
};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("invalid arguments for event {event}")]
    InvalidArgs {
        event: EventKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid transaction hash")]
    InvalidTxHash(#[from] HexIdError),
}

fn args<T: DeserializeOwned>(kind: EventKind, raw: &RawEvent) -> Result<T, DecodeError> {
    T::deserialize(&raw.args).map_err(|source| DecodeError::InvalidArgs {
        event: kind,
        source,
    })
}

/// Decodes a raw event, validating its name, arguments and transaction hash.
pub fn decode_event(raw: &RawEvent) -> Result<EventEnvelope, DecodeError> {
    let kind: EventKind = raw
        .event
        .parse()
        .map_err(|_| DecodeError::UnknownEvent(raw.event.clone()))?;

    let event = match kind {
        EventKind::ProjectCreated => {
            LedgerEvent::ProjectCreated(args::<ProjectCreated>(kind, raw)?)
        }
        EventKind::PledgeMade => LedgerEvent::PledgeMade(args::<PledgeMade>(kind, raw)?),
        EventKind::MilestoneSubmitted => {
            LedgerEvent::MilestoneSubmitted(args::<MilestoneSubmitted>(kind, raw)?)
        }
        EventKind::MilestoneActivated => {
            LedgerEvent::MilestoneActivated(args::<MilestoneActivated>(kind, raw)?)
        }
        EventKind::VotingStarted => {
            LedgerEvent::VotingStarted(args::<VotingStarted>(kind, raw)?)
        }
        EventKind::VoteCast => LedgerEvent::VoteCast(args::<VoteCast>(kind, raw)?),
        EventKind::VotingClosed => LedgerEvent::VotingClosed(args::<VotingClosed>(kind, raw)?),
        EventKind::FundsReleased => {
            LedgerEvent::FundsReleased(args::<FundsReleased>(kind, raw)?)
        }
        EventKind::RefundIssued => LedgerEvent::RefundIssued(args::<RefundIssued>(kind, raw)?),
        EventKind::ProjectClosed => {
            LedgerEvent::ProjectClosed(args::<ProjectClosed>(kind, raw)?)
        }
    };

    let tx_hash: TxHash = raw.transaction_hash.parse()?;

    Ok(EventEnvelope {
        block_number: raw.block_number,
        tx_hash,
        log_index: raw.log_index,
        event,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::{decode_event, DecodeError};
    use crate::{
        event::PledgeMade, Address, Amount, EventKind, LedgerEvent, RawEvent, TxHash,
    };

    fn raw(event: &str, args: serde_json::Value) -> RawEvent {
        RawEvent {
            block_number: 7,
            transaction_hash: TxHash::from_low_u64_be(7).to_string(),
            log_index: 0,
            event: event.to_string(),
            args,
        }
    }

    #[test]
    fn test_decode_pledge() {
        let backer = Address::from_low_u64_be(2);
        let raw = raw(
            "PledgeMade",
            json!({ "projectId": 0, "backer": backer.as_str(), "amount": "200000000000000000" }),
        );

        let envelope = decode_event(&raw).unwrap();
        assert_eq!(envelope.block_number, 7);
        assert_eq!(envelope.event.kind(), EventKind::PledgeMade);
        assert_eq!(
            envelope.event,
            LedgerEvent::PledgeMade(PledgeMade {
                project_id: 0,
                backer,
                amount: Amount::from_native("0.2").unwrap(),
            })
        );

        let back = envelope.to_raw().unwrap();
        assert_eq!(back.args, raw.args);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert_matches!(
            decode_event(&raw("Transfer", json!({}))),
            Err(DecodeError::UnknownEvent(name)) if name == "Transfer"
        );

        assert_matches!(
            decode_event(&raw("PledgeMade", json!({ "projectId": 0 }))),
            Err(DecodeError::InvalidArgs {
                event: EventKind::PledgeMade,
                ..
            })
        );

        let mut bad_hash = raw(
            "MilestoneActivated",
            json!({ "projectId": 0, "milestoneId": 0 }),
        );
        bad_hash.transaction_hash = "0x1234".to_string();
        assert_matches!(decode_event(&bad_hash), Err(DecodeError::InvalidTxHash(_)));
    }
}
