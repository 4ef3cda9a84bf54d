//! Lifecycle statuses shared by the ledger and the projection.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status: {value}")]
pub struct UnknownStatusError {
    kind: &'static str,
    value: String,
}

macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($variant:ident => $str:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(UnknownStatusError {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

status_enum!(
    /// Project lifecycle: `funding -> active -> closed`.
    ProjectStatus, "project", {
        Funding => "funding",
        Active => "active",
        Closed => "closed",
    }
);

status_enum!(
    /// Milestone lifecycle: `pending -> voting -> {approved, rejected} -> paid`.
    MilestoneStatus, "milestone", {
        Pending => "pending",
        Voting => "voting",
        Approved => "approved",
        Rejected => "rejected",
        Paid => "paid",
    }
);

status_enum!(
    PledgeStatus, "pledge", {
        Active => "active",
        Refunded => "refunded",
    }
);

status_enum!(
    /// Why a project was closed.
    CloseReason, "close reason", {
        Completed => "completed",
        Refunded => "refunded",
    }
);

impl MilestoneStatus {
    /// Position in the lifecycle. `approved` and `rejected` share a rank.
    pub fn rank(&self) -> u8 {
        match self {
            MilestoneStatus::Pending => 0,
            MilestoneStatus::Voting => 1,
            MilestoneStatus::Approved | MilestoneStatus::Rejected => 2,
            MilestoneStatus::Paid => 3,
        }
    }

    /// Whether the milestone still accepts votes.
    pub fn is_open_for_votes(&self) -> bool {
        matches!(self, MilestoneStatus::Pending | MilestoneStatus::Voting)
    }
}

#[cfg(test)]
mod tests {
    use super::{MilestoneStatus, ProjectStatus};

    #[test]
    fn test_milestone_rank_is_monotonic() {
        let flow = [
            MilestoneStatus::Pending,
            MilestoneStatus::Voting,
            MilestoneStatus::Approved,
            MilestoneStatus::Paid,
        ];
        for pair in flow.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
        assert_eq!(
            MilestoneStatus::Approved.rank(),
            MilestoneStatus::Rejected.rank()
        );
    }

    #[test]
    fn test_status_strings() {
        assert_eq!("voting".parse::<MilestoneStatus>().unwrap(), MilestoneStatus::Voting);
        assert_eq!(ProjectStatus::Closed.to_string(), "closed");
        assert!("open".parse::<ProjectStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&MilestoneStatus::Paid).unwrap(),
            r#""paid""#
        );
    }
}
