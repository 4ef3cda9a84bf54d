use escrow_core::{MilestoneId, ProjectId};

/// A ledger operation was rejected.
///
/// The display string is the revert reason reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Goal must be > 0")]
    ZeroGoal,
    #[error("Deadline must be future")]
    DeadlineNotInFuture,
    #[error("Unknown project")]
    UnknownProject(ProjectId),
    #[error("Unknown milestone")]
    UnknownMilestone(ProjectId, MilestoneId),
    #[error("Funding ended")]
    FundingEnded,
    #[error("Pledge must be > 0")]
    ZeroPledge,
    #[error("Not creator")]
    NotCreator,
    #[error("Amount > 0")]
    ZeroMilestoneAmount,
    #[error("Project closed")]
    ProjectClosed,
    #[error("Already activated")]
    AlreadyActivated,
    #[error("Invalid milestone status")]
    InvalidMilestoneStatus,
    #[error("Voting closed")]
    VotingClosed,
    #[error("Not backer")]
    NotBacker,
    #[error("Governance: already voted")]
    AlreadyVoted,
    #[error("Already released")]
    AlreadyReleased,
    #[error("Not approved")]
    NotApproved,
    #[error("Insufficient escrow")]
    InsufficientEscrow,
    #[error("Not ended")]
    NotEnded,
    #[error("Goal reached")]
    GoalReached,
    #[error("Nothing pledged")]
    NothingPledged,
    #[error("Not owner")]
    NotOwner,
    #[error("Fee too high")]
    FeeTooHigh,
    #[error("Arithmetic overflow")]
    Overflow,
}
