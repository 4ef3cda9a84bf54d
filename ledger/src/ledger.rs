//! The escrow state machine.
use std::collections::{BTreeMap, BTreeSet};

use escrow_core::{
    event::{
        FundsReleased, MilestoneActivated, MilestoneSubmitted, PledgeMade, ProjectClosed,
        ProjectCreated, RefundIssued, VoteCast, VotingClosed, VotingStarted,
    },
    Address, Amount, CloseReason, LedgerEvent, MilestoneId, MilestoneStatus, ProjectId,
    ProjectStatus,
};

use crate::error::ProtocolError;

/// Platform fee applied to releases, in basis points, until the owner changes it.
pub const DEFAULT_PLATFORM_FEE_BPS: u16 = 250;

/// Largest accepted platform fee, in basis points.
pub const MAX_PLATFORM_FEE_BPS: u16 = 10_000;

/// Who calls an operation, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Address,
    /// Unix timestamp, in seconds.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    pub creator: Address,
    pub funding_goal: Amount,
    pub deadline: u64,
    pub total_pledged: Amount,
    /// Funds held for this project and not yet released or refunded.
    pub escrow: Amount,
    pub status: ProjectStatus,
    pub milestones: Vec<Milestone>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Milestone {
    pub id: MilestoneId,
    pub title: String,
    pub amount: Amount,
    pub status: MilestoneStatus,
    pub activated: bool,
    pub approve_weight: Amount,
    pub reject_weight: Amount,
}

/// Custodies pledges and releases them milestone by milestone.
///
/// Operations check every precondition before touching state, so a rejected
/// operation changes nothing and emits nothing.
#[derive(Debug, Clone)]
pub struct EscrowLedger {
    owner: Address,
    treasury: Address,
    fee_bps: u16,
    projects: Vec<Project>,
    pledges: BTreeMap<(ProjectId, Address), Amount>,
    votes: BTreeSet<(ProjectId, MilestoneId, Address)>,
    balances: BTreeMap<Address, Amount>,
    events: Vec<LedgerEvent>,
}

fn add(a: Amount, b: Amount) -> Result<Amount, ProtocolError> {
    a.checked_add(b).ok_or(ProtocolError::Overflow)
}

fn sub(a: Amount, b: Amount) -> Result<Amount, ProtocolError> {
    a.checked_sub(b).ok_or(ProtocolError::Overflow)
}

impl EscrowLedger {
    pub fn new(owner: Address, treasury: Address) -> Self {
        EscrowLedger {
            owner,
            treasury,
            fee_bps: DEFAULT_PLATFORM_FEE_BPS,
            projects: Vec::new(),
            pledges: BTreeMap::new(),
            votes: BTreeSet::new(),
            balances: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Drains the events emitted since the last call.
    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn create_project(
        &mut self,
        ctx: &CallContext,
        funding_goal: Amount,
        deadline: u64,
    ) -> Result<ProjectId, ProtocolError> {
        if funding_goal.is_zero() {
            return Err(ProtocolError::ZeroGoal);
        }
        if deadline <= ctx.timestamp {
            return Err(ProtocolError::DeadlineNotInFuture);
        }

        let project_id = self.projects.len() as ProjectId;
        self.projects.push(Project {
            id: project_id,
            creator: ctx.caller.clone(),
            funding_goal,
            deadline,
            total_pledged: Amount::ZERO,
            escrow: Amount::ZERO,
            status: ProjectStatus::Funding,
            milestones: Vec::new(),
        });

        self.events.push(LedgerEvent::ProjectCreated(ProjectCreated {
            project_id,
            creator: ctx.caller.clone(),
            funding_goal,
            deadline,
        }));

        Ok(project_id)
    }

    pub fn pledge(
        &mut self,
        ctx: &CallContext,
        project_id: ProjectId,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        let project = self.project_ref(project_id)?;
        if ctx.timestamp >= project.deadline {
            return Err(ProtocolError::FundingEnded);
        }
        if amount.is_zero() {
            return Err(ProtocolError::ZeroPledge);
        }

        let key = (project_id, ctx.caller.clone());
        let pledged = add(self.pledge_of(project_id, &ctx.caller), amount)?;
        let total_pledged = add(project.total_pledged, amount)?;
        let escrow = add(project.escrow, amount)?;

        self.pledges.insert(key, pledged);
        let project = self.project_mut(project_id)?;
        project.total_pledged = total_pledged;
        project.escrow = escrow;

        self.events.push(LedgerEvent::PledgeMade(PledgeMade {
            project_id,
            backer: ctx.caller.clone(),
            amount,
        }));

        Ok(())
    }

    pub fn submit_milestone(
        &mut self,
        ctx: &CallContext,
        project_id: ProjectId,
        title: impl Into<String>,
        amount: Amount,
    ) -> Result<MilestoneId, ProtocolError> {
        let project = self.project_ref(project_id)?;
        if project.creator != ctx.caller {
            return Err(ProtocolError::NotCreator);
        }
        if amount.is_zero() {
            return Err(ProtocolError::ZeroMilestoneAmount);
        }
        if project.status == ProjectStatus::Closed {
            return Err(ProtocolError::ProjectClosed);
        }

        let title = title.into();
        let project = self.project_mut(project_id)?;
        let milestone_id = project.milestones.len() as MilestoneId;
        project.milestones.push(Milestone {
            id: milestone_id,
            title: title.clone(),
            amount,
            status: MilestoneStatus::Pending,
            activated: false,
            approve_weight: Amount::ZERO,
            reject_weight: Amount::ZERO,
        });

        self.events.push(LedgerEvent::MilestoneSubmitted(MilestoneSubmitted {
            project_id,
            milestone_id,
            title,
            amount,
        }));

        Ok(milestone_id)
    }

    pub fn activate_milestone(
        &mut self,
        ctx: &CallContext,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<(), ProtocolError> {
        let milestone = self.creator_milestone(ctx, project_id, milestone_id)?;
        if milestone.activated {
            return Err(ProtocolError::AlreadyActivated);
        }
        if !milestone.status.is_open_for_votes() {
            return Err(ProtocolError::InvalidMilestoneStatus);
        }

        self.milestone_mut(project_id, milestone_id)?.activated = true;
        self.events.push(LedgerEvent::MilestoneActivated(MilestoneActivated {
            project_id,
            milestone_id,
        }));

        Ok(())
    }

    pub fn open_voting(
        &mut self,
        ctx: &CallContext,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<(), ProtocolError> {
        let milestone = self.creator_milestone(ctx, project_id, milestone_id)?;
        if milestone.status != MilestoneStatus::Pending {
            return Err(ProtocolError::InvalidMilestoneStatus);
        }

        self.milestone_mut(project_id, milestone_id)?.status = MilestoneStatus::Voting;
        self.events.push(LedgerEvent::VotingStarted(VotingStarted {
            project_id,
            milestone_id,
        }));

        Ok(())
    }

    /// Casts the caller's vote, weighted by the caller's pledge.
    ///
    /// Votes are accepted while the milestone is pending or voting.
    pub fn vote_on_milestone(
        &mut self,
        ctx: &CallContext,
        project_id: ProjectId,
        milestone_id: MilestoneId,
        approve: bool,
    ) -> Result<(), ProtocolError> {
        let milestone = self.milestone_ref(project_id, milestone_id)?;
        if !milestone.status.is_open_for_votes() {
            return Err(ProtocolError::VotingClosed);
        }

        let weight = self.pledge_of(project_id, &ctx.caller);
        if weight.is_zero() {
            return Err(ProtocolError::NotBacker);
        }

        let key = (project_id, milestone_id, ctx.caller.clone());
        if self.votes.contains(&key) {
            return Err(ProtocolError::AlreadyVoted);
        }

        let (approve_weight, reject_weight) = if approve {
            (add(milestone.approve_weight, weight)?, milestone.reject_weight)
        } else {
            (milestone.approve_weight, add(milestone.reject_weight, weight)?)
        };

        self.votes.insert(key);
        let milestone = self.milestone_mut(project_id, milestone_id)?;
        milestone.approve_weight = approve_weight;
        milestone.reject_weight = reject_weight;

        self.events.push(LedgerEvent::VoteCast(VoteCast {
            project_id,
            milestone_id,
            backer: ctx.caller.clone(),
            approve,
            weight,
        }));

        Ok(())
    }

    /// Ends voting on a milestone and records the result.
    pub fn close_voting(
        &mut self,
        ctx: &CallContext,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<bool, ProtocolError> {
        let milestone = self.creator_milestone(ctx, project_id, milestone_id)?;
        if milestone.status != MilestoneStatus::Voting {
            return Err(ProtocolError::InvalidMilestoneStatus);
        }

        let approve_weight = milestone.approve_weight;
        let reject_weight = milestone.reject_weight;
        let approved = approve_weight > reject_weight;

        self.milestone_mut(project_id, milestone_id)?.status = if approved {
            MilestoneStatus::Approved
        } else {
            MilestoneStatus::Rejected
        };

        self.events.push(LedgerEvent::VotingClosed(VotingClosed {
            project_id,
            milestone_id,
            approved,
            approve_weight,
            reject_weight,
        }));

        Ok(approved)
    }

    /// Pays a milestone to the creator, minus the platform fee.
    pub fn release_funds(
        &mut self,
        ctx: &CallContext,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<(), ProtocolError> {
        let milestone = self.creator_milestone(ctx, project_id, milestone_id)?;
        match milestone.status {
            MilestoneStatus::Paid => return Err(ProtocolError::AlreadyReleased),
            MilestoneStatus::Rejected => return Err(ProtocolError::NotApproved),
            _ if milestone.approve_weight <= milestone.reject_weight => {
                return Err(ProtocolError::NotApproved)
            }
            _ => {}
        }

        let amount = milestone.amount;
        let project = self.project_ref(project_id)?;
        if project.escrow < amount {
            return Err(ProtocolError::InsufficientEscrow);
        }

        let fee = amount.mul_bps(self.fee_bps);
        let payout = sub(amount, fee)?;
        let escrow = sub(project.escrow, amount)?;
        let creator = project.creator.clone();
        let creator_balance = add(self.balance_of(&creator), payout)?;
        let closes = ctx.timestamp >= project.deadline && escrow.is_zero();

        // Creator and treasury may be the same account.
        self.balances.insert(creator, creator_balance);
        let treasury_balance = add(self.balance_of(&self.treasury), fee)?;
        self.balances.insert(self.treasury.clone(), treasury_balance);

        let project = self.project_mut(project_id)?;
        project.escrow = escrow;
        if project.status == ProjectStatus::Funding {
            project.status = ProjectStatus::Active;
        }
        if closes {
            project.status = ProjectStatus::Closed;
        }
        self.milestone_mut(project_id, milestone_id)?.status = MilestoneStatus::Paid;

        self.events.push(LedgerEvent::FundsReleased(FundsReleased {
            project_id,
            milestone_id,
            amount,
        }));

        if closes {
            self.events.push(LedgerEvent::ProjectClosed(ProjectClosed {
                project_id,
                reason: CloseReason::Completed,
            }));
        }

        Ok(())
    }

    /// Returns the caller's whole pledge once a project failed its goal.
    pub fn request_refund(
        &mut self,
        ctx: &CallContext,
        project_id: ProjectId,
    ) -> Result<Amount, ProtocolError> {
        let project = self.project_ref(project_id)?;
        if ctx.timestamp < project.deadline {
            return Err(ProtocolError::NotEnded);
        }
        if project.total_pledged >= project.funding_goal {
            return Err(ProtocolError::GoalReached);
        }

        let amount = self.pledge_of(project_id, &ctx.caller);
        if amount.is_zero() {
            return Err(ProtocolError::NothingPledged);
        }
        if project.escrow < amount {
            return Err(ProtocolError::InsufficientEscrow);
        }

        let escrow = sub(project.escrow, amount)?;
        let total_pledged = sub(project.total_pledged, amount)?;
        let balance = add(self.balance_of(&ctx.caller), amount)?;
        let closes = escrow.is_zero();

        self.pledges.remove(&(project_id, ctx.caller.clone()));
        self.balances.insert(ctx.caller.clone(), balance);

        let project = self.project_mut(project_id)?;
        project.escrow = escrow;
        project.total_pledged = total_pledged;
        if closes {
            project.status = ProjectStatus::Closed;
        }

        self.events.push(LedgerEvent::RefundIssued(RefundIssued {
            project_id,
            backer: ctx.caller.clone(),
            amount,
        }));

        if closes {
            self.events.push(LedgerEvent::ProjectClosed(ProjectClosed {
                project_id,
                reason: CloseReason::Refunded,
            }));
        }

        Ok(amount)
    }

    pub fn set_platform_fee_bps(
        &mut self,
        ctx: &CallContext,
        bps: u16,
    ) -> Result<(), ProtocolError> {
        if ctx.caller != self.owner {
            return Err(ProtocolError::NotOwner);
        }
        if bps > MAX_PLATFORM_FEE_BPS {
            return Err(ProtocolError::FeeTooHigh);
        }
        self.fee_bps = bps;
        Ok(())
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn treasury(&self) -> &Address {
        &self.treasury
    }

    pub fn platform_fee_bps(&self) -> u16 {
        self.fee_bps
    }

    pub fn project(&self, project_id: ProjectId) -> Option<&Project> {
        self.projects.get(project_id as usize)
    }

    pub fn milestone(
        &self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Option<&Milestone> {
        self.project(project_id)
            .and_then(|project| project.milestones.get(milestone_id as usize))
    }

    /// Active pledge of `backer` in the project, zero after a refund.
    pub fn pledge_of(&self, project_id: ProjectId, backer: &Address) -> Amount {
        self.pledges
            .get(&(project_id, backer.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Approve and reject weights of a milestone.
    pub fn tally(
        &self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Option<(Amount, Amount)> {
        self.milestone(project_id, milestone_id)
            .map(|milestone| (milestone.approve_weight, milestone.reject_weight))
    }

    pub fn has_voted(
        &self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
        backer: &Address,
    ) -> bool {
        self.votes.contains(&(project_id, milestone_id, backer.clone()))
    }

    /// Funds paid out to `account` by releases and refunds.
    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or_default()
    }

    pub fn escrow_balance(&self, project_id: ProjectId) -> Amount {
        self.project(project_id)
            .map(|project| project.escrow)
            .unwrap_or_default()
    }

    fn project_ref(&self, project_id: ProjectId) -> Result<&Project, ProtocolError> {
        self.project(project_id)
            .ok_or(ProtocolError::UnknownProject(project_id))
    }

    fn project_mut(&mut self, project_id: ProjectId) -> Result<&mut Project, ProtocolError> {
        self.projects
            .get_mut(project_id as usize)
            .ok_or(ProtocolError::UnknownProject(project_id))
    }

    fn milestone_ref(
        &self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<&Milestone, ProtocolError> {
        self.project_ref(project_id)?
            .milestones
            .get(milestone_id as usize)
            .ok_or(ProtocolError::UnknownMilestone(project_id, milestone_id))
    }

    fn milestone_mut(
        &mut self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<&mut Milestone, ProtocolError> {
        self.project_mut(project_id)?
            .milestones
            .get_mut(milestone_id as usize)
            .ok_or(ProtocolError::UnknownMilestone(project_id, milestone_id))
    }

    /// Looks up a milestone on behalf of the project creator.
    fn creator_milestone(
        &self,
        ctx: &CallContext,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<&Milestone, ProtocolError> {
        let project = self.project_ref(project_id)?;
        if project.creator != ctx.caller {
            return Err(ProtocolError::NotCreator);
        }
        self.milestone_ref(project_id, milestone_id)
    }
}
