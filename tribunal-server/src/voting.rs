//! Quorum voting engine.
//!
//! Ballots are an append-only log; the outcome is computed by a pure
//! reducer over that log, so a closed judgment can always be replayed and
//! audited. Closing requires the configured quorum of ballots present
//! (abstentions count toward presence, not toward the tally); ties resolve
//! to `Dismissed`, the status-quo-preserving default.

use chrono::{DateTime, Utc};

use tribunal_core::ids::{Instance, MemberId, Outcome, VoteValue};

use crate::error::DomainError;
use crate::machine::state::{Ballot, Case, Judgment};

/// Vote counts reduced from a ballot log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub upheld: usize,
    pub dismissed: usize,
    pub abstentions: usize,
}

impl Tally {
    /// Ballots that count toward the Upheld/Dismissed decision.
    pub fn non_abstaining(&self) -> usize {
        self.upheld + self.dismissed
    }

    /// Ballots that count toward quorum presence, abstentions included.
    pub fn present(&self) -> usize {
        self.upheld + self.dismissed + self.abstentions
    }

    /// Deterministic outcome: Upheld only on a strict majority of the
    /// non-abstaining ballots; ties preserve the status quo.
    pub fn outcome(&self) -> Outcome {
        if self.upheld > self.dismissed {
            Outcome::Upheld
        } else {
            Outcome::Dismissed
        }
    }
}

/// Pure reducer from the ballot log to vote counts.
pub fn tally(ballots: &[Ballot]) -> Tally {
    ballots.iter().fold(Tally::default(), |mut acc, ballot| {
        match ballot.vote {
            VoteValue::Upheld => acc.upheld += 1,
            VoteValue::Dismissed => acc.dismissed += 1,
            VoteValue::Abstain => acc.abstentions += 1,
        }
        acc
    })
}

/// Open a judgment round for a case at the given instance.
///
/// Sequencing rules: at most one judgment per (case, instance); a
/// second-instance round requires a closed first-instance judgment and an
/// appeal on record.
pub fn open_judgment(
    case: &Case,
    instance: Instance,
    rapporteur: MemberId,
    opinion: String,
) -> Result<Judgment, DomainError> {
    if case.judgment(instance).is_some() {
        return Err(DomainError::DuplicateInstance(instance));
    }

    if instance == Instance::Second {
        match case.judgment(Instance::First) {
            Some(first) if first.is_closed() => {}
            _ => {
                return Err(DomainError::InvalidSequencing(
                    "no closed first-instance judgment on record",
                ))
            }
        }
        if case.appeal.is_none() {
            return Err(DomainError::InvalidSequencing(
                "no appeal on record for a second-instance judgment",
            ));
        }
    }

    if opinion.trim().is_empty() {
        return Err(DomainError::Validation(
            "rapporteur opinion must not be empty".to_string(),
        ));
    }

    Ok(Judgment {
        instance,
        rapporteur,
        opinion,
        ballots: Vec::new(),
        outcome: None,
        ruled_at: None,
    })
}

/// Append one panel member's ballot to an open judgment.
pub fn cast_ballot(
    judgment: &mut Judgment,
    member: MemberId,
    vote: VoteValue,
) -> Result<(), DomainError> {
    if judgment.is_closed() {
        return Err(DomainError::JudgmentClosed);
    }
    if judgment.ballots.iter().any(|b| b.member == member) {
        return Err(DomainError::DuplicateBallot(member));
    }
    judgment.ballots.push(Ballot { member, vote });
    Ok(())
}

/// Close the round: enforce quorum, compute and freeze the outcome.
///
/// On `QuorumNotMet` the judgment stays open and its ballots untouched.
pub fn close_judgment(
    judgment: &mut Judgment,
    quorum: usize,
    now: DateTime<Utc>,
) -> Result<Outcome, DomainError> {
    if judgment.is_closed() {
        return Err(DomainError::JudgmentClosed);
    }

    let counts = tally(&judgment.ballots);
    if counts.present() < quorum {
        return Err(DomainError::QuorumNotMet {
            present: counts.present(),
            required: quorum,
        });
    }

    let outcome = counts.outcome();
    if counts.upheld == counts.dismissed {
        // The tie-break must be visible in the ruling itself.
        judgment
            .opinion
            .push_str("\n\nTied panel vote; the petition is dismissed, preserving the status quo.");
    }
    judgment.outcome = Some(outcome);
    judgment.ruled_at = Some(now);
    Ok(outcome)
}
