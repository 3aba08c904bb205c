//! Typed domain errors.
//!
//! Every orchestrator operation returns either a case snapshot or one of
//! these errors. Nothing is swallowed: collaborator failures surface as
//! `DependencyUnavailable`, business-rule violations keep their own
//! variants, and the caller decides which kinds are worth retrying.

use std::fmt;

use tribunal_core::ids::{Instance, MemberId};

use crate::evidence::EvidenceViolation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input failed shape validation (missing field, empty text, ...).
    Validation(String),
    /// The subject of the petition does not resolve in the directory.
    InvalidSubject(MemberId),
    /// A filer/rapporteur/panel-member reference does not resolve.
    UnknownMember(MemberId),
    /// Evidence failed the configured policy; the item was not attached.
    EvidenceRejected(EvidenceViolation),
    /// The command is not legal in the case's current state.
    IllegalTransition {
        state: &'static str,
        command: &'static str,
    },
    /// A second-instance judgment was attempted before the first-instance
    /// outcome was recorded or before an appeal was filed.
    InvalidSequencing(&'static str),
    /// A judgment already exists for this (case, instance) pair.
    DuplicateInstance(Instance),
    /// The panel member already voted in this judgment.
    DuplicateBallot(MemberId),
    /// The judgment round was already finalized.
    JudgmentClosed,
    /// A counter-argument was already filed for this appeal.
    DuplicateCounterArgument,
    /// The configured filing window has lapsed.
    DeadlineExpired { window: &'static str },
    /// Fewer ballots cast than the configured quorum. Abstentions count
    /// toward presence, not toward the tally.
    QuorumNotMet { present: usize, required: usize },
    /// A concurrent command won the version race; retry the whole command.
    ConcurrentModification,
    /// Unknown protocol/judgment/appeal reference.
    NotFound(String),
    /// A required collaborator (directory, evidence store, case store) was
    /// unreachable. Notification failures are never mapped here.
    DependencyUnavailable {
        dependency: &'static str,
        detail: String,
    },
}

impl DomainError {
    /// Stable machine-readable kind, used by the HTTP layer and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation",
            DomainError::InvalidSubject(_) => "invalid_subject",
            DomainError::UnknownMember(_) => "unknown_member",
            DomainError::EvidenceRejected(_) => "evidence_rejected",
            DomainError::IllegalTransition { .. } => "illegal_transition",
            DomainError::InvalidSequencing(_) => "invalid_sequencing",
            DomainError::DuplicateInstance(_) => "duplicate_instance",
            DomainError::DuplicateBallot(_) => "duplicate_ballot",
            DomainError::JudgmentClosed => "judgment_closed",
            DomainError::DuplicateCounterArgument => "duplicate_counter_argument",
            DomainError::DeadlineExpired { .. } => "deadline_expired",
            DomainError::QuorumNotMet { .. } => "quorum_not_met",
            DomainError::ConcurrentModification => "concurrent_modification",
            DomainError::NotFound(_) => "not_found",
            DomainError::DependencyUnavailable { .. } => "dependency_unavailable",
        }
    }

    /// True for the kinds a caller should retry verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::ConcurrentModification | DomainError::DependencyUnavailable { .. }
        )
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::Validation(message) => write!(f, "invalid input: {message}"),
            DomainError::InvalidSubject(member) => {
                write!(f, "subject {member} does not exist in the member directory")
            }
            DomainError::UnknownMember(member) => {
                write!(f, "member {member} does not resolve in the directory")
            }
            DomainError::EvidenceRejected(violation) => {
                write!(f, "evidence rejected: {violation}")
            }
            DomainError::IllegalTransition { state, command } => {
                write!(f, "command {command} is not legal in state {state}")
            }
            DomainError::InvalidSequencing(reason) => {
                write!(f, "invalid judgment sequencing: {reason}")
            }
            DomainError::DuplicateInstance(instance) => {
                write!(f, "a judgment already exists for instance {instance}")
            }
            DomainError::DuplicateBallot(member) => {
                write!(f, "panel member {member} already voted in this judgment")
            }
            DomainError::JudgmentClosed => f.write_str("the judgment round is already closed"),
            DomainError::DuplicateCounterArgument => {
                f.write_str("a counter-argument was already filed for this appeal")
            }
            DomainError::DeadlineExpired { window } => {
                write!(f, "the {window} window has expired")
            }
            DomainError::QuorumNotMet { present, required } => write!(
                f,
                "quorum not met: {present} ballots cast, {required} required"
            ),
            DomainError::ConcurrentModification => {
                f.write_str("the case was modified concurrently; retry the command")
            }
            DomainError::NotFound(what) => write!(f, "not found: {what}"),
            DomainError::DependencyUnavailable { dependency, detail } => {
                write!(f, "{dependency} unavailable: {detail}")
            }
        }
    }
}

impl std::error::Error for DomainError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(DomainError::ConcurrentModification.is_retryable());
        assert!(DomainError::DependencyUnavailable {
            dependency: "directory",
            detail: "timeout".to_string(),
        }
        .is_retryable());
        assert!(!DomainError::JudgmentClosed.is_retryable());
        assert!(!DomainError::QuorumNotMet {
            present: 2,
            required: 3
        }
        .is_retryable());
    }
}
