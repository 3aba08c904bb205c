//! Filed state transitions.

use chrono::{DateTime, Utc};

use tribunal_core::notify::CaseEvent;

use super::{illegal, TransitionResult};
use crate::error::DomainError;
use crate::machine::command::Command;
use crate::machine::effect::Effect;
use crate::machine::state::{Case, CaseState};

/// Handle transitions from the Filed state.
///
/// A petition sits in Filed only between registry creation and the
/// orchestrator opening the defense period; cancellation is the only other
/// legal command.
pub fn handle(
    case: &Case,
    command: &Command,
    now: DateTime<Utc>,
) -> Result<TransitionResult, DomainError> {
    match command {
        Command::OpenDefenseWindow => Ok(TransitionResult::new(
            CaseState::DefenseWindow { opened_at: now },
            vec![Effect::Notify(CaseEvent::PetitionFiled {
                protocol: case.protocol.clone(),
                kind: case.kind,
            })],
        )),

        Command::Cancel { requested_by } => Ok(TransitionResult::new(
            CaseState::Cancelled {
                cancelled_by: requested_by.clone(),
                cancelled_at: now,
            },
            vec![Effect::Notify(CaseEvent::CaseCancelled {
                protocol: case.protocol.clone(),
            })],
        )),

        _ => Err(illegal(case, command)),
    }
}

#[cfg(test)]
mod tests {
    use tribunal_core::ids::MemberId;

    use super::super::test_support::{filed_at, test_case};
    use super::*;

    #[test]
    fn test_open_defense_window() {
        let case = test_case();
        let result = handle(&case, &Command::OpenDefenseWindow, filed_at()).unwrap();
        assert_eq!(
            result.state,
            CaseState::DefenseWindow {
                opened_at: filed_at()
            }
        );
        assert_eq!(result.effects.len(), 1);
    }

    #[test]
    fn test_cancel_from_filed() {
        let case = test_case();
        let command = Command::Cancel {
            requested_by: MemberId::from("filer-1"),
        };
        let result = handle(&case, &command, filed_at()).unwrap();
        assert!(matches!(result.state, CaseState::Cancelled { .. }));
    }

    #[test]
    fn test_defense_submission_is_illegal_before_window_opens() {
        let case = test_case();
        let command = Command::SubmitDefense {
            author: MemberId::from("d-1"),
            text: "early".to_string(),
        };
        let result = handle(&case, &command, filed_at());
        assert!(matches!(
            result,
            Err(DomainError::IllegalTransition {
                state: "filed",
                command: "submit_defense"
            })
        ));
    }
}
