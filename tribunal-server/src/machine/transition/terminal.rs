//! Terminal state transitions (Final, Cancelled).
//!
//! Terminal states accept nothing. The only exception is the sweep's
//! expiry triggers, which no-op so a racing sweep tick against an
//! already-finalized case does not surface an error.

use super::{illegal, TransitionResult};
use crate::error::DomainError;
use crate::machine::command::Command;
use crate::machine::effect::{Effect, LogLevel};
use crate::machine::state::Case;

pub fn handle(case: &Case, command: &Command) -> Result<TransitionResult, DomainError> {
    match command {
        Command::ExpireDefenseWindow | Command::ExpireAppealWindow => {
            Ok(TransitionResult::no_change(
                case.state.clone(),
                vec![Effect::Log {
                    level: LogLevel::Debug,
                    message: format!(
                        "expiry sweep ignored for {} in terminal state {}",
                        case.protocol,
                        case.state.name()
                    ),
                }],
            ))
        }
        _ => Err(illegal(case, command)),
    }
}

#[cfg(test)]
mod tests {
    use tribunal_core::ids::{MemberId, Outcome};

    use super::super::test_support::test_case;
    use super::*;
    use crate::machine::state::CaseState;

    #[test]
    fn test_expiry_sweep_no_ops_on_final_case() {
        let mut case = test_case();
        case.state = CaseState::Final {
            outcome: Outcome::Dismissed,
        };
        let result = handle(&case, &Command::ExpireAppealWindow).unwrap();
        assert_eq!(result.state, case.state);
    }

    #[test]
    fn test_appeal_is_illegal_on_cancelled_case() {
        let mut case = test_case();
        case.state = CaseState::Cancelled {
            cancelled_by: MemberId::from("filer-1"),
            cancelled_at: chrono::Utc::now(),
        };
        let command = Command::FileAppeal {
            appellant: MemberId::from("a-1"),
            role: tribunal_core::ids::AppellantRole::Challenger,
            grounds: "gone".to_string(),
        };
        let result = handle(&case, &command);
        assert!(matches!(result, Err(DomainError::IllegalTransition { .. })));
    }
}
