//! Transitions for the two pending-judgment states.
//!
//! Both PendingFirstJudgment and PendingSecondJudgment accept exactly one
//! command: recording the closed judgment for the matching instance.
//! Cancellation is no longer legal once a ruling is pending.

use chrono::{DateTime, Utc};

use tribunal_core::ids::Instance;
use tribunal_core::notify::CaseEvent;

use super::{illegal, TransitionResult};
use crate::error::DomainError;
use crate::machine::command::Command;
use crate::machine::effect::Effect;
use crate::machine::state::{Case, CaseState};

pub fn handle(
    case: &Case,
    command: &Command,
    now: DateTime<Utc>,
) -> Result<TransitionResult, DomainError> {
    match command {
        Command::RecordJudgment { judgment } => {
            let expected = match case.state {
                CaseState::PendingFirstJudgment => Instance::First,
                CaseState::PendingSecondJudgment => Instance::Second,
                // Dispatch in transition() only routes the two pending
                // states here.
                _ => return Err(illegal(case, command)),
            };

            if judgment.instance != expected {
                return Err(DomainError::InvalidSequencing(match expected {
                    Instance::First => "the first-instance ruling is still pending",
                    Instance::Second => "only the second-instance ruling may be recorded here",
                }));
            }

            let Some(outcome) = judgment.outcome else {
                return Err(DomainError::Validation(
                    "judgment has no computed outcome".to_string(),
                ));
            };

            let closed = Effect::Notify(CaseEvent::JudgmentClosed {
                protocol: case.protocol.clone(),
                instance: judgment.instance,
                outcome,
            });

            match expected {
                Instance::First => Ok(TransitionResult::new(
                    CaseState::JudgedFirstInstance {
                        judged_at: judgment.ruled_at.unwrap_or(now),
                    },
                    vec![closed],
                )),
                Instance::Second => Ok(TransitionResult::new(
                    CaseState::Final { outcome },
                    vec![
                        closed,
                        Effect::Notify(CaseEvent::CaseFinal {
                            protocol: case.protocol.clone(),
                            outcome,
                        }),
                    ],
                )),
            }
        }

        _ => Err(illegal(case, command)),
    }
}

#[cfg(test)]
mod tests {
    use tribunal_core::ids::{MemberId, Outcome};

    use super::super::test_support::{closed_judgment, filed_at, test_case};
    use super::*;

    #[test]
    fn test_first_judgment_advances_to_judged_first_instance() {
        let mut case = test_case();
        case.state = CaseState::PendingFirstJudgment;
        let command = Command::RecordJudgment {
            judgment: closed_judgment(Instance::First, Outcome::Upheld),
        };
        let result = handle(&case, &command, filed_at()).unwrap();
        assert!(matches!(result.state, CaseState::JudgedFirstInstance { .. }));
        assert_eq!(result.effects.len(), 1);
    }

    #[test]
    fn test_second_judgment_finalizes_case() {
        let mut case = test_case();
        case.state = CaseState::PendingSecondJudgment;
        let command = Command::RecordJudgment {
            judgment: closed_judgment(Instance::Second, Outcome::Dismissed),
        };
        let result = handle(&case, &command, filed_at()).unwrap();
        assert_eq!(
            result.state,
            CaseState::Final {
                outcome: Outcome::Dismissed
            }
        );
        // Both the judgment-closed and case-final notifications fire.
        assert_eq!(result.effects.len(), 2);
    }

    #[test]
    fn test_second_instance_rejected_while_first_pending() {
        let mut case = test_case();
        case.state = CaseState::PendingFirstJudgment;
        let command = Command::RecordJudgment {
            judgment: closed_judgment(Instance::Second, Outcome::Upheld),
        };
        let result = handle(&case, &command, filed_at());
        assert!(matches!(result, Err(DomainError::InvalidSequencing(_))));
    }

    #[test]
    fn test_first_instance_rejected_while_second_pending() {
        let mut case = test_case();
        case.state = CaseState::PendingSecondJudgment;
        let command = Command::RecordJudgment {
            judgment: closed_judgment(Instance::First, Outcome::Upheld),
        };
        let result = handle(&case, &command, filed_at());
        assert!(matches!(result, Err(DomainError::InvalidSequencing(_))));
    }

    #[test]
    fn test_open_judgment_must_be_closed_before_recording() {
        let mut case = test_case();
        case.state = CaseState::PendingFirstJudgment;
        let mut judgment = closed_judgment(Instance::First, Outcome::Upheld);
        judgment.outcome = None;
        let command = Command::RecordJudgment { judgment };
        let result = handle(&case, &command, filed_at());
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_cancel_is_illegal_once_judgment_pending() {
        let mut case = test_case();
        case.state = CaseState::PendingFirstJudgment;
        let command = Command::Cancel {
            requested_by: MemberId::from("filer-1"),
        };
        let result = handle(&case, &command, filed_at());
        assert!(matches!(result, Err(DomainError::IllegalTransition { .. })));
    }
}
