//! AppealWindow state transitions.
//!
//! An appeal has been filed; the opposing party may reply once with a
//! counter-argument until its window lapses, after which the case moves on
//! to the second-instance panel either way.

use chrono::{DateTime, Utc};

use tribunal_core::notify::CaseEvent;

use super::{illegal, DeadlinePolicy, TransitionResult};
use crate::error::DomainError;
use crate::machine::command::Command;
use crate::machine::effect::{Effect, LogLevel};
use crate::machine::state::{Case, CaseState};

pub fn handle(
    case: &Case,
    appeal_filed_at: DateTime<Utc>,
    command: &Command,
    policy: &DeadlinePolicy,
    now: DateTime<Utc>,
) -> Result<TransitionResult, DomainError> {
    match command {
        Command::FileCounterArgument { .. } => {
            if case.counter_argument.is_some() {
                return Err(DomainError::DuplicateCounterArgument);
            }
            if now > policy.counter_argument_deadline(appeal_filed_at) {
                return Err(DomainError::DeadlineExpired {
                    window: "counter-argument",
                });
            }
            Ok(TransitionResult::new(
                CaseState::PendingSecondJudgment,
                vec![Effect::Notify(CaseEvent::CounterArgumentFiled {
                    protocol: case.protocol.clone(),
                })],
            ))
        }

        Command::ExpireAppealWindow => {
            if now <= policy.counter_argument_deadline(appeal_filed_at) {
                return Ok(TransitionResult::no_change(
                    case.state.clone(),
                    vec![Effect::Log {
                        level: LogLevel::Debug,
                        message: format!(
                            "counter-argument window for {} not yet due",
                            case.protocol
                        ),
                    }],
                ));
            }
            Ok(TransitionResult::new(
                CaseState::PendingSecondJudgment,
                vec![Effect::Log {
                    level: LogLevel::Info,
                    message: format!(
                        "counter-argument window for {} lapsed; case moves to second instance",
                        case.protocol
                    ),
                }],
            ))
        }

        _ => Err(illegal(case, command)),
    }
}
