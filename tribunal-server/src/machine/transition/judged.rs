//! JudgedFirstInstance state transitions.
//!
//! The appeal window runs from the first-instance ruling timestamp. An
//! appeal inside the window escalates; the sweep finalizes the case once
//! the window lapses with no appeal.

use chrono::{DateTime, Utc};

use tribunal_core::ids::Instance;
use tribunal_core::notify::CaseEvent;

use super::{illegal, DeadlinePolicy, TransitionResult};
use crate::error::DomainError;
use crate::machine::command::Command;
use crate::machine::effect::{Effect, LogLevel};
use crate::machine::state::{Case, CaseState};

pub fn handle(
    case: &Case,
    judged_at: DateTime<Utc>,
    command: &Command,
    policy: &DeadlinePolicy,
    now: DateTime<Utc>,
) -> Result<TransitionResult, DomainError> {
    match command {
        Command::FileAppeal { .. } => {
            if now > policy.appeal_deadline(judged_at) {
                return Err(DomainError::DeadlineExpired { window: "appeal" });
            }
            Ok(TransitionResult::new(
                CaseState::AppealWindow {
                    appeal_filed_at: now,
                },
                vec![Effect::Notify(CaseEvent::AppealFiled {
                    protocol: case.protocol.clone(),
                })],
            ))
        }

        Command::ExpireAppealWindow => {
            if now <= policy.appeal_deadline(judged_at) {
                return Ok(TransitionResult::no_change(
                    case.state.clone(),
                    vec![Effect::Log {
                        level: LogLevel::Debug,
                        message: format!("appeal window for {} not yet due", case.protocol),
                    }],
                ));
            }
            let Some(outcome) = case.judgment(Instance::First).and_then(|j| j.outcome) else {
                return Err(DomainError::Validation(
                    "first-instance outcome missing from judged case".to_string(),
                ));
            };
            Ok(TransitionResult::new(
                CaseState::Final { outcome },
                vec![Effect::Notify(CaseEvent::CaseFinal {
                    protocol: case.protocol.clone(),
                    outcome,
                })],
            ))
        }

        _ => Err(illegal(case, command)),
    }
}
