//! DefenseWindow state transitions.

use chrono::{DateTime, Utc};

use tribunal_core::notify::CaseEvent;

use super::{illegal, DeadlinePolicy, TransitionResult};
use crate::error::DomainError;
use crate::machine::command::Command;
use crate::machine::effect::{Effect, LogLevel};
use crate::machine::state::{Case, CaseState};

/// Handle transitions from the DefenseWindow state.
///
/// The opposing party may respond until the window lapses; a defense filed
/// before the sweep runs is accepted even past the nominal deadline, since
/// the window only closes when the expiry trigger lands.
pub fn handle(
    case: &Case,
    opened_at: DateTime<Utc>,
    command: &Command,
    policy: &DeadlinePolicy,
    now: DateTime<Utc>,
) -> Result<TransitionResult, DomainError> {
    match command {
        Command::SubmitDefense { .. } => Ok(TransitionResult::new(
            CaseState::PendingFirstJudgment,
            vec![Effect::Notify(CaseEvent::DefenseSubmitted {
                protocol: case.protocol.clone(),
            })],
        )),

        Command::ExpireDefenseWindow => {
            // The deadline instant itself is still inside the window,
            // matching the appeal and counter-argument windows.
            if now <= policy.defense_deadline(opened_at) {
                // Premature sweep tick; nothing to do yet.
                return Ok(TransitionResult::no_change(
                    case.state.clone(),
                    vec![Effect::Log {
                        level: LogLevel::Debug,
                        message: format!("defense window for {} not yet due", case.protocol),
                    }],
                ));
            }
            Ok(TransitionResult::new(
                CaseState::PendingFirstJudgment,
                vec![Effect::Notify(CaseEvent::DefenseWindowExpired {
                    protocol: case.protocol.clone(),
                })],
            ))
        }

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
