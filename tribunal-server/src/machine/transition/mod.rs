//! Pure state transition function.
//!
//! Takes the current case and a command and returns the next state plus a
//! list of effects, or a typed domain error. No side effects: deadline
//! arithmetic uses the `now` passed in, and everything the transition needs
//! is on the case record.
//!
//! Each state has its own handler module with co-located tests:
//! - `filed`: petition recorded, defense period not yet open
//! - `defense`: defense window running
//! - `pending`: awaiting a ruling (both instances)
//! - `judged`: first ruling recorded, appeal window running
//! - `appeal_window`: appeal filed, counter-argument window running
//! - `terminal`: Final/Cancelled (expiry sweeps no-op, everything else illegal)

mod appeal_window;
mod defense;
mod filed;
mod judged;
mod pending;
mod terminal;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::command::Command;
use super::effect::Effect;
use super::state::{Case, CaseState};
use crate::error::DomainError;

/// Wall-clock windows for the judicial process, injected from
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlinePolicy {
    pub defense_window_days: i64,
    pub appeal_window_days: i64,
    pub counter_argument_window_days: i64,
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self {
            defense_window_days: 15,
            appeal_window_days: 10,
            counter_argument_window_days: 10,
        }
    }
}

impl DeadlinePolicy {
    pub fn defense_deadline(&self, opened_at: DateTime<Utc>) -> DateTime<Utc> {
        opened_at + Duration::days(self.defense_window_days)
    }

    pub fn appeal_deadline(&self, judged_at: DateTime<Utc>) -> DateTime<Utc> {
        judged_at + Duration::days(self.appeal_window_days)
    }

    pub fn counter_argument_deadline(&self, appeal_filed_at: DateTime<Utc>) -> DateTime<Utc> {
        appeal_filed_at + Duration::days(self.counter_argument_window_days)
    }
}

/// Result of a legal state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    /// The state after the transition. May equal the prior state for
    /// sweep no-ops; the orchestrator skips persistence in that case.
    pub state: CaseState,
    /// Effects to execute after commit.
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: CaseState, effects: Vec<Effect>) -> Self {
        Self { state, effects }
    }

    pub fn no_change(state: CaseState, effects: Vec<Effect>) -> Self {
        Self { state, effects }
    }
}

pub(super) fn illegal(case: &Case, command: &Command) -> DomainError {
    DomainError::IllegalTransition {
        state: case.state.name(),
        command: command.name(),
    }
}

/// Pure state transition function.
pub fn transition(
    case: &Case,
    command: &Command,
    policy: &DeadlinePolicy,
    now: DateTime<Utc>,
) -> Result<TransitionResult, DomainError> {
    match &case.state {
        CaseState::Filed => filed::handle(case, command, now),
        CaseState::DefenseWindow { opened_at } => {
            defense::handle(case, *opened_at, command, policy, now)
        }
        CaseState::PendingFirstJudgment | CaseState::PendingSecondJudgment => {
            pending::handle(case, command, now)
        }
        CaseState::JudgedFirstInstance { judged_at } => {
            judged::handle(case, *judged_at, command, policy, now)
        }
        CaseState::AppealWindow { appeal_filed_at } => {
            appeal_window::handle(case, *appeal_filed_at, command, policy, now)
        }
        CaseState::Final { .. } | CaseState::Cancelled { .. } => terminal::handle(case, command),
    }
}


#[cfg(test)]
mod tests {
    use chrono::Duration;

    use tribunal_core::ids::{Instance, MemberId, Outcome};
    use tribunal_core::notify::CaseEvent;

    use super::test_support::{closed_judgment, filed_at, test_case};
    use super::*;
    use crate::machine::command::Command;
    use crate::machine::state::{Appeal, CaseState};
    use tribunal_core::ids::AppellantRole;

    /// Walk a case through the full two-instance lifecycle and check each
    /// state and emitted notification along the way.
    #[test]
    fn test_full_lifecycle_walk() {
        let policy = DeadlinePolicy::default();
        let mut case = test_case();
        let mut now = filed_at();

        // Filed -> DefenseWindow
        let result = transition(&case, &Command::OpenDefenseWindow, &policy, now).unwrap();
        assert!(matches!(result.state, CaseState::DefenseWindow { .. }));
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::Notify(CaseEvent::PetitionFiled { .. }))));
        case.state = result.state;

        // DefenseWindow -> PendingFirstJudgment
        now += Duration::days(2);
        let result = transition(
            &case,
            &Command::SubmitDefense {
                author: MemberId::from("defender-1"),
                text: "the candidate is eligible".to_string(),
            },
            &policy,
            now,
        )
        .unwrap();
        assert_eq!(result.state, CaseState::PendingFirstJudgment);
        case.state = result.state;

        // PendingFirstJudgment -> JudgedFirstInstance
        let judgment = closed_judgment(Instance::First, Outcome::Upheld);
        case.judgments.push(judgment.clone());
        let result = transition(&case, &Command::RecordJudgment { judgment }, &policy, now).unwrap();
        assert!(matches!(result.state, CaseState::JudgedFirstInstance { .. }));
        case.state = result.state;

        // JudgedFirstInstance -> AppealWindow
        now += Duration::days(3);
        let result = transition(
            &case,
            &Command::FileAppeal {
                appellant: MemberId::from("subject-1"),
                role: AppellantRole::ChallengedParty,
                grounds: "the panel misread the statute".to_string(),
            },
            &policy,
            now,
        )
        .unwrap();
        assert!(matches!(result.state, CaseState::AppealWindow { .. }));
        case.state = result.state;
        case.appeal = Some(Appeal {
            appellant: MemberId::from("subject-1"),
            role: AppellantRole::ChallengedParty,
            grounds: "the panel misread the statute".to_string(),
            filed_at: now,
        });

        // AppealWindow -> PendingSecondJudgment
        now += Duration::days(1);
        let result = transition(
            &case,
            &Command::FileCounterArgument {
                author: MemberId::from("filer-1"),
                text: "the statute was read correctly".to_string(),
            },
            &policy,
            now,
        )
        .unwrap();
        assert_eq!(result.state, CaseState::PendingSecondJudgment);
        case.state = result.state;

        // PendingSecondJudgment -> Final
        let judgment = closed_judgment(Instance::Second, Outcome::Dismissed);
        case.judgments.push(judgment.clone());
        let result = transition(&case, &Command::RecordJudgment { judgment }, &policy, now).unwrap();
        assert_eq!(
            result.state,
            CaseState::Final {
                outcome: Outcome::Dismissed
            }
        );
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::Notify(CaseEvent::CaseFinal { .. }))));
    }

    /// Commands that mutate state are illegal in both terminal states, for
    /// every command except the idempotent sweep triggers.
    #[test]
    fn test_terminal_states_reject_mutating_commands() {
        let policy = DeadlinePolicy::default();
        let mut case = test_case();
        case.state = CaseState::Final {
            outcome: Outcome::Upheld,
        };

        let commands = [
            Command::OpenDefenseWindow,
            Command::SubmitDefense {
                author: MemberId::from("d-1"),
                text: "late".to_string(),
            },
            Command::FileAppeal {
                appellant: MemberId::from("a-1"),
                role: AppellantRole::Challenger,
                grounds: "too late".to_string(),
            },
            Command::Cancel {
                requested_by: MemberId::from("filer-1"),
            },
        ];

        for command in &commands {
            let result = transition(&case, command, &policy, filed_at());
            assert!(
                matches!(result, Err(DomainError::IllegalTransition { .. })),
                "command {} must be illegal in a terminal state",
                command.name()
            );
        }
    }
}
