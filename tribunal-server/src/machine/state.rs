//! Case record and state types.
//!
//! A `Case` is the unit of locking and persistence: it exclusively owns its
//! judgments, appeal, counter-argument and evidence references, and carries
//! an optimistic version that the repository checks on every update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tribunal_core::evidence_store::StorageHandle;
use tribunal_core::ids::{
    AppellantRole, CaseKind, Instance, MemberId, Outcome, OwnerRef, ProtocolNumber, VoteValue,
};

/// One panel member's vote within a judgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub member: MemberId,
    pub vote: VoteValue,
}

/// A ruling produced at one instance.
///
/// Open until the rapporteur closes the round; once `outcome` is recorded
/// the judgment and its ballots are frozen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    pub instance: Instance,
    pub rapporteur: MemberId,
    pub opinion: String,
    pub ballots: Vec<Ballot>,
    pub outcome: Option<Outcome>,
    pub ruled_at: Option<DateTime<Utc>>,
}

impl Judgment {
    pub fn is_closed(&self) -> bool {
        self.outcome.is_some()
    }
}

/// The opposing party's response filed during the defense window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defense {
    pub author: MemberId,
    pub text: String,
    pub filed_at: DateTime<Utc>,
}

/// Request to escalate the first-instance judgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appeal {
    pub appellant: MemberId,
    pub role: AppellantRole,
    pub grounds: String,
    pub filed_at: DateTime<Utc>,
}

/// The opposing party's reply to an appeal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterArgument {
    pub author: MemberId,
    pub text: String,
    pub filed_at: DateTime<Utc>,
}

/// Metadata for an accepted evidence file. Bytes live in the external
/// store behind `handle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub owner: OwnerRef,
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub handle: StorageHandle,
    pub attached_at: DateTime<Utc>,
}

/// Case lifecycle state.
///
/// Timestamps that feed deadline arithmetic are carried in the variant that
/// needs them, so a state can never be asked about a deadline it does not
/// have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CaseState {
    /// Petition recorded, defense period not yet opened.
    Filed,
    /// Opposing party may respond.
    DefenseWindow { opened_at: DateTime<Utc> },
    /// Awaiting the first-instance panel ruling.
    PendingFirstJudgment,
    /// First ruling recorded; appeal window running.
    JudgedFirstInstance { judged_at: DateTime<Utc> },
    /// Appeal filed; counter-argument window running.
    AppealWindow { appeal_filed_at: DateTime<Utc> },
    /// Awaiting the second-instance ruling.
    PendingSecondJudgment,
    /// Terminal; outcome binding.
    Final { outcome: Outcome },
    /// Terminal; withdrawn before any judgment.
    Cancelled {
        cancelled_by: MemberId,
        cancelled_at: DateTime<Utc>,
    },
}

impl CaseState {
    /// Stable variant name for the transition log and list filters.
    pub fn name(&self) -> &'static str {
        match self {
            CaseState::Filed => "filed",
            CaseState::DefenseWindow { .. } => "defense_window",
            CaseState::PendingFirstJudgment => "pending_first_judgment",
            CaseState::JudgedFirstInstance { .. } => "judged_first_instance",
            CaseState::AppealWindow { .. } => "appeal_window",
            CaseState::PendingSecondJudgment => "pending_second_judgment",
            CaseState::Final { .. } => "final",
            CaseState::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseState::Final { .. } | CaseState::Cancelled { .. })
    }
}

/// Immutable fields captured at petition filing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseDraft {
    pub kind: CaseKind,
    pub subject: MemberId,
    pub filer: MemberId,
    pub justification: String,
    pub filed_at: DateTime<Utc>,
}

/// One adjudication unit. Owned collections (judgments, appeal,
/// counter-argument) share the case's lifetime; evidence items hold weak
/// back-references through `OwnerRef`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub protocol: ProtocolNumber,
    pub kind: CaseKind,
    pub subject: MemberId,
    pub filer: MemberId,
    pub justification: String,
    pub state: CaseState,
    pub defense: Option<Defense>,
    pub judgments: Vec<Judgment>,
    pub appeal: Option<Appeal>,
    pub counter_argument: Option<CounterArgument>,
    pub evidence: Vec<EvidenceItem>,
    pub filed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped on every committed update.
    pub version: u64,
}

impl Case {
    /// Build a freshly filed case once the repository has allocated its
    /// protocol number.
    pub fn new(protocol: ProtocolNumber, draft: CaseDraft) -> Self {
        Self {
            protocol,
            kind: draft.kind,
            subject: draft.subject,
            filer: draft.filer,
            justification: draft.justification,
            state: CaseState::Filed,
            defense: None,
            judgments: Vec::new(),
            appeal: None,
            counter_argument: None,
            evidence: Vec::new(),
            filed_at: draft.filed_at,
            updated_at: draft.filed_at,
            version: 1,
        }
    }

    pub fn judgment(&self, instance: Instance) -> Option<&Judgment> {
        self.judgments.iter().find(|j| j.instance == instance)
    }

    pub fn judgment_mut(&mut self, instance: Instance) -> Option<&mut Judgment> {
        self.judgments.iter_mut().find(|j| j.instance == instance)
    }

    /// Bytes across all evidence currently attached to this case.
    pub fn evidence_total_bytes(&self) -> u64 {
        self.evidence.iter().map(|item| item.size_bytes).sum()
    }
}

/// One entry of the append-only per-case transition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub protocol: ProtocolNumber,
    /// Member id of the actor, or `scheduler` for sweep-triggered expiries.
    pub actor: String,
    pub command: String,
    pub prior_state: String,
    pub next_state: String,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> CaseDraft {
        CaseDraft {
            kind: CaseKind::Challenge,
            subject: MemberId::from("subject-1"),
            filer: MemberId::from("filer-1"),
            justification: "ineligible candidate".to_string(),
            filed_at: Utc::now(),
        }
    }

    #[test]
    fn test_new_case_starts_filed_at_version_one() {
        let case = Case::new(ProtocolNumber::new(2026, 1), draft());
        assert_eq!(case.state, CaseState::Filed);
        assert_eq!(case.version, 1);
        assert!(case.judgments.is_empty());
        assert!(case.appeal.is_none());
    }

    #[test]
    fn test_state_names_are_stable() {
        assert_eq!(CaseState::Filed.name(), "filed");
        assert_eq!(
            CaseState::Final {
                outcome: Outcome::Dismissed
            }
            .name(),
            "final"
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(CaseState::Final {
            outcome: Outcome::Upheld
        }
        .is_terminal());
        assert!(CaseState::Cancelled {
            cancelled_by: MemberId::from("m-1"),
            cancelled_at: Utc::now(),
        }
        .is_terminal());
        assert!(!CaseState::PendingFirstJudgment.is_terminal());
    }

    #[test]
    fn test_case_state_serde_round_trip() {
        let state = CaseState::JudgedFirstInstance {
            judged_at: Utc::now(),
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: CaseState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
