//! Commands that drive case transitions.
//!
//! Commands are what a caller asked for; the transition function decides
//! whether the current state permits them. Judgment rounds are opened,
//! voted and closed by the voting engine before `RecordJudgment` reaches
//! the transition function, so a judgment embedded in a command always
//! carries a computed outcome.

use tribunal_core::ids::{AppellantRole, MemberId};

use super::state::Judgment;

/// Actor name recorded in the transition log for sweep-triggered expiries.
pub const SCHEDULER_ACTOR: &str = "scheduler";

/// Actor name for transitions the orchestrator applies on its own
/// (opening the defense window right after filing).
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open the defense period immediately after petition filing.
    OpenDefenseWindow,
    /// The opposing party files its response.
    SubmitDefense { author: MemberId, text: String },
    /// Sweep trigger: the defense window lapsed without a response.
    ExpireDefenseWindow,
    /// Record a closed judgment (outcome already computed by the voting
    /// engine) and advance the case.
    RecordJudgment { judgment: Judgment },
    /// Escalate the first-instance judgment.
    FileAppeal {
        appellant: MemberId,
        role: AppellantRole,
        grounds: String,
    },
    /// Reply to the appeal.
    FileCounterArgument { author: MemberId, text: String },
    /// Sweep trigger: the appeal (or counter-argument) window lapsed.
    ExpireAppealWindow,
    /// Withdraw the petition before any judgment.
    Cancel { requested_by: MemberId },
}

impl Command {
    /// Stable name for the transition log and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Command::OpenDefenseWindow => "open_defense_window",
            Command::SubmitDefense { .. } => "submit_defense",
            Command::ExpireDefenseWindow => "expire_defense_window",
            Command::RecordJudgment { .. } => "record_judgment",
            Command::FileAppeal { .. } => "file_appeal",
            Command::FileCounterArgument { .. } => "file_counter_argument",
            Command::ExpireAppealWindow => "expire_appeal_window",
            Command::Cancel { .. } => "cancel",
        }
    }

    /// Who to record as the actor in the transition log.
    pub fn actor(&self) -> String {
        match self {
            Command::SubmitDefense { author, .. } => author.to_string(),
            Command::RecordJudgment { judgment } => judgment.rapporteur.to_string(),
            Command::FileAppeal { appellant, .. } => appellant.to_string(),
            Command::FileCounterArgument { author, .. } => author.to_string(),
            Command::Cancel { requested_by } => requested_by.to_string(),
            Command::OpenDefenseWindow => SYSTEM_ACTOR.to_string(),
            Command::ExpireDefenseWindow | Command::ExpireAppealWindow => {
                SCHEDULER_ACTOR.to_string()
            }
        }
    }
}
