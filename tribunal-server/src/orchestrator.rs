//! Case orchestrator: the single entry point for every command.
//!
//! Each command follows the same shape: claim the idempotency key, load the
//! case, validate references against the directory, run the pure transition,
//! persist the new state under the optimistic version check, then execute
//! the returned effects. Effects run only after the commit, so a notification
//! is never sent for a state that was not durably recorded, and a dispatcher
//! failure never unwinds a committed transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tribunal_core::directory::MemberDirectory;
use tribunal_core::evidence_store::{EvidenceMeta, EvidenceStore};
use tribunal_core::ids::{
    AppellantRole, CaseKind, Instance, MemberId, OwnerRef, ProtocolNumber, VoteValue,
};
use tribunal_core::notify::Notifier;

use crate::error::DomainError;
use crate::evidence::{self, EvidencePolicy};
use crate::machine::command::Command;
use crate::machine::effect::{Effect, LogLevel};
use crate::machine::state::{
    Appeal, Case, CaseState, CounterArgument, Defense, TransitionLogEntry,
};
use crate::machine::transition::{transition, DeadlinePolicy};
use crate::registry::{map_repository_error, CaseFilter, CasePage, CaseRegistry, Page};
use crate::repository::{CaseRepository, ClaimResult};
use crate::voting;

/// Tunables for the adjudication engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Ballots that must be present before a judgment round may close.
    pub quorum: usize,
    pub deadlines: DeadlinePolicy,
    pub evidence: EvidencePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quorum: 3,
            deadlines: DeadlinePolicy::default(),
            evidence: EvidencePolicy::default(),
        }
    }
}

/// An evidence file offered by a caller: declared metadata plus the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceUpload {
    pub meta: EvidenceMeta,
    pub bytes: Vec<u8>,
}

/// A new petition, as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PetitionInput {
    pub kind: CaseKind,
    pub subject: MemberId,
    pub filer: MemberId,
    pub justification: String,
    pub evidence: Vec<EvidenceUpload>,
}

/// One panel member's vote as submitted with a judgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotInput {
    pub member: MemberId,
    pub vote: VoteValue,
}

/// Counters reported by one deadline sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: usize,
    pub transitioned: usize,
    pub conflicts: usize,
}

pub struct Orchestrator {
    repository: Arc<dyn CaseRepository>,
    registry: CaseRegistry,
    directory: Arc<dyn MemberDirectory>,
    evidence_store: Arc<dyn EvidenceStore>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        repository: Arc<dyn CaseRepository>,
        directory: Arc<dyn MemberDirectory>,
        evidence_store: Arc<dyn EvidenceStore>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let registry = CaseRegistry::new(repository.clone(), directory.clone());
        Self {
            repository,
            registry,
            directory,
            evidence_store,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// File a challenge or substitution petition, attach its initial
    /// evidence and open the defense window.
    ///
    /// Evidence metadata is validated before any protocol number is
    /// allocated, so a rejected upload leaves no trace.
    pub async fn file_petition(
        &self,
        key: &str,
        petition: PetitionInput,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        if let Some(replayed) = self.begin_claim(key, now).await? {
            return Ok(replayed);
        }
        let result = self.file_petition_inner(petition, now).await;
        self.finish_claim(key, result).await
    }

    async fn file_petition_inner(
        &self,
        petition: PetitionInput,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        let mut running_total = 0u64;
        for upload in &petition.evidence {
            evidence::validate(&self.config.evidence, &upload.meta, running_total)
                .map_err(DomainError::EvidenceRejected)?;
            running_total += upload.meta.size_bytes;
        }

        // Bytes go to the store before any case record exists: a store
        // outage fails the whole command without leaving a committed case,
        // so the retry starts from a clean slate.
        let mut stored = Vec::with_capacity(petition.evidence.len());
        for upload in petition.evidence {
            let handle = self.store_evidence(&upload).await?;
            stored.push((upload.meta, handle));
        }

        let mut case = self
            .registry
            .create_case(
                petition.kind,
                petition.subject,
                petition.filer,
                petition.justification,
                now,
            )
            .await?;

        for (meta, handle) in stored {
            evidence::attach(&mut case, OwnerRef::Case, meta, handle, now);
        }

        info!("petition {} filed as {}", case.kind, case.protocol);
        self.apply(case, Command::OpenDefenseWindow, now).await
    }

    /// Attach one evidence item to an existing case component.
    pub async fn attach_evidence(
        &self,
        key: &str,
        protocol: &ProtocolNumber,
        owner: OwnerRef,
        upload: EvidenceUpload,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        if let Some(replayed) = self.begin_claim(key, now).await? {
            return Ok(replayed);
        }
        let result = self
            .attach_evidence_inner(protocol, owner, upload, now)
            .await;
        self.finish_claim(key, result).await
    }

    async fn attach_evidence_inner(
        &self,
        protocol: &ProtocolNumber,
        owner: OwnerRef,
        upload: EvidenceUpload,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        let mut case = self.registry.get_case(protocol).await?;

        if case.state.is_terminal() {
            return Err(DomainError::IllegalTransition {
                state: case.state.name(),
                command: "attach_evidence",
            });
        }

        // The owner back-reference must point at something that exists.
        let owner_exists = match owner {
            OwnerRef::Case => true,
            OwnerRef::Judgment(instance) => case.judgment(instance).is_some(),
            OwnerRef::Appeal => case.appeal.is_some(),
            OwnerRef::CounterArgument => case.counter_argument.is_some(),
        };
        if !owner_exists {
            return Err(DomainError::NotFound(format!(
                "evidence owner {owner} on case {protocol}"
            )));
        }

        evidence::validate(&self.config.evidence, &upload.meta, case.evidence_total_bytes())
            .map_err(DomainError::EvidenceRejected)?;

        let handle = self.store_evidence(&upload).await?;
        evidence::attach(&mut case, owner, upload.meta, handle, now);

        let expected = case.version;
        case.updated_at = now;
        case.version += 1;
        self.repository
            .update_case(&case, expected)
            .await
            .map_err(map_repository_error)?;
        Ok(case)
    }

    /// The opposing party files its defense, with any supporting evidence.
    pub async fn submit_defense(
        &self,
        key: &str,
        protocol: &ProtocolNumber,
        author: MemberId,
        text: String,
        uploads: Vec<EvidenceUpload>,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        if let Some(replayed) = self.begin_claim(key, now).await? {
            return Ok(replayed);
        }
        let result = self
            .submit_defense_inner(protocol, author, text, uploads, now)
            .await;
        self.finish_claim(key, result).await
    }

    async fn submit_defense_inner(
        &self,
        protocol: &ProtocolNumber,
        author: MemberId,
        text: String,
        uploads: Vec<EvidenceUpload>,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        if text.trim().is_empty() {
            return Err(DomainError::Validation(
                "defense text must not be empty".to_string(),
            ));
        }
        self.resolve_required(&author).await?;

        let mut case = self.registry.get_case(protocol).await?;
        let command = Command::SubmitDefense {
            author: author.clone(),
            text: text.clone(),
        };
        // Reject an out-of-window or out-of-state filing before any bytes
        // reach the evidence store.
        transition(&case, &command, &self.config.deadlines, now)?;
        self.attach_uploads(&mut case, OwnerRef::Case, uploads, now)
            .await?;

        case.defense = Some(Defense {
            author,
            text,
            filed_at: now,
        });
        self.apply(case, command, now).await
    }

    /// Open, vote and close one judgment round, then advance the case.
    ///
    /// The round is assembled entirely in memory; a duplicate ballot, a
    /// missed quorum or a sequencing violation persists nothing.
    pub async fn submit_judgment(
        &self,
        key: &str,
        protocol: &ProtocolNumber,
        instance: Instance,
        rapporteur: MemberId,
        opinion: String,
        ballots: Vec<BallotInput>,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        if let Some(replayed) = self.begin_claim(key, now).await? {
            return Ok(replayed);
        }
        let result = self
            .submit_judgment_inner(protocol, instance, rapporteur, opinion, ballots, now)
            .await;
        self.finish_claim(key, result).await
    }

    async fn submit_judgment_inner(
        &self,
        protocol: &ProtocolNumber,
        instance: Instance,
        rapporteur: MemberId,
        opinion: String,
        ballots: Vec<BallotInput>,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        self.resolve_required(&rapporteur).await?;
        for ballot in &ballots {
            self.resolve_required(&ballot.member).await?;
        }

        let mut case = self.registry.get_case(protocol).await?;

        let mut judgment = voting::open_judgment(&case, instance, rapporteur, opinion)?;
        for ballot in ballots {
            voting::cast_ballot(&mut judgment, ballot.member, ballot.vote)?;
        }
        voting::close_judgment(&mut judgment, self.config.quorum, now)?;

        case.judgments.push(judgment.clone());
        self.apply(case, Command::RecordJudgment { judgment }, now)
            .await
    }

    /// Escalate the first-instance ruling to the second instance.
    pub async fn submit_appeal(
        &self,
        key: &str,
        protocol: &ProtocolNumber,
        appellant: MemberId,
        role: AppellantRole,
        grounds: String,
        uploads: Vec<EvidenceUpload>,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        if let Some(replayed) = self.begin_claim(key, now).await? {
            return Ok(replayed);
        }
        let result = self
            .submit_appeal_inner(protocol, appellant, role, grounds, uploads, now)
            .await;
        self.finish_claim(key, result).await
    }

    async fn submit_appeal_inner(
        &self,
        protocol: &ProtocolNumber,
        appellant: MemberId,
        role: AppellantRole,
        grounds: String,
        uploads: Vec<EvidenceUpload>,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        if grounds.trim().is_empty() {
            return Err(DomainError::Validation(
                "appeal grounds must not be empty".to_string(),
            ));
        }
        self.resolve_required(&appellant).await?;

        let mut case = self.registry.get_case(protocol).await?;
        let command = Command::FileAppeal {
            appellant: appellant.clone(),
            role,
            grounds: grounds.clone(),
        };
        transition(&case, &command, &self.config.deadlines, now)?;

        case.appeal = Some(Appeal {
            appellant,
            role,
            grounds,
            filed_at: now,
        });
        self.attach_uploads(&mut case, OwnerRef::Appeal, uploads, now)
            .await?;
        self.apply(case, command, now).await
    }

    /// The opposing party replies to the appeal.
    pub async fn submit_counter_argument(
        &self,
        key: &str,
        protocol: &ProtocolNumber,
        author: MemberId,
        text: String,
        uploads: Vec<EvidenceUpload>,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        if let Some(replayed) = self.begin_claim(key, now).await? {
            return Ok(replayed);
        }
        let result = self
            .submit_counter_argument_inner(protocol, author, text, uploads, now)
            .await;
        self.finish_claim(key, result).await
    }

    async fn submit_counter_argument_inner(
        &self,
        protocol: &ProtocolNumber,
        author: MemberId,
        text: String,
        uploads: Vec<EvidenceUpload>,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        if text.trim().is_empty() {
            return Err(DomainError::Validation(
                "counter-argument text must not be empty".to_string(),
            ));
        }
        self.resolve_required(&author).await?;

        let mut case = self.registry.get_case(protocol).await?;
        if case.counter_argument.is_some() {
            return Err(DomainError::DuplicateCounterArgument);
        }
        let command = Command::FileCounterArgument {
            author: author.clone(),
            text: text.clone(),
        };
        transition(&case, &command, &self.config.deadlines, now)?;

        case.counter_argument = Some(CounterArgument {
            author,
            text,
            filed_at: now,
        });
        self.attach_uploads(&mut case, OwnerRef::CounterArgument, uploads, now)
            .await?;
        self.apply(case, command, now).await
    }

    /// Withdraw a petition before any judgment has been recorded.
    pub async fn cancel(
        &self,
        key: &str,
        protocol: &ProtocolNumber,
        requested_by: MemberId,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        if let Some(replayed) = self.begin_claim(key, now).await? {
            return Ok(replayed);
        }
        let result = self.cancel_inner(protocol, requested_by, now).await;
        self.finish_claim(key, result).await
    }

    async fn cancel_inner(
        &self,
        protocol: &ProtocolNumber,
        requested_by: MemberId,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        self.resolve_required(&requested_by).await?;

        let case = self.registry.get_case(protocol).await?;
        if requested_by != case.filer {
            return Err(DomainError::Validation(
                "only the filer may withdraw the petition".to_string(),
            ));
        }
        self.apply(case, Command::Cancel { requested_by }, now).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_case(&self, protocol: &ProtocolNumber) -> Result<Case, DomainError> {
        self.registry.get_case(protocol).await
    }

    pub async fn list_cases(
        &self,
        filter: &CaseFilter,
        page: &Page,
    ) -> Result<CasePage, DomainError> {
        self.registry.list_cases(filter, page).await
    }

    pub async fn get_transitions(
        &self,
        protocol: &ProtocolNumber,
    ) -> Result<Vec<TransitionLogEntry>, DomainError> {
        // Surface NotFound for unknown protocols rather than an empty log.
        self.registry.get_case(protocol).await?;
        self.repository
            .transitions(protocol)
            .await
            .map_err(map_repository_error)
    }

    // =========================================================================
    // Deadline sweep
    // =========================================================================

    /// One pass over every case with a running window, expiring those whose
    /// deadline has lapsed.
    ///
    /// A version conflict on an individual case means a caller's command won
    /// the race; the sweep skips it and the next pass re-examines it. One
    /// failing case never stalls the rest of the sweep.
    pub async fn run_deadline_sweep(&self, now: DateTime<Utc>) -> Result<SweepStats, DomainError> {
        let cases = self
            .repository
            .get_expirable()
            .await
            .map_err(map_repository_error)?;

        let mut stats = SweepStats::default();
        for case in cases {
            stats.examined += 1;
            let command = match case.state {
                CaseState::DefenseWindow { .. } => Command::ExpireDefenseWindow,
                CaseState::JudgedFirstInstance { .. } | CaseState::AppealWindow { .. } => {
                    Command::ExpireAppealWindow
                }
                _ => continue,
            };

            let protocol = case.protocol.clone();
            let prior = case.state.clone();
            match self.apply(case, command, now).await {
                Ok(updated) => {
                    if updated.state != prior {
                        stats.transitioned += 1;
                    }
                }
                Err(DomainError::ConcurrentModification) => {
                    debug!("sweep lost the version race on {}, will retry", protocol);
                    stats.conflicts += 1;
                }
                Err(e) => {
                    warn!("sweep failed to expire {}: {}", protocol, e);
                }
            }
        }

        Ok(stats)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Run the pure transition, commit the new state and execute effects.
    ///
    /// A no-op transition (premature expiry) executes its log effects and
    /// returns the case untouched, without a version bump or log entry.
    async fn apply(
        &self,
        mut case: Case,
        command: Command,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        let result = transition(&case, &command, &self.config.deadlines, now)?;

        if result.state == case.state {
            self.execute_effects(&result.effects).await;
            return Ok(case);
        }

        let prior_state = case.state.name().to_string();
        let expected = case.version;
        case.state = result.state;
        case.updated_at = now;
        case.version += 1;

        self.repository
            .update_case(&case, expected)
            .await
            .map_err(map_repository_error)?;

        let entry = TransitionLogEntry {
            protocol: case.protocol.clone(),
            actor: command.actor(),
            command: command.name().to_string(),
            prior_state,
            next_state: case.state.name().to_string(),
            recorded_at: now,
        };
        if let Err(e) = self.repository.append_transition(&entry).await {
            // The transition itself is committed; a log write failure is
            // surfaced in the service log instead of unwinding it.
            warn!("failed to append transition log for {}: {}", case.protocol, e);
        }

        self.execute_effects(&result.effects).await;
        Ok(case)
    }

    async fn execute_effects(&self, effects: &[Effect]) {
        for effect in effects {
            match effect {
                Effect::Notify(event) => {
                    if let Err(e) = self.notifier.notify(event).await {
                        warn!("notification {} failed: {:#}", event.log_summary(), e);
                    }
                }
                Effect::Log { level, message } => match level {
                    LogLevel::Debug => debug!("{message}"),
                    LogLevel::Info => info!("{message}"),
                    LogLevel::Warning => warn!("{message}"),
                },
            }
        }
    }

    /// Claim `key`. `Ok(Some(case))` replays the recorded result of an
    /// earlier completed run; `Ok(None)` means this caller holds the claim.
    async fn begin_claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Case>, DomainError> {
        if key.trim().is_empty() {
            return Err(DomainError::Validation(
                "idempotency key must not be empty".to_string(),
            ));
        }
        match self
            .repository
            .try_claim(key, now)
            .await
            .map_err(map_repository_error)?
        {
            ClaimResult::Claimed => Ok(None),
            ClaimResult::InProgress => Err(DomainError::ConcurrentModification),
            ClaimResult::Completed(snapshot) => {
                let case: Case = serde_json::from_value(snapshot).map_err(|e| {
                    DomainError::DependencyUnavailable {
                        dependency: "case store",
                        detail: format!("corrupt idempotency snapshot: {e}"),
                    }
                })?;
                debug!("replaying completed command for key {key}");
                Ok(Some(case))
            }
        }
    }

    /// Record the result snapshot on success, or release the claim so the
    /// caller can retry after a failure.
    async fn finish_claim(
        &self,
        key: &str,
        result: Result<Case, DomainError>,
    ) -> Result<Case, DomainError> {
        match result {
            Ok(case) => {
                let snapshot = serde_json::to_value(&case).map_err(|e| {
                    DomainError::DependencyUnavailable {
                        dependency: "case store",
                        detail: format!("serialize idempotency snapshot: {e}"),
                    }
                })?;
                self.repository
                    .complete_claim(key, &snapshot)
                    .await
                    .map_err(map_repository_error)?;
                Ok(case)
            }
            Err(e) => {
                if let Err(release_error) = self.repository.release_claim(key).await {
                    warn!("failed to release claim {}: {}", key, release_error);
                }
                Err(e)
            }
        }
    }

    /// Validate a batch of uploads against the policy and current case
    /// totals, then store and attach them under the given owner.
    async fn attach_uploads(
        &self,
        case: &mut Case,
        owner: OwnerRef,
        uploads: Vec<EvidenceUpload>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let mut running_total = case.evidence_total_bytes();
        for upload in &uploads {
            evidence::validate(&self.config.evidence, &upload.meta, running_total)
                .map_err(DomainError::EvidenceRejected)?;
            running_total += upload.meta.size_bytes;
        }
        for upload in uploads {
            let handle = self.store_evidence(&upload).await?;
            evidence::attach(case, owner, upload.meta, handle, now);
        }
        Ok(())
    }

    async fn store_evidence(
        &self,
        upload: &EvidenceUpload,
    ) -> Result<tribunal_core::evidence_store::StorageHandle, DomainError> {
        self.evidence_store
            .store(&upload.meta, &upload.bytes)
            .await
            .map_err(|e| DomainError::DependencyUnavailable {
                dependency: "evidence store",
                detail: format!("{e:#}"),
            })
    }

    async fn resolve_required(&self, member: &MemberId) -> Result<(), DomainError> {
        let record = self
            .directory
            .resolve_member(member)
            .await
            .map_err(|e| DomainError::DependencyUnavailable {
                dependency: "directory",
                detail: format!("{e:#}"),
            })?;
        if record.is_none() {
            return Err(DomainError::UnknownMember(member.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use tribunal_core::directory::InMemoryDirectory;
    use tribunal_core::evidence_store::InMemoryEvidenceStore;
    use tribunal_core::ids::Outcome;
    use tribunal_core::notify::{CaseEvent, RecordingNotifier};

    use super::*;
    use crate::repository::InMemoryRepository;

    struct Fixture {
        orchestrator: Orchestrator,
        notifier: Arc<RecordingNotifier>,
        directory: Arc<InMemoryDirectory>,
        evidence_store: Arc<InMemoryEvidenceStore>,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(InMemoryDirectory::with_members([
            "subject-1",
            "filer-1",
            "defender-1",
            "relator-1",
            "judge-1",
            "judge-2",
            "judge-3",
        ]));
        let notifier = Arc::new(RecordingNotifier::new());
        let evidence_store = Arc::new(InMemoryEvidenceStore::new());
        let orchestrator = Orchestrator::new(
            Arc::new(InMemoryRepository::new()),
            directory.clone(),
            evidence_store.clone(),
            notifier.clone(),
            EngineConfig::default(),
        );
        Fixture {
            orchestrator,
            notifier,
            directory,
            evidence_store,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn petition() -> PetitionInput {
        PetitionInput {
            kind: CaseKind::Challenge,
            subject: MemberId::from("subject-1"),
            filer: MemberId::from("filer-1"),
            justification: "candidate is ineligible".to_string(),
            evidence: vec![EvidenceUpload {
                meta: EvidenceMeta {
                    file_name: "petition.pdf".to_string(),
                    size_bytes: 2048,
                    mime_type: "application/pdf".to_string(),
                },
                bytes: vec![0u8; 16],
            }],
        }
    }

    fn ballots(votes: &[(&str, VoteValue)]) -> Vec<BallotInput> {
        votes
            .iter()
            .map(|(member, vote)| BallotInput {
                member: MemberId::from(*member),
                vote: *vote,
            })
            .collect()
    }

    async fn filed_case(fx: &Fixture) -> Case {
        fx.orchestrator
            .file_petition("file-1", petition(), t0())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_file_petition_opens_defense_window() {
        let fx = fixture();
        let case = filed_case(&fx).await;

        assert_eq!(case.state, CaseState::DefenseWindow { opened_at: t0() });
        assert_eq!(case.evidence.len(), 1);
        assert_eq!(case.version, 2);
        assert!(matches!(
            fx.notifier.events().as_slice(),
            [CaseEvent::PetitionFiled { .. }]
        ));

        let log = fx.orchestrator.get_transitions(&case.protocol).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].command, "open_defense_window");
        assert_eq!(log[0].actor, "system");
    }

    #[tokio::test]
    async fn test_replayed_filing_returns_same_case() {
        let fx = fixture();
        let first = filed_case(&fx).await;
        let replay = fx
            .orchestrator
            .file_petition("file-1", petition(), t0() + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(first, replay);
        // No second case was created.
        let page = fx
            .orchestrator
            .list_cases(&CaseFilter::default(), &Page::default())
            .await
            .unwrap();
        assert_eq!(page.cases.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_evidence_leaves_no_case_behind() {
        let fx = fixture();
        let mut bad = petition();
        bad.evidence[0].meta.mime_type = "application/x-msdownload".to_string();

        let result = fx.orchestrator.file_petition("file-1", bad, t0()).await;
        assert!(matches!(result, Err(DomainError::EvidenceRejected(_))));

        let page = fx
            .orchestrator
            .list_cases(&CaseFilter::default(), &Page::default())
            .await
            .unwrap();
        assert!(page.cases.is_empty());

        // The failed command released its key; the corrected retry runs.
        let retried = fx.orchestrator.file_petition("file-1", petition(), t0()).await;
        assert!(retried.is_ok());
    }

    /// A store outage during filing must not commit a case record: the
    /// command fails retryably, nothing shows up in listings, and the
    /// retry of the same key creates exactly one case.
    #[tokio::test]
    async fn test_store_outage_during_filing_leaves_no_case_behind() {
        let fx = fixture();
        fx.evidence_store.set_unavailable(true);

        let result = fx.orchestrator.file_petition("file-1", petition(), t0()).await;
        assert!(matches!(
            result,
            Err(DomainError::DependencyUnavailable { .. })
        ));

        let page = fx
            .orchestrator
            .list_cases(&CaseFilter::default(), &Page::default())
            .await
            .unwrap();
        assert!(page.cases.is_empty());

        fx.evidence_store.set_unavailable(false);
        let case = fx
            .orchestrator
            .file_petition("file-1", petition(), t0())
            .await
            .unwrap();
        assert_eq!(case.protocol.sequence(), Some(1));

        let page = fx
            .orchestrator
            .list_cases(&CaseFilter::default(), &Page::default())
            .await
            .unwrap();
        assert_eq!(page.cases.len(), 1);
    }

    #[tokio::test]
    async fn test_full_lifecycle_through_second_instance() {
        let fx = fixture();
        let case = filed_case(&fx).await;
        let protocol = case.protocol.clone();

        let case = fx
            .orchestrator
            .submit_defense(
                "defense-1",
                &protocol,
                MemberId::from("defender-1"),
                "the petition misreads the rule".to_string(),
                Vec::new(),
                t0() + Duration::days(2),
            )
            .await
            .unwrap();
        assert_eq!(case.state, CaseState::PendingFirstJudgment);

        let judged_at = t0() + Duration::days(5);
        let case = fx
            .orchestrator
            .submit_judgment(
                "judgment-1",
                &protocol,
                Instance::First,
                MemberId::from("relator-1"),
                "the challenge is well founded".to_string(),
                ballots(&[
                    ("judge-1", VoteValue::Upheld),
                    ("judge-2", VoteValue::Upheld),
                    ("judge-3", VoteValue::Dismissed),
                ]),
                judged_at,
            )
            .await
            .unwrap();
        assert_eq!(
            case.state,
            CaseState::JudgedFirstInstance { judged_at }
        );
        assert_eq!(case.judgment(Instance::First).unwrap().outcome, Some(Outcome::Upheld));

        let appealed_at = judged_at + Duration::days(3);
        let case = fx
            .orchestrator
            .submit_appeal(
                "appeal-1",
                &protocol,
                MemberId::from("subject-1"),
                AppellantRole::ChallengedParty,
                "the panel misapplied the eligibility rule".to_string(),
                Vec::new(),
                appealed_at,
            )
            .await
            .unwrap();
        assert_eq!(
            case.state,
            CaseState::AppealWindow {
                appeal_filed_at: appealed_at
            }
        );

        let case = fx
            .orchestrator
            .submit_counter_argument(
                "counter-1",
                &protocol,
                MemberId::from("filer-1"),
                "the panel applied it correctly".to_string(),
                Vec::new(),
                appealed_at + Duration::days(2),
            )
            .await
            .unwrap();
        assert_eq!(case.state, CaseState::PendingSecondJudgment);

        let case = fx
            .orchestrator
            .submit_judgment(
                "judgment-2",
                &protocol,
                Instance::Second,
                MemberId::from("relator-1"),
                "the appeal succeeds".to_string(),
                ballots(&[
                    ("judge-1", VoteValue::Dismissed),
                    ("judge-2", VoteValue::Dismissed),
                    ("judge-3", VoteValue::Upheld),
                ]),
                appealed_at + Duration::days(5),
            )
            .await
            .unwrap();
        assert_eq!(
            case.state,
            CaseState::Final {
                outcome: Outcome::Dismissed
            }
        );

        let events = fx.notifier.events();
        assert!(matches!(events.last(), Some(CaseEvent::CaseFinal { .. })));

        let log = fx.orchestrator.get_transitions(&protocol).await.unwrap();
        let commands: Vec<&str> = log.iter().map(|e| e.command.as_str()).collect();
        assert_eq!(
            commands,
            vec![
                "open_defense_window",
                "submit_defense",
                "record_judgment",
                "file_appeal",
                "file_counter_argument",
                "record_judgment"
            ]
        );
    }

    #[tokio::test]
    async fn test_missed_quorum_persists_nothing() {
        let fx = fixture();
        let case = filed_case(&fx).await;
        let protocol = case.protocol.clone();
        fx.orchestrator
            .submit_defense(
                "defense-1",
                &protocol,
                MemberId::from("defender-1"),
                "response".to_string(),
                Vec::new(),
                t0(),
            )
            .await
            .unwrap();

        let result = fx
            .orchestrator
            .submit_judgment(
                "judgment-1",
                &protocol,
                Instance::First,
                MemberId::from("relator-1"),
                "opinion".to_string(),
                ballots(&[
                    ("judge-1", VoteValue::Upheld),
                    ("judge-2", VoteValue::Dismissed),
                ]),
                t0(),
            )
            .await;
        assert_eq!(
            result,
            Err(DomainError::QuorumNotMet {
                present: 2,
                required: 3
            })
        );

        let loaded = fx.orchestrator.get_case(&protocol).await.unwrap();
        assert!(loaded.judgments.is_empty());
        assert_eq!(loaded.state, CaseState::PendingFirstJudgment);
    }

    #[tokio::test]
    async fn test_notification_failure_never_unwinds_the_transition() {
        let fx = fixture();
        fx.notifier.set_failing(true);

        let case = filed_case(&fx).await;
        assert_eq!(case.state, CaseState::DefenseWindow { opened_at: t0() });

        let loaded = fx.orchestrator.get_case(&case.protocol).await.unwrap();
        assert_eq!(loaded.state, CaseState::DefenseWindow { opened_at: t0() });
    }

    #[tokio::test]
    async fn test_unknown_panel_member_rejects_judgment() {
        let fx = fixture();
        let case = filed_case(&fx).await;
        fx.orchestrator
            .submit_defense(
                "defense-1",
                &case.protocol,
                MemberId::from("defender-1"),
                "response".to_string(),
                Vec::new(),
                t0(),
            )
            .await
            .unwrap();

        let result = fx
            .orchestrator
            .submit_judgment(
                "judgment-1",
                &case.protocol,
                Instance::First,
                MemberId::from("relator-1"),
                "opinion".to_string(),
                ballots(&[
                    ("judge-1", VoteValue::Upheld),
                    ("ghost", VoteValue::Upheld),
                    ("judge-3", VoteValue::Upheld),
                ]),
                t0(),
            )
            .await;
        assert_eq!(result, Err(DomainError::UnknownMember(MemberId::from("ghost"))));
    }

    #[tokio::test]
    async fn test_directory_outage_is_retryable_and_releases_the_key() {
        let fx = fixture();
        let case = filed_case(&fx).await;

        fx.directory.set_unavailable(true);
        let result = fx
            .orchestrator
            .submit_defense(
                "defense-1",
                &case.protocol,
                MemberId::from("defender-1"),
                "response".to_string(),
                Vec::new(),
                t0(),
            )
            .await;
        assert!(matches!(
            result,
            Err(DomainError::DependencyUnavailable { .. })
        ));
        assert!(result.unwrap_err().is_retryable());

        fx.directory.set_unavailable(false);
        let retried = fx
            .orchestrator
            .submit_defense(
                "defense-1",
                &case.protocol,
                MemberId::from("defender-1"),
                "response".to_string(),
                Vec::new(),
                t0(),
            )
            .await;
        assert!(retried.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_restricted_to_filer() {
        let fx = fixture();
        let case = filed_case(&fx).await;

        let result = fx
            .orchestrator
            .cancel("cancel-1", &case.protocol, MemberId::from("subject-1"), t0())
            .await;
        assert!(matches!(result, Err(DomainError::Validation(_))));

        let cancelled = fx
            .orchestrator
            .cancel("cancel-2", &case.protocol, MemberId::from("filer-1"), t0())
            .await
            .unwrap();
        assert!(cancelled.state.is_terminal());
    }

    #[tokio::test]
    async fn test_sweep_expires_lapsed_defense_window() {
        let fx = fixture();
        let case = filed_case(&fx).await;

        // Not yet due.
        let stats = fx
            .orchestrator
            .run_deadline_sweep(t0() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(stats.examined, 1);
        assert_eq!(stats.transitioned, 0);

        let stats = fx
            .orchestrator
            .run_deadline_sweep(t0() + Duration::days(16))
            .await
            .unwrap();
        assert_eq!(stats.transitioned, 1);

        let loaded = fx.orchestrator.get_case(&case.protocol).await.unwrap();
        assert_eq!(loaded.state, CaseState::PendingFirstJudgment);

        let log = fx.orchestrator.get_transitions(&case.protocol).await.unwrap();
        assert_eq!(log.last().unwrap().actor, "scheduler");
    }

    #[tokio::test]
    async fn test_sweep_finalizes_unappealed_judgment() {
        let fx = fixture();
        let case = filed_case(&fx).await;
        let protocol = case.protocol.clone();
        fx.orchestrator
            .submit_defense(
                "defense-1",
                &protocol,
                MemberId::from("defender-1"),
                "response".to_string(),
                Vec::new(),
                t0(),
            )
            .await
            .unwrap();
        let judged_at = t0() + Duration::days(3);
        fx.orchestrator
            .submit_judgment(
                "judgment-1",
                &protocol,
                Instance::First,
                MemberId::from("relator-1"),
                "opinion".to_string(),
                ballots(&[
                    ("judge-1", VoteValue::Upheld),
                    ("judge-2", VoteValue::Upheld),
                    ("judge-3", VoteValue::Dismissed),
                ]),
                judged_at,
            )
            .await
            .unwrap();

        fx.orchestrator
            .run_deadline_sweep(judged_at + Duration::days(11))
            .await
            .unwrap();

        let loaded = fx.orchestrator.get_case(&protocol).await.unwrap();
        assert_eq!(
            loaded.state,
            CaseState::Final {
                outcome: Outcome::Upheld
            }
        );
    }

    #[tokio::test]
    async fn test_attach_evidence_to_appeal() {
        let fx = fixture();
        let case = filed_case(&fx).await;
        let protocol = case.protocol.clone();

        // No appeal yet: the owner reference does not resolve.
        let upload = EvidenceUpload {
            meta: EvidenceMeta {
                file_name: "grounds.pdf".to_string(),
                size_bytes: 512,
                mime_type: "application/pdf".to_string(),
            },
            bytes: vec![1u8; 8],
        };
        let result = fx
            .orchestrator
            .attach_evidence("attach-1", &protocol, OwnerRef::Appeal, upload.clone(), t0())
            .await;
        assert!(matches!(result, Err(DomainError::NotFound(_))));

        let case = fx
            .orchestrator
            .attach_evidence("attach-2", &protocol, OwnerRef::Case, upload, t0())
            .await
            .unwrap();
        assert_eq!(case.evidence.len(), 2);
    }
}
