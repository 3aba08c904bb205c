//! Case registry: creation with guaranteed-unique protocol numbers plus
//! lookup and filtered listing.
//!
//! Protocol allocation is delegated to the repository, which performs the
//! per-year counter increment and the case insert in one atomic unit. The
//! registry's own job is reference validation and filter semantics.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tribunal_core::directory::MemberDirectory;
use tribunal_core::ids::{CaseKind, MemberId, ProtocolNumber};

use crate::error::DomainError;
use crate::machine::state::{Case, CaseDraft};
use crate::repository::{CaseRepository, RepositoryError};

/// Listing filter. All populated fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseFilter {
    pub kind: Option<CaseKind>,
    /// State name as produced by `CaseState::name`.
    pub state: Option<String>,
    pub filer: Option<MemberId>,
    pub subject: Option<MemberId>,
    pub filed_after: Option<DateTime<Utc>>,
    pub filed_before: Option<DateTime<Utc>>,
    /// Default ordering is filing timestamp descending; set to walk the
    /// docket oldest-first instead.
    #[serde(default)]
    pub oldest_first: bool,
}

impl CaseFilter {
    pub fn matches(&self, case: &Case) -> bool {
        if self.kind.is_some_and(|kind| kind != case.kind) {
            return false;
        }
        if self
            .state
            .as_deref()
            .is_some_and(|state| state != case.state.name())
        {
            return false;
        }
        if self.filer.as_ref().is_some_and(|filer| *filer != case.filer) {
            return false;
        }
        if self
            .subject
            .as_ref()
            .is_some_and(|subject| *subject != case.subject)
        {
            return false;
        }
        if self.filed_after.is_some_and(|after| case.filed_at < after) {
            return false;
        }
        if self.filed_before.is_some_and(|before| case.filed_at > before) {
            return false;
        }
        true
    }
}

/// One page of a restartable listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasePage {
    pub cases: Vec<Case>,
    /// Offset to resume from, or None when the listing is exhausted.
    pub next_offset: Option<usize>,
}

/// Map storage-level failures into the domain taxonomy.
pub(crate) fn map_repository_error(error: RepositoryError) -> DomainError {
    match error {
        RepositoryError::VersionConflict => DomainError::ConcurrentModification,
        RepositoryError::Storage { operation, detail } => DomainError::DependencyUnavailable {
            dependency: "case store",
            detail: format!("{operation}: {detail}"),
        },
    }
}

pub struct CaseRegistry {
    repository: Arc<dyn CaseRepository>,
    directory: Arc<dyn MemberDirectory>,
}

impl CaseRegistry {
    pub fn new(repository: Arc<dyn CaseRepository>, directory: Arc<dyn MemberDirectory>) -> Self {
        Self {
            repository,
            directory,
        }
    }

    /// Create a case in `Filed` with a freshly allocated protocol.
    ///
    /// The subject must resolve to an active directory record and the filer
    /// must resolve at all; a directory outage aborts the command before
    /// any protocol is allocated.
    pub async fn create_case(
        &self,
        kind: CaseKind,
        subject: MemberId,
        filer: MemberId,
        justification: String,
        now: DateTime<Utc>,
    ) -> Result<Case, DomainError> {
        if justification.trim().is_empty() {
            return Err(DomainError::Validation(
                "justification must not be empty".to_string(),
            ));
        }

        let subject_record = self
            .directory
            .resolve_member(&subject)
            .await
            .map_err(|e| DomainError::DependencyUnavailable {
                dependency: "directory",
                detail: format!("{e:#}"),
            })?;
        match subject_record {
            Some(record) if record.active => {}
            _ => return Err(DomainError::InvalidSubject(subject)),
        }

        let filer_record = self
            .directory
            .resolve_member(&filer)
            .await
            .map_err(|e| DomainError::DependencyUnavailable {
                dependency: "directory",
                detail: format!("{e:#}"),
            })?;
        if filer_record.is_none() {
            return Err(DomainError::UnknownMember(filer));
        }

        let draft = CaseDraft {
            kind,
            subject,
            filer,
            justification,
            filed_at: now,
        };

        self.repository
            .insert_case(draft)
            .await
            .map_err(map_repository_error)
    }

    pub async fn get_case(&self, protocol: &ProtocolNumber) -> Result<Case, DomainError> {
        self.repository
            .get(protocol)
            .await
            .map_err(map_repository_error)?
            .ok_or_else(|| DomainError::NotFound(format!("case {protocol}")))
    }

    pub async fn list_cases(
        &self,
        filter: &CaseFilter,
        page: &Page,
    ) -> Result<CasePage, DomainError> {
        if page.limit == 0 {
            return Err(DomainError::Validation(
                "page limit must be positive".to_string(),
            ));
        }
        self.repository
            .list(filter, page)
            .await
            .map_err(map_repository_error)
    }
}
