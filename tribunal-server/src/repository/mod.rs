//! Repository abstraction for case persistence.
//!
//! The `CaseRepository` trait abstracts storage for cases, the transition
//! log and idempotency claims. Implementations provide different backends
//! (in-memory for tests, SQLite for the service) without changing the
//! orchestration logic.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tribunal_core::ids::ProtocolNumber;

use crate::machine::state::{Case, CaseDraft, TransitionLogEntry};
use crate::registry::{CaseFilter, CasePage, Page};

/// TTL for stale in-progress idempotency claims (30 minutes).
///
/// If a command claim is still in progress after this duration the original
/// handler is considered dead (crash or panic) and the key can be
/// reclaimed, so one crashed request never blocks its idempotency key
/// forever.
pub const STALE_CLAIM_TTL_SECONDS: i64 = 30 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Backend failure (I/O, serialization, corrupt row).
    Storage { operation: String, detail: String },
    /// The optimistic version check failed; a concurrent command won.
    VersionConflict,
}

impl RepositoryError {
    pub fn storage(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryError::Storage { operation, detail } => {
                write!(f, "storage failure during {operation}: {detail}")
            }
            RepositoryError::VersionConflict => f.write_str("case version conflict"),
        }
    }
}


impl std::error::Error for RepositoryError {}

/// Result of attempting to claim an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    /// This caller holds the claim and must run the command.
    Claimed,
    /// Another caller is processing the same key right now.
    InProgress,
    /// The command already completed; the stored snapshot is returned
    /// instead of re-executing.
    Completed(serde_json::Value),
}

#[async_trait]
pub trait CaseRepository: Send + Sync {
    /// Allocate the next protocol number for the draft's filing year and
    /// insert the new case, both in one atomic unit. A protocol handed out
    /// here is never reassigned.
    async fn insert_case(&self, draft: CaseDraft) -> Result<Case, RepositoryError>;

    async fn get(&self, protocol: &ProtocolNumber) -> Result<Option<Case>, RepositoryError>;

    /// Persist `case` (which carries its new version) iff the stored
    /// version still equals `expected_version`.
    async fn update_case(&self, case: &Case, expected_version: u64)
        -> Result<(), RepositoryError>;

    async fn list(&self, filter: &CaseFilter, page: &Page) -> Result<CasePage, RepositoryError>;

    /// Append one entry to the immutable transition log.
    async fn append_transition(&self, entry: &TransitionLogEntry) -> Result<(), RepositoryError>;

    /// Transition log for one case, oldest first.
    async fn transitions(
        &self,
        protocol: &ProtocolNumber,
    ) -> Result<Vec<TransitionLogEntry>, RepositoryError>;

    /// Atomically claim an idempotency key for processing.
    async fn try_claim(&self, key: &str, now: DateTime<Utc>) -> Result<ClaimResult, RepositoryError>;

    /// Record the command result for replay and mark the key completed.
    async fn complete_claim(
        &self,
        key: &str,
        snapshot: &serde_json::Value,
    ) -> Result<(), RepositoryError>;

    /// Drop an in-progress claim after a failed command so a retry can run.
    async fn release_claim(&self, key: &str) -> Result<(), RepositoryError>;

    /// Cases whose state carries a running wall-clock window
    /// (DefenseWindow, JudgedFirstInstance, AppealWindow). Used by the
    /// deadline sweep.
    async fn get_expirable(&self) -> Result<Vec<Case>, RepositoryError>;
}
