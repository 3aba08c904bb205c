//! In-memory implementation of `CaseRepository`.
//!
//! All state is held in memory behind one lock and lost on restart. Used
//! by unit and scenario tests; the single lock makes protocol allocation
//! trivially atomic with the case insert.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use tokio::sync::RwLock;

use tribunal_core::ids::ProtocolNumber;

use super::{CaseRepository, ClaimResult, RepositoryError, STALE_CLAIM_TTL_SECONDS};
use crate::machine::state::{Case, CaseDraft, CaseState, TransitionLogEntry};
use crate::registry::{CaseFilter, CasePage, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimState {
    InProgress,
    Completed,
}

#[derive(Debug, Clone)]
struct Claim {
    state: ClaimState,
    snapshot: Option<serde_json::Value>,
    recorded_at: i64,
}

#[derive(Default)]
struct Inner {
    cases: HashMap<ProtocolNumber, Case>,
    /// Last allocated sequence per filing year.
    counters: HashMap<i32, u64>,
    transitions: Vec<TransitionLogEntry>,
    claims: HashMap<String, Claim>,
}

#[derive(Default)]
pub struct InMemoryRepository {
    inner: RwLock<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CaseRepository for InMemoryRepository {
    async fn insert_case(&self, draft: CaseDraft) -> Result<Case, RepositoryError> {
        let mut inner = self.inner.write().await;
        let year = draft.filed_at.year();
        let counter = inner.counters.entry(year).or_insert(0);
        *counter += 1;
        let protocol = ProtocolNumber::new(year, *counter);
        let case = Case::new(protocol.clone(), draft);
        inner.cases.insert(protocol, case.clone());
        Ok(case)
    }

    async fn get(&self, protocol: &ProtocolNumber) -> Result<Option<Case>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.cases.get(protocol).cloned())
    }

    async fn update_case(
        &self,
        case: &Case,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .cases
            .get_mut(&case.protocol)
            .ok_or_else(|| RepositoryError::storage("update_case", "unknown protocol"))?;
        if stored.version != expected_version {
            return Err(RepositoryError::VersionConflict);
        }
        *stored = case.clone();
        Ok(())
    }

    async fn list(&self, filter: &CaseFilter, page: &Page) -> Result<CasePage, RepositoryError> {
        let inner = self.inner.read().await;
        let mut matching: Vec<Case> = inner
            .cases
            .values()
            .filter(|case| filter.matches(case))
            .cloned()
            .collect();
        if filter.oldest_first {
            matching.sort_by_key(|case| case.filed_at);
        } else {
            matching.sort_by(|a, b| b.filed_at.cmp(&a.filed_at));
        }

        let total = matching.len();
        let cases: Vec<Case> = matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        let consumed = page.offset + cases.len();
        let next_offset = (consumed < total).then_some(consumed);
        Ok(CasePage { cases, next_offset })
    }

    async fn append_transition(&self, entry: &TransitionLogEntry) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.transitions.push(entry.clone());
        Ok(())
    }

    async fn transitions(
        &self,
        protocol: &ProtocolNumber,
    ) -> Result<Vec<TransitionLogEntry>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transitions
            .iter()
            .filter(|entry| entry.protocol == *protocol)
            .cloned()
            .collect())
    }

    async fn try_claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult, RepositoryError> {
        let mut inner = self.inner.write().await;
        let now_secs = now.timestamp();
        match inner.claims.get(key) {
            None => {
                inner.claims.insert(
                    key.to_string(),
                    Claim {
                        state: ClaimState::InProgress,
                        snapshot: None,
                        recorded_at: now_secs,
                    },
                );
                Ok(ClaimResult::Claimed)
            }
            Some(claim) => match claim.state {
                ClaimState::Completed => Ok(ClaimResult::Completed(
                    claim.snapshot.clone().unwrap_or(serde_json::Value::Null),
                )),
                ClaimState::InProgress => {
                    if now_secs - claim.recorded_at > STALE_CLAIM_TTL_SECONDS {
                        inner.claims.insert(
                            key.to_string(),
                            Claim {
                                state: ClaimState::InProgress,
                                snapshot: None,
                                recorded_at: now_secs,
                            },
                        );
                        Ok(ClaimResult::Claimed)
                    } else {
                        Ok(ClaimResult::InProgress)
                    }
                }
            },
        }
    }

    async fn complete_claim(
        &self,
        key: &str,
        snapshot: &serde_json::Value,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        let claim = inner
            .claims
            .get_mut(key)
            .ok_or_else(|| RepositoryError::storage("complete_claim", "unknown claim key"))?;
        claim.state = ClaimState::Completed;
        claim.snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn release_claim(&self, key: &str) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.claims.remove(key);
        Ok(())
    }

    async fn get_expirable(&self) -> Result<Vec<Case>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .cases
            .values()
            .filter(|case| {
                matches!(
                    case.state,
                    CaseState::DefenseWindow { .. }
                        | CaseState::JudgedFirstInstance { .. }
                        | CaseState::AppealWindow { .. }
                )
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use tribunal_core::ids::{CaseKind, MemberId};

    use super::*;

    fn draft(filed_at: DateTime<Utc>) -> CaseDraft {
        CaseDraft {
            kind: CaseKind::Challenge,
            subject: MemberId::from("subject-1"),
            filer: MemberId::from("filer-1"),
            justification: "justification".to_string(),
            filed_at,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 10, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_protocols_are_sequential_within_a_year() {
        let repo = InMemoryRepository::new();
        let first = repo.insert_case(draft(now())).await.unwrap();
        let second = repo.insert_case(draft(now())).await.unwrap();
        assert_eq!(first.protocol.sequence(), Some(1));
        assert_eq!(second.protocol.sequence(), Some(2));
        assert_ne!(first.protocol, second.protocol);
    }

    #[tokio::test]
    async fn test_counters_are_per_year() {
        let repo = InMemoryRepository::new();
        let a = repo.insert_case(draft(now())).await.unwrap();
        let b = repo
            .insert_case(draft(Utc.with_ymd_and_hms(2027, 1, 2, 0, 0, 0).unwrap()))
            .await
            .unwrap();
        assert_eq!(a.protocol.year(), Some(2026));
        assert_eq!(b.protocol.year(), Some(2027));
        assert_eq!(b.protocol.sequence(), Some(1));
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let repo = InMemoryRepository::new();
        let mut case = repo.insert_case(draft(now())).await.unwrap();

        let stale = case.clone();
        case.version = 2;
        repo.update_case(&case, 1).await.unwrap();

        let mut loser = stale;
        loser.version = 2;
        let result = repo.update_case(&loser, 1).await;
        assert_eq!(result, Err(RepositoryError::VersionConflict));
    }

    #[tokio::test]
    async fn test_list_orders_newest_first_and_paginates() {
        let repo = InMemoryRepository::new();
        for day in 1..=5 {
            repo.insert_case(draft(Utc.with_ymd_and_hms(2026, 5, day, 0, 0, 0).unwrap()))
                .await
                .unwrap();
        }

        let page = repo
            .list(
                &CaseFilter::default(),
                &Page {
                    offset: 0,
                    limit: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.cases.len(), 2);
        assert_eq!(page.next_offset, Some(2));
        assert!(page.cases[0].filed_at > page.cases[1].filed_at);

        let last = repo
            .list(
                &CaseFilter::default(),
                &Page {
                    offset: 4,
                    limit: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(last.cases.len(), 1);
        assert_eq!(last.next_offset, None);
    }

    #[tokio::test]
    async fn test_claim_lifecycle() {
        let repo = InMemoryRepository::new();

        let result = repo.try_claim("key-1", now()).await.unwrap();
        assert_eq!(result, ClaimResult::Claimed);

        let result = repo.try_claim("key-1", now()).await.unwrap();
        assert_eq!(result, ClaimResult::InProgress);

        let snapshot = serde_json::json!({"protocol": "2026-000001"});
        repo.complete_claim("key-1", &snapshot).await.unwrap();

        let result = repo.try_claim("key-1", now()).await.unwrap();
        assert_eq!(result, ClaimResult::Completed(snapshot));
    }

    #[tokio::test]
    async fn test_stale_claim_is_reclaimed() {
        let repo = InMemoryRepository::new();
        repo.try_claim("key-1", now()).await.unwrap();

        let later = now() + chrono::Duration::seconds(STALE_CLAIM_TTL_SECONDS + 1);
        let result = repo.try_claim("key-1", later).await.unwrap();
        assert_eq!(result, ClaimResult::Claimed);
    }

    #[tokio::test]
    async fn test_released_claim_can_be_retried() {
        let repo = InMemoryRepository::new();
        repo.try_claim("key-1", now()).await.unwrap();
        repo.release_claim("key-1").await.unwrap();
        let result = repo.try_claim("key-1", now()).await.unwrap();
        assert_eq!(result, ClaimResult::Claimed);
    }

    #[tokio::test]
    async fn test_transition_log_is_per_case_and_ordered() {
        let repo = InMemoryRepository::new();
        let case = repo.insert_case(draft(now())).await.unwrap();
        for (i, next) in ["defense_window", "pending_first_judgment"].iter().enumerate() {
            repo.append_transition(&TransitionLogEntry {
                protocol: case.protocol.clone(),
                actor: "filer-1".to_string(),
                command: format!("command-{i}"),
                prior_state: "filed".to_string(),
                next_state: next.to_string(),
                recorded_at: now(),
            })
            .await
            .unwrap();
        }

        let log = repo.transitions(&case.protocol).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].next_state, "defense_window");

        let other = repo.transitions(&ProtocolNumber::from("2026-999999")).await.unwrap();
        assert!(other.is_empty());
    }
}
