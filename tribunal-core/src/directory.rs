//! Client for the external identity/directory service.
//!
//! The directory resolves member identifiers for subjects, filers,
//! rapporteurs and panel members. The adjudication core never stores member
//! records itself; it only validates that references resolve.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::MemberId;

/// A member record as returned by the directory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: MemberId,
    pub name: String,
    /// Inactive members exist in the directory but may not act in a case.
    pub active: bool,
}

/// Directory lookup interface.
///
/// `Ok(None)` means the identifier is unknown; `Err` means the directory
/// itself was unreachable. Callers must treat the two differently: an
/// unknown id is a validation failure, an unreachable directory is a
/// dependency failure that must abort the command.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn resolve_member(&self, id: &MemberId) -> Result<Option<MemberRecord>>;
}

/// HTTP client for the directory service.
#[derive(Clone)]
pub struct HttpDirectoryClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDirectoryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MemberDirectory for HttpDirectoryClient {
    async fn resolve_member(&self, id: &MemberId) -> Result<Option<MemberRecord>> {
        let url = format!("{}/members/{}", self.base_url, id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("directory request failed for member {id}"))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(anyhow!(
                "directory returned {} for member {}",
                response.status(),
                id
            ));
        }

        let record: MemberRecord = response
            .json()
            .await
            .with_context(|| format!("invalid directory response for member {id}"))?;

        Ok(Some(record))
    }
}

/// In-process directory backed by a map. Used in tests and local runs.
#[derive(Default)]
pub struct InMemoryDirectory {
    members: RwLock<HashMap<MemberId, MemberRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory pre-populated with active members for the given ids.
    pub fn with_members<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let directory = Self::new();
        {
            let mut members = directory.members.write().unwrap();
            for id in ids {
                let id = MemberId(id.into());
                members.insert(
                    id.clone(),
                    MemberRecord {
                        name: format!("Member {id}"),
                        id,
                        active: true,
                    },
                );
            }
        }
        directory
    }

    pub fn insert(&self, record: MemberRecord) {
        let mut members = self.members.write().unwrap();
        members.insert(record.id.clone(), record);
    }

    /// Simulate the directory being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl MemberDirectory for InMemoryDirectory {
    async fn resolve_member(&self, id: &MemberId) -> Result<Option<MemberRecord>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("directory unavailable"));
        }
        let members = self.members.read().unwrap();
        Ok(members.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_directory_resolves_known_member() {
        let directory = InMemoryDirectory::with_members(["m-1"]);
        let record = directory
            .resolve_member(&MemberId::from("m-1"))
            .await
            .unwrap();
        assert!(record.is_some_and(|r| r.active));
    }

    #[tokio::test]
    async fn test_in_memory_directory_unknown_member_is_none() {
        let directory = InMemoryDirectory::with_members(["m-1"]);
        let record = directory
            .resolve_member(&MemberId::from("m-2"))
            .await
            .unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn test_in_memory_directory_unavailable_is_err() {
        let directory = InMemoryDirectory::with_members(["m-1"]);
        directory.set_unavailable(true);
        let result = directory.resolve_member(&MemberId::from("m-1")).await;
        assert!(result.is_err());
    }
}
