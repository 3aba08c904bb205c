//! Interface to the external evidence byte store.
//!
//! The adjudication core never holds file bytes. It validates declared
//! metadata, hands the bytes to the store, and keeps only the opaque
//! storage handle the store returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle issued by the byte store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageHandle(pub String);

impl fmt::Display for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StorageHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Declared metadata for an evidence file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceMeta {
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

/// Byte-storage interface. Implementations own durability of the bytes;
/// the core only tracks handles.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    async fn store(&self, meta: &EvidenceMeta, bytes: &[u8]) -> Result<StorageHandle>;
    async fn fetch(&self, handle: &StorageHandle) -> Result<Vec<u8>>;
}

/// HTTP client for the evidence byte store.
///
/// Uploads go to `POST /blobs` with the declared metadata in headers; the
/// store answers with the handle it assigned.
#[derive(Clone)]
pub struct HttpEvidenceStoreClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct StoreResponse {
    handle: String,
}

impl HttpEvidenceStoreClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl EvidenceStore for HttpEvidenceStoreClient {
    async fn store(&self, meta: &EvidenceMeta, bytes: &[u8]) -> Result<StorageHandle> {
        use anyhow::Context;

        let url = format!("{}/blobs", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("content-type", &meta.mime_type)
            .header("x-file-name", &meta.file_name)
            .body(bytes.to_vec())
            .send()
            .await
            .with_context(|| format!("evidence store upload failed for {}", meta.file_name))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "evidence store returned {} for {}",
                response.status(),
                meta.file_name
            ));
        }

        let body: StoreResponse = response
            .json()
            .await
            .context("invalid evidence store response")?;
        Ok(StorageHandle(body.handle))
    }

    async fn fetch(&self, handle: &StorageHandle) -> Result<Vec<u8>> {
        use anyhow::Context;

        let url = format!("{}/blobs/{}", self.base_url, handle);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("evidence store fetch failed for {handle}"))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "evidence store returned {} for {}",
                response.status(),
                handle
            ));
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("evidence store body read failed for {handle}"))?;
        Ok(bytes.to_vec())
    }
}

/// In-process byte store for tests and local runs.
#[derive(Default)]
pub struct InMemoryEvidenceStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl EvidenceStore for InMemoryEvidenceStore {
    async fn store(&self, _meta: &EvidenceMeta, bytes: &[u8]) -> Result<StorageHandle> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("evidence store unavailable"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = format!("blob-{id}");
        let mut blobs = self.blobs.write().unwrap();
        blobs.insert(handle.clone(), bytes.to_vec());
        Ok(StorageHandle(handle))
    }

    async fn fetch(&self, handle: &StorageHandle) -> Result<Vec<u8>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("evidence store unavailable"));
        }
        let blobs = self.blobs.read().unwrap();
        blobs
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| anyhow!("unknown storage handle {handle}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> EvidenceMeta {
        EvidenceMeta {
            file_name: "defense.pdf".to_string(),
            size_bytes: 3,
            mime_type: "application/pdf".to_string(),
        }
    }

    #[tokio::test]
    async fn test_store_and_fetch() {
        let store = InMemoryEvidenceStore::new();
        let handle = store.store(&meta(), b"abc").await.unwrap();
        assert_eq!(store.fetch(&handle).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_handles_are_distinct() {
        let store = InMemoryEvidenceStore::new();
        let a = store.store(&meta(), b"a").await.unwrap();
        let b = store.store(&meta(), b"b").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemoryEvidenceStore::new();
        store.set_unavailable(true);
        assert!(store.store(&meta(), b"abc").await.is_err());
    }
}
