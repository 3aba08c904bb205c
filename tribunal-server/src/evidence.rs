//! Evidence ledger: validation and attachment of evidence metadata.
//!
//! Byte storage lives in the external store; this module only enforces the
//! configured policy and records accepted items on the owning case.
//! Evidence is append-only: there is no detach operation, consistent with
//! the audit requirements of a judicial process.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tribunal_core::evidence_store::{EvidenceMeta, StorageHandle};
use tribunal_core::ids::OwnerRef;

use crate::machine::state::{Case, EvidenceItem};

/// Evidence acceptance policy, injected from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidencePolicy {
    /// Per-file size cap in bytes.
    pub max_file_bytes: u64,
    /// Total cap across all evidence attached to one case.
    pub max_case_bytes: u64,
    /// MIME allow-list. A trailing `/*` matches any subtype.
    pub allowed_types: Vec<String>,
}

impl Default for EvidencePolicy {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,
            max_case_bytes: 50 * 1024 * 1024,
            allowed_types: vec![
                "application/pdf".to_string(),
                "image/png".to_string(),
                "image/jpeg".to_string(),
            ],
        }
    }
}

impl EvidencePolicy {
    fn type_allowed(&self, mime_type: &str) -> bool {
        let mime_type = mime_type.to_ascii_lowercase();
        self.allowed_types.iter().any(|allowed| {
            if let Some(prefix) = allowed.strip_suffix("/*") {
                mime_type
                    .split('/')
                    .next()
                    .is_some_and(|major| major.eq_ignore_ascii_case(prefix))
            } else {
                allowed.eq_ignore_ascii_case(&mime_type)
            }
        })
    }
}

/// The specific rule an evidence item violated. Rejected items are never
/// attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceViolation {
    FileTooLarge { size_bytes: u64, max_bytes: u64 },
    CaseCapacityExceeded { total_bytes: u64, max_bytes: u64 },
    DisallowedType { mime_type: String },
}

impl fmt::Display for EvidenceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceViolation::FileTooLarge {
                size_bytes,
                max_bytes,
            } => write!(f, "file is {size_bytes} bytes, cap is {max_bytes}"),
            EvidenceViolation::CaseCapacityExceeded {
                total_bytes,
                max_bytes,
            } => write!(
                f,
                "case evidence would total {total_bytes} bytes, cap is {max_bytes}"
            ),
            EvidenceViolation::DisallowedType { mime_type } => {
                write!(f, "type {mime_type} is not in the allow-list")
            }
        }
    }
}

/// Validate declared metadata against the policy, given the bytes already
/// attached to the owning case.
pub fn validate(
    policy: &EvidencePolicy,
    meta: &EvidenceMeta,
    case_total_bytes: u64,
) -> Result<(), EvidenceViolation> {
    if meta.size_bytes > policy.max_file_bytes {
        return Err(EvidenceViolation::FileTooLarge {
            size_bytes: meta.size_bytes,
            max_bytes: policy.max_file_bytes,
        });
    }

    let total = case_total_bytes.saturating_add(meta.size_bytes);
    if total > policy.max_case_bytes {
        return Err(EvidenceViolation::CaseCapacityExceeded {
            total_bytes: total,
            max_bytes: policy.max_case_bytes,
        });
    }

    if !policy.type_allowed(&meta.mime_type) {
        return Err(EvidenceViolation::DisallowedType {
            mime_type: meta.mime_type.clone(),
        });
    }

    Ok(())
}

/// Record an accepted item on the case. Callers must have validated the
/// metadata and obtained the handle from the byte store first.
pub fn attach(
    case: &mut Case,
    owner: OwnerRef,
    meta: EvidenceMeta,
    handle: StorageHandle,
    now: DateTime<Utc>,
) {
    case.evidence.push(EvidenceItem {
        owner,
        file_name: meta.file_name,
        size_bytes: meta.size_bytes,
        mime_type: meta.mime_type,
        handle,
        attached_at: now,
    });
}

/// Items attached to one owner, in attachment order.
pub fn list<'a>(case: &'a Case, owner: &OwnerRef) -> Vec<&'a EvidenceItem> {
    case.evidence
        .iter()
        .filter(|item| item.owner == *owner)
        .collect()
}
