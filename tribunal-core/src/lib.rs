pub mod directory;
pub mod evidence_store;
pub mod ids;
pub mod notify;

pub use directory::{HttpDirectoryClient, InMemoryDirectory, MemberDirectory, MemberRecord};
pub use evidence_store::{
    EvidenceMeta, EvidenceStore, HttpEvidenceStoreClient, InMemoryEvidenceStore, StorageHandle,
};
pub use ids::{
    AppellantRole, CaseKind, Instance, MemberId, Outcome, OwnerRef, ProtocolNumber, VoteValue,
};
pub use notify::{CaseEvent, HttpNotifierClient, Notifier, RecordingNotifier, TracingNotifier};
