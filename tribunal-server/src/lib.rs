pub mod config;
pub mod error;
pub mod evidence;
pub mod machine;
pub mod orchestrator;
pub mod registry;
pub mod repository;
pub mod routes;
pub mod sweep;
pub mod voting;

pub use config::Config;
pub use error::DomainError;
pub use orchestrator::{
    BallotInput, EngineConfig, EvidenceUpload, Orchestrator, PetitionInput, SweepStats,
};
pub use registry::{CaseFilter, CasePage, CaseRegistry, Page};
