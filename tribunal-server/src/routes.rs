//! HTTP surface.
//!
//! Thin translation layer: requests are decoded into orchestrator calls,
//! domain errors are mapped onto status codes. No business rules live here.
//!
//! Every mutating route requires an `Idempotency-Key` header; replaying a
//! key returns the recorded result of the first run.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use tribunal_core::evidence_store::EvidenceMeta;
use tribunal_core::ids::{
    AppellantRole, CaseKind, Instance, MemberId, OwnerRef, ProtocolNumber,
};

use crate::error::DomainError;
use crate::evidence;
use crate::machine::state::{Case, EvidenceItem};
use crate::orchestrator::{BallotInput, EvidenceUpload, Orchestrator, PetitionInput};
use crate::registry::{CaseFilter, Page};

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cases", get(list_cases))
        .route("/cases/challenges", post(file_challenge))
        .route("/cases/substitutions", post(file_substitution))
        .route("/cases/:protocol", get(get_case))
        .route("/cases/:protocol/transitions", get(get_transitions))
        .route(
            "/cases/:protocol/evidence",
            post(attach_evidence).get(list_evidence),
        )
        .route("/cases/:protocol/defense", post(submit_defense))
        .route("/cases/:protocol/judgments", post(submit_judgment))
        .route("/cases/:protocol/appeals", post(submit_appeal))
        .route(
            "/cases/:protocol/counter-arguments",
            post(submit_counter_argument),
        )
        .route("/cases/:protocol/cancel", post(cancel))
        .with_state(orchestrator)
}

// =========================================================================
// Request/response bodies
// =========================================================================

#[derive(Debug, Deserialize)]
struct EvidenceFile {
    file_name: String,
    mime_type: String,
    /// File bytes, base64 encoded.
    content: String,
}

#[derive(Debug, Deserialize)]
struct PetitionRequest {
    subject: MemberId,
    filer: MemberId,
    justification: String,
    #[serde(default)]
    evidence: Vec<EvidenceFile>,
}

#[derive(Debug, Deserialize)]
struct AttachEvidenceRequest {
    /// `case`, `judgment-1`, `judgment-2`, `appeal` or `counter-argument`.
    owner: String,
    #[serde(flatten)]
    file: EvidenceFile,
}

#[derive(Debug, Deserialize)]
struct DefenseRequest {
    author: MemberId,
    text: String,
    #[serde(default)]
    evidence: Vec<EvidenceFile>,
}

#[derive(Debug, Deserialize)]
struct JudgmentRequest {
    instance: u8,
    rapporteur: MemberId,
    opinion: String,
    ballots: Vec<BallotInput>,
}

#[derive(Debug, Deserialize)]
struct AppealRequest {
    appellant: MemberId,
    role: AppellantRole,
    grounds: String,
    #[serde(default)]
    evidence: Vec<EvidenceFile>,
}

#[derive(Debug, Deserialize)]
struct CounterArgumentRequest {
    author: MemberId,
    text: String,
    #[serde(default)]
    evidence: Vec<EvidenceFile>,
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    requested_by: MemberId,
}

#[derive(Debug, Deserialize)]
struct EvidenceQuery {
    owner: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    kind: Option<String>,
    state: Option<String>,
    filer: Option<String>,
    subject: Option<String>,
    filed_after: Option<DateTime<Utc>>,
    filed_before: Option<DateTime<Utc>>,
    #[serde(default)]
    oldest_first: bool,
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct CaseListResponse {
    cases: Vec<Case>,
    next_offset: Option<usize>,
}

// =========================================================================
// Error mapping
// =========================================================================

#[derive(Debug)]
struct ApiError(DomainError);

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        Self(error)
    }
}

/// Status code for a domain error: bad input is 422, a command the current
/// state does not permit is 409, unreachable collaborators are 503.
fn error_status(error: &DomainError) -> StatusCode {
    match error {
        DomainError::Validation(_)
        | DomainError::InvalidSubject(_)
        | DomainError::UnknownMember(_)
        | DomainError::EvidenceRejected(_)
        | DomainError::QuorumNotMet { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::IllegalTransition { .. }
        | DomainError::InvalidSequencing(_)
        | DomainError::DuplicateInstance(_)
        | DomainError::DuplicateBallot(_)
        | DomainError::JudgmentClosed
        | DomainError::DuplicateCounterArgument
        | DomainError::DeadlineExpired { .. }
        | DomainError::ConcurrentModification => StatusCode::CONFLICT,
        DomainError::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = error_status(&self.0);
        let body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        });
        (status, Json(body)).into_response()
    }
}

// =========================================================================
// Decoding helpers
// =========================================================================

fn idempotency_key(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            ApiError(DomainError::Validation(
                "Idempotency-Key header is required".to_string(),
            ))
        })
}

fn decode_upload(file: EvidenceFile) -> Result<EvidenceUpload, ApiError> {
    let bytes = BASE64.decode(file.content.as_bytes()).map_err(|_| {
        ApiError(DomainError::Validation(
            "evidence content must be valid base64".to_string(),
        ))
    })?;
    Ok(EvidenceUpload {
        meta: EvidenceMeta {
            file_name: file.file_name,
            size_bytes: bytes.len() as u64,
            mime_type: file.mime_type,
        },
        bytes,
    })
}

fn parse_owner(owner: &str) -> Result<OwnerRef, ApiError> {
    match owner {
        "case" => Ok(OwnerRef::Case),
        "judgment-1" => Ok(OwnerRef::Judgment(Instance::First)),
        "judgment-2" => Ok(OwnerRef::Judgment(Instance::Second)),
        "appeal" => Ok(OwnerRef::Appeal),
        "counter-argument" => Ok(OwnerRef::CounterArgument),
        other => Err(ApiError(DomainError::Validation(format!(
            "unknown evidence owner '{other}'"
        )))),
    }
}

fn parse_instance(instance: u8) -> Result<Instance, ApiError> {
    Instance::from_number(instance).ok_or_else(|| {
        ApiError(DomainError::Validation(format!(
            "instance must be 1 or 2, got {instance}"
        )))
    })
}

fn parse_kind(kind: &str) -> Result<CaseKind, ApiError> {
    match kind {
        "challenge" => Ok(CaseKind::Challenge),
        "substitution" => Ok(CaseKind::Substitution),
        other => Err(ApiError(DomainError::Validation(format!(
            "unknown case kind '{other}'"
        )))),
    }
}

fn decode_uploads(files: Vec<EvidenceFile>) -> Result<Vec<EvidenceUpload>, ApiError> {
    files.into_iter().map(decode_upload).collect()
}

fn petition_input(kind: CaseKind, request: PetitionRequest) -> Result<PetitionInput, ApiError> {
    let evidence = decode_uploads(request.evidence)?;
    Ok(PetitionInput {
        kind,
        subject: request.subject,
        filer: request.filer,
        justification: request.justification,
        evidence,
    })
}

// =========================================================================
// Handlers
// =========================================================================

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "tribunal"
    }))
}

async fn file_challenge(
    State(orchestrator): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    Json(request): Json<PetitionRequest>,
) -> Result<(StatusCode, Json<Case>), ApiError> {
    let key = idempotency_key(&headers)?;
    let input = petition_input(CaseKind::Challenge, request)?;
    let case = orchestrator.file_petition(&key, input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(case)))
}

async fn file_substitution(
    State(orchestrator): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    Json(request): Json<PetitionRequest>,
) -> Result<(StatusCode, Json<Case>), ApiError> {
    let key = idempotency_key(&headers)?;
    let input = petition_input(CaseKind::Substitution, request)?;
    let case = orchestrator.file_petition(&key, input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(case)))
}

async fn get_case(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(protocol): Path<String>,
) -> Result<Json<Case>, ApiError> {
    let case = orchestrator
        .get_case(&ProtocolNumber::from(protocol))
        .await?;
    Ok(Json(case))
}

async fn get_transitions(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(protocol): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let transitions = orchestrator
        .get_transitions(&ProtocolNumber::from(protocol))
        .await?;
    Ok(Json(json!({ "transitions": transitions })))
}

async fn list_cases(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<CaseListResponse>, ApiError> {
    let filter = CaseFilter {
        kind: query.kind.as_deref().map(parse_kind).transpose()?,
        state: query.state,
        filer: query.filer.map(MemberId::from),
        subject: query.subject.map(MemberId::from),
        filed_after: query.filed_after,
        filed_before: query.filed_before,
        oldest_first: query.oldest_first,
    };
    let page = Page {
        offset: query.offset,
        limit: query.limit.unwrap_or_else(|| Page::default().limit),
    };
    let result = orchestrator.list_cases(&filter, &page).await?;
    Ok(Json(CaseListResponse {
        cases: result.cases,
        next_offset: result.next_offset,
    }))
}

async fn attach_evidence(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(protocol): Path<String>,
    headers: HeaderMap,
    Json(request): Json<AttachEvidenceRequest>,
) -> Result<Json<Case>, ApiError> {
    let key = idempotency_key(&headers)?;
    let owner = parse_owner(&request.owner)?;
    let upload = decode_upload(request.file)?;
    let case = orchestrator
        .attach_evidence(&key, &ProtocolNumber::from(protocol), owner, upload, Utc::now())
        .await?;
    Ok(Json(case))
}

async fn list_evidence(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(protocol): Path<String>,
    Query(query): Query<EvidenceQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let case = orchestrator
        .get_case(&ProtocolNumber::from(protocol))
        .await?;
    let items: Vec<&EvidenceItem> = match &query.owner {
        Some(owner) => evidence::list(&case, &parse_owner(owner)?),
        None => case.evidence.iter().collect(),
    };
    Ok(Json(json!({ "evidence": items })))
}

async fn submit_defense(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(protocol): Path<String>,
    headers: HeaderMap,
    Json(request): Json<DefenseRequest>,
) -> Result<Json<Case>, ApiError> {
    let key = idempotency_key(&headers)?;
    let uploads = decode_uploads(request.evidence)?;
    let case = orchestrator
        .submit_defense(
            &key,
            &ProtocolNumber::from(protocol),
            request.author,
            request.text,
            uploads,
            Utc::now(),
        )
        .await?;
    Ok(Json(case))
}

async fn submit_judgment(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(protocol): Path<String>,
    headers: HeaderMap,
    Json(request): Json<JudgmentRequest>,
) -> Result<Json<Case>, ApiError> {
    let key = idempotency_key(&headers)?;
    let instance = parse_instance(request.instance)?;
    let case = orchestrator
        .submit_judgment(
            &key,
            &ProtocolNumber::from(protocol),
            instance,
            request.rapporteur,
            request.opinion,
            request.ballots,
            Utc::now(),
        )
        .await?;
    Ok(Json(case))
}

async fn submit_appeal(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(protocol): Path<String>,
    headers: HeaderMap,
    Json(request): Json<AppealRequest>,
) -> Result<Json<Case>, ApiError> {
    let key = idempotency_key(&headers)?;
    let uploads = decode_uploads(request.evidence)?;
    let case = orchestrator
        .submit_appeal(
            &key,
            &ProtocolNumber::from(protocol),
            request.appellant,
            request.role,
            request.grounds,
            uploads,
            Utc::now(),
        )
        .await?;
    Ok(Json(case))
}

async fn submit_counter_argument(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(protocol): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CounterArgumentRequest>,
) -> Result<Json<Case>, ApiError> {
    let key = idempotency_key(&headers)?;
    let uploads = decode_uploads(request.evidence)?;
    let case = orchestrator
        .submit_counter_argument(
            &key,
            &ProtocolNumber::from(protocol),
            request.author,
            request.text,
            uploads,
            Utc::now(),
        )
        .await?;
    Ok(Json(case))
}

async fn cancel(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(protocol): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Case>, ApiError> {
    let key = idempotency_key(&headers)?;
    let case = orchestrator
        .cancel(
            &key,
            &ProtocolNumber::from(protocol),
            request.requested_by,
            Utc::now(),
        )
        .await?;
    Ok(Json(case))
}
