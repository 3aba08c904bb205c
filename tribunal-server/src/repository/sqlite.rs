//! SQLite implementation of `CaseRepository`.
//!
//! This provides persistent storage that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Forward Compatibility
//!
//! Cases are stored as one JSON document per row plus a few extracted columns
//! for filtering. When adding fields to `Case`, use `#[serde(default)]` so
//! old persisted rows still deserialize.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{error, warn};

use tribunal_core::ids::ProtocolNumber;

use super::{CaseRepository, ClaimResult, RepositoryError, STALE_CLAIM_TTL_SECONDS};
use crate::machine::state::{Case, CaseDraft, TransitionLogEntry};
use crate::registry::{CaseFilter, CasePage, Page};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed case repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Create a new SQLite repository at the given path.
    ///
    /// Creates the database file and schema if they don't exist and runs any
    /// pending migrations.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` for maximum durability (survives OS/power failure)
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();

        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";
        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;

                    // Restrictive permissions on the state directory protect
                    // the WAL/SHM files SQLite creates with default umask.
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let dir_permissions = std::fs::Permissions::from_mode(0o700);
                        if let Err(e) = std::fs::set_permissions(parent, dir_permissions) {
                            warn!(
                                "Failed to set restrictive permissions on state directory: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // Verify WAL mode was actually enabled - SQLite can silently keep
        // DELETE mode on filesystems that don't support shared memory, which
        // would violate our durability/concurrency assumptions. In-memory
        // databases report "memory", which is fine for tests.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'. \
                     This can happen on filesystems that don't support shared memory. \
                     The database requires WAL mode for durability and concurrency \
                     guarantees.",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        // Migration from version 0 (fresh database) to version 1
        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS cases (
                    protocol TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    state TEXT NOT NULL,
                    filer TEXT NOT NULL,
                    subject TEXT NOT NULL,
                    filed_at INTEGER NOT NULL,
                    version INTEGER NOT NULL,
                    case_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_cases_state ON cases(state);
                CREATE INDEX IF NOT EXISTS idx_cases_filed_at ON cases(filed_at);

                CREATE TABLE IF NOT EXISTS protocol_counters (
                    year INTEGER PRIMARY KEY,
                    next_sequence INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS case_transitions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    protocol TEXT NOT NULL,
                    actor TEXT NOT NULL,
                    command TEXT NOT NULL,
                    prior_state TEXT NOT NULL,
                    next_state TEXT NOT NULL,
                    recorded_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_transitions_protocol
                    ON case_transitions(protocol);

                CREATE TABLE IF NOT EXISTS idempotency_claims (
                    key TEXT PRIMARY KEY,
                    claim_state INTEGER NOT NULL,
                    snapshot TEXT,
                    recorded_at INTEGER NOT NULL
                );
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        // Future migrations would go here:
        // if from_version < 2 { ... }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }
}

fn row_to_case(json: &str) -> Result<Case, RepositoryError> {
    serde_json::from_str(json).map_err(|e| RepositoryError::storage("decode case", e.to_string()))
}

fn encode_case(case: &Case) -> Result<String, RepositoryError> {
    serde_json::to_string(case)
        .map_err(|e| RepositoryError::storage("serialize case", e.to_string()))
}

#[async_trait]
impl CaseRepository for SqliteRepository {
    async fn insert_case(&self, draft: CaseDraft) -> Result<Case, RepositoryError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::storage("insert_case", e.to_string()))?;

            // Counter bump, sequence read and case insert are one transaction,
            // so a failed insert never burns a protocol number.
            use chrono::Datelike;
            let year = draft.filed_at.year();
            tx.execute(
                "INSERT INTO protocol_counters (year, next_sequence) VALUES (?1, 1)
                 ON CONFLICT(year) DO UPDATE SET next_sequence = next_sequence + 1",
                params![year],
            )
            .map_err(|e| RepositoryError::storage("allocate protocol", e.to_string()))?;

            let sequence: i64 = tx
                .query_row(
                    "SELECT next_sequence FROM protocol_counters WHERE year = ?1",
                    params![year],
                    |row| row.get(0),
                )
                .map_err(|e| RepositoryError::storage("allocate protocol", e.to_string()))?;

            let protocol = ProtocolNumber::new(year, sequence as u64);
            let case = Case::new(protocol, draft);
            let case_json = encode_case(&case)?;

            tx.execute(
                "INSERT INTO cases (protocol, kind, state, filer, subject, filed_at, version, case_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    case.protocol.0,
                    case.kind.as_str(),
                    case.state.name(),
                    case.filer.0,
                    case.subject.0,
                    case.filed_at.timestamp_micros(),
                    case.version as i64,
                    case_json
                ],
            )
            .map_err(|e| RepositoryError::storage("insert_case", e.to_string()))?;

            tx.commit()
                .map_err(|e| RepositoryError::storage("insert_case", e.to_string()))?;

            Ok(case)
        })
        .await
        .map_err(|e| RepositoryError::storage("insert_case", e.to_string()))?
    }

    async fn get(&self, protocol: &ProtocolNumber) -> Result<Option<Case>, RepositoryError> {
        let conn = self.conn.clone();
        let protocol = protocol.0.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let json: Option<String> = conn
                .query_row(
                    "SELECT case_json FROM cases WHERE protocol = ?1",
                    params![protocol],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get", e.to_string()))?;

            match json {
                Some(json) => Ok(Some(row_to_case(&json)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| RepositoryError::storage("get", e.to_string()))?
    }

    async fn update_case(
        &self,
        case: &Case,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let case = case.clone();
        let case_json = encode_case(&case)?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let changed = conn
                .execute(
                    "UPDATE cases
                     SET state = ?1, version = ?2, case_json = ?3
                     WHERE protocol = ?4 AND version = ?5",
                    params![
                        case.state.name(),
                        case.version as i64,
                        case_json,
                        case.protocol.0,
                        expected_version as i64
                    ],
                )
                .map_err(|e| RepositoryError::storage("update_case", e.to_string()))?;

            if changed == 0 {
                let exists: bool = conn
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM cases WHERE protocol = ?1)",
                        params![case.protocol.0],
                        |row| row.get(0),
                    )
                    .map_err(|e| RepositoryError::storage("update_case", e.to_string()))?;
                return if exists {
                    Err(RepositoryError::VersionConflict)
                } else {
                    Err(RepositoryError::storage("update_case", "unknown protocol"))
                };
            }

            Ok(())
        })
        .await
        .map_err(|e| RepositoryError::storage("update_case", e.to_string()))?
    }

    async fn list(&self, filter: &CaseFilter, page: &Page) -> Result<CasePage, RepositoryError> {
        let conn = self.conn.clone();
        let filter = filter.clone();
        let page = *page;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let mut sql = String::from("SELECT case_json FROM cases");
            let mut clauses: Vec<&'static str> = Vec::new();
            let mut values: Vec<Box<dyn ToSql>> = Vec::new();

            if let Some(kind) = filter.kind {
                clauses.push("kind = ?");
                values.push(Box::new(kind.as_str().to_string()));
            }
            if let Some(state) = &filter.state {
                clauses.push("state = ?");
                values.push(Box::new(state.clone()));
            }
            if let Some(filer) = &filter.filer {
                clauses.push("filer = ?");
                values.push(Box::new(filer.0.clone()));
            }
            if let Some(subject) = &filter.subject {
                clauses.push("subject = ?");
                values.push(Box::new(subject.0.clone()));
            }
            if let Some(after) = filter.filed_after {
                clauses.push("filed_at >= ?");
                values.push(Box::new(after.timestamp_micros()));
            }
            if let Some(before) = filter.filed_before {
                clauses.push("filed_at <= ?");
                values.push(Box::new(before.timestamp_micros()));
            }

            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            if filter.oldest_first {
                sql.push_str(" ORDER BY filed_at ASC, protocol ASC");
            } else {
                sql.push_str(" ORDER BY filed_at DESC, protocol DESC");
            }
            // One extra row tells us whether another page exists.
            sql.push_str(" LIMIT ? OFFSET ?");
            values.push(Box::new(page.limit as i64 + 1));
            values.push(Box::new(page.offset as i64));

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RepositoryError::storage("list", e.to_string()))?;

            let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let rows = stmt
                .query_map(&params[..], |row| row.get::<_, String>(0))
                .map_err(|e| RepositoryError::storage("list", e.to_string()))?;

            let mut cases = Vec::new();
            for row in rows {
                let json = match row {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to read case row from SQLite: {}", e);
                        continue;
                    }
                };
                // Skip rows that fail to deserialize so one corrupt row does
                // not hide the rest of the docket.
                match serde_json::from_str::<Case>(&json) {
                    Ok(case) => cases.push(case),
                    Err(e) => {
                        warn!("Skipping corrupt case row: {}", e);
                        continue;
                    }
                }
            }

            let has_more = cases.len() > page.limit;
            cases.truncate(page.limit);
            let next_offset = has_more.then_some(page.offset + page.limit);
            Ok(CasePage { cases, next_offset })
        })
        .await
        .map_err(|e| RepositoryError::storage("list", e.to_string()))?
    }

    async fn append_transition(&self, entry: &TransitionLogEntry) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let entry = entry.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            conn.execute(
                "INSERT INTO case_transitions
                     (protocol, actor, command, prior_state, next_state, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.protocol.0,
                    entry.actor,
                    entry.command,
                    entry.prior_state,
                    entry.next_state,
                    entry.recorded_at.timestamp_micros()
                ],
            )
            .map_err(|e| RepositoryError::storage("append_transition", e.to_string()))?;

            Ok(())
        })
        .await
        .map_err(|e| RepositoryError::storage("append_transition", e.to_string()))?
    }

    async fn transitions(
        &self,
        protocol: &ProtocolNumber,
    ) -> Result<Vec<TransitionLogEntry>, RepositoryError> {
        let conn = self.conn.clone();
        let protocol = protocol.0.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let mut stmt = conn
                .prepare(
                    "SELECT protocol, actor, command, prior_state, next_state, recorded_at
                     FROM case_transitions WHERE protocol = ?1 ORDER BY id ASC",
                )
                .map_err(|e| RepositoryError::storage("transitions", e.to_string()))?;

            let rows = stmt
                .query_map(params![protocol], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })
                .map_err(|e| RepositoryError::storage("transitions", e.to_string()))?;

            let mut entries = Vec::new();
            for row in rows {
                let (protocol, actor, command, prior_state, next_state, recorded_at) =
                    row.map_err(|e| RepositoryError::storage("transitions", e.to_string()))?;
                let recorded_at = DateTime::<Utc>::from_timestamp_micros(recorded_at)
                    .ok_or_else(|| {
                        RepositoryError::storage("transitions", "timestamp out of range")
                    })?;
                entries.push(TransitionLogEntry {
                    protocol: ProtocolNumber::from(protocol),
                    actor,
                    command,
                    prior_state,
                    next_state,
                    recorded_at,
                });
            }

            Ok(entries)
        })
        .await
        .map_err(|e| RepositoryError::storage("transitions", e.to_string()))?
    }

    async fn try_claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult, RepositoryError> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let now_secs = now.timestamp();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            // INSERT OR IGNORE plus changes() is the atomic claim: exactly
            // one concurrent caller observes changes() == 1.
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO idempotency_claims
                         (key, claim_state, snapshot, recorded_at)
                     VALUES (?1, 0, NULL, ?2)",
                    params![key, now_secs],
                )
                .map_err(|e| RepositoryError::storage("try_claim", e.to_string()))?;

            if inserted == 1 {
                return Ok(ClaimResult::Claimed);
            }

            let (claim_state, snapshot): (i64, Option<String>) = conn
                .query_row(
                    "SELECT claim_state, snapshot FROM idempotency_claims WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(|e| RepositoryError::storage("try_claim", e.to_string()))?;

            if claim_state == 1 {
                let snapshot = snapshot
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|e| RepositoryError::storage("decode claim snapshot", e.to_string()))?
                    .unwrap_or(serde_json::Value::Null);
                return Ok(ClaimResult::Completed(snapshot));
            }

            // In-progress claim: take it over only if the original holder has
            // been gone longer than the stale TTL. The guarded UPDATE keeps
            // the takeover atomic under concurrency.
            let cutoff = now_secs - STALE_CLAIM_TTL_SECONDS;
            let reclaimed = conn
                .execute(
                    "UPDATE idempotency_claims SET recorded_at = ?1
                     WHERE key = ?2 AND claim_state = 0 AND recorded_at < ?3",
                    params![now_secs, key, cutoff],
                )
                .map_err(|e| RepositoryError::storage("try_claim", e.to_string()))?;

            if reclaimed == 1 {
                Ok(ClaimResult::Claimed)
            } else {
                Ok(ClaimResult::InProgress)
            }
        })
        .await
        .map_err(|e| RepositoryError::storage("try_claim", e.to_string()))?
    }

    async fn complete_claim(
        &self,
        key: &str,
        snapshot: &serde_json::Value,
    ) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let snapshot = serde_json::to_string(snapshot)
            .map_err(|e| RepositoryError::storage("serialize claim snapshot", e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let changed = conn
                .execute(
                    "UPDATE idempotency_claims SET claim_state = 1, snapshot = ?1
                     WHERE key = ?2",
                    params![snapshot, key],
                )
                .map_err(|e| RepositoryError::storage("complete_claim", e.to_string()))?;

            if changed == 0 {
                return Err(RepositoryError::storage("complete_claim", "unknown claim key"));
            }

            Ok(())
        })
        .await
        .map_err(|e| RepositoryError::storage("complete_claim", e.to_string()))?
    }

    async fn release_claim(&self, key: &str) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            // Completed claims are kept; only an in-progress claim from a
            // failed command is released for retry.
            conn.execute(
                "DELETE FROM idempotency_claims WHERE key = ?1 AND claim_state = 0",
                params![key],
            )
            .map_err(|e| RepositoryError::storage("release_claim", e.to_string()))?;

            Ok(())
        })
        .await
        .map_err(|e| RepositoryError::storage("release_claim", e.to_string()))?
    }

    async fn get_expirable(&self) -> Result<Vec<Case>, RepositoryError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let mut stmt = conn
                .prepare(
                    "SELECT case_json FROM cases
                     WHERE state IN ('defense_window', 'judged_first_instance', 'appeal_window')",
                )
                .map_err(|e| RepositoryError::storage("get_expirable", e.to_string()))?;

            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| RepositoryError::storage("get_expirable", e.to_string()))?;

            let mut cases = Vec::new();
            for row in rows {
                let json = match row {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to read expirable row from SQLite: {}", e);
                        continue;
                    }
                };
                // Skip corrupt rows so one bad case cannot stall the whole
                // deadline sweep.
                match serde_json::from_str::<Case>(&json) {
                    Ok(case) => cases.push(case),
                    Err(e) => {
                        warn!("Skipping corrupt case row in deadline sweep: {}", e);
                        continue;
                    }
                }
            }

            Ok(cases)
        })
        .await
        .map_err(|e| RepositoryError::storage("get_expirable", e.to_string()))?
    }
}
