use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use crate::evidence::EvidencePolicy;
use crate::machine::transition::DeadlinePolicy;
use crate::orchestrator::EngineConfig;

#[derive(Clone)]
pub struct Config {
    /// Base URL of the member directory service.
    pub directory_base_url: String,
    /// Base URL of the evidence byte store.
    pub evidence_store_base_url: String,
    /// Optional base URL of the notification dispatcher. If not set,
    /// notifications are written to the service log only.
    pub notify_base_url: Option<String>,
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Ballots that must be present before a judgment round may close.
    pub quorum: usize,
    pub defense_window_days: i64,
    pub appeal_window_days: i64,
    pub counter_argument_window_days: i64,
    pub evidence_max_file_bytes: u64,
    pub evidence_max_case_bytes: u64,
    pub evidence_allowed_types: Vec<String>,
    /// Seconds between deadline sweep passes.
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let directory_base_url = env::var("DIRECTORY_BASE_URL")
            .context("DIRECTORY_BASE_URL environment variable is required")?;

        let evidence_store_base_url = env::var("EVIDENCE_STORE_BASE_URL")
            .context("EVIDENCE_STORE_BASE_URL environment variable is required")?;

        let notify_base_url = env::var("NOTIFY_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let quorum = env::var("QUORUM_THRESHOLD")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<usize>()
            .context("QUORUM_THRESHOLD must be a valid number")?;
        if quorum == 0 {
            anyhow::bail!("QUORUM_THRESHOLD must be at least 1");
        }

        let defense_window_days = parse_window_days("DEFENSE_WINDOW_DAYS", 15)?;
        let appeal_window_days = parse_window_days("APPEAL_WINDOW_DAYS", 10)?;
        let counter_argument_window_days = parse_window_days("COUNTER_ARGUMENT_WINDOW_DAYS", 10)?;

        let evidence_max_file_bytes = env::var("EVIDENCE_MAX_FILE_BYTES")
            .unwrap_or_else(|_| (10 * 1024 * 1024).to_string())
            .parse::<u64>()
            .context("EVIDENCE_MAX_FILE_BYTES must be a valid number")?;

        let evidence_max_case_bytes = env::var("EVIDENCE_MAX_CASE_BYTES")
            .unwrap_or_else(|_| (50 * 1024 * 1024).to_string())
            .parse::<u64>()
            .context("EVIDENCE_MAX_CASE_BYTES must be a valid number")?;

        let evidence_allowed_types = parse_allowed_types(env::var("EVIDENCE_ALLOWED_TYPES").ok())
            .unwrap_or_else(|| EvidencePolicy::default().allowed_types);

        let sweep_interval_secs = env::var("SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("SWEEP_INTERVAL_SECS must be a valid number")?;

        Ok(Config {
            directory_base_url,
            evidence_store_base_url,
            notify_base_url,
            port,
            state_dir,
            quorum,
            defense_window_days,
            appeal_window_days,
            counter_argument_window_days,
            evidence_max_file_bytes,
            evidence_max_case_bytes,
            evidence_allowed_types,
            sweep_interval_secs,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("tribunal.db")
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            quorum: self.quorum,
            deadlines: DeadlinePolicy {
                defense_window_days: self.defense_window_days,
                appeal_window_days: self.appeal_window_days,
                counter_argument_window_days: self.counter_argument_window_days,
            },
            evidence: EvidencePolicy {
                max_file_bytes: self.evidence_max_file_bytes,
                max_case_bytes: self.evidence_max_case_bytes,
                allowed_types: self.evidence_allowed_types.clone(),
            },
        }
    }
}

fn parse_window_days(var: &str, default: i64) -> Result<i64> {
    let days = env::var(var)
        .unwrap_or_else(|_| default.to_string())
        .parse::<i64>()
        .with_context(|| format!("{var} must be a valid number"))?;
    if days < 1 {
        anyhow::bail!("{var} must be at least 1");
    }
    Ok(days)
}

/// Parse a comma-separated MIME allow-list.
///
/// Returns None if the value is missing or contains no non-empty entries,
/// so an unset variable falls back to the default policy instead of
/// accepting nothing.
pub fn parse_allowed_types(value: Option<String>) -> Option<Vec<String>> {
    let types: Vec<String> = value?
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if types.is_empty() {
        None
    } else {
        Some(types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_allowed_types_none() {
        assert_eq!(parse_allowed_types(None), None);
    }

    #[test]
    fn test_parse_allowed_types_empty_string() {
        // Empty value falls back to the default policy
        assert_eq!(parse_allowed_types(Some("".to_string())), None);
        assert_eq!(parse_allowed_types(Some(" , ,".to_string())), None);
    }

    #[test]
    fn test_parse_allowed_types_csv() {
        assert_eq!(
            parse_allowed_types(Some("application/pdf, image/*".to_string())),
            Some(vec!["application/pdf".to_string(), "image/*".to_string()])
        );
    }
}
