//! Notification dispatch.
//!
//! Every committed case transition emits one event. Delivery is fire and
//! forget: a dispatcher failure is logged and never rolls back or surfaces
//! to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::{CaseKind, Instance, Outcome, ProtocolNumber};

/// Events emitted on case transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseEvent {
    PetitionFiled {
        protocol: ProtocolNumber,
        kind: CaseKind,
    },
    DefenseSubmitted {
        protocol: ProtocolNumber,
    },
    DefenseWindowExpired {
        protocol: ProtocolNumber,
    },
    JudgmentClosed {
        protocol: ProtocolNumber,
        instance: Instance,
        outcome: Outcome,
    },
    AppealFiled {
        protocol: ProtocolNumber,
    },
    CounterArgumentFiled {
        protocol: ProtocolNumber,
    },
    CaseFinal {
        protocol: ProtocolNumber,
        outcome: Outcome,
    },
    CaseCancelled {
        protocol: ProtocolNumber,
    },
}

impl CaseEvent {
    /// Short human-readable form for log lines.
    pub fn log_summary(&self) -> String {
        match self {
            CaseEvent::PetitionFiled { protocol, kind } => {
                format!("PetitionFiled({protocol}, {kind})")
            }
            CaseEvent::DefenseSubmitted { protocol } => format!("DefenseSubmitted({protocol})"),
            CaseEvent::DefenseWindowExpired { protocol } => {
                format!("DefenseWindowExpired({protocol})")
            }
            CaseEvent::JudgmentClosed {
                protocol,
                instance,
                outcome,
            } => format!("JudgmentClosed({protocol}, instance {instance}, {outcome})"),
            CaseEvent::AppealFiled { protocol } => format!("AppealFiled({protocol})"),
            CaseEvent::CounterArgumentFiled { protocol } => {
                format!("CounterArgumentFiled({protocol})")
            }
            CaseEvent::CaseFinal { protocol, outcome } => {
                format!("CaseFinal({protocol}, {outcome})")
            }
            CaseEvent::CaseCancelled { protocol } => format!("CaseCancelled({protocol})"),
        }
    }
}

/// Fire-and-forget notification interface.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &CaseEvent) -> Result<()>;
}

/// HTTP client for the notification dispatcher: events are POSTed as JSON
/// to `/events`.
#[derive(Clone)]
pub struct HttpNotifierClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotifierClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifierClient {
    async fn notify(&self, event: &CaseEvent) -> Result<()> {
        use anyhow::Context;

        let url = format!("{}/events", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(event)
            .send()
            .await
            .with_context(|| format!("notification dispatch failed: {}", event.log_summary()))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "notification dispatcher returned {} for {}",
                response.status(),
                event.log_summary()
            ));
        }
        Ok(())
    }
}

/// Notifier that only writes to the log. Used when no real dispatcher is
/// configured.
#[derive(Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: &CaseEvent) -> Result<()> {
        tracing::info!("notification: {}", event.log_summary());
        Ok(())
    }
}

/// Test notifier that records every event it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<CaseEvent>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CaseEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Make every subsequent `notify` call fail. Delivery failures must
    /// never affect the domain transition, and tests assert exactly that.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &CaseEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("notification dispatcher down"));
        }
        Ok(())
    }
}
