//! Effects (side effects as data).
//!
//! A transition returns its side effects as data; the orchestrator executes
//! them only after the new state has been committed. Notification effects
//! are best-effort: delivery failure is logged and never unwinds the
//! committed transition.

use serde::{Deserialize, Serialize};

use tribunal_core::notify::CaseEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Emit a notification through the external dispatcher.
    Notify(CaseEvent),
    /// Write a log line (for sweep no-ops and other non-transitions).
    Log { level: LogLevel, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
}
