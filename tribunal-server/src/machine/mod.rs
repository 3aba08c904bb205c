//! Explicit state machine for the adjudication case lifecycle.
//!
//! The design separates:
//! - **State**: what the case is (`CaseState` and the `Case` record)
//! - **Commands**: what a caller asked for (`Command`)
//! - **Effects**: what to do after commit (`Effect`, currently notifications)
//! - **Transition**: pure function `(Case, Command) -> (CaseState, Vec<Effect>)`
//!
//! The orchestrator persists the new state and executes effects; the
//! transition function itself has no side effects and is fully testable
//! without storage or collaborators.

pub mod command;
pub mod effect;
pub mod state;
pub mod transition;

pub use command::*;
pub use effect::*;
pub use state::*;
pub use transition::*;
