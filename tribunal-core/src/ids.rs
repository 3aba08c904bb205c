//! Identifier newtypes and shared vocabulary for the adjudication domain.
//!
//! Following the principle of "make illegal states unrepresentable", every
//! externally supplied identifier gets its own newtype so a protocol number
//! can never be passed where a member id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Newtype for a case protocol number.
///
/// Format is `<year>-<sequence>` (e.g. `2026-000042`). The number is
/// allocated exactly once at case creation and never reused or mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolNumber(pub String);

impl ProtocolNumber {
    /// Build a protocol number from its year and per-year sequence.
    pub fn new(year: i32, sequence: u64) -> Self {
        Self(format!("{year}-{sequence:06}"))
    }

    /// The filing year encoded in the protocol, if well-formed.
    pub fn year(&self) -> Option<i32> {
        self.0.split('-').next()?.parse().ok()
    }

    /// The per-year sequence encoded in the protocol, if well-formed.
    pub fn sequence(&self) -> Option<u64> {
        self.0.split('-').nth(1)?.parse().ok()
    }
}

impl fmt::Display for ProtocolNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProtocolNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProtocolNumber {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype for a commission/ticket member identifier issued by the
/// external directory service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberId(pub String);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemberId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The two kinds of adjudication case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseKind {
    /// Impugnação: a challenge contesting a candidate's eligibility.
    Challenge,
    /// Substituição: a request to replace a ticket member.
    Substitution,
}

impl CaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseKind::Challenge => "challenge",
            CaseKind::Substitution => "substitution",
        }
    }
}

impl fmt::Display for CaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Judgment instance. The process has exactly two: the first-instance
/// ruling and, after an appeal, the second-instance ruling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Instance {
    First,
    Second,
}

impl Instance {
    pub fn number(&self) -> u8 {
        match self {
            Instance::First => 1,
            Instance::Second => 2,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Instance::First),
            2 => Some(Instance::Second),
            _ => None,
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// A panel member's vote within a judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteValue {
    Upheld,
    Dismissed,
    Abstain,
}

/// Binding outcome of a closed judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Upheld,
    Dismissed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Upheld => f.write_str("upheld"),
            Outcome::Dismissed => f.write_str("dismissed"),
        }
    }
}

/// Who is filing an appeal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppellantRole {
    Challenger,
    ChallengedParty,
    Commission,
}

/// Which entity within a case owns an evidence item.
///
/// Evidence items are referenced, not owned: the same storage handle may be
/// looked up through any of these back-references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerRef {
    Case,
    Judgment(Instance),
    Appeal,
    CounterArgument,
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerRef::Case => f.write_str("case"),
            OwnerRef::Judgment(instance) => write!(f, "judgment-{instance}"),
            OwnerRef::Appeal => f.write_str("appeal"),
            OwnerRef::CounterArgument => f.write_str("counter-argument"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_number_format() {
        let protocol = ProtocolNumber::new(2026, 42);
        assert_eq!(protocol.0, "2026-000042");
        assert_eq!(protocol.year(), Some(2026));
        assert_eq!(protocol.sequence(), Some(42));
    }

    #[test]
    fn test_protocol_number_malformed() {
        let protocol = ProtocolNumber::from("garbage");
        assert_eq!(protocol.year(), None);
        assert_eq!(protocol.sequence(), None);
    }

    #[test]
    fn test_instance_round_trip() {
        assert_eq!(Instance::from_number(1), Some(Instance::First));
        assert_eq!(Instance::from_number(2), Some(Instance::Second));
        assert_eq!(Instance::from_number(3), None);
        assert_eq!(Instance::Second.number(), 2);
    }
}
