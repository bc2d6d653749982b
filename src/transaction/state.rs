//! Transaction Status Definitions
//!
//! State IDs are stored in PostgreSQL as SMALLINT.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction lifecycle
///
/// ```text
/// PENDING ──► SUCCEEDED
///    │
///    ├──────► FAILED
///    │
///    └──────► UNKNOWN ──(reconciliation)──► SUCCEEDED | FAILED
/// ```
///
/// SUCCEEDED and FAILED are final. UNKNOWN is terminal for the orchestrator
/// (the provider call is never re-issued) but may be resolved exactly once
/// by reconciliation against the provider's authoritative status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum TransactionStatus {
    /// Created; for external settlement the wallet is already reserved
    Pending = 0,

    /// Settled successfully
    #[serde(rename = "success")]
    Succeeded = 10,

    /// Failed; any reservation has been compensated
    Failed = -10,

    /// Provider outcome unknown (timeout); awaiting reconciliation
    Unknown = -20,
}

impl TransactionStatus {
    /// No automatic step will advance this transaction
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Nothing may change the status any more
    #[inline]
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Succeeded | TransactionStatus::Failed
        )
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        match (self, next) {
            (TransactionStatus::Pending, TransactionStatus::Pending) => false,
            (TransactionStatus::Pending, _) => true,
            (
                TransactionStatus::Unknown,
                TransactionStatus::Succeeded | TransactionStatus::Failed,
            ) => true,
            _ => false,
        }
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransactionStatus::Pending),
            10 => Some(TransactionStatus::Succeeded),
            -10 => Some(TransactionStatus::Failed),
            -20 => Some(TransactionStatus::Unknown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Succeeded => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransactionStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransactionStatus::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_and_final() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Succeeded.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(TransactionStatus::Unknown.is_terminal());

        assert!(TransactionStatus::Succeeded.is_final());
        assert!(TransactionStatus::Failed.is_final());
        assert!(!TransactionStatus::Unknown.is_final());
    }

    #[test]
    fn test_transitions() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Succeeded));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Unknown));
        assert!(Unknown.can_transition_to(Succeeded));
        assert!(Unknown.can_transition_to(Failed));

        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Succeeded));
        assert!(!Unknown.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_state_id_roundtrip() {
        for state in [
            TransactionStatus::Pending,
            TransactionStatus::Succeeded,
            TransactionStatus::Failed,
            TransactionStatus::Unknown,
        ] {
            assert_eq!(TransactionStatus::from_id(state.id()), Some(state));
        }
        assert!(TransactionStatus::from_id(999).is_none());
    }

    #[test]
    fn test_display_matches_envelope() {
        assert_eq!(TransactionStatus::Succeeded.to_string(), "success");
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Succeeded).unwrap(),
            "\"success\""
        );
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Unknown).unwrap(),
            "\"unknown\""
        );
    }
}
