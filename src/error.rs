//! Error categories shared by every module.
//!
//! Each module owns a `thiserror` enum; callers only ever need the small,
//! closed set of categories below to decide what to do with a failure.

use std::fmt;

/// Closed set of failure categories exposed across module boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed input, rejected before any unit of work opens
    Validation,
    /// Uniqueness or state conflict (duplicate wallet, already referred)
    Conflict,
    /// Balance or threshold precondition not met; caller must resubmit
    InsufficientResource,
    /// Referenced entity does not exist
    NotFound,
    /// Store or provider unavailable; the DB phase is safe to retry
    Transient,
    /// Invariant violation or corrupted data
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Conflict => "CONFLICT",
            ErrorCategory::InsufficientResource => "INSUFFICIENT_RESOURCE",
            ErrorCategory::NotFound => "NOT_FOUND",
            ErrorCategory::Transient => "TRANSIENT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    /// Whether the whole operation may be resubmitted unchanged.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }

    /// HTTP status suggestion for an API layer sitting on top of this crate
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCategory::Validation => 400,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::InsufficientResource => 422,
            ErrorCategory::Transient => 503,
            ErrorCategory::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(!ErrorCategory::Conflict.is_retryable());
        assert!(!ErrorCategory::InsufficientResource.is_retryable());
    }

    #[test]
    fn test_http_status() {
        assert_eq!(ErrorCategory::Validation.http_status(), 400);
        assert_eq!(ErrorCategory::Conflict.http_status(), 409);
        assert_eq!(ErrorCategory::Transient.http_status(), 503);
    }
}
