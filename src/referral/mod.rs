//! Referral Earnings
//!
//! Per-user referral balances and the withdrawal request lifecycle.
//!
//! ```text
//! PENDING → APPROVED → COMPLETED
//!    │          │
//!    └──────────┴────→ REJECTED (available restored)
//! ```

pub mod error;
pub mod models;
pub mod service;

pub use error::ReferralError;
pub use models::{Referral, ReferralEarnings, WithdrawalRequest, WithdrawalStatus};
pub use service::{ReferralConfig, ReferralLedger};
