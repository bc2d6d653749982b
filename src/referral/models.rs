//! Referral data models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::ReferralError;
use crate::transaction::TransactionId;
use crate::wallet::WalletId;

/// A referral; at most one per referee
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Referral {
    pub id: Uuid,
    pub referrer_id: i64,
    pub referee_id: i64,
    pub bonus: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Per-user earnings balances
///
/// `available_balance >= 0` and
/// `total_earned >= available_balance + withdrawn_balance` at all times.
/// The gap is money in pending/approved withdrawal requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferralEarnings {
    pub user_id: i64,
    pub total_earned: Decimal,
    pub available_balance: Decimal,
    pub withdrawn_balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl ReferralEarnings {
    pub fn empty(user_id: i64) -> Self {
        Self {
            user_id,
            total_earned: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            withdrawn_balance: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Amount reserved by open withdrawal requests
    pub fn in_flight(&self) -> Decimal {
        self.total_earned - self.available_balance - self.withdrawn_balance
    }

    pub fn is_consistent(&self) -> bool {
        self.available_balance >= Decimal::ZERO && self.in_flight() >= Decimal::ZERO
    }
}

/// Withdrawal request status
///
/// Status codes: 0=PENDING, 1=APPROVED, 2=COMPLETED, -1=REJECTED.
/// COMPLETED and REJECTED are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum WithdrawalStatus {
    Pending = 0,
    Approved = 1,
    Completed = 2,
    Rejected = -1,
}

impl WithdrawalStatus {
    #[inline]
    pub fn is_final(&self) -> bool {
        matches!(self, WithdrawalStatus::Completed | WithdrawalStatus::Rejected)
    }

    pub fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Completed) | (Pending, Rejected)
                | (Approved, Completed) | (Approved, Rejected)
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WithdrawalStatus::Pending),
            1 => Some(WithdrawalStatus::Approved),
            2 => Some(WithdrawalStatus::Completed),
            -1 => Some(WithdrawalStatus::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WithdrawalStatus {
    type Err = ReferralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(WithdrawalStatus::Pending),
            "approved" => Ok(WithdrawalStatus::Approved),
            "completed" => Ok(WithdrawalStatus::Completed),
            "rejected" => Ok(WithdrawalStatus::Rejected),
            other => Err(ReferralError::InvalidStatus(other.to_string())),
        }
    }
}

/// A request to move referral earnings into the user's settlement wallet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithdrawalRequest {
    pub id: Uuid,
    pub user_id: i64,
    pub amount: Decimal,
    pub wallet_id: WalletId,
    pub status: WithdrawalStatus,
    /// Payout transaction, set on completion
    pub transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WithdrawalRequest {
    pub fn new(user_id: i64, amount: Decimal, wallet_id: WalletId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            wallet_id,
            status: WithdrawalStatus::Pending,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
