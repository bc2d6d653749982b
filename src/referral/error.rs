//! Referral Error Types

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::models::WithdrawalStatus;
use crate::error::ErrorCategory;
use crate::ledger::LedgerError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ReferralError {
    // === Validation Errors ===
    #[error("User {0} cannot refer themselves")]
    SelfReferral(i64),

    #[error("Amount must be positive: {0}")]
    InvalidAmount(Decimal),

    #[error("Invalid withdrawal status: {0}")]
    InvalidStatus(String),

    #[error("Withdrawal request {id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        id: Uuid,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    },

    // === Conflict Errors ===
    #[error("User {0} has already been referred")]
    AlreadyReferred(i64),

    // === Balance Errors ===
    #[error("Withdrawal of {amount} is below the threshold of {threshold}")]
    WithdrawalThreshold { amount: Decimal, threshold: Decimal },

    #[error("Insufficient referral balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    // === Lookup Errors ===
    #[error("User {0} has no settlement wallet")]
    SettlementWalletNotFound(i64),

    #[error("Withdrawal request not found: {0}")]
    NotFound(Uuid),

    // === System Errors ===
    #[error("Storage failure ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: StoreError,
    },

    #[error("Payout posting failed ({context}): {source}")]
    Ledger {
        context: String,
        #[source]
        source: LedgerError,
    },
}

impl ReferralError {
    pub fn code(&self) -> &'static str {
        match self {
            ReferralError::SelfReferral(_) => "SELF_REFERRAL",
            ReferralError::InvalidAmount(_) => "INVALID_AMOUNT",
            ReferralError::InvalidStatus(_) => "INVALID_STATUS",
            ReferralError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            ReferralError::AlreadyReferred(_) => "ALREADY_REFERRED",
            ReferralError::WithdrawalThreshold { .. } => "WITHDRAWAL_THRESHOLD",
            ReferralError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            ReferralError::SettlementWalletNotFound(_) => "SETTLEMENT_WALLET_NOT_FOUND",
            ReferralError::NotFound(_) => "WITHDRAWAL_REQUEST_NOT_FOUND",
            ReferralError::Storage { .. } => "STORAGE_ERROR",
            ReferralError::Ledger { source, .. } => match source {
                LedgerError::Store(_) => "STORAGE_ERROR",
                _ => "PAYOUT_REJECTED",
            },
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ReferralError::SelfReferral(_)
            | ReferralError::InvalidAmount(_)
            | ReferralError::InvalidStatus(_) => ErrorCategory::Validation,
            ReferralError::InvalidStatusTransition { .. } | ReferralError::AlreadyReferred(_) => {
                ErrorCategory::Conflict
            }
            ReferralError::WithdrawalThreshold { .. }
            | ReferralError::InsufficientBalance { .. } => ErrorCategory::InsufficientResource,
            ReferralError::SettlementWalletNotFound(_) | ReferralError::NotFound(_) => {
                ErrorCategory::NotFound
            }
            ReferralError::Storage { source, .. } => source.category(),
            ReferralError::Ledger { source, .. } => source.category(),
        }
    }

    pub(crate) fn storage(context: impl Into<String>, source: StoreError) -> Self {
        ReferralError::Storage {
            context: context.into(),
            source,
        }
    }
}
