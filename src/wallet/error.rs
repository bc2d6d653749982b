//! Wallet Error Types

use thiserror::Error;

use super::models::{WalletId, WalletStatus};
use crate::error::ErrorCategory;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum WalletError {
    // === Validation Errors ===
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Invalid wallet type: {0}")]
    InvalidWalletType(String),

    #[error("Invalid status transition for wallet {wallet_id}: {from} -> {to}")]
    InvalidStatusTransition {
        wallet_id: WalletId,
        from: WalletStatus,
        to: WalletStatus,
    },

    // === Conflict Errors ===
    #[error("Wallet already exists for owner {owner_id} in {currency}")]
    DuplicateWallet { owner_id: i64, currency: String },

    #[error("Wallet {0} still holds a balance and cannot be closed")]
    WalletNotEmpty(WalletId),

    // === Lookup Errors ===
    #[error("Wallet not found: {0}")]
    NotFound(String),

    // === System Errors ===
    #[error("Storage failure ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: StoreError,
    },
}

impl WalletError {
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            WalletError::InvalidWalletType(_) => "INVALID_WALLET_TYPE",
            WalletError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            WalletError::DuplicateWallet { .. } => "DUPLICATE_WALLET",
            WalletError::WalletNotEmpty(_) => "WALLET_NOT_EMPTY",
            WalletError::NotFound(_) => "WALLET_NOT_FOUND",
            WalletError::Storage { .. } => "STORAGE_ERROR",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            WalletError::UnsupportedCurrency(_)
            | WalletError::InvalidWalletType(_)
            | WalletError::InvalidStatusTransition { .. } => ErrorCategory::Validation,
            WalletError::DuplicateWallet { .. } | WalletError::WalletNotEmpty(_) => {
                ErrorCategory::Conflict
            }
            WalletError::NotFound(_) => ErrorCategory::NotFound,
            WalletError::Storage { source, .. } => source.category(),
        }
    }

    pub(crate) fn storage(context: impl Into<String>, source: StoreError) -> Self {
        WalletError::Storage {
            context: context.into(),
            source,
        }
    }
}
