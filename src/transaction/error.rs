//! Transaction Error Types

use rust_decimal::Decimal;
use thiserror::Error;

use super::types::Platform;
use crate::error::ErrorCategory;
use crate::ledger::LedgerError;
use crate::money::{Currency, MoneyError};
use crate::rates::RateError;
use crate::store::StoreError;
use crate::wallet::WalletId;

#[derive(Error, Debug)]
pub enum TransactionError {
    // === Validation Errors ===
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] MoneyError),

    #[error("Source and destination wallet are the same")]
    SameWallet,

    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Wallet {wallet_id} holds {wallet}, request is in {request}")]
    CurrencyMismatch {
        wallet_id: WalletId,
        wallet: Currency,
        request: Currency,
    },

    #[error("Product {product_id} has no denomination {unit_price}")]
    InvalidDenomination { product_id: i64, unit_price: Decimal },

    #[error("Converted amount rounds to zero")]
    AmountTooSmall,

    // === Balance Errors ===
    #[error("Insufficient funds in wallet {wallet_id}: available {available}, required {required}")]
    InsufficientFunds {
        wallet_id: WalletId,
        available: Decimal,
        required: Decimal,
    },

    #[error("Wallet {wallet_id} is {status}")]
    WalletInactive {
        wallet_id: WalletId,
        status: &'static str,
    },

    // === Lookup Errors ===
    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Gift card product not found: {0}")]
    ProductNotFound(i64),

    #[error("No {0} provider configured")]
    ProviderNotConfigured(Platform),

    // === Idempotency Errors ===
    #[error("Idempotency key {0} already used for a different operation")]
    IdempotencyConflict(String),

    // === Collaborator Errors ===
    #[error(transparent)]
    Rate(#[from] RateError),

    // === System Errors ===
    #[error("Storage failure ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: StoreError,
    },

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

impl TransactionError {
    pub fn code(&self) -> &'static str {
        match self {
            TransactionError::InvalidAmount(_) => "INVALID_AMOUNT",
            TransactionError::SameWallet => "SAME_WALLET",
            TransactionError::InvalidQuantity => "INVALID_QUANTITY",
            TransactionError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            TransactionError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            TransactionError::InvalidDenomination { .. } => "INVALID_DENOMINATION",
            TransactionError::AmountTooSmall => "AMOUNT_TOO_SMALL",
            TransactionError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            TransactionError::WalletInactive { .. } => "WALLET_INACTIVE",
            TransactionError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            TransactionError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            TransactionError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            TransactionError::ProviderNotConfigured(_) => "PROVIDER_NOT_CONFIGURED",
            TransactionError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            TransactionError::Rate(e) => e.code(),
            TransactionError::Storage { .. } => "STORAGE_ERROR",
            TransactionError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            TransactionError::InvalidAmount(_)
            | TransactionError::SameWallet
            | TransactionError::InvalidQuantity
            | TransactionError::UnsupportedCurrency(_)
            | TransactionError::CurrencyMismatch { .. }
            | TransactionError::InvalidDenomination { .. }
            | TransactionError::AmountTooSmall => ErrorCategory::Validation,
            TransactionError::InsufficientFunds { .. } => ErrorCategory::InsufficientResource,
            TransactionError::WalletInactive { .. }
            | TransactionError::IdempotencyConflict(_) => ErrorCategory::Conflict,
            TransactionError::WalletNotFound(_)
            | TransactionError::TransactionNotFound(_)
            | TransactionError::ProductNotFound(_) => ErrorCategory::NotFound,
            TransactionError::ProviderNotConfigured(_)
            | TransactionError::InvalidStateTransition(_) => ErrorCategory::Internal,
            TransactionError::Rate(e) => e.category(),
            TransactionError::Storage { source, .. } => source.category(),
        }
    }

    pub(crate) fn storage(context: impl Into<String>, source: StoreError) -> Self {
        TransactionError::Storage {
            context: context.into(),
            source,
        }
    }

    /// Lift a posting failure, attaching the operation context to storage errors
    pub(crate) fn ledger(context: impl Into<String>, err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                wallet_id,
                available,
                required,
            } => TransactionError::InsufficientFunds {
                wallet_id,
                available,
                required,
            },
            LedgerError::WalletInactive {
                wallet_id, status, ..
            } => TransactionError::WalletInactive { wallet_id, status },
            LedgerError::NonPositiveAmount(_) => TransactionError::AmountTooSmall,
            LedgerError::CurrencyMismatch {
                wallet_id,
                wallet,
                posting,
            } => TransactionError::CurrencyMismatch {
                wallet_id,
                wallet,
                request: posting,
            },
            LedgerError::Store(source) => TransactionError::storage(context, source),
        }
    }
}
