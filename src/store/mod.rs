//! Persistence ports
//!
//! Every read and write goes through a [`UnitOfWork`]: one database
//! transaction that is either committed as a whole or dropped. Components
//! never hold a connection across a provider call; they open a unit, do
//! their work, and commit.
//!
//! Two backends implement the ports:
//! - [`postgres::PgStore`] - production, row locks via `SELECT ... FOR UPDATE`
//! - [`memory::MemoryStore`] - tests and local runs, serializable by construction

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::{
    Brand, CatalogCounts, Category, Country, DenominationKind, Product, ProductListing,
    RedeemInstruction,
};
use crate::error::ErrorCategory;
use crate::ledger::LedgerEntry;
use crate::money::Currency;
use crate::rates::ExchangeRate;
use crate::referral::{Referral, ReferralEarnings, WithdrawalRequest, WithdrawalStatus};
use crate::transaction::{TransactionId, TransactionRecord, TransactionStatus, TransactionUpdate};
use crate::wallet::{Wallet, WalletId, WalletStatus};

/// Storage errors
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Check constraint violated: {0}")]
    CheckViolation(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    #[inline]
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            StoreError::UniqueViolation(_) => ErrorCategory::Conflict,
            StoreError::CheckViolation(_) => ErrorCategory::Validation,
            StoreError::Unavailable(_) | StoreError::Database(_) => ErrorCategory::Transient,
            StoreError::Corrupt(_) => ErrorCategory::Internal,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::UniqueViolation(db.constraint().unwrap_or("unknown").to_string())
            }
            sqlx::Error::Database(db) if db.is_check_violation() => {
                StoreError::CheckViolation(db.constraint().unwrap_or("unknown").to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_) => StoreError::Corrupt(e.to_string()),
            _ => StoreError::Database(e.to_string()),
        }
    }
}

/// Opens units of work
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Unit: UnitOfWork;

    async fn begin(&self) -> Result<Self::Unit, StoreError>;
}

/// One atomic unit. Dropping it without `commit` discards every write.
#[async_trait]
pub trait UnitOfWork:
    WalletRepo + TransactionRepo + LedgerRepo + RateRepo + ReferralRepo + CatalogRepo + Send + Sized
{
    async fn commit(self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait WalletRepo: Send {
    /// Insert; `UniqueViolation` if (owner, currency) exists
    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError>;

    async fn find_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>, StoreError>;

    /// Read under a row lock held until the unit ends
    async fn find_wallet_for_update(&mut self, id: WalletId)
    -> Result<Option<Wallet>, StoreError>;

    async fn find_wallet_by_owner(
        &mut self,
        owner_id: i64,
        currency: Currency,
    ) -> Result<Option<Wallet>, StoreError>;

    /// Only called by the ledger posting primitives
    async fn update_wallet_balance(
        &mut self,
        id: WalletId,
        balance: Decimal,
    ) -> Result<(), StoreError>;

    async fn update_wallet_status(
        &mut self,
        id: WalletId,
        status: WalletStatus,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TransactionRepo: Send {
    /// Insert; `UniqueViolation` on a repeated idempotency key
    async fn insert_transaction(&mut self, record: &TransactionRecord) -> Result<(), StoreError>;

    async fn find_transaction(
        &mut self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    async fn find_transaction_by_key(
        &mut self,
        idempotency_key: &str,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    /// Atomic CAS: apply only if the current status is `expected`.
    /// Returns true if the row was updated.
    async fn update_transaction_if(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
        update: &TransactionUpdate,
    ) -> Result<bool, StoreError>;

    /// Bump `updated_at` if the status is still `expected`, leaving every
    /// other column alone. Returns true if the row was updated.
    async fn touch_transaction_if(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
    ) -> Result<bool, StoreError>;

    /// Transactions in `statuses` last touched before `older_than`, oldest first
    async fn find_stale_transactions(
        &mut self,
        statuses: &[TransactionStatus],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, StoreError>;
}

#[async_trait]
pub trait LedgerRepo: Send {
    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError>;

    /// Entries of one transaction in posting order
    async fn ledger_entries_for_transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn ledger_sum_for_wallet(&mut self, wallet_id: WalletId) -> Result<Decimal, StoreError>;
}

#[async_trait]
pub trait RateRepo: Send {
    async fn insert_rate(&mut self, rate: &ExchangeRate) -> Result<(), StoreError>;

    /// Most recent rate with `effective_at <= at`
    async fn latest_rate(
        &mut self,
        base: Currency,
        quote: Currency,
        at: DateTime<Utc>,
    ) -> Result<Option<ExchangeRate>, StoreError>;
}

#[async_trait]
pub trait ReferralRepo: Send {
    /// Insert; `UniqueViolation` if the referee was already referred
    async fn insert_referral(&mut self, referral: &Referral) -> Result<(), StoreError>;

    async fn find_referral_by_referee(
        &mut self,
        referee_id: i64,
    ) -> Result<Option<Referral>, StoreError>;

    async fn find_earnings(&mut self, user_id: i64)
    -> Result<Option<ReferralEarnings>, StoreError>;

    /// Read under a row lock. A zero row is created first when the user has
    /// none, so concurrent first earnings queue on the same lock.
    async fn lock_earnings(&mut self, user_id: i64) -> Result<ReferralEarnings, StoreError>;

    async fn upsert_earnings(&mut self, earnings: &ReferralEarnings) -> Result<(), StoreError>;

    async fn insert_withdrawal_request(
        &mut self,
        request: &WithdrawalRequest,
    ) -> Result<(), StoreError>;

    async fn find_withdrawal_request(
        &mut self,
        id: Uuid,
    ) -> Result<Option<WithdrawalRequest>, StoreError>;

    /// Read under a row lock
    async fn find_withdrawal_request_for_update(
        &mut self,
        id: Uuid,
    ) -> Result<Option<WithdrawalRequest>, StoreError>;

    async fn update_withdrawal_request(
        &mut self,
        id: Uuid,
        status: WithdrawalStatus,
        transaction_id: Option<TransactionId>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CatalogRepo: Send {
    async fn upsert_brand(&mut self, brand: &Brand) -> Result<(), StoreError>;

    async fn upsert_category(&mut self, category: &Category) -> Result<(), StoreError>;

    async fn upsert_country(&mut self, country: &Country) -> Result<(), StoreError>;

    async fn upsert_product(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Replace the product's logo set
    async fn replace_logo_urls(&mut self, product_id: i64, urls: &[String])
    -> Result<(), StoreError>;

    /// Replace one denomination list; `CheckViolation` on a non-positive amount
    async fn replace_denominations(
        &mut self,
        product_id: i64,
        kind: DenominationKind,
        amounts: &[Decimal],
    ) -> Result<(), StoreError>;

    async fn upsert_redeem_instruction(
        &mut self,
        product_id: i64,
        instruction: &RedeemInstruction,
    ) -> Result<(), StoreError>;

    async fn find_product_listing(
        &mut self,
        product_id: i64,
    ) -> Result<Option<ProductListing>, StoreError>;

    async fn catalog_counts(&mut self) -> Result<CatalogCounts, StoreError>;
}
