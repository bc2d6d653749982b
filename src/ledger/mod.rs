//! Double-entry Ledger
//!
//! Append-only entries plus the ONLY sanctioned balance-mutation primitives.
//!
//! # Invariants
//!
//! 1. **Balance = Σ entries**: a wallet balance only changes together with
//!    an entry for that wallet, inside the same unit of work
//! 2. **Zero-sum**: the entries of one transaction net to zero in the
//!    transaction's settlement currency (`settlement_amount`)
//! 3. **Append-only**: entries are never edited; corrections are new entries

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorCategory;
use crate::money::Currency;
use crate::store::{LedgerRepo, StoreError, WalletRepo};
use crate::transaction::TransactionId;
use crate::wallet::{Wallet, WalletId};

/// Ledger entry ID (ULID, sorts in posting order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerEntryId(ulid::Ulid);

impl LedgerEntryId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn from_ulid(id: ulid::Ulid) -> Self {
        Self(id)
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for LedgerEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LedgerEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account an entry is booked against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum LedgerAccount {
    /// Customer wallet
    Wallet(WalletId),
    /// Platform fee revenue
    Fees,
    /// Platform reward pool (referral payouts)
    Rewards,
    /// Counterparty outside the platform: a bank account, a provider, a chain address
    External(String),
}

impl LedgerAccount {
    /// Stored `account_kind` column
    pub fn kind_id(&self) -> i16 {
        match self {
            LedgerAccount::Wallet(_) => 1,
            LedgerAccount::Fees => 2,
            LedgerAccount::Rewards => 3,
            LedgerAccount::External(_) => 4,
        }
    }

    /// Stored `account_ref` column
    pub fn reference(&self) -> String {
        match self {
            LedgerAccount::Wallet(id) => id.to_string(),
            LedgerAccount::Fees => "fees".to_string(),
            LedgerAccount::Rewards => "rewards".to_string(),
            LedgerAccount::External(r) => r.clone(),
        }
    }

    pub fn from_parts(kind: i16, reference: &str) -> Option<Self> {
        match kind {
            1 => reference.parse().ok().map(LedgerAccount::Wallet),
            2 => Some(LedgerAccount::Fees),
            3 => Some(LedgerAccount::Rewards),
            4 => Some(LedgerAccount::External(reference.to_string())),
            _ => None,
        }
    }

    /// Counterparty is inside this system
    #[inline]
    pub fn is_on_platform(&self) -> bool {
        !matches!(self, LedgerAccount::External(_))
    }

    pub fn wallet_id(&self) -> Option<WalletId> {
        match self {
            LedgerAccount::Wallet(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerAccount::Wallet(id) => write!(f, "wallet:{}", id),
            LedgerAccount::Fees => write!(f, "fees"),
            LedgerAccount::Rewards => write!(f, "rewards"),
            LedgerAccount::External(r) => write!(f, "external:{}", r),
        }
    }
}

/// One single-sided balance movement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub transaction_id: TransactionId,
    pub account: LedgerAccount,
    /// Currency of `amount`
    pub currency: Currency,
    /// Signed: negative debits, positive credits
    pub amount: Decimal,
    /// `amount` expressed in the transaction's settlement currency
    pub settlement_amount: Decimal,
    /// Wallet balance after this entry (wallet accounts only)
    pub balance_after: Option<Decimal>,
    pub on_platform: bool,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn new(
        transaction_id: TransactionId,
        account: LedgerAccount,
        currency: Currency,
        amount: Decimal,
        settlement_amount: Decimal,
        balance_after: Option<Decimal>,
    ) -> Self {
        Self {
            id: LedgerEntryId::new(),
            transaction_id,
            on_platform: account.is_on_platform(),
            account,
            currency,
            amount,
            settlement_amount,
            balance_after,
            created_at: Utc::now(),
        }
    }
}

/// Posting failures
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Insufficient funds in wallet {wallet_id}: available {available}, required {required}")]
    InsufficientFunds {
        wallet_id: WalletId,
        available: Decimal,
        required: Decimal,
    },

    #[error("Wallet {wallet_id} is {status} and cannot be {action}")]
    WalletInactive {
        wallet_id: WalletId,
        status: &'static str,
        action: &'static str,
    },

    #[error("Posting amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("Wallet {wallet_id} is denominated in {wallet}, posting is in {posting}")]
    CurrencyMismatch {
        wallet_id: WalletId,
        wallet: Currency,
        posting: Currency,
    },

    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::InsufficientFunds { .. } => ErrorCategory::InsufficientResource,
            LedgerError::WalletInactive { .. } => ErrorCategory::Conflict,
            LedgerError::NonPositiveAmount(_) | LedgerError::CurrencyMismatch { .. } => {
                ErrorCategory::Internal
            }
            LedgerError::Store(e) => e.category(),
        }
    }
}

/// Debit a wallet and append its entry.
///
/// `wallet` must have been read under a row lock in the same unit; it is
/// updated in place with the new balance.
pub async fn post_debit<U>(
    unit: &mut U,
    wallet: &mut Wallet,
    transaction_id: TransactionId,
    amount: Decimal,
    settlement_amount: Decimal,
) -> Result<LedgerEntry, LedgerError>
where
    U: WalletRepo + LedgerRepo + ?Sized,
{
    if amount <= Decimal::ZERO {
        return Err(LedgerError::NonPositiveAmount(amount));
    }
    if !wallet.can_debit() {
        return Err(LedgerError::WalletInactive {
            wallet_id: wallet.id,
            status: wallet.status.as_str(),
            action: "debited",
        });
    }
    if wallet.balance < amount {
        return Err(LedgerError::InsufficientFunds {
            wallet_id: wallet.id,
            available: wallet.balance,
            required: amount,
        });
    }

    let new_balance = wallet.balance - amount;
    apply(unit, wallet, transaction_id, -amount, -settlement_amount, new_balance).await
}

/// Credit a wallet and append its entry. Closed wallets are rejected.
pub async fn post_credit<U>(
    unit: &mut U,
    wallet: &mut Wallet,
    transaction_id: TransactionId,
    amount: Decimal,
    settlement_amount: Decimal,
) -> Result<LedgerEntry, LedgerError>
where
    U: WalletRepo + LedgerRepo + ?Sized,
{
    if !wallet.can_credit() {
        return Err(LedgerError::WalletInactive {
            wallet_id: wallet.id,
            status: wallet.status.as_str(),
            action: "credited",
        });
    }
    post_refund(unit, wallet, transaction_id, amount, settlement_amount).await
}

/// Compensating credit for a reservation; lands regardless of wallet status.
pub async fn post_refund<U>(
    unit: &mut U,
    wallet: &mut Wallet,
    transaction_id: TransactionId,
    amount: Decimal,
    settlement_amount: Decimal,
) -> Result<LedgerEntry, LedgerError>
where
    U: WalletRepo + LedgerRepo + ?Sized,
{
    if amount <= Decimal::ZERO {
        return Err(LedgerError::NonPositiveAmount(amount));
    }
    let new_balance = wallet.balance + amount;
    apply(unit, wallet, transaction_id, amount, settlement_amount, new_balance).await
}

/// Append an entry for a non-wallet account (fees, rewards, external).
pub async fn post_counterparty<U>(
    unit: &mut U,
    transaction_id: TransactionId,
    account: LedgerAccount,
    currency: Currency,
    amount: Decimal,
    settlement_amount: Decimal,
) -> Result<LedgerEntry, LedgerError>
where
    U: LedgerRepo + ?Sized,
{
    debug_assert!(
        account.wallet_id().is_none(),
        "wallet entries go through post_debit/post_credit"
    );
    let entry = LedgerEntry::new(
        transaction_id,
        account,
        currency,
        amount,
        settlement_amount,
        None,
    );
    unit.insert_ledger_entry(&entry).await?;
    Ok(entry)
}

async fn apply<U>(
    unit: &mut U,
    wallet: &mut Wallet,
    transaction_id: TransactionId,
    amount: Decimal,
    settlement_amount: Decimal,
    new_balance: Decimal,
) -> Result<LedgerEntry, LedgerError>
where
    U: WalletRepo + LedgerRepo + ?Sized,
{
    unit.update_wallet_balance(wallet.id, new_balance).await?;
    wallet.balance = new_balance;

    let entry = LedgerEntry::new(
        transaction_id,
        LedgerAccount::Wallet(wallet.id),
        wallet.currency,
        amount,
        settlement_amount,
        Some(new_balance),
    );
    unit.insert_ledger_entry(&entry).await?;

    debug!(
        transaction_id = %transaction_id,
        wallet_id = %wallet.id,
        amount = %amount,
        balance = %new_balance,
        "Ledger entry posted"
    );
    Ok(entry)
}

/// Sum of settlement amounts; zero for a balanced transaction
pub fn settlement_sum(entries: &[LedgerEntry]) -> Decimal {
    entries.iter().map(|e| e.settlement_amount).sum()
}
