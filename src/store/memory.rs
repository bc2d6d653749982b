//! In-memory store
//!
//! A unit locks the whole state, works on a staged copy and writes it back on
//! commit. Units are therefore serializable; a flow must never hold two units
//! at once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    CatalogRepo, LedgerRepo, RateRepo, ReferralRepo, Store, StoreError, TransactionRepo,
    UnitOfWork, WalletRepo,
};
use crate::catalog::{
    Brand, CatalogCounts, Category, Country, DenominationKind, Product, ProductListing,
    RedeemInstruction,
};
use crate::ledger::{LedgerAccount, LedgerEntry};
use crate::money::Currency;
use crate::rates::ExchangeRate;
use crate::referral::{Referral, ReferralEarnings, WithdrawalRequest, WithdrawalStatus};
use crate::transaction::{TransactionId, TransactionRecord, TransactionStatus, TransactionUpdate};
use crate::wallet::{Wallet, WalletId, WalletStatus};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    wallets: HashMap<WalletId, Wallet>,
    transactions: BTreeMap<TransactionId, TransactionRecord>,
    ledger: Vec<LedgerEntry>,
    rates: Vec<ExchangeRate>,
    referrals: HashMap<i64, Referral>,
    earnings: HashMap<i64, ReferralEarnings>,
    withdrawals: HashMap<Uuid, WithdrawalRequest>,
    brands: HashMap<i64, Brand>,
    categories: HashMap<i64, Category>,
    countries: HashMap<String, Country>,
    products: HashMap<i64, Product>,
    logo_urls: HashMap<i64, Vec<String>>,
    denominations: HashMap<(i64, DenominationKind), Vec<Decimal>>,
    redeem_instructions: HashMap<i64, RedeemInstruction>,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    fail_next_commit: AtomicBool,
}

/// Shared in-memory store; clones share state
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `begin` fail with `Unavailable` until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `commit` fail; its writes are discarded
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit, StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryUnit {
            guard,
            staged,
            faults: self.faults.clone(),
        })
    }
}

pub struct MemoryUnit {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    faults: Arc<Faults>,
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn commit(self) -> Result<(), StoreError> {
        if self.faults.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit failed".into()));
        }
        let MemoryUnit {
            mut guard, staged, ..
        } = self;
        *guard = staged;
        Ok(())
    }
}

#[async_trait]
impl WalletRepo for MemoryUnit {
    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError> {
        let duplicate = self
            .staged
            .wallets
            .values()
            .any(|w| w.owner_id == wallet.owner_id && w.currency == wallet.currency);
        if duplicate || self.staged.wallets.contains_key(&wallet.id) {
            return Err(StoreError::UniqueViolation(
                "wallets_owner_id_currency_key".into(),
            ));
        }
        self.staged.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn find_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>, StoreError> {
        Ok(self.staged.wallets.get(&id).cloned())
    }

    async fn find_wallet_for_update(
        &mut self,
        id: WalletId,
    ) -> Result<Option<Wallet>, StoreError> {
        Ok(self.staged.wallets.get(&id).cloned())
    }

    async fn find_wallet_by_owner(
        &mut self,
        owner_id: i64,
        currency: Currency,
    ) -> Result<Option<Wallet>, StoreError> {
        Ok(self
            .staged
            .wallets
            .values()
            .find(|w| w.owner_id == owner_id && w.currency == currency)
            .cloned())
    }

    async fn update_wallet_balance(
        &mut self,
        id: WalletId,
        balance: Decimal,
    ) -> Result<(), StoreError> {
        let wallet = self
            .staged
            .wallets
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("wallet {} missing", id)))?;
        if balance < Decimal::ZERO {
            return Err(StoreError::CheckViolation("wallets_balance_check".into()));
        }
        wallet.balance = balance;
        wallet.updated_at = Utc::now();
        Ok(())
    }

    async fn update_wallet_status(
        &mut self,
        id: WalletId,
        status: WalletStatus,
    ) -> Result<(), StoreError> {
        let wallet = self
            .staged
            .wallets
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("wallet {} missing", id)))?;
        wallet.status = status;
        wallet.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TransactionRepo for MemoryUnit {
    async fn insert_transaction(&mut self, record: &TransactionRecord) -> Result<(), StoreError> {
        if let Some(key) = &record.idempotency_key {
            let duplicate = self
                .staged
                .transactions
                .values()
                .any(|t| t.idempotency_key.as_deref() == Some(key.as_str()));
            if duplicate {
                return Err(StoreError::UniqueViolation(
                    "transactions_idempotency_key_key".into(),
                ));
            }
        }
        self.staged.transactions.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_transaction(
        &mut self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self.staged.transactions.get(&id).cloned())
    }

    async fn find_transaction_by_key(
        &mut self,
        idempotency_key: &str,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self
            .staged
            .transactions
            .values()
            .find(|t| t.idempotency_key.as_deref() == Some(idempotency_key))
            .cloned())
    }

    async fn update_transaction_if(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
        update: &TransactionUpdate,
    ) -> Result<bool, StoreError> {
        let Some(record) = self.staged.transactions.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != expected {
            return Ok(false);
        }
        record.status = update.status;
        if update.external_reference.is_some() {
            record.external_reference = update.external_reference.clone();
        }
        if update.error.is_some() {
            record.error = update.error.clone();
        }
        record.metadata = update.metadata.clone();
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn touch_transaction_if(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
    ) -> Result<bool, StoreError> {
        match self.staged.transactions.get_mut(&id) {
            Some(record) if record.status == expected => {
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_stale_transactions(
        &mut self,
        statuses: &[TransactionStatus],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut stale: Vec<TransactionRecord> = self
            .staged
            .transactions
            .values()
            .filter(|t| statuses.contains(&t.status) && t.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|t| (t.updated_at, t.id));
        stale.truncate(limit);
        Ok(stale)
    }
}

#[async_trait]
impl LedgerRepo for MemoryUnit {
    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.staged.ledger.push(entry.clone());
        Ok(())
    }

    async fn ledger_entries_for_transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .staged
            .ledger
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn ledger_sum_for_wallet(&mut self, wallet_id: WalletId) -> Result<Decimal, StoreError> {
        let account = LedgerAccount::Wallet(wallet_id);
        Ok(self
            .staged
            .ledger
            .iter()
            .filter(|e| e.account == account)
            .map(|e| e.amount)
            .sum())
    }
}

#[async_trait]
impl RateRepo for MemoryUnit {
    async fn insert_rate(&mut self, rate: &ExchangeRate) -> Result<(), StoreError> {
        if rate.rate <= Decimal::ZERO {
            return Err(StoreError::CheckViolation("exchange_rates_rate_check".into()));
        }
        self.staged.rates.push(rate.clone());
        Ok(())
    }

    async fn latest_rate(
        &mut self,
        base: Currency,
        quote: Currency,
        at: DateTime<Utc>,
    ) -> Result<Option<ExchangeRate>, StoreError> {
        Ok(self
            .staged
            .rates
            .iter()
            .filter(|r| r.base == base && r.quote == quote && r.effective_at <= at)
            .max_by_key(|r| r.effective_at)
            .cloned())
    }
}

#[async_trait]
impl ReferralRepo for MemoryUnit {
    async fn insert_referral(&mut self, referral: &Referral) -> Result<(), StoreError> {
        if self.staged.referrals.contains_key(&referral.referee_id) {
            return Err(StoreError::UniqueViolation(
                "referrals_referee_id_key".into(),
            ));
        }
        self.staged
            .referrals
            .insert(referral.referee_id, referral.clone());
        Ok(())
    }

    async fn find_referral_by_referee(
        &mut self,
        referee_id: i64,
    ) -> Result<Option<Referral>, StoreError> {
        Ok(self.staged.referrals.get(&referee_id).cloned())
    }

    async fn find_earnings(
        &mut self,
        user_id: i64,
    ) -> Result<Option<ReferralEarnings>, StoreError> {
        Ok(self.staged.earnings.get(&user_id).cloned())
    }

    async fn lock_earnings(&mut self, user_id: i64) -> Result<ReferralEarnings, StoreError> {
        Ok(self
            .staged
            .earnings
            .entry(user_id)
            .or_insert_with(|| ReferralEarnings::empty(user_id))
            .clone())
    }

    async fn upsert_earnings(&mut self, earnings: &ReferralEarnings) -> Result<(), StoreError> {
        if !earnings.is_consistent() {
            return Err(StoreError::CheckViolation(
                "referral_earnings_balance_check".into(),
            ));
        }
        self.staged
            .earnings
            .insert(earnings.user_id, earnings.clone());
        Ok(())
    }

    async fn insert_withdrawal_request(
        &mut self,
        request: &WithdrawalRequest,
    ) -> Result<(), StoreError> {
        self.staged.withdrawals.insert(request.id, request.clone());
        Ok(())
    }

    async fn find_withdrawal_request(
        &mut self,
        id: Uuid,
    ) -> Result<Option<WithdrawalRequest>, StoreError> {
        Ok(self.staged.withdrawals.get(&id).cloned())
    }

    async fn find_withdrawal_request_for_update(
        &mut self,
        id: Uuid,
    ) -> Result<Option<WithdrawalRequest>, StoreError> {
        Ok(self.staged.withdrawals.get(&id).cloned())
    }

    async fn update_withdrawal_request(
        &mut self,
        id: Uuid,
        status: WithdrawalStatus,
        transaction_id: Option<TransactionId>,
    ) -> Result<(), StoreError> {
        let request = self
            .staged
            .withdrawals
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("withdrawal request {} missing", id)))?;
        request.status = status;
        if transaction_id.is_some() {
            request.transaction_id = transaction_id;
        }
        request.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl CatalogRepo for MemoryUnit {
    async fn upsert_brand(&mut self, brand: &Brand) -> Result<(), StoreError> {
        self.staged.brands.insert(brand.external_id, brand.clone());
        Ok(())
    }

    async fn upsert_category(&mut self, category: &Category) -> Result<(), StoreError> {
        self.staged
            .categories
            .insert(category.external_id, category.clone());
        Ok(())
    }

    async fn upsert_country(&mut self, country: &Country) -> Result<(), StoreError> {
        self.staged
            .countries
            .insert(country.iso_code.clone(), country.clone());
        Ok(())
    }

    async fn upsert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        if !self.staged.brands.contains_key(&product.brand_id)
            || !self.staged.categories.contains_key(&product.category_id)
            || !self.staged.countries.contains_key(&product.country_iso)
        {
            return Err(StoreError::Database(format!(
                "product {} references a missing brand, category or country",
                product.external_id
            )));
        }
        self.staged
            .products
            .insert(product.external_id, product.clone());
        Ok(())
    }

    async fn replace_logo_urls(
        &mut self,
        product_id: i64,
        urls: &[String],
    ) -> Result<(), StoreError> {
        let mut unique: Vec<String> = Vec::with_capacity(urls.len());
        for url in urls {
            if !unique.contains(url) {
                unique.push(url.clone());
            }
        }
        self.staged.logo_urls.insert(product_id, unique);
        Ok(())
    }

    async fn replace_denominations(
        &mut self,
        product_id: i64,
        kind: DenominationKind,
        amounts: &[Decimal],
    ) -> Result<(), StoreError> {
        if amounts.iter().any(|a| *a <= Decimal::ZERO) {
            return Err(StoreError::CheckViolation(
                "gift_card_denominations_amount_check".into(),
            ));
        }
        self.staged
            .denominations
            .insert((product_id, kind), amounts.to_vec());
        Ok(())
    }

    async fn upsert_redeem_instruction(
        &mut self,
        product_id: i64,
        instruction: &RedeemInstruction,
    ) -> Result<(), StoreError> {
        self.staged
            .redeem_instructions
            .insert(product_id, instruction.clone());
        Ok(())
    }

    async fn find_product_listing(
        &mut self,
        product_id: i64,
    ) -> Result<Option<ProductListing>, StoreError> {
        let Some(product) = self.staged.products.get(&product_id).cloned() else {
            return Ok(None);
        };
        let list = |kind: DenominationKind| {
            self.staged
                .denominations
                .get(&(product_id, kind))
                .cloned()
                .unwrap_or_default()
        };
        Ok(Some(ProductListing {
            recipient_denominations: list(DenominationKind::Recipient),
            sender_denominations: list(DenominationKind::Sender),
            product,
        }))
    }

    async fn catalog_counts(&mut self) -> Result<CatalogCounts, StoreError> {
        let s = &self.staged;
        Ok(CatalogCounts {
            brands: s.brands.len() as u64,
            categories: s.categories.len() as u64,
            countries: s.countries.len() as u64,
            products: s.products.len() as u64,
            logo_urls: s.logo_urls.values().map(|v| v.len() as u64).sum(),
            denominations: s.denominations.values().map(|v| v.len() as u64).sum(),
            redeem_instructions: s.redeem_instructions.len() as u64,
        })
    }
}
