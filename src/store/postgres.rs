//! PostgreSQL store
//!
//! One `PgUnit` wraps one `sqlx` transaction. Wallet, earnings and withdrawal
//! reads used for mutation take `FOR UPDATE` row locks that are held until
//! the unit commits or is dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use super::{
    CatalogRepo, LedgerRepo, RateRepo, ReferralRepo, Store, StoreError, TransactionRepo,
    UnitOfWork, WalletRepo,
};
use crate::catalog::{
    Brand, CatalogCounts, Category, Country, DenominationKind, DenominationType, Product,
    ProductListing, RedeemInstruction,
};
use crate::db::SafeRow;
use crate::ledger::{LedgerAccount, LedgerEntry, LedgerEntryId};
use crate::money::Currency;
use crate::rates::ExchangeRate;
use crate::referral::{Referral, ReferralEarnings, WithdrawalRequest, WithdrawalStatus};
use crate::transaction::{
    TransactionId, TransactionMetadata, TransactionRecord, TransactionStatus, TransactionType,
    TransactionUpdate,
};
use crate::wallet::{Wallet, WalletId, WalletStatus, WalletType};

const WALLET_COLUMNS: &str =
    "wallet_id, owner_id, currency, balance, wallet_type, status, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "transaction_id, idempotency_key, tx_type, status, wallet_id, \
     owner_id, currency, amount, fee, exchange_rate, description, external_reference, error, \
     metadata, created_at, updated_at";

const WITHDRAWAL_COLUMNS: &str =
    "request_id, user_id, amount, wallet_id, status, transaction_id, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    type Unit = PgUnit;

    async fn begin(&self) -> Result<PgUnit, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgUnit { tx })
    }
}

pub struct PgUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnit {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn corrupt(what: &str, value: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("invalid {}: {}", what, value))
}

fn currency_col(row: &PgRow, column: &str) -> Result<Currency, StoreError> {
    let code: String = row.try_get(column)?;
    code.parse().map_err(|_| corrupt("currency", &code))
}

fn transaction_id_col(value: &str) -> Result<TransactionId, StoreError> {
    value.parse().map_err(|_| corrupt("transaction id", value))
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet, StoreError> {
    let wallet_type: i16 = row.try_get("wallet_type")?;
    let status: i16 = row.try_get("status")?;
    Ok(Wallet {
        id: WalletId::from_uuid(row.try_get("wallet_id")?),
        owner_id: row.try_get("owner_id")?,
        currency: currency_col(row, "currency")?,
        balance: row.try_get("balance")?,
        wallet_type: WalletType::from_id(wallet_type)
            .ok_or_else(|| corrupt("wallet type", wallet_type))?,
        status: WalletStatus::from_id(status)
            .ok_or_else(|| corrupt("wallet status", status))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<TransactionRecord, StoreError> {
    let id: String = row.try_get("transaction_id")?;
    let tx_type: i16 = row.try_get("tx_type")?;
    let status: i16 = row.try_get("status")?;
    let metadata: Json<TransactionMetadata> = row.try_get("metadata")?;
    Ok(TransactionRecord {
        id: transaction_id_col(&id)?,
        idempotency_key: row.try_get("idempotency_key")?,
        tx_type: TransactionType::from_id(tx_type)
            .ok_or_else(|| corrupt("transaction type", tx_type))?,
        status: TransactionStatus::from_id(status)
            .ok_or_else(|| corrupt("transaction status", status))?,
        wallet_id: WalletId::from_uuid(row.try_get("wallet_id")?),
        owner_id: row.try_get("owner_id")?,
        currency: currency_col(row, "currency")?,
        amount: row.try_get("amount")?,
        fee: row.try_get("fee")?,
        exchange_rate: row.try_get("exchange_rate")?,
        description: row.try_get("description")?,
        external_reference: row.try_get("external_reference")?,
        error: row.try_get("error")?,
        metadata: metadata.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn ledger_entry_from_row(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let id: String = row.try_get("entry_id")?;
    let transaction_id: String = row.try_get("transaction_id")?;
    let kind: i16 = row.try_get("account_kind")?;
    let reference: String = row.try_get("account_ref")?;
    Ok(LedgerEntry {
        id: LedgerEntryId::from_ulid(
            ulid::Ulid::from_string(&id).map_err(|_| corrupt("ledger entry id", &id))?,
        ),
        transaction_id: transaction_id_col(&transaction_id)?,
        account: LedgerAccount::from_parts(kind, &reference)
            .ok_or_else(|| corrupt("ledger account", format!("{}/{}", kind, reference)))?,
        currency: currency_col(row, "currency")?,
        amount: row.try_get("amount")?,
        settlement_amount: row.try_get("settlement_amount")?,
        balance_after: row.try_get("balance_after")?,
        on_platform: row.try_get("on_platform")?,
        created_at: row.try_get("created_at")?,
    })
}

fn earnings_from_row(row: &PgRow) -> Result<ReferralEarnings, StoreError> {
    Ok(ReferralEarnings {
        user_id: row.try_get("user_id")?,
        total_earned: row.try_get("total_earned")?,
        available_balance: row.try_get("available_balance")?,
        withdrawn_balance: row.try_get("withdrawn_balance")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn withdrawal_from_row(row: &PgRow) -> Result<WithdrawalRequest, StoreError> {
    let status: i16 = row.try_get("status")?;
    let transaction_id: Option<String> = row.try_get("transaction_id")?;
    Ok(WithdrawalRequest {
        id: row.try_get("request_id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        wallet_id: WalletId::from_uuid(row.try_get("wallet_id")?),
        status: WithdrawalStatus::from_id(status)
            .ok_or_else(|| corrupt("withdrawal status", status))?,
        transaction_id: transaction_id.as_deref().map(transaction_id_col).transpose()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let denomination_type: i16 = row.try_get("denomination_type")?;
    Ok(Product {
        external_id: row.try_get("product_id")?,
        name: row.try_get("name")?,
        brand_id: row.try_get("brand_id")?,
        category_id: row.try_get("category_id")?,
        country_iso: row.try_get("country_iso")?,
        global: row.try_get("global")?,
        denomination_type: DenominationType::from_id(denomination_type)
            .ok_or_else(|| corrupt("denomination type", denomination_type))?,
        recipient_currency: row.try_get("recipient_currency")?,
        sender_currency: row.try_get("sender_currency")?,
        sender_fee: row.try_get("sender_fee")?,
        discount_percentage: row.try_get("discount_percentage")?,
        min_recipient_denomination: row.try_get("min_recipient_denomination")?,
        max_recipient_denomination: row.try_get("max_recipient_denomination")?,
        sender_exchange_rate: row.try_get("sender_exchange_rate")?,
        synced_at: row.try_get("synced_at")?,
    })
}

// ============================================================================
// Wallets
// ============================================================================

#[async_trait]
impl WalletRepo for PgUnit {
    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO wallets_tb (wallet_id, owner_id, currency, balance, wallet_type, status,
                                     created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(wallet.id.inner())
        .bind(wallet.owner_id)
        .bind(wallet.currency.code())
        .bind(wallet.balance)
        .bind(wallet.wallet_type.id())
        .bind(wallet.status.id())
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM wallets_tb WHERE wallet_id = $1",
            WALLET_COLUMNS
        ))
        .bind(id.inner())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn find_wallet_for_update(
        &mut self,
        id: WalletId,
    ) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM wallets_tb WHERE wallet_id = $1 FOR UPDATE",
            WALLET_COLUMNS
        ))
        .bind(id.inner())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn find_wallet_by_owner(
        &mut self,
        owner_id: i64,
        currency: Currency,
    ) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM wallets_tb WHERE owner_id = $1 AND currency = $2",
            WALLET_COLUMNS
        ))
        .bind(owner_id)
        .bind(currency.code())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn update_wallet_balance(
        &mut self,
        id: WalletId,
        balance: Decimal,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE wallets_tb SET balance = $1, updated_at = NOW() WHERE wallet_id = $2")
            .bind(balance)
            .bind(id.inner())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_wallet_status(
        &mut self,
        id: WalletId,
        status: WalletStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE wallets_tb SET status = $1, updated_at = NOW() WHERE wallet_id = $2")
            .bind(status.id())
            .bind(id.inner())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Transactions
// ============================================================================

#[async_trait]
impl TransactionRepo for PgUnit {
    async fn insert_transaction(&mut self, record: &TransactionRecord) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO transactions_tb ({})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            TRANSACTION_COLUMNS
        ))
        .bind(record.id.to_string())
        .bind(&record.idempotency_key)
        .bind(record.tx_type.id())
        .bind(record.status.id())
        .bind(record.wallet_id.inner())
        .bind(record.owner_id)
        .bind(record.currency.code())
        .bind(record.amount)
        .bind(record.fee)
        .bind(record.exchange_rate)
        .bind(&record.description)
        .bind(&record.external_reference)
        .bind(&record.error)
        .bind(Json(&record.metadata))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_transaction(
        &mut self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions_tb WHERE transaction_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn find_transaction_by_key(
        &mut self,
        idempotency_key: &str,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions_tb WHERE idempotency_key = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(idempotency_key)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn update_transaction_if(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
        update: &TransactionUpdate,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE transactions_tb
             SET status = $1,
                 external_reference = COALESCE($2, external_reference),
                 error = COALESCE($3, error),
                 metadata = $4,
                 updated_at = NOW()
             WHERE transaction_id = $5 AND status = $6",
        )
        .bind(update.status.id())
        .bind(&update.external_reference)
        .bind(&update.error)
        .bind(Json(&update.metadata))
        .bind(id.to_string())
        .bind(expected.id())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn touch_transaction_if(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE transactions_tb SET updated_at = NOW()
             WHERE transaction_id = $1 AND status = $2",
        )
        .bind(id.to_string())
        .bind(expected.id())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_stale_transactions(
        &mut self,
        statuses: &[TransactionStatus],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let ids: Vec<i16> = statuses.iter().map(|s| s.id()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions_tb
             WHERE status = ANY($1) AND updated_at < $2
             ORDER BY updated_at, transaction_id
             LIMIT $3",
            TRANSACTION_COLUMNS
        ))
        .bind(ids)
        .bind(older_than)
        .bind(limit as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[async_trait]
impl LedgerRepo for PgUnit {
    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ledger_entries_tb
                (entry_id, transaction_id, account_kind, account_ref, currency, amount,
                 settlement_amount, balance_after, on_platform, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(entry.id.to_string())
        .bind(entry.transaction_id.to_string())
        .bind(entry.account.kind_id())
        .bind(entry.account.reference())
        .bind(entry.currency.code())
        .bind(entry.amount)
        .bind(entry.settlement_amount)
        .bind(entry.balance_after)
        .bind(entry.on_platform)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn ledger_entries_for_transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT entry_id, transaction_id, account_kind, account_ref, currency, amount,
                    settlement_amount, balance_after, on_platform, created_at
             FROM ledger_entries_tb WHERE transaction_id = $1
             ORDER BY seq",
        )
        .bind(transaction_id.to_string())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(ledger_entry_from_row).collect()
    }

    async fn ledger_sum_for_wallet(&mut self, wallet_id: WalletId) -> Result<Decimal, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0) AS total FROM ledger_entries_tb
             WHERE account_kind = $1 AND account_ref = $2",
        )
        .bind(LedgerAccount::Wallet(wallet_id).kind_id())
        .bind(wallet_id.to_string())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("total")?)
    }
}

// ============================================================================
// Rates
// ============================================================================

#[async_trait]
impl RateRepo for PgUnit {
    async fn insert_rate(&mut self, rate: &ExchangeRate) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO exchange_rates_tb (base, quote, rate, effective_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(rate.base.code())
        .bind(rate.quote.code())
        .bind(rate.rate)
        .bind(rate.effective_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn latest_rate(
        &mut self,
        base: Currency,
        quote: Currency,
        at: DateTime<Utc>,
    ) -> Result<Option<ExchangeRate>, StoreError> {
        let row = sqlx::query(
            "SELECT rate, effective_at FROM exchange_rates_tb
             WHERE base = $1 AND quote = $2 AND effective_at <= $3
             ORDER BY effective_at DESC, rate_id DESC
             LIMIT 1",
        )
        .bind(base.code())
        .bind(quote.code())
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(|r| {
            Ok::<_, StoreError>(ExchangeRate {
                base,
                quote,
                rate: r.try_get("rate")?,
                effective_at: r.try_get("effective_at")?,
            })
        })
        .transpose()
    }
}

// ============================================================================
// Referrals
// ============================================================================

#[async_trait]
impl ReferralRepo for PgUnit {
    async fn insert_referral(&mut self, referral: &Referral) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO referrals_tb (referral_id, referrer_id, referee_id, bonus, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(referral.id)
        .bind(referral.referrer_id)
        .bind(referral.referee_id)
        .bind(referral.bonus)
        .bind(referral.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_referral_by_referee(
        &mut self,
        referee_id: i64,
    ) -> Result<Option<Referral>, StoreError> {
        let row = sqlx::query(
            "SELECT referral_id, referrer_id, referee_id, bonus, created_at
             FROM referrals_tb WHERE referee_id = $1",
        )
        .bind(referee_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(|r| {
            Ok::<_, StoreError>(Referral {
                id: r.try_get("referral_id")?,
                referrer_id: r.try_get("referrer_id")?,
                referee_id: r.try_get("referee_id")?,
                bonus: r.try_get("bonus")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn find_earnings(
        &mut self,
        user_id: i64,
    ) -> Result<Option<ReferralEarnings>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, total_earned, available_balance, withdrawn_balance, updated_at
             FROM referral_earnings_tb WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(earnings_from_row).transpose()
    }

    async fn lock_earnings(&mut self, user_id: i64) -> Result<ReferralEarnings, StoreError> {
        // A missing row cannot be locked; make sure there is one
        sqlx::query(
            "INSERT INTO referral_earnings_tb
                (user_id, total_earned, available_balance, withdrawn_balance, updated_at)
             VALUES ($1, 0, 0, 0, NOW())
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;

        let row = sqlx::query(
            "SELECT user_id, total_earned, available_balance, withdrawn_balance, updated_at
             FROM referral_earnings_tb WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?;
        earnings_from_row(&row)
    }

    async fn upsert_earnings(&mut self, earnings: &ReferralEarnings) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO referral_earnings_tb
                (user_id, total_earned, available_balance, withdrawn_balance, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id) DO UPDATE SET
                total_earned = EXCLUDED.total_earned,
                available_balance = EXCLUDED.available_balance,
                withdrawn_balance = EXCLUDED.withdrawn_balance,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(earnings.user_id)
        .bind(earnings.total_earned)
        .bind(earnings.available_balance)
        .bind(earnings.withdrawn_balance)
        .bind(earnings.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_withdrawal_request(
        &mut self,
        request: &WithdrawalRequest,
    ) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO withdrawal_requests_tb ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            WITHDRAWAL_COLUMNS
        ))
        .bind(request.id)
        .bind(request.user_id)
        .bind(request.amount)
        .bind(request.wallet_id.inner())
        .bind(request.status.id())
        .bind(request.transaction_id.map(|id| id.to_string()))
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_withdrawal_request(
        &mut self,
        id: Uuid,
    ) -> Result<Option<WithdrawalRequest>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM withdrawal_requests_tb WHERE request_id = $1",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(withdrawal_from_row).transpose()
    }

    async fn find_withdrawal_request_for_update(
        &mut self,
        id: Uuid,
    ) -> Result<Option<WithdrawalRequest>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM withdrawal_requests_tb WHERE request_id = $1 FOR UPDATE",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(withdrawal_from_row).transpose()
    }

    async fn update_withdrawal_request(
        &mut self,
        id: Uuid,
        status: WithdrawalStatus,
        transaction_id: Option<TransactionId>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE withdrawal_requests_tb
             SET status = $1, transaction_id = COALESCE($2, transaction_id), updated_at = NOW()
             WHERE request_id = $3",
        )
        .bind(status.id())
        .bind(transaction_id.map(|id| id.to_string()))
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[async_trait]
impl CatalogRepo for PgUnit {
    async fn upsert_brand(&mut self, brand: &Brand) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO gift_card_brands_tb (brand_id, name) VALUES ($1, $2)
             ON CONFLICT (brand_id) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(brand.external_id)
        .bind(&brand.name)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn upsert_category(&mut self, category: &Category) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO gift_card_categories_tb (category_id, name) VALUES ($1, $2)
             ON CONFLICT (category_id) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(category.external_id)
        .bind(&category.name)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn upsert_country(&mut self, country: &Country) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO gift_card_countries_tb (iso_code, name, flag_url) VALUES ($1, $2, $3)
             ON CONFLICT (iso_code)
             DO UPDATE SET name = EXCLUDED.name, flag_url = EXCLUDED.flag_url",
        )
        .bind(&country.iso_code)
        .bind(&country.name)
        .bind(&country.flag_url)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn upsert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO gift_card_products_tb
                (product_id, name, brand_id, category_id, country_iso, global, denomination_type,
                 recipient_currency, sender_currency, sender_fee, discount_percentage,
                 min_recipient_denomination, max_recipient_denomination, sender_exchange_rate,
                 synced_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             ON CONFLICT (product_id) DO UPDATE SET
                name = EXCLUDED.name,
                brand_id = EXCLUDED.brand_id,
                category_id = EXCLUDED.category_id,
                country_iso = EXCLUDED.country_iso,
                global = EXCLUDED.global,
                denomination_type = EXCLUDED.denomination_type,
                recipient_currency = EXCLUDED.recipient_currency,
                sender_currency = EXCLUDED.sender_currency,
                sender_fee = EXCLUDED.sender_fee,
                discount_percentage = EXCLUDED.discount_percentage,
                min_recipient_denomination = EXCLUDED.min_recipient_denomination,
                max_recipient_denomination = EXCLUDED.max_recipient_denomination,
                sender_exchange_rate = EXCLUDED.sender_exchange_rate,
                synced_at = EXCLUDED.synced_at",
        )
        .bind(product.external_id)
        .bind(&product.name)
        .bind(product.brand_id)
        .bind(product.category_id)
        .bind(&product.country_iso)
        .bind(product.global)
        .bind(product.denomination_type.id())
        .bind(&product.recipient_currency)
        .bind(&product.sender_currency)
        .bind(product.sender_fee)
        .bind(product.discount_percentage)
        .bind(product.min_recipient_denomination)
        .bind(product.max_recipient_denomination)
        .bind(product.sender_exchange_rate)
        .bind(product.synced_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn replace_logo_urls(
        &mut self,
        product_id: i64,
        urls: &[String],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM gift_card_logo_urls_tb WHERE product_id = $1")
            .bind(product_id)
            .execute(&mut *self.tx)
            .await?;
        for url in urls {
            sqlx::query(
                "INSERT INTO gift_card_logo_urls_tb (product_id, url) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(product_id)
            .bind(url)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn replace_denominations(
        &mut self,
        product_id: i64,
        kind: DenominationKind,
        amounts: &[Decimal],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM gift_card_denominations_tb WHERE product_id = $1 AND kind = $2")
            .bind(product_id)
            .bind(kind.id())
            .execute(&mut *self.tx)
            .await?;
        for (position, amount) in amounts.iter().enumerate() {
            sqlx::query(
                "INSERT INTO gift_card_denominations_tb (product_id, kind, position, amount)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(product_id)
            .bind(kind.id())
            .bind(position as i32)
            .bind(*amount)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn upsert_redeem_instruction(
        &mut self,
        product_id: i64,
        instruction: &RedeemInstruction,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO gift_card_redeem_instructions_tb (product_id, concise, verbose)
             VALUES ($1, $2, $3)
             ON CONFLICT (product_id) DO UPDATE SET
                concise = EXCLUDED.concise, verbose = EXCLUDED.verbose",
        )
        .bind(product_id)
        .bind(&instruction.concise)
        .bind(&instruction.verbose)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_product_listing(
        &mut self,
        product_id: i64,
    ) -> Result<Option<ProductListing>, StoreError> {
        let row = sqlx::query(
            "SELECT product_id, name, brand_id, category_id, country_iso, global,
                    denomination_type, recipient_currency, sender_currency, sender_fee,
                    discount_percentage, min_recipient_denomination, max_recipient_denomination,
                    sender_exchange_rate, synced_at
             FROM gift_card_products_tb WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let product = product_from_row(&row)?;

        let rows = sqlx::query(
            "SELECT kind, amount FROM gift_card_denominations_tb
             WHERE product_id = $1 ORDER BY kind, position",
        )
        .bind(product_id)
        .fetch_all(&mut *self.tx)
        .await?;
        let mut recipient_denominations = Vec::new();
        let mut sender_denominations = Vec::new();
        for r in &rows {
            let kind: i16 = r.try_get("kind")?;
            let amount: Decimal = r.try_get("amount")?;
            if kind == DenominationKind::Recipient.id() {
                recipient_denominations.push(amount);
            } else if kind == DenominationKind::Sender.id() {
                sender_denominations.push(amount);
            } else {
                return Err(corrupt("denomination kind", kind));
            }
        }

        Ok(Some(ProductListing {
            product,
            recipient_denominations,
            sender_denominations,
        }))
    }

    async fn catalog_counts(&mut self) -> Result<CatalogCounts, StoreError> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM gift_card_brands_tb) AS brands,
                (SELECT COUNT(*) FROM gift_card_categories_tb) AS categories,
                (SELECT COUNT(*) FROM gift_card_countries_tb) AS countries,
                (SELECT COUNT(*) FROM gift_card_products_tb) AS products,
                (SELECT COUNT(*) FROM gift_card_logo_urls_tb) AS logo_urls,
                (SELECT COUNT(*) FROM gift_card_denominations_tb) AS denominations,
                (SELECT COUNT(*) FROM gift_card_redeem_instructions_tb) AS redeem_instructions",
        )
        .fetch_one(&mut *self.tx)
        .await?;
        // SAFE_DEFAULT: a count that fails to decode is logged and reported as 0
        let count = |column: &str| row.try_get_log::<i64>(column).unwrap_or(0) as u64;
        Ok(CatalogCounts {
            brands: count("brands"),
            categories: count("categories"),
            countries: count("countries"),
            products: count("products"),
            logo_urls: count("logo_urls"),
            denominations: count("denominations"),
            redeem_instructions: count("redeem_instructions"),
        })
    }
}
