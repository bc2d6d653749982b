//! Transaction Orchestrator
//!
//! Entry point for every funds movement. On-platform operations run in one
//! unit of work; operations that settle externally go through
//! [`SettlementSaga`].
//!
//! Rates are fetched before any unit opens and held fixed for the
//! operation. Provider calls never run inside a unit.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::api::{
    CryptoSendRequest, DepositRequest, FiatPayoutRequest, GiftCardPurchaseRequest,
    TransferRequest,
};
use super::error::TransactionError;
use super::providers::{CryptoSendOrder, FiatPayoutOrder, GiftCardOrder, ProviderRegistry};
use super::saga::SettlementSaga;
use super::state::TransactionStatus;
use super::types::{
    NewTransaction, TransactionId, TransactionMetadata, TransactionRecord, TransactionType,
    TransferDestination,
};
use crate::ledger::{self, LedgerAccount, LedgerEntry};
use crate::money::{validate_amount, validate_fee, Currency, MoneyError};
use crate::rates::ExchangeRates;
use crate::store::{CatalogRepo, LedgerRepo, Store, TransactionRepo, UnitOfWork, WalletRepo};
use crate::wallet::{Wallet, WalletId};

pub struct Orchestrator<S: Store> {
    store: Arc<S>,
    rates: Arc<dyn ExchangeRates>,
    providers: Arc<ProviderRegistry>,
    saga: Arc<SettlementSaga<S>>,
}

impl<S: Store> Orchestrator<S> {
    pub fn new(
        store: Arc<S>,
        rates: Arc<dyn ExchangeRates>,
        providers: Arc<ProviderRegistry>,
        provider_timeout: Duration,
    ) -> Self {
        let saga = Arc::new(SettlementSaga::new(store.clone(), provider_timeout));
        Self {
            store,
            rates,
            providers,
            saga,
        }
    }

    /// Shared with the reconciliation worker
    pub fn saga(&self) -> Arc<SettlementSaga<S>> {
        self.saga.clone()
    }

    // ========================================================================
    // On-platform
    // ========================================================================

    /// Credit a wallet from an external source. One unit.
    pub async fn deposit(
        &self,
        req: DepositRequest,
    ) -> Result<TransactionRecord, TransactionError> {
        let amount = validate_amount(req.amount, req.currency)?;
        let ctx = || format!("deposit into wallet {}", req.wallet_id);

        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;
        if let Some(existing) = replay(
            &mut unit,
            req.idempotency_key.as_deref(),
            TransactionType::Deposit,
            req.wallet_id,
        )
        .await?
        {
            return Ok(existing);
        }

        let mut wallet = lock_wallet(&mut unit, req.wallet_id).await?;
        ensure_currency(&wallet, req.currency)?;

        let mut record = TransactionRecord::new(NewTransaction {
            idempotency_key: req.idempotency_key.clone(),
            tx_type: TransactionType::Deposit,
            wallet_id: wallet.id,
            owner_id: wallet.owner_id,
            currency: wallet.currency,
            amount,
            fee: Decimal::ZERO,
            exchange_rate: None,
            description: req.description.clone(),
            metadata: TransactionMetadata::Deposit {
                source_reference: req.source_reference.clone(),
            },
        });
        record.status = TransactionStatus::Succeeded;
        record.external_reference = Some(req.source_reference.clone());
        insert_record(&mut unit, &record).await?;

        ledger::post_counterparty(
            &mut unit,
            record.id,
            LedgerAccount::External(format!("deposit:{}", req.source_reference)),
            wallet.currency,
            -amount,
            -amount,
        )
        .await
        .map_err(|e| TransactionError::ledger(ctx(), e))?;
        ledger::post_credit(&mut unit, &mut wallet, record.id, amount, amount)
            .await
            .map_err(|e| TransactionError::ledger(ctx(), e))?;

        unit.commit()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;

        info!(
            transaction_id = %record.id,
            wallet_id = %wallet.id,
            amount = %amount,
            "Deposit credited"
        );
        Ok(record)
    }

    /// Wallet-to-wallet or wallet-to-external-account transfer. One unit.
    ///
    /// Entries net to zero in the source currency: the destination wallet is
    /// credited the converted amount and carries the principal as its
    /// settlement amount.
    pub async fn transfer(
        &self,
        req: TransferRequest,
    ) -> Result<TransactionRecord, TransactionError> {
        let amount = validate_amount(req.amount, req.currency)?;
        let fee = validate_fee(req.fee, req.currency)?;
        if let TransferDestination::Wallet { wallet_id } = &req.destination
            && *wallet_id == req.source_wallet_id
        {
            return Err(TransactionError::SameWallet);
        }

        // Resolve the conversion once, before the unit opens
        let (credited_currency, rate) = match &req.destination {
            TransferDestination::Wallet { wallet_id } => {
                let destination = self.load_wallet(*wallet_id).await?;
                let rate = if destination.currency == req.currency {
                    None
                } else {
                    Some(
                        self.rates
                            .get_exchange_rate(req.currency, destination.currency)
                            .await?,
                    )
                };
                (destination.currency, rate)
            }
            TransferDestination::External { .. } => (req.currency, None),
        };
        let credited_amount = match rate {
            Some(r) => credited_currency.round(amount * r),
            None => amount,
        };
        if credited_amount <= Decimal::ZERO {
            return Err(TransactionError::AmountTooSmall);
        }

        let ctx = || format!("transfer from wallet {}", req.source_wallet_id);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;
        if let Some(existing) = replay(
            &mut unit,
            req.idempotency_key.as_deref(),
            TransactionType::Transfer,
            req.source_wallet_id,
        )
        .await?
        {
            return Ok(existing);
        }

        let (mut source, mut destination) = match &req.destination {
            TransferDestination::Wallet { wallet_id } => {
                let (s, d) = lock_pair(&mut unit, req.source_wallet_id, *wallet_id).await?;
                ensure_currency(&d, credited_currency)?;
                (s, Some(d))
            }
            TransferDestination::External { .. } => {
                (lock_wallet(&mut unit, req.source_wallet_id).await?, None)
            }
        };
        ensure_currency(&source, req.currency)?;

        let mut record = TransactionRecord::new(NewTransaction {
            idempotency_key: req.idempotency_key.clone(),
            tx_type: TransactionType::Transfer,
            wallet_id: source.id,
            owner_id: source.owner_id,
            currency: source.currency,
            amount,
            fee,
            exchange_rate: rate,
            description: req.description.clone(),
            metadata: TransactionMetadata::Internal {
                destination: req.destination.clone(),
                exchange_rate: rate,
                credited_amount,
                credited_currency,
            },
        });
        record.status = TransactionStatus::Succeeded;
        insert_record(&mut unit, &record).await?;

        let total = record.total();
        ledger::post_debit(&mut unit, &mut source, record.id, total, total)
            .await
            .map_err(|e| TransactionError::ledger(ctx(), e))?;
        match (&mut destination, &req.destination) {
            (Some(wallet), _) => {
                ledger::post_credit(&mut unit, wallet, record.id, credited_amount, amount)
                    .await
                    .map_err(|e| TransactionError::ledger(ctx(), e))?;
            }
            (None, TransferDestination::External { account_reference, .. }) => {
                ledger::post_counterparty(
                    &mut unit,
                    record.id,
                    LedgerAccount::External(account_reference.clone()),
                    source.currency,
                    amount,
                    amount,
                )
                .await
                .map_err(|e| TransactionError::ledger(ctx(), e))?;
            }
            (None, TransferDestination::Wallet { wallet_id }) => {
                return Err(TransactionError::WalletNotFound(*wallet_id));
            }
        }
        if fee > Decimal::ZERO {
            ledger::post_counterparty(
                &mut unit,
                record.id,
                LedgerAccount::Fees,
                source.currency,
                fee,
                fee,
            )
            .await
            .map_err(|e| TransactionError::ledger(ctx(), e))?;
        }

        unit.commit()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;

        info!(
            transaction_id = %record.id,
            source_wallet_id = %source.id,
            destination = ?destination.as_ref().map(|w| w.id),
            amount = %amount,
            fee = %fee,
            credited = %credited_amount,
            "Transfer completed"
        );
        Ok(record)
    }

    // ========================================================================
    // External settlement
    // ========================================================================

    /// Buy gift cards. The quote is reserved, then the vendor is called.
    pub async fn purchase_gift_card(
        &self,
        req: GiftCardPurchaseRequest,
    ) -> Result<TransactionRecord, TransactionError> {
        if req.quantity == 0 {
            return Err(TransactionError::InvalidQuantity);
        }
        if req.unit_price <= Decimal::ZERO {
            return Err(MoneyError::InvalidAmount.into());
        }
        let provider = self.providers.gift_card()?;
        let provider_name = provider.name().to_string();

        if let Some(existing) = self.find_by_key(req.idempotency_key.as_deref()).await? {
            return Ok(existing);
        }

        // Quote outside any unit that locks
        let (wallet, listing) = {
            let ctx = || format!("quote gift card {}", req.product_id);
            let mut unit = self
                .store
                .begin()
                .await
                .map_err(|e| TransactionError::storage(ctx(), e))?;
            let wallet = unit
                .find_wallet(req.wallet_id)
                .await
                .map_err(|e| TransactionError::storage(ctx(), e))?
                .ok_or(TransactionError::WalletNotFound(req.wallet_id))?;
            let listing = unit
                .find_product_listing(req.product_id)
                .await
                .map_err(|e| TransactionError::storage(ctx(), e))?
                .ok_or(TransactionError::ProductNotFound(req.product_id))?;
            (wallet, listing)
        };

        let product = &listing.product;
        let sender_price =
            listing
                .sender_price(req.unit_price)
                .ok_or(TransactionError::InvalidDenomination {
                    product_id: req.product_id,
                    unit_price: req.unit_price,
                })?;
        let sender_currency: Currency = product
            .sender_currency
            .parse()
            .map_err(|_| TransactionError::UnsupportedCurrency(product.sender_currency.clone()))?;
        let sender_amount = (sender_price + product.sender_fee) * Decimal::from(req.quantity);

        let rate = self
            .rates
            .get_exchange_rate(sender_currency, wallet.currency)
            .await?;
        let amount = wallet.currency.round(sender_amount * rate);
        if amount <= Decimal::ZERO {
            return Err(TransactionError::AmountTooSmall);
        }
        debug!(
            product_id = req.product_id,
            sender_amount = %sender_amount,
            rate = %rate,
            amount = %amount,
            "Gift card quoted"
        );

        let new = NewTransaction {
            idempotency_key: req.idempotency_key.clone(),
            tx_type: TransactionType::GiftCardPurchase,
            wallet_id: wallet.id,
            owner_id: wallet.owner_id,
            currency: wallet.currency,
            amount,
            fee: Decimal::ZERO,
            exchange_rate: (sender_currency != wallet.currency).then_some(rate),
            description: req.description.clone(),
            metadata: TransactionMetadata::GiftCard {
                product_id: product.external_id,
                product_name: product.name.clone(),
                quantity: req.quantity,
                unit_price: req.unit_price,
                recipient_currency: product.recipient_currency.clone(),
                recipient_email: req.recipient_email.clone(),
                settlement: None,
            },
        };

        let order = GiftCardOrder {
            correlation_id: TransactionId::default(),
            product_id: req.product_id,
            quantity: req.quantity,
            unit_price: req.unit_price,
            sender_amount,
            sender_currency: sender_currency.code().to_string(),
            recipient_email: req.recipient_email,
        };
        self.saga
            .execute(new, &provider_name, move |id| async move {
                provider
                    .order(GiftCardOrder {
                        correlation_id: id,
                        ..order
                    })
                    .await
            })
            .await
    }

    /// Pay out to a bank account through the fiat rail
    pub async fn fiat_payout(
        &self,
        req: FiatPayoutRequest,
    ) -> Result<TransactionRecord, TransactionError> {
        let amount = validate_amount(req.amount, req.currency)?;
        let fee = validate_fee(req.fee, req.currency)?;
        let provider = self.providers.fiat()?;
        let provider_name = provider.name().to_string();
        let wallet = self.load_wallet(req.wallet_id).await?;
        ensure_currency(&wallet, req.currency)?;

        let new = NewTransaction {
            idempotency_key: req.idempotency_key.clone(),
            tx_type: TransactionType::FiatPayout,
            wallet_id: wallet.id,
            owner_id: wallet.owner_id,
            currency: wallet.currency,
            amount,
            fee,
            exchange_rate: None,
            description: req.description.clone(),
            metadata: TransactionMetadata::FiatPayout {
                bank_code: req.bank_code.clone(),
                account_number: req.account_number.clone(),
                account_name: req.account_name.clone(),
                settlement: None,
            },
        };
        let order = FiatPayoutOrder {
            correlation_id: TransactionId::default(),
            amount,
            currency: req.currency.code().to_string(),
            bank_code: req.bank_code,
            account_number: req.account_number,
            account_name: req.account_name,
        };
        self.saga
            .execute(new, &provider_name, move |id| async move {
                provider
                    .payout(FiatPayoutOrder {
                        correlation_id: id,
                        ..order
                    })
                    .await
            })
            .await
    }

    /// Send crypto through the custody provider
    pub async fn send_crypto(
        &self,
        req: CryptoSendRequest,
    ) -> Result<TransactionRecord, TransactionError> {
        let amount = validate_amount(req.amount, req.currency)?;
        let fee = validate_fee(req.fee, req.currency)?;
        let provider = self.providers.crypto()?;
        let provider_name = provider.name().to_string();
        let wallet = self.load_wallet(req.wallet_id).await?;
        ensure_currency(&wallet, req.currency)?;

        let new = NewTransaction {
            idempotency_key: req.idempotency_key.clone(),
            tx_type: TransactionType::CryptoSend,
            wallet_id: wallet.id,
            owner_id: wallet.owner_id,
            currency: wallet.currency,
            amount,
            fee,
            exchange_rate: None,
            description: req.description.clone(),
            metadata: TransactionMetadata::Crypto {
                network: req.network.clone(),
                asset: req.asset.clone(),
                address: req.address.clone(),
                settlement: None,
            },
        };
        let order = CryptoSendOrder {
            correlation_id: TransactionId::default(),
            amount,
            currency: req.currency.code().to_string(),
            network: req.network,
            asset: req.asset,
            address: req.address,
        };
        self.saga
            .execute(new, &provider_name, move |id| async move {
                provider
                    .send(CryptoSendOrder {
                        correlation_id: id,
                        ..order
                    })
                    .await
            })
            .await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<TransactionRecord, TransactionError> {
        let ctx = || format!("get transaction {}", id);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;
        unit.find_transaction(id)
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?
            .ok_or_else(|| TransactionError::TransactionNotFound(id.to_string()))
    }

    pub async fn ledger_entries(
        &self,
        id: TransactionId,
    ) -> Result<Vec<LedgerEntry>, TransactionError> {
        let ctx = || format!("ledger entries of {}", id);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;
        unit.ledger_entries_for_transaction(id)
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))
    }

    async fn load_wallet(&self, id: WalletId) -> Result<Wallet, TransactionError> {
        let ctx = || format!("load wallet {}", id);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;
        unit.find_wallet(id)
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?
            .ok_or(TransactionError::WalletNotFound(id))
    }

    async fn find_by_key(
        &self,
        key: Option<&str>,
    ) -> Result<Option<TransactionRecord>, TransactionError> {
        let Some(key) = key else {
            return Ok(None);
        };
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| TransactionError::storage("idempotency lookup", e))?;
        unit.find_transaction_by_key(key)
            .await
            .map_err(|e| TransactionError::storage(format!("idempotency lookup {}", key), e))
    }
}

/// Existing transaction for a repeated idempotency key
async fn replay<U: UnitOfWork>(
    unit: &mut U,
    key: Option<&str>,
    tx_type: TransactionType,
    wallet_id: WalletId,
) -> Result<Option<TransactionRecord>, TransactionError> {
    let Some(key) = key else {
        return Ok(None);
    };
    let existing = unit
        .find_transaction_by_key(key)
        .await
        .map_err(|e| TransactionError::storage(format!("idempotency lookup {}", key), e))?;
    match existing {
        Some(record) if record.tx_type != tx_type || record.wallet_id != wallet_id => {
            Err(TransactionError::IdempotencyConflict(key.to_string()))
        }
        Some(record) => {
            debug!(transaction_id = %record.id, "Idempotent replay");
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

async fn insert_record<U: UnitOfWork>(
    unit: &mut U,
    record: &TransactionRecord,
) -> Result<(), TransactionError> {
    unit.insert_transaction(record)
        .await
        .map_err(|e| match &record.idempotency_key {
            Some(key) if e.is_unique_violation() => {
                TransactionError::IdempotencyConflict(key.clone())
            }
            _ => TransactionError::storage(format!("insert transaction {}", record.id), e),
        })
}

async fn lock_wallet<U: UnitOfWork>(
    unit: &mut U,
    id: WalletId,
) -> Result<Wallet, TransactionError> {
    unit.find_wallet_for_update(id)
        .await
        .map_err(|e| TransactionError::storage(format!("lock wallet {}", id), e))?
        .ok_or(TransactionError::WalletNotFound(id))
}

/// Lock two wallets in id order so opposite transfers cannot deadlock
async fn lock_pair<U: UnitOfWork>(
    unit: &mut U,
    a: WalletId,
    b: WalletId,
) -> Result<(Wallet, Wallet), TransactionError> {
    if a < b {
        let first = lock_wallet(unit, a).await?;
        let second = lock_wallet(unit, b).await?;
        Ok((first, second))
    } else {
        let second = lock_wallet(unit, b).await?;
        let first = lock_wallet(unit, a).await?;
        Ok((first, second))
    }
}

fn ensure_currency(wallet: &Wallet, currency: Currency) -> Result<(), TransactionError> {
    if wallet.currency != currency {
        return Err(TransactionError::CurrencyMismatch {
            wallet_id: wallet.id,
            wallet: wallet.currency,
            request: currency,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::ledger::settlement_sum;
    use crate::rates::CurrencyConversionService;
    use crate::store::memory::MemoryStore;
    use crate::transaction::providers::mock::MockProvider;
    use crate::transaction::providers::ProviderOutcome;
    use crate::wallet::{WalletService, WalletStatus, WalletType};
    use crate::catalog::{Brand, Category, Country, DenominationKind, DenominationType, Product};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct Harness {
        store: Arc<MemoryStore>,
        wallets: WalletService<MemoryStore>,
        rates: Arc<CurrencyConversionService<MemoryStore>>,
        provider: Arc<MockProvider>,
        orchestrator: Arc<Orchestrator<MemoryStore>>,
    }

    fn harness_with_timeout(timeout: Duration) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let rates = Arc::new(CurrencyConversionService::new(store.clone()));
        let provider = Arc::new(MockProvider::new("mockpay"));
        let providers = ProviderRegistry::new()
            .with_gift_card(provider.clone())
            .with_fiat(provider.clone())
            .with_crypto(provider.clone());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            rates.clone(),
            Arc::new(providers),
            timeout,
        ));
        Harness {
            wallets: WalletService::new(store.clone()),
            store,
            rates,
            provider,
            orchestrator,
        }
    }

    fn harness() -> Harness {
        harness_with_timeout(Duration::from_secs(5))
    }

    impl Harness {
        async fn funded_wallet(&self, owner: i64, currency: Currency, balance: Decimal) -> Wallet {
            let wallet = self
                .wallets
                .create(owner, currency, WalletType::Personal)
                .await
                .unwrap();
            if balance > Decimal::ZERO {
                self.orchestrator
                    .deposit(DepositRequest {
                        idempotency_key: None,
                        wallet_id: wallet.id,
                        currency,
                        amount: balance,
                        source_reference: format!("seed-{}", owner),
                        description: "seed".into(),
                    })
                    .await
                    .unwrap();
            }
            wallet
        }

        async fn balance(&self, id: WalletId) -> Decimal {
            self.wallets.get_wallet(id).await.unwrap().balance
        }

        async fn assert_ledger_consistent(&self, id: WalletId) {
            let audit = self.wallets.verify_wallet(id).await.unwrap();
            assert!(audit.is_consistent(), "balance drifted: {:?}", audit);
        }

        async fn entries(&self, id: TransactionId) -> Vec<LedgerEntry> {
            self.orchestrator.ledger_entries(id).await.unwrap()
        }

        /// FIXED product quoted in NGN: 10 USD card = 16000 NGN, 25 USD card = 40000 NGN
        async fn seed_product(&self, sender_fee: Decimal) {
            let mut unit = self.store.begin().await.unwrap();
            unit.upsert_brand(&Brand {
                external_id: 3,
                name: "Steam".into(),
            })
            .await
            .unwrap();
            unit.upsert_category(&Category {
                external_id: 4,
                name: "Gaming".into(),
            })
            .await
            .unwrap();
            unit.upsert_country(&Country {
                iso_code: "US".into(),
                name: "United States".into(),
                flag_url: None,
            })
            .await
            .unwrap();
            unit.upsert_product(&Product {
                external_id: 10,
                name: "Steam Wallet US".into(),
                brand_id: 3,
                category_id: 4,
                country_iso: "US".into(),
                global: false,
                denomination_type: DenominationType::Fixed,
                recipient_currency: "USD".into(),
                sender_currency: "NGN".into(),
                sender_fee,
                discount_percentage: Decimal::ZERO,
                min_recipient_denomination: None,
                max_recipient_denomination: None,
                sender_exchange_rate: None,
                synced_at: Utc::now(),
            })
            .await
            .unwrap();
            unit.replace_denominations(10, DenominationKind::Recipient, &[dec!(10), dec!(25)])
                .await
                .unwrap();
            unit.replace_denominations(10, DenominationKind::Sender, &[dec!(16000), dec!(40000)])
                .await
                .unwrap();
            unit.commit().await.unwrap();
        }

        /// Product 10 re-listed as RANGE: 5 to 500 USD at 1600 NGN per USD
        async fn seed_range_product(&self, sender_fee: Decimal) {
            self.seed_product(sender_fee).await;
            let mut unit = self.store.begin().await.unwrap();
            let mut product = unit.find_product_listing(10).await.unwrap().unwrap().product;
            product.denomination_type = DenominationType::Range;
            product.min_recipient_denomination = Some(dec!(5));
            product.max_recipient_denomination = Some(dec!(500));
            product.sender_exchange_rate = Some(dec!(1600));
            unit.upsert_product(&product).await.unwrap();
            unit.replace_denominations(10, DenominationKind::Recipient, &[])
                .await
                .unwrap();
            unit.replace_denominations(10, DenominationKind::Sender, &[])
                .await
                .unwrap();
            unit.commit().await.unwrap();
        }
    }

    fn transfer(from: WalletId, to: WalletId, amount: Decimal) -> TransferRequest {
        TransferRequest {
            idempotency_key: None,
            source_wallet_id: from,
            destination: TransferDestination::Wallet { wallet_id: to },
            currency: Currency::Ngn,
            amount,
            fee: Decimal::ZERO,
            description: "rent".into(),
        }
    }

    fn gift_card(
        wallet_id: WalletId,
        unit_price: Decimal,
        quantity: u32,
    ) -> GiftCardPurchaseRequest {
        GiftCardPurchaseRequest {
            idempotency_key: None,
            wallet_id,
            product_id: 10,
            quantity,
            unit_price,
            recipient_email: Some("friend@example.com".into()),
            description: "Steam card".into(),
        }
    }

    fn payout(wallet_id: WalletId, amount: Decimal, fee: Decimal) -> FiatPayoutRequest {
        FiatPayoutRequest {
            idempotency_key: None,
            wallet_id,
            currency: Currency::Ngn,
            amount,
            fee,
            bank_code: "058".into(),
            account_number: "0123456789".into(),
            account_name: "Ada Obi".into(),
            description: "withdraw".into(),
        }
    }

    // ------------------------------------------------------------------------
    // Internal transfer
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_transfer_full_balance() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(1000)).await;
        let b = h.funded_wallet(2, Currency::Ngn, Decimal::ZERO).await;

        let record = h.orchestrator.transfer(transfer(a.id, b.id, dec!(1000))).await.unwrap();
        assert_eq!(record.status, TransactionStatus::Succeeded);
        assert_eq!(h.balance(a.id).await, Decimal::ZERO);
        assert_eq!(h.balance(b.id).await, dec!(1000));

        let entries = h.entries(record.id).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(settlement_sum(&entries), Decimal::ZERO);
        assert_eq!(
            entries.iter().map(|e| e.amount).sum::<Decimal>(),
            Decimal::ZERO
        );

        let stored = h.orchestrator.get_transaction(record.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Succeeded);
        h.assert_ledger_consistent(a.id).await;
        h.assert_ledger_consistent(b.id).await;
    }

    #[tokio::test]
    async fn test_transfer_fee_goes_to_fee_account() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(1000)).await;
        let b = h.funded_wallet(2, Currency::Ngn, Decimal::ZERO).await;

        let mut req = transfer(a.id, b.id, dec!(900));
        req.fee = dec!(50);
        let record = h.orchestrator.transfer(req).await.unwrap();

        assert_eq!(h.balance(a.id).await, dec!(50));
        assert_eq!(h.balance(b.id).await, dec!(900));
        let entries = h.entries(record.id).await;
        assert_eq!(entries.len(), 3);
        assert!(entries
            .iter()
            .any(|e| e.account == LedgerAccount::Fees && e.amount == dec!(50)));
        assert_eq!(settlement_sum(&entries), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_transfer_insufficient_funds_changes_nothing() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(100)).await;
        let b = h.funded_wallet(2, Currency::Ngn, Decimal::ZERO).await;

        let mut req = transfer(a.id, b.id, dec!(100));
        req.fee = dec!(0.01);
        let err = h.orchestrator.transfer(req).await.unwrap_err();
        assert!(matches!(err, TransactionError::InsufficientFunds { .. }));
        assert_eq!(err.category(), ErrorCategory::InsufficientResource);

        assert_eq!(h.balance(a.id).await, dec!(100));
        assert_eq!(h.balance(b.id).await, Decimal::ZERO);
        h.assert_ledger_consistent(a.id).await;
    }

    #[tokio::test]
    async fn test_cross_currency_transfer_holds_rate() {
        let h = harness();
        h.rates
            .record_rate(
                Currency::Ngn,
                Currency::Usd,
                dec!(0.000625),
                Utc::now() - chrono::Duration::minutes(5),
            )
            .await
            .unwrap();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(20000)).await;
        let b = h.funded_wallet(2, Currency::Usd, Decimal::ZERO).await;

        let record = h.orchestrator.transfer(transfer(a.id, b.id, dec!(16000))).await.unwrap();
        assert_eq!(record.exchange_rate, Some(dec!(0.000625)));
        assert_eq!(h.balance(b.id).await, dec!(10.00));

        let entries = h.entries(record.id).await;
        assert_eq!(settlement_sum(&entries), Decimal::ZERO);
        let credit = entries
            .iter()
            .find(|e| e.account == LedgerAccount::Wallet(b.id))
            .unwrap();
        assert_eq!(credit.currency, Currency::Usd);
        assert_eq!(credit.amount, dec!(10.00));
        assert_eq!(credit.settlement_amount, dec!(16000));
        h.assert_ledger_consistent(b.id).await;
    }

    #[tokio::test]
    async fn test_cross_currency_transfer_without_rate() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(1000)).await;
        let b = h.funded_wallet(2, Currency::Eur, Decimal::ZERO).await;
        let err = h
            .orchestrator
            .transfer(transfer(a.id, b.id, dec!(100)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_RATE_AVAILABLE");
        assert_eq!(h.balance(a.id).await, dec!(1000));
    }

    #[tokio::test]
    async fn test_transfer_to_external_account() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(5000)).await;
        let req = TransferRequest {
            destination: TransferDestination::External {
                account_reference: "bank:058:0123456789".into(),
                institution: Some("GTBank".into()),
            },
            ..transfer(a.id, a.id, dec!(2000))
        };
        let record = h.orchestrator.transfer(req).await.unwrap();

        assert_eq!(h.balance(a.id).await, dec!(3000));
        let entries = h.entries(record.id).await;
        let external = entries.iter().find(|e| !e.on_platform).unwrap();
        assert_eq!(external.amount, dec!(2000));
        assert_eq!(settlement_sum(&entries), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_transfer_rejects_same_wallet_and_bad_amounts() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(100)).await;
        assert!(matches!(
            h.orchestrator.transfer(transfer(a.id, a.id, dec!(10))).await,
            Err(TransactionError::SameWallet)
        ));
        let err = h
            .orchestrator
            .transfer(transfer(a.id, WalletId::new(), dec!(10.001)))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        let err = h
            .orchestrator
            .transfer(transfer(a.id, WalletId::new(), dec!(-5)))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn test_transfer_from_frozen_wallet() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(100)).await;
        let b = h.funded_wallet(2, Currency::Ngn, dec!(100)).await;
        h.wallets
            .set_wallet_status(a.id, WalletStatus::Frozen)
            .await
            .unwrap();

        let err = h
            .orchestrator
            .transfer(transfer(a.id, b.id, dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::WalletInactive { .. }));

        // Frozen wallets still receive
        h.orchestrator.transfer(transfer(b.id, a.id, dec!(10))).await.unwrap();
        assert_eq!(h.balance(a.id).await, dec!(110));
    }

    #[tokio::test]
    async fn test_transfer_idempotency_key() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(1000)).await;
        let b = h.funded_wallet(2, Currency::Ngn, Decimal::ZERO).await;

        let mut req = transfer(a.id, b.id, dec!(300));
        req.idempotency_key = Some("client-42".into());
        let first = h.orchestrator.transfer(req.clone()).await.unwrap();
        let second = h.orchestrator.transfer(req).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(h.balance(a.id).await, dec!(700));
        assert_eq!(h.balance(b.id).await, dec!(300));
    }

    #[tokio::test]
    async fn test_concurrent_transfers_never_overdraw() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(500)).await;
        let b = h.funded_wallet(2, Currency::Ngn, Decimal::ZERO).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let orchestrator = h.orchestrator.clone();
            let req = transfer(a.id, b.id, dec!(100));
            handles.push(tokio::spawn(async move { orchestrator.transfer(req).await }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(e) => assert!(matches!(e, TransactionError::InsufficientFunds { .. })),
            }
        }
        assert_eq!(succeeded, 5);
        assert_eq!(h.balance(a.id).await, Decimal::ZERO);
        assert_eq!(h.balance(b.id).await, dec!(500));
        h.assert_ledger_consistent(a.id).await;
        h.assert_ledger_consistent(b.id).await;
    }

    #[tokio::test]
    async fn test_opposite_transfers_complete() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(1000)).await;
        let b = h.funded_wallet(2, Currency::Ngn, dec!(1000)).await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let orchestrator = h.orchestrator.clone();
            let req = if i % 2 == 0 {
                transfer(a.id, b.id, dec!(10))
            } else {
                transfer(b.id, a.id, dec!(10))
            };
            handles.push(tokio::spawn(async move { orchestrator.transfer(req).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(h.balance(a.id).await + h.balance(b.id).await, dec!(2000));
        h.assert_ledger_consistent(a.id).await;
        h.assert_ledger_consistent(b.id).await;
    }

    #[tokio::test]
    async fn test_deposit_is_balanced() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Usd, Decimal::ZERO).await;
        let record = h
            .orchestrator
            .deposit(DepositRequest {
                idempotency_key: Some("dep-1".into()),
                wallet_id: a.id,
                currency: Currency::Usd,
                amount: dec!(25.50),
                source_reference: "card-charge-77".into(),
                description: "top up".into(),
            })
            .await
            .unwrap();
        assert_eq!(record.external_reference.as_deref(), Some("card-charge-77"));
        assert_eq!(settlement_sum(&h.entries(record.id).await), Decimal::ZERO);
        assert_eq!(h.balance(a.id).await, dec!(25.50));

        let err = h
            .orchestrator
            .deposit(DepositRequest {
                idempotency_key: None,
                wallet_id: a.id,
                currency: Currency::Ngn,
                amount: dec!(1),
                source_reference: "x".into(),
                description: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::CurrencyMismatch { .. }));
    }

    // ------------------------------------------------------------------------
    // External settlement
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_gift_card_insufficient_funds_before_provider_call() {
        let h = harness();
        h.seed_product(Decimal::ZERO).await;
        let a = h.funded_wallet(1, Currency::Ngn, dec!(500)).await;

        let mut unit = h.store.begin().await.unwrap();
        unit.replace_denominations(10, DenominationKind::Sender, &[dec!(600), dec!(40000)])
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let err = h
            .orchestrator
            .purchase_gift_card(gift_card(a.id, dec!(10), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::InsufficientFunds { .. }));
        assert_eq!(h.provider.call_count(), 0);
        assert_eq!(h.balance(a.id).await, dec!(500));
    }

    #[tokio::test]
    async fn test_gift_card_success() {
        let h = harness();
        h.seed_product(dec!(350)).await;
        let a = h.funded_wallet(1, Currency::Ngn, dec!(50000)).await;

        let record = h
            .orchestrator
            .purchase_gift_card(gift_card(a.id, dec!(10), 2))
            .await
            .unwrap();
        assert_eq!(record.status, TransactionStatus::Succeeded);
        assert_eq!(record.amount, dec!(32700));
        assert_eq!(record.external_reference.as_deref(), Some("mockpay-ref"));
        assert_eq!(h.provider.seen(), vec![record.id]);
        assert_eq!(h.balance(a.id).await, dec!(17300));

        let settlement = record.metadata.settlement().unwrap();
        assert_eq!(settlement.provider, "mockpay");
        assert_eq!(settlement_sum(&h.entries(record.id).await), Decimal::ZERO);
        h.assert_ledger_consistent(a.id).await;
    }

    #[tokio::test]
    async fn test_gift_card_unknown_denomination() {
        let h = harness();
        h.seed_product(Decimal::ZERO).await;
        let a = h.funded_wallet(1, Currency::Ngn, dec!(50000)).await;
        let err = h
            .orchestrator
            .purchase_gift_card(gift_card(a.id, dec!(15), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::InvalidDenomination { .. }));
        assert_eq!(h.balance(a.id).await, dec!(50000));
    }

    #[tokio::test]
    async fn test_range_gift_card_priced_with_vendor_rate() {
        let h = harness();
        h.seed_range_product(dec!(350)).await;
        let a = h.funded_wallet(1, Currency::Ngn, dec!(100000)).await;

        let record = h
            .orchestrator
            .purchase_gift_card(gift_card(a.id, dec!(20), 2))
            .await
            .unwrap();
        assert_eq!(record.status, TransactionStatus::Succeeded);
        // 2 x (20 x 1600 + 350)
        assert_eq!(record.amount, dec!(64700));
        assert_eq!(h.balance(a.id).await, dec!(35300));
        assert_eq!(settlement_sum(&h.entries(record.id).await), Decimal::ZERO);
        h.assert_ledger_consistent(a.id).await;
    }

    #[tokio::test]
    async fn test_range_gift_card_outside_bounds() {
        let h = harness();
        h.seed_range_product(Decimal::ZERO).await;
        let a = h.funded_wallet(1, Currency::Ngn, dec!(100000)).await;

        for unit_price in [dec!(4.99), dec!(500.01)] {
            let err = h
                .orchestrator
                .purchase_gift_card(gift_card(a.id, unit_price, 1))
                .await
                .unwrap_err();
            assert!(matches!(err, TransactionError::InvalidDenomination { .. }));
        }
        assert_eq!(h.provider.call_count(), 0);
        assert_eq!(h.balance(a.id).await, dec!(100000));
    }

    #[tokio::test]
    async fn test_provider_charges_less_than_estimate() {
        let h = harness();
        h.seed_product(Decimal::ZERO).await;
        let a = h.funded_wallet(1, Currency::Ngn, dec!(20000)).await;
        h.provider.set_outcome(ProviderOutcome::Success {
            external_reference: "order-1".into(),
            settled_amount: Some(dec!(15500)),
        });

        let record = h
            .orchestrator
            .purchase_gift_card(gift_card(a.id, dec!(10), 1))
            .await
            .unwrap();
        assert_eq!(h.balance(a.id).await, dec!(4500));
        let settlement = record.metadata.settlement().unwrap();
        assert_eq!(settlement.adjustment, Some(dec!(500)));
        assert_eq!(settlement_sum(&h.entries(record.id).await), Decimal::ZERO);
        h.assert_ledger_consistent(a.id).await;
    }

    #[tokio::test]
    async fn test_provider_charges_more_than_wallet_covers() {
        let h = harness();
        h.seed_product(Decimal::ZERO).await;
        let a = h.funded_wallet(1, Currency::Ngn, dec!(16100)).await;
        h.provider.set_outcome(ProviderOutcome::Success {
            external_reference: "order-2".into(),
            settled_amount: Some(dec!(16500)),
        });

        let record = h
            .orchestrator
            .purchase_gift_card(gift_card(a.id, dec!(10), 1))
            .await
            .unwrap();
        assert_eq!(h.balance(a.id).await, dec!(100));
        let settlement = record.metadata.settlement().unwrap();
        assert_eq!(settlement.shortfall, Some(dec!(500)));
        assert!(settlement.adjustment.is_none());
        h.assert_ledger_consistent(a.id).await;
    }

    #[tokio::test]
    async fn test_provider_failure_compensates() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(10000)).await;
        h.provider.fail("account closed");

        let record = h
            .orchestrator
            .fiat_payout(payout(a.id, dec!(7000), dec!(50)))
            .await
            .unwrap();
        assert_eq!(record.status, TransactionStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("account closed"));
        assert_eq!(h.balance(a.id).await, dec!(10000));

        // Reservation and compensation are both in the log
        let entries = h.entries(record.id).await;
        let wallet_entries: Vec<_> = entries
            .iter()
            .filter(|e| e.account == LedgerAccount::Wallet(a.id))
            .collect();
        assert_eq!(wallet_entries.len(), 2);
        assert_eq!(wallet_entries[0].amount, dec!(-7050));
        assert_eq!(wallet_entries[1].amount, dec!(7050));
        assert_eq!(settlement_sum(&entries), Decimal::ZERO);
        h.assert_ledger_consistent(a.id).await;
    }

    #[tokio::test]
    async fn test_provider_timeout_is_unknown() {
        let h = harness_with_timeout(Duration::from_millis(50));
        let a = h.funded_wallet(1, Currency::Ngn, dec!(1000)).await;
        h.provider.set_delay(Duration::from_millis(500));

        let record = h
            .orchestrator
            .send_crypto(CryptoSendRequest {
                idempotency_key: None,
                wallet_id: a.id,
                currency: Currency::Ngn,
                amount: dec!(400),
                fee: Decimal::ZERO,
                network: "tron".into(),
                asset: "USDT".into(),
                address: "TXYZ".into(),
                description: "send".into(),
            })
            .await
            .unwrap();
        assert_eq!(record.status, TransactionStatus::Unknown);
        // Reservation stands until reconciliation
        assert_eq!(h.balance(a.id).await, dec!(600));
        h.assert_ledger_consistent(a.id).await;
    }

    #[tokio::test]
    async fn test_saga_idempotent_replay_skips_provider() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(10000)).await;
        let mut req = payout(a.id, dec!(1000), Decimal::ZERO);
        req.idempotency_key = Some("payout-9".into());

        let first = h.orchestrator.fiat_payout(req.clone()).await.unwrap();
        let second = h.orchestrator.fiat_payout(req).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(h.provider.call_count(), 1);
        assert_eq!(h.balance(a.id).await, dec!(9000));
    }

    #[tokio::test]
    async fn test_reserve_failure_is_retryable() {
        let h = harness();
        let a = h.funded_wallet(1, Currency::Ngn, dec!(1000)).await;
        h.store.fail_next_commit();

        let err = h
            .orchestrator
            .fiat_payout(payout(a.id, dec!(100), Decimal::ZERO))
            .await
            .unwrap_err();
        assert!(err.category().is_retryable());
        assert_eq!(h.provider.call_count(), 0);
        assert_eq!(h.balance(a.id).await, dec!(1000));
    }

    #[tokio::test]
    async fn test_missing_provider() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(CurrencyConversionService::new(store)),
            Arc::new(ProviderRegistry::new()),
            Duration::from_secs(1),
        );
        let err = orchestrator
            .fiat_payout(payout(WalletId::new(), dec!(1), Decimal::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::ProviderNotConfigured(_)));
    }
}
