//! Wallet Service

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::WalletError;
use super::models::{CreateWalletRequest, Wallet, WalletId, WalletStatus, WalletType};
use crate::money::Currency;
use crate::store::{LedgerRepo, Store, UnitOfWork, WalletRepo};

/// Balance vs ledger comparison for one wallet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletAudit {
    pub wallet_id: WalletId,
    pub balance: Decimal,
    pub ledger_sum: Decimal,
}

impl WalletAudit {
    #[inline]
    pub fn drift(&self) -> Decimal {
        self.balance - self.ledger_sum
    }

    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.drift().is_zero()
    }
}

pub struct WalletService<S: Store> {
    store: Arc<S>,
}

impl<S: Store> WalletService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create a wallet from an API request
    pub async fn create_wallet(
        &self,
        owner_id: i64,
        req: &CreateWalletRequest,
    ) -> Result<Wallet, WalletError> {
        let (currency, wallet_type) = req.parse()?;
        self.create(owner_id, currency, wallet_type).await
    }

    /// Create a wallet in its own unit
    pub async fn create(
        &self,
        owner_id: i64,
        currency: Currency,
        wallet_type: WalletType,
    ) -> Result<Wallet, WalletError> {
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| WalletError::storage("create wallet", e))?;
        let wallet = Self::create_wallet_in(&mut unit, owner_id, currency, wallet_type).await?;
        unit.commit()
            .await
            .map_err(|e| WalletError::storage(format!("commit wallet {}", wallet.id), e))?;

        info!(
            wallet_id = %wallet.id,
            owner_id = owner_id,
            currency = %currency,
            wallet_type = wallet_type.as_str(),
            "Wallet created"
        );
        Ok(wallet)
    }

    /// Create a wallet inside a caller-owned unit (e.g. together with the user row).
    /// Nothing is durable until the caller commits.
    pub async fn create_wallet_in<U>(
        unit: &mut U,
        owner_id: i64,
        currency: Currency,
        wallet_type: WalletType,
    ) -> Result<Wallet, WalletError>
    where
        U: WalletRepo + ?Sized,
    {
        let wallet = Wallet::new(owner_id, currency, wallet_type);
        match unit.insert_wallet(&wallet).await {
            Ok(()) => Ok(wallet),
            Err(e) if e.is_unique_violation() => Err(WalletError::DuplicateWallet {
                owner_id,
                currency: currency.code().to_string(),
            }),
            Err(e) => Err(WalletError::storage(
                format!("insert wallet for owner {}", owner_id),
                e,
            )),
        }
    }

    pub async fn get_wallet(&self, id: WalletId) -> Result<Wallet, WalletError> {
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| WalletError::storage(format!("get wallet {}", id), e))?;
        unit.find_wallet(id)
            .await
            .map_err(|e| WalletError::storage(format!("get wallet {}", id), e))?
            .ok_or_else(|| WalletError::NotFound(id.to_string()))
    }

    pub async fn get_wallet_by_owner(
        &self,
        owner_id: i64,
        currency: Currency,
    ) -> Result<Wallet, WalletError> {
        let ctx = || format!("get wallet of owner {} in {}", owner_id, currency);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| WalletError::storage(ctx(), e))?;
        unit.find_wallet_by_owner(owner_id, currency)
            .await
            .map_err(|e| WalletError::storage(ctx(), e))?
            .ok_or_else(|| WalletError::NotFound(format!("owner {} {}", owner_id, currency)))
    }

    /// Freeze, unfreeze or close a wallet.
    ///
    /// Closing requires a zero balance; closed is final.
    pub async fn set_wallet_status(
        &self,
        id: WalletId,
        status: WalletStatus,
    ) -> Result<Wallet, WalletError> {
        let ctx = || format!("set status of wallet {}", id);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| WalletError::storage(ctx(), e))?;
        let mut wallet = unit
            .find_wallet_for_update(id)
            .await
            .map_err(|e| WalletError::storage(ctx(), e))?
            .ok_or_else(|| WalletError::NotFound(id.to_string()))?;

        if wallet.status == status {
            return Ok(wallet);
        }
        if wallet.status == WalletStatus::Closed {
            return Err(WalletError::InvalidStatusTransition {
                wallet_id: id,
                from: wallet.status,
                to: status,
            });
        }
        if status == WalletStatus::Closed && !wallet.balance.is_zero() {
            return Err(WalletError::WalletNotEmpty(id));
        }

        unit.update_wallet_status(id, status)
            .await
            .map_err(|e| WalletError::storage(ctx(), e))?;
        unit.commit()
            .await
            .map_err(|e| WalletError::storage(ctx(), e))?;

        info!(wallet_id = %id, from = %wallet.status, to = %status, "Wallet status changed");
        wallet.status = status;
        Ok(wallet)
    }

    /// Recompute the ledger sum for a wallet and compare it with the balance
    pub async fn verify_wallet(&self, id: WalletId) -> Result<WalletAudit, WalletError> {
        let ctx = || format!("verify wallet {}", id);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| WalletError::storage(ctx(), e))?;
        let wallet = unit
            .find_wallet(id)
            .await
            .map_err(|e| WalletError::storage(ctx(), e))?
            .ok_or_else(|| WalletError::NotFound(id.to_string()))?;
        let ledger_sum = unit
            .ledger_sum_for_wallet(id)
            .await
            .map_err(|e| WalletError::storage(ctx(), e))?;

        let audit = WalletAudit {
            wallet_id: id,
            balance: wallet.balance,
            ledger_sum,
        };
        if !audit.is_consistent() {
            warn!(
                wallet_id = %id,
                balance = %audit.balance,
                ledger_sum = %audit.ledger_sum,
                "Wallet balance drifted from ledger"
            );
        }
        Ok(audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::ledger;
    use crate::store::memory::MemoryStore;
    use crate::transaction::TransactionId;
    use rust_decimal_macros::dec;

    fn service() -> (Arc<MemoryStore>, WalletService<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), WalletService::new(store))
    }

    fn request(currency: &str, wallet_type: Option<&str>) -> CreateWalletRequest {
        CreateWalletRequest {
            currency: currency.into(),
            wallet_type: wallet_type.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_duplicate_wallet_rejected() {
        let (_, svc) = service();
        let first = svc.create_wallet(7, &request("NGN", None)).await.unwrap();
        assert_eq!(first.wallet_type, WalletType::Personal);
        assert_eq!(first.balance, Decimal::ZERO);

        let err = svc
            .create_wallet(7, &request("NGN", Some("business")))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::DuplicateWallet { owner_id: 7, .. }));
        assert_eq!(err.category(), ErrorCategory::Conflict);

        // Another currency is fine
        svc.create_wallet(7, &request("USD", None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_currency_rejected() {
        let (_, svc) = service();
        let err = svc.create_wallet(7, &request("GBP", None)).await.unwrap_err();
        assert!(matches!(err, WalletError::UnsupportedCurrency(_)));
    }

    #[tokio::test]
    async fn test_get_wallet() {
        let (_, svc) = service();
        let wallet = svc.create(1, Currency::Eur, WalletType::Savings).await.unwrap();
        assert_eq!(svc.get_wallet(wallet.id).await.unwrap(), wallet);
        assert_eq!(
            svc.get_wallet_by_owner(1, Currency::Eur).await.unwrap().id,
            wallet.id
        );
        assert!(matches!(
            svc.get_wallet(WalletId::new()).await,
            Err(WalletError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_in_caller_unit_is_atomic() {
        let (store, svc) = service();
        let mut unit = store.begin().await.unwrap();
        let wallet = WalletService::<MemoryStore>::create_wallet_in(
            &mut unit,
            3,
            Currency::Ngn,
            WalletType::Personal,
        )
        .await
        .unwrap();
        // Caller aborts its unit
        drop(unit);

        assert!(matches!(
            svc.get_wallet(wallet.id).await,
            Err(WalletError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_requires_empty_wallet() {
        let (store, svc) = service();
        let mut wallet = svc.create(1, Currency::Ngn, WalletType::Personal).await.unwrap();

        let mut unit = store.begin().await.unwrap();
        ledger::post_credit(&mut unit, &mut wallet, TransactionId::new(), dec!(10), dec!(10))
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let err = svc
            .set_wallet_status(wallet.id, WalletStatus::Closed)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::WalletNotEmpty(_)));

        let frozen = svc
            .set_wallet_status(wallet.id, WalletStatus::Frozen)
            .await
            .unwrap();
        assert_eq!(frozen.status, WalletStatus::Frozen);
    }

    #[tokio::test]
    async fn test_closed_is_final() {
        let (_, svc) = service();
        let wallet = svc.create(1, Currency::Usd, WalletType::Personal).await.unwrap();
        svc.set_wallet_status(wallet.id, WalletStatus::Closed)
            .await
            .unwrap();
        let err = svc
            .set_wallet_status(wallet.id, WalletStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidStatusTransition { .. }));
    }

    #[tokio::test]
    async fn test_verify_wallet_matches_ledger() {
        let (store, svc) = service();
        let mut wallet = svc.create(1, Currency::Ngn, WalletType::Personal).await.unwrap();

        let mut unit = store.begin().await.unwrap();
        ledger::post_credit(&mut unit, &mut wallet, TransactionId::new(), dec!(500), dec!(500))
            .await
            .unwrap();
        ledger::post_debit(&mut unit, &mut wallet, TransactionId::new(), dec!(120.25), dec!(120.25))
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let audit = svc.verify_wallet(wallet.id).await.unwrap();
        assert_eq!(audit.balance, dec!(379.75));
        assert!(audit.is_consistent());
    }
}
