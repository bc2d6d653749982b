//! Reconciliation Worker
//!
//! Resolves external-settlement transactions left UNKNOWN (timeouts) or
//! PENDING (process died between reserve and settle). The provider is asked
//! for the authoritative status by correlation id; a still-unknown answer
//! leaves the transaction for the next scan.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::TransactionError;
use super::providers::{ProviderOutcome, ProviderRegistry};
use super::saga::SettlementSaga;
use super::state::TransactionStatus;
use super::types::TransactionRecord;
use crate::store::{Store, TransactionRepo};

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// How long a transaction must sit unresolved before it is scanned
    pub stale_after: Duration,
    /// Maximum transactions per scan
    pub batch_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            batch_size: 100,
        }
    }
}

/// Outcome counts of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub still_unknown: usize,
    pub errors: usize,
}

pub struct ReconciliationWorker<S: Store> {
    store: Arc<S>,
    providers: Arc<ProviderRegistry>,
    saga: Arc<SettlementSaga<S>>,
    config: ReconcileConfig,
}

impl<S: Store> ReconciliationWorker<S> {
    pub fn new(
        store: Arc<S>,
        providers: Arc<ProviderRegistry>,
        saga: Arc<SettlementSaga<S>>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            providers,
            saga,
            config,
        }
    }

    /// Run a single scan and resolve cycle
    pub async fn run_once(&self) -> Result<ReconcileReport, TransactionError> {
        let older_than =
            Utc::now() - chrono::Duration::milliseconds(self.config.stale_after.as_millis() as i64);

        let stale = {
            let mut unit = self
                .store
                .begin()
                .await
                .map_err(|e| TransactionError::storage("scan stale transactions", e))?;
            unit.find_stale_transactions(
                &[TransactionStatus::Pending, TransactionStatus::Unknown],
                older_than,
                self.config.batch_size,
            )
            .await
            .map_err(|e| TransactionError::storage("scan stale transactions", e))?
        };

        let mut report = ReconcileReport::default();
        if stale.is_empty() {
            debug!("No stale transactions found");
            return Ok(report);
        }
        info!(count = stale.len(), "Found stale transactions to reconcile");

        for record in stale {
            let platform = record.platform();
            if !platform.is_external() {
                continue;
            }
            report.scanned += 1;

            let provider = match self.providers.provider_name(platform) {
                Ok(name) => name,
                Err(e) => {
                    error!(transaction_id = %record.id, error = %e, "Cannot reconcile transaction");
                    report.errors += 1;
                    self.defer(&record).await;
                    continue;
                }
            };
            let outcome = self
                .saga
                .attempt(record.id, async {
                    match self.providers.status(platform, record.id).await {
                        Ok(outcome) => outcome,
                        Err(_) => ProviderOutcome::Unknown {
                            external_reference: None,
                        },
                    }
                })
                .await;

            match self
                .saga
                .settle(record.id, record.status, &provider, &outcome)
                .await
            {
                Ok(settled) => match settled.status {
                    TransactionStatus::Succeeded => report.succeeded += 1,
                    TransactionStatus::Failed => report.failed += 1,
                    _ => report.still_unknown += 1,
                },
                Err(e) => {
                    error!(
                        transaction_id = %record.id,
                        error = %e,
                        "Failed to reconcile transaction"
                    );
                    report.errors += 1;
                    self.defer(&record).await;
                }
            }
        }

        if report.still_unknown > 0 {
            warn!(count = report.still_unknown, "Transactions still unresolved");
        }
        info!(
            scanned = report.scanned,
            succeeded = report.succeeded,
            failed = report.failed,
            "Reconciliation scan finished"
        );
        Ok(report)
    }

    /// Requeue so the next scan reaches records behind this one
    async fn defer(&self, record: &TransactionRecord) {
        if let Err(e) = self.saga.defer(record.id, record.status).await {
            warn!(transaction_id = %record.id, error = %e, "Failed to requeue transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::settlement_sum;
    use crate::money::Currency;
    use crate::rates::CurrencyConversionService;
    use crate::store::memory::MemoryStore;
    use crate::store::{LedgerRepo, WalletRepo};
    use crate::transaction::api::{DepositRequest, FiatPayoutRequest};
    use crate::transaction::orchestrator::Orchestrator;
    use crate::transaction::providers::mock::MockProvider;
    use crate::wallet::{WalletId, WalletService, WalletType};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<MemoryStore>,
        provider: Arc<MockProvider>,
        orchestrator: Orchestrator<MemoryStore>,
        worker: ReconciliationWorker<MemoryStore>,
        wallet_id: WalletId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new("bankrail"));
        let providers = Arc::new(ProviderRegistry::new().with_fiat(provider.clone()));
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(CurrencyConversionService::new(store.clone())),
            providers.clone(),
            Duration::from_millis(50),
        );
        let worker = ReconciliationWorker::new(
            store.clone(),
            providers,
            orchestrator.saga(),
            ReconcileConfig {
                stale_after: Duration::ZERO,
                batch_size: 10,
            },
        );

        let wallet = WalletService::new(store.clone())
            .create(1, Currency::Ngn, WalletType::Personal)
            .await
            .unwrap();
        orchestrator
            .deposit(DepositRequest {
                idempotency_key: None,
                wallet_id: wallet.id,
                currency: Currency::Ngn,
                amount: dec!(1000),
                source_reference: "seed".into(),
                description: String::new(),
            })
            .await
            .unwrap();

        Fixture {
            store,
            provider,
            orchestrator,
            worker,
            wallet_id: wallet.id,
        }
    }

    impl Fixture {
        /// Payout that times out and lands UNKNOWN
        async fn unknown_payout(&self) -> TransactionRecord {
            self.provider.set_delay(Duration::from_millis(500));
            let record = self
                .orchestrator
                .fiat_payout(FiatPayoutRequest {
                    idempotency_key: None,
                    wallet_id: self.wallet_id,
                    currency: Currency::Ngn,
                    amount: dec!(400),
                    fee: dec!(10),
                    bank_code: "058".into(),
                    account_number: "0123456789".into(),
                    account_name: "Ada Obi".into(),
                    description: String::new(),
                })
                .await
                .unwrap();
            assert_eq!(record.status, TransactionStatus::Unknown);
            record
        }

        async fn balance(&self) -> Decimal {
            let mut unit = self.store.begin().await.unwrap();
            unit.find_wallet(self.wallet_id).await.unwrap().unwrap().balance
        }
    }

    #[test]
    fn test_reconcile_config_default() {
        let config = ReconcileConfig::default();
        assert_eq!(config.stale_after, Duration::from_secs(300));
        assert_eq!(config.batch_size, 100);
    }

    #[tokio::test]
    async fn test_unknown_resolves_to_failed_with_compensation() {
        let f = fixture().await;
        let record = f.unknown_payout().await;
        assert_eq!(f.balance().await, dec!(590));

        f.provider.set_status_outcome(ProviderOutcome::Failed {
            reason: "beneficiary bank rejected".into(),
            external_reference: Some("rail-9".into()),
        });
        let report = f.worker.run_once().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.failed, 1);

        let settled = f.orchestrator.get_transaction(record.id).await.unwrap();
        assert_eq!(settled.status, TransactionStatus::Failed);
        assert_eq!(settled.external_reference.as_deref(), Some("rail-9"));
        assert_eq!(f.balance().await, dec!(1000));

        let mut unit = f.store.begin().await.unwrap();
        let entries = unit.ledger_entries_for_transaction(record.id).await.unwrap();
        assert_eq!(settlement_sum(&entries), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_resolves_once() {
        let f = fixture().await;
        let record = f.unknown_payout().await;

        f.provider.set_status_outcome(ProviderOutcome::Success {
            external_reference: "rail-1".into(),
            settled_amount: None,
        });
        let first = f.worker.run_once().await.unwrap();
        assert_eq!(first.succeeded, 1);
        assert_eq!(f.balance().await, dec!(590));

        // Terminal now; a provider changing its mind is ignored
        f.provider.set_status_outcome(ProviderOutcome::Failed {
            reason: "late".into(),
            external_reference: None,
        });
        let second = f.worker.run_once().await.unwrap();
        assert_eq!(second.scanned, 0);
        let settled = f.orchestrator.get_transaction(record.id).await.unwrap();
        assert_eq!(settled.status, TransactionStatus::Succeeded);
        assert_eq!(f.balance().await, dec!(590));
    }

    #[tokio::test]
    async fn test_still_unknown_left_alone() {
        let f = fixture().await;
        let record = f.unknown_payout().await;

        let report = f.worker.run_once().await.unwrap();
        assert_eq!(report.still_unknown, 1);
        assert_eq!(f.provider.status_count(), 1);
        let current = f.orchestrator.get_transaction(record.id).await.unwrap();
        assert_eq!(current.status, TransactionStatus::Unknown);
        assert_eq!(f.balance().await, dec!(590));
    }

    #[tokio::test]
    async fn test_unresolved_records_do_not_block_the_backlog() {
        let f = fixture().await;
        let stuck = f.unknown_payout().await;
        let behind = f.unknown_payout().await;
        let worker = ReconciliationWorker::new(
            f.store.clone(),
            Arc::new(ProviderRegistry::new().with_fiat(f.provider.clone())),
            f.orchestrator.saga(),
            ReconcileConfig {
                stale_after: Duration::ZERO,
                batch_size: 1,
            },
        );

        let first = worker.run_once().await.unwrap();
        assert_eq!(first.still_unknown, 1);
        let requeued = f.orchestrator.get_transaction(stuck.id).await.unwrap();
        assert!(requeued.updated_at > stuck.updated_at);

        // The next batch reaches the record queued behind the stuck one
        f.provider.set_status_outcome(ProviderOutcome::Success {
            external_reference: "rail-2".into(),
            settled_amount: None,
        });
        let second = worker.run_once().await.unwrap();
        assert_eq!(second.succeeded, 1);
        let resolved = f.orchestrator.get_transaction(behind.id).await.unwrap();
        assert_eq!(resolved.status, TransactionStatus::Succeeded);
        let still = f.orchestrator.get_transaction(stuck.id).await.unwrap();
        assert_eq!(still.status, TransactionStatus::Unknown);
    }

    #[tokio::test]
    async fn test_missing_provider_requeues() {
        let f = fixture().await;
        let stuck = f.unknown_payout().await;
        let worker = ReconciliationWorker::new(
            f.store.clone(),
            Arc::new(ProviderRegistry::new()),
            f.orchestrator.saga(),
            ReconcileConfig {
                stale_after: Duration::ZERO,
                batch_size: 1,
            },
        );

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.errors, 1);
        let current = f.orchestrator.get_transaction(stuck.id).await.unwrap();
        assert_eq!(current.status, TransactionStatus::Unknown);
        assert!(current.updated_at > stuck.updated_at);
    }

    #[tokio::test]
    async fn test_nothing_stale() {
        let f = fixture().await;
        let report = f.worker.run_once().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(f.provider.status_count(), 0);
    }
}
