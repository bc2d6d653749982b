//! Settlement Saga
//!
//! One primitive for every operation that settles through an external
//! provider:
//!
//! ```text
//! reserve  ── short unit: debit wallet, insert PENDING, commit
//! attempt  ── no unit open: provider call with a bounded timeout
//! settle   ── short unit, CAS on status:
//!               success  → SUCCEEDED (+ adjustment against the estimate)
//!               failure  → FAILED + compensating credit
//!               unknown  → UNKNOWN, left for reconciliation
//! ```
//!
//! The original reservation entries are never edited: compensation and
//! adjustment are new entries.

use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::TransactionError;
use super::providers::ProviderOutcome;
use super::state::TransactionStatus;
use super::types::{
    NewTransaction, SettlementDetails, TransactionId, TransactionRecord, TransactionUpdate,
};
use crate::ledger::{self, LedgerAccount};
use crate::store::{Store, TransactionRepo, UnitOfWork, WalletRepo};

/// What `reserve` did
#[derive(Debug, Clone)]
pub enum Reservation {
    /// Wallet debited, transaction PENDING
    Reserved(TransactionRecord),
    /// Idempotency key already used; nothing moved
    Replayed(TransactionRecord),
}

impl Reservation {
    pub fn record(&self) -> &TransactionRecord {
        match self {
            Reservation::Reserved(r) | Reservation::Replayed(r) => r,
        }
    }
}

pub struct SettlementSaga<S: Store> {
    store: Arc<S>,
    timeout: Duration,
}

impl<S: Store> SettlementSaga<S> {
    pub fn new(store: Arc<S>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run all three steps. `call` receives the transaction id as the
    /// provider correlation key.
    pub async fn execute<F, Fut>(
        &self,
        new: NewTransaction,
        provider: &str,
        call: F,
    ) -> Result<TransactionRecord, TransactionError>
    where
        F: FnOnce(TransactionId) -> Fut + Send,
        Fut: Future<Output = ProviderOutcome> + Send,
    {
        let record = match self.reserve(new, provider).await? {
            Reservation::Reserved(record) => record,
            Reservation::Replayed(record) => {
                debug!(transaction_id = %record.id, "Idempotent replay, provider not called");
                return Ok(record);
            }
        };

        let outcome = self.attempt(record.id, call(record.id)).await;
        self.settle(record.id, TransactionStatus::Pending, provider, &outcome)
            .await
    }

    /// Step 1: debit the quoted total and persist the PENDING transaction
    pub async fn reserve(
        &self,
        new: NewTransaction,
        provider: &str,
    ) -> Result<Reservation, TransactionError> {
        let wallet_id = new.wallet_id;
        let ctx = || format!("reserve on wallet {}", wallet_id);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;

        if let Some(key) = &new.idempotency_key
            && let Some(existing) = unit
                .find_transaction_by_key(key)
                .await
                .map_err(|e| TransactionError::storage(ctx(), e))?
        {
            if existing.tx_type != new.tx_type || existing.wallet_id != new.wallet_id {
                return Err(TransactionError::IdempotencyConflict(key.clone()));
            }
            return Ok(Reservation::Replayed(existing));
        }

        let mut wallet = unit
            .find_wallet_for_update(wallet_id)
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?
            .ok_or(TransactionError::WalletNotFound(wallet_id))?;
        if wallet.currency != new.currency {
            return Err(TransactionError::CurrencyMismatch {
                wallet_id,
                wallet: wallet.currency,
                request: new.currency,
            });
        }

        let record = TransactionRecord::new(new);
        unit.insert_transaction(&record)
            .await
            .map_err(|e| match &record.idempotency_key {
                Some(key) if e.is_unique_violation() => {
                    TransactionError::IdempotencyConflict(key.clone())
                }
                _ => TransactionError::storage(ctx(), e),
            })?;

        let total = record.total();
        ledger::post_debit(&mut unit, &mut wallet, record.id, total, total)
            .await
            .map_err(|e| TransactionError::ledger(ctx(), e))?;
        ledger::post_counterparty(
            &mut unit,
            record.id,
            provider_account(record.platform().as_str(), provider),
            record.currency,
            record.amount,
            record.amount,
        )
        .await
        .map_err(|e| TransactionError::ledger(ctx(), e))?;
        if record.fee > Decimal::ZERO {
            ledger::post_counterparty(
                &mut unit,
                record.id,
                LedgerAccount::Fees,
                record.currency,
                record.fee,
                record.fee,
            )
            .await
            .map_err(|e| TransactionError::ledger(ctx(), e))?;
        }

        unit.commit()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;

        info!(
            transaction_id = %record.id,
            wallet_id = %wallet_id,
            platform = %record.platform(),
            amount = %record.amount,
            fee = %record.fee,
            "Funds reserved"
        );
        Ok(Reservation::Reserved(record))
    }

    /// Step 2: the provider call. A timeout is UNKNOWN, never a failure.
    pub async fn attempt<Fut>(&self, transaction_id: TransactionId, call: Fut) -> ProviderOutcome
    where
        Fut: Future<Output = ProviderOutcome> + Send,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(outcome) => {
                debug!(transaction_id = %transaction_id, outcome = %outcome, "Provider responded");
                outcome
            }
            Err(_) => {
                warn!(
                    transaction_id = %transaction_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Provider call timed out"
                );
                ProviderOutcome::Unknown {
                    external_reference: None,
                }
            }
        }
    }

    /// Step 3: record the outcome if the transaction is still in `expected`.
    ///
    /// Returns the current record; when another settler won the CAS nothing
    /// is booked and the winner's record is returned.
    pub async fn settle(
        &self,
        transaction_id: TransactionId,
        expected: TransactionStatus,
        provider: &str,
        outcome: &ProviderOutcome,
    ) -> Result<TransactionRecord, TransactionError> {
        let ctx = || format!("settle transaction {}", transaction_id);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;
        let record = unit
            .find_transaction(transaction_id)
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?
            .ok_or_else(|| TransactionError::TransactionNotFound(transaction_id.to_string()))?;

        if record.status != expected {
            debug!(
                transaction_id = %transaction_id,
                status = %record.status,
                expected = %expected,
                "Already settled"
            );
            return Ok(record);
        }

        let next = match outcome {
            ProviderOutcome::Success { .. } => TransactionStatus::Succeeded,
            ProviderOutcome::Failed { .. } => TransactionStatus::Failed,
            ProviderOutcome::Unknown { .. } => TransactionStatus::Unknown,
        };
        if next == expected {
            // Still unknown; requeue behind the rest of the backlog
            unit.touch_transaction_if(transaction_id, expected)
                .await
                .map_err(|e| TransactionError::storage(ctx(), e))?;
            unit.commit()
                .await
                .map_err(|e| TransactionError::storage(ctx(), e))?;
            debug!(transaction_id = %transaction_id, "Outcome still unknown");
            return Ok(record);
        }
        if !expected.can_transition_to(next) {
            return Err(TransactionError::InvalidStateTransition(format!(
                "{}: {} -> {}",
                transaction_id, expected, next
            )));
        }

        let mut details = SettlementDetails {
            provider: provider.to_string(),
            ..Default::default()
        };
        let account = provider_account(record.platform().as_str(), provider);

        let error = match outcome {
            ProviderOutcome::Success { settled_amount, .. } => {
                details.settled_amount = *settled_amount;
                if let Some(settled) = settled_amount {
                    self.adjust(&mut unit, &record, *settled, account, &mut details)
                        .await?;
                }
                None
            }
            ProviderOutcome::Failed { reason, .. } => {
                self.compensate(&mut unit, &record, account).await?;
                details.failure_reason = Some(reason.clone());
                Some(reason.clone())
            }
            ProviderOutcome::Unknown { .. } => None,
        };

        let update = TransactionUpdate {
            status: next,
            external_reference: outcome.external_reference().map(String::from),
            error,
            metadata: record.metadata.clone().with_settlement(details),
        };
        let applied = unit
            .update_transaction_if(transaction_id, expected, &update)
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;
        if !applied {
            // Lost the race; drop our entries with the unit
            drop(unit);
            return self.reload(transaction_id).await;
        }
        unit.commit()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;

        match next {
            TransactionStatus::Succeeded => info!(
                transaction_id = %transaction_id,
                external_reference = ?update.external_reference,
                "Settlement succeeded"
            ),
            TransactionStatus::Failed => warn!(
                transaction_id = %transaction_id,
                reason = ?update.error,
                "Settlement failed, reservation compensated"
            ),
            _ => error!(
                transaction_id = %transaction_id,
                "Settlement outcome unknown, awaiting reconciliation"
            ),
        }

        let mut settled = record;
        settled.status = update.status;
        if update.external_reference.is_some() {
            settled.external_reference = update.external_reference;
        }
        if update.error.is_some() {
            settled.error = update.error;
        }
        settled.metadata = update.metadata;
        Ok(settled)
    }

    /// Reverse the reservation with new entries
    async fn compensate(
        &self,
        unit: &mut S::Unit,
        record: &TransactionRecord,
        account: LedgerAccount,
    ) -> Result<(), TransactionError> {
        let ctx = || format!("compensate transaction {}", record.id);
        let mut wallet = unit
            .find_wallet_for_update(record.wallet_id)
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?
            .ok_or(TransactionError::WalletNotFound(record.wallet_id))?;

        let total = record.total();
        ledger::post_refund(unit, &mut wallet, record.id, total, total)
            .await
            .map_err(|e| TransactionError::ledger(ctx(), e))?;
        ledger::post_counterparty(
            unit,
            record.id,
            account,
            record.currency,
            -record.amount,
            -record.amount,
        )
        .await
        .map_err(|e| TransactionError::ledger(ctx(), e))?;
        if record.fee > Decimal::ZERO {
            ledger::post_counterparty(
                unit,
                record.id,
                LedgerAccount::Fees,
                record.currency,
                -record.fee,
                -record.fee,
            )
            .await
            .map_err(|e| TransactionError::ledger(ctx(), e))?;
        }
        Ok(())
    }

    /// Book the difference between the reserved estimate and the provider's
    /// authoritative amount.
    ///
    /// `settled` is in the provider's quote currency; `exchange_rate` on the
    /// record converts it to the wallet currency.
    async fn adjust(
        &self,
        unit: &mut S::Unit,
        record: &TransactionRecord,
        settled: Decimal,
        account: LedgerAccount,
        details: &mut SettlementDetails,
    ) -> Result<(), TransactionError> {
        let rate = record.exchange_rate.unwrap_or(Decimal::ONE);
        let actual = record.currency.round(settled * rate);
        let diff = actual - record.amount;
        if diff.is_zero() {
            return Ok(());
        }

        let ctx = || format!("adjust transaction {}", record.id);
        let mut wallet = unit
            .find_wallet_for_update(record.wallet_id)
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?
            .ok_or(TransactionError::WalletNotFound(record.wallet_id))?;

        if diff < Decimal::ZERO {
            // Charged less than reserved
            let refund = -diff;
            ledger::post_refund(unit, &mut wallet, record.id, refund, refund)
                .await
                .map_err(|e| TransactionError::ledger(ctx(), e))?;
            ledger::post_counterparty(unit, record.id, account, record.currency, diff, diff)
                .await
                .map_err(|e| TransactionError::ledger(ctx(), e))?;
            details.adjustment = Some(refund);
        } else if wallet.can_debit() && wallet.balance >= diff {
            ledger::post_debit(unit, &mut wallet, record.id, diff, diff)
                .await
                .map_err(|e| TransactionError::ledger(ctx(), e))?;
            ledger::post_counterparty(unit, record.id, account, record.currency, diff, diff)
                .await
                .map_err(|e| TransactionError::ledger(ctx(), e))?;
            details.adjustment = Some(-diff);
        } else {
            warn!(
                transaction_id = %record.id,
                wallet_id = %record.wallet_id,
                shortfall = %diff,
                "Provider charged more than the wallet can cover"
            );
            details.shortfall = Some(diff);
        }

        info!(
            transaction_id = %record.id,
            reserved = %record.amount,
            actual = %actual,
            "Settlement adjusted against estimate"
        );
        Ok(())
    }

    /// Push a record that could not be resolved this round to the back of the
    /// stale queue. No-op if its status moved on.
    pub async fn defer(
        &self,
        transaction_id: TransactionId,
        expected: TransactionStatus,
    ) -> Result<(), TransactionError> {
        let ctx = || format!("defer transaction {}", transaction_id);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;
        unit.touch_transaction_if(transaction_id, expected)
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;
        unit.commit()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))
    }

    async fn reload(
        &self,
        transaction_id: TransactionId,
    ) -> Result<TransactionRecord, TransactionError> {
        let ctx = || format!("reload transaction {}", transaction_id);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?;
        unit.find_transaction(transaction_id)
            .await
            .map_err(|e| TransactionError::storage(ctx(), e))?
            .ok_or_else(|| TransactionError::TransactionNotFound(transaction_id.to_string()))
    }
}

/// Off-platform ledger account of a settlement provider
pub(crate) fn provider_account(platform: &str, provider: &str) -> LedgerAccount {
    LedgerAccount::External(format!("{}:{}", platform, provider))
}
