//! Referral Earnings Ledger
//!
//! Accrues referral bonuses and moves them out through withdrawal requests.
//!
//! ```text
//! TrackReferral       total_earned += bonus, available += bonus
//! RequestWithdrawal   available -= amount, request PENDING
//! reject              available += amount            (REJECTED)
//! complete            withdrawn += amount, wallet credited via ledger (COMPLETED)
//! ```

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::ReferralError;
use super::models::{Referral, ReferralEarnings, WithdrawalRequest, WithdrawalStatus};
use crate::ledger::{self, LedgerAccount, LedgerError};
use crate::money::Currency;
use crate::store::{ReferralRepo, Store, TransactionRepo, UnitOfWork, WalletRepo};
use crate::transaction::{
    NewTransaction, TransactionMetadata, TransactionRecord, TransactionStatus, TransactionType,
};

#[derive(Debug, Clone)]
pub struct ReferralConfig {
    /// Smallest amount a single withdrawal may request
    pub withdrawal_threshold: Decimal,
    /// Currency of the wallet withdrawals are paid into
    pub settlement_currency: Currency,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            withdrawal_threshold: Decimal::from(10_000),
            settlement_currency: Currency::Ngn,
        }
    }
}

pub struct ReferralLedger<S: Store> {
    store: Arc<S>,
    config: ReferralConfig,
}

impl<S: Store> ReferralLedger<S> {
    pub fn new(store: Arc<S>, config: ReferralConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ReferralConfig {
        &self.config
    }

    /// Record that `referrer_id` referred `referee_id` and credit the bonus
    pub async fn track_referral(
        &self,
        referrer_id: i64,
        referee_id: i64,
        bonus: Decimal,
    ) -> Result<Referral, ReferralError> {
        if referrer_id == referee_id {
            return Err(ReferralError::SelfReferral(referrer_id));
        }
        if bonus <= Decimal::ZERO {
            return Err(ReferralError::InvalidAmount(bonus));
        }

        let ctx = || format!("track referral of {}", referee_id);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?;
        if unit
            .find_referral_by_referee(referee_id)
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?
            .is_some()
        {
            return Err(ReferralError::AlreadyReferred(referee_id));
        }

        let referral = Referral {
            id: Uuid::new_v4(),
            referrer_id,
            referee_id,
            bonus,
            created_at: Utc::now(),
        };
        unit.insert_referral(&referral).await.map_err(|e| {
            if e.is_unique_violation() {
                ReferralError::AlreadyReferred(referee_id)
            } else {
                ReferralError::storage(ctx(), e)
            }
        })?;

        let mut earnings = self.lock_earnings(&mut unit, referrer_id).await?;
        earnings.total_earned += bonus;
        earnings.available_balance += bonus;
        earnings.updated_at = Utc::now();
        unit.upsert_earnings(&earnings)
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?;

        unit.commit()
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?;

        info!(
            referrer_id = referrer_id,
            referee_id = referee_id,
            bonus = %bonus,
            available = %earnings.available_balance,
            "Referral tracked"
        );
        Ok(referral)
    }

    /// Earnings of `user_id`; zero balances if the user never earned
    pub async fn get_earnings(&self, user_id: i64) -> Result<ReferralEarnings, ReferralError> {
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| ReferralError::storage(format!("earnings of {}", user_id), e))?;
        Ok(unit
            .find_earnings(user_id)
            .await
            .map_err(|e| ReferralError::storage(format!("earnings of {}", user_id), e))?
            .unwrap_or_else(|| ReferralEarnings::empty(user_id)))
    }

    /// Reserve `amount` of available earnings against a PENDING request.
    ///
    /// The threshold is checked before the balance.
    pub async fn request_withdrawal(
        &self,
        user_id: i64,
        amount: Decimal,
    ) -> Result<WithdrawalRequest, ReferralError> {
        if amount <= Decimal::ZERO {
            return Err(ReferralError::InvalidAmount(amount));
        }
        if amount < self.config.withdrawal_threshold {
            return Err(ReferralError::WithdrawalThreshold {
                amount,
                threshold: self.config.withdrawal_threshold,
            });
        }

        let ctx = || format!("withdrawal for user {}", user_id);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?;

        let mut earnings = self.lock_earnings(&mut unit, user_id).await?;
        if amount > earnings.available_balance {
            return Err(ReferralError::InsufficientBalance {
                available: earnings.available_balance,
                requested: amount,
            });
        }

        let wallet = unit
            .find_wallet_by_owner(user_id, self.config.settlement_currency)
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?
            .ok_or(ReferralError::SettlementWalletNotFound(user_id))?;

        earnings.available_balance -= amount;
        earnings.updated_at = Utc::now();
        unit.upsert_earnings(&earnings)
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?;

        let request = WithdrawalRequest::new(user_id, amount, wallet.id);
        unit.insert_withdrawal_request(&request)
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?;

        unit.commit()
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?;

        info!(
            request_id = %request.id,
            user_id = user_id,
            wallet_id = %wallet.id,
            amount = %amount,
            "Withdrawal requested"
        );
        Ok(request)
    }

    pub async fn get_withdrawal_request(
        &self,
        id: Uuid,
    ) -> Result<WithdrawalRequest, ReferralError> {
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| ReferralError::storage(format!("withdrawal request {}", id), e))?;
        unit.find_withdrawal_request(id)
            .await
            .map_err(|e| ReferralError::storage(format!("withdrawal request {}", id), e))?
            .ok_or(ReferralError::NotFound(id))
    }

    /// Move a request forward. Setting the current status again is a no-op.
    pub async fn update_withdrawal_request_status(
        &self,
        id: Uuid,
        status: WithdrawalStatus,
    ) -> Result<WithdrawalRequest, ReferralError> {
        let ctx = || format!("update withdrawal request {}", id);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?;
        let mut request = unit
            .find_withdrawal_request_for_update(id)
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?
            .ok_or(ReferralError::NotFound(id))?;

        if request.status == status {
            debug!(request_id = %id, status = %status, "Withdrawal request already in status");
            return Ok(request);
        }
        if !request.status.can_transition_to(status) {
            warn!(
                request_id = %id,
                from = %request.status,
                to = %status,
                "Rejected withdrawal status change"
            );
            return Err(ReferralError::InvalidStatusTransition {
                id,
                from: request.status,
                to: status,
            });
        }

        let mut earnings = self.lock_earnings(&mut unit, request.user_id).await?;
        match status {
            WithdrawalStatus::Rejected => {
                earnings.available_balance += request.amount;
            }
            WithdrawalStatus::Completed => {
                let record = self.pay_out(&mut unit, &request).await?;
                earnings.withdrawn_balance += request.amount;
                request.transaction_id = Some(record.id);
            }
            WithdrawalStatus::Approved | WithdrawalStatus::Pending => {}
        }
        earnings.updated_at = Utc::now();
        unit.upsert_earnings(&earnings)
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?;
        unit.update_withdrawal_request(id, status, request.transaction_id)
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?;

        unit.commit()
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?;

        info!(
            request_id = %id,
            user_id = request.user_id,
            from = %request.status,
            to = %status,
            "Withdrawal request updated"
        );
        request.status = status;
        request.updated_at = Utc::now();
        Ok(request)
    }

    /// Credit the settlement wallet from the reward pool
    async fn pay_out(
        &self,
        unit: &mut S::Unit,
        request: &WithdrawalRequest,
    ) -> Result<TransactionRecord, ReferralError> {
        let ctx = || format!("pay out withdrawal request {}", request.id);
        let mut wallet = unit
            .find_wallet_for_update(request.wallet_id)
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?
            .ok_or(ReferralError::SettlementWalletNotFound(request.user_id))?;

        let mut record = TransactionRecord::new(NewTransaction {
            idempotency_key: Some(format!("referral-withdrawal:{}", request.id)),
            tx_type: TransactionType::ReferralPayout,
            wallet_id: wallet.id,
            owner_id: wallet.owner_id,
            currency: wallet.currency,
            amount: request.amount,
            fee: Decimal::ZERO,
            exchange_rate: None,
            description: "Referral earnings withdrawal".to_string(),
            metadata: TransactionMetadata::Referral {
                withdrawal_request_id: request.id,
            },
        });
        record.status = TransactionStatus::Succeeded;
        unit.insert_transaction(&record)
            .await
            .map_err(|e| ReferralError::storage(ctx(), e))?;

        let ledger_err = |source: LedgerError| ReferralError::Ledger {
            context: ctx(),
            source,
        };
        ledger::post_counterparty(
            unit,
            record.id,
            LedgerAccount::Rewards,
            wallet.currency,
            -request.amount,
            -request.amount,
        )
        .await
        .map_err(&ledger_err)?;
        ledger::post_credit(unit, &mut wallet, record.id, request.amount, request.amount)
            .await
            .map_err(&ledger_err)?;

        info!(
            transaction_id = %record.id,
            wallet_id = %wallet.id,
            amount = %request.amount,
            "Referral payout credited"
        );
        Ok(record)
    }

    async fn lock_earnings(
        &self,
        unit: &mut S::Unit,
        user_id: i64,
    ) -> Result<ReferralEarnings, ReferralError> {
        unit.lock_earnings(user_id)
            .await
            .map_err(|e| ReferralError::storage(format!("earnings of {}", user_id), e))
    }
}
