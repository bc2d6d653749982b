//! Currency Conversion Service
//!
//! Read-only lookup of the rate effective at call time, per (base, quote)
//! pair. The latest rate with `effective_at <= now` wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::ErrorCategory;
use crate::money::Currency;
use crate::store::{RateRepo, Store, StoreError, UnitOfWork};

/// `1 base = rate quote`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub base: Currency,
    pub quote: Currency,
    pub rate: Decimal,
    pub effective_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum RateError {
    #[error("No exchange rate available for {base}/{quote}")]
    NoRateAvailable { base: Currency, quote: Currency },

    #[error("Exchange rate must be positive, got {0}")]
    InvalidRate(Decimal),

    #[error("Storage failure ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: StoreError,
    },
}

impl RateError {
    pub fn code(&self) -> &'static str {
        match self {
            RateError::NoRateAvailable { .. } => "NO_RATE_AVAILABLE",
            RateError::InvalidRate(_) => "INVALID_RATE",
            RateError::Storage { .. } => "STORAGE_ERROR",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            RateError::NoRateAvailable { .. } => ErrorCategory::NotFound,
            RateError::InvalidRate(_) => ErrorCategory::Validation,
            RateError::Storage { source, .. } => source.category(),
        }
    }
}

/// Rate lookup seam used by the orchestrator
#[async_trait]
pub trait ExchangeRates: Send + Sync {
    async fn get_exchange_rate(&self, base: Currency, quote: Currency)
    -> Result<Decimal, RateError>;
}

/// Store-backed conversion service
pub struct CurrencyConversionService<S: Store> {
    store: Arc<S>,
}

impl<S: Store> CurrencyConversionService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Append a rate; it takes effect at `effective_at`
    pub async fn record_rate(
        &self,
        base: Currency,
        quote: Currency,
        rate: Decimal,
        effective_at: DateTime<Utc>,
    ) -> Result<ExchangeRate, RateError> {
        if rate <= Decimal::ZERO {
            return Err(RateError::InvalidRate(rate));
        }
        let record = ExchangeRate {
            base,
            quote,
            rate,
            effective_at,
        };

        let ctx = || format!("record rate {}/{}", base, quote);
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| RateError::Storage { context: ctx(), source: e })?;
        unit.insert_rate(&record)
            .await
            .map_err(|e| RateError::Storage { context: ctx(), source: e })?;
        unit.commit()
            .await
            .map_err(|e| RateError::Storage { context: ctx(), source: e })?;

        info!(base = %base, quote = %quote, rate = %rate, "Exchange rate recorded");
        Ok(record)
    }

    /// Convert `amount` and round to the quote currency's minor units
    pub async fn convert(
        &self,
        amount: Decimal,
        base: Currency,
        quote: Currency,
    ) -> Result<Decimal, RateError> {
        let rate = self.get_exchange_rate(base, quote).await?;
        Ok(quote.round(amount * rate))
    }
}

#[async_trait]
impl<S: Store> ExchangeRates for CurrencyConversionService<S> {
    async fn get_exchange_rate(
        &self,
        base: Currency,
        quote: Currency,
    ) -> Result<Decimal, RateError> {
        if base == quote {
            return Ok(Decimal::ONE);
        }

        let ctx = || format!("get rate {}/{}", base, quote);
        // Read-only: the unit is dropped, never committed
        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| RateError::Storage { context: ctx(), source: e })?;
        let rate = unit
            .latest_rate(base, quote, Utc::now())
            .await
            .map_err(|e| RateError::Storage { context: ctx(), source: e })?
            .ok_or(RateError::NoRateAvailable { base, quote })?;

        debug!(base = %base, quote = %quote, rate = %rate.rate, "Exchange rate resolved");
        Ok(rate.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn service() -> CurrencyConversionService<MemoryStore> {
        CurrencyConversionService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_same_currency_is_one() {
        let svc = service();
        assert_eq!(
            svc.get_exchange_rate(Currency::Eur, Currency::Eur).await.unwrap(),
            Decimal::ONE
        );
    }

    #[tokio::test]
    async fn test_missing_pair() {
        let svc = service();
        let err = svc
            .get_exchange_rate(Currency::Usd, Currency::Ngn)
            .await
            .unwrap_err();
        assert!(matches!(err, RateError::NoRateAvailable { .. }));
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn test_future_rate_not_yet_effective() {
        let svc = service();
        let now = Utc::now();
        svc.record_rate(Currency::Usd, Currency::Ngn, dec!(1550), now - Duration::hours(1))
            .await
            .unwrap();
        svc.record_rate(Currency::Usd, Currency::Ngn, dec!(1600), now + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(
            svc.get_exchange_rate(Currency::Usd, Currency::Ngn).await.unwrap(),
            dec!(1550)
        );
    }

    #[tokio::test]
    async fn test_convert_rounds_to_minor_units() {
        let svc = service();
        let effective_at = Utc::now() - Duration::minutes(1);
        svc.record_rate(Currency::Ngn, Currency::Usd, dec!(0.000625), effective_at)
            .await
            .unwrap();
        assert_eq!(
            svc.convert(dec!(1234.56), Currency::Ngn, Currency::Usd).await.unwrap(),
            dec!(0.77)
        );
    }

    #[tokio::test]
    async fn test_rejects_non_positive_rate() {
        let svc = service();
        let err = svc
            .record_rate(Currency::Usd, Currency::Eur, Decimal::ZERO, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RateError::InvalidRate(_)));
    }
}
