//! External Settlement Providers
//!
//! Capability traits for the vendors a saga settles against. Each concrete
//! vendor client is a collaborator; only the outcome contract is consumed
//! here. Providers are registered once at startup and resolved by
//! capability.
//!
//! All calls are keyed by the transaction id: a provider that sees the same
//! correlation id twice must not move money twice.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::error::TransactionError;
use super::types::{Platform, TransactionId};

/// Result of one provider call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProviderOutcome {
    /// Settled; `settled_amount` is the provider's authoritative charge in
    /// the currency it was quoted in, when it reports one
    Success {
        external_reference: String,
        settled_amount: Option<Decimal>,
    },
    /// Definitively rejected; no money moved on the provider side
    Failed {
        reason: String,
        external_reference: Option<String>,
    },
    /// Not known yet (accepted but unsettled, or the call timed out)
    Unknown { external_reference: Option<String> },
}

impl ProviderOutcome {
    pub fn external_reference(&self) -> Option<&str> {
        match self {
            ProviderOutcome::Success {
                external_reference, ..
            } => Some(external_reference.as_str()),
            ProviderOutcome::Failed {
                external_reference, ..
            }
            | ProviderOutcome::Unknown { external_reference } => external_reference.as_deref(),
        }
    }
}

impl fmt::Display for ProviderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderOutcome::Success { .. } => write!(f, "success"),
            ProviderOutcome::Failed { reason, .. } => write!(f, "failed: {}", reason),
            ProviderOutcome::Unknown { .. } => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GiftCardOrder {
    pub correlation_id: TransactionId,
    pub product_id: i64,
    pub quantity: u32,
    /// Face value per card, recipient currency
    pub unit_price: Decimal,
    /// Quoted total, sender currency
    pub sender_amount: Decimal,
    pub sender_currency: String,
    pub recipient_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FiatPayoutOrder {
    pub correlation_id: TransactionId,
    pub amount: Decimal,
    pub currency: String,
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CryptoSendOrder {
    pub correlation_id: TransactionId,
    pub amount: Decimal,
    pub currency: String,
    pub network: String,
    pub asset: String,
    pub address: String,
}

/// Common to every settlement capability
#[async_trait]
pub trait SettlementProvider: Send + Sync {
    /// Provider name for logging and the off-platform ledger account
    fn name(&self) -> &str;

    /// Authoritative status of an earlier call, looked up by correlation id
    async fn status(&self, correlation_id: TransactionId) -> ProviderOutcome;
}

#[async_trait]
pub trait GiftCardProvider: SettlementProvider {
    async fn order(&self, order: GiftCardOrder) -> ProviderOutcome;
}

#[async_trait]
pub trait FiatProvider: SettlementProvider {
    async fn payout(&self, order: FiatPayoutOrder) -> ProviderOutcome;
}

#[async_trait]
pub trait CryptoProvider: SettlementProvider {
    async fn send(&self, order: CryptoSendOrder) -> ProviderOutcome;
}

/// Providers by capability
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    gift_card: Option<Arc<dyn GiftCardProvider>>,
    fiat: Option<Arc<dyn FiatProvider>>,
    crypto: Option<Arc<dyn CryptoProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gift_card(mut self, provider: Arc<dyn GiftCardProvider>) -> Self {
        self.gift_card = Some(provider);
        self
    }

    pub fn with_fiat(mut self, provider: Arc<dyn FiatProvider>) -> Self {
        self.fiat = Some(provider);
        self
    }

    pub fn with_crypto(mut self, provider: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = Some(provider);
        self
    }

    pub fn gift_card(&self) -> Result<Arc<dyn GiftCardProvider>, TransactionError> {
        self.gift_card
            .clone()
            .ok_or(TransactionError::ProviderNotConfigured(Platform::GiftCard))
    }

    pub fn fiat(&self) -> Result<Arc<dyn FiatProvider>, TransactionError> {
        self.fiat
            .clone()
            .ok_or(TransactionError::ProviderNotConfigured(Platform::Fiat))
    }

    pub fn crypto(&self) -> Result<Arc<dyn CryptoProvider>, TransactionError> {
        self.crypto
            .clone()
            .ok_or(TransactionError::ProviderNotConfigured(Platform::Crypto))
    }

    /// Name of the provider settling `platform`
    pub fn provider_name(&self, platform: Platform) -> Result<String, TransactionError> {
        Ok(match platform {
            Platform::GiftCard => self.gift_card()?.name().to_string(),
            Platform::Fiat => self.fiat()?.name().to_string(),
            Platform::Crypto => self.crypto()?.name().to_string(),
            other => return Err(TransactionError::ProviderNotConfigured(other)),
        })
    }

    /// Ask the provider for `platform` about an earlier call
    pub async fn status(
        &self,
        platform: Platform,
        correlation_id: TransactionId,
    ) -> Result<ProviderOutcome, TransactionError> {
        Ok(match platform {
            Platform::GiftCard => self.gift_card()?.status(correlation_id).await,
            Platform::Fiat => self.fiat()?.status(correlation_id).await,
            Platform::Crypto => self.crypto()?.status(correlation_id).await,
            other => return Err(TransactionError::ProviderNotConfigured(other)),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.gift_card.is_none() && self.fiat.is_none() && self.crypto.is_none()
    }
}
