//! Transaction Core Types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::state::TransactionStatus;
use crate::money::Currency;
use crate::wallet::WalletId;

/// Transaction ID - ULID-based, sortable, also the provider correlation id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(ulid::Ulid);

impl TransactionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TransactionType {
    Deposit = 1,
    Transfer = 2,
    GiftCardPurchase = 3,
    FiatPayout = 4,
    CryptoSend = 5,
    ReferralPayout = 6,
}

impl TransactionType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransactionType::Deposit),
            2 => Some(TransactionType::Transfer),
            3 => Some(TransactionType::GiftCardPurchase),
            4 => Some(TransactionType::FiatPayout),
            5 => Some(TransactionType::CryptoSend),
            6 => Some(TransactionType::ReferralPayout),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Transfer => "transfer",
            TransactionType::GiftCardPurchase => "gift_card_purchase",
            TransactionType::FiatPayout => "fiat_payout",
            TransactionType::CryptoSend => "crypto_send",
            TransactionType::ReferralPayout => "referral_payout",
        }
    }

    /// Direction of money relative to the owning wallet
    pub fn flow(&self) -> TransactionFlow {
        match self {
            TransactionType::Deposit | TransactionType::ReferralPayout => TransactionFlow::Credit,
            _ => TransactionFlow::Debit,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction relative to the owning wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionFlow {
    Debit,
    Credit,
}

/// Where a transaction settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum Platform {
    /// Wallet-to-wallet or off-platform account, no provider involved
    Internal = 1,
    GiftCard = 2,
    Fiat = 3,
    Crypto = 4,
    Referral = 5,
}

impl Platform {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Platform::Internal),
            2 => Some(Platform::GiftCard),
            3 => Some(Platform::Fiat),
            4 => Some(Platform::Crypto),
            5 => Some(Platform::Referral),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Internal => "internal",
            Platform::GiftCard => "gift_card",
            Platform::Fiat => "fiat",
            Platform::Crypto => "crypto",
            Platform::Referral => "referral",
        }
    }

    /// Whether settlement goes through an external provider
    #[inline]
    pub fn is_external(&self) -> bool {
        matches!(self, Platform::GiftCard | Platform::Fiat | Platform::Crypto)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Destination of an internal transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferDestination {
    /// Another wallet in this system
    Wallet { wallet_id: WalletId },
    /// Account outside the platform; booked as an off-platform entry
    External {
        account_reference: String,
        institution: Option<String>,
    },
}

/// Outcome details recorded once a provider settles
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SettlementDetails {
    pub provider: String,
    /// Provider's authoritative total, in the provider's currency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_amount: Option<Decimal>,
    /// Signed wallet adjustment booked against the reserved estimate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<Decimal>,
    /// Extra charge the wallet could not cover
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Platform-specific payload; one variant per platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum TransactionMetadata {
    Internal {
        destination: TransferDestination,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exchange_rate: Option<Decimal>,
        credited_amount: Decimal,
        credited_currency: Currency,
    },
    Deposit {
        source_reference: String,
    },
    GiftCard {
        product_id: i64,
        product_name: String,
        quantity: u32,
        unit_price: Decimal,
        recipient_currency: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient_email: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settlement: Option<SettlementDetails>,
    },
    FiatPayout {
        bank_code: String,
        account_number: String,
        account_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settlement: Option<SettlementDetails>,
    },
    Crypto {
        network: String,
        asset: String,
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settlement: Option<SettlementDetails>,
    },
    Referral {
        withdrawal_request_id: Uuid,
    },
}

impl TransactionMetadata {
    pub fn platform(&self) -> Platform {
        match self {
            TransactionMetadata::Internal { .. } | TransactionMetadata::Deposit { .. } => {
                Platform::Internal
            }
            TransactionMetadata::GiftCard { .. } => Platform::GiftCard,
            TransactionMetadata::FiatPayout { .. } => Platform::Fiat,
            TransactionMetadata::Crypto { .. } => Platform::Crypto,
            TransactionMetadata::Referral { .. } => Platform::Referral,
        }
    }

    /// Settlement details, for platforms that settle externally
    pub fn settlement(&self) -> Option<&SettlementDetails> {
        match self {
            TransactionMetadata::GiftCard { settlement, .. }
            | TransactionMetadata::FiatPayout { settlement, .. }
            | TransactionMetadata::Crypto { settlement, .. } => settlement.as_ref(),
            _ => None,
        }
    }

    /// Enrich with settlement details; a no-op for on-platform payloads
    pub fn with_settlement(mut self, details: SettlementDetails) -> Self {
        match &mut self {
            TransactionMetadata::GiftCard { settlement, .. }
            | TransactionMetadata::FiatPayout { settlement, .. }
            | TransactionMetadata::Crypto { settlement, .. } => *settlement = Some(details),
            _ => {}
        }
        self
    }
}

/// Transaction record stored in PostgreSQL
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// Client idempotency key
    pub idempotency_key: Option<String>,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    /// Owning wallet (source for debits, destination for credits)
    pub wallet_id: WalletId,
    pub owner_id: i64,
    /// Settlement currency (the owning wallet's currency)
    pub currency: Currency,
    /// Principal, excluding fee
    pub amount: Decimal,
    pub fee: Decimal,
    /// Provider currency -> wallet currency rate held for the operation
    pub exchange_rate: Option<Decimal>,
    pub description: String,
    pub external_reference: Option<String>,
    pub error: Option<String>,
    pub metadata: TransactionMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a transaction row
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub idempotency_key: Option<String>,
    pub tx_type: TransactionType,
    pub wallet_id: WalletId,
    pub owner_id: i64,
    pub currency: Currency,
    pub amount: Decimal,
    pub fee: Decimal,
    pub exchange_rate: Option<Decimal>,
    pub description: String,
    pub metadata: TransactionMetadata,
}

impl TransactionRecord {
    /// New record in PENDING state
    pub fn new(new: NewTransaction) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            idempotency_key: new.idempotency_key,
            tx_type: new.tx_type,
            status: TransactionStatus::Pending,
            wallet_id: new.wallet_id,
            owner_id: new.owner_id,
            currency: new.currency,
            amount: new.amount,
            fee: new.fee,
            exchange_rate: new.exchange_rate,
            description: new.description,
            external_reference: None,
            error: None,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount plus fee, the full debit for outgoing transactions
    #[inline]
    pub fn total(&self) -> Decimal {
        self.amount + self.fee
    }

    pub fn platform(&self) -> Platform {
        self.metadata.platform()
    }

    pub fn flow(&self) -> TransactionFlow {
        self.tx_type.flow()
    }
}

impl fmt::Display for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction[{}] {} {} wallet={} amount={} fee={} {} status={}",
            self.id,
            self.tx_type,
            self.platform(),
            self.wallet_id,
            self.amount,
            self.fee,
            self.currency,
            self.status
        )
    }
}

/// CAS update applied to a transaction row
#[derive(Debug, Clone)]
pub struct TransactionUpdate {
    pub status: TransactionStatus,
    pub external_reference: Option<String>,
    pub error: Option<String>,
    pub metadata: TransactionMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn gift_card_metadata() -> TransactionMetadata {
        TransactionMetadata::GiftCard {
            product_id: 42,
            product_name: "Amazon US".into(),
            quantity: 2,
            unit_price: dec!(25),
            recipient_currency: "USD".into(),
            recipient_email: None,
            settlement: None,
        }
    }

    #[test]
    fn test_transaction_id_parse() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-ulid".parse::<TransactionId>().is_err());
    }

    #[test]
    fn test_type_flow() {
        assert_eq!(TransactionType::Deposit.flow(), TransactionFlow::Credit);
        assert_eq!(TransactionType::ReferralPayout.flow(), TransactionFlow::Credit);
        assert_eq!(TransactionType::Transfer.flow(), TransactionFlow::Debit);
        assert_eq!(TransactionType::GiftCardPurchase.flow(), TransactionFlow::Debit);
    }

    #[test]
    fn test_metadata_is_tagged_by_platform() {
        let json = serde_json::to_value(gift_card_metadata()).unwrap();
        assert_eq!(json["platform"], "gift_card");
        assert_eq!(json["product_id"], 42);
        assert!(json.get("settlement").is_none());

        let back: TransactionMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back.platform(), Platform::GiftCard);
    }

    #[test]
    fn test_with_settlement_enriches_external_only() {
        let details = SettlementDetails {
            provider: "mock".into(),
            ..Default::default()
        };
        let enriched = gift_card_metadata().with_settlement(details.clone());
        assert_eq!(enriched.settlement(), Some(&details));

        let deposit = TransactionMetadata::Deposit {
            source_reference: "bank-1".into(),
        }
        .with_settlement(details);
        assert!(deposit.settlement().is_none());
    }

    #[test]
    fn test_platform_ids() {
        for p in [
            Platform::Internal,
            Platform::GiftCard,
            Platform::Fiat,
            Platform::Crypto,
            Platform::Referral,
        ] {
            assert_eq!(Platform::from_id(p.id()), Some(p));
        }
        assert!(Platform::GiftCard.is_external());
        assert!(!Platform::Internal.is_external());
    }
}
