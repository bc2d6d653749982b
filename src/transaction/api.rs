//! Transaction API Types
//!
//! Request and response shapes exchanged with the (external) HTTP layer.
//! Amounts travel as decimal strings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::TransactionError;
use super::state::TransactionStatus;
use super::types::{
    TransactionFlow, TransactionMetadata, TransactionRecord, TransactionType, TransferDestination,
};
use crate::money::Currency;
use crate::wallet::WalletId;

// ============================================================================
// Requests
// ============================================================================

/// Inbound external credit into a wallet
#[derive(Debug, Clone, Deserialize)]
pub struct DepositRequest {
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub wallet_id: WalletId,
    pub currency: Currency,
    pub amount: Decimal,
    /// Reference of the inbound payment (bank transfer id, card charge id)
    pub source_reference: String,
    #[serde(default)]
    pub description: String,
}

/// On-platform transfer; `amount` and `fee` are in the source currency
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub source_wallet_id: WalletId,
    pub destination: TransferDestination,
    pub currency: Currency,
    pub amount: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GiftCardPurchaseRequest {
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub wallet_id: WalletId,
    pub product_id: i64,
    pub quantity: u32,
    /// Face value per card in the product's recipient currency
    pub unit_price: Decimal,
    #[serde(default)]
    pub recipient_email: Option<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FiatPayoutRequest {
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub wallet_id: WalletId,
    pub currency: Currency,
    pub amount: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CryptoSendRequest {
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub wallet_id: WalletId,
    pub currency: Currency,
    pub amount: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    pub network: String,
    pub asset: String,
    pub address: String,
    #[serde(default)]
    pub description: String,
}

// ============================================================================
// Responses
// ============================================================================

/// Transaction envelope returned for every operation
#[derive(Debug, Clone, Serialize)]
pub struct TransactionResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub description: String,
    pub transaction_flow: TransactionFlow,
    pub status: TransactionStatus,
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: TransactionMetadata,
}

impl From<&TransactionRecord> for TransactionResponse {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            id: record.id.to_string(),
            tx_type: record.tx_type,
            description: record.description.clone(),
            transaction_flow: record.flow(),
            status: record.status,
            amount: record.amount,
            fee: record.fee,
            currency: record.currency,
            external_reference: record.external_reference.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            metadata: record.metadata.clone(),
        }
    }
}

/// Error body; callers only see the closed category set plus a stable code
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub category: &'static str,
    pub message: String,
}

impl From<&TransactionError> for ErrorResponse {
    fn from(err: &TransactionError) -> Self {
        Self {
            code: err.code(),
            category: err.category().as_str(),
            message: err.to_string(),
        }
    }
}
