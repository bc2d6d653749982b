//! Wallet data models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::WalletError;
use crate::money::Currency;

/// Wallet identifier (UUID v4, also the DB primary key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(Uuid);

impl WalletId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for WalletId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WalletId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Wallet type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum WalletType {
    #[default]
    Personal = 1,
    Business = 2,
    Savings = 3,
    Checking = 4,
}

impl WalletType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(WalletType::Personal),
            2 => Some(WalletType::Business),
            3 => Some(WalletType::Savings),
            4 => Some(WalletType::Checking),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Personal => "personal",
            WalletType::Business => "business",
            WalletType::Savings => "savings",
            WalletType::Checking => "checking",
        }
    }
}

impl FromStr for WalletType {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "personal" => Ok(WalletType::Personal),
            "business" => Ok(WalletType::Business),
            "savings" => Ok(WalletType::Savings),
            "checking" => Ok(WalletType::Checking),
            other => Err(WalletError::InvalidWalletType(other.to_string())),
        }
    }
}

/// Wallet status
///
/// Status codes: 1=ACTIVE, 2=FROZEN, 3=CLOSED. Wallets are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum WalletStatus {
    Active = 1,
    /// Debits blocked; refunds still land
    Frozen = 2,
    /// Final
    Closed = 3,
}

impl WalletStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(WalletStatus::Active),
            2 => Some(WalletStatus::Frozen),
            3 => Some(WalletStatus::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Frozen => "frozen",
            WalletStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A per-(owner, currency) balance holder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Wallet {
    pub id: WalletId,
    pub owner_id: i64,
    pub currency: Currency,
    pub balance: Decimal,
    pub wallet_type: WalletType,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// New empty, active wallet
    pub fn new(owner_id: i64, currency: Currency, wallet_type: WalletType) -> Self {
        let now = Utc::now();
        Self {
            id: WalletId::new(),
            owner_id,
            currency,
            balance: Decimal::ZERO,
            wallet_type,
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn can_debit(&self) -> bool {
        self.status == WalletStatus::Active
    }

    #[inline]
    pub fn can_credit(&self) -> bool {
        self.status != WalletStatus::Closed
    }
}

impl fmt::Display for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Wallet[{}] owner={} {} {} balance={} status={}",
            self.id,
            self.owner_id,
            self.wallet_type.as_str(),
            self.currency,
            self.balance,
            self.status
        )
    }
}

/// Wallet creation request from the API layer
///
/// `{"currency": "NGN", "type": "business"}`; `type` defaults to personal.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWalletRequest {
    pub currency: String,
    #[serde(rename = "type", default)]
    pub wallet_type: Option<String>,
}

impl CreateWalletRequest {
    /// Validate into typed values before any unit of work opens
    pub fn parse(&self) -> Result<(Currency, WalletType), WalletError> {
        let currency = self
            .currency
            .parse::<Currency>()
            .map_err(|_| WalletError::UnsupportedCurrency(self.currency.clone()))?;
        let wallet_type = match &self.wallet_type {
            Some(t) => t.parse::<WalletType>()?,
            None => WalletType::default(),
        };
        Ok((currency, wallet_type))
    }
}
