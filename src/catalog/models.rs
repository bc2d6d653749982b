//! Gift-card catalog models
//!
//! `CatalogItem` is the vendor's record as it arrives on the wire; the other
//! types are the normalized rows it is upserted into.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Denomination scheme of a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(i16)]
pub enum DenominationType {
    /// Only the listed denominations can be ordered
    Fixed = 1,
    /// Any amount between min and max
    Range = 2,
}

impl DenominationType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(DenominationType::Fixed),
            2 => Some(DenominationType::Range),
            _ => None,
        }
    }
}

/// Which side of the order a denomination list prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i16)]
pub enum DenominationKind {
    Recipient = 1,
    Sender = 2,
}

impl DenominationKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }
}

// ============================================================================
// Vendor wire records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorBrand {
    pub brand_id: i64,
    pub brand_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorCategory {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorCountry {
    pub iso_name: String,
    pub name: String,
    #[serde(default)]
    pub flag_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorRedeemInstruction {
    #[serde(default)]
    pub concise: Option<String>,
    #[serde(default)]
    pub verbose: Option<String>,
}

/// One product as returned by the catalog API
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub product_id: i64,
    pub product_name: String,
    #[serde(default)]
    pub global: bool,
    pub denomination_type: DenominationType,
    pub recipient_currency_code: String,
    pub sender_currency_code: String,
    #[serde(default)]
    pub sender_fee: Decimal,
    #[serde(default)]
    pub discount_percentage: Decimal,
    #[serde(default)]
    pub min_recipient_denomination: Option<Decimal>,
    #[serde(default)]
    pub max_recipient_denomination: Option<Decimal>,
    /// Recipient → sender currency rate for RANGE products
    #[serde(default, rename = "recipientCurrencyToSenderCurrencyExchangeRate")]
    pub sender_exchange_rate: Option<Decimal>,
    #[serde(default)]
    pub fixed_recipient_denominations: Vec<Decimal>,
    #[serde(default)]
    pub fixed_sender_denominations: Vec<Decimal>,
    #[serde(default)]
    pub logo_urls: Vec<String>,
    pub brand: VendorBrand,
    pub category: VendorCategory,
    pub country: VendorCountry,
    #[serde(default)]
    pub redeem_instruction: VendorRedeemInstruction,
}

/// One page of the vendor catalog
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPage {
    pub content: Vec<CatalogItem>,
    /// Zero-based page number
    pub number: u32,
    pub total_pages: u32,
}

impl CatalogPage {
    pub fn is_last(&self) -> bool {
        self.number + 1 >= self.total_pages
    }
}

// ============================================================================
// Stored rows
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Brand {
    pub external_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub external_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Country {
    pub iso_code: String,
    pub name: String,
    pub flag_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub external_id: i64,
    pub name: String,
    pub brand_id: i64,
    pub category_id: i64,
    pub country_iso: String,
    pub global: bool,
    pub denomination_type: DenominationType,
    pub recipient_currency: String,
    pub sender_currency: String,
    pub sender_fee: Decimal,
    pub discount_percentage: Decimal,
    pub min_recipient_denomination: Option<Decimal>,
    pub max_recipient_denomination: Option<Decimal>,
    pub sender_exchange_rate: Option<Decimal>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RedeemInstruction {
    pub concise: Option<String>,
    pub verbose: Option<String>,
}

/// A product with its denomination lists, as needed for quoting
#[derive(Debug, Clone, PartialEq)]
pub struct ProductListing {
    pub product: Product,
    pub recipient_denominations: Vec<Decimal>,
    pub sender_denominations: Vec<Decimal>,
}

impl ProductListing {
    /// Sender-currency price of one card with face value `unit_price`.
    ///
    /// FIXED products pair recipient and sender denominations by position;
    /// RANGE products convert with the vendor's rate.
    pub fn sender_price(&self, unit_price: Decimal) -> Option<Decimal> {
        match self.product.denomination_type {
            DenominationType::Fixed => {
                let idx = self
                    .recipient_denominations
                    .iter()
                    .position(|d| *d == unit_price)?;
                self.sender_denominations.get(idx).copied()
            }
            DenominationType::Range => {
                let min = self.product.min_recipient_denomination?;
                let max = self.product.max_recipient_denomination?;
                if unit_price < min || unit_price > max {
                    return None;
                }
                Some(unit_price * self.product.sender_exchange_rate?)
            }
        }
    }
}

/// Row counts per catalog table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogCounts {
    pub brands: u64,
    pub categories: u64,
    pub countries: u64,
    pub products: u64,
    pub logo_urls: u64,
    pub denominations: u64,
    pub redeem_instructions: u64,
}

impl CatalogCounts {
    pub fn total(&self) -> u64 {
        self.brands
            + self.categories
            + self.countries
            + self.products
            + self.logo_urls
            + self.denominations
            + self.redeem_instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const ITEM_JSON: &str = r#"{
        "productId": 10,
        "productName": "Steam Wallet US",
        "global": false,
        "denominationType": "FIXED",
        "recipientCurrencyCode": "USD",
        "senderCurrencyCode": "NGN",
        "senderFee": 350.5,
        "discountPercentage": 1.5,
        "fixedRecipientDenominations": [10, 25],
        "fixedSenderDenominations": [16000, 40000],
        "logoUrls": ["https://cdn.example/steam.png"],
        "brand": {"brandId": 3, "brandName": "Steam"},
        "category": {"id": 4, "name": "Gaming"},
        "country": {
            "isoName": "US",
            "name": "United States",
            "flagUrl": "https://cdn.example/us.svg"
        },
        "redeemInstruction": {"concise": "Redeem in the Steam client"}
    }"#;

    #[test]
    fn test_vendor_item_deserialize() {
        let item: CatalogItem = serde_json::from_str(ITEM_JSON).unwrap();
        assert_eq!(item.product_id, 10);
        assert_eq!(item.denomination_type, DenominationType::Fixed);
        assert_eq!(item.sender_fee, dec!(350.5));
        assert_eq!(item.fixed_sender_denominations, vec![dec!(16000), dec!(40000)]);
        assert_eq!(item.brand.brand_name, "Steam");
        assert_eq!(item.country.iso_name, "US");
        assert!(item.redeem_instruction.verbose.is_none());
        assert!(item.sender_exchange_rate.is_none());
    }

    fn listing(denomination_type: DenominationType) -> ProductListing {
        ProductListing {
            product: Product {
                external_id: 1,
                name: "Card".into(),
                brand_id: 1,
                category_id: 1,
                country_iso: "US".into(),
                global: false,
                denomination_type,
                recipient_currency: "USD".into(),
                sender_currency: "NGN".into(),
                sender_fee: dec!(100),
                discount_percentage: Decimal::ZERO,
                min_recipient_denomination: Some(dec!(5)),
                max_recipient_denomination: Some(dec!(100)),
                sender_exchange_rate: Some(dec!(1600)),
                synced_at: Utc::now(),
            },
            recipient_denominations: vec![dec!(10), dec!(25)],
            sender_denominations: vec![dec!(16000), dec!(40000)],
        }
    }

    #[test]
    fn test_fixed_sender_price_pairs_by_position() {
        let l = listing(DenominationType::Fixed);
        assert_eq!(l.sender_price(dec!(25)), Some(dec!(40000)));
        assert_eq!(l.sender_price(dec!(15)), None);
    }

    #[test]
    fn test_range_sender_price_uses_rate() {
        let l = listing(DenominationType::Range);
        assert_eq!(l.sender_price(dec!(20)), Some(dec!(32000)));
        assert_eq!(l.sender_price(dec!(200)), None);
    }

    #[test]
    fn test_page_is_last() {
        let page = CatalogPage {
            content: vec![],
            number: 2,
            total_pages: 3,
        };
        assert!(page.is_last());
    }
}
