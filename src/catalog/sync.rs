//! Gift-card Catalog Sync
//!
//! Pages through the vendor catalog and upserts every item in its own unit
//! of work, keyed by the vendor's product id. A bad item is logged and
//! counted; the sweep carries on.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::CatalogError;
use super::models::{
    Brand, CatalogItem, Category, Country, DenominationKind, DenominationType, Product,
    RedeemInstruction,
};
use super::source::CatalogSource;
use crate::store::{CatalogRepo, Store, UnitOfWork};

/// Counts of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pages: u32,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// A page after the first failed; later pages were not fetched
    pub truncated: bool,
}

pub struct CatalogSync<S: Store> {
    store: Arc<S>,
    page_size: u32,
}

impl<S: Store> CatalogSync<S> {
    pub fn new(store: Arc<S>, page_size: u32) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// One full sweep of `source`.
    ///
    /// Fails only if the first page cannot be fetched.
    pub async fn sync_gift_cards(
        &self,
        source: &dyn CatalogSource,
    ) -> Result<SyncReport, CatalogError> {
        let mut report = SyncReport::default();
        let mut page_no = 0u32;

        loop {
            let page = match source.fetch_page(page_no, self.page_size).await {
                Ok(page) => page,
                Err(e) if page_no == 0 => {
                    error!(error = %e, "Catalog sync aborted on first page");
                    return Err(e);
                }
                Err(e) => {
                    warn!(page = page_no, error = %e, "Catalog page failed, sweep truncated");
                    report.truncated = true;
                    break;
                }
            };
            report.pages += 1;

            for item in &page.content {
                report.processed += 1;
                match self.upsert_item(item).await {
                    Ok(()) => report.succeeded += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            product_id = item.product_id,
                            code = e.code(),
                            error = %e,
                            "Catalog item skipped"
                        );
                    }
                }
            }

            if page.is_last() || page.content.is_empty() {
                break;
            }
            page_no += 1;
        }

        info!(
            pages = report.pages,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            truncated = report.truncated,
            "Gift card catalog synced"
        );
        Ok(report)
    }

    /// Upsert one item and everything hanging off it, atomically
    async fn upsert_item(&self, item: &CatalogItem) -> Result<(), CatalogError> {
        validate_item(item)?;
        let ctx = || format!("sync product {}", item.product_id);

        let mut unit = self
            .store
            .begin()
            .await
            .map_err(|e| CatalogError::storage(ctx(), e))?;

        unit.upsert_brand(&Brand {
            external_id: item.brand.brand_id,
            name: item.brand.brand_name.clone(),
        })
        .await
        .map_err(|e| CatalogError::storage(ctx(), e))?;
        unit.upsert_category(&Category {
            external_id: item.category.id,
            name: item.category.name.clone(),
        })
        .await
        .map_err(|e| CatalogError::storage(ctx(), e))?;
        unit.upsert_country(&Country {
            iso_code: item.country.iso_name.to_ascii_uppercase(),
            name: item.country.name.clone(),
            flag_url: item.country.flag_url.clone(),
        })
        .await
        .map_err(|e| CatalogError::storage(ctx(), e))?;

        unit.upsert_product(&product_row(item))
            .await
            .map_err(|e| CatalogError::storage(ctx(), e))?;
        unit.replace_logo_urls(item.product_id, &item.logo_urls)
            .await
            .map_err(|e| CatalogError::storage(ctx(), e))?;

        // RANGE products carry no denomination rows, even if they were FIXED before
        let (recipient, sender): (&[Decimal], &[Decimal]) = match item.denomination_type {
            DenominationType::Fixed => (
                item.fixed_recipient_denominations.as_slice(),
                item.fixed_sender_denominations.as_slice(),
            ),
            DenominationType::Range => (&[], &[]),
        };
        unit.replace_denominations(item.product_id, DenominationKind::Recipient, recipient)
            .await
            .map_err(|e| CatalogError::storage(ctx(), e))?;
        unit.replace_denominations(item.product_id, DenominationKind::Sender, sender)
            .await
            .map_err(|e| CatalogError::storage(ctx(), e))?;

        unit.upsert_redeem_instruction(
            item.product_id,
            &RedeemInstruction {
                concise: item.redeem_instruction.concise.clone(),
                verbose: item.redeem_instruction.verbose.clone(),
            },
        )
        .await
        .map_err(|e| CatalogError::storage(ctx(), e))?;

        unit.commit()
            .await
            .map_err(|e| CatalogError::storage(ctx(), e))?;

        debug!(product_id = item.product_id, "Catalog item upserted");
        Ok(())
    }
}

fn validate_item(item: &CatalogItem) -> Result<(), CatalogError> {
    let invalid = |reason: &str| CatalogError::InvalidItem {
        product_id: item.product_id,
        reason: reason.to_string(),
    };
    if item.product_name.trim().is_empty() {
        return Err(invalid("empty product name"));
    }
    if item.country.iso_name.trim().is_empty() {
        return Err(invalid("missing country"));
    }
    match item.denomination_type {
        DenominationType::Fixed => {
            if item.fixed_recipient_denominations.len() != item.fixed_sender_denominations.len() {
                return Err(invalid("recipient and sender denominations differ in length"));
            }
        }
        DenominationType::Range => {
            if item.min_recipient_denomination.is_none()
                || item.max_recipient_denomination.is_none()
            {
                return Err(invalid("range product without bounds"));
            }
        }
    }
    Ok(())
}

fn product_row(item: &CatalogItem) -> Product {
    Product {
        external_id: item.product_id,
        name: item.product_name.clone(),
        brand_id: item.brand.brand_id,
        category_id: item.category.id,
        country_iso: item.country.iso_name.to_ascii_uppercase(),
        global: item.global,
        denomination_type: item.denomination_type,
        recipient_currency: item.recipient_currency_code.clone(),
        sender_currency: item.sender_currency_code.clone(),
        sender_fee: item.sender_fee,
        discount_percentage: item.discount_percentage,
        min_recipient_denomination: item.min_recipient_denomination,
        max_recipient_denomination: item.max_recipient_denomination,
        sender_exchange_rate: item.sender_exchange_rate,
        synced_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::source::mock::MockCatalogSource;
    use crate::store::memory::MemoryStore;
    use rust_decimal_macros::dec;
    use serde_json::{Value, json};

    fn item(id: i64, brand_id: i64) -> Value {
        json!({
            "productId": id,
            "productName": format!("Card {}", id),
            "global": false,
            "denominationType": "FIXED",
            "recipientCurrencyCode": "USD",
            "senderCurrencyCode": "NGN",
            "senderFee": "350",
            "discountPercentage": "1.5",
            "fixedRecipientDenominations": ["10", "25"],
            "fixedSenderDenominations": ["16000", "40000"],
            "logoUrls": ["https://cdn.example.com/a.png", "https://cdn.example.com/a.png"],
            "brand": {"brandId": brand_id, "brandName": format!("Brand {}", brand_id)},
            "category": {"id": 1, "name": "Gaming"},
            "country": {"isoName": "us", "name": "United States", "flagUrl": null},
            "redeemInstruction": {"concise": "Redeem in app", "verbose": "Open the app and redeem"}
        })
    }

    fn page(number: u32, total_pages: u32, content: Vec<Value>) -> Value {
        json!({"content": content, "number": number, "totalPages": total_pages})
    }

    async fn counts(store: &MemoryStore) -> crate::catalog::CatalogCounts {
        let mut unit = store.begin().await.unwrap();
        unit.catalog_counts().await.unwrap()
    }

    #[tokio::test]
    async fn test_sync_pages_and_upserts() {
        let store = Arc::new(MemoryStore::new());
        let sync = CatalogSync::new(store.clone(), 2);
        let source = MockCatalogSource::new(vec![
            page(0, 2, vec![item(1, 10), item(2, 10)]),
            page(1, 2, vec![item(3, 11)]),
        ]);

        let report = sync.sync_gift_cards(&source).await.unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.processed, 3);
        assert_eq!(report.succeeded, 3);
        assert!(!report.truncated);

        let c = counts(&store).await;
        assert_eq!(c.products, 3);
        assert_eq!(c.brands, 2);
        assert_eq!(c.categories, 1);
        assert_eq!(c.countries, 1);
        assert_eq!(c.logo_urls, 3);
        assert_eq!(c.denominations, 12);
        assert_eq!(c.redeem_instructions, 3);

        let mut unit = store.begin().await.unwrap();
        let listing = unit.find_product_listing(1).await.unwrap().unwrap();
        assert_eq!(listing.product.country_iso, "US");
        assert_eq!(listing.sender_price(dec!(25)), Some(dec!(40000)));
    }

    #[tokio::test]
    async fn test_rerun_adds_nothing() {
        let store = Arc::new(MemoryStore::new());
        let sync = CatalogSync::new(store.clone(), 50);
        let source = MockCatalogSource::new(vec![page(0, 1, vec![item(1, 10), item(2, 11)])]);

        sync.sync_gift_cards(&source).await.unwrap();
        let first = counts(&store).await;
        let report = sync.sync_gift_cards(&source).await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(counts(&store).await, first);
    }

    #[tokio::test]
    async fn test_fixed_to_range_clears_denominations() {
        let store = Arc::new(MemoryStore::new());
        let sync = CatalogSync::new(store.clone(), 50);
        sync.sync_gift_cards(&MockCatalogSource::new(vec![page(0, 1, vec![item(1, 10)])]))
            .await
            .unwrap();
        assert_eq!(counts(&store).await.denominations, 4);

        let mut range = item(1, 10);
        range["denominationType"] = json!("RANGE");
        range["minRecipientDenomination"] = json!("5");
        range["maxRecipientDenomination"] = json!("500");
        range["recipientCurrencyToSenderCurrencyExchangeRate"] = json!("1600");
        range["fixedRecipientDenominations"] = json!([]);
        range["fixedSenderDenominations"] = json!([]);
        let report = sync
            .sync_gift_cards(&MockCatalogSource::new(vec![page(0, 1, vec![range])]))
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(counts(&store).await.denominations, 0);

        let mut unit = store.begin().await.unwrap();
        let listing = unit.find_product_listing(1).await.unwrap().unwrap();
        assert_eq!(listing.product.denomination_type, DenominationType::Range);
        assert!(listing.recipient_denominations.is_empty());
        assert!(listing.sender_denominations.is_empty());
        assert_eq!(listing.sender_price(dec!(20)), Some(dec!(32000)));
        assert_eq!(listing.sender_price(dec!(501)), None);
    }

    #[tokio::test]
    async fn test_bad_item_is_isolated() {
        let store = Arc::new(MemoryStore::new());
        let sync = CatalogSync::new(store.clone(), 50);
        let mut bad = item(2, 10);
        bad["fixedSenderDenominations"] = json!(["0", "40000"]);
        let mut mismatched = item(3, 10);
        mismatched["fixedSenderDenominations"] = json!(["16000"]);
        let source = MockCatalogSource::new(vec![page(
            0,
            1,
            vec![item(1, 10), bad, mismatched, item(4, 10)],
        )]);

        let report = sync.sync_gift_cards(&source).await.unwrap();
        assert_eq!(report.processed, 4);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 2);

        // The failed item left no partial rows
        let mut unit = store.begin().await.unwrap();
        assert!(unit.find_product_listing(2).await.unwrap().is_none());
        assert!(unit.find_product_listing(4).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_first_page_failure_fails_sync() {
        let store = Arc::new(MemoryStore::new());
        let sync = CatalogSync::new(store.clone(), 50);
        let source = MockCatalogSource::new(vec![page(0, 1, vec![item(1, 10)])]);
        source.fail_on_page(0);

        let err = sync.sync_gift_cards(&source).await.unwrap_err();
        assert!(matches!(err, CatalogError::Unauthorized(401)));
        assert_eq!(counts(&store).await.total(), 0);
    }

    #[tokio::test]
    async fn test_later_page_failure_truncates() {
        let store = Arc::new(MemoryStore::new());
        let sync = CatalogSync::new(store.clone(), 1);
        let source = MockCatalogSource::new(vec![
            page(0, 3, vec![item(1, 10)]),
            page(1, 3, vec![item(2, 10)]),
            page(2, 3, vec![item(3, 10)]),
        ]);
        source.fail_on_page(1);

        let report = sync.sync_gift_cards(&source).await.unwrap();
        assert!(report.truncated);
        assert_eq!(report.pages, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(source.fetch_count(), 2);
    }
}
