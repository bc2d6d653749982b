//! Catalog Sources
//!
//! Where catalog pages come from. The vendor's HTTP API in production;
//! tests feed pages from memory.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::error::CatalogError;
use super::models::CatalogPage;

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch zero-based page `page` of at most `size` items
    async fn fetch_page(&self, page: u32, size: u32) -> Result<CatalogPage, CatalogError>;
}

/// Vendor catalog over HTTP with a bearer token
pub struct HttpCatalogSource {
    client: Client,
    base_url: String,
    api_token: String,
}

impl HttpCatalogSource {
    pub fn new(base_url: &str, api_token: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        })
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn fetch_page(&self, page: u32, size: u32) -> Result<CatalogPage, CatalogError> {
        let resp = self
            .client
            .get(format!("{}/products", self.base_url))
            .bearer_auth(&self.api_token)
            .query(&[("page", page), ("size", size)])
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CatalogError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(CatalogError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let page: CatalogPage = serde_json::from_str(&text)?;
        debug!(
            page = page.number,
            total_pages = page.total_pages,
            items = page.content.len(),
            "Catalog page fetched"
        );
        Ok(page)
    }
}

/// In-memory catalog for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct MockCatalogSource {
        pages: Mutex<Vec<serde_json::Value>>,
        fail_page: Mutex<Option<u32>>,
        fetch_count: AtomicUsize,
    }

    impl MockCatalogSource {
        /// `pages` are raw page bodies, indexed by page number
        pub fn new(pages: Vec<serde_json::Value>) -> Self {
            Self {
                pages: Mutex::new(pages),
                fail_page: Mutex::new(None),
                fetch_count: AtomicUsize::new(0),
            }
        }

        pub fn fail_on_page(&self, page: u32) {
            *self.fail_page.lock().unwrap() = Some(page);
        }

        pub fn fetch_count(&self) -> usize {
            self.fetch_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CatalogSource for MockCatalogSource {
        async fn fetch_page(&self, page: u32, _size: u32) -> Result<CatalogPage, CatalogError> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            if *self.fail_page.lock().unwrap() == Some(page) {
                return Err(CatalogError::Unauthorized(401));
            }
            let body = self
                .pages
                .lock()
                .unwrap()
                .get(page as usize)
                .cloned()
                .unwrap_or_else(|| {
                    serde_json::json!({"content": [], "number": page, "totalPages": page})
                });
            Ok(serde_json::from_value(body)?)
        }
    }
}
