//! Catalog Error Types

use thiserror::Error;

use crate::error::ErrorCategory;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog API rejected credentials (status {0})")]
    Unauthorized(u16),

    #[error("Catalog API returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed catalog page: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid catalog item {product_id}: {reason}")]
    InvalidItem { product_id: i64, reason: String },

    #[error("Storage failure ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: StoreError,
    },
}

impl CatalogError {
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::Unauthorized(_) => "CATALOG_UNAUTHORIZED",
            CatalogError::Api { .. } => "CATALOG_API_ERROR",
            CatalogError::Http(_) => "CATALOG_HTTP_ERROR",
            CatalogError::Decode(_) => "CATALOG_DECODE_ERROR",
            CatalogError::InvalidItem { .. } => "INVALID_CATALOG_ITEM",
            CatalogError::Storage { .. } => "STORAGE_ERROR",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            CatalogError::Unauthorized(_) => ErrorCategory::Validation,
            CatalogError::Api { status, .. } if *status >= 500 => ErrorCategory::Transient,
            CatalogError::Api { .. } => ErrorCategory::Internal,
            CatalogError::Http(_) => ErrorCategory::Transient,
            CatalogError::Decode(_) => ErrorCategory::Internal,
            CatalogError::InvalidItem { .. } => ErrorCategory::Validation,
            CatalogError::Storage { source, .. } => source.category(),
        }
    }

    pub(crate) fn storage(context: impl Into<String>, source: StoreError) -> Self {
        CatalogError::Storage {
            context: context.into(),
            source,
        }
    }
}
