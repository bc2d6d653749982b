//! Gift-card Catalog
//!
//! Local copy of the vendor's gift-card catalog, refreshed by a periodic
//! sweep and read when quoting purchases.

pub mod error;
pub mod models;
pub mod source;
pub mod sync;

pub use error::CatalogError;
pub use models::{
    Brand, CatalogCounts, CatalogItem, CatalogPage, Category, Country, DenominationKind,
    DenominationType, Product, ProductListing, RedeemInstruction,
};
pub use source::{CatalogSource, HttpCatalogSource};
pub use sync::{CatalogSync, SyncReport};
