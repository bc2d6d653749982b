//! Wallet Ledger - balances, double-entry ledger and settlement sagas
//!
//! # Modules
//!
//! - [`money`] - Currency codes and amount validation
//! - [`wallet`] - Wallet store (lifecycle, balances, audit)
//! - [`ledger`] - Double-entry postings; the only writer of wallet balances
//! - [`rates`] - Exchange rates and conversion
//! - [`transaction`] - Orchestrator, settlement saga and reconciliation
//! - [`referral`] - Referral earnings and withdrawal requests
//! - [`catalog`] - Gift-card catalog sync
//! - [`store`] - Persistence ports (PostgreSQL, in-memory)
//! - [`tasks`] - Periodic background jobs and shutdown

pub mod error;
pub mod money;

// Persistence
pub mod db;
pub mod store;

// Domain
pub mod catalog;
pub mod ledger;
pub mod rates;
pub mod referral;
pub mod transaction;
pub mod wallet;

// Runtime
pub mod config;
pub mod logging;
pub mod tasks;

// Convenient re-exports at crate root
pub use error::ErrorCategory;
pub use money::Currency;
pub use store::{Store, StoreError, UnitOfWork};
pub use transaction::{Orchestrator, TransactionError, TransactionId, TransactionStatus};
pub use wallet::{Wallet, WalletId, WalletService};
