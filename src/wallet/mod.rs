//! Wallet Store
//!
//! Per-(owner, currency) balances. Reads and lifecycle changes live here;
//! balance mutation goes through [`crate::ledger`] only.

pub mod error;
pub mod models;
pub mod service;

pub use error::WalletError;
pub use models::{CreateWalletRequest, Wallet, WalletId, WalletStatus, WalletType};
pub use service::{WalletAudit, WalletService};
