//! Transaction Orchestrator
//!
//! Every funds movement is a Transaction with balanced ledger entries.
//!
//! # Flows
//!
//! ```text
//! deposit / transfer   one unit: lock wallets → insert SUCCEEDED → post entries → commit
//! gift card / fiat /   reserve (unit) → provider call (no unit) → settle (unit, CAS)
//! crypto
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Balanced**: entries of a transaction sum to zero in its settlement currency
//! 2. **Reserve-Before-Call**: funds are debited and committed before any provider call
//! 3. **Unknown Is Not Failure**: a timeout never compensates; reconciliation decides
//! 4. **Idempotency**: the transaction id is the provider correlation key

pub mod api;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod reconcile;
pub mod saga;
pub mod state;
pub mod types;

// Re-exports for convenience
pub use api::{
    CryptoSendRequest, DepositRequest, ErrorResponse, FiatPayoutRequest, GiftCardPurchaseRequest,
    TransactionResponse, TransferRequest,
};
pub use error::TransactionError;
pub use orchestrator::Orchestrator;
pub use providers::{
    CryptoProvider, FiatProvider, GiftCardProvider, ProviderOutcome, ProviderRegistry,
    SettlementProvider,
};
pub use reconcile::{ReconcileConfig, ReconcileReport, ReconciliationWorker};
pub use saga::SettlementSaga;
pub use state::TransactionStatus;
pub use types::{
    NewTransaction, Platform, SettlementDetails, TransactionFlow, TransactionId,
    TransactionMetadata, TransactionRecord, TransactionType, TransactionUpdate,
    TransferDestination,
};
