//! Account pool, quota ledger and sticky routing for the gateway.
//!
//! This crate owns all shared per-account state. It deliberately does not
//! depend on axum or any HTTP client; the proxy engine performs IO and calls
//! in here for selection and bookkeeping.

pub mod account;
pub mod ledger;
pub mod pool;
pub mod recovery;
pub mod sink;
pub mod sticky;

pub use account::{Account, Availability, CredentialRef, LimitReason};
pub use ledger::{AccountCapacity, AccountTotals, CostModel, Ledger, UsageError, UsagePayload};
pub use pool::{AccountPool, SelectError};
pub use sink::{BindingUpsert, GatewaySink, NoopSink, SharedSink, TerminalStatus, UsageRecord};
pub use sticky::StickyRouter;
