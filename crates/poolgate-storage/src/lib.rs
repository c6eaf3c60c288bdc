pub mod bus;
pub mod entities;
pub mod seaorm;
pub mod store;

pub use bus::{BusSink, UsageBus, UsageBusConfig};
pub use seaorm::SqlStorage;
pub use store::{AccountRow, BindingRow, GatewayStore, StorageError, StorageResult, TotalsRow};
