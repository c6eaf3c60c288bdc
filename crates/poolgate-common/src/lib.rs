pub mod config;

pub use config::GatewayConfig;

/// One upstream credential/quota unit. Assigned by storage at provisioning
/// time and stable for the life of the account.
pub type AccountId = i64;

/// Affinity key derived from the client-presented session token.
pub type SessionKey = String;

pub fn new_trace_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
