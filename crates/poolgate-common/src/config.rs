use serde::{Deserialize, Serialize};

/// Final, merged gateway configuration used by the running process.
///
/// Merge order: CLI > ENV > built-in defaults. Policy constants the routing
/// core depends on (sticky TTL, quota window, retry bound) live here so they
/// are never hard-coded at the call sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Database DSN used for this process.
    pub dsn: String,
    /// Base URL of the chat-completion upstream.
    pub upstream_base: String,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    /// How long a session stays pinned to an account without being touched.
    pub sticky_ttl_secs: u64,
    /// Fallback rate-limit window when the upstream supplies no reset
    /// boundary, anchored at the moment the limit was observed.
    pub quota_window_minutes: u64,
    /// Additional attempts after the first, across distinct accounts.
    pub max_retries: u32,
    pub connect_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
    /// Price per million input tokens, used for usage cost rows.
    pub input_price_per_mtok: f64,
    /// Price per million output tokens.
    pub output_price_per_mtok: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8790,
            dsn: "sqlite://poolgate.db?mode=rwc".to_string(),
            upstream_base: "https://api.upstream.example/v1".to_string(),
            proxy: None,
            sticky_ttl_secs: 3600,
            quota_window_minutes: 300,
            max_retries: 2,
            connect_timeout_secs: 5,
            stream_idle_timeout_secs: 30,
            input_price_per_mtok: 0.0,
            output_price_per_mtok: 0.0,
        }
    }
}
