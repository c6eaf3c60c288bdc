use clap::Parser;

use poolgate_common::GatewayConfig;

#[derive(Parser)]
#[command(name = "poolgate")]
pub(crate) struct Cli {
    #[arg(long, env = "POOLGATE_HOST", default_value = "0.0.0.0")]
    pub(crate) host: String,
    #[arg(long, env = "POOLGATE_PORT", default_value_t = 8790)]
    pub(crate) port: u16,
    #[arg(long, env = "POOLGATE_DSN", default_value = "sqlite://poolgate.db?mode=rwc")]
    pub(crate) dsn: String,
    /// Base URL of the chat-completion upstream API.
    #[arg(long, env = "POOLGATE_UPSTREAM_BASE")]
    pub(crate) upstream_base: String,
    /// JSON file with the provisioned accounts: [{"label", "credential", "disabled"?}].
    #[arg(long, env = "POOLGATE_ACCOUNTS_FILE", default_value = "accounts.json")]
    pub(crate) accounts_file: String,
    /// Outbound proxy for upstream egress.
    #[arg(long, env = "POOLGATE_PROXY")]
    pub(crate) proxy: Option<String>,
    /// Seconds a session stays pinned to an account without being touched.
    #[arg(long, default_value_t = 3600)]
    pub(crate) sticky_ttl_secs: u64,
    /// Fallback rate-limit hold, used when the upstream gives no reset time.
    #[arg(long, default_value_t = 300)]
    pub(crate) quota_window_minutes: u64,
    /// Additional attempts after the first, across distinct accounts.
    #[arg(long, default_value_t = 2)]
    pub(crate) max_retries: u32,
    #[arg(long, default_value_t = 5)]
    pub(crate) connect_timeout_secs: u64,
    #[arg(long, default_value_t = 30)]
    pub(crate) stream_idle_timeout_secs: u64,
    /// Price per million input tokens, for usage cost rows.
    #[arg(long, default_value_t = 0.0)]
    pub(crate) input_price_per_mtok: f64,
    /// Price per million output tokens.
    #[arg(long, default_value_t = 0.0)]
    pub(crate) output_price_per_mtok: f64,
    /// Tokens one account may spend per quota window; 0 disables the
    /// percent figure on /v1/usage.
    #[arg(long, default_value_t = 0)]
    pub(crate) window_capacity_tokens: i64,
}

impl Cli {
    pub(crate) fn to_config(&self) -> GatewayConfig {
        GatewayConfig {
            host: self.host.clone(),
            port: self.port,
            dsn: self.dsn.clone(),
            upstream_base: self.upstream_base.clone(),
            proxy: self.proxy.clone(),
            sticky_ttl_secs: self.sticky_ttl_secs,
            quota_window_minutes: self.quota_window_minutes,
            max_retries: self.max_retries,
            connect_timeout_secs: self.connect_timeout_secs,
            stream_idle_timeout_secs: self.stream_idle_timeout_secs,
            input_price_per_mtok: self.input_price_per_mtok,
            output_price_per_mtok: self.output_price_per_mtok,
        }
    }
}
