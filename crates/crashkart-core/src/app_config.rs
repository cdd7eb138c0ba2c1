use std::net::SocketAddr;

use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// CrashCash accrual knobs shared by the webhook reconciler, the scratch-card
/// endpoint and the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardPolicy {
    /// Days until a newly granted reward lapses.
    pub expiry_days: u32,
    /// Percentage of the order total credited on successful payment.
    pub order_reward_percent: Decimal,
    /// Upper bound for a single order reward.
    pub order_reward_cap: Decimal,
    pub scratch_min: u32,
    pub scratch_max: u32,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            expiry_days: 30,
            order_reward_percent: Decimal::new(5, 0),
            order_reward_cap: Decimal::new(500, 0),
            scratch_min: 5,
            scratch_max: 50,
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub app_base_url: String,
    /// Rate-limit on the first `x-forwarded-for` address instead of the
    /// socket peer. Only safe behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// ISO 4217 code sent to the payment gateway.
    pub currency: String,
    /// Symbol used when rendering amounts in notifications.
    pub currency_symbol: String,
    pub gateway_base_url: String,
    pub gateway_key_id: Option<String>,
    pub gateway_key_secret: Option<String>,
    pub gateway_webhook_secret: Option<String>,
    pub gateway_timeout_secs: u64,
    pub gateway_max_retries: u32,
    pub gateway_retry_delay_ms: u64,
    pub rewards: RewardPolicy,
    /// Six-field cron expression for the in-process expiry sweep; `None`
    /// leaves expiry to the CLI.
    pub expiry_sweep_cron: Option<String>,
}

impl AppConfig {
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.env == Environment::Production
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("app_base_url", &self.app_base_url)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("currency", &self.currency)
            .field("currency_symbol", &self.currency_symbol)
            .field("gateway_base_url", &self.gateway_base_url)
            .field("gateway_key_id", &self.gateway_key_id)
            .field(
                "gateway_key_secret",
                &self.gateway_key_secret.as_ref().map(|_| "[redacted]"),
            )
            .field(
                "gateway_webhook_secret",
                &self.gateway_webhook_secret.as_ref().map(|_| "[redacted]"),
            )
            .field("gateway_timeout_secs", &self.gateway_timeout_secs)
            .field("gateway_max_retries", &self.gateway_max_retries)
            .field("gateway_retry_delay_ms", &self.gateway_retry_delay_ms)
            .field("rewards", &self.rewards)
            .field("expiry_sweep_cron", &self.expiry_sweep_cron)
            .finish()
    }
}
