//! Application configuration
//!
//! This module provides centralized configuration management using the `config`
//! crate. Configuration can be loaded from environment variables and config
//! files and is immutable after startup.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub billing: BillingConfig,
    pub webhook: WebhookConfig,
    pub provider: ProviderConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Per-transaction statement timeout in milliseconds; exceeding it aborts
    /// with a retryable error
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_statement_timeout() -> u64 {
    5000
}

/// Refund policy mode, a single process-wide choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefundPolicyMode {
    /// Deduct the full proportional amount even if the balance goes negative
    AllowNegativeBalance,
    /// Deduct min(proportional, tokens not yet committed since the payment)
    #[default]
    CapByUnspentTokens,
    /// Refuse the token clawback entirely once any tokens were spent
    BlockIfTokensSpent,
}

impl RefundPolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundPolicyMode::AllowNegativeBalance => "allow_negative_balance",
            RefundPolicyMode::CapByUnspentTokens => "cap_by_unspent_tokens",
            RefundPolicyMode::BlockIfTokensSpent => "block_if_tokens_spent",
        }
    }
}

/// Billing-specific configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Default TTL for new reservations in minutes
    #[serde(default = "default_reservation_ttl")]
    pub reservation_ttl_minutes: i64,

    /// How many tokens to claw back on provider refunds
    #[serde(default)]
    pub refund_policy: RefundPolicyMode,

    /// Reject a checkout session when the pack amount mismatches the session
    #[serde(default = "default_strict_amount")]
    pub strict_amount_validation: bool,

    /// Reservation expiry sweep cadence in seconds
    #[serde(default = "default_sweep_interval")]
    pub expiry_sweep_interval_secs: u64,

    /// Maximum reservations released per sweep pass
    #[serde(default = "default_sweep_batch")]
    pub expiry_sweep_batch: i64,

    /// Reconciliation job cadence in seconds
    #[serde(default = "default_reconciliation_interval")]
    pub reconciliation_interval_secs: u64,
}

fn default_reservation_ttl() -> i64 {
    30
}

fn default_strict_amount() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_sweep_batch() -> i64 {
    200
}

fn default_reconciliation_interval() -> u64 {
    3600
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_minutes: default_reservation_ttl(),
            refund_policy: RefundPolicyMode::default(),
            strict_amount_validation: true,
            expiry_sweep_interval_secs: default_sweep_interval(),
            expiry_sweep_batch: default_sweep_batch(),
            reconciliation_interval_secs: default_reconciliation_interval(),
        }
    }
}

/// Webhook verification configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    /// HMAC key shared with the payment provider
    pub secret: String,

    /// Maximum age of a signed payload in seconds (0 disables the check)
    #[serde(default = "default_tolerance")]
    pub tolerance_secs: i64,
}

fn default_tolerance() -> i64 {
    300
}

/// Payment provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Secret API key for server-side provider calls
    pub secret_key: String,

    /// Publishable key surfaced to checkout clients
    #[serde(default)]
    pub publishable_key: String,

    /// Provider API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Fallback catalog price ids, used when the product_packs table is empty
    #[serde(default)]
    pub price_small: String,
    #[serde(default)]
    pub price_medium: String,
    #[serde(default)]
    pub price_large: String,
}

fn default_api_base() -> String {
    "https://api.stripe.com/v1".to_string()
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("database.max_connections", 10)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.statement_timeout_ms", 5000)?
            .set_default("billing.reservation_ttl_minutes", 30)?
            .set_default("billing.refund_policy", "cap_by_unspent_tokens")?
            .set_default("billing.strict_amount_validation", true)?
            .set_default("billing.expiry_sweep_interval_secs", 60)?
            .set_default("billing.expiry_sweep_batch", 200)?
            .set_default("billing.reconciliation_interval_secs", 3600)?
            .set_default("webhook.tolerance_secs", 300)?
            .set_default("provider.api_base", "https://api.stripe.com/v1")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with TALLY_ prefix
            .add_source(
                Environment::with_prefix("TALLY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("TALLY").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_billing_config() {
        let config = BillingConfig::default();
        assert_eq!(config.reservation_ttl_minutes, 30);
        assert_eq!(config.refund_policy, RefundPolicyMode::CapByUnspentTokens);
        assert!(config.strict_amount_validation);
    }

    #[test]
    fn test_refund_policy_deserialization() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: RefundPolicyMode,
        }

        let w: Wrapper = serde_json::from_str(r#"{"mode":"allow_negative_balance"}"#).unwrap();
        assert_eq!(w.mode, RefundPolicyMode::AllowNegativeBalance);

        let w: Wrapper = serde_json::from_str(r#"{"mode":"block_if_tokens_spent"}"#).unwrap();
        assert_eq!(w.mode, RefundPolicyMode::BlockIfTokensSpent);
    }

    #[test]
    fn test_policy_mode_labels() {
        assert_eq!(
            RefundPolicyMode::CapByUnspentTokens.as_str(),
            "cap_by_unspent_tokens"
        );
    }
}
