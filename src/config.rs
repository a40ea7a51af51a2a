//! Application configuration loaded from environment variables.
//!
//! A single [`Config`] is built once in `main` and handed to every component
//! that needs it. Nothing reads the environment after startup.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use url::Url;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Polymarket Credentials ===
    /// Wallet private key (hex, starts with 0x).
    pub polymarket_private_key: String,

    /// Optional pre-generated API key.
    #[serde(default)]
    pub polymarket_api_key: Option<String>,

    /// Optional API secret.
    #[serde(default)]
    pub polymarket_api_secret: Option<String>,

    /// Optional API passphrase.
    #[serde(default)]
    pub polymarket_api_passphrase: Option<String>,

    // === Wallet Configuration ===
    /// Signature type: 0=EOA, 1=proxy, 2=Gnosis Safe.
    #[serde(default)]
    pub polymarket_signature_type: u8,

    /// Proxy wallet address.
    #[serde(default)]
    pub polymarket_funder: Option<String>,

    /// Polygon chain id.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    // === Endpoints ===
    /// Market directory (Gamma) base URL.
    #[serde(default = "default_gamma_url")]
    pub polymarket_gamma_url: String,

    /// CLOB API base URL.
    #[serde(default = "default_clob_url")]
    pub polymarket_clob_url: String,

    /// WebSocket base URL.
    #[serde(default = "default_ws_url")]
    pub polymarket_ws_url: String,

    // === Detection ===
    /// Minimum child-minus-parent price gap to report.
    #[serde(default = "default_min_profit")]
    pub min_profit: Decimal,

    /// Maximum age of a quote used for trading, in seconds.
    #[serde(default = "default_max_price_age")]
    pub max_price_age_seconds: u64,

    /// Per-pair cooldown between dispatches, in seconds.
    #[serde(default = "default_cooldown")]
    pub trade_cooldown_seconds: u64,

    // === Sizing ===
    /// Fraction of balance committed per trade.
    #[serde(default = "default_position_fraction")]
    pub position_fraction: Decimal,

    /// Minimum USDC per trade.
    #[serde(default = "default_min_trade")]
    pub min_trade_usdc: Decimal,

    /// Maximum USDC per trade.
    #[serde(default = "default_max_trade")]
    pub max_trade_usdc: Decimal,

    /// Both legs must cost at most balance * buffer.
    #[serde(default = "default_balance_buffer")]
    pub balance_buffer: Decimal,

    // === Execution ===
    /// Limit price allowance above the quote.
    #[serde(default = "default_slippage")]
    pub slippage: Decimal,

    /// Discount applied to the leg-1 unwind.
    #[serde(default = "default_stop_loss")]
    pub stop_loss_percent: Decimal,

    /// Time in force for both legs: FOK, FAK, or GTC.
    #[serde(default = "default_order_type")]
    pub order_type: String,

    /// Minimum price increment accepted by the CLOB.
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,

    /// Price used when liquidating settled positions.
    #[serde(default = "default_settlement_price")]
    pub settlement_price: Decimal,

    /// Open positions older than this are dropped.
    #[serde(default = "default_retention_hours")]
    pub position_retention_hours: u64,

    /// How long a balance reading is reused.
    #[serde(default = "default_balance_cache")]
    pub balance_cache_seconds: u64,

    /// Balance reported when the balance endpoint fails. Never traded on.
    #[serde(default)]
    pub fallback_balance: Decimal,

    // === Loop Intervals ===
    /// Directory re-scan interval.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_seconds: u64,

    /// Stats report interval.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_seconds: u64,

    /// Settlement sweep interval.
    #[serde(default = "default_settlement_interval")]
    pub settlement_interval_seconds: u64,

    // === Directory ===
    /// Events per directory page.
    #[serde(default = "default_page_size")]
    pub directory_page_size: u32,

    /// Maximum directory pages per scan.
    #[serde(default = "default_max_pages")]
    pub directory_max_pages: u32,

    /// REST request timeout in milliseconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_ms: u64,

    /// Directory attempts before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between directory attempts.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,

    // === WebSocket Configuration ===
    /// Consecutive failed connects before the feed stops.
    #[serde(default = "default_ws_attempts")]
    pub ws_max_reconnect_attempts: u32,

    /// Tokens per subscription message.
    #[serde(default = "default_ws_batch")]
    pub ws_subscribe_batch_size: usize,

    /// Ping interval.
    #[serde(default = "default_ws_heartbeat")]
    pub ws_heartbeat_interval_s: u64,

    /// Backoff ceiling.
    #[serde(default = "default_ws_max_delay")]
    pub ws_reconnect_max_delay_s: u64,

    /// Connect timeout.
    #[serde(default = "default_ws_connect_timeout")]
    pub ws_connect_timeout_s: u64,

    // === Persistence ===
    /// CSV transaction record.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    // === Operation Modes ===
    /// Simulation mode (no real orders).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Starting balance for simulation.
    #[serde(default = "default_sim_balance")]
    pub sim_balance: Decimal,

    // === Server Configuration ===
    /// HTTP server port for health/metrics endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Install the Prometheus recorder.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Log output: pretty or json.
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_chain_id() -> u64 {
    137
}

fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com".to_string()
}

fn default_min_profit() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_max_price_age() -> u64 {
    60
}

fn default_cooldown() -> u64 {
    60
}

fn default_position_fraction() -> Decimal {
    Decimal::new(1, 2) // 1% of balance
}

fn default_min_trade() -> Decimal {
    Decimal::new(5, 0) // $5
}

fn default_max_trade() -> Decimal {
    Decimal::new(20, 0) // $20
}

fn default_balance_buffer() -> Decimal {
    Decimal::new(95, 2) // 0.95
}

fn default_slippage() -> Decimal {
    Decimal::new(1, 2) // 1%
}

fn default_stop_loss() -> Decimal {
    Decimal::new(5, 2) // 5%
}

fn default_order_type() -> String {
    "GTC".to_string()
}

fn default_tick_size() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_settlement_price() -> Decimal {
    Decimal::new(99, 2) // 0.99
}

fn default_retention_hours() -> u64 {
    24
}

fn default_balance_cache() -> u64 {
    30
}

fn default_scan_interval() -> u64 {
    3600
}

fn default_stats_interval() -> u64 {
    300
}

fn default_settlement_interval() -> u64 {
    600
}

fn default_page_size() -> u32 {
    1000
}

fn default_max_pages() -> u32 {
    5
}

fn default_http_timeout() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2
}

fn default_ws_attempts() -> u32 {
    5
}

fn default_ws_batch() -> usize {
    100
}

fn default_ws_heartbeat() -> u64 {
    20
}

fn default_ws_max_delay() -> u64 {
    30
}

fn default_ws_connect_timeout() -> u64 {
    15
}

fn default_ledger_path() -> String {
    "logs/transactions.csv".to_string()
}

fn default_true() -> bool {
    true
}

fn default_sim_balance() -> Decimal {
    Decimal::new(100, 0) // $100
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Build configuration from explicit key/value pairs (upper-case keys).
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        envy::from_iter(pairs.into_iter().map(|(k, v)| (k.into(), v.into())))
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.polymarket_private_key.is_empty() {
            return Err("POLYMARKET_PRIVATE_KEY is required".to_string());
        }

        if !self.polymarket_private_key.starts_with("0x") {
            return Err("POLYMARKET_PRIVATE_KEY must start with 0x".to_string());
        }

        if self.min_profit <= Decimal::ZERO {
            return Err("MIN_PROFIT must be positive".to_string());
        }

        if self.position_fraction <= Decimal::ZERO || self.position_fraction > Decimal::ONE {
            return Err("POSITION_FRACTION must be in (0, 1]".to_string());
        }

        if self.balance_buffer <= Decimal::ZERO || self.balance_buffer > Decimal::ONE {
            return Err("BALANCE_BUFFER must be in (0, 1]".to_string());
        }

        if self.min_trade_usdc > self.max_trade_usdc {
            return Err("MIN_TRADE_USDC must not exceed MAX_TRADE_USDC".to_string());
        }

        if self.stop_loss_percent <= Decimal::ZERO || self.stop_loss_percent >= Decimal::ONE {
            return Err("STOP_LOSS_PERCENT must be in (0, 1)".to_string());
        }

        if self.tick_size <= Decimal::ZERO || self.tick_size > Decimal::new(1, 1) {
            return Err("TICK_SIZE must be in (0, 0.1]".to_string());
        }

        if self.settlement_price < self.tick_size || self.settlement_price > Decimal::ONE {
            return Err("SETTLEMENT_PRICE must be between TICK_SIZE and 1".to_string());
        }

        if self.ws_subscribe_batch_size == 0 {
            return Err("WS_SUBSCRIBE_BATCH_SIZE must be at least 1".to_string());
        }

        if self.ws_max_reconnect_attempts == 0 {
            return Err("WS_MAX_RECONNECT_ATTEMPTS must be at least 1".to_string());
        }

        if !matches!(self.order_type_upper().as_str(), "FOK" | "FAK" | "GTC") {
            return Err(format!("ORDER_TYPE '{}' is not one of FOK, FAK, GTC", self.order_type));
        }

        for (name, value) in [
            ("POLYMARKET_GAMMA_URL", &self.polymarket_gamma_url),
            ("POLYMARKET_CLOB_URL", &self.polymarket_clob_url),
            ("POLYMARKET_WS_URL", &self.polymarket_ws_url),
        ] {
            Url::parse(value).map_err(|e| format!("{name} is not a valid URL: {e}"))?;
        }

        Ok(())
    }

    /// Get the effective order type (uppercase).
    pub fn order_type_upper(&self) -> String {
        self.order_type.to_uppercase()
    }

    /// Full market-channel stream URL.
    pub fn market_ws_url(&self) -> String {
        format!("{}/ws/market", self.polymarket_ws_url.trim_end_matches('/'))
    }

    pub fn trade_cooldown(&self) -> Duration {
        Duration::from_secs(self.trade_cooldown_seconds)
    }

    pub fn max_price_age(&self) -> Duration {
        Duration::from_secs(self.max_price_age_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn position_retention(&self) -> Duration {
        Duration::from_secs(self.position_retention_hours * 3600)
    }

    pub fn balance_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.balance_cache_seconds)
    }
}
