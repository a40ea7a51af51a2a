//! Polymarket CLOB API client wrapper.

use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{MarketError, TradingError};
use crate::metrics;
use crate::signing::{self, AuthHeaders};

/// USDC and conditional tokens use 6 decimals on-chain.
const TOKEN_DECIMALS: u32 = 6;

/// Polymarket CLOB API client.
#[derive(Debug, Clone)]
pub struct PolymarketClient {
    /// HTTP client for API requests.
    http: reqwest::Client,
    /// Base URL for CLOB API.
    clob_url: String,
    /// Wallet private key.
    private_key: String,
    /// Signature type (0=EOA, 1=proxy, 2=Gnosis).
    signature_type: u8,
    /// Funder address (for proxy wallets).
    funder: Option<String>,
    /// Chain ID (137 for Polygon).
    chain_id: u64,
}

/// Balance allowance response from API.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceAllowanceResponse {
    /// Balance in base units, string or number.
    pub balance: Option<serde_json::Value>,
    /// Allowance in base units.
    pub allowance: Option<serde_json::Value>,
}

impl BalanceAllowanceResponse {
    /// Balance converted from base units.
    pub fn balance_units(&self) -> Option<Decimal> {
        let raw = match self.balance.as_ref()? {
            serde_json::Value::String(s) => s.parse::<Decimal>().ok()?,
            serde_json::Value::Number(n) => n.to_string().parse::<Decimal>().ok()?,
            _ => return None,
        };
        Some(raw / Decimal::from(10u64.pow(TOKEN_DECIMALS)))
    }
}

impl PolymarketClient {
    /// Create a new Polymarket client from config.
    pub fn new(config: &Config) -> Result<Self, MarketError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(Duration::from_secs(2))
            // TCP_NODELAY for low-latency order entry
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            http,
            clob_url: config.polymarket_clob_url.trim_end_matches('/').to_string(),
            private_key: config.polymarket_private_key.clone(),
            signature_type: config.polymarket_signature_type,
            funder: config.polymarket_funder.clone(),
            chain_id: config.chain_id,
        })
    }

    /// Get the HTTP client reference.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Get the private key (for direct signing operations).
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Get the signature type.
    pub fn signature_type(&self) -> u8 {
        self.signature_type
    }

    /// Get funder address.
    pub fn funder(&self) -> Option<&str> {
        self.funder.as_deref()
    }

    /// Get the wallet address derived from the private key.
    pub fn get_address(&self) -> Result<String, TradingError> {
        signing::address_from_private_key(&self.private_key)
    }

    /// Address that holds funds: the funder for proxy wallets, else the signer.
    pub fn maker_address(&self) -> Result<String, TradingError> {
        match &self.funder {
            Some(funder) => Ok(funder.clone()),
            None => self.get_address(),
        }
    }

    /// Get the CLOB base URL.
    pub fn clob_url(&self) -> &str {
        &self.clob_url
    }

    /// Get the chain ID.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Authenticated `GET /balance-allowance`.
    async fn balance_allowance(
        &self,
        query: &[(&str, String)],
    ) -> Result<BalanceAllowanceResponse, TradingError> {
        let url = format!("{}/balance-allowance", self.clob_url);
        let auth = AuthHeaders::sign(&self.private_key, self.signature_type).await?;
        let request = auth.apply(self.http.get(&url).query(query));

        let start = Instant::now();
        let response = request.send().await.map_err(|e| {
            TradingError::BalanceUnavailable(format!("balance request failed: {}", e))
        })?;
        metrics::record_http_latency(start, "balance-allowance");

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TradingError::BalanceUnavailable(format!(
                "HTTP {} - {}",
                status, body
            )));
        }

        response.json().await.map_err(|e| {
            TradingError::BalanceUnavailable(format!("failed to parse balance: {}", e))
        })
    }

    /// Get USDC collateral balance.
    #[instrument(skip(self))]
    pub async fn get_balance(&self) -> Result<Decimal, TradingError> {
        let response = self
            .balance_allowance(&[
                ("asset_type", "COLLATERAL".to_string()),
                ("signature_type", self.signature_type.to_string()),
            ])
            .await?;

        let balance = response.balance_units().ok_or_else(|| {
            TradingError::BalanceUnavailable("response carried no balance".to_string())
        })?;

        debug!(balance = %balance, "Retrieved USDC balance");
        Ok(balance)
    }

    /// Get the held size of one outcome token.
    #[instrument(skip(self))]
    pub async fn get_token_balance(&self, token_id: &str) -> Result<Decimal, TradingError> {
        let response = self
            .balance_allowance(&[
                ("asset_type", "CONDITIONAL".to_string()),
                ("token_id", token_id.to_string()),
                ("signature_type", self.signature_type.to_string()),
            ])
            .await?;

        Ok(response.balance_units().unwrap_or(Decimal::ZERO))
    }
}
