//! Order entry: the `OrderApi` seam and the live CLOB implementation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::order::{OrderParams, Side, TimeInForce};
use crate::error::TradingError;
use crate::market::PolymarketClient;
use crate::metrics;
use crate::signing::{self, AuthHeaders};

/// Everything the executor needs from an exchange.
#[async_trait]
pub trait OrderApi: Send + Sync {
    /// Available collateral (USDC).
    async fn collateral_balance(&self) -> Result<Decimal, TradingError>;

    /// Shares held of one outcome token.
    async fn token_balance(&self, token_id: &str) -> Result<Decimal, TradingError>;

    /// Submit one order, returning the exchange order id.
    async fn submit_order(&self, params: &OrderParams) -> Result<String, TradingError>;

    /// Short name for logs.
    fn venue(&self) -> &'static str;
}

/// Order submission request body.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    /// Token ID to trade.
    pub token_id: String,
    /// Order side (BUY/SELL).
    pub side: String,
    /// Limit price.
    pub price: String,
    /// Order size.
    pub size: String,
    /// Fee rate basis points.
    pub fee_rate_bps: String,
    /// Nonce for order uniqueness.
    pub nonce: String,
    /// Expiration timestamp.
    pub expiration: String,
    /// Taker address.
    pub taker: String,
    /// Maker address.
    pub maker: String,
    /// Signature type.
    pub signature_type: u8,
    /// Order signature.
    pub signature: String,
    /// Time in force.
    pub order_type: String,
    /// Neg risk flag.
    pub neg_risk: bool,
}

/// Order submission result.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResult {
    /// Order ID (various field names).
    #[serde(alias = "orderID", alias = "orderId", alias = "id")]
    pub order_id: Option<String>,
    /// Error message if any.
    #[serde(alias = "errorMsg")]
    pub error: Option<String>,
    /// Success flag.
    pub success: Option<bool>,
}

impl SubmitResult {
    /// Order id of an accepted order, or the rejection reason.
    pub fn into_order_id(self) -> Result<String, TradingError> {
        let error = self.error.filter(|e| !e.is_empty());

        if self.success == Some(false) || error.is_some() {
            return Err(TradingError::OrderRejected {
                reason: error.unwrap_or_else(|| "exchange reported success=false".to_string()),
            });
        }

        self.order_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TradingError::SubmissionFailed("No order ID in response".to_string()))
    }
}

/// Submit a single order using the Polymarket CLOB API.
#[instrument(skip(client, params), fields(token = %params.token_id, side = %params.side))]
pub async fn submit_order(
    client: &PolymarketClient,
    params: &OrderParams,
) -> Result<String, TradingError> {
    params.validate().map_err(TradingError::InvalidParams)?;

    debug!(
        price = %params.price,
        size = %params.size,
        tif = %params.tif,
        neg_risk = params.neg_risk,
        "Submitting order"
    );

    let _timer = metrics::timer_order_submit();
    let maker = client.maker_address()?;
    let auth = AuthHeaders::sign(client.private_key(), client.signature_type()).await?;

    let nonce = chrono::Utc::now().timestamp_millis().to_string();
    let expiration = match params.tif {
        TimeInForce::GTC => "0".to_string(),
        _ => (chrono::Utc::now().timestamp() + 3600).to_string(),
    };

    let side_str = match params.side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    };

    // Format: token_id:side:price:size:nonce:expiration
    let order_message = format!(
        "{}:{}:{}:{}:{}:{}",
        params.token_id, side_str, params.price, params.size, nonce, expiration
    );

    let signature_bytes =
        signing::sign_message(client.private_key(), order_message.as_bytes()).await?;
    let signature = format!("0x{}", hex::encode(&signature_bytes));

    let order_request = OrderRequest {
        token_id: params.token_id.clone(),
        side: side_str.to_string(),
        price: params.price.to_string(),
        size: params.size.to_string(),
        fee_rate_bps: "0".to_string(),
        nonce,
        expiration,
        taker: "0x0000000000000000000000000000000000000000".to_string(),
        maker,
        signature_type: client.signature_type(),
        signature,
        order_type: params.tif.to_string(),
        neg_risk: params.neg_risk,
    };

    let url = format!("{}/order", client.clob_url());

    let request = auth.apply(client.http().post(&url).json(&order_request));

    metrics::inc_orders_submitted();
    let response = request.send().await.map_err(|e| {
        metrics::inc_orders_failed();
        TradingError::SubmissionFailed(format!("HTTP request failed: {}", e))
    })?;

    if !response.status().is_success() {
        metrics::inc_orders_failed();
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(TradingError::OrderRejected {
            reason: format!("HTTP {} - {}", status, body),
        });
    }

    let json: serde_json::Value = response.json().await.map_err(|e| {
        TradingError::SubmissionFailed(format!("Failed to parse response: {}", e))
    })?;

    let parsed: SubmitResult = serde_json::from_value(json.clone()).map_err(|e| {
        TradingError::SubmissionFailed(format!("Unexpected response shape: {}", e))
    })?;

    let order_id = match parsed.into_order_id() {
        Ok(id) => id,
        Err(TradingError::SubmissionFailed(_)) => extract_order_id(&json).ok_or_else(|| {
            TradingError::SubmissionFailed("No order ID in response".to_string())
        })?,
        Err(e) => {
            metrics::inc_orders_failed();
            return Err(e);
        }
    };

    info!(
        order_id = %order_id,
        token_id = %params.token_id,
        side = %params.side,
        price = %params.price,
        size = %params.size,
        "Order submitted successfully"
    );

    Ok(order_id)
}

/// Extract order ID from API response.
pub fn extract_order_id(result: &serde_json::Value) -> Option<String> {
    for key in ["orderID", "orderId", "order_id", "id"] {
        if let Some(id) = result.get(key).and_then(|v| v.as_str()) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }

    for key in ["order", "data", "result"] {
        if let Some(nested) = result.get(key) {
            if let Some(id) = extract_order_id(nested) {
                return Some(id);
            }
        }
    }

    None
}

#[async_trait]
impl OrderApi for PolymarketClient {
    async fn collateral_balance(&self) -> Result<Decimal, TradingError> {
        self.get_balance().await
    }

    async fn token_balance(&self, token_id: &str) -> Result<Decimal, TradingError> {
        self.get_token_balance(token_id).await
    }

    async fn submit_order(&self, params: &OrderParams) -> Result<String, TradingError> {
        submit_order(self, params).await
    }

    fn venue(&self) -> &'static str {
        "clob"
    }
}
