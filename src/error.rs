//! Unified error types for the arbitrage bot.

use rust_decimal::Decimal;
use thiserror::Error;

/// Unified error type for the arbitrage bot.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Market directory or market data error.
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    /// Arbitrage sizing error.
    #[error("arbitrage error: {0}")]
    Arbitrage(#[from] ArbitrageError),

    /// Trading/order error.
    #[error("trading error: {0}")]
    Trading(#[from] TradingError),

    /// Two-leg execution error.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Transaction ledger error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Startup scan found nothing to trade.
    #[error("no hierarchical pairs found in the market directory")]
    NoPairsFound,

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Market directory and market data errors.
#[derive(Error, Debug)]
pub enum MarketError {
    /// Directory request failed after all retries.
    #[error("failed to fetch market directory from {url}: {reason}")]
    DirectoryFetchFailed {
        /// The directory URL queried.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Directory answered with a non-success status.
    #[error("market directory returned HTTP {status}")]
    BadStatus {
        /// HTTP status code.
        status: u16,
    },

    /// A market record could not be normalised.
    #[error("malformed market '{question}': {reason}")]
    MalformedMarketData {
        /// The market question, for logs.
        question: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Failed to parse market data.
    #[error("failed to parse market data: {0}")]
    ParseError(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Position sizing errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArbitrageError {
    /// Account balance too low for both legs.
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance {
        /// Required balance.
        required: Decimal,
        /// Available balance.
        available: Decimal,
    },

    /// Balance is below the minimum trade size.
    #[error("balance {available} below minimum trade {minimum}")]
    BelowMinimumTrade {
        /// Available balance.
        available: Decimal,
        /// Minimum trade size in USDC.
        minimum: Decimal,
    },

    /// Invalid order size.
    #[error("invalid order size: {0}")]
    InvalidSize(Decimal),
}

/// Single-order trading errors.
#[derive(Error, Debug, Clone)]
pub enum TradingError {
    /// Order submission failed.
    #[error("order submission failed: {0}")]
    SubmissionFailed(String),

    /// Invalid order parameters.
    #[error("invalid order parameters: {0}")]
    InvalidParams(String),

    /// Signing error.
    #[error("signing error: {0}")]
    SigningError(String),

    /// Balance could not be read.
    #[error("balance unavailable: {0}")]
    BalanceUnavailable(String),

    /// Order rejected by the exchange.
    #[error("order rejected: {reason}")]
    OrderRejected {
        /// Rejection reason from the exchange.
        reason: String,
    },

    /// Insufficient funds for the order.
    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds {
        /// Required amount.
        required: Decimal,
        /// Available amount.
        available: Decimal,
    },
}

/// Errors from a two-leg arbitrage execution.
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    /// Balance does not cover the worst-case cost of both legs.
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance {
        /// Worst-case cost.
        required: Decimal,
        /// Verified balance.
        available: Decimal,
    },

    /// Balance could not be verified, trading is gated off.
    #[error("balance unverified: {0}")]
    BalanceUnverified(String),

    /// Child market has no NO token.
    #[error("no NO token for market {condition_id}")]
    UnresolvedNoToken {
        /// Child market condition id.
        condition_id: String,
    },

    /// Order parameters rejected before submission.
    #[error("invalid order parameters: {0}")]
    InvalidOrderParameters(String),

    /// First leg failed. Nothing was bought.
    #[error("leg 1 failed: {reason}")]
    Leg1Failed {
        /// Why the order failed.
        reason: String,
    },

    /// Second leg failed and the first leg was sold back.
    #[error("leg 2 failed ({reason}), leg 1 unwound by order {compensation_order_id}")]
    Leg2Failed {
        /// Why leg 2 failed.
        reason: String,
        /// Order id of the compensating sell.
        compensation_order_id: String,
        /// Estimated loss from the unwind.
        realized_loss: Decimal,
    },

    /// Second leg failed and the unwind also failed. Exposure is open.
    #[error("CRITICAL: leg 2 failed ({leg2_reason}) and unwind of {size} {token_id} failed: {reason}")]
    CompensationFailed {
        /// Token still held.
        token_id: String,
        /// Shares still held.
        size: Decimal,
        /// Why leg 2 failed.
        leg2_reason: String,
        /// Why the unwind failed.
        reason: String,
    },
}

impl ExecutionError {
    /// Whether this failure left an unhedged position behind.
    pub fn is_exposure(&self) -> bool {
        matches!(self, ExecutionError::CompensationFailed { .. })
    }

    /// Short label for metrics and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::InsufficientBalance { .. } => "insufficient_balance",
            ExecutionError::BalanceUnverified(_) => "balance_unverified",
            ExecutionError::UnresolvedNoToken { .. } => "unresolved_no_token",
            ExecutionError::InvalidOrderParameters(_) => "invalid_params",
            ExecutionError::Leg1Failed { .. } => "leg1_failed",
            ExecutionError::Leg2Failed { .. } => "leg2_compensated",
            ExecutionError::CompensationFailed { .. } => "compensation_failed",
        }
    }
}

/// WebSocket connection and message errors.
#[derive(Error, Debug)]
pub enum WsError {
    /// Connection failed.
    #[error("websocket connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed unexpectedly.
    #[error("websocket connection closed: code={code:?}, reason={reason}")]
    ConnectionClosed {
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// Message parsing failed.
    #[error("failed to parse websocket message: {0}")]
    ParseError(String),

    /// Send failed.
    #[error("failed to send websocket message: {0}")]
    SendFailed(String),

    /// Reconnect budget spent.
    #[error("websocket gave up after {attempts} consecutive failed connection attempts")]
    RetriesExhausted {
        /// Consecutive failed attempts.
        attempts: u32,
    },

    /// Tungstenite error.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Transaction ledger errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Filesystem error.
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding error.
    #[error("ledger csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;
