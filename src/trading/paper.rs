//! Simulated order entry for dry-run mode.
//!
//! Every valid order fills immediately at its limit price against an
//! in-memory collateral balance, so the whole pipeline runs end to end
//! without touching the exchange.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::info;

use super::execution::OrderApi;
use super::order::{OrderParams, Side};
use crate::error::TradingError;

/// In-memory exchange used when `dry_run` is set.
#[derive(Debug)]
pub struct PaperExchange {
    balance: Mutex<Decimal>,
    holdings: DashMap<String, Decimal>,
    next_id: AtomicU64,
}

impl PaperExchange {
    /// Start with `balance` USDC and no holdings.
    pub fn new(balance: Decimal) -> Self {
        Self {
            balance: Mutex::new(balance),
            holdings: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Current simulated collateral.
    pub fn balance(&self) -> Decimal {
        self.balance.lock().map(|b| *b).unwrap_or(Decimal::ZERO)
    }

    /// Shares held of `token_id`.
    pub fn holding(&self, token_id: &str) -> Decimal {
        self.holdings
            .get(token_id)
            .map(|h| *h)
            .unwrap_or(Decimal::ZERO)
    }

    fn fill(&self, params: &OrderParams) -> Result<(), TradingError> {
        let mut balance = self
            .balance
            .lock()
            .map_err(|_| TradingError::SubmissionFailed("paper balance poisoned".to_string()))?;
        let notional = params.notional();

        match params.side {
            Side::Buy => {
                if notional > *balance {
                    return Err(TradingError::InsufficientFunds {
                        required: notional,
                        available: *balance,
                    });
                }
                *balance -= notional;
                *self.holdings.entry(params.token_id.clone()).or_default() += params.size;
            }
            Side::Sell => {
                let held = self.holding(&params.token_id);
                if params.size > held {
                    return Err(TradingError::OrderRejected {
                        reason: format!("cannot sell {} shares, holding {}", params.size, held),
                    });
                }
                *balance += notional;
                self.holdings.insert(params.token_id.clone(), held - params.size);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl OrderApi for PaperExchange {
    async fn collateral_balance(&self) -> Result<Decimal, TradingError> {
        Ok(self.balance())
    }

    async fn token_balance(&self, token_id: &str) -> Result<Decimal, TradingError> {
        Ok(self.holding(token_id))
    }

    async fn submit_order(&self, params: &OrderParams) -> Result<String, TradingError> {
        params.validate().map_err(TradingError::InvalidParams)?;
        self.fill(params)?;

        let order_id = format!("paper-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(
            order_id = %order_id,
            token_id = %params.token_id,
            side = %params.side,
            price = %params.price,
            size = %params.size,
            "[DRY RUN] Simulated fill"
        );
        Ok(order_id)
    }

    fn venue(&self) -> &'static str {
        "paper"
    }
}
