//! Two-leg arbitrage execution with leg-failure compensation.
//!
//! Leg 1 buys the easy market's YES, leg 2 buys the hard market's NO. If
//! leg 2 fails after leg 1 was accepted, leg 1 is sold back at a stop-loss
//! discount. A failed unwind leaves an unhedged position that is recorded
//! and surfaced as [`ExecutionError::CompensationFailed`].

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rust_decimal::Decimal;
use strum::{AsRefStr, Display};
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::calculator::Opportunity;
use crate::config::Config;
use crate::error::{ExecutionError, TradingError};
use crate::market::hierarchy::no_token_of;
use crate::metrics;
use crate::trading::execution::OrderApi;
use crate::trading::ledger::TransactionLog;
use crate::trading::order::{
    buy_limit_on_tick, sell_limit_on_tick, OrderParams, OrderRecord, OrderStatus, Side, TimeInForce,
};
use crate::trading::position::OpenPosition;

/// Collateral balance as last read from the order API.
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceReading {
    /// Read from the exchange.
    Verified(Decimal),
    /// The exchange could not be reached. Never traded on.
    Unverified { fallback: Decimal, reason: String },
}

impl BalanceReading {
    /// The balance, if it is safe to trade on.
    pub fn verified(&self) -> Option<Decimal> {
        match self {
            BalanceReading::Verified(amount) => Some(*amount),
            BalanceReading::Unverified { .. } => None,
        }
    }

    /// Amount to display, verified or not.
    pub fn amount(&self) -> Decimal {
        match self {
            BalanceReading::Verified(amount) => *amount,
            BalanceReading::Unverified { fallback, .. } => *fallback,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, BalanceReading::Verified(_))
    }
}

/// Final state of a two-leg attempt that got past leg 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum TradeOutcome {
    /// Both legs placed.
    Executed,
    /// Leg 2 failed, leg 1 sold back.
    Compensated,
    /// Leg 2 failed and the unwind failed too.
    ExposureOpen,
}

/// One leg of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct LegFill {
    pub token_id: String,
    pub side: Side,
    /// Limit price sent.
    pub price: Decimal,
    pub size: Decimal,
    pub order_id: Option<String>,
    pub status: OrderStatus,
}

impl LegFill {
    fn from_params(params: &OrderParams, order_id: Option<String>, status: OrderStatus) -> Self {
        Self {
            token_id: params.token_id.clone(),
            side: params.side,
            price: params.price,
            size: params.size,
            order_id,
            status,
        }
    }

    fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Record of one arbitrage attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrageTransaction {
    pub transaction_id: String,
    pub timestamp: OffsetDateTime,
    pub event_title: String,
    pub easy_token_id: String,
    pub hard_token_id: String,
    pub easy_price: Decimal,
    pub hard_price: Decimal,
    pub profit_margin: Decimal,
    pub profit_pct: Decimal,
    pub order_size: Decimal,
    pub leg1: LegFill,
    pub leg2: LegFill,
    /// Sell of leg 1 after a leg-2 failure.
    pub compensation: Option<LegFill>,
    pub outcome: TradeOutcome,
}

impl ArbitrageTransaction {
    /// USDC spent on legs that were accepted.
    pub fn usdc_invested(&self) -> Decimal {
        [&self.leg1, &self.leg2]
            .into_iter()
            .filter(|leg| leg.status == OrderStatus::Confirmed)
            .map(LegFill::notional)
            .sum()
    }

    /// Margin times size for a completed trade, zero otherwise.
    pub fn expected_profit(&self) -> Decimal {
        match self.outcome {
            TradeOutcome::Executed => self.profit_margin * self.order_size,
            _ => Decimal::ZERO,
        }
    }
}

/// Executor tunables, read once from [`Config`].
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub slippage: Decimal,
    pub stop_loss_percent: Decimal,
    pub tif: TimeInForce,
    pub settlement_price: Decimal,
    pub tick_size: Decimal,
    pub position_retention: Duration,
    pub balance_cache_ttl: Duration,
    pub fallback_balance: Decimal,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            slippage: config.slippage,
            stop_loss_percent: config.stop_loss_percent,
            tif: config.order_type_upper().parse().unwrap_or_default(),
            settlement_price: config.settlement_price,
            tick_size: config.tick_size,
            position_retention: config.position_retention(),
            balance_cache_ttl: config.balance_cache_ttl(),
            fallback_balance: config.fallback_balance,
        }
    }
}

/// Counts from one settlement sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettlementReport {
    pub checked: usize,
    pub sold: usize,
    /// Nothing left to sell.
    pub emptied: usize,
    /// Sell placed but shares still held afterwards. Retried next sweep.
    pub still_held: usize,
    /// Past the retention window.
    pub expired: usize,
}

/// Snapshot of executor state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub orders_tracked: usize,
    pub transactions: usize,
    pub open_positions: usize,
    pub unhedged_positions: usize,
}

/// Places orders and runs the two-leg protocol against an [`OrderApi`].
pub struct OrderExecutor {
    api: Arc<dyn OrderApi>,
    settings: ExecutorSettings,
    orders: DashMap<String, OrderRecord>,
    transactions: DashMap<String, ArbitrageTransaction>,
    positions: DashMap<String, OpenPosition>,
    ledger: Option<Arc<TransactionLog>>,
    balance_cache: Mutex<Option<(Decimal, Instant)>>,
    /// Worst-case cost of trades between pre-check and finalise.
    reserved: Mutex<Decimal>,
}

/// Collateral held back for one trade in flight, released on drop so a
/// cancelled trade cannot leak it.
struct Reservation<'a> {
    pool: &'a Mutex<Decimal>,
    amount: Decimal,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut reserved = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        *reserved -= self.amount;
    }
}

impl std::fmt::Debug for OrderExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderExecutor")
            .field("venue", &self.api.venue())
            .field("orders", &self.orders.len())
            .field("transactions", &self.transactions.len())
            .field("positions", &self.positions.len())
            .field("reserved", &self.reserved_balance())
            .finish()
    }
}

impl OrderExecutor {
    pub fn new(api: Arc<dyn OrderApi>, settings: ExecutorSettings) -> Self {
        Self {
            api,
            settings,
            orders: DashMap::new(),
            transactions: DashMap::new(),
            positions: DashMap::new(),
            ledger: None,
            balance_cache: Mutex::new(None),
            reserved: Mutex::new(Decimal::ZERO),
        }
    }

    /// Append finalised transactions to `ledger`.
    pub fn with_ledger(mut self, ledger: Arc<TransactionLog>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn venue(&self) -> &'static str {
        self.api.venue()
    }

    /// Current collateral, cached for `balance_cache_ttl`.
    ///
    /// Failures yield [`BalanceReading::Unverified`] carrying the configured
    /// fallback so callers can still report something.
    pub async fn get_balance(&self) -> BalanceReading {
        if let Some(amount) = self.cached_balance() {
            return BalanceReading::Verified(amount);
        }

        match self.api.collateral_balance().await {
            Ok(amount) => {
                *self.balance_cache.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some((amount, Instant::now()));
                debug!(balance = %amount, venue = self.api.venue(), "Balance verified");
                BalanceReading::Verified(amount)
            }
            Err(e) => {
                warn!(error = %e, fallback = %self.settings.fallback_balance, "Balance unavailable");
                BalanceReading::Unverified {
                    fallback: self.settings.fallback_balance,
                    reason: e.to_string(),
                }
            }
        }
    }

    fn cached_balance(&self) -> Option<Decimal> {
        let cache = self.balance_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .as_ref()
            .filter(|(_, at)| at.elapsed() < self.settings.balance_cache_ttl)
            .map(|(amount, _)| *amount)
    }

    /// Collateral committed to trades still in flight.
    pub fn reserved_balance(&self) -> Decimal {
        *self.reserved.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hold `amount` of `available` for one trade. Fails when trades
    /// already in flight leave too little.
    fn reserve(
        &self,
        available: Decimal,
        amount: Decimal,
    ) -> Result<Reservation<'_>, ExecutionError> {
        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        let free = available - *reserved;
        if free < amount {
            warn!(
                required = %amount,
                available = %available,
                in_flight = %*reserved,
                "Insufficient balance for both legs"
            );
            return Err(ExecutionError::InsufficientBalance {
                required: amount,
                available: free,
            });
        }
        *reserved += amount;
        Ok(Reservation {
            pool: &self.reserved,
            amount,
        })
    }

    /// Drop the cached balance so the next read hits the exchange.
    pub fn invalidate_balance(&self) {
        *self.balance_cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Validate and submit one order, tracking it as pending.
    async fn submit(&self, params: &OrderParams) -> Result<OrderRecord, TradingError> {
        params.validate().map_err(TradingError::InvalidParams)?;

        let order_id = self.api.submit_order(params).await?;
        let record = OrderRecord::pending(order_id, params);
        self.orders.insert(record.order_id.clone(), record.clone());
        Ok(record)
    }

    /// Submit one order. `None` on any validation or submission failure.
    pub async fn place_order(&self, params: OrderParams) -> Option<OrderRecord> {
        match self.submit(&params).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    token_id = %params.token_id,
                    side = %params.side,
                    price = %params.price,
                    size = %params.size,
                    error = %e,
                    "Order not placed"
                );
                None
            }
        }
    }

    fn set_order_status(&self, order_id: &str, status: OrderStatus) {
        if let Some(mut order) = self.orders.get_mut(order_id) {
            order.status = status;
        }
    }

    /// Buy limit: quote plus slippage, rounded up to the tick, capped at 1.
    fn buy_limit(&self, price: Decimal) -> Decimal {
        buy_limit_on_tick(price * (Decimal::ONE + self.settings.slippage), self.settings.tick_size)
    }

    /// Run both legs of `opportunity`.
    ///
    /// `Ok` only when both legs were accepted. Every attempt that got past
    /// leg 1 is recorded in the transaction map and the ledger.
    #[instrument(
        skip(self, opportunity),
        fields(event = %opportunity.event_title, margin = %opportunity.profit_margin)
    )]
    pub async fn execute_arbitrage(
        &self,
        opportunity: &Opportunity,
        leg1_size: Decimal,
        leg2_size: Decimal,
    ) -> Result<ArbitrageTransaction, ExecutionError> {
        if leg1_size <= Decimal::ZERO || leg2_size <= Decimal::ZERO {
            return Err(ExecutionError::InvalidOrderParameters(format!(
                "sizes must be positive, got {leg1_size} / {leg2_size}"
            )));
        }

        let leg1_price = self.buy_limit(opportunity.easy_price);
        let leg2_price = self.buy_limit(opportunity.hard_no_price());
        let worst_case = leg1_price * leg1_size + leg2_price * leg2_size;

        let available = match self.get_balance().await {
            BalanceReading::Verified(amount) => amount,
            BalanceReading::Unverified { reason, .. } => {
                return Err(ExecutionError::BalanceUnverified(reason));
            }
        };
        let _reservation = self.reserve(available, worst_case)?;

        let no_token = no_token_of(&opportunity.hard_all_tokens, &opportunity.hard_token_id)
            .ok_or_else(|| ExecutionError::UnresolvedNoToken {
                condition_id: opportunity.hard_condition_id.clone(),
            })?
            .clone();

        let leg1 = OrderParams::buy(opportunity.easy_token_id.clone(), leg1_price, leg1_size)
            .with_tif(self.settings.tif)
            .with_neg_risk(opportunity.neg_risk);
        let leg2 = OrderParams::buy(no_token, leg2_price, leg2_size)
            .with_tif(self.settings.tif)
            .with_neg_risk(opportunity.neg_risk);

        for params in [&leg1, &leg2] {
            params
                .validate()
                .map_err(ExecutionError::InvalidOrderParameters)?;
        }

        info!(
            easy_token = %leg1.token_id,
            easy_limit = %leg1.price,
            no_token = %leg2.token_id,
            no_limit = %leg2.price,
            size = %leg1_size,
            worst_case = %worst_case,
            "Submitting leg 1"
        );

        let leg1_order = self.submit(&leg1).await.map_err(|e| {
            warn!(error = %e, "Leg 1 failed, nothing bought");
            ExecutionError::Leg1Failed {
                reason: e.to_string(),
            }
        })?;
        self.set_order_status(&leg1_order.order_id, OrderStatus::Confirmed);
        self.invalidate_balance();

        let transaction_id = Uuid::new_v4().to_string();
        let leg1_fill = LegFill::from_params(&leg1, Some(leg1_order.order_id.clone()), OrderStatus::Confirmed);

        match self.submit(&leg2).await {
            Ok(leg2_order) => {
                self.set_order_status(&leg2_order.order_id, OrderStatus::Confirmed);
                let leg2_fill =
                    LegFill::from_params(&leg2, Some(leg2_order.order_id), OrderStatus::Confirmed);

                self.open_position(&transaction_id, opportunity, &leg1_fill, false);
                self.open_position(&transaction_id, opportunity, &leg2_fill, false);

                let tx = self
                    .finalise(
                        transaction_id,
                        opportunity,
                        leg1_fill,
                        leg2_fill,
                        None,
                        TradeOutcome::Executed,
                    )
                    .await;
                metrics::inc_trades_executed();
                info!(
                    transaction_id = %tx.transaction_id,
                    invested = %tx.usdc_invested(),
                    expected_profit = %tx.expected_profit(),
                    "Arbitrage executed"
                );
                Ok(tx)
            }
            Err(leg2_error) => {
                let leg2_fill = LegFill::from_params(&leg2, None, OrderStatus::Failed);
                warn!(error = %leg2_error, "Leg 2 failed with leg 1 filled, unwinding");
                self.compensate(transaction_id, opportunity, leg1_fill, leg2_fill, leg2_error)
                    .await
            }
        }
    }

    /// Sell leg 1 back at a stop-loss discount.
    async fn compensate(
        &self,
        transaction_id: String,
        opportunity: &Opportunity,
        leg1_fill: LegFill,
        leg2_fill: LegFill,
        leg2_error: TradingError,
    ) -> Result<ArbitrageTransaction, ExecutionError> {
        let sell_price = sell_limit_on_tick(
            leg1_fill.price * (Decimal::ONE - self.settings.stop_loss_percent),
            self.settings.tick_size,
        );
        let unwind = OrderParams::sell(leg1_fill.token_id.clone(), sell_price, leg1_fill.size)
            .with_tif(TimeInForce::FOK)
            .with_neg_risk(opportunity.neg_risk);

        match self.submit(&unwind).await {
            Ok(order) => {
                let realized_loss = (leg1_fill.price - sell_price) * leg1_fill.size;
                metrics::inc_compensations();
                warn!(
                    order_id = %order.order_id,
                    price = %sell_price,
                    size = %leg1_fill.size,
                    realized_loss = %realized_loss,
                    "Leg 1 unwound"
                );

                let compensation =
                    LegFill::from_params(&unwind, Some(order.order_id.clone()), OrderStatus::Pending);
                self.finalise(
                    transaction_id,
                    opportunity,
                    leg1_fill,
                    leg2_fill,
                    Some(compensation),
                    TradeOutcome::Compensated,
                )
                .await;

                Err(ExecutionError::Leg2Failed {
                    reason: leg2_error.to_string(),
                    compensation_order_id: order.order_id,
                    realized_loss,
                })
            }
            Err(unwind_error) => {
                metrics::inc_exposures();
                error!(
                    transaction_id = %transaction_id,
                    token_id = %leg1_fill.token_id,
                    size = %leg1_fill.size,
                    entry_price = %leg1_fill.price,
                    leg2_error = %leg2_error,
                    error = %unwind_error,
                    "CRITICAL: unwind failed, position left unhedged"
                );

                self.open_position(&transaction_id, opportunity, &leg1_fill, true);
                let compensation = LegFill::from_params(&unwind, None, OrderStatus::Failed);
                let token_id = leg1_fill.token_id.clone();
                let size = leg1_fill.size;
                self.finalise(
                    transaction_id,
                    opportunity,
                    leg1_fill,
                    leg2_fill,
                    Some(compensation),
                    TradeOutcome::ExposureOpen,
                )
                .await;

                Err(ExecutionError::CompensationFailed {
                    token_id,
                    size,
                    leg2_reason: leg2_error.to_string(),
                    reason: unwind_error.to_string(),
                })
            }
        }
    }

    fn open_position(
        &self,
        transaction_id: &str,
        opportunity: &Opportunity,
        leg: &LegFill,
        unhedged: bool,
    ) {
        let position = OpenPosition {
            token_id: leg.token_id.clone(),
            transaction_id: transaction_id.to_string(),
            event_title: opportunity.event_title.clone(),
            size: leg.size,
            entry_price: leg.price,
            opened_at: OffsetDateTime::now_utc(),
            closes_at: opportunity.closes_at,
            unhedged,
        };
        self.positions.insert(position.key(), position);
    }

    /// Store the transaction and append it to the ledger off the runtime
    /// threads.
    async fn finalise(
        &self,
        transaction_id: String,
        opportunity: &Opportunity,
        leg1: LegFill,
        leg2: LegFill,
        compensation: Option<LegFill>,
        outcome: TradeOutcome,
    ) -> ArbitrageTransaction {
        let tx = ArbitrageTransaction {
            transaction_id,
            timestamp: OffsetDateTime::now_utc(),
            event_title: opportunity.event_title.clone(),
            easy_token_id: opportunity.easy_token_id.clone(),
            hard_token_id: opportunity.hard_token_id.clone(),
            easy_price: opportunity.easy_price,
            hard_price: opportunity.hard_price,
            profit_margin: opportunity.profit_margin,
            profit_pct: opportunity.profit_pct,
            order_size: leg1.size,
            leg1,
            leg2,
            compensation,
            outcome,
        };

        if let Some(ledger) = &self.ledger {
            let ledger = Arc::clone(ledger);
            let row = tx.clone();
            match tokio::task::spawn_blocking(move || ledger.append(&row)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(transaction_id = %tx.transaction_id, error = %e, "Failed to record transaction")
                }
                Err(e) => {
                    error!(transaction_id = %tx.transaction_id, error = %e, "Ledger writer task failed")
                }
            }
        }

        self.transactions
            .insert(tx.transaction_id.clone(), tx.clone());
        tx
    }

    /// Liquidate residual holdings of closed markets and drop stale entries.
    ///
    /// A position stays tracked until its token balance reads zero or it
    /// outlives the retention window, so an unfilled sell is retried on the
    /// next sweep.
    pub async fn check_and_settle_positions(&self) -> SettlementReport {
        self.check_and_settle_positions_at(OffsetDateTime::now_utc())
            .await
    }

    /// Settlement sweep evaluated at `now`.
    #[instrument(skip(self), fields(positions = self.positions.len()))]
    pub async fn check_and_settle_positions_at(&self, now: OffsetDateTime) -> SettlementReport {
        let mut report = SettlementReport::default();
        let snapshot: Vec<OpenPosition> = self.positions.iter().map(|p| p.value().clone()).collect();

        for position in snapshot {
            let key = position.key();

            if position.is_expired(now, self.settings.position_retention) {
                self.positions.remove(&key);
                report.expired += 1;
                info!(token_id = %position.token_id, event = %position.event_title, "Dropping expired position");
                continue;
            }

            if !position.is_settleable(now) {
                continue;
            }
            report.checked += 1;

            let held = match self.api.token_balance(&position.token_id).await {
                Ok(held) => held,
                Err(e) => {
                    warn!(token_id = %position.token_id, error = %e, "Token balance unavailable");
                    continue;
                }
            };

            if held <= Decimal::ZERO {
                self.positions.remove(&key);
                report.emptied += 1;
                debug!(token_id = %position.token_id, "Position already settled");
                continue;
            }

            let price = sell_limit_on_tick(self.settings.settlement_price, self.settings.tick_size);
            let sell = OrderParams::sell(position.token_id.clone(), price, held)
                .with_tif(TimeInForce::FAK);
            let Some(order) = self.place_order(sell).await else {
                continue;
            };
            report.sold += 1;
            metrics::inc_positions_settled();
            info!(
                token_id = %position.token_id,
                size = %held,
                price = %price,
                order_id = %order.order_id,
                "Settlement sell placed"
            );

            match self.api.token_balance(&position.token_id).await {
                Ok(left) if left <= Decimal::ZERO => {
                    self.positions.remove(&key);
                }
                Ok(left) => {
                    report.still_held += 1;
                    debug!(token_id = %position.token_id, left = %left, "Settlement sell left shares, retrying next sweep");
                }
                Err(e) => {
                    report.still_held += 1;
                    warn!(token_id = %position.token_id, error = %e, "Could not confirm settlement fill");
                }
            }
        }

        if report != SettlementReport::default() {
            info!(
                checked = report.checked,
                sold = report.sold,
                emptied = report.emptied,
                still_held = report.still_held,
                expired = report.expired,
                remaining = self.positions.len(),
                "Settlement sweep complete"
            );
        }
        report
    }

    pub fn order(&self, order_id: &str) -> Option<OrderRecord> {
        self.orders.get(order_id).map(|o| o.clone())
    }

    pub fn transaction(&self, transaction_id: &str) -> Option<ArbitrageTransaction> {
        self.transactions.get(transaction_id).map(|t| t.clone())
    }

    pub fn open_positions(&self) -> Vec<OpenPosition> {
        self.positions.iter().map(|p| p.value().clone()).collect()
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            orders_tracked: self.orders.len(),
            transactions: self.transactions.len(),
            open_positions: self.positions.len(),
            unhedged_positions: self.positions.iter().filter(|p| p.unhedged).count(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::arbitrage::calculator::tests::opportunity;
    use crate::config::tests::test_config;
    use crate::market::mock::MockExchange;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    /// Executed-shape transaction with margin 0.10 and size 20.
    pub(crate) fn sample_transaction(outcome: TradeOutcome) -> ArbitrageTransaction {
        let leg = |token: &str, price: Decimal, status: OrderStatus| LegFill {
            token_id: token.to_string(),
            side: Side::Buy,
            price,
            size: dec!(20),
            order_id: Some(format!("order-{token}")),
            status,
        };
        let leg2_status = match outcome {
            TradeOutcome::Executed => OrderStatus::Confirmed,
            _ => OrderStatus::Failed,
        };

        ArbitrageTransaction {
            transaction_id: "tx-1".to_string(),
            timestamp: datetime!(2026-03-01 12:00 UTC),
            event_title: "Bitcoin price on March 31".to_string(),
            easy_token_id: "easy".to_string(),
            hard_token_id: "hard".to_string(),
            easy_price: dec!(0.25),
            hard_price: dec!(0.35),
            profit_margin: dec!(0.10),
            profit_pct: dec!(28.5714),
            order_size: dec!(20),
            leg1: leg("easy", dec!(0.26), OrderStatus::Confirmed),
            leg2: leg("hard-no", dec!(0.66), leg2_status),
            compensation: None,
            outcome,
        }
    }

    fn executor(exchange: &Arc<MockExchange>) -> OrderExecutor {
        OrderExecutor::new(exchange.clone(), ExecutorSettings::from_config(&test_config()))
    }

    #[tokio::test]
    async fn both_legs_succeed() {
        let exchange = Arc::new(MockExchange::new(dec!(100)));
        let executor = executor(&exchange);
        let opp = opportunity(dec!(0.25), dec!(0.35));

        let tx = executor.execute_arbitrage(&opp, dec!(20), dec!(20)).await.unwrap();

        let submitted = exchange.submissions();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].token_id, "easy");
        // 0.2525 and 0.6565 rounded up to the cent tick
        assert_eq!(submitted[0].price, dec!(0.26));
        assert_eq!(submitted[1].token_id, "hard-no");
        assert_eq!(submitted[1].price, dec!(0.66));
        assert!(submitted.iter().all(|o| o.side == Side::Buy));

        assert_eq!(tx.outcome, TradeOutcome::Executed);
        assert_eq!(tx.expected_profit(), dec!(2.00));
        assert_eq!(tx.usdc_invested(), dec!(18.40));
        assert_eq!(executor.stats().open_positions, 2);
        assert_eq!(
            executor.order(tx.leg1.order_id.as_deref().unwrap()).unwrap().status,
            OrderStatus::Confirmed
        );
        assert!(executor.transaction(&tx.transaction_id).is_some());
    }

    #[tokio::test]
    async fn leg1_failure_never_submits_leg2() {
        let exchange = Arc::new(MockExchange::new(dec!(100)));
        exchange.fail_submission(0, "no liquidity");
        let executor = executor(&exchange);

        let result = executor
            .execute_arbitrage(&opportunity(dec!(0.25), dec!(0.35)), dec!(20), dec!(20))
            .await;

        assert!(matches!(result, Err(ExecutionError::Leg1Failed { .. })));
        assert_eq!(exchange.submission_count(), 1);
        assert_eq!(executor.stats(), ExecutorStats::default());
    }

    #[tokio::test]
    async fn leg2_failure_sells_leg1_at_stop_loss() {
        let exchange = Arc::new(MockExchange::new(dec!(100)));
        exchange.fail_submission(1, "rejected");
        let executor = executor(&exchange);

        let result = executor
            .execute_arbitrage(&opportunity(dec!(0.25), dec!(0.35)), dec!(20), dec!(20))
            .await;

        let submitted = exchange.submissions();
        assert_eq!(submitted.len(), 3);
        let unwind = &submitted[2];
        assert_eq!(unwind.side, Side::Sell);
        assert_eq!(unwind.token_id, "easy");
        assert_eq!(unwind.size, dec!(20));
        // 0.26 * 0.95 = 0.247, rounded down to the tick
        assert_eq!(unwind.price, dec!(0.24));
        assert_eq!(unwind.tif, TimeInForce::FOK);

        match result {
            Err(ExecutionError::Leg2Failed { realized_loss, .. }) => {
                assert_eq!(realized_loss, dec!(0.40));
            }
            other => panic!("expected compensated leg 2 failure, got {other:?}"),
        }
        assert_eq!(executor.stats().transactions, 1);
        assert_eq!(executor.stats().open_positions, 0);
    }

    #[tokio::test]
    async fn failed_unwind_leaves_recorded_exposure() {
        let exchange = Arc::new(MockExchange::new(dec!(100)));
        exchange.fail_submission(1, "rejected");
        exchange.fail_submission(2, "book gone");
        let executor = executor(&exchange);

        let err = executor
            .execute_arbitrage(&opportunity(dec!(0.25), dec!(0.35)), dec!(20), dec!(20))
            .await
            .unwrap_err();

        assert!(err.is_exposure());
        let positions = executor.open_positions();
        assert_eq!(positions.len(), 1);
        assert!(positions[0].unhedged);
        assert_eq!(positions[0].token_id, "easy");
        assert_eq!(executor.stats().unhedged_positions, 1);
    }

    #[tokio::test]
    async fn concurrent_trades_cannot_share_one_balance() {
        let exchange =
            Arc::new(MockExchange::new(dec!(100)).with_latency(Duration::from_millis(10)));
        let executor = executor(&exchange);
        let opp = opportunity(dec!(0.05), dec!(0.15));

        // Worst case 0.06 * 100 + 0.86 * 100 = 92 each.
        let (a, b) = tokio::join!(
            executor.execute_arbitrage(&opp, dec!(100), dec!(100)),
            executor.execute_arbitrage(&opp, dec!(100), dec!(100)),
        );
        let results = [a, b];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(ExecutionError::InsufficientBalance { required, available })
                if *required == dec!(92) && *available == dec!(8)
        )));
        assert_eq!(exchange.submission_count(), 2);
        assert!(exchange.submissions().iter().all(|o| o.side == Side::Buy));
        assert_eq!(executor.reserved_balance(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn reservation_is_released_after_failed_trades() {
        let exchange = Arc::new(MockExchange::new(dec!(100)));
        exchange.fail_submission(0, "no liquidity");
        let executor = executor(&exchange);
        let opp = opportunity(dec!(0.05), dec!(0.15));

        assert!(executor.execute_arbitrage(&opp, dec!(100), dec!(100)).await.is_err());
        assert_eq!(executor.reserved_balance(), Decimal::ZERO);
        assert!(executor.execute_arbitrage(&opp, dec!(100), dec!(100)).await.is_ok());
    }

    #[tokio::test]
    async fn order_prices_land_on_the_tick() {
        let exchange = Arc::new(MockExchange::new(dec!(1000)));
        exchange.fail_submission(1, "rejected");
        let executor = executor(&exchange);

        let _ = executor
            .execute_arbitrage(&opportunity(dec!(0.333), dec!(0.517)), dec!(10), dec!(10))
            .await;

        let prices: Vec<Decimal> = exchange.submissions().iter().map(|o| o.price).collect();
        // 0.33633 up, NO at 0.483 * 1.01 = 0.48783 up, 0.34 * 0.95 = 0.323 down
        assert_eq!(prices, vec![dec!(0.34), dec!(0.49), dec!(0.32)]);
        for price in prices {
            assert_eq!(price % dec!(0.01), Decimal::ZERO);
        }
    }

    #[tokio::test]
    async fn unverified_or_short_balance_blocks_trading() {
        let exchange = Arc::new(MockExchange::new(dec!(5)));
        let executor = executor(&exchange);
        let opp = opportunity(dec!(0.25), dec!(0.35));

        assert!(matches!(
            executor.execute_arbitrage(&opp, dec!(20), dec!(20)).await,
            Err(ExecutionError::InsufficientBalance { .. })
        ));

        exchange.set_balance_failing(true);
        executor.invalidate_balance();
        assert!(matches!(
            executor.execute_arbitrage(&opp, dec!(1), dec!(1)).await,
            Err(ExecutionError::BalanceUnverified(_))
        ));
        assert_eq!(exchange.submission_count(), 0);
    }

    #[tokio::test]
    async fn unresolvable_no_token_aborts() {
        let exchange = Arc::new(MockExchange::new(dec!(100)));
        let executor = executor(&exchange);
        let mut opp = opportunity(dec!(0.25), dec!(0.35));
        opp.hard_all_tokens = smallvec::smallvec!["hard".to_string()];

        assert!(matches!(
            executor.execute_arbitrage(&opp, dec!(20), dec!(20)).await,
            Err(ExecutionError::UnresolvedNoToken { .. })
        ));
        assert_eq!(exchange.submission_count(), 0);
    }

    #[tokio::test]
    async fn balance_reading_is_cached_and_gated() {
        let exchange = Arc::new(MockExchange::new(dec!(42)));
        let executor = executor(&exchange);

        assert_eq!(executor.get_balance().await, BalanceReading::Verified(dec!(42)));
        exchange.set_balance(dec!(1));
        assert_eq!(executor.get_balance().await.verified(), Some(dec!(42)));

        exchange.set_balance_failing(true);
        executor.invalidate_balance();
        let reading = executor.get_balance().await;
        assert!(!reading.is_verified());
        assert_eq!(reading.amount(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn place_order_returns_none_on_invalid_params() {
        let exchange = Arc::new(MockExchange::new(dec!(100)));
        let executor = executor(&exchange);

        assert!(executor.place_order(OrderParams::buy("t", dec!(1.2), dec!(1))).await.is_none());
        assert!(executor.place_order(OrderParams::buy("t", dec!(0.5), dec!(0))).await.is_none());
        assert_eq!(exchange.submission_count(), 0);

        let record = executor.place_order(OrderParams::buy("t", dec!(0.5), dec!(2))).await.unwrap();
        assert_eq!(record.status, OrderStatus::Pending);
        assert!(executor.order(&record.order_id).is_some());
    }

    #[tokio::test]
    async fn settlement_sells_residuals_and_expires_old_positions() {
        let exchange = Arc::new(MockExchange::new(dec!(100)));
        let executor = executor(&exchange);
        executor
            .execute_arbitrage(&opportunity(dec!(0.25), dec!(0.35)), dec!(20), dec!(20))
            .await
            .unwrap();
        // Easy leg already redeemed, NO leg still held.
        exchange.set_holding("easy", Decimal::ZERO);

        let now = OffsetDateTime::now_utc();
        let report = executor.check_and_settle_positions_at(now).await;
        assert_eq!(report.checked, 2);
        assert_eq!(report.emptied, 1);
        assert_eq!(report.sold, 1);

        let sell = exchange.submissions().pop().unwrap();
        assert_eq!(sell.side, Side::Sell);
        assert_eq!(sell.token_id, "hard-no");
        assert_eq!(sell.price, dec!(0.99));
        assert_eq!(executor.stats().open_positions, 0);

        executor
            .execute_arbitrage(&opportunity(dec!(0.25), dec!(0.35)), dec!(20), dec!(20))
            .await
            .unwrap();
        let later = now + time::Duration::hours(25);
        let report = executor.check_and_settle_positions_at(later).await;
        assert_eq!(report.expired, 2);
        assert_eq!(executor.stats().open_positions, 0);
    }

    #[tokio::test]
    async fn unfilled_settlement_sell_is_retried() {
        let exchange = Arc::new(MockExchange::new(dec!(100)));
        let executor = executor(&exchange);
        executor
            .execute_arbitrage(&opportunity(dec!(0.25), dec!(0.35)), dec!(20), dec!(20))
            .await
            .unwrap();

        exchange.set_sells_unfilled(true);
        let now = OffsetDateTime::now_utc();
        let first = executor.check_and_settle_positions_at(now).await;
        assert_eq!(first.sold, 2);
        assert_eq!(first.still_held, 2);
        assert_eq!(executor.stats().open_positions, 2);

        let second = executor.check_and_settle_positions_at(now).await;
        assert_eq!(second.checked, 2);
        assert_eq!(second.sold, 2);
        assert_eq!(executor.stats().open_positions, 2);

        exchange.set_sells_unfilled(false);
        let third = executor.check_and_settle_positions_at(now).await;
        assert_eq!(third.sold, 2);
        assert_eq!(third.still_held, 0);
        assert_eq!(executor.stats().open_positions, 0);
        assert_eq!(exchange.submission_count(), 2 + 6);
    }

    #[tokio::test]
    async fn unclosed_markets_are_left_alone() {
        let exchange = Arc::new(MockExchange::new(dec!(100)));
        let executor = executor(&exchange);
        let mut opp = opportunity(dec!(0.25), dec!(0.35));
        opp.closes_at = Some(OffsetDateTime::now_utc() + time::Duration::hours(6));
        executor.execute_arbitrage(&opp, dec!(20), dec!(20)).await.unwrap();

        let report = executor.check_and_settle_positions().await;
        assert_eq!(report.checked, 0);
        assert_eq!(executor.stats().open_positions, 2);
        assert_eq!(exchange.submission_count(), 2);
    }

    #[tokio::test]
    async fn ledger_receives_every_finalised_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(TransactionLog::new(dir.path().join("tx.csv")));
        let exchange = Arc::new(MockExchange::new(dec!(100)));
        exchange.fail_submission(3, "rejected");
        let executor = executor(&exchange).with_ledger(ledger.clone());
        let opp = opportunity(dec!(0.25), dec!(0.35));

        executor.execute_arbitrage(&opp, dec!(20), dec!(20)).await.unwrap();
        let _ = executor.execute_arbitrage(&opp, dec!(20), dec!(20)).await;

        let summary = ledger.summary().unwrap();
        assert_eq!(summary.total_transactions, 2);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.estimated_total_profit, dec!(2.00));
    }
}
