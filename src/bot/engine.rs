//! The orchestrator: scans the directory, consumes prices, and dispatches
//! trades.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::cooldown::CooldownTracker;
use super::stats::{BotStats, PerformanceReport};
use crate::arbitrage::{
    detect, missed_profit, ArbitrageTransaction, BalanceReading, Opportunity, OrderExecutor,
    SizingRules,
};
use crate::config::Config;
use crate::error::{BotError, ExecutionError};
use crate::feed::{FeedHandle, MarketFeed, PriceCache, PriceUpdate};
use crate::market::{scan_hierarchies, HierarchicalPair, HierarchyScan, MarketDirectory};
use crate::metrics;
use crate::trading::TransactionLog;

/// Misses between two "missed opportunity" log lines.
const MISSED_LOG_EVERY: u64 = 10;

/// How long shutdown waits for in-flight tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Hierarchical arbitrage bot.
pub struct Bot {
    config: Arc<Config>,
    directory: Arc<dyn MarketDirectory>,
    executor: Arc<OrderExecutor>,
    ledger: Option<Arc<TransactionLog>>,
    prices: Arc<PriceCache>,
    /// Swapped whole on rescans, never edited in place.
    pairs: RwLock<Arc<Vec<HierarchicalPair>>>,
    cooldowns: CooldownTracker,
    stats: Arc<BotStats>,
    sizing: SizingRules,
    ready: Arc<AtomicBool>,
    /// Long-running loops.
    tasks: TaskTracker,
    /// In-flight trade attempts.
    trades: TaskTracker,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("executor", &self.executor)
            .field("active_pairs", &self.active_pairs().len())
            .field("prices", &self.prices.len())
            .field("cooldowns", &self.cooldowns.len())
            .finish()
    }
}

impl Bot {
    pub fn new(
        config: Arc<Config>,
        directory: Arc<dyn MarketDirectory>,
        executor: Arc<OrderExecutor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cooldowns: CooldownTracker::new(config.trade_cooldown()),
            sizing: SizingRules::from_config(&config),
            config,
            directory,
            executor,
            ledger: None,
            prices: Arc::new(PriceCache::new()),
            pairs: RwLock::new(Arc::new(Vec::new())),
            stats: Arc::new(BotStats::new()),
            ready: Arc::new(AtomicBool::new(false)),
            tasks: TaskTracker::new(),
            trades: TaskTracker::new(),
            cancel,
        }
    }

    /// Include the historical ledger in performance reports.
    pub fn with_ledger(mut self, ledger: Arc<TransactionLog>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn stats(&self) -> Arc<BotStats> {
        self.stats.clone()
    }

    /// Set once pairs are loaded and the feed is up.
    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    pub fn prices(&self) -> &PriceCache {
        &self.prices
    }

    pub fn executor(&self) -> &Arc<OrderExecutor> {
        &self.executor
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current pair set.
    pub fn active_pairs(&self) -> Arc<Vec<HierarchicalPair>> {
        self.pairs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn replace_pairs(&self, pairs: Vec<HierarchicalPair>) {
        let count = pairs.len();
        *self.pairs.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(pairs);
        self.stats.set_active_pairs(count);
        metrics::set_active_pairs(count);
    }

    /// Fetch the directory and regroup. An empty result keeps the current
    /// pairs.
    #[instrument(skip(self))]
    pub async fn refresh_pairs(&self) -> HierarchyScan {
        metrics::inc_directory_scans();
        let events = self.directory.list_active_events().await;
        let scan = scan_hierarchies(&events);

        if scan.pairs.is_empty() {
            warn!(
                events = scan.events_seen,
                kept = self.active_pairs().len(),
                "Scan found no pairs, keeping current set"
            );
        } else {
            self.replace_pairs(scan.pairs.clone());
        }
        scan
    }

    /// Startup scan. Nothing to trade is fatal.
    pub async fn initial_scan(&self) -> Result<HierarchyScan, BotError> {
        let scan = self.refresh_pairs().await;
        if scan.pairs.is_empty() {
            return Err(BotError::NoPairsFound);
        }
        Ok(scan)
    }

    /// Apply one price and dispatch any tradeable inversions. Returns the
    /// number of trades dispatched.
    pub fn handle_price_update(self: &Arc<Self>, update: PriceUpdate) -> usize {
        self.handle_price_update_at(update, Instant::now())
    }

    /// [`Self::handle_price_update`] with an explicit clock.
    pub fn handle_price_update_at(self: &Arc<Self>, update: PriceUpdate, now: Instant) -> usize {
        self.prices.update_at(&update.token_id, update.price, now);
        self.stats.record_price_update();
        metrics::inc_price_updates();

        let pairs = self.active_pairs();
        let opportunities = {
            let _timer = metrics::timer_opportunity_detection();
            detect(&pairs, self.prices.as_ref(), self.config.min_profit)
        };
        if opportunities.is_empty() {
            return 0;
        }

        self.stats.record_opportunities(opportunities.len());
        metrics::add_opportunities_detected(opportunities.len() as u64);

        let mut dispatched = 0;
        for opportunity in opportunities {
            // Freshness first so a stale tick does not burn the cooldown.
            if !self.is_fresh(&opportunity, now) {
                self.stats.record_stale_skip();
                metrics::inc_opportunities_skipped("stale_price");
                debug!(
                    event = %opportunity.event_title,
                    easy = %opportunity.easy_token_id,
                    hard = %opportunity.hard_token_id,
                    "Skipping opportunity on stale price"
                );
                continue;
            }

            if !self.cooldowns.try_acquire_at(&opportunity.key(), now) {
                self.stats.record_cooldown_skip();
                metrics::inc_opportunities_skipped("cooldown");
                continue;
            }

            info!(
                event = %opportunity.event_title,
                easy_price = %opportunity.easy_price,
                hard_price = %opportunity.hard_price,
                margin = %opportunity.profit_margin,
                pct = %opportunity.profit_pct.round_dp(2),
                "Arbitrage opportunity"
            );

            let bot = Arc::clone(self);
            self.trades.spawn(async move {
                bot.attempt_trade(opportunity).await;
            });
            dispatched += 1;
        }
        dispatched
    }

    /// Both legs quoted within `max_price_age` of `now`.
    fn is_fresh(&self, opportunity: &Opportunity, now: Instant) -> bool {
        let max_age = self.config.max_price_age();
        [&opportunity.easy_token_id, &opportunity.hard_token_id]
            .into_iter()
            .all(|token| {
                self.prices
                    .quote_at(token, now)
                    .is_some_and(|q| q.age <= max_age)
            })
    }

    /// Gate on balance, size, and execute. `None` when the trade was not
    /// attempted.
    pub async fn attempt_trade(
        &self,
        opportunity: Opportunity,
    ) -> Option<Result<ArbitrageTransaction, ExecutionError>> {
        let balance = match self.executor.get_balance().await {
            BalanceReading::Verified(amount) => {
                self.stats.set_trading_enabled(true);
                amount
            }
            BalanceReading::Unverified { reason, .. } => {
                self.stats.set_trading_enabled(false);
                self.record_missed(&opportunity, &reason);
                return None;
            }
        };

        // Trades still in flight hold part of the balance.
        let free = (balance - self.executor.reserved_balance()).max(Decimal::ZERO);
        let size = match self.sizing.size_position(free, &opportunity) {
            Ok(size) => size,
            Err(e) => {
                self.record_missed(&opportunity, &e.to_string());
                return None;
            }
        };

        let shares = size
            .shares
            .round_dp_with_strategy(2, RoundingStrategy::ToZero);
        if shares <= Decimal::ZERO {
            self.record_missed(&opportunity, "size rounds to zero");
            return None;
        }

        self.stats.record_attempt();
        metrics::inc_opportunities_dispatched();
        info!(
            event = %opportunity.event_title,
            usdc = %size.usdc.round_dp(2),
            shares = %shares,
            balance = %balance,
            "Executing arbitrage"
        );

        let result = self
            .executor
            .execute_arbitrage(&opportunity, shares, shares)
            .await;
        self.stats.record_execution(&result);

        match &result {
            Ok(tx) => info!(
                transaction_id = %tx.transaction_id,
                invested = %tx.usdc_invested(),
                expected_profit = %tx.expected_profit(),
                "Arbitrage executed"
            ),
            Err(e) => warn!(kind = e.kind(), error = %e, "Arbitrage not completed"),
        }
        Some(result)
    }

    fn record_missed(&self, opportunity: &Opportunity, reason: &str) {
        let estimate = missed_profit(opportunity, self.config.min_trade_usdc);
        let misses = self.stats.record_missed(estimate);
        metrics::inc_opportunities_skipped("balance");

        if misses % MISSED_LOG_EVERY == 1 {
            let snapshot = self.stats.snapshot();
            warn!(
                misses,
                reason,
                missed_profit = %snapshot.missed_profit.round_dp(2),
                "Missed opportunity: balance does not allow trading"
            );
        }
    }

    /// Wait for every dispatched trade to finish.
    pub async fn wait_for_trades(&self) {
        self.trades.close();
        self.trades.wait().await;
        self.trades.reopen();
    }

    /// Start everything and run until cancelled or the feed gives up.
    ///
    /// The performance report is logged and returned on every orderly stop;
    /// a fatal feed failure is returned as the error after the same cleanup.
    pub async fn run(self: Arc<Self>, feed: MarketFeed) -> Result<PerformanceReport, BotError> {
        let scan = self.initial_scan().await?;

        metrics::set_subscribed_tokens(scan.tokens.len());
        let (handle, updates, feed_task) = feed
            .with_tokens(scan.tokens)
            .spawn(&self.tasks, self.cancel.clone());
        self.ready.store(true, Ordering::SeqCst);

        info!(
            pairs = self.active_pairs().len(),
            venue = self.executor.venue(),
            mode = if self.config.dry_run { "SIMULATION" } else { "LIVE TRADING" },
            "Bot started"
        );

        self.tasks.spawn(self.clone().price_loop(updates));
        self.tasks.spawn(self.clone().scan_loop(handle.clone()));
        self.tasks.spawn(self.clone().stats_loop(handle));
        self.tasks.spawn(self.clone().settlement_loop());

        let outcome = match feed_task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "Market feed failed, shutting down");
                Err(BotError::WebSocket(e))
            }
            Err(e) => {
                error!(error = %e, "Market feed task panicked, shutting down");
                Ok(())
            }
        };

        let report = self.shutdown().await;
        outcome.map(|()| report)
    }

    /// Stop all loops, wait for them, and log the final report.
    pub async fn shutdown(&self) -> PerformanceReport {
        self.cancel.cancel();
        self.ready.store(false, Ordering::SeqCst);

        self.tasks.close();
        self.trades.close();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            self.tasks.wait().await;
            self.trades.wait().await;
        })
        .await;
        if drained.is_err() {
            warn!(
                tasks = self.tasks.len(),
                trades = self.trades.len(),
                "Tasks still running after shutdown grace period"
            );
        }

        let report = self.report();
        report.log(self.config.dry_run);
        report
    }

    /// Session stats plus the ledger summary.
    pub fn report(&self) -> PerformanceReport {
        let ledger = self.ledger.as_ref().and_then(|ledger| match ledger.summary() {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "Ledger summary unavailable");
                None
            }
        });
        PerformanceReport::new(self.stats.snapshot(), self.executor.stats(), ledger)
    }

    async fn price_loop(self: Arc<Self>, mut updates: mpsc::Receiver<PriceUpdate>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                update = updates.recv() => match update {
                    Some(update) => {
                        self.handle_price_update(update);
                    }
                    None => {
                        warn!("Price stream closed");
                        self.cancel.cancel();
                        break;
                    }
                },
            }
        }
        debug!("Price loop stopped");
    }

    async fn scan_loop(self: Arc<Self>, feed: FeedHandle) {
        let period = Duration::from_secs(self.config.scan_interval_seconds.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let scan = self.refresh_pairs().await;
                    if scan.pairs.is_empty() {
                        continue;
                    }
                    metrics::set_subscribed_tokens(scan.tokens.len());
                    if let Err(e) = feed.subscribe(scan.tokens.into_iter().collect()).await {
                        warn!(error = %e, "Could not update subscriptions");
                        break;
                    }
                }
            }
        }
        debug!("Scan loop stopped");
    }

    async fn stats_loop(self: Arc<Self>, feed: FeedHandle) {
        let period = Duration::from_secs(self.config.stats_interval_seconds.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.ready.store(
                        feed.is_connected() && !self.active_pairs().is_empty(),
                        Ordering::SeqCst,
                    );
                    self.cooldowns.prune_at(Instant::now());
                    self.stats.snapshot().log();
                    debug!(
                        ws_messages = feed.messages_received(),
                        cached_prices = self.prices.len(),
                        "Feed status"
                    );
                }
            }
        }
        debug!("Stats loop stopped");
    }

    async fn settlement_loop(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.settlement_interval_seconds.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.executor.check_and_settle_positions().await;
                }
            }
        }
        debug!("Settlement loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::ExecutorSettings;
    use crate::config::tests::TEST_KEY;
    use crate::feed::UpdateKind;
    use crate::market::hierarchy::tests::{event, market};
    use crate::market::{MockDirectory, MockExchange};
    use crate::trading::Side;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    fn config() -> Config {
        Config::from_pairs([
            ("POLYMARKET_PRIVATE_KEY", TEST_KEY),
            ("BALANCE_CACHE_SECONDS", "0"),
        ])
        .unwrap()
    }

    fn btc_events() -> Vec<crate::market::EventRecord> {
        vec![event(
            "BTC price on Friday",
            vec![
                market("Will BTC be above $100,000?", "y100", "n100"),
                market("Will BTC be above $110,000?", "y110", "n110"),
            ],
        )]
    }

    fn bot(exchange: &Arc<MockExchange>, events: Vec<crate::market::EventRecord>) -> Arc<Bot> {
        let config = Arc::new(config());
        let executor = Arc::new(OrderExecutor::new(
            exchange.clone(),
            ExecutorSettings::from_config(&config),
        ));
        Arc::new(Bot::new(
            config,
            Arc::new(MockDirectory::new(events)),
            executor,
            CancellationToken::new(),
        ))
    }

    fn price(token: &str, price: Decimal) -> PriceUpdate {
        PriceUpdate::new(token.to_string(), price, UpdateKind::Book)
    }

    #[tokio::test]
    async fn empty_initial_scan_is_fatal() {
        let exchange = Arc::new(MockExchange::new(dec!(1000)));
        let bot = bot(&exchange, vec![]);

        let err = assert_err!(bot.initial_scan().await);
        assert!(matches!(err, BotError::NoPairsFound));
    }

    #[tokio::test]
    async fn empty_rescan_keeps_previous_pairs() {
        let exchange = Arc::new(MockExchange::new(dec!(1000)));
        let directory = Arc::new(MockDirectory::new(btc_events()));
        let config = Arc::new(config());
        let executor = Arc::new(OrderExecutor::new(
            exchange.clone(),
            ExecutorSettings::from_config(&config),
        ));
        let bot = Bot::new(config, directory.clone(), executor, CancellationToken::new());

        bot.initial_scan().await.unwrap();
        let before = bot.active_pairs();
        directory.set_events(vec![]);
        bot.refresh_pairs().await;

        assert_eq!(directory.calls(), 2);
        assert!(Arc::ptr_eq(&before, &bot.active_pairs()));
        assert_eq!(bot.stats().snapshot().active_pairs, 1);
    }

    #[tokio::test]
    async fn inversion_dispatches_both_legs() {
        let exchange = Arc::new(MockExchange::new(dec!(1000)));
        let bot = bot(&exchange, btc_events());
        let scan = assert_ok!(bot.initial_scan().await);
        assert_eq!(scan.tokens.len(), 4);

        assert_eq!(bot.handle_price_update(price("y100", dec!(0.25))), 0);
        assert_eq!(bot.handle_price_update(price("y110", dec!(0.40))), 1);
        bot.wait_for_trades().await;

        let submitted = exchange.submissions();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].token_id, "y100");
        assert_eq!(submitted[1].token_id, "n110");
        assert!(submitted.iter().all(|o| o.side == Side::Buy));
        // 1% of 1000 = 10 USDC at 0.25
        assert_eq!(submitted[0].size, dec!(40));

        let snap = bot.stats().snapshot();
        assert_eq!(snap.opportunities_found, 1);
        assert_eq!(snap.trades_executed, 1);
        assert_eq!(snap.total_pnl, dec!(6.00));
        assert!(snap.trading_enabled);
    }

    #[tokio::test]
    async fn cooldown_blocks_repeat_until_window_passes() {
        let exchange = Arc::new(MockExchange::new(dec!(1000)));
        let bot = bot(&exchange, btc_events());
        bot.initial_scan().await.unwrap();
        let t0 = Instant::now();

        bot.handle_price_update_at(price("y100", dec!(0.25)), t0);
        assert_eq!(bot.handle_price_update_at(price("y110", dec!(0.40)), t0), 1);
        assert_eq!(
            bot.handle_price_update_at(price("y110", dec!(0.41)), t0 + Duration::from_secs(30)),
            0
        );
        assert_eq!(bot.stats().snapshot().cooldown_skips, 1);

        let later = t0 + Duration::from_secs(61);
        bot.handle_price_update_at(price("y100", dec!(0.25)), later);
        bot.wait_for_trades().await;
        assert_eq!(exchange.submission_count(), 4);
    }

    #[tokio::test]
    async fn stale_leg_is_not_traded() {
        let exchange = Arc::new(MockExchange::new(dec!(1000)));
        let bot = bot(&exchange, btc_events());
        bot.initial_scan().await.unwrap();
        let t0 = Instant::now();

        bot.handle_price_update_at(price("y100", dec!(0.25)), t0);
        let dispatched =
            bot.handle_price_update_at(price("y110", dec!(0.40)), t0 + Duration::from_secs(61));
        bot.wait_for_trades().await;

        assert_eq!(dispatched, 0);
        assert_eq!(exchange.submission_count(), 0);
        assert_eq!(bot.stats().snapshot().stale_skips, 1);

        // Stale skip left the cooldown untouched.
        assert_eq!(
            bot.handle_price_update_at(price("y100", dec!(0.25)), t0 + Duration::from_secs(62)),
            1
        );
    }

    #[tokio::test]
    async fn unverified_balance_counts_a_miss() {
        let exchange = Arc::new(MockExchange::new(dec!(1000)));
        exchange.set_balance_failing(true);
        let bot = bot(&exchange, btc_events());
        bot.initial_scan().await.unwrap();

        bot.handle_price_update(price("y100", dec!(0.25)));
        bot.handle_price_update(price("y110", dec!(0.40)));
        bot.wait_for_trades().await;

        let snap = bot.stats().snapshot();
        assert_eq!(exchange.submission_count(), 0);
        assert_eq!(snap.missed_no_balance, 1);
        // 0.15 * (5 / 0.25)
        assert_eq!(snap.missed_profit, dec!(3.00));
        assert!(!snap.trading_enabled);
        assert_eq!(snap.trades_attempted, 0);
    }

    #[tokio::test]
    async fn low_balance_counts_a_miss() {
        let exchange = Arc::new(MockExchange::new(dec!(3)));
        let bot = bot(&exchange, btc_events());
        bot.initial_scan().await.unwrap();

        bot.handle_price_update(price("y100", dec!(0.25)));
        bot.handle_price_update(price("y110", dec!(0.40)));
        bot.wait_for_trades().await;

        assert_eq!(exchange.submission_count(), 0);
        assert_eq!(bot.stats().snapshot().missed_no_balance, 1);
    }

    #[tokio::test]
    async fn shutdown_reports_session() {
        let exchange = Arc::new(MockExchange::new(dec!(1000)));
        let bot = bot(&exchange, btc_events());
        bot.initial_scan().await.unwrap();
        bot.handle_price_update(price("y100", dec!(0.25)));
        bot.handle_price_update(price("y110", dec!(0.40)));

        let report = bot.shutdown().await;

        assert!(bot.cancel_token().is_cancelled());
        assert_eq!(report.session.price_updates, 2);
        assert_eq!(report.session.trades_executed, 1);
        assert!(report.ledger.is_none());
    }
}
