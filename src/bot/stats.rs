//! Session counters and the performance report.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info};

use crate::arbitrage::{ArbitrageTransaction, ExecutorStats};
use crate::error::ExecutionError;
use crate::trading::LedgerSummary;

/// Counters shared by every orchestrator task.
#[derive(Debug)]
pub struct BotStats {
    started_at: Instant,
    price_updates: AtomicU64,
    opportunities_found: AtomicU64,
    trades_attempted: AtomicU64,
    trades_executed: AtomicU64,
    trades_failed: AtomicU64,
    compensations: AtomicU64,
    exposures: AtomicU64,
    cooldown_skips: AtomicU64,
    stale_skips: AtomicU64,
    missed_no_balance: AtomicU64,
    active_pairs: AtomicUsize,
    trading_enabled: AtomicBool,
    total_pnl: Mutex<Decimal>,
    missed_profit: Mutex<Decimal>,
}

impl Default for BotStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BotStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            price_updates: AtomicU64::new(0),
            opportunities_found: AtomicU64::new(0),
            trades_attempted: AtomicU64::new(0),
            trades_executed: AtomicU64::new(0),
            trades_failed: AtomicU64::new(0),
            compensations: AtomicU64::new(0),
            exposures: AtomicU64::new(0),
            cooldown_skips: AtomicU64::new(0),
            stale_skips: AtomicU64::new(0),
            missed_no_balance: AtomicU64::new(0),
            active_pairs: AtomicUsize::new(0),
            trading_enabled: AtomicBool::new(false),
            total_pnl: Mutex::new(Decimal::ZERO),
            missed_profit: Mutex::new(Decimal::ZERO),
        }
    }

    pub fn record_price_update(&self) {
        self.price_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_opportunities(&self, count: usize) {
        self.opportunities_found
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_cooldown_skip(&self) {
        self.cooldown_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_skip(&self) {
        self.stale_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.trades_attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one execution result into the counters and session P&L.
    pub fn record_execution(&self, result: &Result<ArbitrageTransaction, ExecutionError>) {
        match result {
            Ok(tx) => {
                self.trades_executed.fetch_add(1, Ordering::Relaxed);
                self.add_pnl(tx.expected_profit());
            }
            Err(ExecutionError::Leg2Failed { realized_loss, .. }) => {
                self.trades_failed.fetch_add(1, Ordering::Relaxed);
                self.compensations.fetch_add(1, Ordering::Relaxed);
                self.add_pnl(-*realized_loss);
            }
            Err(e) if e.is_exposure() => {
                self.trades_failed.fetch_add(1, Ordering::Relaxed);
                self.exposures.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.trades_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Count a trade skipped for lack of usable balance. Returns the running
    /// miss count.
    pub fn record_missed(&self, estimated_profit: Decimal) -> u64 {
        *self
            .missed_profit
            .lock()
            .unwrap_or_else(|e| e.into_inner()) += estimated_profit;
        self.missed_no_balance.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn set_active_pairs(&self, count: usize) {
        self.active_pairs.store(count, Ordering::Relaxed);
    }

    pub fn set_trading_enabled(&self, enabled: bool) {
        self.trading_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn add_pnl(&self, amount: Decimal) {
        *self.total_pnl.lock().unwrap_or_else(|e| e.into_inner()) += amount;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_seconds: self.uptime().as_secs(),
            price_updates: self.price_updates.load(Ordering::Relaxed),
            opportunities_found: self.opportunities_found.load(Ordering::Relaxed),
            trades_attempted: self.trades_attempted.load(Ordering::Relaxed),
            trades_executed: self.trades_executed.load(Ordering::Relaxed),
            trades_failed: self.trades_failed.load(Ordering::Relaxed),
            compensations: self.compensations.load(Ordering::Relaxed),
            exposures: self.exposures.load(Ordering::Relaxed),
            cooldown_skips: self.cooldown_skips.load(Ordering::Relaxed),
            stale_skips: self.stale_skips.load(Ordering::Relaxed),
            missed_no_balance: self.missed_no_balance.load(Ordering::Relaxed),
            active_pairs: self.active_pairs.load(Ordering::Relaxed),
            trading_enabled: self.trading_enabled.load(Ordering::Relaxed),
            total_pnl: *self.total_pnl.lock().unwrap_or_else(|e| e.into_inner()),
            missed_profit: *self.missed_profit.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

/// Point-in-time copy of [`BotStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_seconds: u64,
    pub price_updates: u64,
    pub opportunities_found: u64,
    pub trades_attempted: u64,
    pub trades_executed: u64,
    pub trades_failed: u64,
    pub compensations: u64,
    pub exposures: u64,
    pub cooldown_skips: u64,
    pub stale_skips: u64,
    pub missed_no_balance: u64,
    pub active_pairs: usize,
    pub trading_enabled: bool,
    pub total_pnl: Decimal,
    pub missed_profit: Decimal,
}

impl StatsSnapshot {
    /// One-line periodic summary.
    pub fn log(&self) {
        info!(
            uptime_s = self.uptime_seconds,
            price_updates = self.price_updates,
            opportunities = self.opportunities_found,
            executed = self.trades_executed,
            failed = self.trades_failed,
            pnl = %self.total_pnl,
            missed = self.missed_no_balance,
            active_pairs = self.active_pairs,
            "Bot stats"
        );
    }
}

/// Session results plus the historical ledger.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub session: StatsSnapshot,
    pub open_positions: usize,
    pub unhedged_positions: usize,
    pub ledger: Option<LedgerSummary>,
}

impl PerformanceReport {
    pub fn new(
        session: StatsSnapshot,
        executor: ExecutorStats,
        ledger: Option<LedgerSummary>,
    ) -> Self {
        Self {
            session,
            open_positions: executor.open_positions,
            unhedged_positions: executor.unhedged_positions,
            ledger,
        }
    }

    pub fn log(&self, dry_run: bool) {
        let s = &self.session;
        let minutes = Decimal::from(s.uptime_seconds) / Decimal::from(60);

        info!("========================================");
        info!("PERFORMANCE REPORT");
        info!("========================================");
        info!("Mode: {}", if dry_run { "SIMULATION" } else { "LIVE TRADING" });
        info!("Session duration: {} min", minutes.round_dp(1));
        info!("Price updates: {}", s.price_updates);
        info!("Opportunities found: {}", s.opportunities_found);
        info!("Trades attempted: {}", s.trades_attempted);
        info!("Trades executed: {}", s.trades_executed);
        info!("Compensated: {}", s.compensations);
        info!("Session P&L: ${}", s.total_pnl.round_dp(4));
        info!("Missed (no balance): {} (~${})", s.missed_no_balance, s.missed_profit.round_dp(2));
        info!("Open positions: {}", self.open_positions);

        if let Some(ledger) = &self.ledger {
            info!("----------------------------------------");
            info!("Ledger: {}", ledger.path);
            info!("Total transactions: {}", ledger.total_transactions);
            info!("Success rate: {}%", ledger.success_rate_pct.round_dp(1));
            info!("Estimated total profit: ${}", ledger.estimated_total_profit.round_dp(4));
            info!("Average per trade: ${}", ledger.avg_profit_per_trade.round_dp(4));
        }

        if s.exposures > 0 || self.unhedged_positions > 0 {
            error!(
                exposures = s.exposures,
                unhedged_positions = self.unhedged_positions,
                "CRITICAL: unresolved exposure remains, manual intervention required"
            );
        }
        info!("========================================");
    }
}
