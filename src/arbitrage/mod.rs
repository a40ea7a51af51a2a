//! Arbitrage module for detecting and executing opportunities.
//!
//! This module handles:
//! - Inversion detection across hierarchical pairs
//! - Opportunity model and position sizing
//! - Two-leg execution with compensation and settlement

pub mod calculator;
pub mod detector;
pub mod executor;

pub use calculator::{missed_profit, Opportunity, PairKey, PositionSize, SizingRules};
pub use detector::{detect, widest_gap};
pub use executor::{
    ArbitrageTransaction, BalanceReading, ExecutorSettings, ExecutorStats, LegFill,
    OrderExecutor, SettlementReport, TradeOutcome,
};
