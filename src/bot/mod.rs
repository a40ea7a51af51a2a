//! Orchestrator module.
//!
//! This module handles:
//! - Directory scans and the atomically swapped pair set
//! - Price-driven detection with cooldown and freshness gates
//! - Balance-gated dispatch of two-leg trades
//! - Periodic stats and settlement, shutdown and the final report

pub mod cooldown;
pub mod engine;
pub mod stats;

pub use cooldown::CooldownTracker;
pub use engine::Bot;
pub use stats::{BotStats, PerformanceReport, StatsSnapshot};
