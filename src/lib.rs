//! Hierarchical threshold-market arbitrage bot for Polymarket.
//!
//! Events such as "Bitcoin price on Friday" list several markets on the same
//! underlying at different thresholds. Within one direction the markets are
//! nested: if BTC ends above $110k it also ends above $100k, so the stricter
//! (child) market can never be worth more than the looser (parent) one.
//!
//! # Strategy
//!
//! When the child trades above the parent, buy the parent YES and the child
//! NO. At least one leg pays $1.00 in every outcome:
//!
//! ```text
//! BTC above $100k YES:  $0.25   (easy leg)
//! BTC above $110k NO:   $0.60   (1 - 0.40, hard leg)
//! ─────────────────────────────
//! Total:                $0.85 < $1.00
//! Margin:               $0.15 per share
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`market`]: Directory discovery, threshold grouping, Polymarket client
//! - [`feed`]: Streaming prices and the price cache
//! - [`arbitrage`]: Inversion detection, sizing, two-leg execution
//! - [`trading`]: Order types, order APIs, positions, transaction ledger
//! - [`bot`]: Orchestrator loops and reporting
//! - [`api`]: HTTP API for health/metrics
//! - [`metrics`]: Prometheus metrics
//! - [`signing`]: Wallet signing helpers
//! - [`utils`]: Utility functions

pub mod api;
pub mod arbitrage;
pub mod bot;
pub mod config;
pub mod error;
pub mod feed;
pub mod market;
pub mod metrics;
pub mod signing;
pub mod trading;
pub mod utils;

pub use config::Config;
pub use error::{BotError, Result};
