//! Market module for hierarchical threshold markets.
//!
//! This module handles:
//! - Typed directory records and their normalised form
//! - Threshold extraction and hierarchy grouping
//! - Market directory discovery
//! - Polymarket CLOB client
//! - Mock exchange and directory for testing

pub mod client;
pub mod discovery;
pub mod hierarchy;
pub mod mock;
pub mod threshold;
pub mod types;

pub use client::PolymarketClient;
pub use discovery::{GammaDirectory, MarketDirectory};
pub use hierarchy::{scan_hierarchies, HierarchicalPair, HierarchyScan, ThresholdMarket};
pub use mock::{MockDirectory, MockExchange};
pub use threshold::{extract_threshold, question_direction};
pub use types::{Direction, EventRecord, MarketRecord, TokenId, TokenList};
