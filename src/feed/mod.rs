//! Live price feed.
//!
//! This module handles:
//! - Typed market channel frames and price extraction
//! - The shared last-write-wins price cache
//! - The streaming client with bounded reconnection

pub mod cache;
pub mod types;
pub mod websocket;

pub use cache::{PriceCache, PriceQuote, PriceSource};
pub use types::{parse_frame, PriceUpdate, UpdateKind, WsEvent, WsLevel, WsPriceChange};
pub use websocket::{FeedHandle, MarketFeed, ReconnectConfig};
