//! Market channel frames and the price updates derived from them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::WsError;
use crate::market::types::TokenId;

/// One book level. The channel sends objects; some payloads use pairs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WsLevel {
    Object { price: String, size: String },
    Pair(String, String),
}

impl WsLevel {
    /// Parse price to Decimal.
    pub fn price_decimal(&self) -> Option<Decimal> {
        match self {
            WsLevel::Object { price, .. } | WsLevel::Pair(price, _) => price.parse().ok(),
        }
    }

    /// Parse size to Decimal.
    pub fn size_decimal(&self) -> Option<Decimal> {
        match self {
            WsLevel::Object { size, .. } | WsLevel::Pair(_, size) => size.parse().ok(),
        }
    }
}

/// Entry of a `price_change` frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsPriceChange {
    pub asset_id: Option<String>,
    pub price: Option<String>,
    pub size: Option<String>,
    /// "BUY" or "SELL".
    pub side: Option<String>,
    pub best_bid: Option<String>,
    pub best_ask: Option<String>,
    pub hash: Option<String>,
}

impl WsPriceChange {
    /// Best bid if reported, else the price of a live BUY level.
    fn observed_price(&self) -> Option<Decimal> {
        if let Some(bid) = self.best_bid.as_deref().and_then(|b| b.parse().ok()) {
            return Some(bid);
        }

        let is_buy = self
            .side
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("BUY"));
        let size: Decimal = self.size.as_deref()?.parse().ok()?;
        if is_buy && size > Decimal::ZERO {
            self.price.as_deref()?.parse().ok()
        } else {
            None
        }
    }
}

/// Frame from the market channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsEvent {
    /// "book", "price_change", "last_trade_price", ...
    pub event_type: Option<String>,
    pub asset_id: Option<String>,
    /// Condition id of the market.
    pub market: Option<String>,
    pub bids: Option<Vec<WsLevel>>,
    pub asks: Option<Vec<WsLevel>>,
    /// Older frames call this `changes`.
    #[serde(alias = "changes")]
    pub price_changes: Option<Vec<WsPriceChange>>,
    pub hash: Option<String>,
}

impl WsEvent {
    /// Price updates carried by this frame, out-of-range prices dropped.
    pub fn price_updates(&self) -> Vec<PriceUpdate> {
        let mut updates = Vec::new();

        match self.event_type.as_deref() {
            Some("book") => {
                let best_bid = self
                    .bids
                    .iter()
                    .flatten()
                    .filter(|level| level.size_decimal().is_some_and(|s| s > Decimal::ZERO))
                    .filter_map(WsLevel::price_decimal)
                    .max();
                if let (Some(asset_id), Some(price)) = (&self.asset_id, best_bid) {
                    updates.push(PriceUpdate::new(asset_id.clone(), price, UpdateKind::Book));
                }
            }
            Some("price_change") => {
                for change in self.price_changes.iter().flatten() {
                    let Some(asset_id) = change.asset_id.as_ref().or(self.asset_id.as_ref())
                    else {
                        continue;
                    };
                    if let Some(price) = change.observed_price() {
                        updates.push(PriceUpdate::new(
                            asset_id.clone(),
                            price,
                            UpdateKind::PriceChange,
                        ));
                    }
                }
            }
            _ => {}
        }

        updates.retain(|u| u.price >= Decimal::ZERO && u.price <= Decimal::ONE);
        updates
    }
}

/// Frames arrive as a single object or an array of them.
pub fn parse_frame(text: &str) -> Result<Vec<WsEvent>, WsError> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| WsError::ParseError(e.to_string()))
    } else {
        serde_json::from_str(trimmed)
            .map(|event| vec![event])
            .map_err(|e| WsError::ParseError(e.to_string()))
    }
}

/// Which frame type produced an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UpdateKind {
    Book,
    PriceChange,
}

/// Latest observed price of one token.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    pub token_id: TokenId,
    pub price: Decimal,
    pub kind: UpdateKind,
}

impl PriceUpdate {
    pub fn new(token_id: TokenId, price: Decimal, kind: UpdateKind) -> Self {
        Self {
            token_id,
            price,
            kind,
        }
    }
}

/// Subscription message for the market channel.
#[derive(Debug, Serialize)]
pub struct SubscribeMessage<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub assets_ids: &'a [TokenId],
}

impl<'a> SubscribeMessage<'a> {
    pub fn market(assets_ids: &'a [TokenId]) -> Self {
        Self {
            msg_type: "market",
            assets_ids,
        }
    }
}
