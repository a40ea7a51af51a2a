//! Open position tracking for settlement.

use std::time::Duration;

use rust_decimal::Decimal;
use time::OffsetDateTime;

/// Shares bought by an arbitrage leg and not yet liquidated.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    /// Token held.
    pub token_id: String,
    /// Transaction that opened the position.
    pub transaction_id: String,
    /// Event the pair belongs to.
    pub event_title: String,
    /// Shares bought.
    pub size: Decimal,
    /// Limit price paid.
    pub entry_price: Decimal,
    pub opened_at: OffsetDateTime,
    /// When the underlying market stops trading, if known.
    pub closes_at: Option<OffsetDateTime>,
    /// Left open by a failed unwind.
    pub unhedged: bool,
}

impl OpenPosition {
    /// Cost basis.
    pub fn cost_basis(&self) -> Decimal {
        self.size * self.entry_price
    }

    /// The market has closed, or its close time is unknown.
    pub fn is_settleable(&self, now: OffsetDateTime) -> bool {
        self.closes_at.map_or(true, |close| close <= now)
    }

    /// Held longer than the retention window.
    pub fn is_expired(&self, now: OffsetDateTime, retention: Duration) -> bool {
        now - self.opened_at >= retention
    }

    /// Key used in the executor's position map.
    pub fn key(&self) -> String {
        format!("{}:{}", self.transaction_id, self.token_id)
    }
}
