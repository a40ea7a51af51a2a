//! Opportunity model and position sizing.

use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

use crate::config::Config;
use crate::error::ArbitrageError;
use crate::market::hierarchy::HierarchicalPair;
use crate::market::types::{TokenId, TokenList};

/// A detected pricing inversion between a parent and its stricter child.
///
/// Strategy: buy the easy (parent) YES and buy the hard (child) NO. If the
/// hard condition resolves YES the easy one does too, so at least one leg
/// pays out, and the combined cost is below 1 whenever the child is priced
/// above the parent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    pub event_title: String,
    /// YES token of the parent.
    pub easy_token_id: TokenId,
    /// YES token of the child.
    pub hard_token_id: TokenId,
    pub easy_all_tokens: TokenList,
    pub hard_all_tokens: TokenList,
    pub easy_price: Decimal,
    pub hard_price: Decimal,
    /// hard_price - easy_price.
    pub profit_margin: Decimal,
    /// profit_margin / hard_price * 100.
    pub profit_pct: Decimal,
    pub hard_condition_id: String,
    pub neg_risk: bool,
    #[serde(skip)]
    pub closes_at: Option<OffsetDateTime>,
}

impl Opportunity {
    /// Build from a pair and the two observed YES prices.
    pub fn from_pair(pair: &HierarchicalPair, easy_price: Decimal, hard_price: Decimal) -> Self {
        let profit_margin = hard_price - easy_price;
        let profit_pct = if hard_price > Decimal::ZERO {
            profit_margin / hard_price * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        Self {
            event_title: pair.event_title.clone(),
            easy_token_id: pair.parent_token_id.clone(),
            hard_token_id: pair.child_token_id.clone(),
            easy_all_tokens: pair.parent_all_tokens.clone(),
            hard_all_tokens: pair.child_all_tokens.clone(),
            easy_price,
            hard_price,
            profit_margin,
            profit_pct,
            hard_condition_id: pair.child_condition_id.clone(),
            neg_risk: pair.neg_risk,
            closes_at: pair.closes_at,
        }
    }

    /// Price of the hard market's NO outcome.
    pub fn hard_no_price(&self) -> Decimal {
        Decimal::ONE - self.hard_price
    }

    /// Combined cost of one share of each leg at the observed prices.
    pub fn pair_cost(&self) -> Decimal {
        self.easy_price + self.hard_no_price()
    }

    /// Cooldown key for this opportunity.
    pub fn key(&self) -> PairKey {
        PairKey {
            event_title: self.event_title.clone(),
            easy_token_id: self.easy_token_id.clone(),
            hard_token_id: self.hard_token_id.clone(),
        }
    }
}

/// Identity of a tradeable pair for cooldown purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub event_title: String,
    pub easy_token_id: TokenId,
    pub hard_token_id: TokenId,
}

/// Result of sizing one trade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSize {
    /// USDC committed to the easy leg.
    pub usdc: Decimal,
    /// Shares bought on each leg.
    pub shares: Decimal,
    /// Cost of both legs at the observed prices.
    pub total_cost: Decimal,
}

/// Balance-proportional sizing with a floor and a cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingRules {
    pub fraction: Decimal,
    pub min_trade: Decimal,
    pub max_trade: Decimal,
    pub buffer: Decimal,
}

impl SizingRules {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fraction: config.position_fraction,
            min_trade: config.min_trade_usdc,
            max_trade: config.max_trade_usdc,
            buffer: config.balance_buffer,
        }
    }

    /// Size a trade from the current balance.
    ///
    /// `usdc = min(balance * fraction, max_trade)`, raised to `min_trade` when
    /// the balance allows it. Both legs together must fit in
    /// `balance * buffer`.
    pub fn size_position(
        &self,
        balance: Decimal,
        opportunity: &Opportunity,
    ) -> Result<PositionSize, ArbitrageError> {
        if opportunity.easy_price <= Decimal::ZERO {
            return Err(ArbitrageError::InvalidSize(opportunity.easy_price));
        }

        let mut usdc = (balance * self.fraction).min(self.max_trade);
        if usdc < self.min_trade {
            if balance < self.min_trade {
                return Err(ArbitrageError::BelowMinimumTrade {
                    available: balance,
                    minimum: self.min_trade,
                });
            }
            usdc = self.min_trade;
        }

        let shares = usdc / opportunity.easy_price;
        if shares <= Decimal::ZERO {
            return Err(ArbitrageError::InvalidSize(shares));
        }

        let total_cost = shares * opportunity.easy_price + shares * opportunity.hard_no_price();
        let limit = balance * self.buffer;
        if total_cost > limit {
            return Err(ArbitrageError::InsufficientBalance {
                required: total_cost,
                available: limit,
            });
        }

        Ok(PositionSize {
            usdc,
            shares,
            total_cost,
        })
    }
}

/// Estimated profit missed when an opportunity could not be traded.
pub fn missed_profit(opportunity: &Opportunity, min_trade: Decimal) -> Decimal {
    if opportunity.easy_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    opportunity.profit_margin * (min_trade / opportunity.easy_price)
}
