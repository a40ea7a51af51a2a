//! Arbitrage opportunity detection.

use rust_decimal::Decimal;
use tracing::{debug, instrument};

use super::calculator::Opportunity;
use crate::feed::PriceSource;
use crate::market::hierarchy::HierarchicalPair;

/// Price lies in the probability range.
fn in_unit_range(price: Decimal) -> bool {
    price >= Decimal::ZERO && price <= Decimal::ONE
}

/// Scan every pair for a child priced above its parent.
///
/// Pure: reads `prices` and returns opportunities sorted by profit margin,
/// best first. Pairs with a missing or out-of-range price are skipped.
#[instrument(level = "debug", skip_all, fields(pairs = pairs.len()))]
pub fn detect<P>(pairs: &[HierarchicalPair], prices: &P, min_profit: Decimal) -> Vec<Opportunity>
where
    P: PriceSource + ?Sized,
{
    let mut opportunities: Vec<Opportunity> = pairs
        .iter()
        .filter_map(|pair| {
            let easy = prices.price(&pair.parent_token_id)?;
            let hard = prices.price(&pair.child_token_id)?;

            if !in_unit_range(easy) || !in_unit_range(hard) {
                debug!(
                    event = %pair.event_title,
                    easy = %easy,
                    hard = %hard,
                    "Price outside [0, 1], skipping pair"
                );
                return None;
            }

            (hard - easy >= min_profit).then(|| Opportunity::from_pair(pair, easy, hard))
        })
        .collect();

    opportunities.sort_by(|a, b| b.profit_margin.cmp(&a.profit_margin));
    opportunities
}

/// Largest child-minus-parent gap among pairs with both prices known.
///
/// Used for diagnostics when nothing clears `min_profit`.
pub fn widest_gap<P>(pairs: &[HierarchicalPair], prices: &P) -> Option<Decimal>
where
    P: PriceSource + ?Sized,
{
    pairs
        .iter()
        .filter_map(|pair| {
            let easy = prices.price(&pair.parent_token_id)?;
            let hard = prices.price(&pair.child_token_id)?;
            Some(hard - easy)
        })
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::calculator::tests::pair;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn prices(entries: &[(&str, Decimal)]) -> HashMap<String, Decimal> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn inverted_pair_is_reported() {
        let pairs = vec![pair("BTC", "p", "c")];
        let found = detect(&pairs, &prices(&[("p", dec!(0.05)), ("c", dec!(0.15))]), dec!(0.02));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].profit_margin, dec!(0.10));
        assert_eq!(found[0].profit_pct.round_dp(2), dec!(66.67));
        assert_eq!(found[0].easy_token_id, "p");
        assert_eq!(found[0].hard_token_id, "c");
    }

    #[test]
    fn correctly_priced_pair_is_ignored() {
        let pairs = vec![pair("BTC", "p", "c")];

        for (parent, child) in [(dec!(0.60), dec!(0.40)), (dec!(0.30), dec!(0.30))] {
            let found = detect(&pairs, &prices(&[("p", parent), ("c", child)]), dec!(0.02));
            assert!(found.is_empty());
        }
    }

    #[test]
    fn margin_below_minimum_is_ignored() {
        let pairs = vec![pair("BTC", "p", "c")];
        let found = detect(&pairs, &prices(&[("p", dec!(0.30)), ("c", dec!(0.31))]), dec!(0.02));
        assert!(found.is_empty());

        let exact = detect(&pairs, &prices(&[("p", dec!(0.30)), ("c", dec!(0.32))]), dec!(0.02));
        assert_eq!(exact.len(), 1);
    }

    #[test]
    fn missing_or_insane_prices_skip_the_pair() {
        let pairs = vec![pair("BTC", "p", "c")];

        assert!(detect(&pairs, &prices(&[("p", dec!(0.05))]), dec!(0.02)).is_empty());
        assert!(detect(&pairs, &prices(&[("p", dec!(0.05)), ("c", dec!(1.5))]), dec!(0.02)).is_empty());
        assert!(detect(&pairs, &prices(&[("p", dec!(-0.1)), ("c", dec!(0.5))]), dec!(0.02)).is_empty());
    }

    #[test]
    fn results_are_sorted_by_margin() {
        let pairs = vec![
            pair("A", "a1", "a2"),
            pair("B", "b1", "b2"),
            pair("C", "c1", "c2"),
        ];
        let book = prices(&[
            ("a1", dec!(0.10)),
            ("a2", dec!(0.15)),
            ("b1", dec!(0.10)),
            ("b2", dec!(0.40)),
            ("c1", dec!(0.20)),
            ("c2", dec!(0.30)),
        ]);

        let margins: Vec<Decimal> = detect(&pairs, &book, dec!(0.02))
            .iter()
            .map(|o| o.profit_margin)
            .collect();
        assert_eq!(margins, vec![dec!(0.30), dec!(0.10), dec!(0.05)]);
    }

    #[test]
    fn widest_gap_reports_best_near_miss() {
        let pairs = vec![pair("A", "a1", "a2"), pair("B", "b1", "b2")];
        let book = prices(&[
            ("a1", dec!(0.50)),
            ("a2", dec!(0.40)),
            ("b1", dec!(0.30)),
            ("b2", dec!(0.31)),
        ]);

        assert_eq!(widest_gap(&pairs, &book), Some(dec!(0.01)));
        assert_eq!(widest_gap(&pairs, &prices(&[])), None);
    }
}
