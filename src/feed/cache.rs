//! Latest price per token, written by the stream and read by detection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rust_decimal::Decimal;

/// Anything that can answer "what is this token's price right now".
pub trait PriceSource {
    fn price(&self, token_id: &str) -> Option<Decimal>;
}

impl PriceSource for HashMap<String, Decimal> {
    fn price(&self, token_id: &str) -> Option<Decimal> {
        self.get(token_id).copied()
    }
}

/// Cached price and how long ago it was observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub price: Decimal,
    pub age: Duration,
}

/// Last-write-wins price cache. Entries are never evicted; the key space is
/// bounded by the subscribed token universe.
#[derive(Debug, Default)]
pub struct PriceCache {
    prices: DashMap<String, (Decimal, Instant)>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `price` for `token_id` observed now.
    pub fn update(&self, token_id: &str, price: Decimal) {
        self.update_at(token_id, price, Instant::now());
    }

    /// Record `price` observed at `at`. Overwrites unconditionally.
    pub fn update_at(&self, token_id: &str, price: Decimal, at: Instant) {
        self.prices.insert(token_id.to_string(), (price, at));
    }

    pub fn quote(&self, token_id: &str) -> Option<PriceQuote> {
        self.quote_at(token_id, Instant::now())
    }

    /// Price and age relative to `now`.
    pub fn quote_at(&self, token_id: &str, now: Instant) -> Option<PriceQuote> {
        self.prices.get(token_id).map(|entry| {
            let (price, observed_at) = *entry;
            PriceQuote {
                price,
                age: now.saturating_duration_since(observed_at),
            }
        })
    }

    /// Whether `token_id` has a quote no older than `max_age`. Missing counts
    /// as stale.
    pub fn is_fresh(&self, token_id: &str, max_age: Duration) -> bool {
        self.quote(token_id).is_some_and(|q| q.age <= max_age)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl PriceSource for PriceCache {
    fn price(&self, token_id: &str) -> Option<Decimal> {
        self.prices.get(token_id).map(|entry| entry.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn last_write_wins_and_age_is_from_last_write() {
        let cache = PriceCache::new();
        let t1 = Instant::now();
        let t2 = t1 + Duration::from_secs(5);
        let now = t2 + Duration::from_secs(3);

        cache.update_at("t", dec!(0.30), t1);
        cache.update_at("t", dec!(0.35), t2);

        let quote = cache.quote_at("t", now).unwrap();
        assert_eq!(quote.price, dec!(0.35));
        assert_eq!(quote.age, Duration::from_secs(3));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn older_write_after_newer_still_overwrites() {
        let cache = PriceCache::new();
        let t1 = Instant::now();
        cache.update_at("t", dec!(0.5), t1 + Duration::from_secs(10));
        cache.update_at("t", dec!(0.4), t1);

        assert_eq!(cache.price("t"), Some(dec!(0.4)));
    }

    #[test]
    fn unknown_token_is_absent_and_stale() {
        let cache = PriceCache::new();
        assert!(cache.quote("nope").is_none());
        assert!(cache.price("nope").is_none());
        assert!(!cache.is_fresh("nope", Duration::from_secs(60)));
        assert!(cache.is_empty());
    }

    #[test]
    fn freshness_respects_max_age() {
        let cache = PriceCache::new();
        cache.update("fresh", dec!(0.2));
        assert!(cache.is_fresh("fresh", Duration::from_secs(60)));

        if let Some(old) = Instant::now().checked_sub(Duration::from_secs(120)) {
            cache.update_at("old", dec!(0.2), old);
            assert!(!cache.is_fresh("old", Duration::from_secs(60)));
        }
    }
}
