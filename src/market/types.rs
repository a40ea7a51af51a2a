//! Typed boundary for the market directory API.
//!
//! The directory returns loosely typed JSON: token lists may be native arrays
//! or JSON-encoded strings, prices are strings, most fields are optional.
//! [`GammaEvent`] / [`GammaMarket`] accept all of that, and
//! [`EventRecord`] / [`MarketRecord`] are the validated shapes used inward.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use strum::{Display, EnumString};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::MarketError;

/// Token id on the CLOB.
pub type TokenId = String;

/// Token ids of one binary market. Almost always exactly two.
pub type TokenList = SmallVec<[TokenId; 2]>;

/// Which side of the threshold resolves a market YES.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    /// YES when the underlying ends above the threshold.
    Above,
    /// YES when the underlying ends below the threshold.
    Below,
}

/// Event as returned by `GET /events`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub neg_risk: Option<bool>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    /// Markets that decoded. A malformed entry is dropped, not the event.
    #[serde(default, deserialize_with = "lenient_markets")]
    pub markets: Vec<GammaMarket>,
}

/// Market nested inside a [`GammaEvent`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub neg_risk: Option<bool>,
    /// Token ids, native array or JSON-encoded string.
    #[serde(default, deserialize_with = "string_or_seq")]
    pub clob_token_ids: Vec<String>,
    /// Outcome labels, parallel to `clob_token_ids`.
    #[serde(default, deserialize_with = "string_or_seq")]
    pub outcomes: Vec<String>,
    /// Last traded price per outcome, as strings.
    #[serde(default, deserialize_with = "string_or_seq")]
    pub outcome_prices: Vec<String>,
}

fn lenient_markets<'de, D>(deserializer: D) -> Result<Vec<GammaMarket>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<GammaMarket>(item) {
            Ok(market) => Some(market),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable market");
                None
            }
        })
        .collect())
}

/// Accept `["a","b"]`, `"[\"a\",\"b\"]"`, `"a"`, numbers, or null.
fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.map(flatten_value).unwrap_or_default())
}

fn flatten_value(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.into_iter().filter_map(scalar_to_string).collect(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('[') {
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(Value::Array(items)) => {
                        items.into_iter().filter_map(scalar_to_string).collect()
                    }
                    _ => Vec::new(),
                }
            } else if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        }
        other => scalar_to_string(other).into_iter().collect(),
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse an RFC 3339 timestamp, ignoring anything else (date-only values).
pub fn parse_close_time(raw: Option<&str>) -> Option<OffsetDateTime> {
    raw.and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
}

fn parse_price(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    raw.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(raw).ok())
}

/// One validated binary market.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketRecord {
    pub condition_id: String,
    pub question: String,
    pub tokens: TokenList,
    pub outcomes: SmallVec<[String; 2]>,
    /// Last traded price per outcome, when the directory supplied one.
    pub last_prices: SmallVec<[Option<Decimal>; 2]>,
    pub active: bool,
    pub closed: bool,
    pub closes_at: Option<OffsetDateTime>,
    pub neg_risk: bool,
}

impl MarketRecord {
    /// Whether the market can still be traded.
    pub fn is_tradeable(&self) -> bool {
        self.active && !self.closed
    }

    /// Token whose outcome label is "yes".
    ///
    /// Exactly one label must match and its index must have a token. Anything
    /// else is rejected: guessing would invert the trade direction.
    pub fn yes_token(&self) -> Result<&TokenId, MarketError> {
        let mut matches = self
            .outcomes
            .iter()
            .enumerate()
            .filter(|(_, label)| label.trim().eq_ignore_ascii_case("yes"))
            .map(|(idx, _)| idx);

        let idx = match (matches.next(), matches.next()) {
            (Some(idx), None) => idx,
            (None, _) => return Err(self.malformed("no YES outcome label")),
            (Some(_), Some(_)) => return Err(self.malformed("more than one YES outcome label")),
        };

        self.tokens
            .get(idx)
            .ok_or_else(|| self.malformed("YES label has no matching token"))
    }

    fn malformed(&self, reason: &str) -> MarketError {
        MarketError::MalformedMarketData {
            question: self.question.clone(),
            reason: reason.to_string(),
        }
    }
}

impl TryFrom<GammaMarket> for MarketRecord {
    type Error = MarketError;

    fn try_from(raw: GammaMarket) -> Result<Self, Self::Error> {
        let question = raw.question.unwrap_or_default().trim().to_string();
        if question.is_empty() {
            return Err(MarketError::MalformedMarketData {
                question: "<missing>".to_string(),
                reason: "market has no question text".to_string(),
            });
        }

        if raw.clob_token_ids.is_empty() {
            return Err(MarketError::MalformedMarketData {
                question,
                reason: "no clobTokenIds".to_string(),
            });
        }

        Ok(Self {
            condition_id: raw.condition_id.unwrap_or_default(),
            tokens: raw.clob_token_ids.into_iter().collect(),
            outcomes: raw.outcomes.into_iter().collect(),
            last_prices: raw.outcome_prices.iter().map(|p| parse_price(p)).collect(),
            active: raw.active.unwrap_or(true),
            closed: raw.closed.unwrap_or(false),
            closes_at: parse_close_time(raw.end_date.as_deref()),
            neg_risk: raw.neg_risk.unwrap_or(false),
            question,
        })
    }
}

/// One event and the markets that survived normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub title: String,
    pub closes_at: Option<OffsetDateTime>,
    pub neg_risk: bool,
    pub markets: Vec<MarketRecord>,
}

impl From<GammaEvent> for EventRecord {
    fn from(raw: GammaEvent) -> Self {
        let title = raw
            .title
            .or(raw.slug)
            .unwrap_or_else(|| "Unknown".to_string());
        let closes_at = parse_close_time(raw.end_date.as_deref());
        let event_neg_risk = raw.neg_risk.unwrap_or(false);

        let markets = raw
            .markets
            .into_iter()
            .filter_map(|m| match MarketRecord::try_from(m) {
                Ok(mut record) => {
                    record.neg_risk |= event_neg_risk;
                    if record.closes_at.is_none() {
                        record.closes_at = closes_at;
                    }
                    Some(record)
                }
                Err(e) => {
                    debug!(event = %title, error = %e, "Skipping malformed market");
                    None
                }
            })
            .collect();

        Self {
            title,
            closes_at,
            neg_risk: event_neg_risk,
            markets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn market_json(tokens: Value) -> Value {
        json!({
            "question": "Will BTC be above $100k?",
            "conditionId": "0xabc",
            "active": true,
            "closed": false,
            "clobTokenIds": tokens,
            "outcomes": "[\"Yes\", \"No\"]",
            "outcomePrices": "[\"0.35\", \"0.65\"]"
        })
    }

    #[test]
    fn string_encoded_tokens_parse_like_native_arrays() {
        let native: GammaMarket =
            serde_json::from_value(market_json(json!(["111", "222"]))).unwrap();
        let encoded: GammaMarket =
            serde_json::from_value(market_json(json!("[\"111\", \"222\"]"))).unwrap();

        let native = MarketRecord::try_from(native).unwrap();
        let encoded = MarketRecord::try_from(encoded).unwrap();

        assert_eq!(native, encoded);
        assert_eq!(native.tokens.as_slice(), ["111", "222"]);
        assert_eq!(native.last_prices.as_slice(), [Some(dec!(0.35)), Some(dec!(0.65))]);
    }

    #[test]
    fn mistyped_market_is_dropped_from_its_event() {
        let mut bad = market_json(json!(["333", "444"]));
        bad["active"] = json!("true");
        let event: GammaEvent = serde_json::from_value(json!({
            "title": "Bitcoin above ___",
            "markets": [market_json(json!(["111", "222"])), bad]
        }))
        .unwrap();
        assert_eq!(event.markets.len(), 1);
        assert_eq!(event.markets[0].clob_token_ids, ["111", "222"]);

        let empty: GammaEvent =
            serde_json::from_value(json!({"title": "No markets", "markets": null})).unwrap();
        assert!(empty.markets.is_empty());
    }

    #[test]
    fn missing_fields_default() {
        let raw: GammaMarket = serde_json::from_value(json!({
            "question": "ETH below 2,500?",
            "clobTokenIds": null
        }))
        .unwrap();

        assert!(raw.clob_token_ids.is_empty());
        assert!(raw.outcomes.is_empty());
        assert!(MarketRecord::try_from(raw).is_err());
    }

    #[test]
    fn numeric_token_ids_become_strings() {
        let raw: GammaMarket =
            serde_json::from_value(market_json(json!([111, 222]))).unwrap();
        assert_eq!(raw.clob_token_ids, vec!["111", "222"]);
    }

    #[test]
    fn yes_token_follows_label_not_position() {
        let raw: GammaMarket = serde_json::from_value(json!({
            "question": "q",
            "clobTokenIds": ["no-token", "yes-token"],
            "outcomes": ["No", "YES"]
        }))
        .unwrap();
        let record = MarketRecord::try_from(raw).unwrap();

        assert_eq!(record.yes_token().unwrap(), "yes-token");
    }

    #[test]
    fn missing_or_ambiguous_yes_label_is_rejected() {
        let unlabeled: GammaMarket = serde_json::from_value(json!({
            "question": "q",
            "clobTokenIds": ["a", "b"],
            "outcomes": ["Up", "Down"]
        }))
        .unwrap();
        let doubled: GammaMarket = serde_json::from_value(json!({
            "question": "q",
            "clobTokenIds": ["a", "b"],
            "outcomes": ["Yes", "yes"]
        }))
        .unwrap();
        let short: GammaMarket = serde_json::from_value(json!({
            "question": "q",
            "clobTokenIds": ["a"],
            "outcomes": ["No", "Yes"]
        }))
        .unwrap();

        for raw in [unlabeled, doubled, short] {
            let record = MarketRecord::try_from(raw).unwrap();
            assert!(matches!(
                record.yes_token(),
                Err(MarketError::MalformedMarketData { .. })
            ));
        }
    }

    #[test]
    fn event_normalisation_inherits_event_fields() {
        let raw: GammaEvent = serde_json::from_value(json!({
            "title": "Bitcoin price on Friday",
            "endDate": "2026-01-02T17:00:00Z",
            "negRisk": true,
            "markets": [
                market_json(json!(["1", "2"])),
                {"question": "", "clobTokenIds": ["3", "4"]}
            ]
        }))
        .unwrap();

        let event = EventRecord::from(raw);

        assert_eq!(event.title, "Bitcoin price on Friday");
        assert_eq!(event.markets.len(), 1);
        assert!(event.markets[0].neg_risk);
        assert_eq!(event.markets[0].closes_at, event.closes_at);
        assert!(event.closes_at.is_some());
    }

    #[test]
    fn direction_round_trips_through_strings() {
        use std::str::FromStr;
        assert_eq!(Direction::from_str("above").unwrap(), Direction::Above);
        assert_eq!(Direction::Below.to_string(), "below");
    }
}
