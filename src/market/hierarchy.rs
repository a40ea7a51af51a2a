//! Grouping of threshold markets into parent/child pairs.
//!
//! Within one event, markets that differ only by a numeric threshold are
//! ordered from the loosest condition to the strictest. Every adjacent pair
//! in that order is a [`HierarchicalPair`]: the parent should never be priced
//! below the child.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::threshold::{extract_threshold, question_direction};
use super::types::{Direction, EventRecord, MarketRecord, TokenId, TokenList};
use crate::error::MarketError;

/// A market whose question resolves on a numeric threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdMarket {
    pub question: String,
    pub condition_id: String,
    pub threshold: f64,
    pub direction: Direction,
    pub yes_token: TokenId,
    pub all_tokens: TokenList,
    pub closes_at: Option<OffsetDateTime>,
    pub neg_risk: bool,
}

impl ThresholdMarket {
    /// Derive a threshold market, or say why the record cannot be one.
    pub fn from_record(record: &MarketRecord) -> Result<Self, MarketError> {
        let direction = question_direction(&record.question).ok_or_else(|| {
            MarketError::MalformedMarketData {
                question: record.question.clone(),
                reason: "no above/below direction".to_string(),
            }
        })?;

        let threshold = extract_threshold(&record.question)
            .filter(|t| t.is_finite() && *t >= 0.0)
            .ok_or_else(|| MarketError::MalformedMarketData {
                question: record.question.clone(),
                reason: "no numeric threshold".to_string(),
            })?;

        let yes_token = record.yes_token()?.clone();

        Ok(Self {
            question: record.question.clone(),
            condition_id: record.condition_id.clone(),
            threshold,
            direction,
            yes_token,
            all_tokens: record.tokens.clone(),
            closes_at: record.closes_at,
            neg_risk: record.neg_risk,
        })
    }

    /// Any token of this market other than the YES token.
    pub fn no_token(&self) -> Option<&TokenId> {
        no_token_of(&self.all_tokens, &self.yes_token)
    }
}

/// First token in `all_tokens` that is not `yes_token`.
pub fn no_token_of<'a>(all_tokens: &'a [TokenId], yes_token: &str) -> Option<&'a TokenId> {
    all_tokens.iter().find(|t| t.as_str() != yes_token)
}

/// Loosest-first ordering: ascending thresholds for `above`, descending for
/// `below`.
fn by_strictness(direction: Direction) -> impl Fn(&ThresholdMarket, &ThresholdMarket) -> Ordering {
    move |a, b| {
        let ord = a.threshold.total_cmp(&b.threshold);
        match direction {
            Direction::Above => ord,
            Direction::Below => ord.reverse(),
        }
    }
}

/// Ordered parent/child pair of markets from one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchicalPair {
    pub event_title: String,
    pub direction: Direction,
    pub parent_token_id: TokenId,
    pub child_token_id: TokenId,
    pub parent_all_tokens: TokenList,
    pub child_all_tokens: TokenList,
    pub parent_threshold: f64,
    pub child_threshold: f64,
    pub parent_condition_id: String,
    pub child_condition_id: String,
    /// Earlier of the two markets' close times.
    #[serde(skip)]
    pub closes_at: Option<OffsetDateTime>,
    pub neg_risk: bool,
}

impl HierarchicalPair {
    fn new(event_title: &str, parent: &ThresholdMarket, child: &ThresholdMarket) -> Self {
        let closes_at = match (parent.closes_at, child.closes_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        Self {
            event_title: event_title.to_string(),
            direction: parent.direction,
            parent_token_id: parent.yes_token.clone(),
            child_token_id: child.yes_token.clone(),
            parent_all_tokens: parent.all_tokens.clone(),
            child_all_tokens: child.all_tokens.clone(),
            parent_threshold: parent.threshold,
            child_threshold: child.threshold,
            parent_condition_id: parent.condition_id.clone(),
            child_condition_id: child.condition_id.clone(),
            closes_at,
            neg_risk: parent.neg_risk || child.neg_risk,
        }
    }
}

/// Turn one event into an ordered threshold chain.
///
/// Returns an empty list when the event has fewer than two markets, fewer
/// than two usable threshold markets, or mixes directions.
pub fn group_event(event: &EventRecord) -> Vec<ThresholdMarket> {
    if event.markets.len() < 2 {
        return Vec::new();
    }

    let mut chain: Vec<ThresholdMarket> = Vec::with_capacity(event.markets.len());
    for record in &event.markets {
        if !record.is_tradeable() {
            continue;
        }
        match ThresholdMarket::from_record(record) {
            Ok(market) => chain.push(market),
            Err(e) => debug!(event = %event.title, error = %e, "Skipping market"),
        }
    }

    let Some(direction) = chain.first().map(|m| m.direction) else {
        return Vec::new();
    };

    if chain.iter().any(|m| m.direction != direction) {
        warn!(event = %event.title, "Mixed above/below directions, skipping event");
        return Vec::new();
    }

    if chain.len() < 2 {
        return Vec::new();
    }

    chain.sort_by(by_strictness(direction));
    chain
}

/// Adjacent pairs of an ordered chain: N markets give N-1 pairs.
pub fn build_pairs(event_title: &str, chain: &[ThresholdMarket]) -> Vec<HierarchicalPair> {
    chain
        .windows(2)
        .map(|w| HierarchicalPair::new(event_title, &w[0], &w[1]))
        .collect()
}

/// Result of grouping a whole directory snapshot.
#[derive(Debug, Clone, Default)]
pub struct HierarchyScan {
    /// Events examined.
    pub events_seen: usize,
    /// Events that produced at least one pair.
    pub hierarchies: usize,
    pub pairs: Vec<HierarchicalPair>,
    /// Every token of every paired market, YES and NO.
    pub tokens: BTreeSet<TokenId>,
}

/// Group every event and collect the pairs and token universe.
#[instrument(skip(events), fields(events = events.len()))]
pub fn scan_hierarchies(events: &[EventRecord]) -> HierarchyScan {
    let mut scan = HierarchyScan {
        events_seen: events.len(),
        ..Default::default()
    };

    for event in events {
        let chain = group_event(event);
        if chain.is_empty() {
            continue;
        }

        let pairs = build_pairs(&event.title, &chain);
        debug!(
            event = %event.title,
            markets = chain.len(),
            pairs = pairs.len(),
            "Found hierarchical event"
        );

        for market in &chain {
            scan.tokens.extend(market.all_tokens.iter().cloned());
        }
        scan.hierarchies += 1;
        scan.pairs.extend(pairs);
    }

    info!(
        hierarchies = scan.hierarchies,
        pairs = scan.pairs.len(),
        tokens = scan.tokens.len(),
        "Hierarchy scan complete"
    );

    scan
}
