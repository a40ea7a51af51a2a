//! Threshold and direction extraction from market question text.

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::Direction;

/// First number in the question, optionally followed by a `k` suffix.
static THRESHOLD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*(k?)(?:[\s?!.)]|$)").expect("threshold pattern is valid")
});

const ABOVE_WORDS: [&str; 5] = ["above", "over", "more than", "exceed", "higher"];
const BELOW_WORDS: [&str; 4] = ["below", "under", "less than", "lower"];

/// Extract the numeric threshold from a market question.
///
/// Currency symbols and thousands separators are ignored. A `k` suffix
/// multiplies by 1000 only when the bare value is below 1000, so `100k`
/// becomes 100000 while `1500k` is left as 1500.
pub fn extract_threshold(question: &str) -> Option<f64> {
    let clean = question.replace(['$', ','], "").to_lowercase();
    let caps = THRESHOLD_PATTERN.captures(&clean)?;

    let mut value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let has_k = caps.get(2).is_some_and(|m| !m.as_str().is_empty());
    if has_k && value < 1000.0 {
        value *= 1000.0;
    }

    Some(value)
}

/// Classify a question as an above- or below-threshold market.
///
/// Above keywords win when both kinds appear.
pub fn question_direction(question: &str) -> Option<Direction> {
    let lower = question.to_lowercase();
    if ABOVE_WORDS.iter().any(|w| lower.contains(w)) {
        Some(Direction::Above)
    } else if BELOW_WORDS.iter().any(|w| lower.contains(w)) {
        Some(Direction::Below)
    } else {
        None
    }
}
