//! Candidate items and the pages a source hands back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A candidate unit fetched from an external source (a reply, a mention, a PR).
///
/// The payload is opaque to the core; only `external_id` and `score` drive
/// behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessableItem {
    /// Stable key used for deduplication
    pub external_id: String,

    /// Collaborator-defined content
    pub payload: serde_json::Value,

    /// When this process first saw the item
    pub discovered_at: DateTime<Utc>,

    /// Optional priority/engagement score (higher runs first)
    #[serde(default)]
    pub score: Option<f64>,
}

impl ProcessableItem {
    /// Create an item with no score, discovered now.
    pub fn new(external_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            external_id: external_id.into(),
            payload,
            discovered_at: Utc::now(),
            score: None,
        }
    }

    /// Attach a priority score.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

/// Opaque paging token handed back by a candidate source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl Cursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Cursor {
    fn from(s: &str) -> Self {
        Cursor(s.to_string())
    }
}

/// Bounded page request.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// Where to resume; `None` fetches the first page
    pub cursor: Option<Cursor>,
    /// Upper bound on items returned
    pub limit: usize,
}

/// One page of candidates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidatePage {
    pub items: Vec<ProcessableItem>,
    /// `None` means the source is exhausted
    pub next_cursor: Option<Cursor>,
}

impl CandidatePage {
    /// A final page with no continuation.
    pub fn last(items: Vec<ProcessableItem>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// Order a fetched page for processing.
///
/// Without scores the source order is kept. With scores, items are stable-sorted
/// by descending score so ties keep arrival order; unscored items sort after
/// every scored one.
pub fn prioritize(items: &mut [ProcessableItem]) {
    if items.iter().all(|i| i.score.is_none()) {
        return;
    }
    // sort_by is stable
    items.sort_by(|a, b| match (a.score, b.score) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(items: &[ProcessableItem]) -> Vec<&str> {
        items.iter().map(|i| i.external_id.as_str()).collect()
    }

    #[test]
    fn test_prioritize_keeps_source_order_without_scores() {
        let mut items = vec![
            ProcessableItem::new("c", json!({})),
            ProcessableItem::new("a", json!({})),
            ProcessableItem::new("b", json!({})),
        ];
        prioritize(&mut items);
        assert_eq!(ids(&items), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_prioritize_descending_score() {
        let mut items = vec![
            ProcessableItem::new("low", json!({})).with_score(1.0),
            ProcessableItem::new("high", json!({})).with_score(10.0),
            ProcessableItem::new("mid", json!({})).with_score(5.0),
        ];
        prioritize(&mut items);
        assert_eq!(ids(&items), vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_prioritize_ties_keep_arrival_order() {
        let mut items = vec![
            ProcessableItem::new("first", json!({})).with_score(3.0),
            ProcessableItem::new("top", json!({})).with_score(9.0),
            ProcessableItem::new("second", json!({})).with_score(3.0),
            ProcessableItem::new("third", json!({})).with_score(3.0),
        ];
        prioritize(&mut items);
        assert_eq!(ids(&items), vec!["top", "first", "second", "third"]);
    }

    #[test]
    fn test_prioritize_unscored_last() {
        let mut items = vec![
            ProcessableItem::new("none", json!({})),
            ProcessableItem::new("scored", json!({})).with_score(0.5),
        ];
        prioritize(&mut items);
        assert_eq!(ids(&items), vec!["scored", "none"]);
    }

    #[test]
    fn test_item_deserializes_without_score() {
        let item: ProcessableItem = serde_json::from_value(json!({
            "external_id": "123",
            "payload": {"text": "quack"},
            "discovered_at": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(item.score, None);
        assert_eq!(item.payload["text"], "quack");
    }
}
