//! Raw listing records and per-category reconciliation
//!
//! The scraping layer hands over one list of loosely-structured records per
//! category. The same product routinely appears several times within a
//! category (grid and carousel layouts overlap), and some records are scraper
//! artifacts with a tracking id captured in place of the product name. The
//! reconciler collapses each category to at most one record per canonical
//! catalog id, keeping the most information-complete record for each id.

use std::collections::{BTreeMap, HashMap};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extract::parse_catalog_id;

lazy_static! {
    /// Known scraper failure mode: a session/tracking id of three
    /// whitespace-separated integers captured as the product name. Kept as
    /// the literal historical pattern; regression tests pin it down.
    static ref ARTIFACT_NAME_RE: Regex = Regex::new(r"^\d+\s+\d+\s+\d+").unwrap();
}

/// One scraped listing as delivered by the extraction layer.
///
/// Field presence varies by source and page layout, so every known field is
/// optional. Fields outside the known vocabulary are preserved verbatim in
/// `extra` so nothing harvested is lost across the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawListingRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discounted_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_count: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_change: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_prime: Option<bool>,
    /// Fields outside the known vocabulary, preserved for forward
    /// compatibility.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RawListingRecord {
    /// Number of populated fields, the completeness proxy used when two
    /// records share a canonical id. Counts typed fields that are present
    /// plus every preserved extra field.
    pub fn populated_field_count(&self) -> usize {
        let typed = [
            self.product_name.is_some(),
            self.product_id.is_some(),
            self.product_link.is_some(),
            self.discounted_price.is_some(),
            self.actual_price.is_some(),
            self.rating.is_some(),
            self.review_count.is_some(),
            self.percent_change.is_some(),
            self.is_prime.is_some(),
        ];
        typed.iter().filter(|&&p| p).count() + self.extra.len()
    }

    /// True when the product name is a known scraper artifact (a captured
    /// session id) rather than a real title.
    fn has_artifact_name(&self) -> bool {
        self.product_name
            .as_deref()
            .is_some_and(|name| ARTIFACT_NAME_RE.is_match(name))
    }
}

/// A raw record that survived reconciliation, enriched with the
/// deduplication key and the category it was observed under.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRecord {
    pub canonical_id: String,
    pub category: String,
    pub raw: RawListingRecord,
}

/// Collapse one category's raw records to at most one record per canonical
/// catalog id.
///
/// Records without a usable product name (absent, empty, or the artifact
/// pattern) or without a resolvable catalog id are dropped. Within a group
/// sharing an id, the record with strictly the most populated fields wins;
/// on equal counts the first-seen record is kept. Output order is the
/// first-seen order of canonical ids, so reconciliation is deterministic and
/// idempotent. An empty input yields an empty output, not an error.
pub fn reconcile(category: &str, records: &[RawListingRecord]) -> Vec<ReconciledRecord> {
    let mut kept: Vec<ReconciledRecord> = Vec::new();
    let mut index_by_id: HashMap<String, usize> = HashMap::new();
    let mut dropped = 0usize;

    for record in records {
        let name_ok = record
            .product_name
            .as_deref()
            .is_some_and(|name| !name.is_empty());
        if !name_ok || record.has_artifact_name() {
            dropped += 1;
            continue;
        }

        let id_text = record
            .product_id
            .as_deref()
            .or(record.product_link.as_deref())
            .unwrap_or("");
        let canonical_id = match parse_catalog_id(id_text) {
            Some(id) if !id.is_empty() => id,
            _ => {
                dropped += 1;
                continue;
            }
        };

        match index_by_id.get(&canonical_id) {
            Some(&pos) => {
                // Strictly-greater keeps the first-seen record on ties.
                if record.populated_field_count() > kept[pos].raw.populated_field_count() {
                    kept[pos].raw = record.clone();
                }
            }
            None => {
                index_by_id.insert(canonical_id.clone(), kept.len());
                kept.push(ReconciledRecord {
                    canonical_id,
                    category: category.to_string(),
                    raw: record.clone(),
                });
            }
        }
    }

    debug!(
        category,
        input = records.len(),
        kept = kept.len(),
        dropped,
        "reconciled category"
    );
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, id: &str) -> RawListingRecord {
        RawListingRecord {
            product_name: Some(name.to_string()),
            product_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_drops_nameless_and_artifact_records() {
        let records = vec![
            RawListingRecord {
                product_id: Some("B001ABCDEF".to_string()),
                ..Default::default()
            },
            RawListingRecord {
                product_name: Some(String::new()),
                product_id: Some("B001ABCDEF".to_string()),
                ..Default::default()
            },
            named("123 456 789", "B001ABCDEF"),
        ];

        assert!(reconcile("Books", &records).is_empty());
    }

    #[test]
    fn test_artifact_pattern_is_literal() {
        // Two integers are not the artifact; a real title is untouched.
        let out = reconcile(
            "Books",
            &[
                named("123 456", "B001ABCDEF"),
                named("1984 by George Orwell", "B002ABCDEF"),
            ],
        );
        assert_eq!(out.len(), 2);

        // A third integer anywhere after two more makes it an artifact.
        let out = reconcile("Books", &[named("12 34 56 widget", "B003ABCDEF")]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_id_resolution_prefers_product_id_then_link() {
        let from_link = RawListingRecord {
            product_name: Some("Widget".to_string()),
            product_link: Some("https://example.com/w/dp/B00LINK123/ref=x".to_string()),
            ..Default::default()
        };
        let out = reconcile("Gadgets", &[from_link]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].canonical_id, "B00LINK123");
        assert_eq!(out[0].category, "Gadgets");
    }

    #[test]
    fn test_drops_record_without_resolvable_id() {
        let record = RawListingRecord {
            product_name: Some("Widget".to_string()),
            ..Default::default()
        };
        assert!(reconcile("Gadgets", &[record]).is_empty());
    }

    #[test]
    fn test_most_complete_record_wins() {
        let sparse = named("Widget", "B001ABCDEF");
        let mut rich = sparse.clone();
        rich.discounted_price = Some("$9.99".to_string());
        rich.rating = Some("4.5 out of 5 stars".to_string());

        // Richer record replaces the sparse one regardless of order.
        let out = reconcile("Books", &[sparse.clone(), rich.clone()]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].raw, rich);

        let out = reconcile("Books", &[rich.clone(), sparse]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].raw, rich);
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let mut first = named("Widget", "B001ABCDEF");
        first.rating = Some("4.0".to_string());
        let mut second = named("Widget v2", "B001ABCDEF");
        second.review_count = Some("12".to_string());
        assert_eq!(
            first.populated_field_count(),
            second.populated_field_count()
        );

        let out = reconcile("Books", &[first.clone(), second]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].raw, first);
    }

    #[test]
    fn test_output_order_is_first_seen() {
        let out = reconcile(
            "Books",
            &[
                named("A", "B00A000001"),
                named("B", "B00B000001"),
                named("A again", "B00A000001"),
            ],
        );
        let ids: Vec<&str> = out.iter().map(|r| r.canonical_id.as_str()).collect();
        assert_eq!(ids, vec!["B00A000001", "B00B000001"]);
    }

    #[test]
    fn test_idempotent() {
        let records = vec![
            named("A", "B00A000001"),
            named("B", "B00B000001"),
            named("A richer", "B00A000001"),
        ];
        let first = reconcile("Books", &records);
        let second = reconcile("Books", &records);
        assert_eq!(first, second);
    }

    #[test]
    fn test_extra_fields_count_toward_completeness() {
        let sparse = named("Widget", "B001ABCDEF");
        let mut rich = named("Widget", "B001ABCDEF");
        rich.extra.insert(
            "badge".to_string(),
            serde_json::Value::String("Amazon's Choice".to_string()),
        );

        let out = reconcile("Books", &[sparse, rich.clone()]);
        assert_eq!(out[0].raw, rich);
    }

    #[test]
    fn test_unknown_fields_survive_deserialization() {
        let record: RawListingRecord = serde_json::from_str(
            r##"{"product_name":"Widget","product_id":"B001ABCDEF","badge":"#1 Best Seller"}"##,
        )
        .unwrap();
        assert_eq!(record.product_name.as_deref(), Some("Widget"));
        assert_eq!(
            record.extra.get("badge"),
            Some(&serde_json::Value::String("#1 Best Seller".to_string()))
        );
        assert_eq!(record.populated_field_count(), 3);
    }

    #[test]
    fn test_empty_input_is_empty_output() {
        assert!(reconcile("Books", &[]).is_empty());
    }
}
