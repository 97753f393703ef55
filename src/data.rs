//! Canonical product table construction
//!
//! Takes each source's per-category raw records through reconciliation, type
//! coercion, and enrichment, then concatenates the three sources into the one
//! combined table every downstream consumer (the segmentation engine and the
//! external reporting layer) reads from.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::extract::{parse_currency, parse_rating, parse_review_count};
use crate::reconcile::{reconcile, RawListingRecord};

/// Catalog view a record was harvested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Bestsellers,
    Trending,
    NewReleases,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Bestsellers => "bestsellers",
            Source::Trending => "trending",
            Source::NewReleases => "new_releases",
        }
    }
}

/// One reconciled, type-coerced product row.
///
/// Numeric fields are `None` when the underlying raw text was absent or
/// unparsable; `discount_percent` is additionally `None` whenever it cannot
/// be computed (missing price or non-positive original price), which is
/// distinct from a genuine zero discount. The segmentation columns stay
/// `None` until the segmentation engine runs.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalProduct {
    pub canonical_id: String,
    pub product_name: String,
    pub category: String,
    pub source: Source,
    pub price: Option<f64>,
    pub original_price: Option<f64>,
    pub discount_percent: Option<f64>,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub percent_change: Option<f64>,
    pub is_prime: bool,
    pub price_segment: Option<usize>,
    pub price_segment_label: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// Row-wise union of all three sources' canonical products.
///
/// A `canonical_id` may appear once per (source, category) context; identity
/// across sources is preserved, not collapsed.
#[derive(Debug, Clone, Default)]
pub struct CombinedTable {
    pub rows: Vec<CanonicalProduct>,
}

/// Headline counts handed to the reporting layer alongside the table.
#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub total_products: usize,
    pub unique_products: usize,
    pub bestsellers_count: usize,
    pub trending_count: usize,
    pub new_releases_count: usize,
    pub categories: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

/// Reconcile and normalize one source's category map into canonical rows.
///
/// Categories are processed in key order; within a category, rows keep the
/// reconciler's first-seen ordering. A source with no categories (or only
/// empty ones) yields an empty vector.
pub fn build_table(
    source: Source,
    categories: &BTreeMap<String, Vec<RawListingRecord>>,
) -> Vec<CanonicalProduct> {
    let processed_at = Utc::now();
    let mut rows = Vec::new();

    for (category, records) in categories {
        for reconciled in reconcile(category, records) {
            let raw = &reconciled.raw;
            let price = raw.discounted_price.as_deref().and_then(parse_currency);
            let original_price = raw.actual_price.as_deref().and_then(parse_currency);

            rows.push(CanonicalProduct {
                canonical_id: reconciled.canonical_id,
                product_name: raw.product_name.clone().unwrap_or_default(),
                category: reconciled.category,
                source,
                price,
                original_price,
                discount_percent: discount_percent(price, original_price),
                rating: raw.rating.as_deref().and_then(parse_rating),
                review_count: raw.review_count.as_deref().and_then(parse_review_count),
                percent_change: raw.percent_change.as_deref().and_then(parse_currency),
                is_prime: raw.is_prime.unwrap_or(false),
                price_segment: None,
                price_segment_label: None,
                processed_at,
            });
        }
    }

    debug!(
        source = source.as_str(),
        categories = categories.len(),
        rows = rows.len(),
        "built source table"
    );
    rows
}

/// Discount as a percentage of the original price, rounded to two decimals.
/// Undefined (not zero) when either price is missing or the original price
/// is non-positive.
fn discount_percent(price: Option<f64>, original_price: Option<f64>) -> Option<f64> {
    match (price, original_price) {
        (Some(p), Some(o)) if o > 0.0 => Some(((o - p) / o * 100.0 * 100.0).round() / 100.0),
        _ => None,
    }
}

/// Concatenate the three sources' tables, in fixed source order, into the
/// final combined table. A missing source is passed as an empty vector.
pub fn combine(
    bestsellers: Vec<CanonicalProduct>,
    trending: Vec<CanonicalProduct>,
    new_releases: Vec<CanonicalProduct>,
) -> CombinedTable {
    let mut rows = bestsellers;
    rows.extend(trending);
    rows.extend(new_releases);
    CombinedTable { rows }
}

impl CombinedTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Headline counts for the reporting layer.
    pub fn summary(&self) -> TableSummary {
        let unique: BTreeSet<&str> = self.rows.iter().map(|r| r.canonical_id.as_str()).collect();
        let categories: BTreeSet<&str> = self.rows.iter().map(|r| r.category.as_str()).collect();
        let count_for = |source: Source| self.rows.iter().filter(|r| r.source == source).count();

        TableSummary {
            total_products: self.rows.len(),
            unique_products: unique.len(),
            bestsellers_count: count_for(Source::Bestsellers),
            trending_count: count_for(Source::Trending),
            new_releases_count: count_for(Source::NewReleases),
            categories: categories.into_iter().map(str::to_string).collect(),
            processed_at: Utc::now(),
        }
    }

    /// Export the table as a polars DataFrame for the reporting layer.
    ///
    /// Optional columns become nullable series; a field never observed in
    /// any input still yields an all-null column of the right dtype, so the
    /// schema is stable across runs.
    pub fn to_dataframe(&self) -> crate::Result<DataFrame> {
        let rows = &self.rows;

        let df = DataFrame::new(vec![
            Series::new(
                "canonical_id",
                rows.iter()
                    .map(|r| r.canonical_id.as_str())
                    .collect::<Vec<_>>(),
            ),
            Series::new(
                "product_name",
                rows.iter()
                    .map(|r| r.product_name.as_str())
                    .collect::<Vec<_>>(),
            ),
            Series::new(
                "category",
                rows.iter().map(|r| r.category.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                "source",
                rows.iter().map(|r| r.source.as_str()).collect::<Vec<_>>(),
            ),
            Series::new("price", rows.iter().map(|r| r.price).collect::<Vec<_>>()),
            Series::new(
                "original_price",
                rows.iter().map(|r| r.original_price).collect::<Vec<_>>(),
            ),
            Series::new(
                "discount_percent",
                rows.iter().map(|r| r.discount_percent).collect::<Vec<_>>(),
            ),
            Series::new("rating", rows.iter().map(|r| r.rating).collect::<Vec<_>>()),
            Series::new(
                "review_count",
                rows.iter()
                    .map(|r| r.review_count.map(|c| c as i64))
                    .collect::<Vec<_>>(),
            ),
            Series::new(
                "percent_change",
                rows.iter().map(|r| r.percent_change).collect::<Vec<_>>(),
            ),
            Series::new(
                "is_prime",
                rows.iter().map(|r| r.is_prime).collect::<Vec<_>>(),
            ),
            Series::new(
                "price_segment",
                rows.iter()
                    .map(|r| r.price_segment.map(|s| s as i64))
                    .collect::<Vec<_>>(),
            ),
            Series::new(
                "price_segment_label",
                rows.iter()
                    .map(|r| r.price_segment_label.clone())
                    .collect::<Vec<_>>(),
            ),
            Series::new(
                "processed_at",
                rows.iter()
                    .map(|r| r.processed_at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .collect::<Vec<_>>(),
            ),
        ])?;
        Ok(df)
    }
}
