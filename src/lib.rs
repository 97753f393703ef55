//! Marketsift: reconciliation and price segmentation for scraped product listings
//!
//! This library turns heterogeneous, duplicate-laden listings harvested from
//! three catalog views (bestsellers, trending, new releases) into one
//! canonical product table, then derives market price segments from that
//! table with K-Means clustering and automatic segment-count selection.
//! Scraping and report rendering live outside this crate; it consumes raw
//! in-memory records and produces tables, summaries, and segmentation
//! results.

pub mod data;
pub mod extract;
pub mod model;
pub mod reconcile;

// Re-export public items for easier access
pub use data::{build_table, combine, CanonicalProduct, CombinedTable, Source, TableSummary};
pub use extract::{parse_catalog_id, parse_currency, parse_rating, parse_review_count};
pub use model::{
    segment_by_price, PriceSegment, SegmentStats, SegmentationConfig, SegmentationResult,
    SEGMENT_LABELS,
};
pub use reconcile::{reconcile, RawListingRecord, ReconciledRecord};

/// Common result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
