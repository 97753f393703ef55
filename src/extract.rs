//! Field extraction from free-text scraped values
//!
//! Scraped listing fields arrive as inconsistent display text ("$1,234.56",
//! "4.5 out of 5 stars", "12,339 ratings", detail-page URLs). Each extractor
//! here is total over its input: it returns `None` on unparsable text and
//! never fails, which keeps parsing concerns out of the reconciliation and
//! table-building code.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Digit run with optional comma grouping and optional decimal fraction.
    static ref NUMERIC_RE: Regex = Regex::new(r"[\d,]+\.?\d*").unwrap();
    /// Decimal or integer numeral, e.g. the "4.5" in "4.5 out of 5 stars".
    static ref RATING_RE: Regex = Regex::new(r"\d+\.\d+|\d+").unwrap();
    /// Digit run with optional comma grouping, e.g. "1,234".
    static ref COUNT_RE: Regex = Regex::new(r"[\d,]+").unwrap();
    /// Detail-page path segment carrying the 10-character catalog id,
    /// bounded by a slash, end of string, or the start of a query string.
    static ref CATALOG_ID_RE: Regex = Regex::new(r"/dp/([A-Z0-9]{10})(?:/|$|\?)").unwrap();
}

/// Parse a currency string like "$1,234.56" into its numeric value.
///
/// Finds the first comma-grouped digit run (with optional decimal fraction),
/// strips the thousands separators, and parses it. Currency glyphs and any
/// surrounding text are ignored.
pub fn parse_currency(text: &str) -> Option<f64> {
    let m = NUMERIC_RE.find(text)?;
    m.as_str().replace(',', "").parse().ok()
}

/// Parse a star-rating string like "4.5 out of 5 stars" into 4.5.
pub fn parse_rating(text: &str) -> Option<f64> {
    let m = RATING_RE.find(text)?;
    m.as_str().parse().ok()
}

/// Parse a review-count string like "1,234" into 1234.
pub fn parse_review_count(text: &str) -> Option<u64> {
    let m = COUNT_RE.find(text)?;
    m.as_str().replace(',', "").parse().ok()
}

/// Extract the canonical catalog identifier from a product id or link.
///
/// Recognizes the `/dp/<10-char id>/` detail-page pattern and returns the
/// captured id. Text without that pattern is returned unchanged, letting
/// callers decide whether a raw id string is usable. Empty input yields
/// `None`.
pub fn parse_catalog_id(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    match CATALOG_ID_RE.captures(text) {
        Some(caps) => Some(caps[1].to_string()),
        None => Some(text.to_string()),
    }
}
