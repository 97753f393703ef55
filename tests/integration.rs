//! Integration tests for Marketsift

use std::collections::BTreeMap;

use marketsift::{
    build_table, combine, segment_by_price, RawListingRecord, SegmentationConfig, Source,
};
use serde_json::json;

fn record(value: serde_json::Value) -> RawListingRecord {
    serde_json::from_value(value).unwrap()
}

fn one_category(name: &str, records: Vec<RawListingRecord>) -> BTreeMap<String, Vec<RawListingRecord>> {
    BTreeMap::from([(name.to_string(), records)])
}

#[test]
fn test_reconciliation_end_to_end() {
    // Two records share the catalog id B001ABCDEF (one name-only, one rich),
    // and a third carries a tracking id captured in place of a name.
    let records = vec![
        record(json!({
            "product_name": "The Art of Testing",
            "product_link": "https://example.com/art-of-testing/dp/B001ABCDEF/ref=zg_bs"
        })),
        record(json!({
            "product_name": "The Art of Testing",
            "product_id": "/dp/B001ABCDEF/",
            "discounted_price": "$19.99",
            "rating": "4.5 out of 5 stars"
        })),
        record(json!({
            "product_name": "123 456 789",
            "product_id": "/dp/B002ABCDEF/"
        })),
    ];

    let rows = build_table(Source::Bestsellers, &one_category("Books", records));

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.canonical_id, "B001ABCDEF");
    assert_eq!(row.category, "Books");
    // The more complete record won the merge.
    assert_eq!(row.price, Some(19.99));
    assert_eq!(row.rating, Some(4.5));
}

#[test]
fn test_pipeline_summary_counts() {
    let bestsellers = build_table(
        Source::Bestsellers,
        &one_category(
            "Books",
            vec![
                record(json!({
                    "product_name": "Novel",
                    "product_id": "/dp/B001ABCDEF/",
                    "discounted_price": "$12.00",
                    "actual_price": "$24.00"
                })),
                record(json!({
                    "product_name": "Cookbook",
                    "product_id": "/dp/B003ABCDEF/",
                    "is_prime": true
                })),
            ],
        ),
    );
    let trending = build_table(
        Source::Trending,
        &one_category(
            "Electronics",
            vec![record(json!({
                "product_name": "Novel",
                "product_id": "/dp/B001ABCDEF/",
                "percent_change": "1,250%"
            }))],
        ),
    );

    let table = combine(bestsellers, trending, Vec::new());
    let summary = table.summary();

    assert_eq!(summary.total_products, 3);
    // The same catalog id in two sources stays two rows but one unique id.
    assert_eq!(summary.unique_products, 2);
    assert_eq!(summary.bestsellers_count, 2);
    assert_eq!(summary.trending_count, 1);
    assert_eq!(summary.new_releases_count, 0);
    assert_eq!(
        summary.categories,
        vec!["Books".to_string(), "Electronics".to_string()]
    );

    let rows = &table.rows;
    assert_eq!(rows[0].discount_percent, Some(50.0));
    assert!(rows[1].is_prime);
    assert_eq!(rows[2].percent_change, Some(1250.0));

    let df = table.to_dataframe().unwrap();
    assert_eq!(df.height(), 3);
}

#[test]
fn test_segmentation_recovers_two_price_tiers() {
    // 200 synthetic prices drawn from two well-separated groups centered
    // near $10 and $200.
    let mut records = Vec::new();
    for i in 0..100 {
        records.push(record(json!({
            "product_name": format!("Cheap item {i}"),
            "product_id": format!("/dp/C{:09}/", i),
            "discounted_price": format!("${:.2}", 8.0 + (i % 10) as f64 * 0.4)
        })));
        records.push(record(json!({
            "product_name": format!("Premium item {i}"),
            "product_id": format!("/dp/P{:09}/", i),
            "discounted_price": format!("${:.2}", 195.0 + (i % 10) as f64 * 1.0)
        })));
    }

    let mut table = combine(
        build_table(Source::Bestsellers, &one_category("Books", records)),
        Vec::new(),
        Vec::new(),
    );
    assert_eq!(table.len(), 200);

    let result = segment_by_price(&mut table, &SegmentationConfig::default())
        .unwrap()
        .expect("segmentation should be feasible");

    assert_eq!(result.optimal_k, 2);
    // The cheapest cluster always takes the first label in the vocabulary.
    assert_eq!(result.segments[0].label, "Budget");
    assert_eq!(result.segments[1].label, "Economy");
    assert!((result.segments[0].center - 9.8).abs() < 3.0);
    assert!((result.segments[1].center - 199.5).abs() < 6.0);

    // Every surviving row is assigned; the outlier tail is the only gap.
    let assigned = table
        .rows
        .iter()
        .filter(|r| r.price_segment.is_some())
        .count();
    assert!(assigned >= 197);

    let fractions = &result.segment_by_category["Books"];
    let total: f64 = fractions.values().sum();
    assert!((total - 1.0).abs() < 1e-9);

    // The score table covers the scanned candidate range.
    assert!(result.silhouette_scores.contains_key(&2));
    assert!(result
        .silhouette_scores
        .keys()
        .all(|&k| (2..=5).contains(&k)));
}

#[test]
fn test_segmentation_unavailable_without_price_data() {
    let records = vec![record(json!({
        "product_name": "Unpriced",
        "product_id": "/dp/B001ABCDEF/"
    }))];
    let mut table = combine(
        build_table(Source::NewReleases, &one_category("Toys", records)),
        Vec::new(),
        Vec::new(),
    );

    let result = segment_by_price(&mut table, &SegmentationConfig::default()).unwrap();
    assert!(result.is_none());
    assert!(table.rows.iter().all(|r| r.price_segment.is_none()));
}
