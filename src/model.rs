//! Price segmentation via K-Means clustering
//!
//! Partitions the combined table's price column into an automatically-sized
//! number of tiers. Prices above the 99th percentile are excluded so extreme
//! tails do not dominate cluster geometry, the remainder is standardized, and
//! the segment count is chosen by scanning a candidate range and keeping the
//! partition with the best silhouette score. Segments are reordered by
//! ascending center so segment 0 is always the cheapest tier.

use std::collections::BTreeMap;

use anyhow::bail;
use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::data::{CanonicalProduct, CombinedTable};

/// Segment labels, cheapest tier first. The candidate cluster range is capped
/// at this vocabulary's length so every selected partition can be labeled.
pub const SEGMENT_LABELS: [&str; 5] = ["Budget", "Economy", "Mid-range", "Premium", "Luxury"];

/// Knobs for the segmentation search and the underlying K-Means fits.
#[derive(Debug, Clone)]
pub struct SegmentationConfig {
    /// Smallest candidate segment count (inclusive, at least 2).
    pub k_min: usize,
    /// Largest candidate segment count (inclusive). Defaults to the label
    /// vocabulary size; larger values are clamped to it with a warning.
    pub k_max: usize,
    /// Prices above this quantile are excluded before clustering.
    pub outlier_quantile: f64,
    /// Independent K-Means restarts per candidate, to avoid poor local optima.
    pub n_runs: usize,
    /// Maximum iterations per K-Means run.
    pub max_iterations: u64,
    /// Convergence tolerance per K-Means run.
    pub tolerance: f64,
    /// RNG seed, fixed so repeated runs produce identical partitions.
    pub seed: u64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            k_min: 2,
            k_max: SEGMENT_LABELS.len(),
            outlier_quantile: 0.99,
            n_runs: 10,
            max_iterations: 300,
            tolerance: 1e-4,
            seed: 42,
        }
    }
}

/// One price tier in the final partition, ordered by ascending center.
#[derive(Debug, Clone, Serialize)]
pub struct PriceSegment {
    /// 0-based index; segment 0 is the cheapest tier.
    pub index: usize,
    pub label: String,
    /// Cluster center mapped back to original price units.
    pub center: f64,
    pub stats: SegmentStats,
}

/// Descriptive statistics for the rows of one segment.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentStats {
    pub count: usize,
    pub price_mean: Option<f64>,
    pub price_median: Option<f64>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    /// Sample standard deviation; `None` below two rows.
    pub price_std: Option<f64>,
    pub rating_mean: Option<f64>,
    pub rating_count: usize,
    pub review_mean: Option<f64>,
    pub review_sum: u64,
}

/// Outcome of a successful segmentation run.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentationResult {
    /// Selected segment count (the silhouette-maximizing k).
    pub optimal_k: usize,
    /// Silhouette score for every candidate k that produced a valid fit.
    pub silhouette_scores: BTreeMap<usize, f64>,
    /// Final segments, ordered by ascending center.
    pub segments: Vec<PriceSegment>,
    /// Per category, the fraction of its segmented rows in each label.
    /// Fractions sum to 1.0 for every category present.
    pub segment_by_category: BTreeMap<String, BTreeMap<String, f64>>,
}

/// Standardization fitted on the working price set, invertible so cluster
/// centers can be reported in original price units.
#[derive(Debug, Clone)]
struct PriceScaler {
    mean: f64,
    std: f64,
}

impl PriceScaler {
    fn fit(values: &[f64]) -> Self {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
        }
    }

    fn transform(&self, values: &[f64]) -> Array2<f64> {
        Array2::from_shape_fn((values.len(), 1), |(i, _)| {
            (values[i] - self.mean) / self.std
        })
    }

    fn invert(&self, value: f64) -> f64 {
        value * self.std + self.mean
    }
}

/// Partition the table's priced rows into labeled price segments.
///
/// Writes `price_segment` and `price_segment_label` onto every included row
/// (rows without a price, or above the outlier cutoff, are left unassigned)
/// and returns the structured result. Returns `Ok(None)` when segmentation is
/// infeasible: no usable prices, fewer than two distinct values after outlier
/// filtering, or no candidate k yielding a valid partition. Only structurally
/// invalid configuration is an error.
pub fn segment_by_price(
    table: &mut CombinedTable,
    config: &SegmentationConfig,
) -> crate::Result<Option<SegmentationResult>> {
    if config.k_min < 2 {
        bail!("candidate segment count must start at 2 or above");
    }
    if config.k_max < config.k_min {
        bail!(
            "candidate segment range is empty ({}..={})",
            config.k_min,
            config.k_max
        );
    }
    if !(0.0..=1.0).contains(&config.outlier_quantile) {
        bail!("outlier quantile must lie in [0, 1]");
    }

    // Reruns start from a clean slate so stale assignments never survive.
    for row in &mut table.rows {
        row.price_segment = None;
        row.price_segment_label = None;
    }

    let priced: Vec<(usize, f64)> = table
        .rows
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.price.map(|p| (i, p)))
        .collect();
    if priced.is_empty() {
        debug!("no priced rows, segmentation unavailable");
        return Ok(None);
    }

    let mut sorted: Vec<f64> = priced.iter().map(|&(_, p)| p).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let cutoff = quantile(&sorted, config.outlier_quantile);

    let working: Vec<(usize, f64)> = priced.into_iter().filter(|&(_, p)| p <= cutoff).collect();
    let prices: Vec<f64> = working.iter().map(|&(_, p)| p).collect();
    if distinct_count(&prices) < 2 {
        debug!(
            rows = working.len(),
            "fewer than two distinct prices, segmentation unavailable"
        );
        return Ok(None);
    }

    let scaler = PriceScaler::fit(&prices);
    let scaled = scaler.transform(&prices);

    let k_max = if config.k_max > SEGMENT_LABELS.len() {
        warn!(
            requested = config.k_max,
            cap = SEGMENT_LABELS.len(),
            "candidate segment range capped at label vocabulary size"
        );
        SEGMENT_LABELS.len()
    } else {
        config.k_max
    };

    // Scan ascending and keep the first maximum, so ties resolve to the
    // lowest k. A failed or degenerate fit excludes that k from scoring.
    let mut silhouette_scores = BTreeMap::new();
    let mut best: Option<(usize, f64)> = None;
    for k in config.k_min..=k_max {
        let labels = match fit_partition(&scaled, k, config) {
            Ok((labels, _)) => labels,
            Err(err) => {
                debug!(k, error = %err, "candidate fit failed, excluding k");
                continue;
            }
        };
        if occupied_clusters(&labels, k) < 2 {
            debug!(k, "degenerate partition, excluding k");
            continue;
        }
        let score = silhouette_score(&scaled, &labels, k);
        silhouette_scores.insert(k, score);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((k, score));
        }
    }

    let Some((optimal_k, _)) = best else {
        debug!("every candidate fit failed, segmentation unavailable");
        return Ok(None);
    };

    // The search RNG is reseeded per fit, so this refit reproduces the
    // winning candidate exactly.
    let (labels, centroids) = fit_partition(&scaled, optimal_k, config)?;
    let centers: Vec<f64> = (0..optimal_k)
        .map(|c| scaler.invert(centroids[[c, 0]]))
        .collect();

    // Reorder so segment 0 is the cheapest, then remap every assignment.
    let mut order: Vec<usize> = (0..optimal_k).collect();
    order.sort_by(|&a, &b| centers[a].total_cmp(&centers[b]));
    let mut remap = vec![0usize; optimal_k];
    for (new_index, &old) in order.iter().enumerate() {
        remap[old] = new_index;
    }

    for (slot, &(row_index, _)) in working.iter().enumerate() {
        let segment = remap[labels[slot]];
        table.rows[row_index].price_segment = Some(segment);
        table.rows[row_index].price_segment_label = Some(SEGMENT_LABELS[segment].to_string());
    }

    let segments = (0..optimal_k)
        .map(|index| {
            let members: Vec<&CanonicalProduct> = working
                .iter()
                .enumerate()
                .filter(|&(slot, _)| remap[labels[slot]] == index)
                .map(|(_, &(row_index, _))| &table.rows[row_index])
                .collect();
            PriceSegment {
                index,
                label: SEGMENT_LABELS[index].to_string(),
                center: centers[order[index]],
                stats: segment_stats(&members),
            }
        })
        .collect();

    let segment_by_category = category_distribution(table, &working, &labels, &remap, optimal_k);

    debug!(
        optimal_k,
        rows = working.len(),
        excluded = table.len() - working.len(),
        "price segmentation complete"
    );

    Ok(Some(SegmentationResult {
        optimal_k,
        silhouette_scores,
        segments,
        segment_by_category,
    }))
}

/// Fit one seeded K-Means partition on the scaled price column.
fn fit_partition(
    scaled: &Array2<f64>,
    k: usize,
    config: &SegmentationConfig,
) -> crate::Result<(Array1<usize>, Array2<f64>)> {
    let n_samples = scaled.nrows();
    if n_samples < k {
        bail!(
            "cannot fit {} clusters on {} samples",
            k,
            n_samples
        );
    }

    let targets: Array1<usize> = Array1::zeros(n_samples);
    let dataset = Dataset::new(scaled.clone(), targets);
    let rng = SmallRng::seed_from_u64(config.seed);

    let model = KMeans::params_with(k, rng, L2Dist)
        .n_runs(config.n_runs)
        .max_n_iterations(config.max_iterations)
        .tolerance(config.tolerance)
        .fit(&dataset)?;

    let labels = model.predict(scaled);
    Ok((labels, model.centroids().clone()))
}

/// Number of clusters that actually received at least one point.
fn occupied_clusters(labels: &Array1<usize>, k: usize) -> usize {
    let mut seen = vec![false; k];
    for &label in labels.iter() {
        if label < k {
            seen[label] = true;
        }
    }
    seen.iter().filter(|&&s| s).count()
}

/// Mean silhouette coefficient over all points of one partition.
fn silhouette_score(values: &Array2<f64>, labels: &Array1<usize>, n_clusters: usize) -> f64 {
    let n_samples = values.nrows();
    if n_samples < 2 {
        return 0.0;
    }

    let mut silhouette_sum = 0.0;

    for i in 0..n_samples {
        let point = values.row(i);
        let cluster_label = labels[i];

        // a(i): mean distance to points in the same cluster;
        // b(i): min mean distance to points of any other cluster.
        let mut same_cluster_distances = Vec::new();
        let mut other_cluster_distances: Vec<Vec<f64>> = vec![Vec::new(); n_clusters];

        for j in 0..n_samples {
            if i == j {
                continue;
            }

            let other_point = values.row(j);
            let distance = euclidean_distance(&point, &other_point);
            let other_label = labels[j];

            if other_label == cluster_label {
                same_cluster_distances.push(distance);
            } else if other_label < n_clusters {
                other_cluster_distances[other_label].push(distance);
            }
        }

        let a_i = if same_cluster_distances.is_empty() {
            0.0
        } else {
            same_cluster_distances.iter().sum::<f64>() / same_cluster_distances.len() as f64
        };

        let b_i = other_cluster_distances
            .iter()
            .filter(|distances| !distances.is_empty())
            .map(|distances| distances.iter().sum::<f64>() / distances.len() as f64)
            .fold(f64::INFINITY, f64::min);

        let silhouette_i = if b_i.is_infinite() || (a_i == 0.0 && b_i == 0.0) {
            0.0
        } else {
            (b_i - a_i) / a_i.max(b_i)
        };

        silhouette_sum += silhouette_i;
    }

    silhouette_sum / n_samples as f64
}

fn euclidean_distance(point1: &ndarray::ArrayView1<f64>, point2: &ndarray::ArrayView1<f64>) -> f64 {
    point1
        .iter()
        .zip(point2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Quantile with linear interpolation over pre-sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let h = (n - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

fn distinct_count(values: &[f64]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup();
    sorted.len()
}

fn segment_stats(members: &[&CanonicalProduct]) -> SegmentStats {
    let mut prices: Vec<f64> = members.iter().filter_map(|r| r.price).collect();
    prices.sort_by(|a, b| a.total_cmp(b));
    let ratings: Vec<f64> = members.iter().filter_map(|r| r.rating).collect();
    let reviews: Vec<u64> = members.iter().filter_map(|r| r.review_count).collect();

    let price_mean = mean(&prices);
    let price_std = if prices.len() < 2 {
        None
    } else {
        let m = price_mean.unwrap_or(0.0);
        let var =
            prices.iter().map(|p| (p - m).powi(2)).sum::<f64>() / (prices.len() - 1) as f64;
        Some(var.sqrt())
    };

    SegmentStats {
        count: members.len(),
        price_mean,
        price_median: median(&prices),
        price_min: prices.first().copied(),
        price_max: prices.last().copied(),
        price_std,
        rating_mean: mean(&ratings),
        rating_count: ratings.len(),
        review_mean: if reviews.is_empty() {
            None
        } else {
            Some(reviews.iter().sum::<u64>() as f64 / reviews.len() as f64)
        },
        review_sum: reviews.iter().sum(),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Median of pre-sorted values.
fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

/// Per category, the fraction of its segmented rows falling into each label.
fn category_distribution(
    table: &CombinedTable,
    working: &[(usize, f64)],
    labels: &Array1<usize>,
    remap: &[usize],
    optimal_k: usize,
) -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut counts: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (slot, &(row_index, _)) in working.iter().enumerate() {
        let entry = counts
            .entry(table.rows[row_index].category.clone())
            .or_insert_with(|| vec![0; optimal_k]);
        entry[remap[labels[slot]]] += 1;
    }

    counts
        .into_iter()
        .map(|(category, per_segment)| {
            let total: usize = per_segment.iter().sum();
            let fractions = per_segment
                .iter()
                .enumerate()
                .map(|(segment, &count)| {
                    (
                        SEGMENT_LABELS[segment].to_string(),
                        count as f64 / total as f64,
                    )
                })
                .collect();
            (category, fractions)
        })
        .collect()
}
