//! Score aggregation strategies for multi-image portfolios.
//!
//! An artist with `n` illustrations produces `n` per-illustration
//! similarity scores against a brief. The aggregator collapses them into
//! a single per-artist score under one of four strategies:
//!
//! | Strategy        | Definition                                   |
//! |-----------------|----------------------------------------------|
//! | `max`           | highest score (best matching illustration)   |
//! | `mean`          | arithmetic mean (overall portfolio quality)  |
//! | `weighted_mean` | `Σs² / Σs`, or 0 when `Σs = 0`               |
//! | `top_k_mean`    | mean of the `min(k, n)` largest scores       |
//!
//! All strategies are pure functions over a non-empty slice of scores
//! already mapped into [0, 1]. Callers must filter out artists with no
//! embeddings before aggregating; an empty slice is a programmer error.

use crate::config::AggregationStrategy;

/// Collapses per-illustration scores into one per-artist score.
///
/// `top_k` only affects [`AggregationStrategy::TopKMean`].
///
/// # Panics
///
/// Debug builds assert that `scores` is non-empty. Release builds return
/// 0.0 for an empty slice rather than panicking in a query path.
pub fn aggregate(strategy: AggregationStrategy, top_k: usize, scores: &[f32]) -> f32 {
    debug_assert!(!scores.is_empty(), "cannot aggregate an empty score list");
    if scores.is_empty() {
        return 0.0;
    }

    match strategy {
        AggregationStrategy::Max => max_score(scores),
        AggregationStrategy::Mean => mean_score(scores),
        AggregationStrategy::WeightedMean => weighted_mean_score(scores),
        AggregationStrategy::TopKMean => top_k_mean_score(scores, top_k),
    }
}

/// Highest single score.
fn max_score(scores: &[f32]) -> f32 {
    scores.iter().copied().fold(f32::NEG_INFINITY, f32::max)
}

/// Arithmetic mean.
fn mean_score(scores: &[f32]) -> f32 {
    scores.iter().sum::<f32>() / scores.len() as f32
}

/// Self-weighted mean: each score is weighted by itself, giving
/// quadratic emphasis to strong matches.
///
/// `weighted_mean = Σ(sᵢ²) / Σ(sᵢ)`, and 0 when every score is 0.
fn weighted_mean_score(scores: &[f32]) -> f32 {
    let weight_sum: f32 = scores.iter().sum();
    if weight_sum <= 0.0 {
        return 0.0;
    }
    let weighted_sum: f32 = scores.iter().map(|s| s * s).sum();
    weighted_sum / weight_sum
}

/// Mean of the `min(k, n)` largest scores.
fn top_k_mean_score(scores: &[f32], top_k: usize) -> f32 {
    let k = top_k.max(1).min(scores.len());

    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    sorted[..k].iter().sum::<f32>() / k as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_singleton_agrees_across_strategies() {
        // Every strategy collapses a single score to itself.
        for strategy in [
            AggregationStrategy::Max,
            AggregationStrategy::Mean,
            AggregationStrategy::WeightedMean,
            AggregationStrategy::TopKMean,
        ] {
            let result = aggregate(strategy, 3, &[0.42]);
            assert!((result - 0.42).abs() < EPS, "{strategy}: {result}");
        }
    }

    #[test]
    fn test_reference_portfolio() {
        // Four illustrations scoring [0.9, 0.8, 0.7, 0.1] against a brief.
        let scores = [0.9, 0.8, 0.7, 0.1];

        let max = aggregate(AggregationStrategy::Max, 3, &scores);
        assert!((max - 0.9).abs() < EPS);

        let mean = aggregate(AggregationStrategy::Mean, 3, &scores);
        assert!((mean - 0.625).abs() < EPS);

        let top3 = aggregate(AggregationStrategy::TopKMean, 3, &scores);
        assert!((top3 - 0.8).abs() < EPS);

        // (0.81 + 0.64 + 0.49 + 0.01) / (0.9 + 0.8 + 0.7 + 0.1) = 1.95 / 2.5
        let weighted = aggregate(AggregationStrategy::WeightedMean, 3, &scores);
        assert!((weighted - 0.78).abs() < EPS, "got {weighted}");
    }

    #[test]
    fn test_max_dominates_mean() {
        let portfolios: &[&[f32]] = &[
            &[0.5],
            &[0.1, 0.9],
            &[0.33, 0.33, 0.34],
            &[1.0, 0.0, 0.0, 0.0],
        ];
        for scores in portfolios {
            let max = aggregate(AggregationStrategy::Max, 3, scores);
            let mean = aggregate(AggregationStrategy::Mean, 3, scores);
            assert!(max >= mean - EPS, "max {max} < mean {mean} for {scores:?}");
        }
    }

    #[test]
    fn test_weighted_mean_all_zero() {
        let result = aggregate(AggregationStrategy::WeightedMean, 3, &[0.0, 0.0, 0.0]);
        assert_eq!(result, 0.0);
    }

    #[test]
    fn test_weighted_mean_emphasizes_strong_matches() {
        // [0.9, 0.5, 0.3]: mean = 0.567, weighted = 1.15 / 1.7 ≈ 0.676
        let scores = [0.9, 0.5, 0.3];
        let weighted = aggregate(AggregationStrategy::WeightedMean, 3, &scores);
        let mean = aggregate(AggregationStrategy::Mean, 3, &scores);
        assert!(weighted > mean);
        assert!((weighted - 1.15 / 1.7).abs() < EPS);
    }

    #[test]
    fn test_top_k_mean_fewer_scores_than_k() {
        let result = aggregate(AggregationStrategy::TopKMean, 5, &[0.6, 0.4]);
        assert!((result - 0.5).abs() < EPS);
    }

    #[test]
    fn test_top_k_mean_ignores_low_additions() {
        // Adding a value no greater than the current k-th largest never
        // increases the top-k mean.
        let base = [0.9, 0.8, 0.7];
        let before = aggregate(AggregationStrategy::TopKMean, 3, &base);

        let with_low = [0.9, 0.8, 0.7, 0.2];
        let after = aggregate(AggregationStrategy::TopKMean, 3, &with_low);

        assert!(after <= before + EPS);
        assert!((after - before).abs() < EPS, "0.2 is below the 3rd largest");
    }

    #[test]
    fn test_results_stay_in_unit_interval() {
        let scores = [0.0, 0.25, 0.5, 0.75, 1.0];
        for strategy in [
            AggregationStrategy::Max,
            AggregationStrategy::Mean,
            AggregationStrategy::WeightedMean,
            AggregationStrategy::TopKMean,
        ] {
            let result = aggregate(strategy, 3, &scores);
            assert!((0.0..=1.0).contains(&result), "{strategy}: {result}");
        }
    }

    #[test]
    #[should_panic(expected = "empty score list")]
    #[cfg(debug_assertions)]
    fn test_empty_input_is_programmer_error() {
        aggregate(AggregationStrategy::Max, 3, &[]);
    }
}
