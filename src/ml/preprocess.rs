use ndarray::Axis;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{column, FeatureMatrix};

/// Z-score the min/max previous-price columns in place. Each split is scaled
/// with its own statistics.
pub fn standardize_prices(matrix: &mut FeatureMatrix) {
    if matrix.is_empty() {
        return;
    }
    for col in [column::MIN_PREVIOUS_PRICE, column::MAX_PREVIOUS_PRICE] {
        let mut values = matrix.features.column_mut(col);
        let mean = values.mean().unwrap_or(0.0);
        let std = values.std(0.0);
        if std > 1e-10 {
            values.mapv_inplace(|v| (v - mean) / std);
        } else {
            values.fill(0.0);
        }
    }
}

/// Oversample buy rows to counter the label imbalance, then shuffle all rows
/// with a seeded RNG.
///
/// Buy rows are repeated `dup - 1` extra times where
/// `dup = floor(floor(waits / buys) * factor)`.
pub fn rebalance(matrix: &FeatureMatrix, factor: f64, seed: u64) -> PipelineResult<FeatureMatrix> {
    let (waits, buys) = matrix.label_counts();
    if buys == 0 {
        return Err(PipelineError::EmptyLabelClass(1));
    }

    let dup = ((waits / buys) as f64 * factor) as usize;
    let buy_rows: Vec<usize> = (0..matrix.len()).filter(|&i| matrix.labels[i] == 1).collect();

    let mut indices: Vec<usize> = (0..matrix.len()).collect();
    for _ in 1..dup {
        indices.extend_from_slice(&buy_rows);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let balanced = matrix.select(&indices);
    let (new_waits, new_buys) = balanced.label_counts();
    info!(
        "Rebalanced training data: {} waits / {} buys -> {} waits / {} buys",
        waits, buys, new_waits, new_buys
    );
    Ok(balanced)
}

/// Keep rows whose departure gap is strictly above `min_gap`
pub fn restrict_departure_gap(matrix: &FeatureMatrix, min_gap: i64) -> FeatureMatrix {
    let rows: Vec<usize> = matrix
        .features
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row[column::DEPARTURE_GAP] as i64 > min_gap)
        .map(|(i, _)| i)
        .collect();
    matrix.select(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    fn matrix(labels: Vec<u8>) -> FeatureMatrix {
        let n = labels.len();
        let mut features = Array2::zeros((n, column::WIDTH));
        for i in 0..n {
            features[[i, 0]] = 1.0;
            features[[i, column::DEPARTURE_GAP]] = (i * 10) as f64;
            features[[i, column::MIN_PREVIOUS_PRICE]] = 50.0 + i as f64;
            features[[i, column::MAX_PREVIOUS_PRICE]] = 80.0;
        }
        let prices = Array1::from_iter((0..n).map(|i| 100.0 + i as f64));
        FeatureMatrix::new(features, Array1::from_vec(labels), prices, "test").unwrap()
    }

    #[test]
    fn test_standardize_prices() {
        let mut m = matrix(vec![0, 1, 0, 0]);
        standardize_prices(&mut m);
        let col = m.features.column(column::MIN_PREVIOUS_PRICE);
        assert_abs_diff_eq!(col.mean().unwrap(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(col.std(0.0), 1.0, epsilon = 1e-12);
        // constant column collapses to zero
        assert!(m.features.column(column::MAX_PREVIOUS_PRICE).iter().all(|&v| v == 0.0));
        assert_eq!(m.features[[3, column::DEPARTURE_GAP]], 30.0);
    }

    #[test]
    fn test_rebalance_counts_and_seed() {
        let m = matrix(vec![0, 0, 0, 0, 0, 0, 1, 0, 1]);
        // waits=7, buys=2 -> dup = floor(3 * 1.5) = 4 -> 3 extra copies
        let balanced = rebalance(&m, 1.5, 42).unwrap();
        assert_eq!(balanced.label_counts(), (7, 8));
        assert_eq!(balanced, rebalance(&m, 1.5, 42).unwrap());
        assert_ne!(balanced, rebalance(&m, 1.5, 7).unwrap());
    }

    #[test]
    fn test_rebalance_without_buys_fails() {
        let m = matrix(vec![0, 0]);
        assert!(matches!(rebalance(&m, 1.5, 42), Err(PipelineError::EmptyLabelClass(1))));
    }

    #[test]
    fn test_restrict_departure_gap() {
        let m = matrix(vec![0, 1, 0, 1]);
        let kept = restrict_departure_gap(&m, 15);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.prices.to_vec(), vec![102.0, 103.0]);
    }
}
