use ndarray::s;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{column, FeatureMatrix, MatrixSet, Route};

/// Convert the min/max previous-price columns and the realized price of every
/// row to EUR. Rows come back grouped by route, in route order.
///
/// Not idempotent: apply exactly once per dataset generation.
pub fn normalize(matrix: &FeatureMatrix) -> PipelineResult<FeatureMatrix> {
    rescale_prices(matrix, |route| route.currency_factor())
}

pub fn normalize_set(set: &MatrixSet) -> PipelineResult<MatrixSet> {
    let normalized = MatrixSet {
        train: normalize(&set.train)?,
        test: normalize(&set.test)?,
    };
    info!(
        "Currency normalized: {} train rows, {} test rows",
        normalized.train.len(),
        normalized.test.len()
    );
    Ok(normalized)
}

/// Multiply each route block's price columns by `factor(route)`
pub fn rescale_prices(matrix: &FeatureMatrix, factor: impl Fn(Route) -> f64) -> PipelineResult<FeatureMatrix> {
    matrix.check_shape("currency normalizer input")?;

    let mut blocks = Vec::with_capacity(Route::COUNT);
    for route in Route::ALL {
        let rows = matrix.route_rows(route);
        if rows.is_empty() {
            continue;
        }
        let f = factor(route);
        let mut block = matrix.select(&rows);
        block
            .features
            .slice_mut(s![.., column::MIN_PREVIOUS_PRICE..=column::MAX_PREVIOUS_PRICE])
            .mapv_inplace(|v| v * f);
        block.prices.mapv_inplace(|v| v * f);
        blocks.push(block);
    }

    let regrouped: usize = blocks.iter().map(|b| b.len()).sum();
    if regrouped != matrix.len() {
        // A row with no (or more than one) route flag was dropped or duplicated
        return Err(PipelineError::shape(
            "currency normalizer",
            matrix.len(),
            regrouped,
            regrouped,
        ));
    }

    FeatureMatrix::stack(&blocks, "currency normalizer output")
}
