use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use super::Route;
use crate::error::{PipelineError, PipelineResult};

/// Column layout of a feature row
pub mod column {
    use super::Route;

    /// First one-hot route column; routes occupy `0..Route::COUNT`
    pub const ROUTE_START: usize = 0;
    pub const DEPARTURE_GAP: usize = Route::COUNT;
    pub const STATE: usize = Route::COUNT + 1;
    pub const MIN_PREVIOUS_PRICE: usize = Route::COUNT + 2;
    pub const MAX_PREVIOUS_PRICE: usize = Route::COUNT + 3;
    pub const WIDTH: usize = Route::COUNT + 4;
}

/// Features, buy/wait labels and realized prices, row-aligned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub features: Array2<f64>,
    pub labels: Array1<u8>,
    pub prices: Array1<f64>,
}

impl FeatureMatrix {
    /// Bundle the three arrays, rejecting diverging row counts or a wrong width
    pub fn new(
        features: Array2<f64>,
        labels: Array1<u8>,
        prices: Array1<f64>,
        stage: &'static str,
    ) -> PipelineResult<Self> {
        let matrix = Self { features, labels, prices };
        matrix.check_shape(stage)?;
        Ok(matrix)
    }

    pub fn empty() -> Self {
        Self {
            features: Array2::zeros((0, column::WIDTH)),
            labels: Array1::zeros(0),
            prices: Array1::zeros(0),
        }
    }

    pub fn from_rows(rows: Vec<[f64; column::WIDTH]>, labels: Vec<u8>, prices: Vec<f64>, stage: &'static str) -> PipelineResult<Self> {
        let n = rows.len();
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let features = Array2::from_shape_vec((n, column::WIDTH), flat)
            .map_err(|_| PipelineError::shape(stage, n, labels.len(), prices.len()))?;
        Self::new(features, Array1::from_vec(labels), Array1::from_vec(prices), stage)
    }

    pub fn check_shape(&self, stage: &'static str) -> PipelineResult<()> {
        let rows = self.features.nrows();
        if rows != self.labels.len() || rows != self.prices.len() || self.features.ncols() != column::WIDTH {
            return Err(PipelineError::shape(stage, rows, self.labels.len(), self.prices.len()));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.features.row(i)
    }

    pub fn departure_gap(&self, i: usize) -> i64 {
        self.features[[i, column::DEPARTURE_GAP]] as i64
    }

    pub fn state(&self, i: usize) -> i64 {
        self.features[[i, column::STATE]] as i64
    }

    /// Route whose one-hot column is set on row `i`
    pub fn route_of(&self, i: usize) -> Option<Route> {
        Route::ALL
            .iter()
            .copied()
            .find(|route| self.features[[i, column::ROUTE_START + route.index()]] == 1.0)
    }

    /// Indices of the rows belonging to `route`, in matrix order
    pub fn route_rows(&self, route: Route) -> Vec<usize> {
        let col = column::ROUTE_START + route.index();
        (0..self.len())
            .filter(|&i| self.features[[i, col]] == 1.0)
            .collect()
    }

    /// Copy out the given rows, in the given order
    pub fn select(&self, rows: &[usize]) -> Self {
        Self {
            features: self.features.select(Axis(0), rows),
            labels: self.labels.select(Axis(0), rows),
            prices: self.prices.select(Axis(0), rows),
        }
    }

    /// Concatenate row blocks in order
    pub fn stack(blocks: &[FeatureMatrix], stage: &'static str) -> PipelineResult<Self> {
        if blocks.is_empty() {
            return Ok(Self::empty());
        }
        let shape_err = || {
            let total = blocks.iter().map(|b| b.len()).sum();
            PipelineError::shape(stage, total, total, total)
        };
        let features = ndarray::concatenate(
            Axis(0),
            &blocks.iter().map(|b| b.features.view()).collect::<Vec<_>>(),
        )
        .map_err(|_| shape_err())?;
        let labels = ndarray::concatenate(
            Axis(0),
            &blocks.iter().map(|b| b.labels.view()).collect::<Vec<_>>(),
        )
        .map_err(|_| shape_err())?;
        let prices = ndarray::concatenate(
            Axis(0),
            &blocks.iter().map(|b| b.prices.view()).collect::<Vec<_>>(),
        )
        .map_err(|_| shape_err())?;
        Self::new(features, labels, prices, stage)
    }

    pub fn label_counts(&self) -> (usize, usize) {
        let buys = self.labels.iter().filter(|&&l| l == 1).count();
        (self.len() - buys, buys)
    }
}

/// Train and test matrices of one dataset variant
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixSet {
    pub train: FeatureMatrix,
    pub test: FeatureMatrix,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(route: Route, gap: f64, state: f64, price: f64) -> [f64; column::WIDTH] {
        let mut r = [0.0; column::WIDTH];
        r[route.index()] = 1.0;
        r[column::DEPARTURE_GAP] = gap;
        r[column::STATE] = state;
        r[column::MIN_PREVIOUS_PRICE] = price;
        r[column::MAX_PREVIOUS_PRICE] = price;
        r
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let err = FeatureMatrix::from_rows(vec![row(Route::BcnBud, 1.0, 7.0, 10.0)], vec![0, 1], vec![10.0], "test");
        assert!(matches!(err, Err(PipelineError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_route_rows_and_select() {
        let m = FeatureMatrix::from_rows(
            vec![
                row(Route::BcnBud, 1.0, 7.0, 10.0),
                row(Route::SkpMmx, 2.0, 8.0, 20.0),
                row(Route::BcnBud, 3.0, 9.0, 30.0),
            ],
            vec![0, 1, 0],
            vec![10.0, 20.0, 30.0],
            "test",
        )
        .unwrap();
        assert_eq!(m.route_rows(Route::BcnBud), vec![0, 2]);
        assert_eq!(m.route_of(1), Some(Route::SkpMmx));

        let sub = m.select(&[2, 0]);
        assert_eq!(sub.prices.to_vec(), vec![30.0, 10.0]);
        assert_eq!(sub.state(0), 9);

        let stacked = FeatureMatrix::stack(&[sub, m.select(&[1])], "test").unwrap();
        assert_eq!(stacked.len(), 3);
        assert_eq!(stacked.label_counts(), (2, 1));
    }
}
