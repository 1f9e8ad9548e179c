pub mod kmeans;
pub mod mixture;

pub use kmeans::CentroidClusterer;
pub use mixture::GaussianMixture;

use ndarray::{Array1, Array2, Axis};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{OutlierSettings, OutlierStrategy};
use crate::error::{PipelineError, PipelineResult};
use crate::types::FeatureMatrix;

/// Unsupervised 2-way partition used for outlier removal. `fit` receives the
/// labels only to seed the clusters; `predict` returns a cluster index per row.
pub trait ClusterModel {
    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<u8>) -> PipelineResult<()>;
    fn predict(&self, features: &Array2<f64>) -> PipelineResult<Array1<usize>>;
}

/// Outcome of one filtering pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OutlierReport {
    pub total: usize,
    pub kept: usize,
    pub kept_waits: usize,
    pub kept_buys: usize,
}

impl OutlierReport {
    pub fn retained_fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.kept as f64 / self.total as f64
    }
}

/// Build the model for a configured strategy
pub fn model_for(strategy: OutlierStrategy, settings: &OutlierSettings) -> Box<dyn ClusterModel> {
    match strategy {
        OutlierStrategy::Centroid => Box::new(CentroidClusterer::new(
            settings.kmeans_max_iter,
            settings.kmeans_tol,
            settings.seed,
        )),
        OutlierStrategy::Mixture => Box::new(GaussianMixture::new(
            settings.mixture_max_iter,
            settings.mixture_tol,
            settings.min_variance,
        )),
    }
}

/// Mean feature vector of the label-0 rows (row 0) and label-1 rows (row 1).
/// Cluster index `k` is aligned with label `k` only through this seeding.
pub fn label_centroids(features: &Array2<f64>, labels: &Array1<u8>) -> PipelineResult<Array2<f64>> {
    if features.nrows() != labels.len() {
        return Err(PipelineError::shape("label centroids", features.nrows(), labels.len(), labels.len()));
    }

    let mut centroids = Array2::zeros((2, features.ncols()));
    for label in 0..2u8 {
        let rows: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == label).collect();
        let mean = features
            .select(Axis(0), &rows)
            .mean_axis(Axis(0))
            .ok_or(PipelineError::EmptyLabelClass(label))?;
        centroids.row_mut(label as usize).assign(&mean);
    }
    Ok(centroids)
}

/// Drop the rows whose label disagrees with the fitted partition. The input is
/// left untouched.
pub fn filter_outliers(
    matrix: &FeatureMatrix,
    model: &mut dyn ClusterModel,
) -> PipelineResult<(FeatureMatrix, OutlierReport)> {
    matrix.check_shape("outlier filter input")?;

    model.fit(&matrix.features, &matrix.labels)?;
    let clusters = model.predict(&matrix.features)?;
    if clusters.len() != matrix.len() {
        return Err(PipelineError::shape("outlier filter", matrix.len(), matrix.len(), clusters.len()));
    }

    let keep: Vec<usize> = (0..matrix.len())
        .filter(|&i| matrix.labels[i] as usize == clusters[i])
        .collect();
    let filtered = matrix.select(&keep);

    let (waits, buys) = matrix.label_counts();
    let (kept_waits, kept_buys) = filtered.label_counts();
    let report = OutlierReport {
        total: matrix.len(),
        kept: filtered.len(),
        kept_waits,
        kept_buys,
    };

    info!(
        "# total: {}, # kept: {}. Keep {:.2}% data.",
        report.total,
        report.kept,
        report.retained_fraction() * 100.0
    );
    // Seeding is the only thing tying cluster k to label k; a class that mostly
    // vanishes suggests the clusters swapped.
    if kept_waits * 2 < waits || kept_buys * 2 < buys {
        warn!(
            "Outlier filter kept {}/{} waits and {}/{} buys; cluster/label alignment may be off",
            kept_waits, waits, kept_buys, buys
        );
    }

    Ok((filtered, report))
}

/// Squared euclidean distance
pub(crate) fn sq_distance(a: ndarray::ArrayView1<'_, f64>, b: ndarray::ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}
