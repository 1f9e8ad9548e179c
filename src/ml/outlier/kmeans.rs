use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{label_centroids, sq_distance, ClusterModel};
use crate::error::{PipelineError, PipelineResult};

/// Two-cluster k-means (Lloyd iterations) seeded with the per-label centroids
#[derive(Debug, Clone)]
pub struct CentroidClusterer {
    pub max_iter: usize,
    pub tol: f64,
    /// Seed for re-placing a centroid that loses all its rows
    pub seed: u64,
    centroids: Option<Array2<f64>>,
}

impl CentroidClusterer {
    pub fn new(max_iter: usize, tol: f64, seed: u64) -> Self {
        Self {
            max_iter,
            tol,
            seed,
            centroids: None,
        }
    }

    pub fn centroids(&self) -> Option<&Array2<f64>> {
        self.centroids.as_ref()
    }
}

fn nearest(centroids: &Array2<f64>, features: &Array2<f64>) -> Vec<usize> {
    features
        .rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            let mut best_dist = f64::INFINITY;
            for (k, centroid) in centroids.rows().into_iter().enumerate() {
                let dist = sq_distance(row, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best = k;
                }
            }
            best
        })
        .collect()
}

impl ClusterModel for CentroidClusterer {
    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<u8>) -> PipelineResult<()> {
        let mut centroids = label_centroids(features, labels)?;
        let (n_obs, n_features) = features.dim();
        let n_clusters = centroids.nrows();
        let mut rng = StdRng::seed_from_u64(self.seed);

        for iteration in 0..self.max_iter {
            let assignment = nearest(&centroids, features);

            // Update means
            let mut sums = Array2::<f64>::zeros((n_clusters, n_features));
            let mut counts = vec![0usize; n_clusters];
            for (i, &k) in assignment.iter().enumerate() {
                sums.row_mut(k).scaled_add(1.0, &features.row(i));
                counts[k] += 1;
            }

            let mut shift = 0.0;
            for k in 0..n_clusters {
                let updated = if counts[k] > 0 {
                    sums.row(k).mapv(|v| v / counts[k] as f64)
                } else {
                    let pick = rng.gen_range(0..n_obs);
                    debug!("k-means cluster {} emptied; reseeding from row {}", k, pick);
                    features.row(pick).to_owned()
                };
                shift += sq_distance(updated.view(), centroids.row(k));
                centroids.row_mut(k).assign(&updated);
            }

            if shift <= self.tol {
                debug!("k-means converged after {} iterations", iteration + 1);
                break;
            }
        }

        self.centroids = Some(centroids);
        Ok(())
    }

    fn predict(&self, features: &Array2<f64>) -> PipelineResult<Array1<usize>> {
        let centroids = self
            .centroids
            .as_ref()
            .ok_or_else(|| PipelineError::Model("k-means used before fit".to_string()))?;
        if features.ncols() != centroids.ncols() {
            return Err(PipelineError::Model("Observation features mismatch".to_string()));
        }
        Ok(Array1::from_vec(nearest(centroids, features)))
    }
}
