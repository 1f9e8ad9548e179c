use ndarray::{Array1, Array2, ArrayView1};
use std::f64::consts::PI;
use tracing::debug;

use super::{label_centroids, sq_distance, ClusterModel};
use crate::error::{PipelineError, PipelineResult};

/// Two-component Gaussian mixture with diagonal covariances, fitted by EM.
/// Component means start at the per-label centroids.
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    /// Maximum EM iterations
    pub max_iter: usize,
    /// Convergence tolerance on the mean log-likelihood
    pub tol: f64,
    /// Floor added to every variance
    pub min_variance: f64,
    /// Mixing weights (n_components)
    pub weights: Array1<f64>,
    /// Mean vectors (n_components x n_features)
    pub means: Array2<f64>,
    /// Diagonal variances (n_components x n_features)
    pub variances: Array2<f64>,
    fitted: bool,
}

impl GaussianMixture {
    pub fn new(max_iter: usize, tol: f64, min_variance: f64) -> Self {
        Self {
            max_iter,
            tol,
            min_variance,
            weights: Array1::zeros(0),
            means: Array2::zeros((0, 0)),
            variances: Array2::zeros((0, 0)),
            fitted: false,
        }
    }

    fn n_components(&self) -> usize {
        self.means.nrows()
    }

    /// Initialize weights and variances from a hard nearest-mean assignment
    fn init_from_means(&mut self, observations: &Array2<f64>, means: Array2<f64>) {
        let (n_obs, n_features) = observations.dim();
        let n_components = means.nrows();
        let mut variances = Array2::zeros((n_components, n_features));
        let mut counts = vec![0usize; n_components];

        for row in observations.rows() {
            let k = (0..n_components)
                .min_by(|&a, &b| {
                    sq_distance(row, means.row(a)).total_cmp(&sq_distance(row, means.row(b)))
                })
                .unwrap_or(0);
            for j in 0..n_features {
                variances[[k, j]] += (row[j] - means[[k, j]]).powi(2);
            }
            counts[k] += 1;
        }

        for k in 0..n_components {
            for j in 0..n_features {
                if counts[k] > 0 {
                    variances[[k, j]] /= counts[k] as f64;
                }
                variances[[k, j]] += self.min_variance;
            }
        }

        self.weights = Array1::from_iter(counts.iter().map(|&c| (c.max(1)) as f64 / n_obs as f64));
        let total = self.weights.sum();
        self.weights /= total;
        self.means = means;
        self.variances = variances;
    }

    /// Log density of one observation under component `k`
    fn log_density(&self, obs: ArrayView1<'_, f64>, k: usize) -> f64 {
        let mut log_p = 0.0;
        for j in 0..obs.len() {
            let var = self.variances[[k, j]];
            let diff = obs[j] - self.means[[k, j]];
            log_p += -0.5 * ((2.0 * PI * var).ln() + diff * diff / var);
        }
        log_p
    }

    /// Log of weight * density for every (observation, component)
    fn weighted_log_prob(&self, observations: &Array2<f64>) -> Array2<f64> {
        let n_components = self.n_components();
        let mut out = Array2::zeros((observations.nrows(), n_components));
        for (t, obs) in observations.rows().into_iter().enumerate() {
            for k in 0..n_components {
                out[[t, k]] = self.weights[k].ln() + self.log_density(obs, k);
            }
        }
        out
    }

    /// Run EM. Returns (final mean log-likelihood, iterations used).
    pub fn fit_em(&mut self, observations: &Array2<f64>, labels: &Array1<u8>) -> PipelineResult<(f64, usize)> {
        let n_obs = observations.nrows();
        if n_obs < 2 {
            return Err(PipelineError::Model("Need at least 2 observations".to_string()));
        }
        let seeds = label_centroids(observations, labels)?;
        self.init_from_means(observations, seeds);

        let n_features = observations.ncols();
        let n_components = self.n_components();
        let mut prev_log_prob = f64::NEG_INFINITY;

        for iteration in 0..self.max_iter {
            // E-step
            let log_prob = self.weighted_log_prob(observations);
            let mut resp = Array2::zeros((n_obs, n_components));
            let mut total_log_prob = 0.0;
            for t in 0..n_obs {
                let row = log_prob.row(t).to_vec();
                let log_norm = log_sum_exp(&row);
                total_log_prob += log_norm;
                for k in 0..n_components {
                    resp[[t, k]] = (row[k] - log_norm).exp();
                }
            }
            let mean_log_prob = total_log_prob / n_obs as f64;

            // Check convergence
            if (mean_log_prob - prev_log_prob).abs() < self.tol {
                self.fitted = true;
                debug!("Mixture EM converged after {} iterations", iteration + 1);
                return Ok((mean_log_prob, iteration + 1));
            }
            prev_log_prob = mean_log_prob;

            // M-step
            for k in 0..n_components {
                let resp_sum: f64 = resp.column(k).sum();
                if resp_sum <= 0.0 {
                    continue;
                }
                self.weights[k] = resp_sum / n_obs as f64;

                for j in 0..n_features {
                    let mut weighted_sum = 0.0;
                    for t in 0..n_obs {
                        weighted_sum += resp[[t, k]] * observations[[t, j]];
                    }
                    self.means[[k, j]] = weighted_sum / resp_sum;
                }

                for j in 0..n_features {
                    let mut weighted_sq = 0.0;
                    for t in 0..n_obs {
                        let diff = observations[[t, j]] - self.means[[k, j]];
                        weighted_sq += resp[[t, k]] * diff * diff;
                    }
                    self.variances[[k, j]] = weighted_sq / resp_sum + self.min_variance;
                }
            }
        }

        // Did not converge within max_iter iterations
        self.fitted = true;
        Ok((prev_log_prob, self.max_iter))
    }
}

impl ClusterModel for GaussianMixture {
    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<u8>) -> PipelineResult<()> {
        let (log_prob, iterations) = self.fit_em(features, labels)?;
        debug!("Mixture fitted: mean log-likelihood {:.4} after {} iterations", log_prob, iterations);
        Ok(())
    }

    fn predict(&self, features: &Array2<f64>) -> PipelineResult<Array1<usize>> {
        if !self.fitted {
            return Err(PipelineError::Model("mixture used before fit".to_string()));
        }
        if features.ncols() != self.means.ncols() {
            return Err(PipelineError::Model("Observation features mismatch".to_string()));
        }
        let log_prob = self.weighted_log_prob(features);
        let assignment = log_prob
            .rows()
            .into_iter()
            .map(|row| {
                let mut best = 0;
                for k in 1..row.len() {
                    if row[k] > row[best] {
                        best = k;
                    }
                }
                best
            })
            .collect();
        Ok(Array1::from_vec(assignment))
    }
}

/// Log-sum-exp trick for numerical stability
fn log_sum_exp(log_values: &[f64]) -> f64 {
    if log_values.is_empty() {
        return f64::NEG_INFINITY;
    }

    let max_val = log_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }

    let sum_exp: f64 = log_values.iter().map(|&v| (v - max_val).exp()).sum();
    max_val + sum_exp.ln()
}

#[cfg(test)]
mod tests {
    use super::super::filter_outliers;
    use super::super::tests::two_blobs;
    use super::*;
    use ndarray::array;

    #[test]
    fn test_log_sum_exp() {
        let result = log_sum_exp(&[-1.0, -2.0, -3.0]);
        assert!(result > -1.0 && result < 0.0);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_components_follow_label_seeding() {
        let x = array![[0.0, 0.0], [0.3, 0.1], [0.1, 0.2], [9.0, 9.0], [9.2, 9.1], [9.1, 8.8]];
        let y = array![1, 1, 1, 0, 0, 0];
        let mut gmm = GaussianMixture::new(20, 1e-3, 1e-3);
        let (_, iterations) = gmm.fit_em(&x, &y).unwrap();
        assert!(iterations <= 20);
        assert_eq!(gmm.predict(&x).unwrap().to_vec(), vec![1, 1, 1, 0, 0, 0]);
        assert!((gmm.weights.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_filters_mislabelled_row() {
        let m = two_blobs();
        let mut gmm = GaussianMixture::new(20, 1e-3, 1e-3);
        let (filtered, report) = filter_outliers(&m, &mut gmm).unwrap();
        assert!(report.kept < report.total);
        assert!(!filtered.prices.iter().any(|&p| p == 57.0));
        for price in filtered.prices.iter() {
            assert!(m.prices.iter().any(|p| p == price));
        }
    }

    #[test]
    fn test_needs_two_observations() {
        let mut gmm = GaussianMixture::new(20, 1e-3, 1e-3);
        assert!(gmm.fit_em(&array![[1.0]], &array![1]).is_err());
    }
}
