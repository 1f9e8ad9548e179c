use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ClassifierSettings;
use crate::error::{PipelineError, PipelineResult};

/// Buy-or-wait classifier: anything that can be fitted on labelled rows and
/// then predict a 0/1 decision per row.
#[cfg_attr(test, mockall::automock)]
pub trait BuyClassifier {
    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<u8>) -> PipelineResult<()>;
    fn predict(&self, features: &Array2<f64>) -> PipelineResult<Array1<u8>>;
}

/// Training report after model fit
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub samples: usize,
    pub accuracy: f64,
    pub buys_in_data: usize,
    pub waits_in_data: usize,
}

/// Model weights for persistence (logistic regression coefficients)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelWeights {
    coefficients: Vec<f64>,
    intercept: f64,
    feature_means: Vec<f64>,
    feature_stds: Vec<f64>,
}

/// Logistic regression trained by batch gradient descent with L2 penalty
pub struct LogisticClassifier {
    weights: Option<ModelWeights>,
    learning_rate: f64,
    max_iter: usize,
    l2_penalty: f64,
    threshold: f64,
    last_report: Option<TrainingReport>,
}

impl LogisticClassifier {
    pub fn new(settings: &ClassifierSettings) -> Self {
        Self {
            weights: None,
            learning_rate: settings.learning_rate,
            max_iter: settings.max_iter,
            l2_penalty: settings.l2_penalty,
            threshold: settings.threshold,
            last_report: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.weights.is_some()
    }

    pub fn last_report(&self) -> Option<&TrainingReport> {
        self.last_report.as_ref()
    }

    /// Buy probability per row
    pub fn predict_proba(&self, features: &Array2<f64>) -> PipelineResult<Array1<f64>> {
        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| PipelineError::Model("classifier used before fit".to_string()))?;
        if features.ncols() != weights.coefficients.len() {
            return Err(PipelineError::Model(format!(
                "expected {} features, got {}",
                weights.coefficients.len(),
                features.ncols()
            )));
        }

        let probs = features
            .axis_iter(Axis(0))
            .map(|row| {
                let mut z = weights.intercept;
                for (j, &val) in row.iter().enumerate() {
                    let std = weights.feature_stds[j];
                    let normalized = if std > 1e-10 {
                        (val - weights.feature_means[j]) / std
                    } else {
                        0.0
                    };
                    z += weights.coefficients[j] * normalized;
                }
                sigmoid(z)
            })
            .collect();
        Ok(probs)
    }

    /// Fit logistic regression via gradient descent
    fn fit_logistic_regression(&self, features: &Array2<f64>, labels: &[f64]) -> (Vec<f64>, f64) {
        let n = features.nrows();
        let num_features = features.ncols();

        let mut coefficients = vec![0.0; num_features];
        let mut intercept = 0.0;

        for _iter in 0..self.max_iter {
            let mut grad_coef = vec![0.0; num_features];
            let mut grad_intercept = 0.0;

            for i in 0..n {
                let mut z = intercept;
                for j in 0..num_features {
                    z += coefficients[j] * features[[i, j]];
                }
                let error = sigmoid(z) - labels[i];

                grad_intercept += error;
                for j in 0..num_features {
                    grad_coef[j] += error * features[[i, j]];
                }
            }

            intercept -= self.learning_rate * grad_intercept / n as f64;
            for j in 0..num_features {
                coefficients[j] -= self.learning_rate * (grad_coef[j] / n as f64 + self.l2_penalty * coefficients[j]);
            }
        }

        (coefficients, intercept)
    }

    /// Serialize model to JSON string for persistence
    pub fn save_to_json(&self) -> PipelineResult<String> {
        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| PipelineError::Model("no model to save".to_string()))?;
        serde_json::to_string(weights).map_err(|e| PipelineError::Model(e.to_string()))
    }

    /// Load fitted weights from JSON string
    pub fn load_from_json(json: &str, settings: &ClassifierSettings) -> PipelineResult<Self> {
        let weights: ModelWeights = serde_json::from_str(json).map_err(|e| PipelineError::Model(e.to_string()))?;
        let mut model = Self::new(settings);
        model.weights = Some(weights);
        Ok(model)
    }
}

impl BuyClassifier for LogisticClassifier {
    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<u8>) -> PipelineResult<()> {
        let n = features.nrows();
        if n == 0 || n != labels.len() {
            return Err(PipelineError::shape("classifier fit", n, labels.len(), n));
        }
        let num_features = features.ncols();

        // Z-score normalization, constant columns collapse to zero
        let means = features
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::Model("empty training matrix".to_string()))?;
        let stds = features.std_axis(Axis(0), 0.0);
        let mut normalized = features.clone();
        for j in 0..num_features {
            let std = stds[j];
            for i in 0..n {
                normalized[[i, j]] = if std > 1e-10 { (features[[i, j]] - means[j]) / std } else { 0.0 };
            }
        }

        let targets: Vec<f64> = labels.iter().map(|&l| f64::from(l)).collect();
        let (coefficients, intercept) = self.fit_logistic_regression(&normalized, &targets);

        self.weights = Some(ModelWeights {
            coefficients,
            intercept,
            feature_means: means.to_vec(),
            feature_stds: stds.to_vec(),
        });

        let predictions = self.predict(features)?;
        let correct = predictions.iter().zip(labels.iter()).filter(|(p, l)| p == l).count();
        let buys = labels.iter().filter(|&&l| l == 1).count();
        let report = TrainingReport {
            samples: n,
            accuracy: correct as f64 / n as f64,
            buys_in_data: buys,
            waits_in_data: n - buys,
        };

        info!(
            "Classifier trained: {} samples, {:.1}% accuracy, {}/{} buys",
            n,
            report.accuracy * 100.0,
            buys,
            n
        );
        self.last_report = Some(report);
        Ok(())
    }

    fn predict(&self, features: &Array2<f64>) -> PipelineResult<Array1<u8>> {
        let probs = self.predict_proba(features)?;
        let predictions = probs.mapv(|p| u8::from(p >= self.threshold));
        debug!(
            "Predicted {} buys out of {} rows (threshold {:.2})",
            predictions.iter().filter(|&&p| p == 1).count(),
            predictions.len(),
            self.threshold
        );
        Ok(predictions)
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
