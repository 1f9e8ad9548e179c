use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::profiles::{BaselineSource, LabelPolicy};
use crate::ml::persistence::DatasetVariant;
use crate::types::EvalSplit;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathSettings,
    pub features: FeatureSettings,
    pub outlier: OutlierSettings,
    pub classifier: ClassifierSettings,
    pub evaluation: EvaluationSettings,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Feature validation
        if NaiveDate::parse_from_str(&self.features.reference_date, "%Y%m%d").is_err() {
            errors.push(format!("reference_date must be YYYYMMDD, got {}", self.features.reference_date));
        }
        if self.features.train_end >= self.features.test_end {
            errors.push("train_end must be before test_end".to_string());
        }

        // Outlier validation
        if self.outlier.kmeans_max_iter == 0 || self.outlier.mixture_max_iter == 0 {
            errors.push("outlier iteration caps must be > 0".to_string());
        }
        if self.outlier.min_variance <= 0.0 {
            errors.push("min_variance must be > 0".to_string());
        }

        // Classifier validation
        if self.classifier.learning_rate <= 0.0 {
            errors.push("learning_rate must be > 0".to_string());
        }
        if self.classifier.threshold <= 0.0 || self.classifier.threshold >= 1.0 {
            errors.push("threshold must be between 0 and 1".to_string());
        }
        if self.classifier.rebalance_factor < 1.0 {
            errors.push("rebalance_factor must be >= 1".to_string());
        }

        // Evaluation validation
        if self.evaluation.trials == 0 {
            errors.push("trials must be > 0".to_string());
        }
        if self.evaluation.baseline == BaselineSource::Files && self.paths.reference_dir.is_none() {
            errors.push("baseline = files requires paths.reference_dir".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Root of the per-route record files
    pub data_dir: PathBuf,
    /// Dataset name, a subdirectory of `data_dir`
    pub dataset: String,
    /// Root under which each dataset variant gets its own directory
    pub matrix_dir: PathBuf,
    pub reference_dir: Option<PathBuf>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            dataset: "large_data_set".to_string(),
            matrix_dir: PathBuf::from("matrices"),
            reference_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    /// Day zero for the departure-date gap feature (first observed date)
    pub reference_date: String,
    /// Departures strictly before this `YYYYMMDD` go to train
    pub train_end: u32,
    /// Departures strictly before this go to test; later ones are dropped
    pub test_end: u32,
    pub label_policy: LabelPolicy,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            reference_date: "20151109".to_string(),
            train_end: 20160115,
            test_end: 20160220,
            label_policy: LabelPolicy::MultiBuy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierSettings {
    /// Variant whose train split is filtered
    pub source_variant: DatasetVariant,
    pub kmeans_max_iter: usize,
    pub kmeans_tol: f64,
    pub mixture_max_iter: usize,
    pub mixture_tol: f64,
    /// Variance floor for mixture components
    pub min_variance: f64,
    pub seed: u64,
}

impl Default for OutlierSettings {
    fn default() -> Self {
        Self {
            source_variant: DatasetVariant::CurrencyNormalized,
            kmeans_max_iter: 300,
            kmeans_tol: 1e-4,
            mixture_max_iter: 20,
            mixture_tol: 1e-3,
            min_variance: 1e-3,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub learning_rate: f64,
    pub max_iter: usize,
    pub l2_penalty: f64,
    /// Buy probability at or above which a row is predicted buy
    pub threshold: f64,
    pub standardize_prices: bool,
    pub rebalance: bool,
    pub rebalance_factor: f64,
    pub rebalance_seed: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            max_iter: 1000,
            l2_penalty: 0.01,
            threshold: 0.5,
            standardize_prices: false,
            rebalance: false,
            rebalance_factor: 1.5,
            rebalance_seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    pub variant: DatasetVariant,
    pub split: EvalSplit,
    /// Last-resort purchase state when no buy signal fires
    pub floor_state: i64,
    pub trials: usize,
    /// In-sample evaluation only scores rows with a larger departure gap
    pub in_sample_min_gap: i64,
    pub baseline: BaselineSource,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            variant: DatasetVariant::CurrencyNormalized,
            split: EvalSplit::Test,
            floor_state: 7,
            trials: 1,
            in_sample_min_gap: 20,
            baseline: BaselineSource::Static,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = PipelineConfig::default();
        config.features.train_end = 20160301;
        config.evaluation.trials = 0;
        config.evaluation.baseline = BaselineSource::Files;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
