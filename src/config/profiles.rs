use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// How buy labels are assigned within a departure-date cohort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPolicy {
    /// Every observation at the cohort minimum price is a buy
    MultiBuy,
    /// Only one observation per cohort is a buy
    SingleOptimal,
}

impl LabelPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultiBuy => "multi_buy",
            Self::SingleOptimal => "single_optimal",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::MultiBuy => "All observations tied at the cohort minimum are labelled buy.",
            Self::SingleOptimal => "The earliest observation at the cohort minimum is the only buy.",
        }
    }
}

impl fmt::Display for LabelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unsupervised model used to drop mislabelled-looking training rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierStrategy {
    /// Label-seeded k-means
    Centroid,
    /// Label-seeded Gaussian mixture fitted by EM
    Mixture,
}

impl OutlierStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Centroid => "centroid",
            Self::Mixture => "mixture",
        }
    }
}

impl fmt::Display for OutlierStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OutlierStrategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "centroid" | "kmeans" => Ok(Self::Centroid),
            "mixture" | "gmm" => Ok(Self::Mixture),
            other => Err(PipelineError::InvalidOption(format!("unknown outlier strategy: {}", other))),
        }
    }
}

/// Where the performance reporter takes its reference prices from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    /// Built-in per-route table
    Static,
    /// `minimum_price_*`, `maximum_price_*` and `random_price_*` JSON files
    Files,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outlier_strategy_aliases() {
        assert_eq!("kmeans".parse::<OutlierStrategy>().unwrap(), OutlierStrategy::Centroid);
        assert_eq!("GMM".parse::<OutlierStrategy>().unwrap(), OutlierStrategy::Mixture);
        assert!(matches!("dbscan".parse::<OutlierStrategy>(), Err(PipelineError::InvalidOption(_))));
    }
}
