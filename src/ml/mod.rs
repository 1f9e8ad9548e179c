pub mod currency;
pub mod features;
pub mod model;
pub mod outlier;
pub mod persistence;
pub mod preprocess;

pub use features::FeatureBuilder;
pub use model::{BuyClassifier, LogisticClassifier};
pub use outlier::{filter_outliers, ClusterModel, OutlierReport};
pub use persistence::{DatasetVariant, MatrixStore};
