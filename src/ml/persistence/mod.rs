use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{FeatureMatrix, MatrixSet};

/// Dataset variant identifier; each variant is persisted in its own directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetVariant {
    Raw,
    CurrencyNormalized,
    CentroidFiltered,
    MixtureFiltered,
}

impl DatasetVariant {
    pub const ALL: [DatasetVariant; 4] = [
        DatasetVariant::Raw,
        DatasetVariant::CurrencyNormalized,
        DatasetVariant::CentroidFiltered,
        DatasetVariant::MixtureFiltered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetVariant::Raw => "raw",
            DatasetVariant::CurrencyNormalized => "currency_normalized",
            DatasetVariant::CentroidFiltered => "centroid_filtered",
            DatasetVariant::MixtureFiltered => "mixture_filtered",
        }
    }

    /// Train split has been through the outlier filter
    pub fn is_filtered(&self) -> bool {
        matches!(self, DatasetVariant::CentroidFiltered | DatasetVariant::MixtureFiltered)
    }
}

impl FromStr for DatasetVariant {
    type Err = PipelineError;

    fn from_str(s: &str) -> PipelineResult<Self> {
        let normalized = s.replace('-', "_").to_lowercase();
        DatasetVariant::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == normalized)
            .ok_or_else(|| PipelineError::InvalidOption(format!("unknown dataset variant: {}", s)))
    }
}

impl std::fmt::Display for DatasetVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const TRAIN_FILES: [&str; 3] = ["X_train.json", "y_train.json", "y_train_price.json"];
const TEST_FILES: [&str; 3] = ["X_test.json", "y_test.json", "y_test_price.json"];

/// Matrix persistence manager. Six JSON arrays per variant; serde_json is
/// built with `float_roundtrip` so prices reload bit-for-bit.
pub struct MatrixStore {
    root: PathBuf,
}

impl MatrixStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn variant_dir(&self, variant: DatasetVariant) -> PathBuf {
        self.root.join(variant.as_str())
    }

    pub fn exists(&self, variant: DatasetVariant) -> bool {
        let dir = self.variant_dir(variant);
        TRAIN_FILES.iter().chain(TEST_FILES.iter()).all(|f| dir.join(f).is_file())
    }

    pub fn save(&self, variant: DatasetVariant, set: &MatrixSet) -> PipelineResult<()> {
        set.train.check_shape("save train")?;
        set.test.check_shape("save test")?;

        let dir = self.variant_dir(variant);
        std::fs::create_dir_all(&dir).map_err(|source| PipelineError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        write_split(&dir, &TRAIN_FILES, &set.train)?;
        write_split(&dir, &TEST_FILES, &set.test)?;

        info!(
            "Saved {} matrices to {} ({} train rows, {} test rows)",
            variant,
            dir.display(),
            set.train.len(),
            set.test.len()
        );
        Ok(())
    }

    pub fn load(&self, variant: DatasetVariant) -> PipelineResult<MatrixSet> {
        let dir = self.variant_dir(variant);
        let train = read_split(&dir, &TRAIN_FILES, "load train")?;
        let test = read_split(&dir, &TEST_FILES, "load test")?;

        info!(
            "Loaded {} matrices from {} ({} train rows, {} test rows)",
            variant,
            dir.display(),
            train.len(),
            test.len()
        );
        Ok(MatrixSet { train, test })
    }
}

fn write_split(dir: &Path, names: &[&str; 3], matrix: &FeatureMatrix) -> PipelineResult<()> {
    write_json(&dir.join(names[0]), &matrix.features)?;
    write_json(&dir.join(names[1]), &matrix.labels)?;
    write_json(&dir.join(names[2]), &matrix.prices)
}

fn read_split(dir: &Path, names: &[&str; 3], stage: &'static str) -> PipelineResult<FeatureMatrix> {
    let features = read_json(&dir.join(names[0]))?;
    let labels = read_json(&dir.join(names[1]))?;
    let prices = read_json(&dir.join(names[2]))?;
    FeatureMatrix::new(features, labels, prices, stage)
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> PipelineResult<()> {
    let io_err = |source| PipelineError::Io { path: path.display().to_string(), source };
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(|source| PipelineError::Json {
        path: path.display().to_string(),
        source,
    })?;
    writer.flush().map_err(io_err)
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> PipelineResult<T> {
    let file = File::open(path).map_err(|source| PipelineError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| PipelineError::Json {
        path: path.display().to_string(),
        source,
    })
}
