use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use std::path::Path;
use tracing::{debug, info};

use super::runtime::PipelineConfig;

/// Layer defaults, an optional TOML file and `FARE_*` environment variables
/// (e.g. `FARE_EVALUATION__TRIALS=20`), then validate.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    load_layered(path, environment())
}

/// `FARE_` prefix, `__` between nested keys
fn environment() -> Environment {
    Environment::with_prefix("FARE")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn load_layered(path: &Path, environment: Environment) -> Result<PipelineConfig> {
    let defaults = Config::try_from(&PipelineConfig::default())
        .context("Failed to seed configuration defaults")?;

    let settings = Config::builder()
        .add_source(defaults)
        .add_source(File::from(path).required(false))
        .add_source(environment)
        .build()
        .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

    let config: PipelineConfig = settings
        .try_deserialize()
        .context("Invalid configuration")?;

    if let Err(errors) = config.validate() {
        return Err(anyhow!("Invalid configuration: {}", errors.join(", ")));
    }

    debug!("Configuration loaded: {:?}", config);
    Ok(config)
}

/// Write the default configuration as TOML
pub fn write_default_config(path: &Path) -> Result<()> {
    let body = toml::to_string_pretty(&PipelineConfig::default())?;
    std::fs::write(path, body)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Default configuration written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelPolicy;
    use crate::types::EvalSplit;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.evaluation.floor_state, 7);
        assert_eq!(config.features.label_policy, LabelPolicy::MultiBuy);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(
            &path,
            "[evaluation]\nsplit = \"train\"\ntrials = 5\n\n[features]\nlabel_policy = \"single_optimal\"\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.evaluation.split, EvalSplit::Train);
        assert_eq!(config.evaluation.trials, 5);
        assert_eq!(config.evaluation.floor_state, 7);
        assert_eq!(config.features.label_policy, LabelPolicy::SingleOptimal);
    }

    #[test]
    fn test_written_defaults_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        write_default_config(&path).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.outlier.mixture_max_iter, 20);
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "[evaluation]\ntrials = 5\n").unwrap();

        let vars: config::Map<String, String> = [
            ("FARE_EVALUATION__TRIALS", "20"),
            ("FARE_EVALUATION__SPLIT", "train"),
            ("FARE_CLASSIFIER__REBALANCE", "true"),
            ("OTHER_EVALUATION__TRIALS", "3"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = load_layered(&path, environment().source(Some(vars))).unwrap();
        assert_eq!(config.evaluation.trials, 20);
        assert_eq!(config.evaluation.split, EvalSplit::Train);
        assert!(config.classifier.rebalance);
    }

    #[test]
    fn test_double_underscore_prefix_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let vars: config::Map<String, String> =
            [("FARE__EVALUATION__TRIALS".to_string(), "20".to_string())].into_iter().collect();
        let config = load_layered(&dir.path().join("absent.toml"), environment().source(Some(vars))).unwrap();
        assert_eq!(config.evaluation.trials, 1);
    }
}
