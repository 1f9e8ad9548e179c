use thiserror::Error;

use crate::types::Route;

/// Errors raised by the fare pipeline. Every variant is fatal to the batch
/// that produced it.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown route identifier: {0}")]
    UnknownRoute(String),

    #[error("Route {route}: cohort with departure gap {departure_gap} has no row at floor state {floor_state}")]
    MissingFloorState {
        route: Route,
        departure_gap: i64,
        floor_state: i64,
    },

    #[error("Degenerate baseline: {0}")]
    DegenerateBaseline(String),

    #[error("Shape mismatch in {stage}: features={features}, labels={labels}, prices={prices}")]
    ShapeMismatch {
        stage: &'static str,
        features: usize,
        labels: usize,
        prices: usize,
    },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("No rows with label {0}")]
    EmptyLabelClass(u8),

    #[error("Route {0} has no cohorts to evaluate")]
    NoCohorts(Route),

    #[error("Model error: {0}")]
    Model(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error on {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    pub fn shape(stage: &'static str, features: usize, labels: usize, prices: usize) -> Self {
        PipelineError::ShapeMismatch { stage, features, labels, prices }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
