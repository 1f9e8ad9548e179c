//! Buy-or-wait flight fare pipeline: builds point-in-time feature matrices
//! from fare snapshots, filters outliers, and backtests a classifier-driven
//! purchase policy route by route.

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod ml;
pub mod types;

pub use error::{PipelineError, PipelineResult};
