pub mod backtest;
pub mod evaluator;
pub mod reference;
pub mod results;

pub use backtest::{BacktestRunner, BaselineProvider, PreparedData};
pub use evaluator::{evaluate_route, replay_route, CohortOutcome, RouteEvaluation, FLOOR_STATE};
pub use reference::ReferencePrices;
pub use results::{Baseline, PerformanceReport};
