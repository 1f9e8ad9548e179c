use ndarray::Array1;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{FeatureMatrix, Route};

/// Default last-resort purchase state
pub const FLOOR_STATE: i64 = 7;

/// What the replayed policy paid for one departure date
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CohortOutcome {
    pub departure_gap: i64,
    /// State at which the purchase happened
    pub state: i64,
    pub price: f64,
    /// True when no buy signal fired and the floor-state price was used
    pub fallback: bool,
}

/// Result of replaying a route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteEvaluation {
    pub route: Route,
    pub cohorts: Vec<CohortOutcome>,
}

impl RouteEvaluation {
    pub fn average_price(&self) -> f64 {
        self.cohorts.iter().map(|c| c.price).sum::<f64>() / self.cohorts.len() as f64
    }

    pub fn fallback_count(&self) -> usize {
        self.cohorts.iter().filter(|c| c.fallback).count()
    }
}

/// Replay the buy/wait predictions for every cohort of `route` and return the
/// mean price paid.
pub fn evaluate_route(
    matrix: &FeatureMatrix,
    predictions: &Array1<u8>,
    route: Route,
    floor_state: i64,
) -> PipelineResult<f64> {
    Ok(replay_route(matrix, predictions, route, floor_state)?.average_price())
}

/// Same as [`evaluate_route`], keeping the per-cohort outcomes
pub fn replay_route(
    matrix: &FeatureMatrix,
    predictions: &Array1<u8>,
    route: Route,
    floor_state: i64,
) -> PipelineResult<RouteEvaluation> {
    matrix.check_shape("policy evaluator")?;
    if predictions.len() != matrix.len() {
        return Err(PipelineError::shape("policy evaluator", matrix.len(), predictions.len(), matrix.prices.len()));
    }

    let mut cohorts: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for i in matrix.route_rows(route) {
        cohorts.entry(matrix.departure_gap(i)).or_default().push(i);
    }
    if cohorts.is_empty() {
        return Err(PipelineError::NoCohorts(route));
    }

    let outcomes = cohorts
        .iter()
        .map(|(&gap, rows)| replay_cohort(matrix, predictions, route, gap, rows, floor_state))
        .collect::<PipelineResult<Vec<_>>>()?;

    let evaluation = RouteEvaluation { route, cohorts: outcomes };
    debug!(
        "Route {}: {} cohorts, {} fell back to state {}, avg price {:.4}",
        route,
        evaluation.cohorts.len(),
        evaluation.fallback_count(),
        floor_state,
        evaluation.average_price()
    );
    Ok(evaluation)
}

/// Rows are visited from the earliest observation (largest state) onwards, so
/// the first buy signal met is the earliest one; a later row could only
/// override it with a strictly larger state, which this order rules out.
///
/// Signals at states below `floor_state` are still honoured; the floor only
/// supplies the price when no row is predicted buy.
fn replay_cohort(
    matrix: &FeatureMatrix,
    predictions: &Array1<u8>,
    route: Route,
    departure_gap: i64,
    rows: &[usize],
    floor_state: i64,
) -> PipelineResult<CohortOutcome> {
    let mut ordered = rows.to_vec();
    // stable: ties keep matrix order
    ordered.sort_by_key(|&i| std::cmp::Reverse(matrix.state(i)));

    let mut found: Option<CohortOutcome> = None;
    let mut floor_price: Option<f64> = None;

    for &i in &ordered {
        let state = matrix.state(i);
        if state == floor_state && floor_price.is_none() {
            floor_price = Some(matrix.prices[i]);
        }
        let overrides = found.map_or(true, |f| state > f.state);
        if predictions[i] == 1 && overrides {
            found = Some(CohortOutcome {
                departure_gap,
                state,
                price: matrix.prices[i],
                fallback: false,
            });
        }
    }

    if let Some(outcome) = found {
        return Ok(outcome);
    }

    let price = floor_price.ok_or(PipelineError::MissingFloorState {
        route,
        departure_gap,
        floor_state,
    })?;
    Ok(CohortOutcome {
        departure_gap,
        state: floor_state,
        price,
        fallback: true,
    })
}
