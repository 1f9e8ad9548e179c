use std::collections::BTreeMap;
use tracing::{debug, info};

use super::evaluator::{replay_route, RouteEvaluation};
use super::reference::ReferencePrices;
use super::results::{Baseline, PerformanceReport};
use crate::config::{ClassifierSettings, EvaluationSettings};
use crate::error::{PipelineError, PipelineResult};
use crate::ml::model::BuyClassifier;
use crate::ml::preprocess::{rebalance, restrict_departure_gap, standardize_prices};
use crate::types::{column, EvalSplit, FeatureMatrix, MatrixSet, Route};

/// Where reference prices come from
pub enum BaselineProvider {
    Static,
    Files(ReferencePrices),
}

impl BaselineProvider {
    pub fn baseline(&self, route: Route, split: EvalSplit) -> PipelineResult<Baseline> {
        match self {
            BaselineProvider::Static => Ok(Baseline::from_profile(route, split)),
            BaselineProvider::Files(prices) => prices.baseline(route),
        }
    }
}

/// Training rows and the rows the policy is replayed on
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub train: FeatureMatrix,
    pub eval: FeatureMatrix,
}

/// Fits a fresh classifier per trial and replays its predictions route by
/// route. Trial `i` gets seed `i * i`.
pub struct BacktestRunner<F>
where
    F: FnMut(u64) -> Box<dyn BuyClassifier>,
{
    evaluation: EvaluationSettings,
    preprocessing: ClassifierSettings,
    baselines: BaselineProvider,
    factory: F,
    /// Unfiltered training rows replayed by the in-sample split
    in_sample: Option<FeatureMatrix>,
}

impl<F> BacktestRunner<F>
where
    F: FnMut(u64) -> Box<dyn BuyClassifier>,
{
    pub fn new(
        evaluation: EvaluationSettings,
        preprocessing: ClassifierSettings,
        baselines: BaselineProvider,
        factory: F,
    ) -> Self {
        Self {
            evaluation,
            preprocessing,
            baselines,
            factory,
            in_sample: None,
        }
    }

    /// Replay in-sample evaluations on these rows instead of the fitted
    /// variant's own train split. Outlier filtering drops floor-state and
    /// buy rows, so a filtered variant is scored on its unfiltered source.
    pub fn with_in_sample_rows(mut self, rows: FeatureMatrix) -> Self {
        self.in_sample = Some(rows);
        self
    }

    /// Pick the evaluation rows for the configured split and apply the
    /// optional preprocessing
    pub fn prepare(&self, set: &MatrixSet) -> PipelineResult<PreparedData> {
        set.train.check_shape("backtest train")?;
        set.test.check_shape("backtest test")?;

        let mut train = set.train.clone();
        let mut eval = match self.evaluation.split {
            EvalSplit::Test => set.test.clone(),
            EvalSplit::Train => {
                let rows = self.in_sample.as_ref().unwrap_or(&set.train);
                rows.check_shape("backtest in-sample")?;
                restrict_departure_gap(rows, self.evaluation.in_sample_min_gap)
            }
        };

        if self.preprocessing.standardize_prices {
            // Realized prices stay in currency units; only the feature columns move
            standardize_prices(&mut train);
            standardize_prices(&mut eval);
        }
        if self.preprocessing.rebalance {
            train = rebalance(&train, self.preprocessing.rebalance_factor, self.preprocessing.rebalance_seed)?;
        }

        info!(
            "Backtest data: {} training rows, {} {} rows",
            train.len(),
            eval.len(),
            self.evaluation.split
        );
        Ok(PreparedData { train, eval })
    }

    fn fit_and_predict(&mut self, data: &PreparedData, seed: u64) -> PipelineResult<ndarray::Array1<u8>> {
        let mut classifier = (self.factory)(seed);
        classifier.fit(&data.train.features, &data.train.labels)?;
        let predictions = classifier.predict(&data.eval.features)?;
        if predictions.len() != data.eval.len() {
            return Err(PipelineError::shape("classifier predict", data.eval.len(), predictions.len(), data.eval.len()));
        }
        Ok(predictions)
    }

    /// Run every trial and score each route. Any failing route aborts the batch.
    pub fn run(&mut self, set: &MatrixSet, routes: &[Route]) -> PipelineResult<Vec<PerformanceReport>> {
        let data = self.prepare(set)?;
        let trials = self.evaluation.trials.max(1);
        let mut totals: BTreeMap<Route, f64> = BTreeMap::new();

        for trial in 0..trials {
            let seed = (trial * trial) as u64;
            let predictions = self.fit_and_predict(&data, seed)?;

            for &route in routes {
                let avg = replay_route(&data.eval, &predictions, route, self.evaluation.floor_state)?
                    .average_price();
                debug!("Trial {} (seed {}): {} avg price {:.4}", trial, seed, route, avg);
                *totals.entry(route).or_insert(0.0) += avg;
            }
        }

        let mut reports = Vec::with_capacity(routes.len());
        for &route in routes {
            let average_price = totals[&route] / trials as f64;
            let baseline = self.baselines.baseline(route, self.evaluation.split)?;
            let report = PerformanceReport::new(route, self.evaluation.split, average_price, baseline)?;
            info!(
                "{} {}: avg price {:.2}, performance {:.2}%, normalized {:.2}%",
                self.evaluation.split,
                route,
                report.average_price,
                report.performance_pct,
                report.normalized_performance_pct
            );
            reports.push(report);
        }
        Ok(reports)
    }

    /// Fit once and log every row of the route's cohorts next to its
    /// prediction, for eyeballing the policy
    pub fn inspect(&mut self, set: &MatrixSet, route: Route) -> PipelineResult<RouteEvaluation> {
        let data = self.prepare(set)?;
        let predictions = self.fit_and_predict(&data, 0)?;
        let evaluation = replay_route(&data.eval, &predictions, route, self.evaluation.floor_state)?;

        let mut rows = data.eval.route_rows(route);
        rows.sort_by_key(|&i| (data.eval.departure_gap(i), std::cmp::Reverse(data.eval.state(i))));
        for i in rows {
            let f = data.eval.row(i);
            info!(
                "{} gap {:>4} state {:>3} min {:>10.2} max {:>10.2} label {} pred {} price {:>10.2}",
                route,
                data.eval.departure_gap(i),
                data.eval.state(i),
                f[column::MIN_PREVIOUS_PRICE],
                f[column::MAX_PREVIOUS_PRICE],
                data.eval.labels[i],
                predictions[i],
                data.eval.prices[i]
            );
        }
        for outcome in &evaluation.cohorts {
            info!(
                "{} gap {:>4}: bought at state {} for {:.2}{}",
                route,
                outcome.departure_gap,
                outcome.state,
                outcome.price,
                if outcome.fallback { " (floor fallback)" } else { "" }
            );
        }
        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::MockBuyClassifier;
    use ndarray::{Array1, Array2};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn cohort(route: Route, gap: f64, states_prices: &[(f64, f64)], labels: &[u8]) -> FeatureMatrix {
        let n = states_prices.len();
        let mut features = Array2::zeros((n, column::WIDTH));
        for (i, &(state, price)) in states_prices.iter().enumerate() {
            features[[i, route.index()]] = 1.0;
            features[[i, column::DEPARTURE_GAP]] = gap;
            features[[i, column::STATE]] = state;
            features[[i, column::MIN_PREVIOUS_PRICE]] = price;
            features[[i, column::MAX_PREVIOUS_PRICE]] = price;
        }
        let prices = Array1::from_iter(states_prices.iter().map(|&(_, p)| p));
        FeatureMatrix::new(features, Array1::from_vec(labels.to_vec()), prices, "test").unwrap()
    }

    fn sample_set() -> MatrixSet {
        let train = FeatureMatrix::stack(
            &[
                cohort(Route::BcnBud, 10.0, &[(7.0, 50.0), (5.0, 40.0)], &[0, 1]),
                cohort(Route::BcnBud, 25.0, &[(7.0, 60.0), (5.0, 45.0)], &[0, 1]),
            ],
            "test",
        )
        .unwrap();
        let test = cohort(Route::BcnBud, 80.0, &[(7.0, 100.0), (5.0, 90.0), (3.0, 95.0)], &[0, 1, 0]);
        MatrixSet { train, test }
    }

    fn mock_predicting(predictions: Vec<u8>) -> Box<dyn BuyClassifier> {
        let mut mock = MockBuyClassifier::new();
        mock.expect_fit().times(1).returning(|_, _| Ok(()));
        mock.expect_predict()
            .times(1)
            .returning(move |_| Ok(Array1::from_vec(predictions.clone())));
        Box::new(mock)
    }

    #[test]
    fn test_run_scores_test_split() {
        let seeds = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&seeds);
        let evaluation = EvaluationSettings { trials: 3, ..EvaluationSettings::default() };
        let mut runner = BacktestRunner::new(
            evaluation,
            ClassifierSettings::default(),
            BaselineProvider::Static,
            move |seed| {
                seen.borrow_mut().push(seed);
                mock_predicting(vec![0, 1, 0])
            },
        );

        let reports = runner.run(&sample_set(), &[Route::BcnBud]).unwrap();
        assert_eq!(*seeds.borrow(), vec![0, 1, 4]);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].average_price, 90.0);
        assert_eq!(reports[0].baseline.random_price, Route::BcnBud.profile().random_price_test);
    }

    #[test]
    fn test_in_sample_split_restricts_gap() {
        let evaluation = EvaluationSettings { split: EvalSplit::Train, ..EvaluationSettings::default() };
        let mut runner = BacktestRunner::new(
            evaluation,
            ClassifierSettings::default(),
            BaselineProvider::Static,
            |_| mock_predicting(vec![0, 1]),
        );

        let data = runner.prepare(&sample_set()).unwrap();
        assert_eq!(data.eval.len(), 2);
        assert_eq!(data.eval.departure_gap(0), 25);

        let reports = runner.run(&sample_set(), &[Route::BcnBud]).unwrap();
        assert_eq!(reports[0].average_price, 45.0);
        assert_eq!(reports[0].split, EvalSplit::Train);
    }

    #[test]
    fn test_filtered_variant_is_scored_on_unfiltered_rows() {
        use crate::ml::outlier::{filter_outliers, ClusterModel};

        struct Assign(Vec<usize>);
        impl ClusterModel for Assign {
            fn fit(&mut self, _: &Array2<f64>, _: &Array1<u8>) -> PipelineResult<()> {
                Ok(())
            }
            fn predict(&self, _: &Array2<f64>) -> PipelineResult<Array1<usize>> {
                Ok(Array1::from_vec(self.0.clone()))
            }
        }

        let unfiltered = cohort(Route::BcnBud, 30.0, &[(9.0, 80.0), (8.0, 60.0), (7.0, 70.0)], &[0, 1, 0]);
        // the state-7 row disagrees with its cluster and is dropped
        let (filtered, report) = filter_outliers(&unfiltered, &mut Assign(vec![0, 1, 1])).unwrap();
        assert_eq!(report.kept, 2);
        let set = MatrixSet { train: filtered, test: unfiltered.clone() };
        let evaluation = EvaluationSettings { split: EvalSplit::Train, ..EvaluationSettings::default() };

        let mut own_rows = BacktestRunner::new(
            evaluation.clone(),
            ClassifierSettings::default(),
            BaselineProvider::Static,
            |_| mock_predicting(vec![0, 0]),
        );
        let err = own_rows.run(&set, &[Route::BcnBud]).unwrap_err();
        assert!(matches!(err, PipelineError::MissingFloorState { departure_gap: 30, .. }));

        let mut source_rows = BacktestRunner::new(
            evaluation,
            ClassifierSettings::default(),
            BaselineProvider::Static,
            |_| mock_predicting(vec![0, 0, 0]),
        )
        .with_in_sample_rows(unfiltered.clone());
        let data = source_rows.prepare(&set).unwrap();
        assert_eq!(data.train.len(), 2);
        assert_eq!(data.eval, unfiltered);

        let reports = source_rows.run(&set, &[Route::BcnBud]).unwrap();
        assert_eq!(reports[0].average_price, 70.0);
    }

    #[test]
    fn test_failing_route_aborts_batch() {
        let mut runner = BacktestRunner::new(
            EvaluationSettings::default(),
            ClassifierSettings::default(),
            BaselineProvider::Static,
            |_| mock_predicting(vec![0, 1, 0]),
        );
        let err = runner.run(&sample_set(), &[Route::BcnBud, Route::CrlOtp]).unwrap_err();
        assert!(matches!(err, PipelineError::NoCohorts(Route::CrlOtp)));
    }

    #[test]
    fn test_short_prediction_is_shape_mismatch() {
        let mut runner = BacktestRunner::new(
            EvaluationSettings::default(),
            ClassifierSettings::default(),
            BaselineProvider::Static,
            |_| mock_predicting(vec![1]),
        );
        let err = runner.run(&sample_set(), &[Route::BcnBud]).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_inspect_returns_cohort_outcomes() {
        let mut runner = BacktestRunner::new(
            EvaluationSettings::default(),
            ClassifierSettings::default(),
            BaselineProvider::Static,
            |_| mock_predicting(vec![0, 0, 0]),
        );
        let evaluation = runner.inspect(&sample_set(), Route::BcnBud).unwrap();
        assert_eq!(evaluation.cohorts.len(), 1);
        assert!(evaluation.cohorts[0].fallback);
        assert_eq!(evaluation.average_price(), 100.0);
    }
}
