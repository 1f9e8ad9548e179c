use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::{FeatureSettings, LabelPolicy};
use crate::data::RecordSource;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{column, parse_date, FeatureMatrix, MatrixSet, PriceObservation, RawRecord, Route};

/// Rows accumulated for one split before they become a `FeatureMatrix`
#[derive(Debug, Default)]
struct RowBuffer {
    rows: Vec<[f64; column::WIDTH]>,
    labels: Vec<u8>,
    prices: Vec<f64>,
}

impl RowBuffer {
    fn push(&mut self, row: [f64; column::WIDTH], label: u8, price: f64) {
        self.rows.push(row);
        self.labels.push(label);
        self.prices.push(price);
    }

    fn into_matrix(self, stage: &'static str) -> PipelineResult<FeatureMatrix> {
        FeatureMatrix::from_rows(self.rows, self.labels, self.prices, stage)
    }
}

/// Per-cohort facts needed for labelling
#[derive(Debug, Clone, Copy)]
struct CohortStats {
    min_price: f64,
    /// Largest state observed at `min_price`
    optimal_state: i64,
}

/// Turns raw price snapshots into the 12-column feature matrix with
/// buy/wait labels and realized prices.
pub struct FeatureBuilder {
    reference_date: NaiveDate,
    train_end: u32,
    test_end: u32,
    label_policy: LabelPolicy,
}

impl FeatureBuilder {
    pub fn new(settings: &FeatureSettings) -> PipelineResult<Self> {
        Ok(Self {
            reference_date: parse_date(&settings.reference_date)?,
            train_end: settings.train_end,
            test_end: settings.test_end,
            label_policy: settings.label_policy,
        })
    }

    /// Build from every known route of a record source, in route order
    pub fn build_from_source(&self, source: &impl RecordSource) -> PipelineResult<MatrixSet> {
        let mut batches = Vec::with_capacity(Route::COUNT);
        for route in Route::ALL {
            batches.push((route.as_str().to_string(), source.records(route)?));
        }
        self.build(&batches)
    }

    /// Build from `(route identifier, records)` batches. Output rows follow
    /// batch order, then record order; discarded departures produce no row.
    pub fn build(&self, batches: &[(String, Vec<RawRecord>)]) -> PipelineResult<MatrixSet> {
        let mut train = RowBuffer::default();
        let mut test = RowBuffer::default();

        for (route_id, records) in batches {
            let route: Route = route_id.parse()?;
            self.build_route(route, records, &mut train, &mut test)?;
        }

        let set = MatrixSet {
            train: train.into_matrix("feature builder train")?,
            test: test.into_matrix("feature builder test")?,
        };
        info!(
            "Feature matrices built with {} labels: {} train rows, {} test rows",
            self.label_policy,
            set.train.len(),
            set.test.len()
        );
        Ok(set)
    }

    fn build_route(
        &self,
        route: Route,
        records: &[RawRecord],
        train: &mut RowBuffer,
        test: &mut RowBuffer,
    ) -> PipelineResult<()> {
        let observations = records
            .iter()
            .map(PriceObservation::parse)
            .collect::<PipelineResult<Vec<_>>>()?;

        let mut cohorts: HashMap<NaiveDate, Vec<usize>> = HashMap::new();
        for (i, obs) in observations.iter().enumerate() {
            cohorts.entry(obs.departure).or_default().push(i);
        }
        let stats: HashMap<NaiveDate, CohortStats> = cohorts
            .iter()
            .map(|(date, members)| (*date, cohort_stats(&observations, members)))
            .collect();

        let (mut n_train, mut n_test, mut n_discarded) = (0usize, 0usize, 0usize);

        for obs in &observations {
            debug!(
                "Construct route {}, state {}, departure date {}",
                route, obs.state, obs.departure
            );

            let key = obs.departure_key();
            let target = if key < self.train_end {
                n_train += 1;
                &mut *train
            } else if key < self.test_end {
                n_test += 1;
                &mut *test
            } else {
                n_discarded += 1;
                continue;
            };

            let gap = (obs.departure - self.reference_date).num_days();
            if gap < 0 {
                return Err(PipelineError::InvalidRecord(format!(
                    "{} departure {} precedes reference date {}",
                    route, obs.departure, self.reference_date
                )));
            }

            let members = &cohorts[&obs.departure];
            let (min_previous, max_previous) = previous_price_range(&observations, members, obs.state);

            let mut row = [0.0; column::WIDTH];
            row[column::ROUTE_START + route.index()] = 1.0;
            row[column::DEPARTURE_GAP] = gap as f64;
            row[column::STATE] = obs.state as f64;
            row[column::MIN_PREVIOUS_PRICE] = min_previous;
            row[column::MAX_PREVIOUS_PRICE] = max_previous;

            let label = self.label(obs, &stats[&obs.departure]);
            target.push(row, label, obs.price);
        }

        info!(
            "Route {}: {} records, {} cohorts ({} train, {} test, {} discarded)",
            route,
            observations.len(),
            cohorts.len(),
            n_train,
            n_test,
            n_discarded
        );
        Ok(())
    }

    fn label(&self, obs: &PriceObservation, stats: &CohortStats) -> u8 {
        let is_buy = match self.label_policy {
            LabelPolicy::MultiBuy => obs.price == stats.min_price,
            LabelPolicy::SingleOptimal => obs.state == stats.optimal_state,
        };
        u8::from(is_buy)
    }
}

fn cohort_stats(observations: &[PriceObservation], members: &[usize]) -> CohortStats {
    let min_price = members
        .iter()
        .map(|&i| observations[i].price)
        .fold(f64::INFINITY, f64::min);
    let optimal_state = members
        .iter()
        .filter(|&&i| observations[i].price == min_price)
        .map(|&i| observations[i].state)
        .max()
        .unwrap_or_default();
    CohortStats { min_price, optimal_state }
}

/// Min and max price over the cohort members observed no later than `state`
/// (i.e. with a state at least as large). The current record always qualifies.
fn previous_price_range(observations: &[PriceObservation], members: &[usize], state: i64) -> (f64, f64) {
    members
        .iter()
        .map(|&i| &observations[i])
        .filter(|o| o.state >= state)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), o| {
            (lo.min(o.price), hi.max(o.price))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;

    fn record(date: &str, state: i64, price: &str) -> RawRecord {
        RawRecord {
            date: date.to_string(),
            state,
            minimum_price: price.to_string(),
        }
    }

    fn builder(policy: LabelPolicy) -> FeatureBuilder {
        FeatureBuilder::new(&FeatureSettings {
            label_policy: policy,
            ..FeatureSettings::default()
        })
        .unwrap()
    }

    fn sample_batches() -> Vec<(String, Vec<RawRecord>)> {
        vec![
            (
                "BCN_BUD".to_string(),
                vec![
                    record("20151201", 9, "50.00"),
                    record("20151201", 8, "40.00"),
                    record("20151201", 7, "45.00"),
                    record("20151201", 6, "40.00"),
                    record("20160201", 8, "30.00"),
                    record("20160201", 7, "35.00"),
                    record("20160301", 7, "99.00"),
                ],
            ),
            (
                "SKP_MMX".to_string(),
                vec![record("20151215", 8, "3.000"), record("20151215", 7, "2.500")],
            ),
        ]
    }

    #[test]
    fn test_split_and_one_hot() {
        let set = builder(LabelPolicy::MultiBuy).build(&sample_batches()).unwrap();
        assert_eq!(set.train.len(), 6);
        assert_eq!(set.test.len(), 2);

        for m in [&set.train, &set.test] {
            let one_hot = m.features.slice(ndarray::s![.., 0..Route::COUNT]).sum_axis(Axis(1));
            assert!(one_hot.iter().all(|&s| s == 1.0));
        }
        assert_eq!(set.train.route_of(4), Some(Route::SkpMmx));
        // denar scrapes use a dot for thousands
        assert_eq!(set.train.prices.slice(ndarray::s![4..]).to_vec(), vec![3000.0, 2500.0]);
        // 2015-12-01 is 22 days after 2015-11-09
        assert_eq!(set.train.departure_gap(0), 22);
    }

    #[test]
    fn test_previous_prices_are_causal() {
        let set = builder(LabelPolicy::MultiBuy).build(&sample_batches()).unwrap();
        let m = &set.train;
        // state 9 sees only itself
        assert_eq!(m.features[[0, column::MIN_PREVIOUS_PRICE]], 50.0);
        assert_eq!(m.features[[0, column::MAX_PREVIOUS_PRICE]], 50.0);
        // state 7 sees 9, 8 and 7 but not 6
        assert_eq!(m.features[[2, column::MIN_PREVIOUS_PRICE]], 40.0);
        assert_eq!(m.features[[2, column::MAX_PREVIOUS_PRICE]], 50.0);
    }

    #[test]
    fn test_multi_buy_labels_every_minimum() {
        let set = builder(LabelPolicy::MultiBuy).build(&sample_batches()).unwrap();
        assert_eq!(set.train.labels.to_vec(), vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(set.test.labels.to_vec(), vec![1, 0]);
        for (label, price) in set.train.labels.iter().zip(set.train.prices.iter()).take(4) {
            assert_eq!(*label == 1, *price == 40.0);
        }
    }

    #[test]
    fn test_single_optimal_labels_earliest_minimum() {
        let set = builder(LabelPolicy::SingleOptimal).build(&sample_batches()).unwrap();
        assert_eq!(set.train.labels.to_vec(), vec![0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_unknown_route_fails() {
        let batches = vec![("LHR_JFK".to_string(), vec![record("20151201", 7, "10")])];
        let err = builder(LabelPolicy::MultiBuy).build(&batches).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownRoute(id) if id == "LHR_JFK"));
    }

    #[test]
    fn test_departure_before_reference_fails() {
        let batches = vec![("BCN_BUD".to_string(), vec![record("20151101", 7, "10")])];
        let err = builder(LabelPolicy::MultiBuy).build(&batches).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRecord(_)));
    }

    #[test]
    fn test_build_is_deterministic() {
        let b = builder(LabelPolicy::MultiBuy);
        assert_eq!(b.build(&sample_batches()).unwrap(), b.build(&sample_batches()).unwrap());
    }

    #[test]
    fn test_build_from_source() {
        let mut source = HashMap::new();
        source.insert(Route::OtpCrl, vec![record("20151120", 8, "120"), record("20151120", 7, "100")]);
        let set = builder(LabelPolicy::MultiBuy).build_from_source(&source).unwrap();
        assert_eq!(set.train.len(), 2);
        assert_eq!(set.train.route_rows(Route::OtpCrl), vec![0, 1]);
        assert!(set.test.is_empty());
    }
}
