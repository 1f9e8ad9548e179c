use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::results::Baseline;
use crate::error::{PipelineError, PipelineResult};
use crate::ml::persistence::read_json;
use crate::types::Route;

/// Historical reference prices stored next to the backtest:
/// `minimum_price_<ROUTE>.json` and `maximum_price_<ROUTE>.json` map trial
/// ids to prices, `random_price_<ROUTE>.json` holds a single number. All are
/// in the route's native currency.
pub struct ReferencePrices {
    dir: PathBuf,
}

impl ReferencePrices {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, kind: &str, route: Route) -> PathBuf {
        self.dir.join(format!("{}_price_{}.json", kind, route.as_str()))
    }

    /// Trial-averaged min/max and the random price, converted to EUR
    pub fn baseline(&self, route: Route) -> PipelineResult<Baseline> {
        let factor = route.currency_factor();
        let min_price = mean_of_trials(&self.path("minimum", route))? * factor;
        let max_price = mean_of_trials(&self.path("maximum", route))? * factor;
        let random_price: f64 = read_json(&self.path("random", route))?;

        let baseline = Baseline {
            min_price,
            max_price,
            random_price: random_price * factor,
        };
        debug!("Reference prices for {} from {}: {:?}", route, self.dir.display(), baseline);
        Ok(baseline)
    }
}

fn mean_of_trials(path: &Path) -> PipelineResult<f64> {
    let trials: BTreeMap<String, f64> = read_json(path)?;
    if trials.is_empty() {
        return Err(PipelineError::DegenerateBaseline(format!("{} has no trials", path.display())));
    }
    Ok(trials.values().sum::<f64>() / trials.len() as f64)
}
