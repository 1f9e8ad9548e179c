use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::types::{EvalSplit, Route};

/// Reference prices a policy is scored against, in EUR
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub min_price: f64,
    pub max_price: f64,
    pub random_price: f64,
}

impl Baseline {
    /// Built-in table values for a route and split
    pub fn from_profile(route: Route, split: EvalSplit) -> Self {
        let profile = route.profile();
        Self {
            min_price: profile.min_price(split),
            max_price: profile.max_price(split),
            random_price: profile.random_price(split),
        }
    }
}

/// Policy performance for one route. Percentages are stored unrounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub route: Route,
    pub split: EvalSplit,
    pub baseline: Baseline,
    pub average_price: f64,
    /// Saving relative to buying at a random time
    pub performance_pct: f64,
    /// Saving an oracle buying at the minimum would get
    pub max_performance_pct: f64,
    /// `performance_pct` as a share of `max_performance_pct`
    pub normalized_performance_pct: f64,
}

impl PerformanceReport {
    pub fn new(route: Route, split: EvalSplit, average_price: f64, baseline: Baseline) -> PipelineResult<Self> {
        let (performance_pct, max_performance_pct, normalized_performance_pct) =
            score(average_price, baseline.min_price, baseline.random_price)?;
        Ok(Self {
            route,
            split,
            baseline,
            average_price,
            performance_pct,
            max_performance_pct,
            normalized_performance_pct,
        })
    }

    /// Pretty print results to console
    pub fn print_summary(&self) {
        println!("{} {}:", self.split.as_str().to_uppercase(), self.route);
        println!("  minimumPrice:       {:.2}", self.baseline.min_price);
        println!("  maximumPrice:       {:.2}", self.baseline.max_price);
        println!("  randomPrice:        {:.2}", self.baseline.random_price);
        println!("  avgPredPrice:       {:.2}", self.average_price);
        println!("  Performance:        {:.2}%", self.performance_pct);
        println!("  Max Performance:    {:.2}%", self.max_performance_pct);
        println!("  Normalized Perf:    {:.2}%", self.normalized_performance_pct);
    }
}

/// `(performance, max performance, normalized performance)`, all in percent
pub fn score(average_price: f64, min_price: f64, random_price: f64) -> PipelineResult<(f64, f64, f64)> {
    if random_price == 0.0 {
        return Err(PipelineError::DegenerateBaseline("random price is zero".to_string()));
    }
    let performance = (random_price - average_price) / random_price * 100.0;
    let max_performance = (random_price - min_price) / random_price * 100.0;
    if max_performance == 0.0 {
        return Err(PipelineError::DegenerateBaseline(
            "minimum price equals random price".to_string(),
        ));
    }
    let normalized = performance / max_performance * 100.0;
    Ok((performance, max_performance, normalized))
}

/// Print a table over several routes
pub fn print_overview(reports: &[PerformanceReport]) {
    println!("\n{}", "=".repeat(72));
    println!("                       BUY-OR-WAIT BACKTEST");
    println!("{}", "=".repeat(72));
    println!(
        "{:<9} {:>6} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "Route", "Split", "Avg", "Random", "Perf %", "Max %", "Norm %"
    );
    println!("{}", "-".repeat(72));
    for r in reports {
        println!(
            "{:<9} {:>6} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
            r.route.as_str(),
            r.split.as_str(),
            r.average_price,
            r.baseline.random_price,
            r.performance_pct,
            r.max_performance_pct,
            r.normalized_performance_pct
        );
    }
    if !reports.is_empty() {
        let mean_norm = reports.iter().map(|r| r.normalized_performance_pct).sum::<f64>() / reports.len() as f64;
        println!("{}", "-".repeat(72));
        println!("Mean normalized performance: {:.2}%", mean_norm);
    }
    println!("{}", "=".repeat(72));
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_score_reference_values() {
        let (perf, max_perf, norm) = score(90.0, 80.0, 100.0).unwrap();
        assert_relative_eq!(perf, 10.0);
        assert_relative_eq!(max_perf, 20.0);
        assert_relative_eq!(norm, 50.0);
    }

    #[test]
    fn test_zero_random_price_is_degenerate() {
        assert!(matches!(score(90.0, 80.0, 0.0), Err(PipelineError::DegenerateBaseline(_))));
    }

    #[test]
    fn test_min_equal_random_is_degenerate() {
        assert!(matches!(score(90.0, 100.0, 100.0), Err(PipelineError::DegenerateBaseline(_))));
    }

    #[test]
    fn test_report_uses_split_baseline() {
        let baseline = Baseline::from_profile(Route::BcnBud, EvalSplit::Test);
        assert_eq!(baseline.random_price, 55.4820634921);

        let report = PerformanceReport::new(Route::BcnBud, EvalSplit::Test, 50.0, baseline).unwrap();
        assert!(report.performance_pct > 0.0);
        assert!(report.normalized_performance_pct < 100.0);
    }
}
