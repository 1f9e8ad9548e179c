use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// One of the eight monitored origin/destination lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Route {
    #[serde(rename = "BCN_BUD")]
    BcnBud,
    #[serde(rename = "BUD_BCN")]
    BudBcn,
    #[serde(rename = "CRL_OTP")]
    CrlOtp,
    #[serde(rename = "MLH_SKP")]
    MlhSkp,
    #[serde(rename = "MMX_SKP")]
    MmxSkp,
    #[serde(rename = "OTP_CRL")]
    OtpCrl,
    #[serde(rename = "SKP_MLH")]
    SkpMlh,
    #[serde(rename = "SKP_MMX")]
    SkpMmx,
}

/// Which half of the dataset an evaluation (and its baselines) refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalSplit {
    Train,
    Test,
}

impl EvalSplit {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalSplit::Train => "train",
            EvalSplit::Test => "test",
        }
    }
}

impl fmt::Display for EvalSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EvalSplit {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "train" => Ok(EvalSplit::Train),
            "test" => Ok(EvalSplit::Test),
            other => Err(PipelineError::InvalidOption(format!("unknown split: {}", other))),
        }
    }
}

/// Static per-route constants. Reference prices are in EUR.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteProfile {
    pub route: Route,
    /// Multiplier from the route's native currency to EUR
    pub currency_factor: f64,
    pub random_price_train: f64,
    pub random_price_test: f64,
    pub min_price_train: f64,
    pub min_price_test: f64,
    pub max_price_train: f64,
    pub max_price_test: f64,
}

impl RouteProfile {
    pub fn random_price(&self, split: EvalSplit) -> f64 {
        match split {
            EvalSplit::Train => self.random_price_train,
            EvalSplit::Test => self.random_price_test,
        }
    }

    pub fn min_price(&self, split: EvalSplit) -> f64 {
        match split {
            EvalSplit::Train => self.min_price_train,
            EvalSplit::Test => self.min_price_test,
        }
    }

    pub fn max_price(&self, split: EvalSplit) -> f64 {
        match split {
            EvalSplit::Train => self.max_price_train,
            EvalSplit::Test => self.max_price_test,
        }
    }
}

const PROFILES: [RouteProfile; Route::COUNT] = [
    RouteProfile {
        route: Route::BcnBud,
        currency_factor: 1.0, // EUR
        random_price_train: 68.4391315136,
        random_price_test: 55.4820634921,
        min_price_train: 44.4344444444,
        min_price_test: 32.370952381,
        max_price_train: 115.915925926,
        max_price_test: 126.656666667,
    },
    RouteProfile {
        route: Route::BudBcn,
        currency_factor: 0.0032, // HUF
        random_price_train: 67.4260645161,
        random_price_test: 57.8067301587,
        min_price_train: 38.9605925926,
        min_price_test: 29.3775238095,
        max_price_train: 126.782814815,
        max_price_test: 168.95847619,
    },
    RouteProfile {
        route: Route::CrlOtp,
        currency_factor: 1.0, // EUR
        random_price_train: 93.2808545727,
        random_price_test: 23.152037037,
        min_price_train: 68.6566666667,
        min_price_test: 11.3788888889,
        max_price_train: 144.212222222,
        max_price_test: 93.6011111111,
    },
    RouteProfile {
        route: Route::MlhSkp,
        currency_factor: 1.0, // EUR
        random_price_train: 77.4751720047,
        random_price_test: 33.3727319588,
        min_price_train: 49.6566666667,
        min_price_test: 16.5284615385,
        max_price_train: 129.656666667,
        max_price_test: 90.5669230769,
    },
    RouteProfile {
        route: Route::MmxSkp,
        currency_factor: 0.12, // SEK
        random_price_train: 75.0340018399,
        random_price_test: 35.3032044199,
        min_price_train: 48.2691891892,
        min_price_test: 18.6184615385,
        max_price_train: 141.252972973,
        max_price_test: 101.233846154,
    },
    RouteProfile {
        route: Route::OtpCrl,
        currency_factor: 0.25, // RON
        random_price_train: 73.9964736451,
        random_price_test: 41.1180555556,
        min_price_train: 47.0833333333,
        min_price_test: 14.6111111111,
        max_price_train: 149.972222222,
        max_price_test: 198.361111111,
    },
    RouteProfile {
        route: Route::SkpMlh,
        currency_factor: 0.018, // MKD
        random_price_train: 105.280932384,
        random_price_test: 56.3433402062,
        min_price_train: 68.982,
        min_price_test: 21.5127692308,
        max_price_train: 174.402,
        max_price_test: 154.505076923,
    },
    RouteProfile {
        route: Route::SkpMmx,
        currency_factor: 0.018, // MKD
        random_price_train: 97.1720369004,
        random_price_test: 60.2546519337,
        min_price_train: 63.1279459459,
        min_price_test: 25.8050769231,
        max_price_train: 160.91172973,
        max_price_test: 208.020461538,
    },
];

impl Route {
    pub const COUNT: usize = 8;

    pub const ALL: [Route; Route::COUNT] = [
        Route::BcnBud,
        Route::BudBcn,
        Route::CrlOtp,
        Route::MlhSkp,
        Route::MmxSkp,
        Route::OtpCrl,
        Route::SkpMlh,
        Route::SkpMmx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::BcnBud => "BCN_BUD",
            Route::BudBcn => "BUD_BCN",
            Route::CrlOtp => "CRL_OTP",
            Route::MlhSkp => "MLH_SKP",
            Route::MmxSkp => "MMX_SKP",
            Route::OtpCrl => "OTP_CRL",
            Route::SkpMlh => "SKP_MLH",
            Route::SkpMmx => "SKP_MMX",
        }
    }

    /// Position of this route's one-hot column in the feature matrix
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Route::ALL.get(index).copied()
    }

    pub fn profile(&self) -> &'static RouteProfile {
        &PROFILES[self.index()]
    }

    pub fn currency_factor(&self) -> f64 {
        self.profile().currency_factor
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Route {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        Route::ALL
            .iter()
            .copied()
            .find(|route| route.as_str() == normalized)
            .ok_or_else(|| PipelineError::UnknownRoute(s.to_string()))
    }
}
