// src/lib.rs
pub mod config;
pub mod engine;
pub mod estimator;
pub mod logging;
pub mod pair;
pub mod series;
pub mod signal;

pub use config::{CapitalSplit, ConfigError, PairTradeConfig};
pub use engine::{
    DecisionEngine, IntentKind, Leg, OrderResult, OrderSide, OrderStatus, SpreadState,
    SpreadStatus, TradeIntent,
};
pub use estimator::{
    cointegration_test, estimate_adjustment_coefficient, estimate_long_run_relationship,
    CointegrationEstimate, CointegrationVerdict, EngleGranger, EstimatorError, LongRunFit,
};
pub use pair::PairTrader;
pub use series::{PriceSample, PriceSeries};
