use crate::config::{ConfigError, PairTradeConfig};
use crate::engine::{DecisionEngine, Leg, OrderResult, SpreadState, SpreadStatus, TradeIntent};
use crate::estimator::{CointegrationVerdict, EngleGranger, EstimatorError};
use crate::series::PriceSeries;
use crate::signal::{Sma, SpreadReading, SpreadWindow};

/// Feeds one pair's aligned closes through the rolling spread, the sizing
/// SMAs and the decision engine.
#[derive(Debug)]
pub struct PairTrader {
    engine: DecisionEngine,
    spread: SpreadWindow,
    sma1: Sma,
    sma2: Sma,
    bar_index: usize,
    last_reading: Option<SpreadReading>,
}

impl PairTrader {
    pub fn new(cfg: PairTradeConfig) -> Result<Self, ConfigError> {
        let spread = SpreadWindow::new(cfg.window);
        let sma1 = Sma::new(cfg.sma_period);
        let sma2 = Sma::new(cfg.sma_period);
        Ok(Self {
            engine: DecisionEngine::new(cfg)?,
            spread,
            sma1,
            sma2,
            bar_index: 0,
            last_reading: None,
        })
    }

    /// Offline check of a candidate pair with the configured test settings.
    pub fn validate_pair(
        &self,
        series_a: &PriceSeries,
        series_b: &PriceSeries,
    ) -> Result<CointegrationVerdict, EstimatorError> {
        EngleGranger::from_config(self.engine.config()).verdict(series_a, series_b)
    }

    /// Advances one bar. Indicators are updated even while an order is
    /// pending so their windows stay aligned with the price feed.
    pub fn on_bar(&mut self, price1: f64, price2: f64) -> Option<TradeIntent> {
        let bar_index = self.bar_index;
        self.bar_index += 1;

        let reading = self.spread.push(price1, price2);
        let sma1 = self.sma1.push(price1);
        let sma2 = self.sma2.push(price2);
        self.last_reading = reading;

        let (reading, sma1, sma2) = match (reading, sma1, sma2) {
            (Some(r), Some(s1), Some(s2)) => (r, s1, s2),
            _ => return None,
        };
        self.engine
            .evaluate(bar_index, price1, price2, reading.zscore, sma1, sma2)
    }

    pub fn on_order_result(&mut self, leg: Leg, result: OrderResult) {
        self.engine.on_order_result(leg, result);
    }

    pub fn bars_seen(&self) -> usize {
        self.bar_index
    }

    pub fn last_reading(&self) -> Option<SpreadReading> {
        self.last_reading
    }

    pub fn state(&self) -> &SpreadState {
        self.engine.state()
    }

    pub fn status(&self) -> SpreadStatus {
        self.engine.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> PairTradeConfig {
        PairTradeConfig {
            window: 5,
            sma_period: 3,
            ..PairTradeConfig::default()
        }
    }

    #[test]
    fn no_intents_before_indicators_are_warm() {
        let mut trader = PairTrader::new(small_config()).unwrap();
        for i in 0..8 {
            let p2 = 10.0 + i as f64;
            let p1 = 2.0 * p2 + if i % 2 == 0 { 0.1 } else { -0.1 };
            assert!(trader.on_bar(p1, p2).is_none());
        }
        assert_eq!(trader.bars_seen(), 8);
        assert!(trader.last_reading().is_none());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = PairTradeConfig {
            window: 1,
            ..PairTradeConfig::default()
        };
        assert!(PairTrader::new(cfg).is_err());
    }
}
