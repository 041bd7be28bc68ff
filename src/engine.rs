//! Per-bar trading decisions for one pair.
//!
//! `DecisionEngine` is a plain state machine over `SpreadState`. The host calls
//! `evaluate` once per bar in timestamp order and reports every order outcome
//! through `on_order_result` before the next bar.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::config::{ConfigError, PairTradeConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpreadStatus {
    Flat,
    ShortSpread,
    LongSpread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Leg {
    Leg1,
    Leg2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntentKind {
    EnterShortSpread,
    EnterLongSpread,
    Flatten,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Position change requested for both legs on one bar.
///
/// For entries the deltas are signed share counts relative to the current
/// holding: positive buys, negative sells. A `Flatten` intent asks the host to
/// take each leg's actual position to zero; its deltas only mirror the engine's
/// tracked quantities, which go stale after a failed order, so they must not
/// be sent as orders. See `target_position`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TradeIntent {
    pub bar_index: usize,
    pub kind: IntentKind,
    pub leg1_delta: i64,
    pub leg2_delta: i64,
    pub zscore: f64,
}

impl TradeIntent {
    pub fn delta(&self, leg: Leg) -> i64 {
        match leg {
            Leg::Leg1 => self.leg1_delta,
            Leg::Leg2 => self.leg2_delta,
        }
    }

    pub fn side(&self, leg: Leg) -> Option<OrderSide> {
        match self.delta(leg) {
            0 => None,
            d if d > 0 => Some(OrderSide::Buy),
            _ => Some(OrderSide::Sell),
        }
    }

    pub fn size(&self, leg: Leg) -> u64 {
        self.delta(leg).unsigned_abs()
    }

    /// Absolute holding the host should end up with on `leg`, when the
    /// intent fixes one. Only `Flatten` does: it closes whatever is open,
    /// and is a no-op for a leg the broker already holds flat.
    pub fn target_position(&self, _leg: Leg) -> Option<i64> {
        match self.kind {
            IntentKind::Flatten => Some(0),
            IntentKind::EnterShortSpread | IntentKind::EnterLongSpread => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderStatus {
    Filled,
    Rejected,
    Expired,
    Canceled,
    MarginCalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrderResult {
    pub status: OrderStatus,
    pub fill_price: Option<f64>,
}

impl OrderResult {
    pub fn filled(price: f64) -> Self {
        Self {
            status: OrderStatus::Filled,
            fill_price: Some(price),
        }
    }

    pub fn failed(status: OrderStatus) -> Self {
        Self {
            status,
            fill_price: None,
        }
    }
}

/// Bookkeeping for one pair. Quantities are share counts held per leg; the
/// direction of each leg follows from `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpreadState {
    pub status: SpreadStatus,
    pub qty_leg1: i64,
    pub qty_leg2: i64,
    pub pending_order: bool,
    #[serde(skip)]
    last_intent: Option<TradeIntent>,
}

impl Default for SpreadState {
    fn default() -> Self {
        Self {
            status: SpreadStatus::Flat,
            qty_leg1: 0,
            qty_leg2: 0,
            pending_order: false,
            last_intent: None,
        }
    }
}

impl SpreadState {
    /// Signed exposure per leg as tracked by the engine.
    pub fn exposure(&self) -> (i64, i64) {
        match self.status {
            SpreadStatus::Flat => (0, 0),
            SpreadStatus::ShortSpread => (-self.qty_leg1, self.qty_leg2),
            SpreadStatus::LongSpread => (self.qty_leg1, -self.qty_leg2),
        }
    }
}

#[derive(Debug)]
pub struct DecisionEngine {
    cfg: PairTradeConfig,
    state: SpreadState,
}

impl DecisionEngine {
    pub fn new(cfg: PairTradeConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            state: SpreadState::default(),
        })
    }

    pub fn config(&self) -> &PairTradeConfig {
        &self.cfg
    }

    pub fn state(&self) -> &SpreadState {
        &self.state
    }

    pub fn status(&self) -> SpreadStatus {
        self.state.status
    }

    /// Turns the bar's z-score into at most one intent. Branches are tried in
    /// order: enter short, enter long, flatten, hold.
    pub fn evaluate(
        &mut self,
        bar_index: usize,
        price1: f64,
        price2: f64,
        zscore: f64,
        sma1: f64,
        sma2: f64,
    ) -> Option<TradeIntent> {
        if self.state.pending_order {
            log::debug!("bar {}: order outstanding, no new intents", bar_index);
            return None;
        }
        if !zscore.is_finite() {
            log::debug!("bar {}: z-score undefined, no signal", bar_index);
            return None;
        }

        if zscore > self.cfg.upper_threshold && self.state.status != SpreadStatus::ShortSpread {
            let (x, y) = self.position_size(bar_index, price1, price2, sma1, sma2)?;
            let intent = TradeIntent {
                bar_index,
                kind: IntentKind::EnterShortSpread,
                leg1_delta: -(x + self.state.qty_leg1),
                leg2_delta: y + self.state.qty_leg2,
                zscore,
            };
            self.commit_entry(intent, SpreadStatus::ShortSpread, x, y);
            return Some(intent);
        }

        if zscore < self.cfg.lower_threshold && self.state.status != SpreadStatus::LongSpread {
            let (x, y) = self.position_size(bar_index, price1, price2, sma1, sma2)?;
            let intent = TradeIntent {
                bar_index,
                kind: IntentKind::EnterLongSpread,
                leg1_delta: x + self.state.qty_leg1,
                leg2_delta: -(y + self.state.qty_leg2),
                zscore,
            };
            self.commit_entry(intent, SpreadStatus::LongSpread, x, y);
            return Some(intent);
        }

        if zscore > self.cfg.exit_lower && zscore < self.cfg.exit_upper {
            if self.state.status == SpreadStatus::Flat {
                return None;
            }
            let (held1, held2) = self.state.exposure();
            let intent = TradeIntent {
                bar_index,
                kind: IntentKind::Flatten,
                leg1_delta: -held1,
                leg2_delta: -held2,
                zscore,
            };
            self.state.pending_order = true;
            self.state.last_intent = Some(intent);
            log::info!(
                "bar {}: CLOSE POSITION leg1 @ {:.2}, leg2 @ {:.2} (z={:.3})",
                bar_index,
                price1,
                price2,
                zscore
            );
            return Some(intent);
        }

        None
    }

    /// Clears the pending flag. A failed order leaves `status` and the
    /// quantities as if it had filled; the next qualifying bar retries.
    pub fn on_order_result(&mut self, leg: Leg, result: OrderResult) {
        self.state.pending_order = false;
        match result.status {
            OrderStatus::Filled => {
                let side = self
                    .state
                    .last_intent
                    .and_then(|intent| intent.side(leg))
                    .map(|side| side.to_string())
                    .unwrap_or_else(|| "CLOSE".to_string());
                log::info!(
                    "{:?} {} COMPLETE, price {}",
                    leg,
                    side,
                    result
                        .fill_price
                        .map(|p| format!("{:.2}", p))
                        .unwrap_or_else(|| "n/a".to_string())
                );
                if matches!(
                    self.state.last_intent,
                    Some(intent) if intent.kind == IntentKind::Flatten
                ) {
                    match leg {
                        Leg::Leg1 => self.state.qty_leg1 = 0,
                        Leg::Leg2 => self.state.qty_leg2 = 0,
                    }
                    if self.state.qty_leg1 == 0 && self.state.qty_leg2 == 0 {
                        self.state.status = SpreadStatus::Flat;
                        self.state.last_intent = None;
                    }
                }
            }
            status => {
                log::warn!(
                    "{:?} order {:?}; keeping status {:?} qty=({}, {}) unreconciled",
                    leg,
                    status,
                    self.state.status,
                    self.state.qty_leg1,
                    self.state.qty_leg2
                );
            }
        }
    }

    /// Share counts `(x, y)` for a new entry. The leg further from its SMA
    /// gets the major capital share.
    fn position_size(
        &self,
        bar_index: usize,
        price1: f64,
        price2: f64,
        sma1: f64,
        sma2: f64,
    ) -> Option<(i64, i64)> {
        let usable = |v: f64| v.is_finite() && v > 0.0;
        if !(usable(price1) && usable(price2) && usable(sma1) && usable(sma2)) {
            log::debug!(
                "bar {}: unusable sizing inputs p=({}, {}) sma=({}, {})",
                bar_index,
                price1,
                price2,
                sma1,
                sma2
            );
            return None;
        }
        let deviation1 = (price1 / sma1 - 1.0).abs();
        let deviation2 = (price2 / sma2 - 1.0).abs();
        let split = self.cfg.capital_split;
        let (w1, w2) = if deviation1 > deviation2 {
            (split.major, split.minor)
        } else {
            (split.minor, split.major)
        };

        let x = shares_for(self.cfg.total_capital, w1, price1)?;
        let y = shares_for(self.cfg.total_capital, w2, price2)?;
        if x == 0 || y == 0 {
            log::warn!(
                "bar {}: allocation too small for a hedged entry (x={}, y={})",
                bar_index,
                x,
                y
            );
            return None;
        }
        Some((x, y))
    }

    fn commit_entry(&mut self, intent: TradeIntent, status: SpreadStatus, x: i64, y: i64) {
        log::info!(
            "bar {}: {:?} z={:.3} leg1 {} {} leg2 {} {}",
            intent.bar_index,
            intent.kind,
            intent.zscore,
            intent
                .side(Leg::Leg1)
                .map(|s| s.to_string())
                .unwrap_or_default(),
            intent.size(Leg::Leg1),
            intent
                .side(Leg::Leg2)
                .map(|s| s.to_string())
                .unwrap_or_default(),
            intent.size(Leg::Leg2)
        );
        self.state.qty_leg1 = x;
        self.state.qty_leg2 = y;
        self.state.status = status;
        self.state.pending_order = true;
        self.state.last_intent = Some(intent);
    }
}

fn shares_for(capital: f64, weight: f64, price: f64) -> Option<i64> {
    let capital = Decimal::from_f64(capital)?;
    let weight = Decimal::from_f64(weight)?;
    let price = Decimal::from_f64(price)?;
    if price <= Decimal::ZERO {
        return None;
    }
    capital
        .checked_mul(weight)?
        .checked_div(price)?
        .floor()
        .to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CapitalSplit;

    fn engine() -> DecisionEngine {
        DecisionEngine::new(PairTradeConfig::default()).unwrap()
    }

    fn fill_both(engine: &mut DecisionEngine) {
        engine.on_order_result(Leg::Leg1, OrderResult::filled(100.0));
        engine.on_order_result(Leg::Leg2, OrderResult::filled(50.0));
    }

    #[test]
    fn sizing_gives_major_share_to_more_deviated_leg() {
        let mut e = engine();
        let intent = e.evaluate(0, 100.0, 50.0, 3.0, 90.0, 52.0).unwrap();
        assert_eq!(intent.kind, IntentKind::EnterShortSpread);
        assert_eq!(intent.leg1_delta, -600);
        assert_eq!(intent.leg2_delta, 800);
        assert_eq!(e.state().qty_leg1, 600);
        assert_eq!(e.state().qty_leg2, 800);
    }

    #[test]
    fn sizing_swaps_when_leg2_deviates_more() {
        let mut e = engine();
        let intent = e.evaluate(0, 100.0, 50.0, -3.0, 99.0, 40.0).unwrap();
        assert_eq!(intent.kind, IntentKind::EnterLongSpread);
        // leg1 gets 40% -> 400 shares, leg2 gets 60% -> 1200 shares
        assert_eq!(intent.leg1_delta, 400);
        assert_eq!(intent.leg2_delta, -1200);
        assert_eq!(e.status(), SpreadStatus::LongSpread);
    }

    #[test]
    fn reversal_unwinds_prior_quantities_in_one_order() {
        let mut e = engine();
        e.evaluate(0, 100.0, 50.0, 3.0, 90.0, 52.0).unwrap();
        fill_both(&mut e);
        let intent = e.evaluate(1, 100.0, 50.0, -3.0, 90.0, 52.0).unwrap();
        assert_eq!(intent.kind, IntentKind::EnterLongSpread);
        assert_eq!(intent.leg1_delta, 1200);
        assert_eq!(intent.leg2_delta, -1600);
        assert_eq!(e.state().exposure(), (600, -800));
    }

    #[test]
    fn pending_order_blocks_every_branch() {
        let mut e = engine();
        e.evaluate(0, 100.0, 50.0, 3.0, 90.0, 52.0).unwrap();
        assert!(e.state().pending_order);
        assert!(e.evaluate(1, 100.0, 50.0, -9.0, 90.0, 52.0).is_none());
        assert!(e.evaluate(2, 100.0, 50.0, 0.0, 90.0, 52.0).is_none());
        e.on_order_result(Leg::Leg1, OrderResult::filled(100.0));
        assert!(!e.state().pending_order);
        let intent = e.evaluate(3, 100.0, 50.0, -9.0, 90.0, 52.0).unwrap();
        assert_eq!(intent.kind, IntentKind::EnterLongSpread);
    }

    #[test]
    fn same_direction_signal_holds() {
        let mut e = engine();
        e.evaluate(0, 100.0, 50.0, 3.0, 90.0, 52.0).unwrap();
        fill_both(&mut e);
        assert!(e.evaluate(1, 100.0, 50.0, 4.0, 90.0, 52.0).is_none());
        assert!(e.evaluate(2, 100.0, 50.0, 1.0, 90.0, 52.0).is_none());
        assert_eq!(e.status(), SpreadStatus::ShortSpread);
    }

    #[test]
    fn flatten_resets_bookkeeping_only_on_fill() {
        let mut e = engine();
        e.evaluate(0, 100.0, 50.0, 3.0, 90.0, 52.0).unwrap();
        fill_both(&mut e);
        let intent = e.evaluate(1, 100.0, 50.0, 0.1, 90.0, 52.0).unwrap();
        assert_eq!(intent.kind, IntentKind::Flatten);
        assert_eq!((intent.leg1_delta, intent.leg2_delta), (600, -800));
        assert_eq!(e.state().qty_leg1, 600);
        assert_eq!(e.status(), SpreadStatus::ShortSpread);
        fill_both(&mut e);
        assert_eq!(e.status(), SpreadStatus::Flat);
        assert_eq!((e.state().qty_leg1, e.state().qty_leg2), (0, 0));
    }

    #[test]
    fn failed_flatten_leaves_position_and_retries() {
        let mut e = engine();
        e.evaluate(0, 100.0, 50.0, 3.0, 90.0, 52.0).unwrap();
        fill_both(&mut e);
        e.evaluate(1, 100.0, 50.0, 0.0, 90.0, 52.0).unwrap();
        e.on_order_result(Leg::Leg1, OrderResult::filled(101.0));
        e.on_order_result(Leg::Leg2, OrderResult::failed(OrderStatus::Rejected));
        assert_eq!(e.status(), SpreadStatus::ShortSpread);
        assert_eq!((e.state().qty_leg1, e.state().qty_leg2), (0, 800));
        let retry = e.evaluate(2, 100.0, 50.0, 0.2, 90.0, 52.0).unwrap();
        assert_eq!((retry.leg1_delta, retry.leg2_delta), (0, -800));
    }

    #[test]
    fn failed_entry_keeps_stale_bookkeeping() {
        let mut e = engine();
        e.evaluate(0, 100.0, 50.0, 3.0, 90.0, 52.0).unwrap();
        e.on_order_result(Leg::Leg1, OrderResult::failed(OrderStatus::MarginCalled));
        assert!(!e.state().pending_order);
        assert_eq!(e.status(), SpreadStatus::ShortSpread);
        assert_eq!(e.state().qty_leg1, 600);
    }

    #[test]
    fn flatten_after_rejected_entry_targets_zero() {
        let mut e = engine();
        let entry = e.evaluate(0, 100.0, 50.0, 3.0, 90.0, 52.0).unwrap();
        assert_eq!(entry.target_position(Leg::Leg1), None);
        e.on_order_result(Leg::Leg1, OrderResult::failed(OrderStatus::Rejected));
        e.on_order_result(Leg::Leg2, OrderResult::failed(OrderStatus::Rejected));

        let intent = e.evaluate(1, 100.0, 50.0, 0.0, 90.0, 52.0).unwrap();
        assert_eq!(intent.kind, IntentKind::Flatten);
        assert_eq!(intent.target_position(Leg::Leg1), Some(0));
        assert_eq!(intent.target_position(Leg::Leg2), Some(0));

        // broker held nothing; closing to zero fills trivially on both legs
        fill_both(&mut e);
        assert_eq!(e.status(), SpreadStatus::Flat);
        assert_eq!(e.state().exposure(), (0, 0));
    }

    #[test]
    fn fills_are_attributed_to_the_intent_side() {
        let mut e = engine();
        let intent = e.evaluate(0, 100.0, 50.0, 3.0, 90.0, 52.0).unwrap();
        fill_both(&mut e);
        let last = e.state().last_intent.unwrap();
        assert_eq!(last, intent);
        assert_eq!(last.side(Leg::Leg1), Some(OrderSide::Sell));
        assert_eq!(last.side(Leg::Leg2), Some(OrderSide::Buy));
    }

    #[test]
    fn tiny_price_suppresses_entry_instead_of_overflowing() {
        let mut e = engine();
        assert!(e.evaluate(0, 1e-25, 50.0, 3.0, 0.9e-25, 52.0).is_none());
        assert_eq!(e.status(), SpreadStatus::Flat);
        assert!(!e.state().pending_order);
        assert_eq!(shares_for(100_000.0, 0.6, 1e-25), None);
    }

    #[test]
    fn flat_engine_in_exit_band_emits_nothing() {
        let mut e = engine();
        assert!(e.evaluate(0, 100.0, 50.0, 0.0, 90.0, 52.0).is_none());
        assert!(!e.state().pending_order);
    }

    #[test]
    fn undefined_inputs_suppress_signal() {
        let mut e = engine();
        assert!(e.evaluate(0, 100.0, 50.0, f64::NAN, 90.0, 52.0).is_none());
        assert!(e.evaluate(1, 100.0, 50.0, f64::INFINITY, 90.0, 52.0).is_none());
        assert!(e.evaluate(2, 100.0, 50.0, 3.0, 0.0, 52.0).is_none());
        assert_eq!(e.status(), SpreadStatus::Flat);
        assert!(!e.state().pending_order);
    }

    #[test]
    fn unaffordable_leg_suppresses_entry() {
        let cfg = PairTradeConfig {
            total_capital: 1_000.0,
            capital_split: CapitalSplit {
                major: 0.6,
                minor: 0.4,
            },
            ..PairTradeConfig::default()
        };
        let mut e = DecisionEngine::new(cfg).unwrap();
        assert!(e.evaluate(0, 700.0, 10.0, 3.0, 600.0, 10.0).is_none());
        assert_eq!(e.status(), SpreadStatus::Flat);
    }

    #[test]
    fn overlapping_bands_fail_construction() {
        let cfg = PairTradeConfig {
            upper_threshold: 1.0,
            exit_upper: 2.0,
            ..PairTradeConfig::default()
        };
        assert!(matches!(
            DecisionEngine::new(cfg),
            Err(ConfigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn shares_for_floors_exactly() {
        assert_eq!(shares_for(100_000.0, 0.6, 100.0), Some(600));
        assert_eq!(shares_for(100_000.0, 0.4, 50.0), Some(800));
        assert_eq!(shares_for(100_000.0, 0.4, 33.0), Some(1212));
    }
}
