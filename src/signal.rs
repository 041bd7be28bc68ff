use std::collections::VecDeque;

use crate::estimator::fit_long_run;

const MIN_STD: f64 = 1e-9;

/// One bar of the rolling OLS transformation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpreadReading {
    pub intercept: f64,
    pub hedge_ratio: f64,
    pub spread: f64,
    pub spread_mean: f64,
    pub spread_std: f64,
    pub zscore: f64,
}

/// Rolling regression of leg1 on leg2 over `window` bars, followed by a
/// z-score of the resulting spread over its own last `window` values.
///
/// Each spread is computed with the coefficients fitted on the bar it belongs
/// to, so a first z-score needs `2 * window - 1` bars.
#[derive(Debug, Clone)]
pub struct SpreadWindow {
    window: usize,
    leg1: VecDeque<f64>,
    leg2: VecDeque<f64>,
    spreads: VecDeque<f64>,
}

impl SpreadWindow {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            leg1: VecDeque::with_capacity(window),
            leg2: VecDeque::with_capacity(window),
            spreads: VecDeque::with_capacity(window),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn is_warm(&self) -> bool {
        self.spreads.len() >= self.window
    }

    /// Pushes one aligned pair of closes. Returns a reading once both windows
    /// are full and the bar is not numerically degenerate.
    pub fn push(&mut self, price1: f64, price2: f64) -> Option<SpreadReading> {
        if !price1.is_finite() || !price2.is_finite() {
            log::debug!("skipping non-finite bar ({}, {})", price1, price2);
            return None;
        }
        push_bounded(&mut self.leg1, price1, self.window);
        push_bounded(&mut self.leg2, price2, self.window);
        if self.leg1.len() < self.window {
            return None;
        }

        let (a, b) = (self.leg1.make_contiguous(), self.leg2.make_contiguous());
        let fit = match fit_long_run(a, b) {
            Ok(fit) => fit,
            Err(e) => {
                log::debug!("rolling regression skipped: {}", e);
                return None;
            }
        };
        let spread = price1 - (fit.hedge_ratio * price2 + fit.intercept);
        push_bounded(&mut self.spreads, spread, self.window);
        if self.spreads.len() < self.window {
            return None;
        }

        let (spread_mean, spread_std) = mean_std(&self.spreads)?;
        if spread_std < MIN_STD {
            log::debug!("spread std {:.3e} too small for a z-score", spread_std);
            return None;
        }
        let zscore = (spread - spread_mean) / spread_std;
        zscore.is_finite().then_some(SpreadReading {
            intercept: fit.intercept,
            hedge_ratio: fit.hedge_ratio,
            spread,
            spread_mean,
            spread_std,
            zscore,
        })
    }
}

/// Simple moving average over the last `period` closes.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            values: VecDeque::with_capacity(period),
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        if self.values.len() >= self.period {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
        self.values.push_back(value);
        self.sum += value;
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        (self.period > 0 && self.values.len() >= self.period)
            .then(|| self.sum / self.period as f64)
    }
}

fn push_bounded(buf: &mut VecDeque<f64>, value: f64, cap: usize) {
    if buf.len() >= cap {
        buf.pop_front();
    }
    buf.push_back(value);
}

/// Population mean and standard deviation.
pub fn mean_std(window: &VecDeque<f64>) -> Option<(f64, f64)> {
    if window.is_empty() {
        return None;
    }
    let mean = window.iter().copied().sum::<f64>() / window.len() as f64;
    let var = window
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / window.len() as f64;
    Some((mean, var.sqrt()))
}
