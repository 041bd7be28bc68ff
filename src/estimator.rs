//! Engle-Granger cointegration estimator.
//!
//! Step one fits the long-run relationship `a = intercept + hedge_ratio * b`
//! by OLS. Step two runs an augmented Dickey-Fuller regression on the
//! residuals (fixed lag count, no constant since OLS residuals are centred)
//! and scores the statistic against MacKinnon's response surfaces for a
//! two-variable cointegrating regression.
//!
//! Everything here is a pure function of the input window.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use statrs::function::erf::erfc;
use std::fmt;

use crate::config::PairTradeConfig;
use crate::series::{check_aligned, PriceSeries};

pub const DEFAULT_MIN_OBSERVATIONS: usize = 20;
pub const DEFAULT_ADF_LAGS: usize = 1;
pub const DEFAULT_P_VALUE_THRESHOLD: f64 = 0.05;
const MIN_REGRESSOR_SS: f64 = 1e-12;

// MacKinnon (1994/2010) surfaces for the constant-term case with two
// variables in the cointegrating regression.
const TAU_MAX: f64 = 0.92;
const TAU_MIN: f64 = -18.86;
const TAU_STAR: f64 = -2.62;
const TAU_SMALL_P: [f64; 3] = [2.92, 1.5012, 0.039796];
const TAU_LARGE_P: [f64; 4] = [2.1945, 0.64695, -0.29198, -0.042377];
const CRIT_1PCT: [f64; 4] = [-3.89644, -10.9519, -22.527, 0.0];
const CRIT_5PCT: [f64; 4] = [-3.33613, -6.1101, -6.823, 0.0];
const CRIT_10PCT: [f64; 4] = [-3.04445, -4.2412, -2.720, 0.0];

#[derive(Debug, Clone, PartialEq)]
pub enum EstimatorError {
    InvalidInput { series: String, reason: String },
    LengthMismatch { left: usize, right: usize },
    TimestampMismatch { index: usize },
    InsufficientData { required: usize, actual: usize },
    Unordered { series: String, index: usize },
    Degenerate(String),
}

impl EstimatorError {
    /// True for every variant caused by malformed input rather than by the
    /// numbers themselves.
    pub fn is_invalid_input(&self) -> bool {
        !matches!(self, EstimatorError::Degenerate(_))
    }
}

impl fmt::Display for EstimatorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EstimatorError::InvalidInput { series, reason } => {
                write!(f, "invalid input in series {}: {}", series, reason)
            }
            EstimatorError::LengthMismatch { left, right } => {
                write!(f, "series length mismatch: {} vs {}", left, right)
            }
            EstimatorError::TimestampMismatch { index } => {
                write!(f, "series timestamps diverge at index {}", index)
            }
            EstimatorError::InsufficientData { required, actual } => write!(
                f,
                "insufficient data: need {} observations, got {}",
                required, actual
            ),
            EstimatorError::Unordered { series, index } => write!(
                f,
                "series {} is not strictly increasing at index {}",
                series, index
            ),
            EstimatorError::Degenerate(e) => write!(f, "degenerate regression: {}", e),
        }
    }
}

impl std::error::Error for EstimatorError {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongRunFit {
    pub intercept: f64,
    pub hedge_ratio: f64,
    pub residuals: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CriticalValues {
    pub one_pct: f64,
    pub five_pct: f64,
    pub ten_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdfResult {
    pub statistic: f64,
    pub p_value: f64,
    pub lags: usize,
    pub nobs: usize,
    pub critical_values: CriticalValues,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CointegrationEstimate {
    pub intercept: f64,
    pub hedge_ratio: f64,
    pub residuals: Vec<f64>,
    pub adjustment_coefficient: f64,
    pub test_statistic: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CointegrationVerdict {
    pub estimate: CointegrationEstimate,
    pub adf: AdfResult,
    pub half_life: Option<f64>,
    pub is_cointegrated: bool,
}

/// Engle-Granger procedure with its tunables.
#[derive(Debug, Clone, Copy)]
pub struct EngleGranger {
    pub min_observations: usize,
    pub lags: usize,
    pub p_value_threshold: f64,
}

impl Default for EngleGranger {
    fn default() -> Self {
        Self {
            min_observations: DEFAULT_MIN_OBSERVATIONS,
            lags: DEFAULT_ADF_LAGS,
            p_value_threshold: DEFAULT_P_VALUE_THRESHOLD,
        }
    }
}

impl EngleGranger {
    pub fn from_config(cfg: &PairTradeConfig) -> Self {
        Self {
            min_observations: cfg.min_observations,
            lags: cfg.adf_lags,
            p_value_threshold: cfg.adf_p_threshold,
        }
    }

    pub fn estimate_long_run_relationship(
        &self,
        series_a: &PriceSeries,
        series_b: &PriceSeries,
    ) -> Result<LongRunFit, EstimatorError> {
        check_aligned(series_a, series_b, self.min_observations)?;
        fit_long_run(&series_a.prices(), &series_b.prices())
    }

    pub fn cointegration_test(
        &self,
        series_a: &PriceSeries,
        series_b: &PriceSeries,
    ) -> Result<(f64, f64), EstimatorError> {
        let fit = self.estimate_long_run_relationship(series_a, series_b)?;
        let adf = adf_no_constant(&fit.residuals, self.lags)?;
        Ok((adf.statistic, adf.p_value))
    }

    /// Full two-step run plus the acceptance rule: the p-value must clear the
    /// threshold and the statistic must sit below the 10% critical value.
    pub fn verdict(
        &self,
        series_a: &PriceSeries,
        series_b: &PriceSeries,
    ) -> Result<CointegrationVerdict, EstimatorError> {
        let fit = self.estimate_long_run_relationship(series_a, series_b)?;
        let adf = adf_no_constant(&fit.residuals, self.lags)?;
        let adjustment_coefficient = estimate_adjustment_coefficient(series_a, &fit.residuals)?;
        let half_life = half_life(&fit.residuals);
        let is_cointegrated =
            adf.p_value <= self.p_value_threshold && adf.statistic < adf.critical_values.ten_pct;

        log::info!(
            "cointegration {}/{}: hedge={:.4} adf={:.3} p={:.4} crit10={:.3} half_life={:?} -> {}",
            series_a.symbol(),
            series_b.symbol(),
            fit.hedge_ratio,
            adf.statistic,
            adf.p_value,
            adf.critical_values.ten_pct,
            half_life,
            if is_cointegrated {
                "cointegrated"
            } else {
                "rejected"
            }
        );

        Ok(CointegrationVerdict {
            estimate: CointegrationEstimate {
                intercept: fit.intercept,
                hedge_ratio: fit.hedge_ratio,
                residuals: fit.residuals,
                adjustment_coefficient,
                test_statistic: adf.statistic,
                p_value: adf.p_value,
            },
            adf,
            half_life,
            is_cointegrated,
        })
    }
}

pub fn estimate_long_run_relationship(
    series_a: &PriceSeries,
    series_b: &PriceSeries,
) -> Result<LongRunFit, EstimatorError> {
    EngleGranger::default().estimate_long_run_relationship(series_a, series_b)
}

pub fn cointegration_test(
    series_a: &PriceSeries,
    series_b: &PriceSeries,
) -> Result<(f64, f64), EstimatorError> {
    EngleGranger::default().cointegration_test(series_a, series_b)
}

/// Slope of `diff(a)[1..]` on `residuals[..n-1]`, no intercept.
pub fn estimate_adjustment_coefficient(
    series_a: &PriceSeries,
    residuals: &[f64],
) -> Result<f64, EstimatorError> {
    if let Some(index) = series_a.first_missing() {
        return Err(EstimatorError::InvalidInput {
            series: series_a.symbol().to_string(),
            reason: format!("missing value at index {}", index),
        });
    }
    adjustment_coefficient(&series_a.prices(), residuals)
}

pub fn adjustment_coefficient(a: &[f64], residuals: &[f64]) -> Result<f64, EstimatorError> {
    if a.len() != residuals.len() {
        return Err(EstimatorError::LengthMismatch {
            left: a.len(),
            right: residuals.len(),
        });
    }
    if a.len() < 3 {
        return Err(EstimatorError::InsufficientData {
            required: 3,
            actual: a.len(),
        });
    }
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (win, lagged) in a.windows(2).zip(residuals) {
        sxy += (win[1] - win[0]) * lagged;
        sxx += lagged * lagged;
    }
    if sxx < MIN_REGRESSOR_SS {
        return Err(EstimatorError::Degenerate(
            "lagged residuals are identically zero".to_string(),
        ));
    }
    Ok(sxy / sxx)
}

/// OLS of `a` on `[1, b]` over raw slices. Callers are responsible for
/// alignment; non-finite values are rejected here.
pub fn fit_long_run(a: &[f64], b: &[f64]) -> Result<LongRunFit, EstimatorError> {
    if a.len() != b.len() {
        return Err(EstimatorError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let n = a.len();
    if n < 3 {
        return Err(EstimatorError::InsufficientData {
            required: 3,
            actual: n,
        });
    }
    if a.iter().chain(b).any(|v| !v.is_finite()) {
        return Err(EstimatorError::InvalidInput {
            series: "window".to_string(),
            reason: "non-finite price".to_string(),
        });
    }

    let mean_b = b.iter().sum::<f64>() / n as f64;
    let sxx: f64 = b.iter().map(|v| (v - mean_b) * (v - mean_b)).sum();
    if sxx < MIN_REGRESSOR_SS {
        return Err(EstimatorError::Degenerate(
            "regressor series has zero variance".to_string(),
        ));
    }

    let x = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { b[i] });
    let y = DVector::from_column_slice(a);
    let fit = ols(&x, &y)?;

    Ok(LongRunFit {
        intercept: fit.coefficients[0],
        hedge_ratio: fit.coefficients[1],
        residuals: fit.residuals.iter().copied().collect(),
    })
}

/// Augmented Dickey-Fuller regression without a constant:
/// `de_t = gamma * e_{t-1} + sum_i delta_i * de_{t-i} + u_t`.
pub fn adf_no_constant(series: &[f64], lags: usize) -> Result<AdfResult, EstimatorError> {
    let n = series.len();
    let k = 1 + lags;
    if n < k + lags + 4 {
        return Err(EstimatorError::InsufficientData {
            required: k + lags + 4,
            actual: n,
        });
    }
    let diff: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let nobs = diff.len() - lags;

    let x = DMatrix::from_fn(nobs, k, |row, col| {
        let t = row + lags;
        if col == 0 {
            series[t]
        } else {
            diff[t - col]
        }
    });
    let y = DVector::from_column_slice(&diff[lags..]);
    let fit = ols(&x, &y)?;

    let dof = (nobs - k) as f64;
    let sigma2 = fit.residuals.iter().map(|r| r * r).sum::<f64>() / dof;
    let se_gamma = (sigma2 * fit.xtx_inv[(0, 0)]).sqrt();
    if !se_gamma.is_finite() || se_gamma <= 0.0 {
        return Err(EstimatorError::Degenerate(
            "unit-root regression has no residual variance".to_string(),
        ));
    }
    let statistic = fit.coefficients[0] / se_gamma;

    Ok(AdfResult {
        statistic,
        p_value: mackinnon_p_value(statistic),
        lags,
        nobs,
        critical_values: mackinnon_critical_values(n.saturating_sub(1)),
    })
}

/// Approximate asymptotic p-value for the residual-based unit-root statistic.
pub fn mackinnon_p_value(statistic: f64) -> f64 {
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }
    let z = if statistic <= TAU_STAR {
        polyval(&TAU_SMALL_P, statistic)
    } else {
        polyval(&TAU_LARGE_P, statistic)
    };
    standard_normal_cdf(z)
}

/// Finite-sample critical values for `nobs` observations.
pub fn mackinnon_critical_values(nobs: usize) -> CriticalValues {
    let t = nobs.max(1) as f64;
    let surface = |b: &[f64; 4]| b[0] + b[1] / t + b[2] / (t * t) + b[3] / (t * t * t);
    CriticalValues {
        one_pct: surface(&CRIT_1PCT),
        five_pct: surface(&CRIT_5PCT),
        ten_pct: surface(&CRIT_10PCT),
    }
}

/// Half-life in bars of an AR(1) fit to the spread, `None` when the spread
/// does not mean-revert.
pub fn half_life(spread: &[f64]) -> Option<f64> {
    if spread.len() < 10 {
        return None;
    }
    let lagged = &spread[..spread.len() - 1];
    let delta: Vec<f64> = spread.windows(2).map(|w| w[1] - w[0]).collect();
    let mean_x = lagged.iter().sum::<f64>() / lagged.len() as f64;
    let mean_y = delta.iter().sum::<f64>() / delta.len() as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in lagged.iter().zip(&delta) {
        num += (x - mean_x) * (y - mean_y);
        den += (x - mean_x) * (x - mean_x);
    }
    if den < MIN_REGRESSOR_SS {
        return None;
    }
    let phi = num / den;
    if phi >= 0.0 || phi <= -1.0 {
        return None;
    }
    let hl = -(2.0_f64.ln()) / (1.0 + phi).ln();
    hl.is_finite().then_some(hl)
}

struct OlsFit {
    coefficients: DVector<f64>,
    residuals: DVector<f64>,
    xtx_inv: DMatrix<f64>,
}

fn ols(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<OlsFit, EstimatorError> {
    let xt = x.transpose();
    let xtx_inv = (&xt * x)
        .try_inverse()
        .ok_or_else(|| EstimatorError::Degenerate("singular design matrix".to_string()))?;
    let coefficients = &xtx_inv * (&xt * y);
    let residuals = y - x * &coefficients;
    if coefficients.iter().any(|c| !c.is_finite()) {
        return Err(EstimatorError::Degenerate(
            "non-finite regression coefficients".to_string(),
        ));
    }
    Ok(OlsFit {
        coefficients,
        residuals,
        xtx_inv,
    })
}

fn polyval(coefs: &[f64], x: f64) -> f64 {
    coefs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

fn standard_normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn series(symbol: &str, prices: &[f64]) -> PriceSeries {
        let rows: Vec<(i64, f64)> = prices
            .iter()
            .enumerate()
            .map(|(i, p)| (1_600_000_000 + i as i64 * 86_400, *p))
            .collect();
        PriceSeries::from_unix_rows(symbol, &rows).unwrap()
    }

    #[test]
    fn exact_linear_relationship_is_recovered() {
        let b: Vec<f64> = (0..40)
            .map(|i| 50.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.1)
            .collect();
        let a: Vec<f64> = b.iter().map(|v| 1.8 * v + 3.0).collect();
        let fit = estimate_long_run_relationship(&series("A", &a), &series("B", &b)).unwrap();
        assert!((fit.hedge_ratio - 1.8).abs() < 1e-8);
        assert!((fit.intercept - 3.0).abs() < 1e-6);
        assert_eq!(fit.residuals.len(), 40);
        assert!(fit.residuals.iter().all(|r| r.abs() < 1e-6));
    }

    #[test]
    fn residuals_match_definition() {
        let b: Vec<f64> = (0..25).map(|i| 10.0 + i as f64).collect();
        let a: Vec<f64> = b
            .iter()
            .enumerate()
            .map(|(i, v)| 2.0 * v + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let fit = fit_long_run(&a, &b).unwrap();
        for ((ai, bi), r) in a.iter().zip(&b).zip(&fit.residuals) {
            let expected = ai - fit.intercept - fit.hedge_ratio * bi;
            assert!((expected - r).abs() < 1e-9);
        }
    }

    #[test]
    fn constant_regressor_is_degenerate() {
        let a: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let b = vec![5.0; 30];
        let err = fit_long_run(&a, &b).unwrap_err();
        assert!(matches!(err, EstimatorError::Degenerate(_)));
        assert!(!err.is_invalid_input());
    }

    #[test]
    fn length_mismatch_is_invalid_input() {
        let a = series("A", &vec![1.0; 30]);
        let b = series("B", &vec![1.0; 29]);
        let err = cointegration_test(&a, &b).unwrap_err();
        assert!(err.is_invalid_input());
        assert!(matches!(err, EstimatorError::LengthMismatch { .. }));
    }

    #[test]
    fn adjustment_coefficient_matches_closed_form() {
        let a = [1.0, 2.0, 4.0, 3.0, 5.0];
        let residuals = [0.5, -1.0, 1.0, -0.5, 0.0];
        // diffs: 1, 2, -1, 2 against lagged 0.5, -1, 1, -0.5
        let expected = (0.5 - 2.0 - 1.0 - 1.0) / (0.25 + 1.0 + 1.0 + 0.25);
        let got = adjustment_coefficient(&a, &residuals).unwrap();
        assert!((got - expected).abs() < 1e-12);
    }

    #[test]
    fn p_value_surface_is_monotone_and_continuous() {
        let left = mackinnon_p_value(TAU_STAR - 1e-9);
        let right = mackinnon_p_value(TAU_STAR + 1e-9);
        assert!((left - right).abs() < 5e-3);
        assert!(mackinnon_p_value(-5.0) < mackinnon_p_value(-3.0));
        assert!(mackinnon_p_value(-3.0) < mackinnon_p_value(-1.0));
        assert_eq!(mackinnon_p_value(1.5), 1.0);
        assert_eq!(mackinnon_p_value(-25.0), 0.0);
    }

    #[test]
    fn five_percent_critical_value_maps_to_five_percent_p_value() {
        let crit = mackinnon_critical_values(100_000);
        let p = mackinnon_p_value(crit.five_pct);
        assert!((p - 0.05).abs() < 0.005, "p = {}", p);
        assert!(crit.one_pct < crit.five_pct && crit.five_pct < crit.ten_pct);
    }

    #[test]
    fn half_life_of_ar1_spread() {
        let mut rng = StdRng::seed_from_u64(7);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let mut spread = vec![0.0];
        for i in 1..400 {
            spread.push(0.5 * spread[i - 1] + noise.sample(&mut rng));
        }
        let hl = half_life(&spread).unwrap();
        assert!(hl > 0.5 && hl < 2.0, "half-life {}", hl);
        let trending: Vec<f64> = (0..50).map(|i| (i * i) as f64).collect();
        assert!(half_life(&trending).is_none());
    }
}
