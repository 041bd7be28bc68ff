use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs::File;
use std::num::{ParseFloatError, ParseIntError};
use std::path::Path;

use crate::estimator::{DEFAULT_ADF_LAGS, DEFAULT_MIN_OBSERVATIONS, DEFAULT_P_VALUE_THRESHOLD};

const MAX_ADF_LAGS: usize = 4;

const DEFAULT_WINDOW: usize = 20;
const DEFAULT_UPPER_THRESHOLD: f64 = 2.5;
const DEFAULT_LOWER_THRESHOLD: f64 = -2.5;
const DEFAULT_EXIT_UPPER: f64 = 0.5;
const DEFAULT_EXIT_LOWER: f64 = -0.5;
const DEFAULT_CAPITAL_MAJOR: f64 = 0.6;
const DEFAULT_CAPITAL_MINOR: f64 = 0.4;
const DEFAULT_SMA_PERIOD: usize = 50;
const DEFAULT_TOTAL_CAPITAL: f64 = 100_000.0;
const DEFAULT_STOP_LOSS_MULTIPLE: f64 = 3.0;

#[derive(Debug)]
pub enum ConfigError {
    ParseIntError(ParseIntError),
    ParseFloatError(ParseFloatError),
    InvalidConfiguration(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::ParseIntError(e) => write!(f, "Parse int error: {}", e),
            ConfigError::ParseFloatError(e) => write!(f, "Parse float error: {}", e),
            ConfigError::InvalidConfiguration(e) => write!(f, "Invalid configuration: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ParseIntError> for ConfigError {
    fn from(err: ParseIntError) -> ConfigError {
        ConfigError::ParseIntError(err)
    }
}

impl From<ParseFloatError> for ConfigError {
    fn from(err: ParseFloatError) -> ConfigError {
        ConfigError::ParseFloatError(err)
    }
}

/// Share of `total_capital` given to the leg that deviates more from its SMA
/// (`major`) and to the other leg (`minor`).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct CapitalSplit {
    pub major: f64,
    pub minor: f64,
}

impl Default for CapitalSplit {
    fn default() -> Self {
        Self {
            major: DEFAULT_CAPITAL_MAJOR,
            minor: DEFAULT_CAPITAL_MINOR,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct PairTradeYaml {
    window: Option<usize>,
    upper_threshold: Option<f64>,
    lower_threshold: Option<f64>,
    exit_upper: Option<f64>,
    exit_lower: Option<f64>,
    capital_split: Option<CapitalSplit>,
    sma_period: Option<usize>,
    total_capital: Option<f64>,
    stop_loss_multiple: Option<f64>,
    adf_p_threshold: Option<f64>,
    min_observations: Option<usize>,
    adf_lags: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairTradeConfig {
    pub window: usize,
    pub upper_threshold: f64,
    pub lower_threshold: f64,
    pub exit_upper: f64,
    pub exit_lower: f64,
    pub capital_split: CapitalSplit,
    pub sma_period: usize,
    pub total_capital: f64,
    // Declared for risk cutoffs; no decision rule reads it.
    pub stop_loss_multiple: f64,
    pub adf_p_threshold: f64,
    pub min_observations: usize,
    pub adf_lags: usize,
}

impl Default for PairTradeConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            upper_threshold: DEFAULT_UPPER_THRESHOLD,
            lower_threshold: DEFAULT_LOWER_THRESHOLD,
            exit_upper: DEFAULT_EXIT_UPPER,
            exit_lower: DEFAULT_EXIT_LOWER,
            capital_split: CapitalSplit::default(),
            sma_period: DEFAULT_SMA_PERIOD,
            total_capital: DEFAULT_TOTAL_CAPITAL,
            stop_loss_multiple: DEFAULT_STOP_LOSS_MULTIPLE,
            adf_p_threshold: DEFAULT_P_VALUE_THRESHOLD,
            min_observations: DEFAULT_MIN_OBSERVATIONS,
            adf_lags: DEFAULT_ADF_LAGS,
        }
    }
}

impl PairTradeConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("PAIRTRADE_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());
        match config_path {
            Some(path) => Self::from_yaml_path(path),
            None => Self::from_env(),
        }
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open PairTrade config {}", path_ref.display()))?;
        let yaml: PairTradeYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse PairTrade config {}", path_ref.display()))?;

        let mut cfg = Self::from_yaml(yaml);
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        log::info!("loaded pair trade config from {}", path_ref.display());
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_yaml(yaml: PairTradeYaml) -> Self {
        let defaults = Self::default();
        PairTradeConfig {
            window: yaml.window.unwrap_or(defaults.window),
            upper_threshold: yaml.upper_threshold.unwrap_or(defaults.upper_threshold),
            lower_threshold: yaml.lower_threshold.unwrap_or(defaults.lower_threshold),
            exit_upper: yaml.exit_upper.unwrap_or(defaults.exit_upper),
            exit_lower: yaml.exit_lower.unwrap_or(defaults.exit_lower),
            capital_split: yaml.capital_split.unwrap_or(defaults.capital_split),
            sma_period: yaml.sma_period.unwrap_or(defaults.sma_period),
            total_capital: yaml.total_capital.unwrap_or(defaults.total_capital),
            stop_loss_multiple: yaml
                .stop_loss_multiple
                .unwrap_or(defaults.stop_loss_multiple),
            adf_p_threshold: yaml.adf_p_threshold.unwrap_or(defaults.adf_p_threshold),
            min_observations: yaml.min_observations.unwrap_or(defaults.min_observations),
            adf_lags: yaml.adf_lags.unwrap_or(defaults.adf_lags),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_value("PAIRTRADE_WINDOW") {
            self.window = v.parse()?;
        }
        if let Some(v) = env_value("PAIRTRADE_UPPER_THRESHOLD") {
            self.upper_threshold = v.parse()?;
        }
        if let Some(v) = env_value("PAIRTRADE_LOWER_THRESHOLD") {
            self.lower_threshold = v.parse()?;
        }
        if let Some(v) = env_value("PAIRTRADE_EXIT_UPPER") {
            self.exit_upper = v.parse()?;
        }
        if let Some(v) = env_value("PAIRTRADE_EXIT_LOWER") {
            self.exit_lower = v.parse()?;
        }
        if let Some(v) = env_value("PAIRTRADE_SMA_PERIOD") {
            self.sma_period = v.parse()?;
        }
        if let Some(v) = env_value("PAIRTRADE_TOTAL_CAPITAL") {
            self.total_capital = v.parse()?;
        }
        if let Some(v) = env_value("PAIRTRADE_STOP_LOSS_MULTIPLE") {
            self.stop_loss_multiple = v.parse()?;
        }
        if let Some(v) = env_value("PAIRTRADE_ADF_P_THRESHOLD") {
            self.adf_p_threshold = v.parse()?;
        }
        Ok(())
    }

    /// Rejects overlapping or non-monotonic bands and nonsensical sizing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let floats = [
            ("upper_threshold", self.upper_threshold),
            ("lower_threshold", self.lower_threshold),
            ("exit_upper", self.exit_upper),
            ("exit_lower", self.exit_lower),
            ("capital_split.major", self.capital_split.major),
            ("capital_split.minor", self.capital_split.minor),
            ("total_capital", self.total_capital),
            ("stop_loss_multiple", self.stop_loss_multiple),
            ("adf_p_threshold", self.adf_p_threshold),
        ];
        if let Some((name, value)) = floats.iter().find(|(_, v)| !v.is_finite()) {
            return Err(invalid(format!("{} must be finite, got {}", name, value)));
        }
        if self.upper_threshold <= self.exit_upper {
            return Err(invalid(format!(
                "upper_threshold {} must exceed exit_upper {}",
                self.upper_threshold, self.exit_upper
            )));
        }
        if self.lower_threshold >= self.exit_lower {
            return Err(invalid(format!(
                "lower_threshold {} must be below exit_lower {}",
                self.lower_threshold, self.exit_lower
            )));
        }
        if self.exit_lower >= self.exit_upper {
            return Err(invalid(format!(
                "exit band is empty: exit_lower {} >= exit_upper {}",
                self.exit_lower, self.exit_upper
            )));
        }
        if self.window < 2 {
            return Err(invalid(format!("window must be >= 2, got {}", self.window)));
        }
        if self.sma_period == 0 {
            return Err(invalid("sma_period must be >= 1".to_string()));
        }
        if self.total_capital <= 0.0 {
            return Err(invalid(format!(
                "total_capital must be positive, got {}",
                self.total_capital
            )));
        }
        let split = self.capital_split;
        let in_unit = |w: f64| w > 0.0 && w <= 1.0;
        if !in_unit(split.major) || !in_unit(split.minor) || split.major + split.minor > 1.0 + 1e-9
        {
            return Err(invalid(format!(
                "capital_split weights must lie in (0, 1] and sum to at most 1, got {} / {}",
                split.major, split.minor
            )));
        }
        if self.adf_p_threshold <= 0.0 || self.adf_p_threshold >= 1.0 {
            return Err(invalid(format!(
                "adf_p_threshold must lie in (0, 1), got {}",
                self.adf_p_threshold
            )));
        }
        if self.min_observations < 10 {
            return Err(invalid(format!(
                "min_observations must be >= 10, got {}",
                self.min_observations
            )));
        }
        if self.adf_lags == 0 || self.adf_lags > MAX_ADF_LAGS {
            return Err(invalid(format!(
                "adf_lags must lie in 1..={}, got {}",
                MAX_ADF_LAGS, self.adf_lags
            )));
        }
        // unit-root regression needs 2 * lags + 5 residuals
        if self.min_observations < 2 * self.adf_lags + 5 {
            return Err(invalid(format!(
                "min_observations {} too small for adf_lags {}",
                self.min_observations, self.adf_lags
            )));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::InvalidConfiguration(msg)
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
