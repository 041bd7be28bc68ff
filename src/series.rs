use chrono::{DateTime, Utc};

use crate::estimator::EstimatorError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSample {
    pub ts: DateTime<Utc>,
    pub price: f64,
}

impl PriceSample {
    pub fn new(ts: DateTime<Utc>, price: f64) -> Self {
        Self { ts, price }
    }
}

/// Close prices of one instrument, strictly increasing in timestamp.
///
/// Prices are stored as given; a NaN marks a missing value and is rejected by
/// the estimator rather than dropped.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    symbol: String,
    samples: Vec<PriceSample>,
}

impl PriceSeries {
    pub fn new(symbol: &str, samples: Vec<PriceSample>) -> Result<Self, EstimatorError> {
        for (index, win) in samples.windows(2).enumerate() {
            if win[1].ts <= win[0].ts {
                return Err(EstimatorError::Unordered {
                    series: symbol.to_string(),
                    index: index + 1,
                });
            }
        }
        Ok(Self {
            symbol: symbol.to_string(),
            samples,
        })
    }

    /// Builds a series from `(unix_seconds, price)` rows.
    pub fn from_unix_rows(symbol: &str, rows: &[(i64, f64)]) -> Result<Self, EstimatorError> {
        let mut samples = Vec::with_capacity(rows.len());
        for (index, (secs, price)) in rows.iter().enumerate() {
            let ts = DateTime::<Utc>::from_timestamp(*secs, 0).ok_or_else(|| {
                EstimatorError::InvalidInput {
                    series: symbol.to_string(),
                    reason: format!("timestamp {} at index {} is out of range", secs, index),
                }
            })?;
            samples.push(PriceSample::new(ts, *price));
        }
        Self::new(symbol, samples)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[PriceSample] {
        &self.samples
    }

    pub fn prices(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.price).collect()
    }

    pub fn first_missing(&self) -> Option<usize> {
        self.samples.iter().position(|s| !s.price.is_finite())
    }
}

/// Checks that two series can be regressed against each other: same length,
/// same timestamps, no missing values, at least `min_len` observations.
pub fn check_aligned(
    a: &PriceSeries,
    b: &PriceSeries,
    min_len: usize,
) -> Result<(), EstimatorError> {
    if a.len() != b.len() {
        return Err(EstimatorError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    for series in [a, b] {
        if let Some(index) = series.first_missing() {
            return Err(EstimatorError::InvalidInput {
                series: series.symbol().to_string(),
                reason: format!("missing value at index {}", index),
            });
        }
    }
    if let Some(index) = a
        .samples()
        .iter()
        .zip(b.samples())
        .position(|(x, y)| x.ts != y.ts)
    {
        return Err(EstimatorError::TimestampMismatch { index });
    }
    if a.len() < min_len {
        return Err(EstimatorError::InsufficientData {
            required: min_len,
            actual: a.len(),
        });
    }
    Ok(())
}
