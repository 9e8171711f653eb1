//! Running Beta posterior over the realized win rate.
//!
//! Purely observational: it is fed settlement outcomes and persisted, but
//! sizing still uses the fixed assumed win rate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

const PRIOR_ALPHA: u64 = 83;
const PRIOR_BETA: u64 = 3;
const Z_95: f64 = 1.96;

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("Failed to access posterior file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed posterior file: {0}")]
    Format(#[from] serde_json::Error),
}

/// Beta(alpha, beta) posterior on the probability that a trade wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinRatePosterior {
    pub alpha: u64,
    pub beta: u64,
}

impl Default for WinRatePosterior {
    fn default() -> Self {
        Self {
            alpha: PRIOR_ALPHA,
            beta: PRIOR_BETA,
        }
    }
}

impl WinRatePosterior {
    /// Loads from `path`, falling back to the prior when the file is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EstimatorError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no stored posterior, starting from prior");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), EstimatorError> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn observe(&mut self, won: bool) {
        if won {
            self.alpha += 1;
        } else {
            self.beta += 1;
        }
    }

    pub fn mean(&self) -> f64 {
        let (a, b) = self.params();
        if a + b == 0.0 {
            return 0.5;
        }
        a / (a + b)
    }

    /// Closed-form approximation, exact enough once both shapes exceed 1.
    pub fn median(&self) -> f64 {
        let (a, b) = self.params();
        if a > 1.0 && b > 1.0 {
            (a - 1.0 / 3.0) / (a + b - 2.0 / 3.0)
        } else {
            self.mean()
        }
    }

    /// 95% interval from the normal approximation, clamped to `[0, 1]`.
    pub fn credible_interval_95(&self) -> (f64, f64) {
        let (a, b) = self.params();
        if a + b == 0.0 {
            return (0.0, 1.0);
        }
        let mean = a / (a + b);
        let variance = (a * b) / ((a + b) * (a + b) * (a + b + 1.0));
        let sd = variance.sqrt();
        ((mean - Z_95 * sd).max(0.0), (mean + Z_95 * sd).min(1.0))
    }

    fn params(&self) -> (f64, f64) {
        (self.alpha as f64, self.beta as f64)
    }
}

impl std::fmt::Display for WinRatePosterior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (lo, hi) = self.credible_interval_95();
        write!(
            f,
            "Beta({}, {}) mean={:.4} 95%=[{:.4}, {:.4}]",
            self.alpha,
            self.beta,
            self.mean(),
            lo,
            hi
        )
    }
}
