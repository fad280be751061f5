//! Per-species anomaly detectors over the scaled index space.

use serde::{Deserialize, Serialize};

use super::{NoveltyDetector, check_finite};
use crate::error::ModelError;
use crate::spectrum::INDEX_COUNT;

/// Kernel of a one-class SVM.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    Rbf { gamma: f64 },
    Linear,
}

impl Kernel {
    fn eval(self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Self::Rbf { gamma } => {
                let dist2: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                (-gamma * dist2).exp()
            }
            Self::Linear => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        }
    }
}

/// Fitted one-class SVM in dual form.
///
/// `decision(x) = sum(dual_coef[i] * K(sv[i], x)) + intercept`; negative
/// decisions are outliers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneClassSvm {
    pub kernel: Kernel,
    pub support_vectors: Vec<Vec<f64>>,
    pub dual_coef: Vec<f64>,
    pub intercept: f64,
}

impl OneClassSvm {
    pub fn validate(&self, species: &str) -> Result<(), ModelError> {
        let name = format!("detectors.{species}");
        if self.support_vectors.is_empty() {
            return Err(ModelError::InvalidParameter(format!(
                "{name} has no support vectors"
            )));
        }
        if self.dual_coef.len() != self.support_vectors.len() {
            return Err(ModelError::DimensionMismatch {
                component: format!("{name}.dual_coef"),
                expected: self.support_vectors.len(),
                actual: self.dual_coef.len(),
            });
        }
        for (i, sv) in self.support_vectors.iter().enumerate() {
            if sv.len() != INDEX_COUNT {
                return Err(ModelError::DimensionMismatch {
                    component: format!("{name}.support_vectors[{i}]"),
                    expected: INDEX_COUNT,
                    actual: sv.len(),
                });
            }
            check_finite(&format!("{name}.support_vectors[{i}]"), sv)?;
        }
        check_finite(&format!("{name}.dual_coef"), &self.dual_coef)?;
        if !self.intercept.is_finite() {
            return Err(ModelError::InvalidParameter(format!(
                "{name}.intercept is not finite"
            )));
        }
        if let Kernel::Rbf { gamma } = self.kernel {
            if !(gamma.is_finite() && gamma > 0.0) {
                return Err(ModelError::InvalidParameter(format!(
                    "{name}.kernel gamma must be positive, got {gamma}"
                )));
            }
        }
        Ok(())
    }
}

impl NoveltyDetector for OneClassSvm {
    fn input_dim(&self) -> usize {
        self.support_vectors.first().map_or(0, Vec::len)
    }

    fn decision_function(&self, features: &[f64]) -> f64 {
        self.support_vectors
            .iter()
            .zip(&self.dual_coef)
            .map(|(sv, alpha)| alpha * self.kernel.eval(sv, features))
            .sum::<f64>()
            + self.intercept
    }
}

/// Per-species medians and MAD widths of the scaled indices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MadThresholds {
    pub medians: [f64; INDEX_COUNT],
    pub mads: [f64; INDEX_COUNT],
}

/// Outcome of the MAD test on one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MadEvaluation {
    /// `|scaled - median|` per index
    pub deviations: [f64; INDEX_COUNT],
    pub violated: [bool; INDEX_COUNT],
    pub violations: usize,
}

impl MadThresholds {
    pub fn validate(&self, species: &str) -> Result<(), ModelError> {
        let name = format!("mad_thresholds.{species}");
        check_finite(&format!("{name}.medians"), &self.medians)?;
        check_finite(&format!("{name}.mads"), &self.mads)?;
        if self.mads.iter().any(|m| *m < 0.0) {
            return Err(ModelError::InvalidParameter(format!(
                "{name}.mads must be non-negative"
            )));
        }
        Ok(())
    }

    /// Count indices strictly farther than one MAD from the median.
    #[must_use]
    pub fn evaluate(&self, scaled: &[f64; INDEX_COUNT]) -> MadEvaluation {
        let mut deviations = [0.0; INDEX_COUNT];
        let mut violated = [false; INDEX_COUNT];
        for i in 0..INDEX_COUNT {
            deviations[i] = (scaled[i] - self.medians[i]).abs();
            violated[i] = deviations[i] > self.mads[i];
        }
        MadEvaluation {
            deviations,
            violated,
            violations: violated.iter().filter(|v| **v).count(),
        }
    }
}
