//! Fitted linear transforms: standardization and PCA projection.

use serde::{Deserialize, Serialize};

use super::{FeatureTransform, check_finite};
use crate::error::ModelError;

/// Per-feature standardization, `(x - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Check shape and that every scale is usable as a divisor.
    pub fn validate(&self, name: &str) -> Result<(), ModelError> {
        if self.mean.len() != self.scale.len() {
            return Err(ModelError::DimensionMismatch {
                component: format!("{name}.scale"),
                expected: self.mean.len(),
                actual: self.scale.len(),
            });
        }
        check_finite(&format!("{name}.mean"), &self.mean)?;
        check_finite(&format!("{name}.scale"), &self.scale)?;
        if let Some(pos) = self.scale.iter().position(|s| *s == 0.0) {
            return Err(ModelError::InvalidParameter(format!(
                "{name}.scale[{pos}] is zero"
            )));
        }
        Ok(())
    }
}

impl FeatureTransform for StandardScaler {
    fn input_dim(&self) -> usize {
        self.mean.len()
    }

    fn output_dim(&self) -> usize {
        self.mean.len()
    }

    fn transform(&self, input: &[f64]) -> Vec<f64> {
        input
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| (x - mean) / scale)
            .collect()
    }
}

/// Principal component projection fitted on the band space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pca {
    pub mean: Vec<f64>,
    /// One row per component, each `mean.len()` long.
    pub components: Vec<Vec<f64>>,
    #[serde(default)]
    pub explained_variance_ratio: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explained_variance: Option<Vec<f64>>,
    #[serde(default)]
    pub whiten: bool,
}

impl Pca {
    pub fn validate(&self) -> Result<(), ModelError> {
        let features = self.mean.len();
        check_finite("pca.mean", &self.mean)?;
        if self.components.is_empty() {
            return Err(ModelError::InvalidParameter(
                "pca.components is empty".to_string(),
            ));
        }
        for (k, row) in self.components.iter().enumerate() {
            if row.len() != features {
                return Err(ModelError::DimensionMismatch {
                    component: format!("pca.components[{k}]"),
                    expected: features,
                    actual: row.len(),
                });
            }
            check_finite(&format!("pca.components[{k}]"), row)?;
        }
        if !self.explained_variance_ratio.is_empty()
            && self.explained_variance_ratio.len() != self.components.len()
        {
            return Err(ModelError::DimensionMismatch {
                component: "pca.explained_variance_ratio".to_string(),
                expected: self.components.len(),
                actual: self.explained_variance_ratio.len(),
            });
        }
        if self.whiten {
            let variance = self.explained_variance.as_deref().ok_or_else(|| {
                ModelError::InvalidParameter(
                    "pca.whiten requires pca.explained_variance".to_string(),
                )
            })?;
            if variance.len() != self.components.len() {
                return Err(ModelError::DimensionMismatch {
                    component: "pca.explained_variance".to_string(),
                    expected: self.components.len(),
                    actual: variance.len(),
                });
            }
            if variance.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                return Err(ModelError::InvalidParameter(
                    "pca.explained_variance must be positive to whiten".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Total variance ratio captured by all fitted components.
    #[must_use]
    pub fn total_explained_variance(&self) -> Option<f64> {
        if self.explained_variance_ratio.is_empty() {
            None
        } else {
            Some(self.explained_variance_ratio.iter().sum())
        }
    }
}

impl FeatureTransform for Pca {
    fn input_dim(&self) -> usize {
        self.mean.len()
    }

    fn output_dim(&self) -> usize {
        self.components.len()
    }

    fn transform(&self, input: &[f64]) -> Vec<f64> {
        let centered: Vec<f64> = input.iter().zip(&self.mean).map(|(x, m)| x - m).collect();
        self.components
            .iter()
            .enumerate()
            .map(|(k, row)| {
                let projected: f64 = row.iter().zip(&centered).map(|(w, x)| w * x).sum();
                match (&self.explained_variance, self.whiten) {
                    (Some(variance), true) => projected / variance[k].sqrt(),
                    _ => projected,
                }
            })
            .collect()
    }
}
