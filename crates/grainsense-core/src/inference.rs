//! Classification and anomaly verdict for one spectrum.
//!
//! Pipeline, in order:
//! 1. validate and trim the raw spectrum to 17 bands
//! 2. derive the four spectral indices
//! 3. bands -> band scaler -> PCA, keeping the leading components
//! 4. `[indices, components]` -> final scaler -> classifier
//! 5. indices -> index scaler -> detector and MAD test of the predicted species
//! 6. combine verdicts: both detectors must agree for ANORMAL, and a low
//!    classifier confidence is flagged and turns a NORMAL verdict into ANORMAL
//!
//! Rounding happens only when the result is built, after every decision.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::InferenceConfig;
use crate::error::{ModelError, Result};
use crate::model::ModelBundle;
use crate::spectrum::{self, INDEX_COUNT, RawSpectrum, SpectralIndices};

/// Final verdict on a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "ANORMAL")]
    Anomalous,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Anomalous => "ANORMAL",
        }
    }

    #[must_use]
    pub const fn is_anomalous(self) -> bool {
        matches!(self, Self::Anomalous)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostics behind the verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDetails {
    /// One-class detector decision value (4 decimals)
    #[serde(rename = "svm_score")]
    pub detector_score: f64,
    #[serde(rename = "svm_detectou")]
    pub detector_flagged: bool,
    #[serde(rename = "mad_violacoes")]
    pub mad_violations: usize,
    #[serde(rename = "mad_detectou")]
    pub mad_flagged: bool,
    #[serde(rename = "confianca_baixa")]
    pub low_confidence: bool,
    /// Human-readable decision rule
    #[serde(rename = "logica_usada")]
    pub decision_rule: String,
}

/// Outcome of one inference, as returned to devices and stored in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(rename = "especie")]
    pub species: String,
    /// Max class probability, percent (1 decimal)
    #[serde(rename = "confianca")]
    pub confidence: f64,
    pub status: Status,
    /// Percent per species (1 decimal)
    #[serde(rename = "probabilidades")]
    pub probabilities: BTreeMap<String, f64>,
    pub indices: SpectralIndices,
    #[serde(rename = "detalhes_anomalia")]
    pub anomaly: AnomalyDetails,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Parameters of the verdict combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionRule {
    /// MAD violations needed to flag a sample
    pub mad_min_violations: usize,
    /// Confidence (0-1) below which NORMAL becomes ANORMAL
    pub low_confidence_threshold: f64,
}

impl Default for DecisionRule {
    fn default() -> Self {
        Self::from(&InferenceConfig::default())
    }
}

impl From<&InferenceConfig> for DecisionRule {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            mad_min_violations: config.mad_min_violations,
            low_confidence_threshold: config.low_confidence_threshold,
        }
    }
}

impl DecisionRule {
    /// Label stored in every result, e.g. `AND + alerta confiança < 60%`.
    #[must_use]
    pub fn label(&self) -> String {
        format!(
            "AND + alerta confiança < {:.0}%",
            self.low_confidence_threshold * 100.0
        )
    }

    /// Combine detector verdicts and confidence.
    ///
    /// Returns the status and the low-confidence flag. The flag depends on
    /// confidence alone; it only changes the status of a NORMAL sample.
    #[must_use]
    pub fn decide(
        &self,
        detector_flagged: bool,
        mad_flagged: bool,
        confidence: f64,
    ) -> (Status, bool) {
        let low_confidence = confidence < self.low_confidence_threshold;
        let status = if (detector_flagged && mad_flagged) || low_confidence {
            Status::Anomalous
        } else {
            Status::Normal
        };
        (status, low_confidence)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Runs the full pipeline against a shared bundle.
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    bundle: Arc<ModelBundle>,
    rule: DecisionRule,
}

impl InferenceEngine {
    #[must_use]
    pub fn new(bundle: Arc<ModelBundle>, config: &InferenceConfig) -> Self {
        Self {
            bundle,
            rule: DecisionRule::from(config),
        }
    }

    #[must_use]
    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    #[must_use]
    pub fn rule(&self) -> DecisionRule {
        self.rule
    }

    /// Classify a spectrum, stamping the result with the current time.
    pub fn classify(&self, device_id: &str, raw: &RawSpectrum) -> Result<AnalysisResult> {
        self.classify_at(device_id, raw, Utc::now())
    }

    /// Classify a spectrum with an explicit timestamp.
    pub fn classify_at(
        &self,
        device_id: &str,
        raw: &RawSpectrum,
        timestamp: DateTime<Utc>,
    ) -> Result<AnalysisResult> {
        let bundle = &*self.bundle;

        let trimmed = spectrum::trim(raw)?;
        let indices = bundle.layout().indices(&trimmed);
        debug!(
            device_id,
            ndvi = indices.ndvi,
            water = indices.water,
            lipid = indices.lipid,
            slope_alt = indices.slope_alt,
            "Spectral indices computed"
        );

        // Band space -> leading principal components.
        let bands_scaled = bundle.scaler_bands().transform(trimmed.values());
        let mut components = bundle.reduction().transform(&bands_scaled);
        components.truncate(bundle.retained_components());

        let ordered = indices.ordered(bundle.index_order());
        let mut features = Vec::with_capacity(INDEX_COUNT + components.len());
        features.extend_from_slice(&ordered);
        features.extend_from_slice(&components);
        let features = bundle.scaler_final().transform(&features);

        let classes = bundle.species();
        let probabilities = bundle.classifier().predict_proba(&features);
        if probabilities.len() != classes.len() {
            return Err(ModelError::DimensionMismatch {
                component: "classifier output".to_string(),
                expected: classes.len(),
                actual: probabilities.len(),
            }
            .into());
        }
        if let Some(pos) = probabilities.iter().position(|p| !p.is_finite()) {
            return Err(ModelError::InvalidParameter(format!(
                "classifier output[{pos}] is not finite for this spectrum"
            ))
            .into());
        }
        let (best, confidence) = probabilities.iter().copied().enumerate().fold(
            (0, f64::NEG_INFINITY),
            |acc, (i, p)| if p > acc.1 { (i, p) } else { acc },
        );
        let species = classes[best].clone();
        debug!(device_id, species = %species, confidence, "Species predicted");

        // Anomaly detection in the predicted species' frame.
        let scaled = bundle.scaler_indices().transform(&ordered);
        let scaled: [f64; INDEX_COUNT] = scaled.try_into().map_err(|v: Vec<f64>| {
            ModelError::DimensionMismatch {
                component: "scaler_indices output".to_string(),
                expected: INDEX_COUNT,
                actual: v.len(),
            }
        })?;

        let detector = bundle
            .detector(&species)
            .ok_or_else(|| ModelError::MissingDetector(species.clone()))?;
        let detector_score = detector.decision_function(&scaled);
        let detector_flagged = detector.is_outlier(&scaled);
        debug!(
            device_id,
            species = %species,
            score = detector_score,
            outlier = detector_flagged,
            "Detector score"
        );

        let thresholds = bundle
            .mad_thresholds(&species)
            .ok_or_else(|| ModelError::MissingThresholds(species.clone()))?;
        let mad = thresholds.evaluate(&scaled);
        for (i, kind) in bundle.index_order().iter().enumerate() {
            debug!(
                device_id,
                index = kind.name(),
                deviation = mad.deviations[i],
                mad = thresholds.mads[i],
                violated = mad.violated[i],
                "MAD check"
            );
        }
        let mad_flagged = mad.violations >= self.rule.mad_min_violations;

        let (status, low_confidence) = self.rule.decide(detector_flagged, mad_flagged, confidence);
        if low_confidence {
            warn!(
                device_id,
                species = %species,
                confidence,
                "Low classifier confidence, possible contamination"
            );
        }

        info!(
            device_id,
            species = %species,
            confidence,
            detector_flagged,
            violations = mad.violations,
            mad_flagged,
            low_confidence,
            status = %status,
            "Analysis complete"
        );

        Ok(AnalysisResult {
            species,
            confidence: round_to(confidence * 100.0, 1),
            status,
            probabilities: classes
                .iter()
                .zip(&probabilities)
                .map(|(class, p)| (class.clone(), round_to(p * 100.0, 1)))
                .collect(),
            indices: indices.rounded(4),
            anomaly: AnomalyDetails {
                detector_score: round_to(detector_score, 4),
                detector_flagged,
                mad_violations: mad.violations,
                mad_flagged,
                low_confidence,
                decision_rule: self.rule.label(),
            },
            device_id: device_id.to_string(),
            timestamp,
        })
    }
}
