//! Shared fixtures for grainsense-core integration tests.
//!
//! Import from integration test files with:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use grainsense_core::config::InferenceConfig;
use grainsense_core::model::{
    BUNDLE_FORMAT_VERSION, BundleFile, ClassifierSpec, Kernel, LogisticRegression, MadThresholds,
    ModelBundle, ModelBundleParts, NoveltyDetector, OneClassSvm, Pca, SpeciesClassifier,
    StandardScaler,
};
use grainsense_core::spectrum::{
    INDEX_COUNT, IndexKind, RAW_BAND_COUNT, RawSpectrum, SpectrumPreprocessor, TRIMMED_BAND_COUNT,
    trimmed_band_names,
};
use grainsense_core::InferenceEngine;

pub const SPECIES: [&str; 3] = ["feijao", "milho", "soja"];

/// Plausible grain reflectance: low in the visible, rising into the NIR.
#[must_use]
pub fn sample_spectrum() -> RawSpectrum {
    RawSpectrum::new(
        (0..RAW_BAND_COUNT)
            .map(|i| 0.08 + 0.025 * i as f64 + if i >= 13 { 0.1 } else { 0.0 })
            .collect(),
    )
}

#[must_use]
pub fn identity_scaler(dim: usize) -> StandardScaler {
    StandardScaler {
        mean: vec![0.0; dim],
        scale: vec![1.0; dim],
    }
}

#[must_use]
pub fn identity_pca(components: usize) -> Pca {
    Pca {
        mean: vec![0.0; TRIMMED_BAND_COUNT],
        components: (0..components)
            .map(|r| {
                (0..TRIMMED_BAND_COUNT)
                    .map(|c| if r == c { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect(),
        explained_variance_ratio: vec![0.1; components],
        explained_variance: None,
        whiten: false,
    }
}

/// Classifier that ignores its input.
#[derive(Debug)]
pub struct FixedClassifier {
    pub classes: Vec<String>,
    pub probabilities: Vec<f64>,
}

impl SpeciesClassifier for FixedClassifier {
    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn input_dim(&self) -> usize {
        INDEX_COUNT + 6
    }

    fn predict_proba(&self, _features: &[f64]) -> Vec<f64> {
        self.probabilities.clone()
    }
}

/// Detector with a constant decision value.
#[derive(Debug)]
pub struct FixedDetector {
    pub score: f64,
}

impl NoveltyDetector for FixedDetector {
    fn input_dim(&self) -> usize {
        INDEX_COUNT
    }

    fn decision_function(&self, _features: &[f64]) -> f64 {
        self.score
    }
}

/// Knobs controlling each stage's verdict on [`sample_spectrum`].
#[derive(Debug, Clone)]
pub struct Scenario {
    /// One probability per entry of [`SPECIES`]
    pub probabilities: Vec<f64>,
    pub detector_score: f64,
    /// Indices pushed outside their MAD window
    pub mad_violations: usize,
}

/// Bundle whose outcome on [`sample_spectrum`] is fully determined by the
/// scenario.
#[must_use]
pub fn scenario_bundle(scenario: &Scenario) -> ModelBundle {
    let pre = SpectrumPreprocessor::new(&trimmed_band_names()).unwrap();
    let (_, indices) = pre.prepare(&sample_spectrum()).unwrap();
    let values = indices.ordered(&IndexKind::ALL);

    let mut medians = values;
    for median in medians.iter_mut().take(scenario.mad_violations) {
        *median += 10.0;
    }
    let thresholds = MadThresholds {
        medians,
        mads: [1.0; INDEX_COUNT],
    };

    let mut detectors: HashMap<String, Box<dyn NoveltyDetector>> = HashMap::new();
    let mut mad_thresholds = HashMap::new();
    for species in SPECIES {
        detectors.insert(
            species.to_string(),
            Box::new(FixedDetector {
                score: scenario.detector_score,
            }),
        );
        mad_thresholds.insert(species.to_string(), thresholds);
    }

    let parts = ModelBundleParts {
        classifier: Box::new(FixedClassifier {
            classes: SPECIES.iter().map(|s| (*s).to_string()).collect(),
            probabilities: scenario.probabilities.clone(),
        }),
        detectors,
        mad_thresholds,
        scaler_bands: Box::new(identity_scaler(TRIMMED_BAND_COUNT)),
        scaler_indices: Box::new(identity_scaler(INDEX_COUNT)),
        scaler_final: Box::new(identity_scaler(INDEX_COUNT + 6)),
        reduction: Box::new(identity_pca(6)),
        band_columns: trimmed_band_names(),
        index_columns: IndexKind::ALL.iter().map(|k| k.name().to_string()).collect(),
        explained_variance: Some(0.6),
    };
    ModelBundle::from_parts(parts, 6).unwrap()
}

#[must_use]
pub fn scenario_engine(scenario: &Scenario) -> InferenceEngine {
    InferenceEngine::new(
        Arc::new(scenario_bundle(scenario)),
        &InferenceConfig::default(),
    )
}

/// A complete serializable bundle with a logistic classifier and RBF
/// detectors centred on the scaled indices of [`sample_spectrum`].
#[must_use]
pub fn logistic_bundle_file() -> BundleFile {
    let pre = SpectrumPreprocessor::new(&trimmed_band_names()).unwrap();
    let (_, indices) = pre.prepare(&sample_spectrum()).unwrap();
    let center = indices.ordered(&IndexKind::ALL).to_vec();

    let coef: Vec<Vec<f64>> = (0..SPECIES.len())
        .map(|k| {
            (0..INDEX_COUNT + 6)
                .map(|j| ((k * 7 + j * 3) % 5) as f64 * 0.1 - 0.2)
                .collect()
        })
        .collect();

    let detectors: BTreeMap<String, OneClassSvm> = SPECIES
        .iter()
        .map(|s| {
            (
                (*s).to_string(),
                OneClassSvm {
                    kernel: Kernel::Rbf { gamma: 0.5 },
                    support_vectors: vec![center.clone()],
                    dual_coef: vec![1.0],
                    intercept: -0.5,
                },
            )
        })
        .collect();

    let mut medians = [0.0; INDEX_COUNT];
    medians.copy_from_slice(&center);
    let mad_thresholds: BTreeMap<String, MadThresholds> = SPECIES
        .iter()
        .map(|s| {
            (
                (*s).to_string(),
                MadThresholds {
                    medians,
                    mads: [0.5; INDEX_COUNT],
                },
            )
        })
        .collect();

    BundleFile {
        format_version: BUNDLE_FORMAT_VERSION,
        classifier: ClassifierSpec::Logistic(LogisticRegression {
            classes: SPECIES.iter().map(|s| (*s).to_string()).collect(),
            coef,
            intercept: vec![0.1, 0.0, -0.1],
        }),
        detectors,
        mad_thresholds,
        scaler_bands: identity_scaler(TRIMMED_BAND_COUNT),
        scaler_indices: identity_scaler(INDEX_COUNT),
        scaler_final: identity_scaler(INDEX_COUNT + 6),
        pca: identity_pca(8),
        band_columns: trimmed_band_names(),
        index_columns: IndexKind::ALL.iter().map(|k| k.name().to_string()).collect(),
    }
}
