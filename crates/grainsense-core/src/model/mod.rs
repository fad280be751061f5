//! Trained model bundle.
//!
//! A bundle holds everything the inference pipeline needs: three fitted
//! scalers, the PCA projection of the band space, the species classifier,
//! one novelty detector and one set of MAD thresholds per species, plus the
//! column order the models were trained with.
//!
//! Bundles are loaded once, validated completely, and never mutated. A
//! bundle that fails any check is rejected as a whole.

mod classifier;
mod detector;
mod linear;

pub use classifier::{ClassifierSpec, LogisticRegression, SoftVotingClassifier};
pub use detector::{Kernel, MadEvaluation, MadThresholds, OneClassSvm};
pub use linear::{Pca, StandardScaler};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ModelError, Result};
use crate::spectrum::{
    BandLayout, INDEX_COUNT, IndexKind, REMOVED_BAND_INDEX, RAW_BAND_NAMES, TRIMMED_BAND_COUNT,
};

/// Bundle file format understood by this build.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// A fitted vector-to-vector transform.
pub trait FeatureTransform: Send + Sync + fmt::Debug {
    fn input_dim(&self) -> usize;
    fn output_dim(&self) -> usize;
    /// Apply to an input of `input_dim()` values.
    fn transform(&self, input: &[f64]) -> Vec<f64>;
}

/// A multi-class species classifier.
pub trait SpeciesClassifier: Send + Sync + fmt::Debug {
    /// Class labels, in probability order.
    fn classes(&self) -> &[String];
    fn input_dim(&self) -> usize;
    /// One probability per class, summing to 1.
    fn predict_proba(&self, features: &[f64]) -> Vec<f64>;
}

/// A one-class novelty detector.
pub trait NoveltyDetector: Send + Sync + fmt::Debug {
    fn input_dim(&self) -> usize;
    /// Signed distance to the learned boundary; negative means outside.
    fn decision_function(&self, features: &[f64]) -> f64;

    fn is_outlier(&self, features: &[f64]) -> bool {
        self.decision_function(features) < 0.0
    }
}

pub(crate) fn check_finite(name: &str, values: &[f64]) -> std::result::Result<(), ModelError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(pos) => Err(ModelError::InvalidParameter(format!(
            "{name}[{pos}] is not finite"
        ))),
        None => Ok(()),
    }
}

/// On-disk bundle document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleFile {
    pub format_version: u32,
    pub classifier: ClassifierSpec,
    pub detectors: BTreeMap<String, OneClassSvm>,
    pub mad_thresholds: BTreeMap<String, MadThresholds>,
    pub scaler_bands: StandardScaler,
    pub scaler_indices: StandardScaler,
    pub scaler_final: StandardScaler,
    pub pca: Pca,
    pub band_columns: Vec<String>,
    pub index_columns: Vec<String>,
}

#[derive(Deserialize)]
struct VersionProbe {
    format_version: u32,
}

impl BundleFile {
    /// Validate every component and assemble a bundle.
    pub fn into_bundle(self, retained_components: usize) -> Result<ModelBundle> {
        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion {
                found: self.format_version,
                supported: BUNDLE_FORMAT_VERSION,
            }
            .into());
        }
        self.classifier.validate()?;
        self.scaler_bands.validate("scaler_bands")?;
        self.scaler_indices.validate("scaler_indices")?;
        self.scaler_final.validate("scaler_final")?;
        self.pca.validate()?;
        for (species, svm) in &self.detectors {
            svm.validate(species)?;
        }
        for (species, thresholds) in &self.mad_thresholds {
            thresholds.validate(species)?;
        }

        let explained_variance = self.pca.total_explained_variance();
        let parts = ModelBundleParts {
            classifier: self.classifier.into_boxed(),
            detectors: self
                .detectors
                .into_iter()
                .map(|(species, svm)| (species, Box::new(svm) as Box<dyn NoveltyDetector>))
                .collect(),
            mad_thresholds: self.mad_thresholds.into_iter().collect(),
            scaler_bands: Box::new(self.scaler_bands),
            scaler_indices: Box::new(self.scaler_indices),
            scaler_final: Box::new(self.scaler_final),
            reduction: Box::new(self.pca),
            band_columns: self.band_columns,
            index_columns: self.index_columns,
            explained_variance,
        };
        ModelBundle::from_parts(parts, retained_components)
    }
}

/// Components of a bundle before cross-checking.
///
/// Lets callers assemble a bundle from any implementation of the pipeline
/// traits, not only the serialized ones.
#[derive(Debug)]
pub struct ModelBundleParts {
    pub classifier: Box<dyn SpeciesClassifier>,
    pub detectors: HashMap<String, Box<dyn NoveltyDetector>>,
    pub mad_thresholds: HashMap<String, MadThresholds>,
    pub scaler_bands: Box<dyn FeatureTransform>,
    pub scaler_indices: Box<dyn FeatureTransform>,
    pub scaler_final: Box<dyn FeatureTransform>,
    pub reduction: Box<dyn FeatureTransform>,
    pub band_columns: Vec<String>,
    pub index_columns: Vec<String>,
    /// Variance ratio captured by the reduction, if known
    pub explained_variance: Option<f64>,
}

/// Validated, immutable set of trained artifacts.
#[derive(Debug)]
pub struct ModelBundle {
    classifier: Box<dyn SpeciesClassifier>,
    detectors: HashMap<String, Box<dyn NoveltyDetector>>,
    mad_thresholds: HashMap<String, MadThresholds>,
    scaler_bands: Box<dyn FeatureTransform>,
    scaler_indices: Box<dyn FeatureTransform>,
    scaler_final: Box<dyn FeatureTransform>,
    reduction: Box<dyn FeatureTransform>,
    band_columns: Vec<String>,
    index_columns: Vec<String>,
    index_order: [IndexKind; INDEX_COUNT],
    layout: BandLayout,
    retained_components: usize,
    explained_variance: Option<f64>,
    source: Option<PathBuf>,
}

fn expect_dim(component: &str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ModelError::DimensionMismatch {
            component: component.to_string(),
            expected,
            actual,
        }
        .into())
    }
}

fn resolve_index_order(columns: &[String]) -> Result<[IndexKind; INDEX_COUNT]> {
    expect_dim("index_columns", INDEX_COUNT, columns.len())?;
    let mut order = IndexKind::ALL;
    let mut seen = HashSet::new();
    for (slot, name) in order.iter_mut().zip(columns) {
        let kind = IndexKind::from_name(name)
            .ok_or_else(|| ModelError::ColumnMismatch(format!("unknown index column `{name}`")))?;
        if !seen.insert(kind) {
            return Err(
                ModelError::ColumnMismatch(format!("index column `{name}` repeated")).into(),
            );
        }
        *slot = kind;
    }
    Ok(order)
}

impl ModelBundle {
    /// Cross-check components and seal them into a bundle.
    ///
    /// `retained_components` is how many leading reduction outputs feed the
    /// classifier.
    pub fn from_parts(parts: ModelBundleParts, retained_components: usize) -> Result<Self> {
        expect_dim("band_columns", TRIMMED_BAND_COUNT, parts.band_columns.len())?;
        let mut seen = HashSet::new();
        for name in &parts.band_columns {
            if !seen.insert(name.as_str()) {
                return Err(
                    ModelError::ColumnMismatch(format!("band column `{name}` repeated")).into(),
                );
            }
        }
        if parts.band_columns.iter().any(|n| n == RAW_BAND_NAMES[REMOVED_BAND_INDEX]) {
            return Err(ModelError::ColumnMismatch(format!(
                "band columns must not include `{}`",
                RAW_BAND_NAMES[REMOVED_BAND_INDEX]
            ))
            .into());
        }
        let layout = BandLayout::resolve(&parts.band_columns)?;
        let index_order = resolve_index_order(&parts.index_columns)?;

        let final_dim = INDEX_COUNT + retained_components;
        expect_dim("scaler_bands", TRIMMED_BAND_COUNT, parts.scaler_bands.input_dim())?;
        expect_dim("scaler_bands", TRIMMED_BAND_COUNT, parts.scaler_bands.output_dim())?;
        expect_dim("pca", TRIMMED_BAND_COUNT, parts.reduction.input_dim())?;
        if parts.reduction.output_dim() < retained_components {
            return Err(ModelError::DimensionMismatch {
                component: "pca.components".to_string(),
                expected: retained_components,
                actual: parts.reduction.output_dim(),
            }
            .into());
        }
        expect_dim("scaler_indices", INDEX_COUNT, parts.scaler_indices.input_dim())?;
        expect_dim("scaler_indices", INDEX_COUNT, parts.scaler_indices.output_dim())?;
        expect_dim("scaler_final", final_dim, parts.scaler_final.input_dim())?;
        expect_dim("scaler_final", final_dim, parts.scaler_final.output_dim())?;
        expect_dim("classifier", final_dim, parts.classifier.input_dim())?;

        for species in parts.classifier.classes() {
            let detector = parts
                .detectors
                .get(species)
                .ok_or_else(|| ModelError::MissingDetector(species.clone()))?;
            expect_dim(
                &format!("detectors.{species}"),
                INDEX_COUNT,
                detector.input_dim(),
            )?;
            if !parts.mad_thresholds.contains_key(species) {
                return Err(ModelError::MissingThresholds(species.clone()).into());
            }
        }
        let classes: HashSet<&String> = parts.classifier.classes().iter().collect();
        for species in parts.detectors.keys().chain(parts.mad_thresholds.keys()) {
            if !classes.contains(species) {
                warn!(species = %species, "Bundle carries parameters for an unknown species");
            }
        }

        Ok(Self {
            classifier: parts.classifier,
            detectors: parts.detectors,
            mad_thresholds: parts.mad_thresholds,
            scaler_bands: parts.scaler_bands,
            scaler_indices: parts.scaler_indices,
            scaler_final: parts.scaler_final,
            reduction: parts.reduction,
            band_columns: parts.band_columns,
            index_columns: parts.index_columns,
            index_order,
            layout,
            retained_components,
            explained_variance: parts.explained_variance,
            source: None,
        })
    }

    /// Parse and validate a bundle document.
    pub fn from_json_str(text: &str, retained_components: usize) -> Result<Self> {
        let probe: VersionProbe =
            serde_json::from_str(text).map_err(|e| ModelError::Load(e.to_string()))?;
        if probe.format_version != BUNDLE_FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion {
                found: probe.format_version,
                supported: BUNDLE_FORMAT_VERSION,
            }
            .into());
        }
        let file: BundleFile =
            serde_json::from_str(text).map_err(|e| ModelError::Load(e.to_string()))?;
        file.into_bundle(retained_components)
    }

    /// Load and validate a bundle file.
    pub fn load(path: &Path, retained_components: usize) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ModelError::Load(format!("{}: {e}", path.display())))?;
        let mut bundle = Self::from_json_str(&text, retained_components)?;
        bundle.source = Some(path.to_path_buf());
        info!(
            path = %path.display(),
            species = ?bundle.species(),
            retained_components,
            "Model bundle loaded"
        );
        Ok(bundle)
    }

    #[must_use]
    pub fn classifier(&self) -> &dyn SpeciesClassifier {
        self.classifier.as_ref()
    }

    #[must_use]
    pub fn species(&self) -> &[String] {
        self.classifier.classes()
    }

    #[must_use]
    pub fn detector(&self, species: &str) -> Option<&dyn NoveltyDetector> {
        self.detectors.get(species).map(AsRef::as_ref)
    }

    #[must_use]
    pub fn mad_thresholds(&self, species: &str) -> Option<&MadThresholds> {
        self.mad_thresholds.get(species)
    }

    #[must_use]
    pub fn scaler_bands(&self) -> &dyn FeatureTransform {
        self.scaler_bands.as_ref()
    }

    #[must_use]
    pub fn scaler_indices(&self) -> &dyn FeatureTransform {
        self.scaler_indices.as_ref()
    }

    #[must_use]
    pub fn scaler_final(&self) -> &dyn FeatureTransform {
        self.scaler_final.as_ref()
    }

    #[must_use]
    pub fn reduction(&self) -> &dyn FeatureTransform {
        self.reduction.as_ref()
    }

    #[must_use]
    pub fn band_columns(&self) -> &[String] {
        &self.band_columns
    }

    #[must_use]
    pub fn index_columns(&self) -> &[String] {
        &self.index_columns
    }

    /// Index order of the detector and final-scaler inputs.
    #[must_use]
    pub fn index_order(&self) -> &[IndexKind; INDEX_COUNT] {
        &self.index_order
    }

    #[must_use]
    pub fn layout(&self) -> BandLayout {
        self.layout
    }

    #[must_use]
    pub fn retained_components(&self) -> usize {
        self.retained_components
    }

    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn summary(&self) -> BundleSummary {
        BundleSummary {
            format_version: BUNDLE_FORMAT_VERSION,
            species: self.species().to_vec(),
            band_columns: self.band_columns.clone(),
            index_columns: self.index_columns.clone(),
            retained_components: self.retained_components,
            fitted_components: self.reduction.output_dim(),
            explained_variance: self.explained_variance,
            source: self.source.clone(),
        }
    }
}

/// Human-facing description of a loaded bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSummary {
    pub format_version: u32,
    pub species: Vec<String>,
    pub band_columns: Vec<String>,
    pub index_columns: Vec<String>,
    pub retained_components: usize,
    pub fitted_components: usize,
    /// Sum of the explained variance ratios of all fitted components
    pub explained_variance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}
