//! Spectrum preprocessing: band validation, 485 nm removal and index math.
//!
//! The spectrometer reports 18 reflectance readings in fixed wavelength order
//! (410 nm through 940 nm). The 485 nm channel is unreliable on this sensor
//! and the trained models were fitted without it, so it is dropped before
//! anything else looks at the data. Four spectral indices are then derived
//! from named bands of the remaining 17.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SpectrumError;

/// Readings sent by the device.
pub const RAW_BAND_COUNT: usize = 18;

/// Readings consumed by the models.
pub const TRIMMED_BAND_COUNT: usize = 17;

/// Position of the 485 nm reading in a raw spectrum.
pub const REMOVED_BAND_INDEX: usize = 3;

/// Number of derived spectral indices.
pub const INDEX_COUNT: usize = 4;

/// Guard added to denominators of ratio indices.
pub const EPSILON: f64 = 1e-10;

/// Wavelength (nm) of each raw reading.
pub const RAW_WAVELENGTHS_NM: [u16; RAW_BAND_COUNT] = [
    410, 435, 460, 485, 510, 535, 560, 585, 610, 645, 680, 705, 730, 760, 810, 860, 900, 940,
];

/// Conventional column name of each raw reading.
pub const RAW_BAND_NAMES: [&str; RAW_BAND_COUNT] = [
    "r410", "r435", "r460", "r485", "r510", "r535", "r560", "r585", "r610", "r645", "r680",
    "r705", "r730", "r760", "r810", "r860", "r900", "r940",
];

/// Column names of the trimmed layout, in model order.
#[must_use]
pub fn trimmed_band_names() -> Vec<String> {
    RAW_BAND_NAMES
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != REMOVED_BAND_INDEX)
        .map(|(_, name)| (*name).to_string())
        .collect()
}

/// Reflectance spectrum as received from the device.
///
/// Any length is representable so that malformed submissions can be
/// rejected with a typed error by [`trim`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawSpectrum(Vec<f64>);

impl RawSpectrum {
    #[must_use]
    pub fn new(readings: Vec<f64>) -> Self {
        Self(readings)
    }

    #[must_use]
    pub fn readings(&self) -> &[f64] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f64>> for RawSpectrum {
    fn from(readings: Vec<f64>) -> Self {
        Self(readings)
    }
}

/// Spectrum with the 485 nm reading removed (17 values, original order).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimmedSpectrum([f64; TRIMMED_BAND_COUNT]);

impl TrimmedSpectrum {
    #[must_use]
    pub fn values(&self) -> &[f64; TRIMMED_BAND_COUNT] {
        &self.0
    }
}

/// Validate a raw spectrum and drop the 485 nm reading.
pub fn trim(raw: &RawSpectrum) -> Result<TrimmedSpectrum, SpectrumError> {
    let readings = raw.readings();
    if readings.len() != RAW_BAND_COUNT {
        return Err(SpectrumError::InvalidLength {
            expected: RAW_BAND_COUNT,
            actual: readings.len(),
        });
    }
    if let Some(index) = readings.iter().position(|v| !v.is_finite()) {
        return Err(SpectrumError::NonFiniteReading { index });
    }

    let mut out = [0.0; TRIMMED_BAND_COUNT];
    let kept = readings
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != REMOVED_BAND_INDEX)
        .map(|(_, v)| *v);
    for (slot, value) in out.iter_mut().zip(kept) {
        *slot = value;
    }

    debug!(
        removed_r485 = readings[REMOVED_BAND_INDEX],
        "Band 485nm removed"
    );
    Ok(TrimmedSpectrum(out))
}

/// One of the four derived spectral indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Normalized difference of r810 and r680
    #[serde(rename = "I1_NDVI")]
    Ndvi,
    /// r940 / r760
    #[serde(rename = "I2_Water")]
    Water,
    /// r860 / r680
    #[serde(rename = "I3_Lipid")]
    Lipid,
    /// (r645 - r535) / 110 nm
    #[serde(rename = "I4_Slope_Alt")]
    SlopeAlt,
}

impl IndexKind {
    pub const ALL: [Self; INDEX_COUNT] = [Self::Ndvi, Self::Water, Self::Lipid, Self::SlopeAlt];

    /// Column name used by the training export.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ndvi => "I1_NDVI",
            Self::Water => "I2_Water",
            Self::Lipid => "I3_Lipid",
            Self::SlopeAlt => "I4_Slope_Alt",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The four derived indices of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralIndices {
    #[serde(rename = "I1_NDVI")]
    pub ndvi: f64,
    #[serde(rename = "I2_Water")]
    pub water: f64,
    #[serde(rename = "I3_Lipid")]
    pub lipid: f64,
    #[serde(rename = "I4_Slope_Alt")]
    pub slope_alt: f64,
}

impl SpectralIndices {
    #[must_use]
    pub fn get(&self, kind: IndexKind) -> f64 {
        match kind {
            IndexKind::Ndvi => self.ndvi,
            IndexKind::Water => self.water,
            IndexKind::Lipid => self.lipid,
            IndexKind::SlopeAlt => self.slope_alt,
        }
    }

    /// Copy with every index rounded to `decimals` places.
    #[must_use]
    pub fn rounded(&self, decimals: i32) -> Self {
        let factor = 10f64.powi(decimals);
        let round = |v: f64| (v * factor).round() / factor;
        Self {
            ndvi: round(self.ndvi),
            water: round(self.water),
            lipid: round(self.lipid),
            slope_alt: round(self.slope_alt),
        }
    }

    /// Values in the column order the models were trained with.
    #[must_use]
    pub fn ordered(&self, order: &[IndexKind; INDEX_COUNT]) -> [f64; INDEX_COUNT] {
        order.map(|kind| self.get(kind))
    }
}

/// Positions of the bands needed by the index formulas within a trimmed
/// spectrum, resolved once from the model's column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandLayout {
    r535: usize,
    r645: usize,
    r680: usize,
    r760: usize,
    r810: usize,
    r860: usize,
    r940: usize,
}

impl BandLayout {
    /// Resolve band positions from ordered column names.
    pub fn resolve(band_names: &[String]) -> Result<Self, SpectrumError> {
        if band_names.len() != TRIMMED_BAND_COUNT {
            return Err(SpectrumError::InvalidLength {
                expected: TRIMMED_BAND_COUNT,
                actual: band_names.len(),
            });
        }
        let lookup: HashMap<&str, usize> = band_names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();
        let find = |band: &str| {
            lookup
                .get(band)
                .copied()
                .ok_or_else(|| SpectrumError::MissingBand(band.to_string()))
        };
        Ok(Self {
            r535: find("r535")?,
            r645: find("r645")?,
            r680: find("r680")?,
            r760: find("r760")?,
            r810: find("r810")?,
            r860: find("r860")?,
            r940: find("r940")?,
        })
    }

    /// Evaluate the four index formulas.
    #[must_use]
    pub fn indices(&self, trimmed: &TrimmedSpectrum) -> SpectralIndices {
        let v = trimmed.values();
        let (r535, r645, r680) = (v[self.r535], v[self.r645], v[self.r680]);
        let (r760, r810, r860, r940) = (v[self.r760], v[self.r810], v[self.r860], v[self.r940]);

        SpectralIndices {
            ndvi: (r810 - r680) / (r810 + r680 + EPSILON),
            water: r940 / (r760 + EPSILON),
            lipid: r860 / (r680 + EPSILON),
            slope_alt: (r645 - r535) / 110.0,
        }
    }
}

/// Compute the indices of a trimmed spectrum given the model's band columns.
pub fn compute_indices(
    trimmed: &TrimmedSpectrum,
    band_names: &[String],
) -> Result<SpectralIndices, SpectrumError> {
    Ok(BandLayout::resolve(band_names)?.indices(trimmed))
}

/// Trims spectra and derives indices against a fixed band layout.
#[derive(Debug, Clone, Copy)]
pub struct SpectrumPreprocessor {
    layout: BandLayout,
}

impl SpectrumPreprocessor {
    /// Build a preprocessor for the given model band columns.
    pub fn new(band_names: &[String]) -> Result<Self, SpectrumError> {
        Ok(Self {
            layout: BandLayout::resolve(band_names)?,
        })
    }

    /// Trim a raw spectrum and compute its indices.
    pub fn prepare(
        &self,
        raw: &RawSpectrum,
    ) -> Result<(TrimmedSpectrum, SpectralIndices), SpectrumError> {
        let trimmed = trim(raw)?;
        let indices = self.layout.indices(&trimmed);
        debug!(
            ndvi = indices.ndvi,
            water = indices.water,
            lipid = indices.lipid,
            slope_alt = indices.slope_alt,
            "Spectral indices computed"
        );
        Ok((trimmed, indices))
    }
}
