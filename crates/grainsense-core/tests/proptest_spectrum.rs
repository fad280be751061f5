//! Property-based tests for spectrum preprocessing.
//!
//! - trim accepts exactly 18 finite readings and keeps the other 17 in order
//! - any non-finite reading is reported at its first position
//! - indices are finite for non-negative reflectance
//! - NDVI stays within [-1, 1] for non-negative reflectance
//! - MAD violations count exactly the indices strictly beyond one MAD

use proptest::prelude::*;

use grainsense_core::error::SpectrumError;
use grainsense_core::model::MadThresholds;
use grainsense_core::spectrum::{
    INDEX_COUNT, RAW_BAND_COUNT, REMOVED_BAND_INDEX, RawSpectrum, SpectrumPreprocessor,
    TRIMMED_BAND_COUNT, trim, trimmed_band_names,
};

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

fn arb_reflectance() -> impl Strategy<Value = f64> {
    0.0f64..=2.0
}

fn arb_spectrum() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(arb_reflectance(), RAW_BAND_COUNT)
}

fn arb_wrong_length() -> impl Strategy<Value = usize> {
    (0usize..64).prop_filter("must not be the device band count", |n| {
        *n != RAW_BAND_COUNT
    })
}

fn arb_non_finite() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(f64::NAN),
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
    ]
}

fn arb_thresholds() -> impl Strategy<Value = MadThresholds> {
    (
        prop::array::uniform4(-5.0f64..5.0),
        prop::array::uniform4(0.01f64..3.0),
    )
        .prop_map(|(medians, mads)| MadThresholds { medians, mads })
}

// ────────────────────────────────────────────────────────────────────
// Properties
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn trim_removes_only_the_485nm_band(readings in arb_spectrum()) {
        let trimmed = trim(&RawSpectrum::new(readings.clone())).unwrap();
        let expected: Vec<f64> = readings
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != REMOVED_BAND_INDEX)
            .map(|(_, v)| *v)
            .collect();
        prop_assert_eq!(trimmed.values().len(), TRIMMED_BAND_COUNT);
        prop_assert_eq!(trimmed.values().to_vec(), expected);
    }

    #[test]
    fn trim_rejects_wrong_lengths(len in arb_wrong_length()) {
        let err = trim(&RawSpectrum::new(vec![0.5; len])).unwrap_err();
        prop_assert_eq!(
            err,
            SpectrumError::InvalidLength { expected: RAW_BAND_COUNT, actual: len }
        );
    }

    #[test]
    fn trim_reports_first_non_finite(
        readings in arb_spectrum(),
        first in 0usize..RAW_BAND_COUNT,
        offset in 0usize..RAW_BAND_COUNT,
        bad in arb_non_finite(),
    ) {
        let mut readings = readings;
        readings[first] = bad;
        let second = (first + offset).min(RAW_BAND_COUNT - 1);
        readings[second] = f64::NAN;

        let err = trim(&RawSpectrum::new(readings)).unwrap_err();
        prop_assert_eq!(err, SpectrumError::NonFiniteReading { index: first });
    }

    #[test]
    fn indices_are_finite_and_ndvi_bounded(readings in arb_spectrum()) {
        let pre = SpectrumPreprocessor::new(&trimmed_band_names()).unwrap();
        let (_, indices) = pre.prepare(&RawSpectrum::new(readings)).unwrap();

        prop_assert!(indices.ndvi.is_finite());
        prop_assert!(indices.water.is_finite());
        prop_assert!(indices.lipid.is_finite());
        prop_assert!(indices.slope_alt.is_finite());
        prop_assert!((-1.0..=1.0).contains(&indices.ndvi), "ndvi {}", indices.ndvi);
        prop_assert!(indices.water >= 0.0);
        prop_assert!(indices.lipid >= 0.0);
    }

    #[test]
    fn mad_violations_match_reference(
        thresholds in arb_thresholds(),
        point in prop::array::uniform4(-10.0f64..10.0),
    ) {
        let eval = thresholds.evaluate(&point);
        let mut expected = 0;
        for i in 0..INDEX_COUNT {
            let over = (point[i] - thresholds.medians[i]).abs() > thresholds.mads[i];
            prop_assert_eq!(eval.violated[i], over);
            if over {
                expected += 1;
            }
        }
        prop_assert_eq!(eval.violations, expected);
        prop_assert!(eval.violations <= INDEX_COUNT);
    }

    #[test]
    fn median_point_has_no_violations(thresholds in arb_thresholds()) {
        let eval = thresholds.evaluate(&thresholds.medians);
        prop_assert_eq!(eval.violations, 0);
    }
}
