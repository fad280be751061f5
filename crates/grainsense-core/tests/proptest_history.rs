//! Property-based tests for the bounded analysis history.
//!
//! Checked against a VecDeque reference model:
//! - length never exceeds capacity
//! - snapshot is newest first, chronological is oldest first
//! - latest is the last append
//! - appended = len + evicted
//! - export emits one row per stored result, oldest first

use std::collections::{BTreeMap, VecDeque};

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use grainsense_core::export::{self, ExportFormat};
use grainsense_core::history::AnalysisLog;
use grainsense_core::inference::{AnalysisResult, AnomalyDetails, Status};
use grainsense_core::spectrum::SpectralIndices;

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

fn result(seq: u32) -> AnalysisResult {
    AnalysisResult {
        species: "soja".to_string(),
        confidence: 90.0,
        status: if seq % 3 == 0 {
            Status::Anomalous
        } else {
            Status::Normal
        },
        probabilities: BTreeMap::from([("soja".to_string(), 90.0), ("milho".to_string(), 10.0)]),
        indices: SpectralIndices {
            ndvi: 0.1,
            water: 1.0,
            lipid: 2.0,
            slope_alt: 0.0,
        },
        anomaly: AnomalyDetails {
            detector_score: 0.2,
            detector_flagged: false,
            mad_violations: 0,
            mad_flagged: false,
            low_confidence: false,
            decision_rule: "AND + alerta confiança < 60%".to_string(),
        },
        device_id: format!("dev-{seq}"),
        timestamp: Utc
            .timestamp_millis_opt(1_700_000_000_000 + i64::from(seq))
            .unwrap(),
    }
}

fn arb_capacity() -> impl Strategy<Value = usize> {
    1usize..=32
}

fn arb_append_count() -> impl Strategy<Value = u32> {
    0u32..=120
}

// ────────────────────────────────────────────────────────────────────
// Properties
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn log_matches_reference_model(capacity in arb_capacity(), count in arb_append_count()) {
        let log = AnalysisLog::new(capacity);
        let mut model: VecDeque<String> = VecDeque::new();

        for seq in 0..count {
            log.append(result(seq));
            model.push_back(format!("dev-{seq}"));
            if model.len() > capacity {
                model.pop_front();
            }
            prop_assert!(log.len() <= capacity);
        }

        let chronological: Vec<String> =
            log.chronological().into_iter().map(|r| r.device_id).collect();
        prop_assert_eq!(&chronological, &model.iter().cloned().collect::<Vec<_>>());

        let newest_first: Vec<String> =
            log.snapshot().into_iter().map(|r| r.device_id).collect();
        prop_assert_eq!(newest_first, model.iter().rev().cloned().collect::<Vec<_>>());

        prop_assert_eq!(
            log.latest().map(|r| r.device_id),
            model.back().cloned()
        );

        let stats = log.stats();
        prop_assert_eq!(stats.total_appended, u64::from(count));
        prop_assert_eq!(stats.total_appended, stats.len as u64 + stats.total_evicted);
    }

    #[test]
    fn zero_capacity_is_clamped(count in 1u32..10) {
        let log = AnalysisLog::new(0);
        for seq in 0..count {
            log.append(result(seq));
        }
        prop_assert_eq!(log.capacity(), 1);
        prop_assert_eq!(log.len(), 1);
        prop_assert_eq!(log.latest().map(|r| r.device_id), Some(format!("dev-{}", count - 1)));
    }

    #[test]
    fn export_rows_follow_history(capacity in arb_capacity(), count in arb_append_count()) {
        let log = AnalysisLog::new(capacity);
        for seq in 0..count {
            log.append(result(seq));
        }
        let stored = log.chronological();

        let csv = export::render(&stored, ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        prop_assert_eq!(lines.len(), stored.len() + 1);
        for (line, entry) in lines.iter().skip(1).zip(&stored) {
            prop_assert!(line.contains(&entry.device_id));
        }

        let jsonl = export::render(&stored, ExportFormat::JsonLines).unwrap();
        prop_assert_eq!(jsonl.lines().count(), stored.len());
        for (line, entry) in jsonl.lines().zip(&stored) {
            let parsed: AnalysisResult = serde_json::from_str(line).unwrap();
            prop_assert_eq!(&parsed, entry);
        }
    }
}
