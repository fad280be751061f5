//! History export as CSV or JSON lines.
//!
//! Rows are written oldest first so an export reads like a lab notebook.

use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::inference::AnalysisResult;

/// Output format of a history export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Comma-separated values with a header row
    #[default]
    Csv,
    /// One JSON result per line
    JsonLines,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::JsonLines => "jsonl",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "jsonl" | "json_lines" | "ndjson" => Ok(Self::JsonLines),
            _ => Err(format!("unknown export format: {s}. Expected csv or jsonl")),
        }
    }
}

/// CSV header columns, in the same vocabulary as the result wire keys.
pub const CSV_HEADER: [&str; 14] = [
    "Timestamp",
    "Device ID",
    "Espécie",
    "Confiança %",
    "Status",
    "I1_NDVI",
    "I2_Water",
    "I3_Lipid",
    "I4_Slope_Alt",
    "SVM Score",
    "SVM Anomalia",
    "MAD Violações",
    "MAD Anomalia",
    "Confiança Baixa",
];

/// Suggested download name, e.g. `analise_graos_20250101_120000.csv`.
#[must_use]
pub fn export_file_name(format: ExportFormat, at: DateTime<Utc>) -> String {
    format!(
        "analise_graos_{}.{}",
        at.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// Render results (given oldest first) in the requested format.
pub fn render(results: &[AnalysisResult], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Csv => render_csv(results),
        ExportFormat::JsonLines => render_jsonl(results),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn render_csv(results: &[AnalysisResult]) -> Result<String> {
    let mut output = CSV_HEADER.join(",");
    output.push('\n');

    for result in results {
        let fields = [
            result.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            result.device_id.clone(),
            result.species.clone(),
            result.confidence.to_string(),
            result.status.to_string(),
            result.indices.ndvi.to_string(),
            result.indices.water.to_string(),
            result.indices.lipid.to_string(),
            result.indices.slope_alt.to_string(),
            result.anomaly.detector_score.to_string(),
            result.anomaly.detector_flagged.to_string(),
            result.anomaly.mad_violations.to_string(),
            result.anomaly.mad_flagged.to_string(),
            result.anomaly.low_confidence.to_string(),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        writeln!(output, "{}", line.join(",")).map_err(|e| Error::Runtime(e.to_string()))?;
    }
    Ok(output)
}

fn render_jsonl(results: &[AnalysisResult]) -> Result<String> {
    let mut output = String::new();
    for result in results {
        output.push_str(&serde_json::to_string(result)?);
        output.push('\n');
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{AnomalyDetails, Status};
    use crate::spectrum::SpectralIndices;
    use chrono::TimeZone;

    fn sample(device_id: &str, status: Status) -> AnalysisResult {
        AnalysisResult {
            species: "milho".to_string(),
            confidence: 87.3,
            status,
            probabilities: [("milho".to_string(), 87.3), ("soja".to_string(), 12.7)]
                .into_iter()
                .collect(),
            indices: SpectralIndices {
                ndvi: 0.1234,
                water: 1.05,
                lipid: 2.5,
                slope_alt: -0.0012,
            },
            anomaly: AnomalyDetails {
                detector_score: -0.0421,
                detector_flagged: true,
                mad_violations: 2,
                mad_flagged: true,
                low_confidence: false,
                decision_rule: "AND + alerta confiança < 60%".to_string(),
            },
            device_id: device_id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap(),
        }
    }

    #[test]
    fn csv_has_header_and_one_row_per_result() {
        let csv = render(
            &[sample("esp32-a", Status::Anomalous), sample("esp32-b", Status::Normal)],
            ExportFormat::Csv,
        )
        .unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].split(',').count(), 14);
        assert!(lines[0].starts_with("Timestamp,Device ID,Espécie,Confiança %"));
        assert!(lines[0].ends_with("MAD Anomalia,Confiança Baixa"));
        assert_eq!(
            lines[1],
            "2025-03-14T09:26:53.000Z,esp32-a,milho,87.3,ANORMAL,0.1234,1.05,2.5,-0.0012,-0.0421,true,2,true,false"
        );
        assert!(lines[2].contains(",NORMAL,"));
    }

    #[test]
    fn csv_quotes_awkward_fields() {
        let csv = render(&[sample("lab,\"bench\"", Status::Normal)], ExportFormat::Csv).unwrap();
        assert!(csv.contains(",\"lab,\"\"bench\"\"\",milho,"), "{csv}");
    }

    #[test]
    fn empty_history_is_header_only() {
        let csv = render(&[], ExportFormat::Csv).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert!(render(&[], ExportFormat::JsonLines).unwrap().is_empty());
    }

    #[test]
    fn jsonl_uses_wire_keys() {
        let out = render(&[sample("esp32-a", Status::Anomalous)], ExportFormat::JsonLines).unwrap();
        let line = out.lines().next().unwrap();
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["especie"], "milho");
        assert_eq!(value["status"], "ANORMAL");
        assert_eq!(value["detalhes_anomalia"]["mad_violacoes"], 2);
        assert_eq!(value["indices"]["I3_Lipid"], 2.5);
    }

    #[test]
    fn file_name_embeds_timestamp() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            export_file_name(ExportFormat::Csv, at),
            "analise_graos_20250102_030405.csv"
        );
        assert_eq!(
            export_file_name(ExportFormat::JsonLines, at),
            "analise_graos_20250102_030405.jsonl"
        );
    }

    #[test]
    fn format_parses_aliases() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("ndjson".parse::<ExportFormat>().unwrap(), ExportFormat::JsonLines);
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }
}
