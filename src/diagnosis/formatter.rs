//! # Report Formatter
//!
//! Reshapes the diagnostic engine's raw JSON into the public report schema.
//! This is a pure function: no I/O, no clock, no hidden state. The analysis date
//! and the published URL are handed in by the orchestrator.
//!
//! ## Strictness:
//! Every field is read from a fixed key path. A missing key, or a key holding the
//! wrong JSON type, is a broken contract with the engine and fails the whole
//! report with `SchemaMismatch`; nothing is defaulted.

use crate::error::{AppError, AppResult};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

/// Labels the classifier scores, in the order they appear in the report.
pub const CONDITION_LABELS: [&str; 3] = ["Healthy", "Laryngitis", "Vocal Polyp"];

/// The public response body for `/process_audio`.
///
/// Field order matches the published schema, so serialization is stable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedReport {
    #[serde(rename = "Acoustic Features")]
    pub acoustic_features: AcousticFeatures,
    #[serde(rename = "Analysis Date")]
    pub analysis_date: String,
    #[serde(rename = "Confidence Scores")]
    pub confidence_scores: ConfidenceScores,
    #[serde(rename = "Findings")]
    pub findings: Value,
    #[serde(rename = "PDF_URL")]
    pub pdf_url: String,
    #[serde(rename = "Prediction")]
    pub prediction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcousticFeatures {
    #[serde(rename = "Jitter_Percent")]
    pub jitter_percent: f64,
    /// Scalar or per-coefficient array, whatever the engine emits
    #[serde(rename = "MFCC_Mean")]
    pub mfcc_mean: Value,
    #[serde(rename = "MFCC_Std")]
    pub mfcc_std: Value,
    #[serde(rename = "Shimmer_Percent")]
    pub shimmer_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceScores {
    #[serde(rename = "Healthy")]
    pub healthy: f64,
    #[serde(rename = "Laryngitis")]
    pub laryngitis: f64,
    #[serde(rename = "Vocal Polyp")]
    pub vocal_polyp: f64,
}

/// Build the public report from the engine output.
pub fn format_report(raw: &Value, pdf_url: &str, analysis_date: NaiveDate) -> AppResult<FormattedReport> {
    let [healthy, laryngitis, vocal_polyp] = CONDITION_LABELS;
    let score = |label: &str| number_at(raw, &["diagnosis", "confidence_scores", label]);

    Ok(FormattedReport {
        acoustic_features: AcousticFeatures {
            jitter_percent: number_at(raw, &["acoustic_analysis", "voice_perturbation", "jitter", "value"])?,
            mfcc_mean: value_at(raw, &["mfcc_features", "mean"])?.clone(),
            mfcc_std: value_at(raw, &["mfcc_features", "std"])?.clone(),
            shimmer_percent: number_at(raw, &["acoustic_analysis", "voice_perturbation", "shimmer", "value"])?,
        },
        analysis_date: analysis_date.format("%Y-%m-%d").to_string(),
        confidence_scores: ConfidenceScores {
            healthy: score(healthy)?,
            laryngitis: score(laryngitis)?,
            vocal_polyp: score(vocal_polyp)?,
        },
        findings: value_at(raw, &["detailed_report"])?.clone(),
        pdf_url: pdf_url.to_string(),
        prediction: string_at(raw, &["diagnosis", "predicted_condition"])?,
    })
}

fn value_at<'a>(raw: &'a Value, path: &[&str]) -> AppResult<&'a Value> {
    path.iter()
        .try_fold(raw, |node, key| node.get(*key))
        .ok_or_else(|| AppError::SchemaMismatch {
            path: path.join("."),
            expected: None,
        })
}

fn number_at(raw: &Value, path: &[&str]) -> AppResult<f64> {
    value_at(raw, path)?
        .as_f64()
        .ok_or_else(|| AppError::SchemaMismatch {
            path: path.join("."),
            expected: Some("number"),
        })
}

fn string_at(raw: &Value, path: &[&str]) -> AppResult<String> {
    value_at(raw, path)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::SchemaMismatch {
            path: path.join("."),
            expected: Some("string"),
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Engine output shaped like the report generator's JSON dump.
    pub(crate) fn sample_engine_output() -> Value {
        json!({
            "patient_info": {"analysis_date": "2025-01-01"},
            "acoustic_analysis": {
                "voice_perturbation": {
                    "jitter": {"value": 0.82, "unit": "%", "normal_range": "< 1.04"},
                    "shimmer": {"value": 3.41, "unit": "%", "normal_range": "< 3.81"}
                }
            },
            "mfcc_features": {"mean": -12.5, "std": 48.25},
            "diagnosis": {
                "predicted_condition": "Laryngitis",
                "confidence_scores": {"Healthy": 0.1, "Laryngitis": 0.7, "Vocal Polyp": 0.25}
            },
            "detailed_report": "Elevated shimmer with mild hoarseness."
        })
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    #[test]
    fn test_maps_every_field() {
        let report = format_report(&sample_engine_output(), "https://cdn.example/r.pdf", date()).unwrap();

        assert_eq!(report.acoustic_features.jitter_percent, 0.82);
        assert_eq!(report.acoustic_features.shimmer_percent, 3.41);
        assert_eq!(report.acoustic_features.mfcc_mean, json!(-12.5));
        assert_eq!(report.acoustic_features.mfcc_std, json!(48.25));
        assert_eq!(report.analysis_date, "2025-03-14");
        assert_eq!(report.findings, json!("Elevated shimmer with mild hoarseness."));
        assert_eq!(report.pdf_url, "https://cdn.example/r.pdf");
        assert_eq!(report.prediction, "Laryngitis");
    }

    #[test]
    fn test_serialized_keys_match_schema() {
        let report = format_report(&sample_engine_output(), "https://cdn.example/r.pdf", date()).unwrap();
        let value = serde_json::to_value(&report).unwrap();

        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(
            keys,
            ["Acoustic Features", "Analysis Date", "Confidence Scores", "Findings", "PDF_URL", "Prediction"]
        );
        assert_eq!(value["Acoustic Features"]["Jitter_Percent"], json!(0.82));
        assert_eq!(value["Confidence Scores"]["Vocal Polyp"], json!(0.25));
    }

    #[test]
    fn test_confidence_scores_not_renormalized() {
        // Raw scores sum to 1.05 on purpose
        let report = format_report(&sample_engine_output(), "u", date()).unwrap();
        let scores = &report.confidence_scores;
        let sum = scores.healthy + scores.laryngitis + scores.vocal_polyp;
        assert!((sum - 1.05).abs() < 1e-12);
        assert_eq!(scores.laryngitis, 0.7);
    }

    #[test]
    fn test_repeated_calls_are_byte_identical() {
        let raw = sample_engine_output();
        let first = serde_json::to_vec(&format_report(&raw, "u", date()).unwrap()).unwrap();
        let second = serde_json::to_vec(&format_report(&raw, "u", date()).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_key_is_schema_mismatch() {
        let mut raw = sample_engine_output();
        raw["diagnosis"]["confidence_scores"]
            .as_object_mut()
            .unwrap()
            .remove("Vocal Polyp");

        let err = format_report(&raw, "u", date()).unwrap_err();
        assert!(
            matches!(err, AppError::SchemaMismatch { ref path, expected: None } if path == "diagnosis.confidence_scores.Vocal Polyp")
        );
    }

    #[test]
    fn test_wrong_type_is_schema_mismatch() {
        let mut raw = sample_engine_output();
        raw["acoustic_analysis"]["voice_perturbation"]["jitter"]["value"] = json!("0.82");

        let err = format_report(&raw, "u", date()).unwrap_err();
        assert!(matches!(
            err,
            AppError::SchemaMismatch { ref path, expected: Some("number") }
                if path == "acoustic_analysis.voice_perturbation.jitter.value"
        ));
        assert_eq!(
            err.to_string(),
            "Error processing audio: diagnostic output has an unexpected value at \
             `acoustic_analysis.voice_perturbation.jitter.value` (expected a number)"
        );
    }

    #[test]
    fn test_missing_key_message_says_missing() {
        let mut raw = sample_engine_output();
        raw.as_object_mut().unwrap().remove("detailed_report");

        let err = format_report(&raw, "u", date()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error processing audio: diagnostic output is missing `detailed_report`"
        );
    }

    #[test]
    fn test_structured_findings_copied_verbatim() {
        let mut raw = sample_engine_output();
        raw["detailed_report"] = json!({"summary": "ok", "recommendations": ["rest", "hydrate"]});

        let report = format_report(&raw, "u", date()).unwrap();
        assert_eq!(report.findings["recommendations"][1], "hydrate");
    }
}
