//! Upstream artifact contract checks.
//!
//! A validator that reads someone else's artifact checks its provenance
//! before computing anything, so a mismatched input yields a FAILED report
//! instead of a plausible-looking PASSED one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ferrumyx_common::config::LabelConfig;
use ferrumyx_common::error::{FerrumyxError, Result};

/// What a validator expects from the artifact it consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactContract {
    /// Required `provenance.type`
    pub artifact_type: Option<String>,
    /// Required number of patient records in the artifact
    pub n_cases: Option<usize>,
}

fn declared_count(provenance: &Map<String, Value>) -> Option<(&'static str, u64)> {
    ["n_cases", "n_patients"]
        .into_iter()
        .find_map(|key| provenance.get(key).and_then(Value::as_u64).map(|n| (key, n)))
}

fn declared_positive_class(provenance: &Map<String, Value>) -> Vec<String> {
    match provenance.get("positive_class") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

/// Compare an artifact's provenance against `contract` and the configured
/// label scheme. `record_count` counts every patient record in the artifact,
/// skipped ones included. Returns one message per violation.
pub fn check_contract(
    contract: &ArtifactContract,
    provenance: &Map<String, Value>,
    record_count: usize,
    labels: &LabelConfig,
) -> Vec<String> {
    let mut failures = Vec::new();

    if let Some(expected) = &contract.artifact_type {
        match provenance.get("type").and_then(Value::as_str) {
            Some(found) if found == expected => {}
            Some(found) => failures.push(format!("artifact type '{found}' does not match expected '{expected}'")),
            None => failures.push(format!("artifact carries no provenance type, expected '{expected}'")),
        }
    }

    if let Some(expected) = contract.n_cases {
        if record_count != expected {
            failures.push(format!("artifact holds {record_count} patient records, expected {expected}"));
        }
    }

    if let Some((key, declared)) = declared_count(provenance) {
        if declared != record_count as u64 {
            failures.push(format!(
                "provenance declares {key} = {declared} but artifact holds {record_count} patient records"
            ));
        }
    }

    for label in declared_positive_class(provenance) {
        if labels.classify(&label) != Some(true) {
            failures.push(format!(
                "artifact positive class '{label}' is not positive under labels [{}]",
                labels.positive.join(", ")
            ));
        }
    }

    if !failures.is_empty() {
        tracing::warn!(violations = failures.len(), "Artifact contract check failed");
    }
    failures
}

/// Turn collected violations into a [`FerrumyxError::GuardrailViolation`].
pub fn enforce(failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(FerrumyxError::GuardrailViolation(failures))
    }
}
