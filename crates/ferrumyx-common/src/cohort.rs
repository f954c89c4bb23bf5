//! Cohort data model and the validating load step.
//!
//! Raw cohort JSON is parsed exactly once here. Missing top-level keys are a
//! [`FerrumyxError::DataShape`]; individual malformed patient records are
//! skipped and counted so one bad row never aborts a batch.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

use crate::config::LabelConfig;
use crate::error::{FerrumyxError, Result};

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn id_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid patient id: {other}"))),
    }
}

// ---------------------------------------------------------------------------
// Biomarker values
// ---------------------------------------------------------------------------

/// A biomarker cell as it appears in the cohort: a number or a status string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BiomarkerValue {
    Number(f64),
    Text(String),
}

impl BiomarkerValue {
    pub fn unknown() -> Self {
        BiomarkerValue::Text("Unknown".to_string())
    }

    /// Numeric view; numeric strings are accepted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            BiomarkerValue::Number(v) if v.is_finite() => Some(*v),
            BiomarkerValue::Number(_) => None,
            BiomarkerValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    /// Present unless non-finite or one of the missing sentinels.
    pub fn is_present(&self, sentinels: &[String]) -> bool {
        match self {
            BiomarkerValue::Number(v) => v.is_finite(),
            BiomarkerValue::Text(s) => {
                let s = s.trim();
                !sentinels.iter().any(|m| m.trim().eq_ignore_ascii_case(s))
            }
        }
    }
}

/// Null-aware presence check used by tiering and the missingness simulator.
pub fn is_present(value: Option<&BiomarkerValue>, sentinels: &[String]) -> bool {
    value.is_some_and(|v| v.is_present(sentinels))
}

/// Biomarker fields that tiering and missingness simulation address by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiomarkerField {
    Tmb,
    MsiScoreMantis,
    MsiSensorScore,
    MsiStatus,
    AneuploidyScore,
    FractionGenomeAltered,
    HrdProxy,
}

impl BiomarkerField {
    pub const ALL: [BiomarkerField; 7] = [
        BiomarkerField::Tmb,
        BiomarkerField::MsiScoreMantis,
        BiomarkerField::MsiSensorScore,
        BiomarkerField::MsiStatus,
        BiomarkerField::AneuploidyScore,
        BiomarkerField::FractionGenomeAltered,
        BiomarkerField::HrdProxy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BiomarkerField::Tmb                   => "tmb",
            BiomarkerField::MsiScoreMantis        => "msi_score_mantis",
            BiomarkerField::MsiSensorScore        => "msi_sensor_score",
            BiomarkerField::MsiStatus             => "msi_status",
            BiomarkerField::AneuploidyScore       => "aneuploidy_score",
            BiomarkerField::FractionGenomeAltered => "fraction_genome_altered",
            BiomarkerField::HrdProxy              => "hrd_proxy",
        }
    }
}

// ---------------------------------------------------------------------------
// Variant / Patient / Cohort
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureValue {
    pub index: u32,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub top_features: Vec<FeatureValue>,

    /// Unrelated variant annotations, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    #[serde(deserialize_with = "id_string")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platinum_response: Option<String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub variants: Vec<Variant>,

    #[serde(default)]
    pub tmb: Option<BiomarkerValue>,
    #[serde(default)]
    pub msi_score_mantis: Option<BiomarkerValue>,
    #[serde(default)]
    pub msi_sensor_score: Option<BiomarkerValue>,
    #[serde(default)]
    pub msi_status: Option<BiomarkerValue>,
    #[serde(default)]
    pub aneuploidy_score: Option<BiomarkerValue>,
    #[serde(default)]
    pub fraction_genome_altered: Option<BiomarkerValue>,
    #[serde(default)]
    pub hrd_proxy: Option<BiomarkerValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Every other patient key, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Patient {
    /// Minimal patient with no biomarkers, used by builders and tests.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: None,
            platinum_response: None,
            variants: Vec::new(),
            tmb: None,
            msi_score_mantis: None,
            msi_sensor_score: None,
            msi_status: None,
            aneuploidy_score: None,
            fraction_genome_altered: None,
            hrd_proxy: None,
            stage: None,
            extra: Map::new(),
        }
    }

    /// `outcome` wins over `platinum_response` when both are set.
    pub fn outcome_label(&self) -> Option<&str> {
        self.outcome.as_deref().or(self.platinum_response.as_deref())
    }

    pub fn field(&self, field: BiomarkerField) -> Option<&BiomarkerValue> {
        match field {
            BiomarkerField::Tmb                   => self.tmb.as_ref(),
            BiomarkerField::MsiScoreMantis        => self.msi_score_mantis.as_ref(),
            BiomarkerField::MsiSensorScore        => self.msi_sensor_score.as_ref(),
            BiomarkerField::MsiStatus             => self.msi_status.as_ref(),
            BiomarkerField::AneuploidyScore       => self.aneuploidy_score.as_ref(),
            BiomarkerField::FractionGenomeAltered => self.fraction_genome_altered.as_ref(),
            BiomarkerField::HrdProxy              => self.hrd_proxy.as_ref(),
        }
    }

    pub fn set_field(&mut self, field: BiomarkerField, value: Option<BiomarkerValue>) {
        let slot = match field {
            BiomarkerField::Tmb                   => &mut self.tmb,
            BiomarkerField::MsiScoreMantis        => &mut self.msi_score_mantis,
            BiomarkerField::MsiSensorScore        => &mut self.msi_sensor_score,
            BiomarkerField::MsiStatus             => &mut self.msi_status,
            BiomarkerField::AneuploidyScore       => &mut self.aneuploidy_score,
            BiomarkerField::FractionGenomeAltered => &mut self.fraction_genome_altered,
            BiomarkerField::HrdProxy              => &mut self.hrd_proxy,
        };
        *slot = value;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    pub patients: Vec<Patient>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A patient with a binary outcome attached.
#[derive(Debug, Clone, Copy)]
pub struct LabeledPatient<'a> {
    pub patient: &'a Patient,
    pub positive: bool,
}

/// The labeled subset of a cohort plus the number of patients left out.
#[derive(Debug, Clone)]
pub struct LabeledCohort<'a> {
    pub patients: Vec<LabeledPatient<'a>>,
    pub unlabeled: usize,
}

impl<'a> LabeledCohort<'a> {
    pub fn labels(&self) -> Vec<bool> {
        self.patients.iter().map(|p| p.positive).collect()
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    pub fn n_pos(&self) -> usize {
        self.patients.iter().filter(|p| p.positive).count()
    }

    pub fn n_neg(&self) -> usize {
        self.len() - self.n_pos()
    }

    pub fn require_min(&self, required: usize) -> Result<()> {
        if self.len() < required {
            return Err(FerrumyxError::InsufficientLabels {
                required,
                found: self.len(),
            });
        }
        Ok(())
    }
}

impl Cohort {
    pub fn new(patients: Vec<Patient>) -> Self {
        Self { patients, extra: Map::new() }
    }

    /// Patients whose outcome is in the label vocabulary, in cohort order.
    pub fn labeled(&self, labels: &LabelConfig) -> LabeledCohort<'_> {
        let mut unlabeled = 0;
        let patients = self
            .patients
            .iter()
            .filter_map(|p| match p.outcome_label().and_then(|l| labels.classify(l)) {
                Some(positive) => Some(LabeledPatient { patient: p, positive }),
                None => {
                    unlabeled += 1;
                    None
                }
            })
            .collect();
        if unlabeled > 0 {
            tracing::debug!(unlabeled, "Patients excluded from labeled computations");
        }
        LabeledCohort { patients, unlabeled }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// A patient record that failed validation and was left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub position: usize,
    pub reason: String,
}

/// Result of the load step: trusted cohort, upstream provenance, skipped rows.
#[derive(Debug, Clone, Default)]
pub struct LoadedCohort {
    pub cohort: Cohort,
    pub provenance: Map<String, Value>,
    pub skipped: Vec<SkippedRecord>,
}

impl LoadedCohort {
    /// Serialise back to the `{cohort, provenance}` document shape.
    pub fn to_document(&self) -> Result<Value> {
        let mut doc = Map::new();
        doc.insert("cohort".to_string(), serde_json::to_value(&self.cohort)?);
        doc.insert("provenance".to_string(), Value::Object(self.provenance.clone()));
        Ok(Value::Object(doc))
    }
}

/// Parse a cohort document from a JSON string.
pub fn parse_cohort(json: &str) -> Result<LoadedCohort> {
    let root: Value = serde_json::from_str(json)?;
    let root = root
        .as_object()
        .ok_or_else(|| FerrumyxError::DataShape("cohort document must be a JSON object".to_string()))?;

    let cohort_obj = root
        .get("cohort")
        .and_then(Value::as_object)
        .ok_or_else(|| FerrumyxError::DataShape("missing required object 'cohort'".to_string()))?;

    let raw_patients = cohort_obj
        .get("patients")
        .and_then(Value::as_array)
        .ok_or_else(|| FerrumyxError::DataShape("missing required array 'cohort.patients'".to_string()))?;

    let provenance = match root.get("provenance") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(m)) => m.clone(),
        Some(_) => {
            return Err(FerrumyxError::DataShape("'provenance' must be an object".to_string()));
        }
    };

    let mut patients = Vec::with_capacity(raw_patients.len());
    let mut skipped = Vec::new();
    let mut seen = HashSet::new();

    for (position, raw) in raw_patients.iter().enumerate() {
        match serde_json::from_value::<Patient>(raw.clone()) {
            Ok(p) if !seen.insert(p.id.clone()) => skipped.push(SkippedRecord {
                position,
                reason: format!("duplicate patient id '{}'", p.id),
            }),
            Ok(p) => patients.push(p),
            Err(e) => skipped.push(SkippedRecord { position, reason: e.to_string() }),
        }
    }

    if !skipped.is_empty() {
        tracing::warn!(skipped = skipped.len(), "Skipped malformed patient records");
    }

    let mut extra = cohort_obj.clone();
    extra.remove("patients");

    tracing::info!(patients = patients.len(), "Cohort loaded");
    Ok(LoadedCohort {
        cohort: Cohort { patients, extra },
        provenance,
        skipped,
    })
}

/// Read and parse a cohort document from disk.
pub fn load_cohort(path: &Path) -> Result<LoadedCohort> {
    let content = std::fs::read_to_string(path)?;
    parse_cohort(&content)
}

// ---------------------------------------------------------------------------
// Signal definitions
// ---------------------------------------------------------------------------

/// A named set of feature indices (a "diamond").
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDefinition {
    pub name: String,
    features: Vec<u32>,
    index_set: HashSet<u32>,
}

impl SignalDefinition {
    /// Duplicate indices are dropped; first occurrence keeps its position.
    pub fn new(name: impl Into<String>, features: impl IntoIterator<Item = u32>) -> Self {
        let mut index_set = HashSet::new();
        let features = features.into_iter().filter(|f| index_set.insert(*f)).collect();
        Self { name: name.into(), features, index_set }
    }

    pub fn features(&self) -> &[u32] {
        &self.features
    }

    pub fn contains(&self, index: u32) -> bool {
        self.index_set.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let features: Vec<Value> = self
            .features
            .iter()
            .map(|f| serde_json::json!({ "feature_index": f }))
            .collect();
        serde_json::json!({ "name": self.name, "features": features })
    }
}

/// Parse `{"features": [{"feature_index": int}, ...]}`.
/// `fallback_name` is used when the document carries no `name`.
pub fn parse_signal(json: &str, fallback_name: &str) -> Result<SignalDefinition> {
    let root: Value = serde_json::from_str(json)?;
    let features = root
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| FerrumyxError::DataShape("missing required array 'features'".to_string()))?;

    let mut indices = Vec::with_capacity(features.len());
    for (i, entry) in features.iter().enumerate() {
        let index = entry
            .get("feature_index")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                FerrumyxError::DataShape(format!("features[{i}] lacks an integer 'feature_index'"))
            })?;
        indices.push(index);
    }

    let name = root
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(fallback_name);
    Ok(SignalDefinition::new(name, indices))
}

pub fn load_signal(path: &Path) -> Result<SignalDefinition> {
    let content = std::fs::read_to_string(path)?;
    let fallback = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("signal");
    parse_signal(&content, fallback)
}
