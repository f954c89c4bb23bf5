//! Validator report artifacts: a JSON document plus a CSV sibling carrying the
//! same result rows.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ferrumyx_common::error::Result;
use ferrumyx_ranker::aggregation::{PolicyComparison, ReducedVsFull};

use crate::missingness::MissingnessProvenance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub validator: String,
    pub generated_at: DateTime<Utc>,
    pub engine_version: String,
    /// input name → path
    pub inputs: BTreeMap<String, String>,
    pub parameters: Value,
    pub seed: Option<u64>,
    pub skipped_records: usize,
    pub unlabeled: usize,
}

impl RunMeta {
    pub fn new(validator: impl Into<String>) -> Self {
        Self {
            validator: validator.into(),
            generated_at: Utc::now(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            inputs: BTreeMap::new(),
            parameters: Value::Null,
            seed: None,
            skipped_records: 0,
            unlabeled: 0,
        }
    }

    pub fn input(mut self, name: &str, path: &Path) -> Self {
        self.inputs.insert(name.to_string(), path.display().to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport<R> {
    pub run_meta: RunMeta,
    pub status: ReportStatus,
    pub failures: Vec<String>,
    pub results: Vec<R>,
    pub recommendation: Option<String>,
}

impl<R: Serialize> ValidationReport<R> {
    pub fn new(run_meta: RunMeta, results: Vec<R>) -> Self {
        Self {
            run_meta,
            status: ReportStatus::Passed,
            failures: Vec::new(),
            results,
            recommendation: None,
        }
    }

    /// A report with no results, already FAILED.
    pub fn failed(run_meta: RunMeta, failures: Vec<String>) -> Self {
        let mut report = Self::new(run_meta, Vec::new());
        for failure in failures {
            report.fail(failure);
        }
        report
    }

    /// Record a failure; any failure makes the report FAILED.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failures.push(reason.into());
        self.status = ReportStatus::Failed;
    }

    pub fn is_passed(&self) -> bool {
        self.status == ReportStatus::Passed
    }

    /// Write `path` (pretty JSON) and its `.csv` sibling, replacing any
    /// previous report. Returns the CSV path.
    pub fn write(&self, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;

        let csv_path = path.with_extension("csv");
        let mut writer = csv::Writer::from_path(&csv_path)?;
        for row in &self.results {
            writer.serialize(row)?;
        }
        writer.flush()?;

        tracing::info!(
            report = %path.display(),
            status = ?self.status,
            rows = self.results.len(),
            "Report written"
        );
        Ok(csv_path)
    }
}

// ── Flat CSV rows ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRow {
    pub rank: usize,
    pub policy: String,
    pub auroc: f64,
    pub n_labeled: usize,
    pub n_pos: usize,
    pub n_neg: usize,
}

impl PolicyRow {
    pub fn from_comparison(cmp: &PolicyComparison) -> Vec<Self> {
        cmp.results
            .iter()
            .map(|r| PolicyRow {
                rank: r.rank,
                policy: r.policy.clone(),
                auroc: r.auroc,
                n_labeled: cmp.n_labeled,
                n_pos: cmp.n_pos,
                n_neg: cmp.n_neg,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedVsFullRow {
    pub signal: String,
    pub reference_policy: String,
    pub full_features: usize,
    pub k: usize,
    /// `;`-joined feature indices
    pub reduced_features: String,
    pub full_auroc: f64,
    pub reduced_auroc: f64,
    pub delta: f64,
    pub tolerance: f64,
    pub recommendation: String,
}

impl From<&ReducedVsFull> for ReducedVsFullRow {
    fn from(r: &ReducedVsFull) -> Self {
        Self {
            signal: r.signal.clone(),
            reference_policy: r.reference_policy.clone(),
            full_features: r.full_features,
            k: r.k,
            reduced_features: r
                .reduced_features
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(";"),
            full_auroc: r.full_auroc,
            reduced_auroc: r.reduced_auroc,
            delta: r.delta,
            tolerance: r.tolerance,
            recommendation: r.recommendation.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingnessRow {
    pub group: String,
    pub probability: f64,
    pub patients_dropped: usize,
}

impl MissingnessRow {
    pub fn from_provenance(p: &MissingnessProvenance) -> Vec<Self> {
        vec![
            MissingnessRow {
                group: "tmb".to_string(),
                probability: p.probabilities.tmb,
                patients_dropped: p.dropped.tmb,
            },
            MissingnessRow {
                group: "msi".to_string(),
                probability: p.probabilities.msi,
                patients_dropped: p.dropped.msi,
            },
            MissingnessRow {
                group: "hrd".to_string(),
                probability: p.probabilities.hrd,
                patients_dropped: p.dropped.hrd,
            },
        ]
    }
}
