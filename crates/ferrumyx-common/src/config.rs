//! Engine configuration for the validation runs.
//!
//! Every component receives the section it needs as an explicit value; there
//! is no process-wide configuration state. Files may be TOML, YAML or JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cohort::BiomarkerField;
use crate::error::{FerrumyxError, Result};

/// Environment variable consulted by [`EngineConfig::load`] when no path is given.
pub const CONFIG_ENV_VAR: &str = "FERRUMYX_VALIDATE_CONFIG";

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub labels: LabelConfig,

    #[serde(default)]
    pub ranking: RankingConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub tiers: TierConfig,

    #[serde(default)]
    pub missingness: MissingnessConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub validation: ValidationConfig,
}

// ── Outcome labels ───────────────────────────────────────────────────────────

/// Which outcome labels count as the positive and negative class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default = "default_positive_labels")]
    pub positive: Vec<String>,

    #[serde(default = "default_negative_labels")]
    pub negative: Vec<String>,
}

fn default_positive_labels() -> Vec<String> { vec!["resistant".to_string(), "refractory".to_string()] }
fn default_negative_labels() -> Vec<String> { vec!["sensitive".to_string()] }

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            positive: default_positive_labels(),
            negative: default_negative_labels(),
        }
    }
}

impl LabelConfig {
    /// Map a raw outcome string to the binary label.
    /// Labels outside the vocabulary return `None` and are excluded upstream.
    pub fn classify(&self, raw: &str) -> Option<bool> {
        let label = raw.trim();
        if self.positive.iter().any(|p| p.eq_ignore_ascii_case(label)) {
            Some(true)
        } else if self.negative.iter().any(|n| n.eq_ignore_ascii_case(label)) {
            Some(false)
        } else {
            None
        }
    }
}

// ── Rank statistics ──────────────────────────────────────────────────────────

/// How tied scores are ranked inside the Mann–Whitney formulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieConvention {
    /// Tied scores share the average of the ranks they span.
    #[default]
    Midrank,
    /// Tied scores keep their positional order (positives before negatives).
    /// Reproduces reports produced with the double-argsort ranking.
    Ordinal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default)]
    pub tie_convention: TieConvention,
}

// ── Aggregation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// k for the `top_k_mean` policy
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Number of features kept in the reduced set
    #[serde(default = "default_reduced_k")]
    pub reduced_k: usize,

    /// Maximum |full − reduced| AUROC gap for recommending the reduced set
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Policy producing the reference composite score
    #[serde(default = "default_reference_policy")]
    pub reference_policy: String,
}

fn default_top_k() -> usize { 3 }
fn default_reduced_k() -> usize { 10 }
fn default_tolerance() -> f64 { 0.02 }
fn default_reference_policy() -> String { "max_of_max".to_string() }

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            reduced_k: default_reduced_k(),
            tolerance: default_tolerance(),
            reference_policy: default_reference_policy(),
        }
    }
}

// ── Confidence tiers ─────────────────────────────────────────────────────────

/// How a multi-field group decides that it is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPresence {
    /// Every field must be present.
    All,
    /// One present field is enough.
    Any,
}

/// A named set of fields that is judged present or missing as one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierGroup {
    pub name: String,
    pub fields: Vec<BiomarkerField>,
    #[serde(default = "default_presence")]
    pub presence: GroupPresence,
}

fn default_presence() -> GroupPresence { GroupPresence::All }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    #[serde(default = "default_tier_groups")]
    pub groups: Vec<TierGroup>,

    /// String values treated as missing (case-insensitive)
    #[serde(default = "default_missing_sentinels")]
    pub missing_sentinels: Vec<String>,

    /// Ceiling applied to L1 scores by the default cap
    #[serde(default = "default_l1_ceiling")]
    pub l1_ceiling: f64,
}

fn default_tier_groups() -> Vec<TierGroup> {
    vec![
        TierGroup {
            name: "tmb".to_string(),
            fields: vec![BiomarkerField::Tmb],
            presence: GroupPresence::All,
        },
        TierGroup {
            name: "msi".to_string(),
            fields: vec![
                BiomarkerField::MsiScoreMantis,
                BiomarkerField::MsiSensorScore,
                BiomarkerField::MsiStatus,
            ],
            presence: GroupPresence::All,
        },
        TierGroup {
            name: "hrd".to_string(),
            fields: vec![
                BiomarkerField::AneuploidyScore,
                BiomarkerField::FractionGenomeAltered,
            ],
            presence: GroupPresence::All,
        },
    ]
}

fn default_missing_sentinels() -> Vec<String> {
    vec!["Unknown".to_string(), "NA".to_string(), "N/A".to_string(), String::new()]
}

fn default_l1_ceiling() -> f64 { 0.6 }

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            groups: default_tier_groups(),
            missing_sentinels: default_missing_sentinels(),
            l1_ceiling: default_l1_ceiling(),
        }
    }
}

// ── Missingness simulation ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingnessConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_drop_probability")]
    pub p_tmb: f64,

    #[serde(default = "default_drop_probability")]
    pub p_msi: f64,

    #[serde(default = "default_drop_probability")]
    pub p_hrd: f64,
}

fn default_seed() -> u64 { 42 }
fn default_drop_probability() -> f64 { 0.25 }

impl Default for MissingnessConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            p_tmb: default_drop_probability(),
            p_msi: default_drop_probability(),
            p_hrd: default_drop_probability(),
        }
    }
}

// ── Bootstrap ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_replicates")]
    pub replicates: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_replicates() -> usize { 2000 }

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            replicates: default_replicates(),
            seed: default_seed(),
        }
    }
}

// ── Validation thresholds ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Minimum labeled patients before any metric is computed
    #[serde(default = "default_min_labeled")]
    pub min_labeled: usize,

    /// Partitions smaller than this are flagged as unreliable
    #[serde(default = "default_min_partition_size")]
    pub min_partition_size: usize,
}

fn default_min_labeled() -> usize { 10 }
fn default_min_partition_size() -> usize { 10 }

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_labeled: default_min_labeled(),
            min_partition_size: default_min_partition_size(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────────────────

impl EngineConfig {
    /// Load from an explicit path, else from `FERRUMYX_VALIDATE_CONFIG`,
    /// else fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let env_path = std::env::var(CONFIG_ENV_VAR).ok();
        let path = match (path, env_path.as_deref()) {
            (Some(p), _) => p.to_path_buf(),
            (None, Some(p)) => Path::new(p).to_path_buf(),
            (None, None) => {
                tracing::debug!("No engine config given, using defaults");
                return Ok(Self::default());
            }
        };

        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        config.validate()?;
        tracing::info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.labels.positive.is_empty() || self.labels.negative.is_empty() {
            problems.push("labels.positive and labels.negative must both be non-empty".to_string());
        }
        if let Some(overlap) = self
            .labels
            .positive
            .iter()
            .find(|p| self.labels.negative.iter().any(|n| n.eq_ignore_ascii_case(p)))
        {
            problems.push(format!("label '{overlap}' is both positive and negative"));
        }
        if self.aggregation.top_k == 0 {
            problems.push("aggregation.top_k must be at least 1".to_string());
        }
        if self.aggregation.reduced_k == 0 {
            problems.push("aggregation.reduced_k must be at least 1".to_string());
        }
        if !(self.aggregation.tolerance >= 0.0) {
            problems.push("aggregation.tolerance must be non-negative".to_string());
        }
        if self.tiers.groups.is_empty() {
            problems.push("tiers.groups must list at least one group".to_string());
        }
        if let Some(g) = self.tiers.groups.iter().find(|g| g.fields.is_empty()) {
            problems.push(format!("tier group '{}' has no fields", g.name));
        }
        if !(0.0..=1.0).contains(&self.tiers.l1_ceiling) {
            problems.push("tiers.l1_ceiling must lie in [0, 1]".to_string());
        }
        for (name, p) in [
            ("missingness.p_tmb", self.missingness.p_tmb),
            ("missingness.p_msi", self.missingness.p_msi),
            ("missingness.p_hrd", self.missingness.p_hrd),
        ] {
            if !(0.0..=1.0).contains(&p) {
                problems.push(format!("{name} must lie in [0, 1], got {p}"));
            }
        }
        if self.bootstrap.replicates == 0 {
            problems.push("bootstrap.replicates must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(FerrumyxError::Config(problems.join("; ")))
        }
    }

    /// Save as YAML.
    pub fn to_yaml(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
