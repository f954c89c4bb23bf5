//! ferrumyx-common — Shared types, errors, and configuration for the
//! biomarker validation crates.

pub mod error;
pub mod cohort;
pub mod confidence;
pub mod config;

// Re-export commonly used types
pub use cohort::{BiomarkerField, BiomarkerValue, Cohort, LoadedCohort, Patient, SignalDefinition, Variant};
pub use confidence::{ConfidenceTier, ScoreCap, TierCeilingCap};
pub use config::EngineConfig;
pub use error::{FerrumyxError, Result};
