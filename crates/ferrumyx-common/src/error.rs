use thiserror::Error;

#[derive(Debug, Error)]
pub enum FerrumyxError {
    /// Required keys absent from cohort or signal JSON. Fatal for the run.
    #[error("Data shape error: {0}")]
    DataShape(String),

    /// Too few usable labeled patients for the requested metric.
    #[error("Insufficient labels: need at least {required} labeled patients, found {found}")]
    InsufficientLabels { required: usize, found: usize },

    /// A computation that needs both outcome classes received only one.
    #[error("Degenerate class split: {0}")]
    DegenerateClass(String),

    /// An upstream artifact does not match the contract a validator expects.
    #[error("Guardrail violation: {}", .0.join("; "))]
    GuardrailViolation(Vec<String>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FerrumyxError>;
