use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Missing required filter: {0}")]
    MissingFilter(String),

    #[error("Report template not found: {0}")]
    TemplateNotFound(String),

    #[error("Report template is disabled: {0}")]
    TemplateDisabled(String),

    #[error("Period source returned no periods")]
    EmptyPeriodList,

    #[error("Ledger store error: {0}")]
    Ledger(String),

    #[error("Invalid account filter: {0}")]
    FilterExpression(String),

    #[error("Formula '{formula}' failed: {details}")]
    Formula { formula: String, details: String },

    #[error("Custom API endpoint '{endpoint}' failed: {details}")]
    CustomApi { endpoint: String, details: String },

    #[error("Report execution cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReportError>;
