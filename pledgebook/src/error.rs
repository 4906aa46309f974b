use thiserror::Error;

#[derive(Error, Debug)]
pub enum PledgeError {
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Member not found: {id}")]
    NotFound { id: i64 },

    #[error("Payment not found: {member_id}/{payment_id}")]
    PaymentNotFound { member_id: i64, payment_id: String },

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("Record mapping error: {0}")]
    Mapping(String),

    #[error("Import failed at chunk {chunk}: {message}")]
    Import { chunk: usize, message: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PledgeError>;
