use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no usable profile URLs to submit ({} invalid line(s) skipped)", .invalid.len())]
    ValidationEmpty { invalid: Vec<String> },
    #[error("could not reach the automation endpoint: {0}")]
    Connection(String),
    #[error("automation workflow did not answer within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("automation workflow returned HTTP {status}: {body}")]
    Server { status: u16, body: String },
    #[error("automation workflow returned a body that is not JSON: {reason}")]
    MalformedResponse { body: String, reason: String },
    #[error("unsupported response shape ({kind}): {raw}")]
    UnsupportedShape { kind: &'static str, raw: String },
    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(String),
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ValidationEmpty { .. } => "validation_empty",
            AppError::Connection(_) => "connection",
            AppError::Timeout { .. } => "timeout",
            AppError::Server { .. } => "server",
            AppError::MalformedResponse { .. } => "malformed_response",
            AppError::UnsupportedShape { .. } => "unsupported_shape",
            AppError::InvalidEndpoint(_) => "invalid_endpoint",
            AppError::InvalidBatch(_) => "invalid_batch",
            AppError::Io(_) => "io",
            AppError::Json(_) => "json",
            AppError::Csv(_) => "csv",
            AppError::Zip(_) => "zip",
            AppError::Http(_) => "http",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}
