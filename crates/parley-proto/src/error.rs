use thiserror::Error;

/// Errors raised while decoding backend payloads.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
}
