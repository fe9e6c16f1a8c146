use serde::Deserialize;
use thiserror::Error as ThisError;

#[derive(Deserialize, Debug)]
pub struct RpcErrorResponse {
    pub code: i32,
    pub message: String,
}

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("Unexpected error: {0}")]
    Unexpected(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON serialization/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Node RPC error (code {code}): {message}")]
    Rpc { code: i32, message: String },
    #[error("Invalid header value error: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
}
