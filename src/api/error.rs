use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tracing::Span;

#[derive(ThisError, Debug)]
pub enum HttpError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl HttpError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

pub struct Error(anyhow::Error);

impl<E> From<E> for Error
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self.0.downcast_ref::<HttpError>() {
            Some(http_error) => (http_error.status_code(), http_error.to_string()),
            None => (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()),
        };
        Span::current().record("error", message.clone());
        let error_response = Json(ErrorResponse { error: message });
        (status, error_response).into_response()
    }
}
