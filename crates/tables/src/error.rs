use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use kyklos_core::StoreError;

/// Request-level failures, mapped onto the HTTP surface.
///
/// Everything here fails the request before body bytes are written;
/// failures that happen mid-stream travel through the response trailer
/// instead (see `stream`).
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("invalid filter mode '{mode}' for column '{column}'")]
    InvalidMode { column: String, mode: String },

    #[error("{0}")]
    ParamInvalid(String),

    #[error("cannot access table '{0}'")]
    UnknownEntity(String),

    #[error("database error: {0}")]
    Database(String),
}

impl Error {
    pub fn param(msg: impl Into<String>) -> Self {
        Error::ParamInvalid(msg.into())
    }

    /// Stable machine-readable kind, also used in trailers.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnknownColumn(_) => "UNKNOWN_COLUMN",
            Error::InvalidMode { .. } => "INVALID_MODE",
            Error::ParamInvalid(_) => "PARAM_INVALID",
            Error::UnknownEntity(_) => "RESOURCE_NOTFOUND",
            Error::Database(_) => "DATABASE",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::UnknownColumn(_) | Error::InvalidMode { .. } | Error::ParamInvalid(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::UnknownEntity(_) => StatusCode::NOT_FOUND,
            Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Compact `KIND: message` form for the `x-error` trailer.
    pub fn trailer_value(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

impl From<StoreError> for Error {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::UnknownTable(t) => Error::UnknownEntity(t),
            StoreError::UnknownColumn(c) => Error::UnknownColumn(c),
            other => Error::Database(other.to_string()),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({
            "status_code": status.as_u16(),
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_status() {
        assert_eq!(
            Error::UnknownColumn("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::UnknownEntity("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::Database("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn trailer_value_carries_kind_and_message() {
        let err = Error::param("invalid cursor value 'abc'");
        assert_eq!(err.trailer_value(), "PARAM_INVALID: invalid cursor value 'abc'");
    }
}
