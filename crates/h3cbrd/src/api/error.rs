//! Mapping of driver errors onto plugin protocol responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use h3cbr_common::{ErrorKind, NetError};
use h3cbr_driver::api::ErrorResponse;

use super::server::reply;

/// A driver error on its way back to the orchestrator.
#[derive(Debug)]
pub struct ApiError(pub NetError);

impl ApiError {
    /// HTTP status for the error kind.
    pub const fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::BadRequest | ErrorKind::InvalidEndpointConfig => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<NetError> for ApiError {
    fn from(err: NetError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(kind = %self.0.kind(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(kind = %self.0.kind(), error = %self.0, "Request rejected");
        }
        reply(
            status,
            &ErrorResponse {
                err: self.0.to_string(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_per_kind() {
        let cases = [
            (NetError::bad_request("x"), StatusCode::BAD_REQUEST),
            (
                NetError::InvalidEndpointConfig { field: "mac".into() },
                StatusCode::BAD_REQUEST,
            ),
            (
                NetError::NetworkNotFound { id: "n".into() },
                StatusCode::NOT_FOUND,
            ),
            (NetError::conflict("busy"), StatusCode::CONFLICT),
            (
                NetError::Internal {
                    message: "boom".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
