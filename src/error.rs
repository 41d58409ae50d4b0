//! Error handling for the gateway.
//!
//! Every failure below the security filter is resolved into one of the
//! [`GatewayError`] variants, and every variant has a defined response. None
//! of them carries detail into the response body.

use axum::response::{IntoResponse, Response};
use http::StatusCode;

use crate::authorization::RuleEvaluationError;
use crate::session_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed matcher configuration; only raised while building the rule table.
    #[error("route rules are invalid: {0}")]
    RuleEvaluation(#[from] RuleEvaluationError),
    #[error("request path is not canonical")]
    RejectedPath,
    #[error("request requires an authenticated session")]
    AuthorizationDenied,
    #[error("authorization code flow failed: {0}")]
    OidcExchangeFailure(String),
    #[error("missing or mismatched CSRF token")]
    CsrfValidationFailure,
    #[error("session store is unavailable: {0}")]
    SessionStoreUnavailable(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RuleEvaluation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::RejectedPath => StatusCode::BAD_REQUEST,
            GatewayError::AuthorizationDenied
            | GatewayError::OidcExchangeFailure(_)
            | GatewayError::SessionStoreUnavailable(_) => StatusCode::UNAUTHORIZED,
            GatewayError::CsrfValidationFailure => StatusCode::FORBIDDEN,
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::SessionStoreUnavailable(err.to_string())
    }
}

impl From<tower_sessions::session::Error> for GatewayError {
    fn from(err: tower_sessions::session::Error) -> Self {
        GatewayError::SessionStoreUnavailable(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.status().into_response()
    }
}
