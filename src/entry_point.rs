//! What an unauthenticated request to a protected route gets back.

use axum::response::{IntoResponse, Response};
use http::{header, HeaderMap, StatusCode};

use crate::error::GatewayError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientKind {
    /// A top-level navigation that can follow a login redirect.
    Browser,
    /// Script or API caller.
    Programmatic,
}

impl ClientKind {
    pub fn of(headers: &HeaderMap) -> Self {
        let value_of = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

        if value_of("x-requested-with")
            .is_some_and(|value| value.eq_ignore_ascii_case("XMLHttpRequest"))
        {
            return ClientKind::Programmatic;
        }
        if value_of("sec-fetch-mode").is_some_and(|value| value.eq_ignore_ascii_case("navigate")) {
            return ClientKind::Browser;
        }
        if value_of(header::ACCEPT.as_str()).is_some_and(|value| value.contains("text/html")) {
            return ClientKind::Browser;
        }
        ClientKind::Programmatic
    }
}

pub fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// 401 with an empty body, in place of a login redirect.
pub fn unauthorized() -> Response {
    GatewayError::AuthorizationDenied.into_response()
}
