//! Double-submit cookie CSRF protection.
//!
//! The token lives in the session. A copy is handed to the frontend through a
//! script-readable cookie and must come back in the `X-XSRF-TOKEN` header (or
//! the `_csrf` form field) on every state-changing request.

use axum::body::Body;
use axum::extract::Request;
use http::{header, Method};
use subtle::ConstantTimeEq;
use tower_cookies::cookie::SameSite;
use tower_cookies::Cookie;
use tower_sessions::Session;

use crate::error::GatewayError;
use crate::utilities::CSRF_TOKEN_KEY;

pub const CSRF_COOKIE_NAME: &str = "XSRF-TOKEN";
pub const CSRF_HEADER_NAME: &str = "X-XSRF-TOKEN";
pub const CSRF_PARAMETER_NAME: &str = "_csrf";

const MAX_FORM_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsrfToken {
    pub token: String,
    pub header_name: &'static str,
    pub parameter_name: &'static str,
    pub cookie_name: &'static str,
}

impl CsrfToken {
    fn new(token: String) -> Self {
        Self {
            token,
            header_name: CSRF_HEADER_NAME,
            parameter_name: CSRF_PARAMETER_NAME,
            cookie_name: CSRF_COOKIE_NAME,
        }
    }

    fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn matches(&self, supplied: &str) -> bool {
        self.token.as_bytes().ct_eq(supplied.as_bytes()).into()
    }
}

/// Safe methods never need a token.
pub fn requires_protection(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

#[derive(Clone, Debug)]
pub struct CsrfTokenRepository {
    secure_cookie: bool,
}

impl CsrfTokenRepository {
    pub fn new(secure_cookie: bool) -> Self {
        Self { secure_cookie }
    }

    pub async fn load(&self, session: &Session) -> Result<Option<CsrfToken>, GatewayError> {
        Ok(session
            .get::<String>(CSRF_TOKEN_KEY)
            .await?
            .map(CsrfToken::new))
    }

    /// Returns the session's token, creating one if the session has none yet.
    pub async fn load_or_generate(&self, session: &Session) -> Result<CsrfToken, GatewayError> {
        if let Some(token) = self.load(session).await? {
            return Ok(token);
        }
        let token = CsrfToken::generate();
        session.insert(CSRF_TOKEN_KEY, &token.token).await?;
        Ok(token)
    }

    pub async fn validate(
        &self,
        session: &Session,
        supplied: Option<&str>,
    ) -> Result<bool, GatewayError> {
        let (Some(expected), Some(supplied)) = (self.load(session).await?, supplied) else {
            return Ok(false);
        };
        Ok(expected.matches(supplied))
    }

    pub async fn remove(&self, session: &Session) -> Result<(), GatewayError> {
        session.remove::<String>(CSRF_TOKEN_KEY).await?;
        Ok(())
    }

    /// Not `HttpOnly`: the frontend reads it to echo the header.
    pub fn cookie(&self, token: &CsrfToken) -> Cookie<'static> {
        Cookie::build((token.cookie_name, token.token.clone()))
            .path("/")
            .http_only(false)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookie)
            .build()
    }

    pub fn expired_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build((CSRF_COOKIE_NAME, ""))
            .path("/")
            .http_only(false)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookie)
            .build();
        cookie.make_removal();
        cookie
    }
}

/// Reads the token the client sent, from the header or else from a
/// url-encoded form body. A consumed body is put back into the request.
pub async fn supplied_token(request: Request) -> Result<(Request, Option<String>), GatewayError> {
    if let Some(value) = request
        .headers()
        .get(CSRF_HEADER_NAME)
        .and_then(|value| value.to_str().ok())
    {
        let value = value.to_string();
        return Ok((request, Some(value)));
    }

    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    if !is_form {
        return Ok((request, None));
    }

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_FORM_BYTES)
        .await
        .map_err(|_| GatewayError::CsrfValidationFailure)?;
    let token = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&bytes)
        .ok()
        .and_then(|fields| {
            fields
                .into_iter()
                .find(|(name, _)| name == CSRF_PARAMETER_NAME)
                .map(|(_, value)| value)
        });

    Ok((Request::from_parts(parts, Body::from(bytes)), token))
}
