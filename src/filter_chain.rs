//! The per-request security pipeline.
//!
//! Every request is classified, authenticated when its route requires it,
//! checked for a CSRF token when its method changes state, forwarded, and
//! finally given the current CSRF cookie.

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::request::Parts;
use http::{HeaderMap, Method, Uri};
use std::fmt::{self, Debug};
use std::sync::Arc;
use tower_cookies::Cookies;
use tower_sessions::Session;
use tracing::{debug, error, warn};

use crate::authorization::{is_canonical_path, Decision, RouteRule, RuleEvaluationError, RuleTable};
use crate::authorized_client::{AuthorizedClient, UserInfo};
use crate::csrf::{requires_protection, supplied_token, CsrfTokenRepository, CSRF_COOKIE_NAME};
use crate::entry_point::{self, ClientKind};
use crate::error::GatewayError;
use crate::oidc::LoginOrchestrator;
use crate::utilities::{Utilities, AUTHENTICATED_REGISTRATION_KEY};

/// The resolved identity, attached to requests on protected routes.
#[derive(Clone)]
pub struct AuthenticatedPrincipal {
    pub name: String,
    pub registration_id: String,
    pub access_token: String,
    pub user: UserInfo,
}

impl From<AuthorizedClient> for AuthenticatedPrincipal {
    fn from(client: AuthorizedClient) -> Self {
        Self {
            name: client.principal_name,
            registration_id: client.registration_id,
            access_token: client.access_token.value,
            user: client.user,
        }
    }
}

impl Debug for AuthenticatedPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedPrincipal")
            .field("name", &self.name)
            .field("registration_id", &self.registration_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedPrincipal>()
            .cloned()
            .ok_or(GatewayError::AuthorizationDenied)
    }
}

/// Response extension set by handlers that destroyed the session.
#[derive(Clone, Copy, Debug)]
pub struct SessionInvalidated;

/// Rules for the gateway's own login and logout endpoints.
pub fn infrastructure_rules() -> Result<Vec<RouteRule>, RuleEvaluationError> {
    Ok(vec![
        RouteRule::public_for(Method::GET, "/oauth2/authorization/{registrationId}")?,
        RouteRule::public_for(Method::GET, "/login/oauth2/code/{registrationId}")?,
        RouteRule::public_for(Method::POST, "/logout")?,
    ])
}

#[derive(Clone)]
pub struct SecurityFilterChain {
    rules: Arc<RuleTable>,
    orchestrator: LoginOrchestrator,
    csrf: CsrfTokenRepository,
    trust_forwarded_headers: bool,
    app_url: Option<String>,
}

impl SecurityFilterChain {
    /// `public_routes` is evaluated after the infrastructure rules.
    pub fn new(
        public_routes: RuleTable,
        orchestrator: LoginOrchestrator,
        csrf: CsrfTokenRepository,
        trust_forwarded_headers: bool,
        app_url: Option<String>,
    ) -> Result<Self, RuleEvaluationError> {
        Ok(Self {
            rules: Arc::new(public_routes.preceded_by(infrastructure_rules()?)),
            orchestrator,
            csrf,
            trust_forwarded_headers,
            app_url,
        })
    }

    pub fn orchestrator(&self) -> &LoginOrchestrator {
        &self.orchestrator
    }

    pub fn classify(&self, method: &Method, path: &str) -> Decision {
        self.rules.evaluate(method, path)
    }

    pub fn base_url(&self, uri: &Uri, headers: &HeaderMap) -> Result<String, GatewayError> {
        Utilities::base_url(
            uri,
            headers,
            self.trust_forwarded_headers,
            self.app_url.as_deref(),
        )
        .ok_or(GatewayError::AuthorizationDenied)
    }

    async fn authenticate(
        &self,
        session: &Session,
    ) -> Result<Option<AuthenticatedPrincipal>, GatewayError> {
        let Some(registration_id) = session
            .get::<String>(AUTHENTICATED_REGISTRATION_KEY)
            .await?
        else {
            return Ok(None);
        };
        let Some(session_id) = session.id() else {
            return Ok(None);
        };

        let client = self
            .orchestrator
            .repository()
            .load(&session_id.to_string(), &registration_id)
            .await?;
        if client.is_none() {
            session
                .remove::<String>(AUTHENTICATED_REGISTRATION_KEY)
                .await?;
        }
        Ok(client.map(AuthenticatedPrincipal::from))
    }

    /// Login redirect for browsers, bare 401 for everything else.
    async fn commence(&self, session: &Session, request: Request) -> Result<Response, GatewayError> {
        if ClientKind::of(request.headers()) == ClientKind::Programmatic {
            return Ok(entry_point::unauthorized());
        }

        let base_url = self.base_url(request.uri(), request.headers())?;
        let saved_request = request
            .uri()
            .path_and_query()
            .map(|path_and_query| path_and_query.as_str())
            .unwrap_or("/");
        let location = self
            .orchestrator
            .begin(session, saved_request, &base_url)
            .await?;
        Ok(entry_point::redirect(&location))
    }

    async fn filter(
        &self,
        session: &Session,
        mut request: Request,
        next: Next,
    ) -> Result<Response, GatewayError> {
        if !is_canonical_path(request.uri().path()) {
            warn!(path = %request.uri().path(), "rejected non-canonical path");
            return Err(GatewayError::RejectedPath);
        }

        let decision = self.classify(request.method(), request.uri().path());
        debug!(method = %request.method(), path = %request.uri().path(), ?decision, "classified request");

        if decision == Decision::Authenticated {
            match self.authenticate(session).await? {
                Some(principal) => {
                    request.extensions_mut().insert(principal);
                }
                None => return self.commence(session, request).await,
            }
        }

        if requires_protection(request.method()) {
            let (checked, supplied) = supplied_token(request).await?;
            if !self.csrf.validate(session, supplied.as_deref()).await? {
                warn!(method = %checked.method(), path = %checked.uri().path(), "CSRF token missing or mismatched");
                return Err(GatewayError::CsrfValidationFailure);
            }
            request = checked;
        }

        Ok(next.run(request).await)
    }

    /// Hands the session's CSRF token to the client, once, right before the
    /// response leaves the gateway.
    async fn finalize(&self, session: &Session, cookies: &Cookies, response: Response) -> Response {
        let inbound = cookies
            .get(CSRF_COOKIE_NAME)
            .map(|cookie| cookie.value().to_string());

        if response.extensions().get::<SessionInvalidated>().is_some() {
            if inbound.is_some() {
                cookies.remove(self.csrf.expired_cookie());
            }
            return response;
        }

        match self.csrf.load_or_generate(session).await {
            Ok(token) if inbound.as_deref() != Some(token.token.as_str()) => {
                cookies.add(self.csrf.cookie(&token));
            }
            Ok(_) => {}
            Err(err) => error!("could not attach CSRF token: {}", err),
        }
        response
    }
}

impl Debug for SecurityFilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityFilterChain")
            .field("rules", &self.rules.len())
            .field("orchestrator", &self.orchestrator)
            .field("trust_forwarded_headers", &self.trust_forwarded_headers)
            .finish_non_exhaustive()
    }
}

/// Middleware entry point; see [`SecurityFilterChain`].
pub async fn security_filter(
    State(chain): State<SecurityFilterChain>,
    session: Session,
    cookies: Cookies,
    request: Request,
    next: Next,
) -> Response {
    let response = match chain.filter(&session, request, next).await {
        Ok(response) => response,
        Err(GatewayError::SessionStoreUnavailable(reason)) => {
            error!("session store unavailable: {}", reason);
            return GatewayError::SessionStoreUnavailable(reason).into_response();
        }
        Err(err) => err.into_response(),
    };
    chain.finalize(&session, &cookies, response).await
}
