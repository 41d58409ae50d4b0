use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_sessions::Session;
use tracing::{debug, info, warn};
use url::Url;

use super::id_token::decode_id_token;
use super::{ClientRegistration, IdentityProvider, OidcError};
use crate::authorized_client::{AuthorizedClient, AuthorizedClientRepository, UserInfo};
use crate::error::GatewayError;
use crate::utilities::{AUTHENTICATED_REGISTRATION_KEY, PENDING_AUTHORIZATION_KEY};

/// Query parameters of the provider's redirect back to the gateway.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuthorizationCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// An authorization request that was sent out and not yet answered.
#[derive(Clone, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub registration_id: String,
    pub state: String,
    pub nonce: String,
    pub pkce_verifier: String,
    pub redirect_uri: String,
    pub saved_request: String,
}

impl Debug for PendingAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("registration_id", &self.registration_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("saved_request", &self.saved_request)
            .finish_non_exhaustive()
    }
}

fn denied(reason: &str) -> GatewayError {
    warn!("login rejected: {}", reason);
    GatewayError::OidcExchangeFailure(reason.to_string())
}

/// Only same-origin paths are replayed after login.
fn local_path(saved_request: &str) -> &str {
    if saved_request.starts_with('/') && !saved_request.starts_with("//") {
        saved_request
    } else {
        "/"
    }
}

/// Drives the authorization-code login and the RP-initiated logout.
#[derive(Clone)]
pub struct LoginOrchestrator {
    provider: Arc<dyn IdentityProvider>,
    repository: Arc<dyn AuthorizedClientRepository>,
}

impl LoginOrchestrator {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        repository: Arc<dyn AuthorizedClientRepository>,
    ) -> Self {
        Self {
            provider,
            repository,
        }
    }

    pub fn registration(&self) -> &ClientRegistration {
        self.provider.registration()
    }

    pub fn repository(&self) -> &Arc<dyn AuthorizedClientRepository> {
        &self.repository
    }

    /// Remembers a fresh authorization request in the session and returns
    /// the provider URL to redirect the browser to.
    pub async fn begin(
        &self,
        session: &Session,
        saved_request: &str,
        base_url: &str,
    ) -> Result<String, GatewayError> {
        let registration = self.registration();
        let redirect_uri = registration.redirect_uri(base_url);
        let request = self.provider.authorization_request(&redirect_uri)?;

        let pending = PendingAuthorization {
            registration_id: registration.registration_id.clone(),
            state: request.state,
            nonce: request.nonce,
            pkce_verifier: request.pkce_verifier,
            redirect_uri,
            saved_request: local_path(saved_request).to_string(),
        };
        session.insert(PENDING_AUTHORIZATION_KEY, &pending).await?;

        debug!(
            registration = %pending.registration_id,
            saved_request = %pending.saved_request,
            "redirecting to authorization endpoint"
        );
        Ok(request.authorization_uri)
    }

    /// Finishes the login started by [`begin`](Self::begin) and returns the
    /// path to send the browser back to.
    ///
    /// Nothing is stored unless the state matches, the code exchange succeeds
    /// and the ID token validates.
    pub async fn complete(
        &self,
        session: &Session,
        callback: AuthorizationCallback,
    ) -> Result<String, GatewayError> {
        let pending = session
            .remove::<PendingAuthorization>(PENDING_AUTHORIZATION_KEY)
            .await?;

        if let Some(error) = callback.error {
            return Err(denied(&format!("provider returned {}", error)));
        }
        let Some(pending) = pending else {
            return Err(denied("no authorization request in progress"));
        };
        let (Some(code), Some(state)) = (callback.code, callback.state) else {
            return Err(denied("callback is missing code or state"));
        };
        if !bool::from(state.as_bytes().ct_eq(pending.state.as_bytes())) {
            return Err(denied("state mismatch"));
        }

        let registration = self.registration();
        if pending.registration_id != registration.registration_id {
            return Err(denied("authorization request belongs to another registration"));
        }

        let tokens = self
            .provider
            .exchange_code(&code, &pending.pkce_verifier, &pending.redirect_uri)
            .await
            .map_err(|err| denied(&err.to_string()))?;
        let id_token = tokens.id_token.as_deref().ok_or(OidcError::MissingIdToken)?;
        let claims = decode_id_token(id_token, registration, Some(&pending.nonce))
            .map_err(|err| denied(&err.to_string()))?;

        let client = AuthorizedClient::from_tokens(
            &registration.registration_id,
            tokens,
            UserInfo::from(&claims),
            Utc::now(),
        );

        session.cycle_id().await?;
        session
            .insert(AUTHENTICATED_REGISTRATION_KEY, &registration.registration_id)
            .await?;
        session.save().await?;
        let Some(session_id) = session.id() else {
            return Err(GatewayError::SessionStoreUnavailable(
                "session was not persisted".to_string(),
            ));
        };

        self.repository
            .save(&session_id.to_string(), &client)
            .await?;

        info!(
            principal = %client.principal_name,
            registration = %client.registration_id,
            "login completed"
        );
        Ok(pending.saved_request)
    }

    /// Ends the local session and returns where to send the browser: the
    /// provider's end-session endpoint, or `base_url` when there is none.
    pub async fn logout(&self, session: &Session, base_url: &str) -> Result<String, GatewayError> {
        let registration = self.registration();

        let authenticated = session
            .get::<String>(AUTHENTICATED_REGISTRATION_KEY)
            .await?;
        let removed = match (authenticated, session.id()) {
            (Some(registration_id), Some(session_id)) => {
                self.repository
                    .remove(&session_id.to_string(), &registration_id)
                    .await?
            }
            _ => None,
        };
        session.flush().await?;

        let Some(removed) = removed else {
            debug!("logout without an authenticated session");
            return Ok(base_url.to_string());
        };
        info!(principal = %removed.principal_name, "logged out");

        let Some(end_session_endpoint) = registration.provider.end_session_endpoint.as_deref()
        else {
            return Ok(base_url.to_string());
        };
        let mut end_session_url = Url::parse(end_session_endpoint)
            .map_err(|err| OidcError::Endpoint(err.to_string()))?;
        {
            let mut query = end_session_url.query_pairs_mut();
            if let Some(id_token) = removed.id_token.as_deref() {
                query.append_pair("id_token_hint", id_token);
            }
            query.append_pair("client_id", &registration.client_id);
            query.append_pair("post_logout_redirect_uri", base_url);
        }
        Ok(end_session_url.to_string())
    }
}

impl Debug for LoginOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginOrchestrator")
            .field("registration", self.registration())
            .finish_non_exhaustive()
    }
}
