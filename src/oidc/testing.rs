//! Test doubles for the identity provider.

use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

use super::discovery::ProviderMetadata;
use super::provider::{AuthorizationRequest, ClientRegistration, IdentityProvider, TokenSet};
use super::OidcError;

pub(crate) const TEST_NONCE: &str = "test-nonce";

pub(crate) fn registration(issuer: &str) -> ClientRegistration {
    ClientRegistration {
        registration_id: "keycloak".to_string(),
        client_id: "edge-service".to_string(),
        client_secret: Some("polar-keycloak-secret".to_string()),
        scopes: vec!["openid".to_string(), "roles".to_string()],
        redirect_uri_template: "{baseUrl}/login/oauth2/code/{registrationId}".to_string(),
        provider: ProviderMetadata {
            issuer: issuer.to_string(),
            authorization_endpoint: format!("{issuer}/protocol/openid-connect/auth"),
            token_endpoint: format!("{issuer}/protocol/openid-connect/token"),
            end_session_endpoint: Some(format!("{issuer}/protocol/openid-connect/logout")),
            jwks_uri: None,
            userinfo_endpoint: None,
            revocation_endpoint: None,
            scopes_supported: None,
            code_challenge_methods_supported: None,
        },
    }
}

/// Mints an HS256-signed ID token; the gateway ignores the signature.
pub(crate) fn mint(
    registration: &ClientRegistration,
    subject: &str,
    nonce: Option<&str>,
    expires_in_secs: i64,
) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = serde_json::json!({
        "iss": registration.provider.issuer,
        "aud": registration.client_id,
        "sub": subject,
        "exp": now + expires_in_secs,
        "iat": now,
        "nonce": nonce,
        "preferred_username": subject,
        "given_name": "Isabelle",
        "family_name": "Dahl",
        "roles": ["employee", "customer"],
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test-only"),
    )
    .unwrap()
}

/// Provider stand-in: hands out numbered states, accepts every code except
/// `"bad"` and mints ID tokens carrying [`TEST_NONCE`].
#[derive(Debug)]
pub(crate) struct StubIdentityProvider {
    registration: ClientRegistration,
    subject: String,
    access_token_lifetime: Option<Duration>,
    refresh_delay: Duration,
    states_issued: AtomicUsize,
    refresh_calls: AtomicUsize,
    fail_refresh: AtomicBool,
}

impl StubIdentityProvider {
    pub(crate) fn new() -> Self {
        Self {
            registration: registration("https://idp.example.com/realms/polar"),
            subject: "isabelle".to_string(),
            access_token_lifetime: Some(Duration::from_secs(300)),
            refresh_delay: Duration::ZERO,
            states_issued: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            fail_refresh: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_access_token_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.access_token_lifetime = lifetime;
        self
    }

    pub(crate) fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub(crate) fn fail_refresh(&self) {
        self.fail_refresh.store(true, Ordering::SeqCst);
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn id_token(&self) -> String {
        mint(&self.registration, &self.subject, Some(TEST_NONCE), 300)
    }
}

#[async_trait]
impl IdentityProvider for StubIdentityProvider {
    fn registration(&self) -> &ClientRegistration {
        &self.registration
    }

    fn authorization_request(&self, redirect_uri: &str) -> Result<AuthorizationRequest, OidcError> {
        let state = format!(
            "state-{}",
            self.states_issued.fetch_add(1, Ordering::SeqCst) + 1
        );
        let authorization_uri = Url::parse_with_params(
            &self.registration.provider.authorization_endpoint,
            &[
                ("response_type", "code"),
                ("client_id", self.registration.client_id.as_str()),
                ("state", state.as_str()),
                ("nonce", TEST_NONCE),
                ("redirect_uri", redirect_uri),
            ],
        )
        .map_err(|err| OidcError::Endpoint(err.to_string()))?;

        Ok(AuthorizationRequest {
            authorization_uri: authorization_uri.to_string(),
            state,
            nonce: TEST_NONCE.to_string(),
            pkce_verifier: "test-verifier".to_string(),
        })
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        _redirect_uri: &str,
    ) -> Result<TokenSet, OidcError> {
        if code == "bad" || pkce_verifier != "test-verifier" {
            return Err(OidcError::TokenRequest("invalid_grant".to_string()));
        }

        Ok(TokenSet {
            access_token: format!("access-{code}"),
            expires_in: self.access_token_lifetime,
            refresh_token: Some("refresh-1".to_string()),
            id_token: Some(self.id_token()),
            scopes: self.registration.scopes.clone(),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, OidcError> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(OidcError::TokenRequest(format!(
                "{refresh_token} is no longer active"
            )));
        }

        Ok(TokenSet {
            access_token: format!("refreshed-{call}"),
            expires_in: Some(Duration::from_secs(300)),
            refresh_token: None,
            id_token: None,
            scopes: Vec::new(),
        })
    }
}
