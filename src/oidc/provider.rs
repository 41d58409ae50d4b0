use async_trait::async_trait;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, ExtraTokenFields, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    Scope, StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::time::Duration;
use tracing::debug;

use super::discovery::ProviderMetadata;
use crate::config::Config;
use super::OidcError;

/// Token endpoint fields beyond RFC 6749 that an OIDC provider returns.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IdTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

type OidcTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

type OidcClient<
    HasAuthUrl = EndpointNotSet,
    HasDeviceAuthUrl = EndpointNotSet,
    HasIntrospectionUrl = EndpointNotSet,
    HasRevocationUrl = EndpointNotSet,
    HasTokenUrl = EndpointNotSet,
> = Client<
    BasicErrorResponse,
    OidcTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    HasAuthUrl,
    HasDeviceAuthUrl,
    HasIntrospectionUrl,
    HasRevocationUrl,
    HasTokenUrl,
>;

type ConfiguredClient =
    OidcClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// One OAuth2 client registered with one provider.
#[derive(Clone)]
pub struct ClientRegistration {
    pub registration_id: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
    /// Supports the `{baseUrl}` and `{registrationId}` placeholders.
    pub redirect_uri_template: String,
    pub provider: ProviderMetadata,
}

impl ClientRegistration {
    pub fn from_config(config: &Config, provider: ProviderMetadata) -> Self {
        Self {
            registration_id: config.registration_id.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes: config.scopes.clone(),
            redirect_uri_template: config.redirect_uri_template.clone(),
            provider,
        }
    }

    pub fn redirect_uri(&self, base_url: &str) -> String {
        self.redirect_uri_template
            .replace("{baseUrl}", base_url.trim_end_matches('/'))
            .replace("{registrationId}", &self.registration_id)
    }
}

impl Debug for ClientRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("registration_id", &self.registration_id)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("redirect_uri_template", &self.redirect_uri_template)
            .field("provider", &self.provider.issuer)
            .finish_non_exhaustive()
    }
}

/// Everything needed to send the browser to the provider and to validate
/// the callback that comes back.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
    pub authorization_uri: String,
    pub state: String,
    pub nonce: String,
    pub pkce_verifier: String,
}

#[derive(Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub expires_in: Option<Duration>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub scopes: Vec<String>,
}

impl Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl From<OidcTokenResponse> for TokenSet {
    fn from(response: OidcTokenResponse) -> Self {
        Self {
            access_token: response.access_token().secret().to_string(),
            expires_in: response.expires_in(),
            refresh_token: response
                .refresh_token()
                .map(|token| token.secret().to_string()),
            id_token: response.extra_fields().id_token.clone(),
            scopes: response
                .scopes()
                .map(|scopes| scopes.iter().map(|scope| (**scope).clone()).collect())
                .unwrap_or_default(),
        }
    }
}

/// The identity provider as the gateway consumes it.
#[async_trait]
pub trait IdentityProvider: Send + Sync + Debug {
    fn registration(&self) -> &ClientRegistration;

    fn authorization_request(&self, redirect_uri: &str) -> Result<AuthorizationRequest, OidcError>;

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, OidcError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, OidcError>;
}

#[derive(Clone, Debug)]
pub struct OAuth2IdentityProvider {
    registration: ClientRegistration,
    http_client: oauth2::reqwest::Client,
}

impl OAuth2IdentityProvider {
    pub fn new(registration: ClientRegistration) -> Result<Self, OidcError> {
        let http_client = oauth2::reqwest::ClientBuilder::new()
            // Following redirects from the token endpoint invites SSRF.
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| OidcError::Endpoint(err.to_string()))?;

        Ok(Self {
            registration,
            http_client,
        })
    }

    fn client(&self, redirect_uri: Option<&str>) -> Result<ConfiguredClient, OidcError> {
        let provider = &self.registration.provider;
        let mut client = OidcClient::new(ClientId::new(self.registration.client_id.clone()))
            .set_auth_uri(
                AuthUrl::new(provider.authorization_endpoint.clone())
                    .map_err(|err| OidcError::Endpoint(err.to_string()))?,
            )
            .set_token_uri(
                TokenUrl::new(provider.token_endpoint.clone())
                    .map_err(|err| OidcError::Endpoint(err.to_string()))?,
            );

        if let Some(secret) = &self.registration.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }
        if let Some(redirect_uri) = redirect_uri {
            client = client.set_redirect_uri(
                RedirectUrl::new(redirect_uri.to_string())
                    .map_err(|err| OidcError::Endpoint(err.to_string()))?,
            );
        }

        Ok(client)
    }
}

#[async_trait]
impl IdentityProvider for OAuth2IdentityProvider {
    fn registration(&self) -> &ClientRegistration {
        &self.registration
    }

    fn authorization_request(&self, redirect_uri: &str) -> Result<AuthorizationRequest, OidcError> {
        let client = self.client(Some(redirect_uri))?;

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let nonce = CsrfToken::new_random();

        let (auth_url, state) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.registration.scopes.iter().cloned().map(Scope::new))
            .add_extra_param("nonce", nonce.secret().clone())
            .set_pkce_challenge(pkce_challenge)
            .url();

        Ok(AuthorizationRequest {
            authorization_uri: auth_url.to_string(),
            state: state.secret().to_string(),
            nonce: nonce.secret().to_string(),
            pkce_verifier: pkce_verifier.secret().to_string(),
        })
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, OidcError> {
        let client = self.client(Some(redirect_uri))?;

        let response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(&self.http_client)
            .await
            .map_err(|err| OidcError::TokenRequest(err.to_string()))?;

        debug!(registration = %self.registration.registration_id, "authorization code exchanged");
        Ok(response.into())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, OidcError> {
        let client = self.client(None)?;
        let refresh_token = RefreshToken::new(refresh_token.to_string());

        let response = client
            .exchange_refresh_token(&refresh_token)
            .request_async(&self.http_client)
            .await
            .map_err(|err| OidcError::TokenRequest(err.to_string()))?;

        debug!(registration = %self.registration.registration_id, "access token refreshed");
        Ok(response.into())
    }
}
