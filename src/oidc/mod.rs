//! OpenID Connect client side: provider discovery, the authorization-code
//! grant, refresh, ID token validation and the login/logout orchestration.

pub mod discovery;
pub mod id_token;
pub mod login;
pub mod provider;
#[cfg(test)]
pub(crate) mod testing;

pub use discovery::{discover, DiscoveryError, ProviderMetadata};
pub use login::{AuthorizationCallback, LoginOrchestrator};
pub use provider::{
    AuthorizationRequest, ClientRegistration, IdentityProvider, OAuth2IdentityProvider, TokenSet,
};

#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    #[error("invalid provider endpoint: {0}")]
    Endpoint(String),
    #[error("token request failed: {0}")]
    TokenRequest(String),
    #[error("token response did not contain an ID token")]
    MissingIdToken,
    #[error("ID token rejected: {reason}")]
    IdToken { reason: String },
}

impl From<OidcError> for crate::error::GatewayError {
    fn from(err: OidcError) -> Self {
        crate::error::GatewayError::OidcExchangeFailure(err.to_string())
    }
}
