use custom_error::custom_error;
use serde::{Deserialize, Serialize};
use url::Url;

custom_error! {
    pub DiscoveryError
        IssuerUrl{source: url::ParseError} = "could not parse issuer url: {source}",
        DiscoveryDocument{source: reqwest::Error} = "could not discover OIDC document: {source}",
        IssuerMismatch{expected: String, actual: String} = "discovery document issuer {actual} does not match {expected}",
}

/// The subset of the provider's discovery document the gateway relies on.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Option<Vec<String>>,
    #[serde(default)]
    pub code_challenge_methods_supported: Option<Vec<String>>,
}

pub fn metadata_url(issuer: &str) -> Result<Url, DiscoveryError> {
    let issuer = issuer.trim_end_matches('/');
    Url::parse(&format!("{}/.well-known/openid-configuration", issuer))
        .map_err(|source| DiscoveryError::IssuerUrl { source })
}

pub async fn discover(
    issuer: &str,
    http_client: &reqwest::Client,
) -> Result<ProviderMetadata, DiscoveryError> {
    let metadata = http_client
        .get(metadata_url(issuer)?)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|source| DiscoveryError::DiscoveryDocument { source })?
        .json::<ProviderMetadata>()
        .await
        .map_err(|source| DiscoveryError::DiscoveryDocument { source })?;

    if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
        return Err(DiscoveryError::IssuerMismatch {
            expected: issuer.to_string(),
            actual: metadata.issuer,
        });
    }

    Ok(metadata)
}
