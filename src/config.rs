//! Configuration management for the gateway.
//!
//! This module centralizes all configuration settings and validates them once
//! at startup. Nothing here changes while the process runs.

use base64::Engine;
use std::fmt::{self, Debug};
use std::net::SocketAddr;
use std::time::Duration;

use crate::authorization::{RuleEvaluationError, RuleTable, DEFAULT_PUBLIC_ROUTES};

pub const DEFAULT_REGISTRATION_ID: &str = "keycloak";
pub const DEFAULT_REDIRECT_URI_TEMPLATE: &str = "{baseUrl}/login/oauth2/code/{registrationId}";
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9000";

/// Gateway configuration
#[derive(Clone)]
pub struct Config {
    /// The OIDC issuer, used for discovery
    pub auth_server_url: String,
    pub client_id: String,
    /// `None` for a public client
    pub client_secret: Option<String>,
    pub registration_id: String,
    /// Always contains `openid`
    pub scopes: Vec<String>,
    pub redirect_uri_template: String,
    /// The configured allow-list, in evaluation order
    pub public_routes: RuleTable,
    /// Base URL for requests that carry no host information
    pub app_url: Option<String>,
    pub trust_forwarded_headers: bool,
    pub session_timeout: Duration,
    /// Raw key material for the encrypted session cookie
    pub session_secret: Option<Vec<u8>>,
    pub redis_url: Option<String>,
    /// Where the downstream stage forwards requests to
    pub proxy_target: Option<String>,
    pub listen_addr: SocketAddr,
    /// Whether the gateway is running in development mode (no `Secure` cookies)
    pub dev_mode: bool,
}

impl Config {
    /// Create a new configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create a new configuration from an arbitrary variable source
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |name: &'static str| var(name).ok_or(ConfigError::MissingValue(name));
        let flag = |name: &'static str| match var(name) {
            None => Ok(false),
            Some(value) => parse_flag(&value).ok_or(ConfigError::InvalidValue(name)),
        };

        let auth_server_url = required("AUTH_SERVER_URL")?;
        url::Url::parse(&auth_server_url).map_err(|_| ConfigError::InvalidValue("AUTH_SERVER_URL"))?;

        let client_id = required("CLIENT_ID")?;
        let client_secret = var("CLIENT_SECRET");
        let registration_id =
            var("REGISTRATION_ID").unwrap_or_else(|| DEFAULT_REGISTRATION_ID.to_string());

        let mut scopes = vec!["openid".to_string()];
        for scope in var("OAUTH_SCOPES")
            .unwrap_or_else(|| "openid,roles".to_string())
            .split(',')
            .map(str::trim)
            .filter(|scope| !scope.is_empty())
        {
            if !scopes.iter().any(|known| known == scope) {
                scopes.push(scope.to_string());
            }
        }

        let redirect_uri_template = var("REDIRECT_URI_TEMPLATE")
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI_TEMPLATE.to_string());

        let public_routes = match var("PUBLIC_ROUTES") {
            Some(entries) => RuleTable::from_entries(
                &entries
                    .split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .collect::<Vec<_>>(),
            )?,
            None => RuleTable::from_entries(DEFAULT_PUBLIC_ROUTES)?,
        };

        let app_url = match var("APP_URL") {
            Some(app_url) => {
                url::Url::parse(&app_url).map_err(|_| ConfigError::InvalidValue("APP_URL"))?;
                Some(app_url.trim_end_matches('/').to_string())
            }
            None => None,
        };

        let session_timeout = match var("SESSION_TIMEOUT_SECS") {
            Some(secs) => secs
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or(ConfigError::InvalidValue("SESSION_TIMEOUT_SECS"))?,
            None => DEFAULT_SESSION_TIMEOUT,
        };

        let session_secret = match var("SESSION_SECRET") {
            Some(secret) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(secret)
                    .map_err(|_| ConfigError::InvalidValue("SESSION_SECRET"))?;
                if bytes.len() < 64 {
                    return Err(ConfigError::InvalidValue("SESSION_SECRET"));
                }
                Some(bytes)
            }
            None => None,
        };

        let listen_addr = var("LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("LISTEN_ADDR"))?;

        Ok(Config {
            auth_server_url,
            client_id,
            client_secret,
            registration_id,
            scopes,
            redirect_uri_template,
            public_routes,
            app_url,
            trust_forwarded_headers: flag("TRUST_FORWARDED_HEADERS")?,
            session_timeout,
            session_secret,
            redis_url: var("REDIS_URL"),
            proxy_target: var("PROXY_TARGET").map(|target| target.trim_end_matches('/').to_string()),
            listen_addr,
            dev_mode: flag("DEV_MODE")?,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("auth_server_url", &self.auth_server_url)
            .field("client_id", &self.client_id)
            .field("registration_id", &self.registration_id)
            .field("scopes", &self.scopes)
            .field("public_routes", &self.public_routes.len())
            .field("app_url", &self.app_url)
            .field("trust_forwarded_headers", &self.trust_forwarded_headers)
            .field("session_timeout", &self.session_timeout)
            .field("proxy_target", &self.proxy_target)
            .field("listen_addr", &self.listen_addr)
            .field("dev_mode", &self.dev_mode)
            .finish_non_exhaustive()
    }
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required configuration value is missing
    #[error("Missing required configuration value: {0}")]
    MissingValue(&'static str),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(&'static str),
    #[error(transparent)]
    Rules(#[from] RuleEvaluationError),
    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
