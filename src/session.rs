//! Session management for the gateway.
//!
//! Sessions are tower-sessions records kept in the external key-value store
//! and identified by an encrypted cookie.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use time::Duration;
use tower_cookies::cookie::SameSite;
use tower_sessions::cookie::Key;
use tower_sessions::service::PrivateCookie;
use tower_sessions::SessionManagerLayer;
use tower_sessions_core::Expiry;
use tracing::{error, warn};

use crate::config::{Config, ConfigError};
use crate::error::GatewayError;
use crate::session_storage::kv_session_store::KvSessionStore;
use crate::session_storage::track_store_failures;

/// Session configuration options
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// The name of the session cookie
    pub cookie_name: String,
    /// The expiry policy for the session
    pub expiry: Expiry,
    /// The path for the session cookie
    pub path: String,
    /// Whether the session cookie should be secure
    pub secure: bool,
    /// The same-site policy for the session cookie
    pub same_site: SameSite,
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        let inactivity = Duration::try_from(config.session_timeout).unwrap_or(Duration::minutes(10));
        Self {
            expiry: Expiry::OnInactivity(inactivity),
            secure: !config.dev_mode,
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "SESSION".to_string(),
            expiry: Expiry::OnInactivity(Duration::minutes(10)),
            path: "/".to_string(),
            secure: true,
            // Lax lets the provider's top-level redirect carry the cookie back.
            same_site: SameSite::Lax,
        }
    }
}

/// Create a session manager layer with the given configuration
///
/// The cookie is encrypted with `SESSION_SECRET`. Without one, a key is
/// generated and sessions do not survive a restart.
pub fn create_session_layer(
    config: &Config,
    session_config: Option<SessionConfig>,
    session_store: KvSessionStore,
) -> Result<SessionManagerLayer<KvSessionStore, PrivateCookie>, ConfigError> {
    let session_config = session_config.unwrap_or_else(|| SessionConfig::from_config(config));
    let key = session_key(config.session_secret.as_deref())?;

    Ok(SessionManagerLayer::new(session_store)
        .with_name(session_config.cookie_name)
        .with_expiry(session_config.expiry)
        .with_same_site(session_config.same_site)
        .with_http_only(true)
        .with_path(session_config.path)
        .with_secure(session_config.secure)
        .with_always_save(true)
        .with_private(key))
}

/// Sits outside the session layer. A store failure while that layer loads or
/// saves the session answers 401, never the layer's own 500.
pub async fn session_store_guard(request: Request, next: Next) -> Response {
    let (response, store_failed) = track_store_failures(next.run(request)).await;
    if store_failed && response.status().is_server_error() {
        error!(status = %response.status(), "session store unavailable, request denied");
        return GatewayError::SessionStoreUnavailable("session could not be persisted".to_string())
            .into_response();
    }
    response
}

fn session_key(secret: Option<&[u8]>) -> Result<Key, ConfigError> {
    match secret {
        Some(secret) => {
            Key::try_from(secret).map_err(|_| ConfigError::InvalidValue("SESSION_SECRET"))
        }
        None => {
            warn!("SESSION_SECRET is not set; sessions will not survive a restart");
            Ok(Key::generate())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_from_secret() {
        let first = session_key(Some(&[1u8; 64])).unwrap();
        let second = session_key(Some(&[1u8; 64])).unwrap();
        assert_eq!(first.master(), second.master());

        assert!(session_key(Some(&[1u8; 16])).is_err());
    }

    #[test]
    fn test_generated_keys_differ() {
        let first = session_key(None).unwrap();
        let second = session_key(None).unwrap();
        assert_ne!(first.master(), second.master());
    }

    #[test]
    fn test_dev_mode_disables_secure_cookie() {
        let config = Config::from_lookup(|name| match name {
            "AUTH_SERVER_URL" => Some("http://localhost:8080/realms/PolarBookshop".to_string()),
            "CLIENT_ID" => Some("edge-service".to_string()),
            "DEV_MODE" => Some("true".to_string()),
            "SESSION_TIMEOUT_SECS" => Some("900".to_string()),
            _ => None,
        })
        .unwrap();

        let session_config = SessionConfig::from_config(&config);
        assert!(!session_config.secure);
        assert_eq!(session_config.cookie_name, "SESSION");
        assert!(matches!(
            session_config.expiry,
            Expiry::OnInactivity(inactivity) if inactivity == Duration::seconds(900)
        ));
    }
}
