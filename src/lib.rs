//! # edge-auth-gateway
//!
//! An edge gateway that sits in front of backend APIs and a browser client.
//! Public routes pass straight through; every other route requires a session
//! established through the OpenID Connect authorization-code flow, and every
//! state-changing request must carry the session's CSRF token.
//!
//! ## Features
//!
//! - OAuth 2.0 authorization-code login with PKCE against any OIDC provider
//! - Access and refresh tokens held server-side, per session, with refresh on expiry
//! - RP-initiated logout through the provider's end-session endpoint
//! - Double-submit cookie CSRF protection for single-page frontends
//! - Session management with tower-sessions over a pluggable key-value store
//!
//! See the [docs](crate::docs) module for comprehensive documentation.

pub mod api;
pub mod authorization;
pub mod authorized_client;
pub mod config;
pub mod csrf;
pub mod docs;
pub mod entry_point;
pub mod error;
pub mod filter_chain;
pub mod oidc;
pub mod router;
pub mod session;
pub mod session_storage;
pub mod utilities;

use axum::Router;
use std::sync::Arc;

use crate::authorized_client::SessionAuthorizedClientRepository;
use crate::config::{Config, ConfigError};
use crate::csrf::CsrfTokenRepository;
use crate::filter_chain::SecurityFilterChain;
use crate::oidc::{IdentityProvider, LoginOrchestrator};
use crate::router::{create_router, AppState};
use crate::session::create_session_layer;
use crate::session_storage::kv_session_store::KvSessionStore;
use crate::session_storage::KeyValueStore;

pub use crate::authorization::{Decision, RouteRule, RuleTable};
pub use crate::error::GatewayError;
pub use crate::filter_chain::AuthenticatedPrincipal;

/// Builds the complete gateway from its collaborators.
///
/// The key-value store backs both the sessions and the authorized clients.
/// `downstream` routes are served behind the security filter; anything they
/// do not match is proxied to `PROXY_TARGET`.
pub fn build_gateway(
    config: &Config,
    store: Arc<dyn KeyValueStore>,
    provider: Arc<dyn IdentityProvider>,
    downstream: Router<AppState>,
) -> Result<Router, ConfigError> {
    let repository = Arc::new(SessionAuthorizedClientRepository::new(
        store.clone(),
        provider.clone(),
        config.session_timeout,
    ));
    let orchestrator = LoginOrchestrator::new(provider, repository);
    let filter_chain = SecurityFilterChain::new(
        config.public_routes.clone(),
        orchestrator,
        CsrfTokenRepository::new(!config.dev_mode),
        config.trust_forwarded_headers,
        config.app_url.clone(),
    )?;

    let http_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let state = AppState {
        filter_chain,
        http_client,
        proxy_target: config.proxy_target.clone(),
    };
    let session_layer = create_session_layer(config, None, KvSessionStore::new(store))?;

    Ok(create_router(state, downstream, session_layer))
}
