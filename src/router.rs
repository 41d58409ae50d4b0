//! Routing configuration for the gateway.
//!
//! This module assembles the gateway's own endpoints, the downstream routes
//! and the middleware stack around them.

use axum::extract::FromRef;
use axum::routing::{get, post};
use axum::{middleware, Router};
use http::{header, HeaderName};
use tower_cookies::CookieManagerLayer;
use tower_http::propagate_header::PropagateHeaderLayer;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::sensitive_headers::SetSensitiveRequestHeadersLayer;
use tower_http::trace::TraceLayer;
use tower_sessions::service::PrivateCookie;
use tower_sessions::SessionManagerLayer;

use crate::api::authenticated::AuthenticatedApi;
use crate::api::public::PublicApi;
use crate::filter_chain::{security_filter, SecurityFilterChain};
use crate::session::session_store_guard;
use crate::session_storage::kv_session_store::KvSessionStore;

/// Application state shared across handlers
#[derive(Clone, Debug)]
pub struct AppState {
    pub filter_chain: SecurityFilterChain,
    /// Client used to reach `proxy_target`
    pub http_client: reqwest::Client,
    pub proxy_target: Option<String>,
}

impl FromRef<AppState> for SecurityFilterChain {
    fn from_ref(input: &AppState) -> Self {
        input.filter_chain.clone()
    }
}

/// Create the gateway router
///
/// `downstream` holds routes served in-process; every other path falls
/// through to the proxy. All of them sit behind the security filter.
pub fn create_router(
    state: AppState,
    downstream: Router<AppState>,
    session_layer: SessionManagerLayer<KvSessionStore, PrivateCookie>,
) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");

    Router::new()
        .route(
            "/oauth2/authorization/:registration_id",
            get(PublicApi::authorize),
        )
        .route(
            "/login/oauth2/code/:registration_id",
            get(PublicApi::callback),
        )
        .route("/logout", post(PublicApi::logout))
        .route("/user", get(AuthenticatedApi::user))
        .merge(downstream)
        .fallback(AuthenticatedApi::proxy)
        .layer(middleware::from_fn_with_state(
            state.filter_chain.clone(),
            security_filter,
        ))
        .with_state(state)
        .layer(session_layer)
        .layer(middleware::from_fn(session_store_guard))
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateHeaderLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(SetSensitiveRequestHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
        ]))
}
