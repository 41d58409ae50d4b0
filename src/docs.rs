//! # edge-auth-gateway Documentation
//!
//! This module collects the architecture notes, configuration reference and
//! request lifecycle of the gateway in one place.
//!
//! ## Overview
//!
//! edge-auth-gateway fronts a set of backend APIs and a single-page frontend.
//! It signs users in through an OpenID Connect provider (Keycloak in the
//! default setup), keeps their tokens on the server side, and forwards
//! authenticated traffic with the access token attached as a bearer token.
//!
//! ## Architecture
//!
//! - **authorization**: the ordered route-rule table that decides whether a
//!   request is public or needs a session
//! - **filter_chain**: the per-request pipeline (classify, authenticate, CSRF
//!   check, forward, hand out the CSRF cookie)
//! - **entry_point**: what an unauthenticated client receives (login redirect
//!   for browsers, bare `401` for scripts)
//! - **oidc**: provider discovery, the authorization-code flow with PKCE, ID
//!   token checks and RP-initiated logout
//! - **authorized_client**: per-session token storage with refresh on expiry
//! - **csrf**: double-submit cookie protection
//! - **session** / **session_storage**: tower-sessions over a key-value store
//!   (in memory, or Redis with the `redis` feature)
//! - **api** / **router**: the gateway's own endpoints, the proxy fallback and
//!   the middleware stack
//!
//! ## Request lifecycle
//!
//! 1. The request gets an `x-request-id` and a tracing span.
//! 2. The session is loaded from the encrypted `SESSION` cookie. If the store
//!    cannot load or save it, the answer is `401`.
//! 3. Paths with dot segments or encoded separators are refused with `400`.
//!    The route rules classify the rest. Public requests skip step 4.
//! 4. The authorized client for the session is loaded, refreshing the access
//!    token when it is about to expire. Without one, browsers are redirected
//!    to the provider and everything else gets `401`.
//! 5. Unsafe methods must echo the session's CSRF token in `X-XSRF-TOKEN` or
//!    a `_csrf` form field, otherwise the answer is `403`.
//! 6. The request reaches a gateway endpoint, an in-process route or the
//!    proxy.
//! 7. The response carries the `XSRF-TOKEN` cookie whenever the client does
//!    not already hold the current token.
//!
//! ## Endpoints
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/oauth2/authorization/{registrationId}` | start a login |
//! | GET | `/login/oauth2/code/{registrationId}` | authorization callback |
//! | POST | `/logout` | end the session and the provider session |
//! | GET | `/user` | claims of the signed-in user |
//!
//! ## Configuration
//!
//! Everything is read from the environment once at startup:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `AUTH_SERVER_URL` | required | provider issuer, used for discovery |
//! | `CLIENT_ID` | required | OAuth client id |
//! | `CLIENT_SECRET` | unset | client secret; unset for a public client |
//! | `REGISTRATION_ID` | `keycloak` | name used in the login and callback paths |
//! | `OAUTH_SCOPES` | `openid,roles` | requested scopes; `openid` is always added |
//! | `REDIRECT_URI_TEMPLATE` | `{baseUrl}/login/oauth2/code/{registrationId}` | callback URL |
//! | `PUBLIC_ROUTES` | `/, /*.css, /*.js, /favicon.ico, GET /books/**` | comma-separated allow-list |
//! | `APP_URL` | unset | base URL for requests without host information |
//! | `TRUST_FORWARDED_HEADERS` | `false` | honour `X-Forwarded-*` |
//! | `SESSION_TIMEOUT_SECS` | `600` | inactivity timeout |
//! | `SESSION_SECRET` | random | base64 key, at least 64 bytes |
//! | `REDIS_URL` | unset | shared store (needs the `redis` feature) |
//! | `PROXY_TARGET` | unset | where unrouted requests are forwarded |
//! | `LISTEN_ADDR` | `0.0.0.0:9000` | bind address |
//! | `DEV_MODE` | `false` | drop the `Secure` cookie attribute |
//!
//! ## Embedding
//!
//! ```ignore
//! let app = edge_auth_gateway::build_gateway(&config, store, provider, backend_routes)?;
//! axum::serve(listener, app).await?;
//! ```
//!
//! Handlers in `backend_routes` can extract
//! [`AuthenticatedPrincipal`](crate::AuthenticatedPrincipal) on protected routes.
//!
//! ## Deployment
//!
//! Run one instance with the in-memory store, or several behind a load
//! balancer sharing Redis and the same `SESSION_SECRET`.
