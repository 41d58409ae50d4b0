use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{header, HeaderMap, HeaderName, StatusCode};
use tracing::error;

use crate::authorized_client::UserInfo;
use crate::filter_chain::AuthenticatedPrincipal;
use crate::router::AppState;

const MAX_PROXY_BODY: usize = 10 * 1024 * 1024;

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| {
            !is_hop_by_hop(name)
                && *name != header::HOST
                && *name != header::COOKIE
                && *name != header::AUTHORIZATION
                && *name != header::CONTENT_LENGTH
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

pub struct AuthenticatedApi;

impl AuthenticatedApi {
    /// `GET /user`
    pub async fn user(principal: AuthenticatedPrincipal) -> Json<UserInfo> {
        Json(principal.user)
    }

    /// Forwards everything else to `PROXY_TARGET`, relaying the access token
    /// of an authenticated principal as a bearer token.
    pub async fn proxy(
        State(state): State<AppState>,
        principal: Option<AuthenticatedPrincipal>,
        request: Request,
    ) -> Response {
        let Some(proxy_target) = state.proxy_target.as_deref() else {
            return StatusCode::NOT_FOUND.into_response();
        };

        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|path_and_query| path_and_query.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", proxy_target, path_and_query);

        let body = match axum::body::to_bytes(body, MAX_PROXY_BODY).await {
            Ok(body) => body,
            Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
        };

        let mut upstream_request = state
            .http_client
            .request(parts.method.clone(), &url)
            .headers(forwarded_headers(&parts.headers))
            .body(body);
        if let Some(principal) = principal {
            upstream_request = upstream_request.bearer_auth(&principal.access_token);
        }

        let upstream = match upstream_request.send().await {
            Ok(upstream) => upstream,
            Err(err) => {
                error!(method = %parts.method, path = %parts.uri.path(), "proxy request failed: {}", err);
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        let status = upstream.status();
        let headers: HeaderMap = upstream
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name) && *name != header::CONTENT_LENGTH)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}
