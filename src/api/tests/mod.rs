use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    routing::{get, post},
    Router,
};
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use url::Url;

use crate::build_gateway;
use crate::config::Config;
use crate::filter_chain::AuthenticatedPrincipal;
use crate::oidc::testing::StubIdentityProvider;
use crate::router::AppState;
use crate::session_storage::in_memory::MemoryKvStore;

pub const HOST: &str = "localhost:9000";
pub const BASE_URL: &str = "http://localhost:9000";
pub const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,*/*;q=0.8";

// Gateway wired to the stub provider, an in-memory store and in-process
// backend routes that count how often they are reached.
pub struct TestGateway {
    pub app: Router,
    pub store: MemoryKvStore,
    pub provider: Arc<StubIdentityProvider>,
    pub backend_hits: Arc<AtomicUsize>,
}

impl TestGateway {
    pub fn backend_hits(&self) -> usize {
        self.backend_hits.load(Ordering::SeqCst)
    }

    pub fn client(&self) -> TestClient {
        TestClient {
            app: self.app.clone(),
            cookies: HashMap::new(),
        }
    }
}

fn test_config(extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("AUTH_SERVER_URL", "https://idp.example.com/realms/polar"),
        ("CLIENT_ID", "edge-service"),
        ("CLIENT_SECRET", "polar-keycloak-secret"),
        ("DEV_MODE", "true"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    Config::from_lookup(|name| vars.get(name).cloned()).unwrap()
}

fn backend(hits: Arc<AtomicUsize>) -> Router<AppState> {
    let counted = move |body: &'static str| {
        let hits = hits.clone();
        move || async move {
            hits.fetch_add(1, Ordering::SeqCst);
            body
        }
    };

    Router::new()
        .route("/", get(counted("home")))
        .route("/books/:isbn", get(counted("book")).post(counted("book updated")))
        .route("/orders", post(counted("order placed")))
        .route(
            "/orders/mine",
            get(|principal: AuthenticatedPrincipal| async move { principal.name }),
        )
}

pub async fn test_gateway() -> TestGateway {
    test_gateway_with(StubIdentityProvider::new(), &[]).await
}

pub async fn test_gateway_with(
    provider: StubIdentityProvider,
    extra_config: &[(&str, &str)],
) -> TestGateway {
    let config = test_config(extra_config);
    let store = MemoryKvStore::new();
    let provider = Arc::new(provider);
    let backend_hits = Arc::new(AtomicUsize::new(0));

    let app = build_gateway(
        &config,
        Arc::new(store.clone()),
        provider.clone(),
        backend(backend_hits.clone()),
    )
    .unwrap();

    TestGateway {
        app,
        store,
        provider,
        backend_hits,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: http::HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
    }

    pub fn set_cookies(&self) -> Vec<&str> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }

    pub fn location_param(&self, name: &str) -> Option<String> {
        let location = Url::parse(self.location()?).ok()?;
        location
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

// A browser-like client: keeps cookies between requests and always sends Host.
pub struct TestClient {
    app: Router,
    pub cookies: HashMap<String, String>,
}

impl TestClient {
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub async fn send(
        &mut self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<&str>,
    ) -> TestResponse {
        let mut req_builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, HOST);

        for (name, value) in headers {
            req_builder = req_builder.header(*name, *value);
        }
        if !self.cookies.is_empty() {
            let cookie_header = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
            req_builder = req_builder.header(header::COOKIE, cookie_header);
        }

        let body = match body {
            Some(b) => Body::from(b.to_string()),
            None => Body::empty(),
        };
        let req = req_builder.body(body).unwrap();

        let response = self.app.clone().oneshot(req).await.unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let response = TestResponse {
            status,
            headers,
            body: String::from_utf8(body.to_vec()).unwrap(),
        };

        for set_cookie in response.set_cookies() {
            self.store_cookie(set_cookie);
        }
        response
    }

    fn store_cookie(&mut self, set_cookie: &str) {
        let mut attributes = set_cookie.split(';').map(str::trim);
        let Some((name, value)) = attributes.next().and_then(|pair| pair.split_once('=')) else {
            return;
        };
        let removed = value.is_empty()
            || attributes.any(|attribute| attribute.eq_ignore_ascii_case("Max-Age=0"));
        if removed {
            self.cookies.remove(name);
        } else {
            self.cookies.insert(name.to_string(), value.to_string());
        }
    }

    pub async fn browse(&mut self, method: Method, uri: &str) -> TestResponse {
        self.send(method, uri, &[("accept", BROWSER_ACCEPT)], None).await
    }

    pub async fn xhr(&mut self, method: Method, uri: &str) -> TestResponse {
        self.send(
            method,
            uri,
            &[
                ("accept", "application/json"),
                ("x-requested-with", "XMLHttpRequest"),
            ],
            None,
        )
        .await
    }

    /// Sends a state-changing XHR carrying the CSRF cookie's value.
    pub async fn xhr_with_csrf(&mut self, method: Method, uri: &str) -> TestResponse {
        let token = self.cookie("XSRF-TOKEN").unwrap_or_default().to_string();
        self.send(
            method,
            uri,
            &[
                ("accept", "application/json"),
                ("x-requested-with", "XMLHttpRequest"),
                ("x-xsrf-token", token.as_str()),
            ],
            None,
        )
        .await
    }

    /// Runs the whole authorization-code round trip starting from `target`.
    pub async fn login(&mut self, target: &str) -> TestResponse {
        let redirect = self.browse(Method::GET, target).await;
        assert_eq!(redirect.status, StatusCode::FOUND);
        let state = redirect.location_param("state").unwrap();

        self.browse(
            Method::GET,
            &format!("/login/oauth2/code/keycloak?code=abc&state={}", state),
        )
        .await
    }
}

pub mod routes;
