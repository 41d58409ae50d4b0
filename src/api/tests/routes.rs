use super::*;
use axum::http::Method;

#[tokio::test]
async fn test_root_is_public() {
    let gateway = test_gateway().await;
    let mut client = gateway.client();

    let response = client.browse(Method::GET, "/").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, "home");
    assert!(response.location().is_none());
}

#[tokio::test]
async fn test_book_reads_are_public() {
    let gateway = test_gateway().await;
    let mut client = gateway.client();

    let response = client.xhr(Method::GET, "/books/1234567891").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, "book");
}

#[tokio::test]
async fn test_book_writes_require_authentication() {
    let gateway = test_gateway().await;
    let mut client = gateway.client();

    let response = client.xhr(Method::POST, "/books/1234567891").await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(gateway.backend_hits(), 0);
}

#[tokio::test]
async fn test_browser_is_sent_to_provider_with_fresh_state() {
    let gateway = test_gateway().await;
    let mut client = gateway.client();

    let first = client.browse(Method::POST, "/orders").await;
    let second = client.browse(Method::POST, "/orders").await;

    assert_eq!(first.status, StatusCode::FOUND);
    assert!(first
        .location()
        .unwrap()
        .starts_with("https://idp.example.com/realms/polar/protocol/openid-connect/auth?"));
    assert_eq!(
        first.location_param("redirect_uri").as_deref(),
        Some("http://localhost:9000/login/oauth2/code/keycloak")
    );
    assert_ne!(first.location_param("state"), second.location_param("state"));
    assert_eq!(gateway.backend_hits(), 0);
}

#[tokio::test]
async fn test_programmatic_client_gets_bare_401() {
    let gateway = test_gateway().await;
    let mut client = gateway.client();

    let response = client.xhr(Method::GET, "/orders/mine").await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(response.body.is_empty());
    assert!(response.location().is_none());

    let response = client.send(Method::GET, "/user", &[], None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_callback_completes_login_and_returns_to_saved_request() {
    let gateway = test_gateway().await;
    let mut client = gateway.client();

    let response = client.login("/orders/mine").await;

    assert_eq!(response.status, StatusCode::FOUND);
    assert_eq!(response.location(), Some("/orders/mine"));

    let response = client.xhr(Method::GET, "/orders/mine").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, "isabelle");
}

#[tokio::test]
async fn test_user_endpoint_returns_claims() {
    let gateway = test_gateway().await;
    let mut client = gateway.client();
    client.login("/").await;

    let response = client.xhr(Method::GET, "/user").await;

    assert_eq!(response.status, StatusCode::OK);
    let user: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(user["subject"], "isabelle");
    assert_eq!(user["username"], "isabelle");
    assert_eq!(user["given_name"], "Isabelle");
    assert_eq!(user["roles"], serde_json::json!(["employee", "customer"]));
}

#[tokio::test]
async fn test_explicit_login_endpoint() {
    let gateway = test_gateway().await;
    let mut client = gateway.client();

    let response = client
        .browse(Method::GET, "/oauth2/authorization/keycloak")
        .await;
    assert_eq!(response.status, StatusCode::FOUND);
    let state = response.location_param("state").unwrap();

    let response = client
        .browse(
            Method::GET,
            &format!("/login/oauth2/code/keycloak?code=abc&state={}", state),
        )
        .await;
    assert_eq!(response.location(), Some("/"));

    let response = client
        .browse(Method::GET, "/oauth2/authorization/github")
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_callback_with_wrong_state_is_rejected() {
    let gateway = test_gateway().await;
    let mut client = gateway.client();
    client.browse(Method::GET, "/orders/mine").await;

    let response = client
        .browse(
            Method::GET,
            "/login/oauth2/code/keycloak?code=abc&state=forged",
        )
        .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(response.body.is_empty());
    let response = client.xhr(Method::GET, "/orders/mine").await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_callback_without_login_in_progress_is_rejected() {
    let gateway = test_gateway().await;
    let mut client = gateway.client();

    let response = client
        .browse(Method::GET, "/login/oauth2/code/keycloak?code=abc&state=state-1")
        .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_failed_code_exchange_creates_no_session_record() {
    let gateway = test_gateway().await;
    let mut client = gateway.client();
    let redirect = client.browse(Method::GET, "/orders/mine").await;
    let state = redirect.location_param("state").unwrap();

    let response = client
        .browse(
            Method::GET,
            &format!("/login/oauth2/code/keycloak?code=bad&state={}", state),
        )
        .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    let response = client.xhr(Method::GET, "/user").await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_redirects_through_provider() {
    let gateway = test_gateway().await;
    let mut client = gateway.client();
    client.login("/").await;

    let response = client.xhr_with_csrf(Method::POST, "/logout").await;

    assert_eq!(response.status, StatusCode::FOUND);
    assert!(response
        .location()
        .unwrap()
        .starts_with("https://idp.example.com/realms/polar/protocol/openid-connect/logout?"));
    assert_eq!(
        response.location_param("post_logout_redirect_uri").as_deref(),
        Some(BASE_URL)
    );
    assert!(response.location_param("id_token_hint").is_some());
    assert_eq!(
        response.location_param("client_id").as_deref(),
        Some("edge-service")
    );
    assert!(client.cookie("XSRF-TOKEN").is_none());

    let response = client.xhr(Method::GET, "/user").await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_honours_forwarded_host_when_trusted() {
    let gateway = test_gateway_with(
        StubIdentityProvider::new(),
        &[("TRUST_FORWARDED_HEADERS", "true")],
    )
    .await;
    let mut client = gateway.client();
    client.login("/").await;

    let token = client.cookie("XSRF-TOKEN").unwrap().to_string();
    let response = client
        .send(
            Method::POST,
            "/logout",
            &[
                ("x-xsrf-token", token.as_str()),
                ("x-forwarded-proto", "https"),
                ("x-forwarded-host", "polarbookshop.example.com"),
            ],
            None,
        )
        .await;

    assert_eq!(
        response.location_param("post_logout_redirect_uri").as_deref(),
        Some("https://polarbookshop.example.com")
    );
}
