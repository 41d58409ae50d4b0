use http::{HeaderMap, Uri};

/// Session attribute holding the in-flight authorization request.
pub const PENDING_AUTHORIZATION_KEY: &str = "oauth2_authorization_request";
/// Session attribute naming the registration the session authenticated with.
pub const AUTHENTICATED_REGISTRATION_KEY: &str = "authenticated_registration";
pub const CSRF_TOKEN_KEY: &str = "csrf_token";

pub struct Utilities;

impl Utilities {
    pub fn session_record_key(session_id: &str) -> String {
        format!("session::{}", session_id)
    }

    pub fn authorized_client_key(registration_id: &str, session_id: &str) -> String {
        format!("authorized_client::{}::{}", registration_id, session_id)
    }

    /// Computes `scheme://host[:port]` of this gateway as the client sees it.
    ///
    /// `X-Forwarded-*` headers are only honoured when `trust_forwarded` is set.
    /// Without any host information the `fallback` is used.
    pub fn base_url(
        uri: &Uri,
        headers: &HeaderMap,
        trust_forwarded: bool,
        fallback: Option<&str>,
    ) -> Option<String> {
        let forwarded = |name: &str| {
            if !trust_forwarded {
                return None;
            }
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let scheme = forwarded("x-forwarded-proto")
            .or_else(|| uri.scheme_str())
            .unwrap_or("http")
            .to_ascii_lowercase();

        let host = forwarded("x-forwarded-host")
            .or_else(|| {
                headers
                    .get(http::header::HOST)
                    .and_then(|value| value.to_str().ok())
            })
            .or_else(|| uri.authority().map(|authority| authority.as_str()));

        let Some(host) = host else {
            return fallback.map(|url| url.trim_end_matches('/').to_string());
        };

        let mut base_url = format!("{}://{}", scheme, host);
        if let Some(port) = forwarded("x-forwarded-port") {
            let default_port = matches!((scheme.as_str(), port), ("http", "80") | ("https", "443"));
            if !host.contains(':') && !default_port {
                base_url.push(':');
                base_url.push_str(port);
            }
        }
        Some(base_url)
    }
}
