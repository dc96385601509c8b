//! Shared-token authentication and origin checks for the HTTP surface.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use url::Url;

use super::AppState;

pub const AUTH_COOKIE: &str = "auth_token";
pub const TOKEN_QUERY_PARAM: &str = "token";

/// The configured secret, kept only as a digest.
#[derive(Clone)]
pub struct TokenDigest([u8; 32]);

impl TokenDigest {
    pub fn new(secret: &str) -> Self {
        Self(Sha256::digest(secret.as_bytes()).into())
    }

    /// Compares digests so the check time does not depend on where the
    /// candidate diverges from the secret.
    pub fn matches(&self, candidate: &str) -> bool {
        let other: [u8; 32] = Sha256::digest(candidate.as_bytes()).into();
        self.0
            .iter()
            .zip(other.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for TokenDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenDigest(..)")
    }
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn subprotocols(headers: &HeaderMap) -> impl Iterator<Item = &str> {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

fn query_token(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == TOKEN_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// The websocket subprotocol entry carrying the token, echoed back on upgrade.
pub fn matching_subprotocol(headers: &HeaderMap, digest: &TokenDigest) -> Option<String> {
    subprotocols(headers)
        .find(|p| digest.matches(p))
        .map(str::to_string)
}

/// Whether any accepted credential carries the token: the auth cookie, a
/// bearer header, a websocket subprotocol or the `token` query parameter.
pub fn is_authorized(headers: &HeaderMap, query: Option<&str>, digest: &TokenDigest) -> bool {
    cookie_value(headers, AUTH_COOKIE).is_some_and(|t| digest.matches(t))
        || bearer_token(headers).is_some_and(|t| digest.matches(t))
        || matching_subprotocol(headers, digest).is_some()
        || query_token(query).is_some_and(|t| digest.matches(&t))
}

/// Rejects requests without a valid token. No-op when no token is configured.
pub async fn require_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(digest) = &state.token {
        if !is_authorized(req.headers(), req.uri().query(), digest) {
            log::debug!("Rejected unauthenticated request to {}", req.uri().path());
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }
    next.run(req).await
}

/// `host[:port]` of an origin URL, port omitted when it is the scheme default.
fn origin_authority(origin: &str) -> Option<String> {
    let url = Url::parse(origin).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Same-host origins pass, as do those in `allowed`. Requests without an
/// `Origin` header come from non-browser clients and pass too.
pub fn origin_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return true;
    };
    let origin = origin.trim().trim_end_matches('/');

    if allowed.iter().any(|a| a == "*" || a.eq_ignore_ascii_case(origin)) {
        return true;
    }

    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    match (origin_authority(origin), host) {
        (Some(authority), Some(host)) => authority.eq_ignore_ascii_case(host.trim()),
        _ => false,
    }
}
