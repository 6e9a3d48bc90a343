//! HTTP Basic authentication gate.
//!
//! When credentials are configured every request must carry
//! `Authorization: Basic <base64(user:pass)>`. Comparison is constant-time
//! over the full byte content of both fields.

use crate::{errors::AppError, routes::AppState};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use std::fmt;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Configured username/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: Vec<u8>,
    password: Vec<u8>,
}

impl Credentials {
    /// Build the pair, or `None` when either half is empty (gate disabled).
    pub fn from_pair(user: &str, password: &str) -> Option<Self> {
        if user.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            user: user.as_bytes().to_vec(),
            password: password.as_bytes().to_vec(),
        })
    }

    /// Both fields are always compared before the results are combined.
    pub fn matches(&self, user: &[u8], password: &[u8]) -> bool {
        let user_ok = self.user.as_slice().ct_eq(user);
        let password_ok = self.password.as_slice().ct_eq(password);
        (user_ok & password_ok).into()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &String::from_utf8_lossy(&self.user))
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Decoded `Authorization: Basic` payload.
#[derive(Debug, PartialEq, Eq)]
pub struct BasicCredentials {
    pub user: Vec<u8>,
    pub password: Vec<u8>,
}

/// Extract Basic credentials from request headers.
///
/// The scheme is matched case-insensitively and the decoded payload is split
/// at the first `:`. Anything else yields `None`.
pub fn parse_basic_authorization(headers: &HeaderMap) -> Option<BasicCredentials> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_at_checked(6)?;
    if !scheme.eq_ignore_ascii_case("Basic ") {
        return None;
    }

    let decoded = general_purpose::STANDARD.decode(encoded).ok()?;
    let split = decoded.iter().position(|b| *b == b':')?;
    Some(BasicCredentials {
        user: decoded[..split].to_vec(),
        password: decoded[split + 1..].to_vec(),
    })
}

/// Middleware guarding every route when credentials are configured.
pub async fn basic_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.credentials.as_deref() else {
        return next.run(request).await;
    };

    let authenticated = parse_basic_authorization(request.headers())
        .is_some_and(|supplied| expected.matches(&supplied.user, &supplied.password));

    if !authenticated {
        warn!(path = %request.uri().path(), "rejected request with missing or invalid credentials");
        return AppError::unauthorized().into_response();
    }

    next.run(request).await
}
